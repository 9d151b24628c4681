use std::sync::Arc;

use serde::Serialize;

use askerp_core::rules::{BusinessRules, RuleFinding};
use askerp_core::sql_guard::{self, SqlRejection};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GuardrailDecision {
    Allow,
    /// Runs, but the business-rule findings are surfaced as warnings.
    Degrade { reason_code: &'static str, findings: Vec<RuleFinding> },
    /// Never reaches the executor.
    Deny { reason_code: &'static str, user_message: String },
}

impl GuardrailDecision {
    pub fn allows_execution(&self) -> bool {
        !matches!(self, Self::Deny { .. })
    }
}

#[derive(Clone, Debug)]
pub struct GuardrailPolicy {
    rules: Arc<BusinessRules>,
    pub enforce_rule_predicates: bool,
}

impl GuardrailPolicy {
    pub fn new(rules: Arc<BusinessRules>, enforce_rule_predicates: bool) -> Self {
        Self { rules, enforce_rule_predicates }
    }

    pub fn evaluate(&self, candidate: &str) -> GuardrailDecision {
        if let Err(rejection) = sql_guard::validate(candidate) {
            return deny_rejection(&rejection);
        }

        let findings = self.rules.check(candidate);
        if findings.is_empty() {
            return GuardrailDecision::Allow;
        }

        if self.enforce_rule_predicates {
            let detail =
                findings.iter().map(RuleFinding::message).collect::<Vec<_>>().join("; ");
            GuardrailDecision::Deny {
                reason_code: "missing_required_predicate",
                user_message: format!(
                    "The generated query was not run because it skips a required filter: {detail}."
                ),
            }
        } else {
            GuardrailDecision::Degrade { reason_code: "missing_required_predicate", findings }
        }
    }
}

fn deny_rejection(rejection: &SqlRejection) -> GuardrailDecision {
    GuardrailDecision::Deny {
        reason_code: rejection.reason_code(),
        user_message: rejection.user_message(),
    }
}
