//! Turn orchestration.
//!
//! One user message goes through greeting shortcut, intent classification and
//! then either a conversational completion or the data path: schema snapshot,
//! SQL generation, guardrail evaluation per candidate, execution and
//! rendering. Every turn ends with exactly one user entry and one assistant
//! entry in the session history, including turns that failed.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context as _;
use serde::Serialize;
use tera::{Context, Tera};
use tracing::{info, warn};

use askerp_core::clock::{Clock, SystemClock};
use askerp_core::config::{AppConfig, RulesConfig};
use askerp_core::domain::conversation::ConversationHistory;
use askerp_core::domain::intent::IntentLabel;
use askerp_core::errors::PipelineError;
use askerp_core::render::{AdaptiveRenderer, RenderedResult};
use askerp_core::rules::{BusinessRules, RuleFinding};
use askerp_db::repositories::{DataDictionary, QueryExecutor, SqlDataDictionary, SqlQueryExecutor};
use askerp_db::DbPool;

use crate::generation::{prompt_templates, PromptInputs, SqlGenerator, CONVERSATION_TEMPLATE};
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::intent::{is_greeting, IntentClassifier, GREETING_REPLY};
use crate::llm::LlmClient;
use crate::schema_cache::SchemaCache;
use crate::sessions::SessionStore;

const EMPTY_QUESTION_REPLY: &str =
    "Please type a question about sales, customers, products or stock.";
const NO_SQL_NOTE: &str = "No SQL query was produced for this question.";

pub struct RuntimeDeps {
    pub llm: Arc<dyn LlmClient>,
    pub dictionary: Arc<dyn DataDictionary>,
    pub executor: Arc<dyn QueryExecutor>,
    pub clock: Arc<dyn Clock>,
    pub rules: BusinessRules,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnResponse {
    pub correlation_id: String,
    pub intent: Option<IntentLabel>,
    pub reply: TurnReply,
    /// Exactly what was appended to history for this turn.
    pub history_text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnReply {
    Greeting { text: String },
    Conversation { text: String },
    Data { preamble: String, outcomes: Vec<CandidateOutcome>, note: Option<String> },
    Failed { error_class: &'static str, message: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CandidateOutcome {
    Executed { sql: String, warnings: Vec<String>, rendered: RenderedResult },
    Rejected { sql: String, reason_code: &'static str, message: String },
    Failed { sql: String, message: String },
}

impl CandidateOutcome {
    pub fn sql(&self) -> &str {
        match self {
            Self::Executed { sql, .. } | Self::Rejected { sql, .. } | Self::Failed { sql, .. } => sql,
        }
    }

    fn history_text(&self) -> String {
        match self {
            Self::Executed { sql, warnings, rendered } => {
                let mut text = format!("```sql\n{sql}\n```\n{}", rendered.history_text);
                for warning in warnings {
                    text.push_str(&format!("\nWarning: {warning}"));
                }
                text
            }
            Self::Rejected { sql, message, .. } | Self::Failed { sql, message } => {
                format!("```sql\n{sql}\n```\n{message}")
            }
        }
    }
}

pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn QueryExecutor>,
    classifier: IntentClassifier,
    schema_cache: SchemaCache,
    generator: SqlGenerator,
    guardrails: GuardrailPolicy,
    renderer: AdaptiveRenderer,
    templates: Arc<Tera>,
    history_window: usize,
    greeting_shortcut: bool,
}

impl AgentRuntime {
    pub fn new(deps: RuntimeDeps, config: &AppConfig) -> Result<Self, PipelineError> {
        let templates = Arc::new(
            prompt_templates()
                .map_err(|error| PipelineError::Internal(format!("prompt templates: {error}")))?,
        );
        let rules = Arc::new(deps.rules);
        let ttl = chrono::Duration::seconds(
            i64::try_from(config.schema.ttl_secs).unwrap_or(i64::MAX / 1_000),
        );

        Ok(Self {
            classifier: IntentClassifier::new(Arc::clone(&deps.llm)),
            schema_cache: SchemaCache::new(
                deps.dictionary,
                config.schema.tables.clone(),
                ttl,
                Arc::clone(&deps.clock),
            ),
            generator: SqlGenerator::new(
                Arc::clone(&deps.llm),
                Arc::clone(&rules),
                Arc::clone(&templates),
            ),
            guardrails: GuardrailPolicy::new(rules, config.pipeline.enforce_rule_predicates),
            renderer: AdaptiveRenderer::new(config.render.clone()),
            llm: deps.llm,
            clock: deps.clock,
            executor: deps.executor,
            templates,
            history_window: config.pipeline.history_window,
            greeting_shortcut: config.pipeline.greeting_shortcut,
        })
    }

    /// Production wiring: dictionary and executor over `pool`, system clock,
    /// rules from configuration.
    pub fn from_config(
        config: &AppConfig,
        pool: DbPool,
        llm: Arc<dyn LlmClient>,
    ) -> anyhow::Result<Self> {
        let dictionary = SqlDataDictionary::new(pool.clone(), config.schema.dictionary_table.clone())
            .context("invalid dictionary table")?;
        let executor =
            SqlQueryExecutor::new(pool, StdDuration::from_secs(config.database.timeout_secs));
        let rules = load_rules(&config.rules)?;

        let deps = RuntimeDeps {
            llm,
            dictionary: Arc::new(dictionary),
            executor: Arc::new(executor),
            clock: Arc::new(SystemClock),
            rules,
        };
        Ok(Self::new(deps, config)?)
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    pub fn guardrails(&self) -> &GuardrailPolicy {
        &self.guardrails
    }

    /// Serialises turns of one session behind its mutex.
    pub async fn handle_session_message(
        &self,
        sessions: &SessionStore,
        session_id: &str,
        question: &str,
    ) -> TurnResponse {
        let session = sessions.session(session_id).await;
        let mut history = session.lock().await;
        self.handle_turn(&mut history, question).await
    }

    pub async fn handle_turn(
        &self,
        history: &mut ConversationHistory,
        question: &str,
    ) -> TurnResponse {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let question = question.trim();
        let context = history.render_recent(self.history_window);
        history.push_user(question);

        info!(
            event_name = "turn.started",
            correlation_id = %correlation_id,
            history_turns = history.len(),
            "handling user message"
        );

        let (intent, reply) = if question.is_empty() {
            (None, TurnReply::Greeting { text: EMPTY_QUESTION_REPLY.to_string() })
        } else if self.greeting_shortcut && is_greeting(question) {
            (None, TurnReply::Greeting { text: GREETING_REPLY.to_string() })
        } else {
            match self.answer(&correlation_id, &context, question).await {
                Ok((intent, reply)) => (Some(intent), reply),
                Err((intent, error)) => {
                    warn!(
                        event_name = "turn.failed",
                        correlation_id = %correlation_id,
                        error_class = error.error_class(),
                        error = %error,
                        "turn aborted"
                    );
                    let reply = TurnReply::Failed {
                        error_class: error.error_class(),
                        message: error.user_message().to_string(),
                    };
                    (intent, reply)
                }
            }
        };

        let history_text = reply_history_text(&reply);
        history.push_assistant(history_text.clone());

        info!(
            event_name = "turn.completed",
            correlation_id = %correlation_id,
            intent = intent.map(|label| label.as_str()).unwrap_or("shortcut"),
            "turn finished"
        );

        TurnResponse { correlation_id, intent, reply, history_text }
    }

    async fn answer(
        &self,
        correlation_id: &str,
        context: &str,
        question: &str,
    ) -> Result<(IntentLabel, TurnReply), (Option<IntentLabel>, PipelineError)> {
        let intent = self.classifier.classify(question).await.map_err(|error| (None, error))?;

        let reply = match intent {
            IntentLabel::Conversational => self.converse(context, question).await,
            IntentLabel::DataQuery => self.query(correlation_id, context, question).await,
        }
        .map_err(|error| (Some(intent), error))?;

        Ok((intent, reply))
    }

    async fn converse(&self, context: &str, question: &str) -> Result<TurnReply, PipelineError> {
        let mut tera_context = Context::new();
        tera_context.insert("history", context);
        tera_context.insert("question", question);
        let prompt = self
            .templates
            .render(CONVERSATION_TEMPLATE, &tera_context)
            .map_err(|error| PipelineError::Internal(format!("prompt rendering failed: {error}")))?;

        let text = self
            .llm
            .complete(&prompt)
            .await
            .map_err(|error| PipelineError::Conversation(error.to_string()))?;

        Ok(TurnReply::Conversation { text: text.trim().to_string() })
    }

    async fn query(
        &self,
        correlation_id: &str,
        context: &str,
        question: &str,
    ) -> Result<TurnReply, PipelineError> {
        let schema = self.schema_cache.get_schema().await?;
        let inputs =
            PromptInputs { schema: &schema, today: self.clock.today(), history: context, question };
        let generation = self.generator.generate(&inputs).await?;

        let mut outcomes = Vec::with_capacity(generation.extraction.candidates.len());
        for sql in generation.extraction.candidates {
            outcomes.push(self.run_candidate(correlation_id, sql).await);
        }

        let note = outcomes.is_empty().then(|| NO_SQL_NOTE.to_string());
        Ok(TurnReply::Data { preamble: generation.extraction.preamble, outcomes, note })
    }

    async fn run_candidate(&self, correlation_id: &str, sql: String) -> CandidateOutcome {
        let decision = self.guardrails.evaluate(&sql);
        let warnings = match decision {
            GuardrailDecision::Deny { reason_code, user_message } => {
                warn!(
                    event_name = "sql.rejected",
                    correlation_id = %correlation_id,
                    reason_code,
                    "candidate denied before execution"
                );
                return CandidateOutcome::Rejected { sql, reason_code, message: user_message };
            }
            GuardrailDecision::Degrade { findings, .. } => {
                findings.iter().map(RuleFinding::message).collect::<Vec<_>>()
            }
            GuardrailDecision::Allow => Vec::new(),
        };

        match self.executor.execute(&sql).await {
            Ok(result) => {
                info!(
                    event_name = "sql.executed",
                    correlation_id = %correlation_id,
                    rows = result.row_count(),
                    warnings = warnings.len(),
                    "candidate executed"
                );
                let rendered = self.renderer.render(&result);
                CandidateOutcome::Executed { sql, warnings, rendered }
            }
            Err(error) => {
                warn!(
                    event_name = "sql.execution.failed",
                    correlation_id = %correlation_id,
                    cause = error.cause(),
                    "candidate failed in the database"
                );
                let message = PipelineError::from(error).user_message().to_string();
                CandidateOutcome::Failed { sql, message }
            }
        }
    }
}

/// Default Protheus rules for the configured branch. When `rules.path` is
/// set its text replaces the generated prompt rules.
pub fn load_rules(config: &RulesConfig) -> anyhow::Result<BusinessRules> {
    let rules = BusinessRules::protheus_default(config.default_branch.clone());
    match &config.path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read rules file {}", path.display()))?;
            Ok(rules.with_override_text(text))
        }
        None => Ok(rules),
    }
}

fn reply_history_text(reply: &TurnReply) -> String {
    match reply {
        TurnReply::Greeting { text } | TurnReply::Conversation { text } => text.clone(),
        TurnReply::Failed { message, .. } => message.clone(),
        TurnReply::Data { preamble, outcomes, note } => {
            let mut parts = Vec::new();
            if !preamble.is_empty() {
                parts.push(preamble.clone());
            }
            parts.extend(outcomes.iter().map(CandidateOutcome::history_text));
            if let Some(note) = note {
                parts.push(note.clone());
            }
            parts.join("\n\n")
        }
    }
}
