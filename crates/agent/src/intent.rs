use std::sync::Arc;

use tracing::{debug, warn};

use askerp_core::domain::intent::IntentLabel;
use askerp_core::errors::PipelineError;

use crate::llm::{LlmClient, RetryPolicy};

const CLASSIFIER_PROMPT: &str = "\
You route messages for a chatbot that answers questions about a TOTVS Protheus ERP.
Decide whether the message needs data read from the ERP database (sales orders,
customers, products, stock, invoices, amounts, counts, rankings) or is ordinary
conversation (greetings, thanks, questions about the assistant itself).

Answer with exactly one word:
- sql  -> the message needs data from the database
- chat -> anything else

Message: ";

/// Messages answered with a fixed reply before any model call.
pub const GREETINGS: &[&str] = &[
    "oi", "olá", "ola", "bom dia", "boa tarde", "boa noite", "e aí", "e ai", "tudo bem", "hi",
    "hello",
];

pub const GREETING_REPLY: &str =
    "Hello! How can I help you with sales or inventory information today?";

pub fn is_greeting(question: &str) -> bool {
    let normalized = question
        .trim()
        .trim_end_matches(|ch: char| matches!(ch, '!' | '?' | '.' | ','))
        .trim()
        .to_lowercase();
    GREETINGS.contains(&normalized.as_str())
}

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn prompt(question: &str) -> String {
        format!("{CLASSIFIER_PROMPT}{question}")
    }

    /// One completion, no retry. A failed call is an error; an odd answer is
    /// read as conversational.
    pub async fn classify(&self, question: &str) -> Result<IntentLabel, PipelineError> {
        let completion = self
            .llm
            .complete_with(&Self::prompt(question), RetryPolicy::SingleAttempt)
            .await
            .map_err(|error| {
                warn!(
                    event_name = "intent.classify.failed",
                    error = %error,
                    "classifier call failed"
                );
                PipelineError::Classification(error.to_string())
            })?;

        let label = IntentLabel::from_completion(&completion);
        debug!(
            event_name = "intent.classified",
            intent = label.as_str(),
            raw = completion.trim(),
            "question classified"
        );
        Ok(label)
    }
}
