use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntentLabel {
    DataQuery,
    Conversational,
}

impl IntentLabel {
    /// Maps a free-form classifier completion to a label. Anything that does
    /// not mention `sql` falls back to `Conversational`, which can never
    /// reach the database.
    pub fn from_completion(completion: &str) -> Self {
        let normalized = completion.trim().to_lowercase();
        if normalized.contains("sql") {
            Self::DataQuery
        } else {
            Self::Conversational
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataQuery => "data-query",
            Self::Conversational => "conversational",
        }
    }
}
