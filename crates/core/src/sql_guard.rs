//! Read-only guard for generated SQL.
//!
//! The policy is textual: the statement is upper-cased, split into word
//! tokens and checked against a fixed blocklist. It does not parse SQL, so a
//! blocked keyword inside a string literal or comment is rejected as well.
//! Treat it as the minimum floor every candidate must clear before it is
//! handed to an executor.

use serde::Serialize;
use thiserror::Error;

pub const BLOCKED_KEYWORDS: &[&str] = &[
    "DELETE", "UPDATE", "INSERT", "DROP", "TRUNCATE", "ALTER", "GRANT", "REVOKE", "EXEC",
    "EXECUTE", "CREATE", "MERGE", "COMMIT", "ROLLBACK",
];

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SqlRejection {
    #[error("not a read query")]
    NotAReadQuery,
    #[error("blocked keyword `{keyword}`")]
    BlockedKeyword { keyword: String },
    #[error("more than one statement")]
    MultipleStatements,
}

impl SqlRejection {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NotAReadQuery => "not_a_read_query",
            Self::BlockedKeyword { .. } => "blocked_keyword",
            Self::MultipleStatements => "multiple_statements",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::NotAReadQuery => {
                "I can only run read queries. Try asking for sales or inventory information."
                    .to_string()
            }
            Self::BlockedKeyword { keyword } => format!(
                "The generated query was blocked because it contains `{keyword}`. Only read-only queries are allowed."
            ),
            Self::MultipleStatements => {
                "The generated query had more than one statement and was not run.".to_string()
            }
        }
    }
}

/// Validates a single candidate statement.
pub fn validate(sql: &str) -> Result<(), SqlRejection> {
    let statement = sql.trim().to_uppercase();
    let tokens = word_tokens(&statement);

    if tokens.first().copied() != Some("SELECT") {
        return Err(SqlRejection::NotAReadQuery);
    }

    if let Some(keyword) = tokens.iter().find(|token| BLOCKED_KEYWORDS.contains(token)) {
        return Err(SqlRejection::BlockedKeyword { keyword: (*keyword).to_string() });
    }

    let body = statement.trim_end_matches(|ch: char| ch == ';' || ch.is_whitespace());
    if body.contains(';') {
        return Err(SqlRejection::MultipleStatements);
    }

    Ok(())
}

/// Identifier-like runs of the statement. `_` is part of a word so
/// `D_E_L_E_T_` or `UPDATED_AT` never match a blocked keyword.
pub fn word_tokens(statement: &str) -> Vec<&str> {
    statement
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
        .filter(|token| !token.is_empty())
        .collect()
}
