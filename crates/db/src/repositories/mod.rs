use async_trait::async_trait;
use thiserror::Error;

use askerp_core::domain::result::ResultSet;
use askerp_core::domain::schema::FieldSpec;
use askerp_core::errors::ExecutionError;

pub mod dictionary;
pub mod executor;
pub mod memory;

pub use dictionary::SqlDataDictionary;
pub use executor::SqlQueryExecutor;
pub use memory::{InMemoryDataDictionary, ScriptedQueryExecutor};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
}

/// Reads field metadata for one logical table from the ERP data dictionary.
#[async_trait]
pub trait DataDictionary: Send + Sync {
    /// Active fields of `logical_table` in dictionary order. An unknown table
    /// yields an empty list, not an error.
    async fn fetch_fields(&self, logical_table: &str) -> Result<Vec<FieldSpec>, RepositoryError>;
}

/// Runs a statement that already passed the SQL guard.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<ResultSet, ExecutionError>;
}
