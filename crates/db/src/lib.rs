pub mod connection;
pub mod fixtures;
pub mod repositories;

pub use connection::{connect_read_only, connect_with_settings, DbPool};
pub use fixtures::{DemoDataset, SeedResult, VerificationResult};
pub use repositories::{
    DataDictionary, InMemoryDataDictionary, QueryExecutor, RepositoryError, ScriptedQueryExecutor,
    SqlDataDictionary, SqlQueryExecutor,
};
