use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, RwLock};

use askerp_core::domain::result::ResultSet;
use askerp_core::domain::schema::FieldSpec;
use askerp_core::errors::ExecutionError;

use super::{DataDictionary, QueryExecutor, RepositoryError};

/// Dictionary double that counts fetches, used to observe cache behaviour.
#[derive(Default)]
pub struct InMemoryDataDictionary {
    tables: RwLock<HashMap<String, Vec<FieldSpec>>>,
    fetches: AtomicUsize,
    unavailable: bool,
}

impl InMemoryDataDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch fails, as when the dictionary database is unreachable.
    pub fn unavailable() -> Self {
        Self { unavailable: true, ..Self::default() }
    }

    pub fn with_table(mut self, logical_table: &str, fields: Vec<FieldSpec>) -> Self {
        self.tables.get_mut().insert(logical_table.to_ascii_uppercase(), fields);
        self
    }

    pub async fn replace_table(&self, logical_table: &str, fields: Vec<FieldSpec>) {
        self.tables.write().await.insert(logical_table.to_ascii_uppercase(), fields);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DataDictionary for InMemoryDataDictionary {
    async fn fetch_fields(&self, logical_table: &str) -> Result<Vec<FieldSpec>, RepositoryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(RepositoryError::Decode("dictionary is unavailable".to_string()));
        }
        let tables = self.tables.read().await;
        Ok(tables.get(&logical_table.to_ascii_uppercase()).cloned().unwrap_or_default())
    }
}

/// Executor double that replays queued results in order and records every
/// statement it receives. An exhausted queue answers with an empty result.
#[derive(Default)]
pub struct ScriptedQueryExecutor {
    responses: Mutex<VecDeque<Result<ResultSet, ExecutionError>>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedQueryExecutor {
    pub fn new(responses: Vec<Result<ResultSet, ExecutionError>>) -> Self {
        Self { responses: Mutex::new(responses.into()), executed: Mutex::new(Vec::new()) }
    }

    pub async fn executed(&self) -> Vec<String> {
        self.executed.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl QueryExecutor for ScriptedQueryExecutor {
    async fn execute(&self, sql: &str) -> Result<ResultSet, ExecutionError> {
        self.executed.lock().await.push(sql.to_string());
        self.responses.lock().await.pop_front().unwrap_or_else(|| Ok(ResultSet::default()))
    }
}
