//! Process-wide dictionary snapshot with a TTL.
//!
//! Readers clone an `Arc` of the last complete snapshot. A refresh builds the
//! replacement off to the side and swaps it in under the write lock, so no
//! reader ever sees a half-built dictionary. Refreshes are single-flight:
//! callers that arrive while one is running wait and reuse its result.

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use askerp_core::clock::Clock;
use askerp_core::domain::schema::{SchemaEntry, SchemaSnapshot};
use askerp_core::errors::PipelineError;
use askerp_db::repositories::{DataDictionary, RepositoryError};

pub struct SchemaCache {
    dictionary: Arc<dyn DataDictionary>,
    tables: Vec<String>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    current: RwLock<Option<Arc<SchemaSnapshot>>>,
    refresh: Mutex<()>,
}

impl SchemaCache {
    pub fn new(
        dictionary: Arc<dyn DataDictionary>,
        tables: Vec<String>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tables = tables.into_iter().map(|table| table.trim().to_ascii_uppercase()).collect();
        Self {
            dictionary,
            tables,
            ttl,
            clock,
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Snapshot for the configured tables, fetching only on first use or
    /// after the TTL has elapsed.
    pub async fn get_schema(&self) -> Result<Arc<SchemaSnapshot>, PipelineError> {
        if let Some(snapshot) = self.fresh_snapshot().await {
            return Ok(snapshot);
        }

        let _refresh = self.refresh.lock().await;
        if let Some(snapshot) = self.fresh_snapshot().await {
            return Ok(snapshot);
        }

        match self.build_snapshot().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.current.write().await = Some(Arc::clone(&snapshot));
                info!(
                    event_name = "schema.cache.refreshed",
                    tables = snapshot.len(),
                    missing = ?snapshot.missing_tables(),
                    "schema snapshot refreshed"
                );
                Ok(snapshot)
            }
            Err(error) => {
                let stale = self.current.read().await.clone();
                match stale {
                    Some(snapshot) => {
                        warn!(
                            event_name = "schema.cache.refresh_failed",
                            error = %error,
                            "dictionary refresh failed; serving previous snapshot"
                        );
                        Ok(snapshot)
                    }
                    None => {
                        warn!(
                            event_name = "schema.cache.unavailable",
                            error = %error,
                            "dictionary fetch failed with no snapshot to fall back on"
                        );
                        Err(PipelineError::Schema(error.to_string()))
                    }
                }
            }
        }
    }

    /// Last snapshot, fresh or not, without touching the dictionary.
    pub async fn peek(&self) -> Option<Arc<SchemaSnapshot>> {
        self.current.read().await.clone()
    }

    async fn fresh_snapshot(&self) -> Option<Arc<SchemaSnapshot>> {
        let current = self.current.read().await;
        current
            .as_ref()
            .filter(|snapshot| !snapshot.is_expired(self.clock.now(), self.ttl))
            .map(Arc::clone)
    }

    async fn build_snapshot(&self) -> Result<SchemaSnapshot, RepositoryError> {
        let mut entries = Vec::with_capacity(self.tables.len());
        let mut missing = Vec::new();

        for table in &self.tables {
            let fields = self.dictionary.fetch_fields(table).await?;
            if fields.is_empty() {
                warn!(
                    event_name = "schema.table.missing",
                    table = %table,
                    "data dictionary returned no fields"
                );
                missing.push(table.clone());
            } else {
                entries.push(SchemaEntry::new(table.clone(), fields));
            }
        }

        Ok(SchemaSnapshot::new(entries, missing, self.clock.now()))
    }
}
