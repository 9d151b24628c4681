use std::sync::Arc;

use askerp_agent::llm::{HttpLlmClient, LlmClient, LlmError};
use askerp_agent::runtime::AgentRuntime;
use askerp_agent::sessions::SessionStore;
use askerp_core::config::{AppConfig, ConfigError};
use askerp_db::repositories::dictionary::table_exists;
use askerp_db::{connect_read_only, DbPool};
use axum::Router;
use thiserror::Error;
use tracing::{info, warn};

use crate::chat::{self, ChatState};
use crate::health::{self, HealthState};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub agent_runtime: Arc<AgentRuntime>,
    pub sessions: Arc<SessionStore>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("llm client setup failed: {0}")]
    Llm(#[from] LlmError),
    #[error("agent runtime setup failed: {0:#}")]
    Runtime(anyhow::Error),
}

impl Application {
    pub fn router(&self) -> Router {
        let health_state = HealthState {
            db_pool: self.db_pool.clone(),
            dictionary_table: self.config.schema.dictionary_table.clone(),
        };
        let chat_state = ChatState {
            runtime: Arc::clone(&self.agent_runtime),
            sessions: Arc::clone(&self.sessions),
        };
        health::router(health_state).merge(chat::router(chat_state))
    }
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let llm = HttpLlmClient::from_config(&config.llm)?;
    bootstrap_with_llm(config, Arc::new(llm)).await
}

pub async fn bootstrap_with_llm(
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        llm_model = %config.llm.model,
        "starting application bootstrap"
    );

    let db_pool = connect_read_only(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "read-only database pool established"
    );

    match table_exists(&db_pool, &config.schema.dictionary_table).await {
        Ok(true) => {}
        Ok(false) => warn!(
            event_name = "system.bootstrap.dictionary_missing",
            correlation_id = "bootstrap",
            dictionary_table = %config.schema.dictionary_table,
            "dictionary table not found; data questions will fail until it exists"
        ),
        Err(error) => warn!(
            event_name = "system.bootstrap.dictionary_probe_failed",
            correlation_id = "bootstrap",
            error = %error,
            "could not probe dictionary table"
        ),
    }

    let agent_runtime =
        AgentRuntime::from_config(&config, db_pool.clone(), llm).map_err(BootstrapError::Runtime)?;

    let sessions = Arc::new(SessionStore::with_capacity(config.pipeline.max_sessions));

    Ok(Application { config, db_pool, agent_runtime: Arc::new(agent_runtime), sessions })
}
