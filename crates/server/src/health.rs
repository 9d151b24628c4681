use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use askerp_db::repositories::dictionary::table_exists;
use askerp_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub dictionary_table: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub dictionary: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let dictionary = if database.status == "ready" {
        dictionary_check(&state.db_pool, &state.dictionary_table).await
    } else {
        HealthCheck { status: "degraded", detail: "database is unreachable".to_string() }
    };
    let ready = database.status == "ready" && dictionary.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "askerp-server runtime initialized".to_string(),
        },
        database,
        dictionary,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn dictionary_check(pool: &DbPool, table: &str) -> HealthCheck {
    match table_exists(pool, table).await {
        Ok(true) => HealthCheck { status: "ready", detail: format!("`{table}` is present") },
        Ok(false) => HealthCheck { status: "degraded", detail: format!("`{table}` not found") },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("dictionary lookup failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use askerp_db::{connect_with_settings, DemoDataset};
    use chrono::NaiveDate;

    use crate::health::{health, HealthState};

    fn state(pool: askerp_db::DbPool) -> State<HealthState> {
        State(HealthState { db_pool: pool, dictionary_table: "SX3010".to_string() })
    }

    #[tokio::test]
    async fn health_returns_ready_when_dictionary_is_present() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        DemoDataset::load(&pool, NaiveDate::from_ymd_opt(2026, 3, 10).expect("date"))
            .await
            .expect("seed");

        let (status, Json(payload)) = health(state(pool.clone())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.dictionary.status, "ready");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_is_degraded_without_dictionary_table() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let (status, Json(payload)) = health(state(pool.clone())).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.dictionary.status, "degraded");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(state(pool)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
