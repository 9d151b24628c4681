use std::time::Duration;

use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use tracing::warn;

use askerp_core::domain::result::{CellValue, ResultSet};
use askerp_core::errors::ExecutionError;

use super::QueryExecutor;
use crate::DbPool;

pub struct SqlQueryExecutor {
    pool: DbPool,
    timeout: Duration,
}

impl SqlQueryExecutor {
    pub fn new(pool: DbPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Column names from the prepared statement, for results without rows.
    async fn describe_columns(&self, sql: &str) -> Vec<String> {
        match (&self.pool).describe(sql).await {
            Ok(describe) => {
                describe.columns().iter().map(|column| column.name().to_string()).collect()
            }
            Err(error) => {
                warn!(
                    event_name = "db.query.describe_failed",
                    error = %error,
                    "could not describe statement"
                );
                Vec::new()
            }
        }
    }
}

fn decode_cell(row: &SqliteRow, index: usize) -> Result<CellValue, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(CellValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    match type_name.as_str() {
        "INTEGER" => row.try_get::<i64, _>(index).map(CellValue::Integer),
        "REAL" => row.try_get::<f64, _>(index).map(CellValue::Float),
        "TEXT" => row.try_get::<String, _>(index).map(CellValue::Text),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|bytes| CellValue::Text(String::from_utf8_lossy(&bytes).into_owned())),
        _ => row
            .try_get::<i64, _>(index)
            .map(CellValue::Integer)
            .or_else(|_| row.try_get::<f64, _>(index).map(CellValue::Float))
            .or_else(|_| row.try_get::<String, _>(index).map(CellValue::Text)),
    }
}

fn decode_rows(rows: &[SqliteRow]) -> Result<ResultSet, sqlx::Error> {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|column| column.name().to_string()).collect())
        .unwrap_or_default();

    let decoded = rows
        .iter()
        .map(|row| (0..row.len()).map(|index| decode_cell(row, index)).collect())
        .collect::<Result<Vec<Vec<CellValue>>, _>>()?;

    Ok(ResultSet::new(columns, decoded))
}

#[async_trait::async_trait]
impl QueryExecutor for SqlQueryExecutor {
    async fn execute(&self, sql: &str) -> Result<ResultSet, ExecutionError> {
        let fetched = tokio::time::timeout(self.timeout, sqlx::query(sql).fetch_all(&self.pool))
            .await
            .map_err(|_| {
                warn!(
                    event_name = "db.query.timeout",
                    timeout_secs = self.timeout.as_secs(),
                    "query exceeded execution timeout"
                );
                ExecutionError::new(format!(
                    "statement timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?;

        let rows = fetched.map_err(|error| {
            warn!(event_name = "db.query.failed", error = %error, "query execution failed");
            ExecutionError::new(error.to_string())
        })?;

        let mut result = decode_rows(&rows).map_err(|error| {
            warn!(event_name = "db.query.decode_failed", error = %error, "row decoding failed");
            ExecutionError::new(error.to_string())
        })?;
        if rows.is_empty() {
            result.columns = self.describe_columns(sql).await;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;

    use askerp_core::domain::result::CellValue;

    use super::SqlQueryExecutor;
    use crate::fixtures::DemoDataset;
    use crate::repositories::QueryExecutor;
    use crate::{connect_with_settings, DbPool};

    async fn seeded_pool(today: NaiveDate) -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        DemoDataset::load(&pool, today).await.expect("seed");
        pool
    }

    #[tokio::test]
    async fn counts_todays_active_orders_for_branch() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).expect("date");
        let executor = SqlQueryExecutor::new(seeded_pool(today).await, Duration::from_secs(5));

        let result = executor
            .execute(
                "SELECT COUNT(*) AS QTD_PEDIDOS FROM SC5010 \
                 WHERE C5_EMISSAO = '20260310' AND C5_FILIAL = '01' AND D_E_L_E_T_ = ' '",
            )
            .await
            .expect("execute");

        assert_eq!(result.columns, vec!["QTD_PEDIDOS".to_string()]);
        assert_eq!(result.scalar().map(|(_, value)| value.clone()), Some(CellValue::Integer(3)));
    }

    #[tokio::test]
    async fn decodes_text_real_and_null_cells() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).expect("date");
        let executor = SqlQueryExecutor::new(seeded_pool(today).await, Duration::from_secs(5));

        let result = executor
            .execute(
                "SELECT B1_COD, B1_PRV1, NULL AS NADA FROM SB1010 \
                 WHERE B1_FILIAL = '' AND D_E_L_E_T_ = ' ' ORDER BY B1_COD",
            )
            .await
            .expect("execute");

        assert_eq!(result.row_count(), 3);
        assert_eq!(result.columns, vec!["B1_COD", "B1_PRV1", "NADA"]);
        assert_eq!(result.rows[0][0].to_string(), "PA0001");
        assert_eq!(result.rows[0][1], CellValue::Float(18.9));
        assert_eq!(result.rows[0][2], CellValue::Null);
    }

    #[tokio::test]
    async fn empty_result_keeps_column_names() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).expect("date");
        let executor = SqlQueryExecutor::new(seeded_pool(today).await, Duration::from_secs(5));

        let result = executor
            .execute(
                "SELECT C5_NUM, C5_CLIENTE FROM SC5010 WHERE C5_NUM = 'NOPE' AND D_E_L_E_T_ = ' '",
            )
            .await
            .expect("execute");

        assert!(result.is_empty());
        assert_eq!(result.columns, vec!["C5_NUM", "C5_CLIENTE"]);
    }

    #[tokio::test]
    async fn database_errors_are_opaque() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).expect("date");
        let executor = SqlQueryExecutor::new(seeded_pool(today).await, Duration::from_secs(5));

        let error = executor
            .execute("SELECT C5_BOGUS FROM SC5010")
            .await
            .expect_err("unknown column should fail");

        assert_eq!(error.to_string(), "query execution failed");
        assert!(error.cause().contains("C5_BOGUS"));
    }
}
