use chrono::{Duration, NaiveDate};
use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Tables the demo dataset creates, with the active (non soft-deleted) row
/// count each must hold after loading.
const DEMO_TABLES: &[(&str, i64)] =
    &[("SX3010", 25), ("SA1010", 3), ("SB1010", 3), ("SC5010", 6), ("SC6010", 7)];

/// Small Protheus company `01` used by tests and `askerp seed`: a data
/// dictionary for SA1, SB1, SC5 and SC6, customers, products and sales
/// orders dated relative to `today`, plus soft-deleted and branch `02` rows
/// that correct queries must filter out.
pub struct DemoDataset;

impl DemoDataset {
    pub const SQL: &str = include_str!("../fixtures/protheus_demo.sql");

    pub fn render_sql(today: NaiveDate) -> String {
        let yesterday = today - Duration::days(1);
        let last_month = today - Duration::days(30);

        Self::SQL
            .replace("{{TODAY}}", &protheus_date(today))
            .replace("{{YESTERDAY}}", &protheus_date(yesterday))
            .replace("{{LAST_MONTH}}", &protheus_date(last_month))
    }

    /// Recreates the demo tables. Loading twice leaves the same data.
    pub async fn load(pool: &DbPool, today: NaiveDate) -> Result<SeedResult, RepositoryError> {
        let sql = Self::render_sql(today);
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(&sql)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            tables: DEMO_TABLES.iter().map(|(table, _)| *table).collect(),
            reference_date: protheus_date(today),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for (table, expected) in DEMO_TABLES {
            let present: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(pool)
            .await?;

            let ok = if present == 0 {
                false
            } else {
                let active: i64 = sqlx::query_scalar(&format!(
                    "SELECT COUNT(1) FROM {table} WHERE D_E_L_E_T_ = ' '"
                ))
                .fetch_one(pool)
                .await?;
                active == *expected
            };
            checks.push((*table, ok));
        }

        Ok(VerificationResult { all_present: checks.iter().all(|(_, ok)| *ok), checks })
    }
}

/// Protheus stores dates as `YYYYMMDD` text.
pub fn protheus_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

#[derive(Debug)]
pub struct SeedResult {
    pub tables: Vec<&'static str>,
    pub reference_date: String,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
