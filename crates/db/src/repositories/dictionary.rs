use sqlx::Row;

use askerp_core::config::is_plain_identifier;
use askerp_core::domain::schema::FieldSpec;

use super::{DataDictionary, RepositoryError};
use crate::DbPool;

pub struct SqlDataDictionary {
    pool: DbPool,
    dictionary_table: String,
}

impl SqlDataDictionary {
    /// `dictionary_table` is interpolated into the statement, so it must be a
    /// plain identifier such as `SX3010`.
    pub fn new(pool: DbPool, dictionary_table: impl Into<String>) -> Result<Self, RepositoryError> {
        let dictionary_table = dictionary_table.into();
        if !is_plain_identifier(&dictionary_table) {
            return Err(RepositoryError::InvalidIdentifier(dictionary_table));
        }
        Ok(Self { pool, dictionary_table })
    }

    pub fn dictionary_table(&self) -> &str {
        &self.dictionary_table
    }

    /// Whether the dictionary table exists in the connected database.
    pub async fn is_available(&self) -> Result<bool, RepositoryError> {
        table_exists(&self.pool, &self.dictionary_table).await
    }
}

pub async fn table_exists(pool: &DbPool, table: &str) -> Result<bool, RepositoryError> {
    let found: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(table)
    .fetch_one(pool)
    .await?;
    Ok(found > 0)
}

fn row_to_field(row: &sqlx::sqlite::SqliteRow) -> Result<FieldSpec, RepositoryError> {
    let field_code: String =
        row.try_get("X3_CAMPO").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let type_code: String =
        row.try_get("X3_TIPO").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let length: i64 =
        row.try_get("X3_TAMANHO").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decimals: i64 =
        row.try_get("X3_DECIMAL").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let title: String =
        row.try_get("X3_TITULO").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let description: String =
        row.try_get("X3_DESCRIC").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(FieldSpec {
        field_code: field_code.trim().to_string(),
        type_code: type_code.trim().to_string(),
        length: u32::try_from(length)
            .map_err(|_| RepositoryError::Decode(format!("negative X3_TAMANHO {length}")))?,
        decimals: u32::try_from(decimals)
            .map_err(|_| RepositoryError::Decode(format!("negative X3_DECIMAL {decimals}")))?,
        title: title.trim().to_string(),
        description: description.trim().to_string(),
    })
}

#[async_trait::async_trait]
impl DataDictionary for SqlDataDictionary {
    async fn fetch_fields(&self, logical_table: &str) -> Result<Vec<FieldSpec>, RepositoryError> {
        let statement = format!(
            "SELECT X3_CAMPO, X3_TIPO, X3_TAMANHO, X3_DECIMAL, X3_TITULO, X3_DESCRIC
             FROM {} WHERE X3_ARQUIVO = ? AND D_E_L_E_T_ = ' ' ORDER BY X3_ORDEM",
            self.dictionary_table
        );

        let rows = sqlx::query(&statement)
            .bind(logical_table.trim().to_ascii_uppercase())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_field).collect()
    }
}
