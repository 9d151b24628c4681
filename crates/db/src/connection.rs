use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

/// Read-write pool; creates the database file when missing so `seed` can
/// bootstrap a fresh demo database.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
}

/// Pool used by the query executor. Every connection runs with
/// `query_only`, so a statement that slipped past the validator still
/// cannot write.
pub async fn connect_read_only(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?;

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA query_only = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
}

#[cfg(test)]
mod tests {
    use super::{connect_read_only, connect_with_settings};

    #[tokio::test]
    async fn in_memory_pool_answers_probe() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.expect("probe");
        assert_eq!(one, 1);
    }

    #[tokio::test]
    async fn read_only_pool_reads_but_rejects_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("erp.db").display());

        let writer = connect_with_settings(&url, 1, 5).await.expect("connect");
        sqlx::query("CREATE TABLE SA1010 (A1_COD TEXT)").execute(&writer).await.expect("create");
        sqlx::query("INSERT INTO SA1010 (A1_COD) VALUES ('000001')")
            .execute(&writer)
            .await
            .expect("seed");
        writer.close().await;

        let pool = connect_read_only(&url, 1, 5).await.expect("read-only connect");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM SA1010")
            .fetch_one(&pool)
            .await
            .expect("read");
        assert_eq!(count, 1);

        let insert =
            sqlx::query("INSERT INTO SA1010 (A1_COD) VALUES ('000002')").execute(&pool).await;
        assert!(insert.is_err());
        let drop_table = sqlx::query("DROP TABLE SA1010").execute(&pool).await;
        assert!(drop_table.is_err());

        pool.close().await;
    }

    #[tokio::test]
    async fn read_only_pool_does_not_create_missing_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.db");

        let result = connect_read_only(&format!("sqlite://{}", path.display()), 1, 5).await;

        assert!(result.is_err());
        assert!(!path.exists());
    }
}
