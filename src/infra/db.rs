// Helpers shared by the SQLite-backed stores.

use crate::core::storage::StorageError;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

/// Open a connection pool, creating the database file (and its parent
/// directories) when it does not exist yet.
pub async fn connect(database_url: &str) -> Result<SqlitePool, StorageError> {
    // Both `sqlite://path` and `sqlite:path` are accepted
    let path_str = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
        if let Some(parent) = Path::new(path_str).parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::File::create(path_str)?;
    }

    let conn_str = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite://{}", database_url)
    };

    // An in-memory database exists per connection, so the pool must not
    // fan out across several of them.
    let max_connections = if conn_str.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&conn_str)
        .await?;
    Ok(pool)
}

/// Additive schema migration: add a column to an existing table, tolerating
/// databases that already have it.
pub async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column_ddl: &str,
) -> Result<(), StorageError> {
    let result = sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {}", table, column_ddl))
        .execute(pool)
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) if err.to_string().contains("duplicate column name") => Ok(()),
        Err(err) => Err(err.into()),
    }
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> Result<i64, StorageError> {
    let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn connect_creates_the_file_for_single_colon_urls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("economy.db");

        let pool = connect(&format!("sqlite:{}", path.display())).await.unwrap();
        assert!(path.exists());
        pool.close().await;
    }

    #[tokio::test]
    async fn connect_creates_the_file_for_double_slash_urls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("economy.db");

        let pool = connect(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        assert!(path.exists());
        pool.close().await;
    }
}
