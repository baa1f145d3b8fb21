// SQLite implementation of the BalanceBackend trait.

use crate::core::balance::{BalanceBackend, PlayerAccount};
use crate::core::storage::{MigrationReport, StorageError};
use crate::infra::db;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

pub struct SqliteBalanceStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteBalanceStore {
    pub async fn connect(database_url: &str, table_prefix: &str) -> Result<Self, StorageError> {
        let pool = db::connect(database_url).await?;
        let store = Self {
            pool,
            table: format!("{}balances", table_prefix),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                uuid TEXT PRIMARY KEY,
                nick TEXT,
                balance REAL NOT NULL DEFAULT 0
            )
            "#,
            self.table
        ))
        .execute(&self.pool)
        .await?;

        // The secondary currency arrived after the first schema version
        db::add_column_if_missing(&self.pool, &self.table, "cash INTEGER NOT NULL DEFAULT 0")
            .await?;

        Ok(())
    }

    /// One-time snapshot import, only when the table holds no rows at all.
    /// Bad records are logged and skipped rather than aborting the batch.
    pub async fn migrate_if_empty(
        &self,
        snapshot: &[PlayerAccount],
    ) -> Result<Option<MigrationReport>, StorageError> {
        if db::count_rows(&self.pool, &self.table).await? > 0 {
            return Ok(None);
        }

        let mut report = MigrationReport::default();
        for account in snapshot {
            match self.upsert(account).await {
                Ok(()) => report.record_ok(),
                Err(err) => {
                    tracing::warn!(uuid = %account.uuid, "skipping account during migration: {err}");
                    report.record_failure();
                }
            }
        }
        Ok(Some(report))
    }
}

#[async_trait]
impl BalanceBackend for SqliteBalanceStore {
    async fn load(&self) -> Result<Vec<PlayerAccount>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT uuid, nick, balance, cash FROM {}",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PlayerAccount {
                uuid: row.get("uuid"),
                nick: row.get("nick"),
                balance: row.get("balance"),
                cash: row.get("cash"),
            })
            .collect())
    }

    /// Write-through: the row is current as soon as the call returns.
    async fn upsert(&self, account: &PlayerAccount) -> Result<(), StorageError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (uuid, nick, balance, cash)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(uuid) DO UPDATE SET
                nick = excluded.nick,
                balance = excluded.balance,
                cash = excluded.cash
            "#,
            self.table
        ))
        .bind(&account.uuid)
        .bind(&account.nick)
        .bind(account.balance)
        .bind(account.cash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Writes already happened on upsert
    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
