// SQLite implementation of the ShopBackend trait.
//
// All namespaces share one items table and one tabs table, partitioned by an
// indexed namespace column.

use crate::core::shop::{ShopBackend, ShopListing, ShopTracker};
use crate::core::storage::{MigrationReport, StorageError};
use crate::infra::db;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

pub struct SqliteShopStore {
    pool: SqlitePool,
    items_table: String,
    tabs_table: String,
}

impl SqliteShopStore {
    pub async fn connect(database_url: &str, table_prefix: &str) -> Result<Self, StorageError> {
        let pool = db::connect(database_url).await?;
        let store = Self {
            pool,
            items_table: format!("{}shop_items", table_prefix),
            tabs_table: format!("{}shop_tabs", table_prefix),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace INTEGER NOT NULL,
                unique_id INTEGER NOT NULL,
                item_id TEXT NOT NULL,
                quantity INTEGER NOT NULL DEFAULT 1,
                price_sell REAL NOT NULL DEFAULT 0,
                price_buy REAL NOT NULL DEFAULT 0,
                tab TEXT NOT NULL DEFAULT '',
                is_console_command INTEGER NOT NULL DEFAULT 0,
                console_command TEXT NOT NULL DEFAULT '',
                UNIQUE (namespace, unique_id)
            )
            "#,
            t = self.items_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_namespace ON {t}(namespace)",
            t = self.items_table
        ))
        .execute(&self.pool)
        .await?;

        // Console-command listings grew display fields in a later version
        db::add_column_if_missing(
            &self.pool,
            &self.items_table,
            "display_name TEXT NOT NULL DEFAULT ''",
        )
        .await?;
        db::add_column_if_missing(
            &self.pool,
            &self.items_table,
            "use_cash INTEGER NOT NULL DEFAULT 0",
        )
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace INTEGER NOT NULL,
                tab TEXT NOT NULL,
                UNIQUE (namespace, tab)
            )
            "#,
            t = self.tabs_table
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// One-time snapshot import across every namespace, only when both
    /// tables are completely empty. Bad records are logged and skipped.
    pub async fn migrate_if_empty(
        &self,
        snapshots: &[(u32, ShopTracker)],
    ) -> Result<Option<MigrationReport>, StorageError> {
        let existing = db::count_rows(&self.pool, &self.items_table).await?
            + db::count_rows(&self.pool, &self.tabs_table).await?;
        if existing > 0 {
            return Ok(None);
        }

        let mut report = MigrationReport::default();
        for (namespace, tracker) in snapshots {
            for listing in &tracker.items {
                match self.upsert_item(*namespace, listing).await {
                    Ok(()) => report.record_ok(),
                    Err(err) => {
                        tracing::warn!(
                            namespace = *namespace,
                            unique_id = listing.unique_id,
                            "skipping listing during migration: {err}"
                        );
                        report.record_failure();
                    }
                }
            }
            for tab in &tracker.tabs {
                match self.insert_tab(*namespace, tab).await {
                    Ok(()) => report.record_ok(),
                    Err(err) => {
                        tracing::warn!(
                            namespace = *namespace,
                            tab = %tab,
                            "skipping tab during migration: {err}"
                        );
                        report.record_failure();
                    }
                }
            }
        }
        Ok(Some(report))
    }
}

#[async_trait]
impl ShopBackend for SqliteShopStore {
    async fn load_namespace(&self, namespace: u32) -> Result<ShopTracker, StorageError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT unique_id, item_id, quantity, price_sell, price_buy, tab,
                   is_console_command, console_command, display_name, use_cash
            FROM {} WHERE namespace = ?
            "#,
            self.items_table
        ))
        .bind(namespace as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(|row| ShopListing {
                unique_id: row.get::<i64, _>("unique_id") as u32,
                item_id: row.get("item_id"),
                quantity: row.get::<i64, _>("quantity") as u32,
                price_sell: row.get("price_sell"),
                price_buy: row.get("price_buy"),
                tab: row.get("tab"),
                is_console_command: row.get("is_console_command"),
                console_command: row.get("console_command"),
                display_name: row.get("display_name"),
                use_cash: row.get("use_cash"),
            })
            .collect();

        let tab_rows = sqlx::query(&format!(
            "SELECT tab FROM {} WHERE namespace = ? ORDER BY id",
            self.tabs_table
        ))
        .bind(namespace as i64)
        .fetch_all(&self.pool)
        .await?;

        // The id counter is derived from the loaded items by the manager
        Ok(ShopTracker {
            next_unique_id: 0,
            items,
            tabs: tab_rows.iter().map(|row| row.get("tab")).collect(),
        })
    }

    async fn upsert_item(
        &self,
        namespace: u32,
        listing: &ShopListing,
    ) -> Result<(), StorageError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (
                namespace, unique_id, item_id, quantity, price_sell, price_buy,
                tab, is_console_command, console_command, display_name, use_cash
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(namespace, unique_id) DO UPDATE SET
                item_id = excluded.item_id,
                quantity = excluded.quantity,
                price_sell = excluded.price_sell,
                price_buy = excluded.price_buy,
                tab = excluded.tab,
                is_console_command = excluded.is_console_command,
                console_command = excluded.console_command,
                display_name = excluded.display_name,
                use_cash = excluded.use_cash
            "#,
            self.items_table
        ))
        .bind(namespace as i64)
        .bind(listing.unique_id as i64)
        .bind(&listing.item_id)
        .bind(listing.quantity as i64)
        .bind(listing.price_sell)
        .bind(listing.price_buy)
        .bind(&listing.tab)
        .bind(listing.is_console_command)
        .bind(&listing.console_command)
        .bind(&listing.display_name)
        .bind(listing.use_cash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_item(&self, namespace: u32, unique_id: u32) -> Result<(), StorageError> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE namespace = ? AND unique_id = ?",
            self.items_table
        ))
        .bind(namespace as i64)
        .bind(unique_id as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_tab(&self, namespace: u32, tab: &str) -> Result<(), StorageError> {
        sqlx::query(&format!(
            "INSERT INTO {} (namespace, tab) VALUES (?, ?) ON CONFLICT(namespace, tab) DO NOTHING",
            self.tabs_table
        ))
        .bind(namespace as i64)
        .bind(tab)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_tab(&self, namespace: u32, tab: &str) -> Result<(), StorageError> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE namespace = ? AND tab = ?",
            self.tabs_table
        ))
        .bind(namespace as i64)
        .bind(tab)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drops the namespace's partition in both tables.
    async fn clear_namespace(&self, namespace: u32) -> Result<(), StorageError> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE namespace = ?",
            self.items_table
        ))
        .bind(namespace as i64)
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "DELETE FROM {} WHERE namespace = ?",
            self.tabs_table
        ))
        .bind(namespace as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Writes already happened on upsert/delete
    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
