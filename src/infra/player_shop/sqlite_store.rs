// SQLite implementation of the PlayerShopBackend trait.
//
// Shops and listings live in separate tables keyed by owner uuid; tabs are
// stored as a JSON array string on the shop row.

use crate::core::player_shop::{PlayerShop, PlayerShopBackend, PlayerShopListing, PlayerShopTracker};
use crate::core::storage::{MigrationReport, StorageError};
use crate::infra::db;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

pub struct SqlitePlayerShopStore {
    pool: SqlitePool,
    shops_table: String,
    items_table: String,
}

impl SqlitePlayerShopStore {
    pub async fn connect(database_url: &str, table_prefix: &str) -> Result<Self, StorageError> {
        let pool = db::connect(database_url).await?;
        let store = Self {
            pool,
            shops_table: format!("{}player_shops", table_prefix),
            items_table: format!("{}player_shop_items", table_prefix),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                uuid TEXT PRIMARY KEY,
                nick TEXT NOT NULL,
                custom_name TEXT,
                is_open INTEGER NOT NULL DEFAULT 0,
                tabs TEXT NOT NULL DEFAULT '[]'
            )
            "#,
            t = self.shops_table
        ))
        .execute(&self.pool)
        .await?;

        // Shop icons arrived after the first schema shipped
        db::add_column_if_missing(&self.pool, &self.shops_table, "icon TEXT").await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                unique_id INTEGER NOT NULL UNIQUE,
                item_id TEXT NOT NULL,
                price_buy REAL NOT NULL DEFAULT 0,
                price_sell REAL NOT NULL DEFAULT 0,
                durability INTEGER NOT NULL DEFAULT 0,
                max_durability INTEGER NOT NULL DEFAULT 0,
                stock INTEGER NOT NULL DEFAULT 0,
                tab TEXT NOT NULL DEFAULT ''
            )
            "#,
            t = self.items_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_owner ON {t}(owner)",
            t = self.items_table
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// One-time snapshot import, only when both tables are completely empty.
    /// Bad records are logged and skipped.
    pub async fn migrate_if_empty(
        &self,
        snapshot: &PlayerShopTracker,
    ) -> Result<Option<MigrationReport>, StorageError> {
        let existing = db::count_rows(&self.pool, &self.shops_table).await?
            + db::count_rows(&self.pool, &self.items_table).await?;
        if existing > 0 {
            return Ok(None);
        }

        let mut report = MigrationReport::default();
        for shop in &snapshot.shops {
            match self.upsert_shop(shop).await {
                Ok(()) => report.record_ok(),
                Err(err) => {
                    tracing::warn!(
                        owner = %shop.uuid,
                        "skipping shop during migration: {err}"
                    );
                    report.record_failure();
                    continue;
                }
            }
            for listing in &shop.items {
                match self.upsert_item(&shop.uuid, listing).await {
                    Ok(()) => report.record_ok(),
                    Err(err) => {
                        tracing::warn!(
                            owner = %shop.uuid,
                            unique_id = listing.unique_id,
                            "skipping listing during migration: {err}"
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
impl PlayerShopBackend for SqlitePlayerShopStore {
    async fn load(&self) -> Result<PlayerShopTracker, StorageError> {
        let shop_rows = sqlx::query(&format!(
            "SELECT uuid, nick, custom_name, icon, is_open, tabs FROM {}",
            self.shops_table
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut shops: Vec<PlayerShop> = shop_rows
            .iter()
            .map(|row| {
                let tabs_json: String = row.get("tabs");
                PlayerShop {
                    uuid: row.get("uuid"),
                    nick: row.get("nick"),
                    custom_name: row.get("custom_name"),
                    icon: row.get("icon"),
                    is_open: row.get("is_open"),
                    tabs: serde_json::from_str(&tabs_json).unwrap_or_default(),
                    items: Vec::new(),
                }
            })
            .collect();

        let item_rows = sqlx::query(&format!(
            r#"
            SELECT owner, unique_id, item_id, price_buy, price_sell,
                   durability, max_durability, stock, tab
            FROM {}
            "#,
            self.items_table
        ))
        .fetch_all(&self.pool)
        .await?;

        for row in &item_rows {
            let owner: String = row.get("owner");
            let stock = row.get::<i64, _>("stock") as u32;
            let listing = PlayerShopListing {
                unique_id: row.get::<i64, _>("unique_id") as u64,
                item_id: row.get("item_id"),
                quantity: stock,
                price_buy: row.get("price_buy"),
                price_sell: row.get("price_sell"),
                durability: row.get::<i64, _>("durability") as i32,
                max_durability: row.get::<i64, _>("max_durability") as i32,
                stock,
                tab: row.get("tab"),
            };
            if let Some(shop) = shops.iter_mut().find(|s| s.uuid == owner) {
                shop.items.push(listing);
            }
        }

        // The id counter is derived from the loaded listings by the manager
        Ok(PlayerShopTracker {
            next_unique_id: 0,
            shops,
        })
    }

    async fn upsert_shop(&self, shop: &PlayerShop) -> Result<(), StorageError> {
        let tabs_json = serde_json::to_string(&shop.tabs)?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (uuid, nick, custom_name, icon, is_open, tabs)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(uuid) DO UPDATE SET
                nick = excluded.nick,
                custom_name = excluded.custom_name,
                icon = excluded.icon,
                is_open = excluded.is_open,
                tabs = excluded.tabs
            "#,
            self.shops_table
        ))
        .bind(&shop.uuid)
        .bind(&shop.nick)
        .bind(&shop.custom_name)
        .bind(&shop.icon)
        .bind(shop.is_open)
        .bind(tabs_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_item(
        &self,
        owner: &str,
        listing: &PlayerShopListing,
    ) -> Result<(), StorageError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (
                owner, unique_id, item_id, price_buy, price_sell,
                durability, max_durability, stock, tab
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(unique_id) DO UPDATE SET
                owner = excluded.owner,
                item_id = excluded.item_id,
                price_buy = excluded.price_buy,
                price_sell = excluded.price_sell,
                durability = excluded.durability,
                max_durability = excluded.max_durability,
                stock = excluded.stock,
                tab = excluded.tab
            "#,
            self.items_table
        ))
        .bind(owner)
        .bind(listing.unique_id as i64)
        .bind(&listing.item_id)
        .bind(listing.price_buy)
        .bind(listing.price_sell)
        .bind(listing.durability as i64)
        .bind(listing.max_durability as i64)
        .bind(listing.stock as i64)
        .bind(&listing.tab)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_item(&self, _owner: &str, unique_id: u64) -> Result<(), StorageError> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE unique_id = ?",
            self.items_table
        ))
        .bind(unique_id as i64)
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
