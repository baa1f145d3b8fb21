#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::balance::{BalanceBackend, BalanceLedger};
use crate::core::config::StorageConfig;
use crate::core::player_shop::{PlayerShopBackend, PlayerShopInventory};
use crate::core::shop::{ShopBackend, ShopInventory};
use crate::infra::balance::{JsonBalanceStore, SqliteBalanceStore};
use crate::infra::flush::{FlushScheduler, Flushable};
use crate::infra::player_shop::{JsonPlayerShopStore, SqlitePlayerShopStore};
use crate::infra::shop::{JsonShopStore, SqliteShopStore};
use std::sync::Arc;
use std::time::Duration;

/// Picks the balance backend. When the database is enabled and reachable, the
/// snapshot file is imported once into the empty table; if the database is
/// unreachable the ledger falls back to the snapshot backend.
async fn balance_backend(config: &StorageConfig) -> anyhow::Result<Box<dyn BalanceBackend>> {
    let json = JsonBalanceStore::open(config.balances_path())?;
    if !config.use_database {
        return Ok(Box::new(json));
    }

    match SqliteBalanceStore::connect(&config.database_url, &config.table_prefix).await {
        Ok(sqlite) => {
            let snapshot = json.load().await?;
            match sqlite.migrate_if_empty(&snapshot).await? {
                Some(report) => tracing::info!(
                    migrated = report.migrated,
                    failed = report.failed,
                    "imported balance snapshot into the database"
                ),
                None => tracing::debug!("balance table already populated, snapshot not imported"),
            }
            Ok(Box::new(sqlite))
        }
        Err(err) => {
            tracing::error!("balance database unavailable, using snapshot files: {err}");
            Ok(Box::new(json))
        }
    }
}

async fn shop_backend(config: &StorageConfig) -> anyhow::Result<Box<dyn ShopBackend>> {
    let json = JsonShopStore::open(&config.data_dir)?;
    if !config.use_database {
        return Ok(Box::new(json));
    }

    match SqliteShopStore::connect(&config.database_url, &config.table_prefix).await {
        Ok(sqlite) => {
            let snapshot = json.load_all_namespaces().await?;
            match sqlite.migrate_if_empty(&snapshot).await? {
                Some(report) => tracing::info!(
                    migrated = report.migrated,
                    failed = report.failed,
                    "imported shop snapshot into the database"
                ),
                None => tracing::debug!("shop tables already populated, snapshot not imported"),
            }
            Ok(Box::new(sqlite))
        }
        Err(err) => {
            tracing::error!("shop database unavailable, using snapshot files: {err}");
            Ok(Box::new(json))
        }
    }
}

async fn player_shop_backend(
    config: &StorageConfig,
) -> anyhow::Result<Box<dyn PlayerShopBackend>> {
    let json = JsonPlayerShopStore::open(config.player_shops_path())?;
    if !config.use_database {
        return Ok(Box::new(json));
    }

    match SqlitePlayerShopStore::connect(&config.database_url, &config.table_prefix).await {
        Ok(sqlite) => {
            let snapshot = json.load().await?;
            match sqlite.migrate_if_empty(&snapshot).await? {
                Some(report) => tracing::info!(
                    migrated = report.migrated,
                    failed = report.failed,
                    "imported player shop snapshot into the database"
                ),
                None => {
                    tracing::debug!("player shop tables already populated, snapshot not imported")
                }
            }
            Ok(Box::new(sqlite))
        }
        Err(err) => {
            tracing::error!("player shop database unavailable, using snapshot files: {err}");
            Ok(Box::new(json))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    dotenv::dotenv().ok();

    let config = StorageConfig::from_env();
    std::fs::create_dir_all(&config.data_dir)?;
    tracing::info!(
        use_database = config.use_database,
        data_dir = %config.data_dir.display(),
        "starting economy persistence core"
    );

    let balances = Arc::new(
        BalanceLedger::new(balance_backend(&config).await?, config.initial_balance).await?,
    );
    let shop = Arc::new(ShopInventory::new(shop_backend(&config).await?).await?);
    let player_shops =
        Arc::new(PlayerShopInventory::new(player_shop_backend(&config).await?).await?);

    let scheduler = FlushScheduler::start(
        vec![
            balances.clone() as Arc<dyn Flushable>,
            shop.clone(),
            player_shops.clone(),
        ],
        Duration::from_secs(config.flush_interval_secs),
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    // Stop the periodic task first so the final flush cannot race with it.
    scheduler.stop().await;
    balances.shutdown().await?;
    shop.shutdown().await?;
    player_shops.shutdown().await?;

    Ok(())
}
