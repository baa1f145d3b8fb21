// Configuration surface for the persistence core.
//
// Values come from environment variables (a .env file is loaded by main).
// Everything has a sensible default so the core runs out of the box on the
// snapshot backend.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// When true, each ledger tries the relational backend first and falls
    /// back to the snapshot backend if the database is unreachable.
    pub use_database: bool,
    pub database_url: String,
    pub table_prefix: String,
    /// Directory holding the flat-file snapshots.
    pub data_dir: PathBuf,
    /// Starting balance for accounts created on first reference.
    pub initial_balance: f64,
    /// Interval of the background snapshot flush task, in seconds.
    pub flush_interval_secs: u64,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            use_database: std::env::var("ECONOMY_USE_DATABASE")
                .ok()
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(defaults.use_database),
            database_url: std::env::var("ECONOMY_DATABASE_URL")
                .unwrap_or(defaults.database_url),
            table_prefix: std::env::var("ECONOMY_TABLE_PREFIX")
                .unwrap_or(defaults.table_prefix),
            data_dir: std::env::var("ECONOMY_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            initial_balance: std::env::var("ECONOMY_INITIAL_BALANCE")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(defaults.initial_balance),
            flush_interval_secs: std::env::var("ECONOMY_FLUSH_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.flush_interval_secs),
        }
    }

    pub fn balances_path(&self) -> PathBuf {
        self.data_dir.join("balances.json")
    }

    pub fn player_shops_path(&self) -> PathBuf {
        self.data_dir.join("player_shops.json")
    }

    /// Snapshot file for an admin-shop namespace: `shop.json` for the
    /// default shop, `shop_<n>.json` for NPC-bound namespaces.
    pub fn shop_namespace_path(data_dir: &Path, namespace: u32) -> PathBuf {
        if namespace == 0 {
            data_dir.join("shop.json")
        } else {
            data_dir.join(format!("shop_{}.json", namespace))
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            use_database: false,
            database_url: "sqlite://data/economy.db".to_string(),
            table_prefix: "shop_".to_string(),
            data_dir: PathBuf::from("data"),
            initial_balance: 0.0,
            flush_interval_secs: 30,
        }
    }
}
