// Balance ledger backends - snapshot file and SQLite.

mod json_store;
mod sqlite_store;

pub use json_store::JsonBalanceStore;
pub use sqlite_store::SqliteBalanceStore;
