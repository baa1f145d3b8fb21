// Admin shop backends - snapshot files (one per namespace) and SQLite.

mod json_store;
mod sqlite_store;

pub use json_store::JsonShopStore;
pub use sqlite_store::SqliteShopStore;
