// Player shop backends - snapshot file and SQLite.

mod json_store;
mod sqlite_store;

pub use json_store::JsonPlayerShopStore;
pub use sqlite_store::SqlitePlayerShopStore;
