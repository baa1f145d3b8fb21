// The core module contains all business logic.
// Each ledger gets its own submodule.

pub mod config;
pub mod storage;

#[path = "balance/balance_ledger.rs"]
pub mod balance;

#[path = "shop/shop_inventory.rs"]
pub mod shop;

#[path = "player_shop/player_shop_inventory.rs"]
pub mod player_shop;
