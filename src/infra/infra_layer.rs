// The infra module contains implementations of core traits.
// Each ledger's two backends go in their own submodule.

pub mod db;
pub mod flush;
pub mod snapshot;

#[path = "balance/mod.rs"]
pub mod balance;

#[path = "shop/mod.rs"]
pub mod shop;

#[path = "player_shop/mod.rs"]
pub mod player_shop;
