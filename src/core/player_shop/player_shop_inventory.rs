// Player shops - per-owner listings with stock accounting.
//
// Listing ids come from one global counter spanning all owners: players
// reference them directly in removal commands, so they must be unambiguous
// server-wide. The two-phase removal below is the critical path: units of
// stock must never be created or destroyed, only moved between a listing and
// the owner's inventory.

use crate::core::storage::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Hard cap on tabs per owner.
pub const MAX_TABS: usize = 7;

/// One listing in a player's shop.
///
/// `stock` is the number of units still available for purchase; it only ever
/// decreases on sale and is the sole amount returned to the owner when the
/// listing is removed. `quantity` remembers how much was moved in originally
/// and is not persisted separately: on load it is seeded from `stock`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerShopListing {
    #[serde(rename = "UniqueId")]
    pub unique_id: u64,
    #[serde(rename = "ItemId")]
    pub item_id: String,
    #[serde(skip)]
    pub quantity: u32,
    #[serde(rename = "PriceBuy")]
    pub price_buy: f64,
    #[serde(rename = "PriceSell")]
    pub price_sell: f64,
    #[serde(rename = "Durability", default)]
    pub durability: i32,
    #[serde(rename = "MaxDurability", default)]
    pub max_durability: i32,
    #[serde(rename = "Stock")]
    pub stock: u32,
    #[serde(rename = "Tab", default)]
    pub tab: String,
}

/// One player's shop: metadata, tabs and listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerShop {
    pub uuid: String,
    pub nick: String,
    #[serde(rename = "customName", default)]
    pub custom_name: Option<String>,
    #[serde(rename = "shopIcon", default)]
    pub icon: Option<String>,
    #[serde(rename = "isOpen", default)]
    pub is_open: bool,
    #[serde(rename = "Tabs", default)]
    pub tabs: Vec<String>,
    #[serde(rename = "Items", default)]
    pub items: Vec<PlayerShopListing>,
}

impl PlayerShop {
    fn new(uuid: &str, nick: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            nick: nick.to_string(),
            custom_name: None,
            icon: None,
            is_open: false,
            tabs: Vec::new(),
            items: Vec::new(),
        }
    }
}

/// Complete persisted state of the player-shop ledger; doubles as the
/// snapshot document layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerShopTracker {
    #[serde(rename = "NextUniqueId", default)]
    pub next_unique_id: u64,
    #[serde(rename = "Shops", default)]
    pub shops: Vec<PlayerShop>,
}

#[derive(Debug, Error)]
pub enum PlayerShopError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Shop of {owner} already has the maximum of {MAX_TABS} tabs")]
    TabLimit { owner: String },
    #[error("No listing with id {0}")]
    ListingNotFound(u64),
    #[error("Owner inventory is full, listing kept")]
    InventoryFull,
    #[error("Only {available} in stock, requested {requested}")]
    InsufficientStock { available: u32, requested: u32 },
    #[error("Listing {0} was returned to the owner but could not be deleted, and taking the units back failed")]
    StockInvariantBroken(u64),
}

/// External collaborator that holds the owner's actual game inventory.
/// Grants can fail when the inventory is full; revoke takes back units handed
/// out by an earlier grant.
#[async_trait]
pub trait OwnerInventory: Send + Sync {
    async fn grant(&self, owner: &str, item_id: &str, count: u32) -> bool;

    async fn revoke(&self, owner: &str, item_id: &str, count: u32) -> bool;
}

/// Persistence contract for the player-shop ledger.
#[async_trait]
pub trait PlayerShopBackend: Send + Sync {
    async fn load(&self) -> Result<PlayerShopTracker, StorageError>;

    /// Persist owner metadata and tabs. The `items` field is ignored here;
    /// listings go through `upsert_item`/`delete_item`.
    async fn upsert_shop(&self, shop: &PlayerShop) -> Result<(), StorageError>;

    async fn upsert_item(
        &self,
        owner: &str,
        listing: &PlayerShopListing,
    ) -> Result<(), StorageError>;

    async fn delete_item(&self, owner: &str, unique_id: u64) -> Result<(), StorageError>;

    async fn flush(&self) -> Result<(), StorageError>;

    async fn close(&self) {}
}

#[async_trait]
impl PlayerShopBackend for Box<dyn PlayerShopBackend> {
    async fn load(&self) -> Result<PlayerShopTracker, StorageError> {
        (**self).load().await
    }

    async fn upsert_shop(&self, shop: &PlayerShop) -> Result<(), StorageError> {
        (**self).upsert_shop(shop).await
    }

    async fn upsert_item(
        &self,
        owner: &str,
        listing: &PlayerShopListing,
    ) -> Result<(), StorageError> {
        (**self).upsert_item(owner, listing).await
    }

    async fn delete_item(&self, owner: &str, unique_id: u64) -> Result<(), StorageError> {
        (**self).delete_item(owner, unique_id).await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        (**self).flush().await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

struct Tracker {
    shops: HashMap<String, PlayerShop>,
    next_unique_id: u64,
}

/// Manager for every player-owned shop.
pub struct PlayerShopInventory<B: PlayerShopBackend> {
    backend: B,
    tracker: RwLock<Tracker>,
}

impl<B: PlayerShopBackend> PlayerShopInventory<B> {
    pub async fn new(backend: B) -> Result<Self, PlayerShopError> {
        let persisted = backend.load().await?;

        let max_seen = persisted
            .shops
            .iter()
            .flat_map(|s| s.items.iter())
            .map(|i| i.unique_id)
            .max()
            .unwrap_or(0);
        let next_unique_id = persisted.next_unique_id.max(max_seen + 1).max(1);

        let shops = persisted
            .shops
            .into_iter()
            .map(|mut shop| {
                // The snapshot format carries no separate quantity
                for item in &mut shop.items {
                    item.quantity = item.quantity.max(item.stock);
                }
                (shop.uuid.clone(), shop)
            })
            .collect();

        Ok(Self {
            backend,
            tracker: RwLock::new(Tracker {
                shops,
                next_unique_id,
            }),
        })
    }

    pub async fn shop(&self, owner: &str) -> Option<PlayerShop> {
        let tracker = self.tracker.read().await;
        tracker.shops.get(owner).cloned()
    }

    pub async fn open_shops(&self) -> Vec<PlayerShop> {
        let tracker = self.tracker.read().await;
        let mut shops: Vec<PlayerShop> = tracker
            .shops
            .values()
            .filter(|s| s.is_open)
            .cloned()
            .collect();
        shops.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        shops
    }

    /// Server-wide lookup by listing id. Returns the owner uuid alongside
    /// the listing.
    pub async fn listing(&self, unique_id: u64) -> Option<(String, PlayerShopListing)> {
        let tracker = self.tracker.read().await;
        for shop in tracker.shops.values() {
            if let Some(item) = shop.items.iter().find(|i| i.unique_id == unique_id) {
                return Some((shop.uuid.clone(), item.clone()));
            }
        }
        None
    }

    pub async fn items_in_tab(&self, owner: &str, tab: &str) -> Vec<PlayerShopListing> {
        let tracker = self.tracker.read().await;
        tracker
            .shops
            .get(owner)
            .map(|s| {
                s.items
                    .iter()
                    .filter(|i| i.tab == tab)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Move `amount` units from the owner's inventory into their shop.
    ///
    /// When the owner already lists the same item in the same tab with the
    /// same durability snapshot, the listing is merged: prices replaced,
    /// stock and quantity increased by `amount`. A differing durability makes
    /// a distinct listing. Returns the id of the listing in effect.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_or_update_item(
        &self,
        owner: &str,
        nick: &str,
        item_id: &str,
        amount: u32,
        price_buy: f64,
        price_sell: f64,
        durability: i32,
        max_durability: i32,
        tab: &str,
    ) -> Result<u64, PlayerShopError> {
        let mut guard = self.tracker.write().await;
        let tracker = &mut *guard;

        let shop_is_new = !tracker.shops.contains_key(owner);
        let shop = tracker
            .shops
            .entry(owner.to_string())
            .or_insert_with(|| PlayerShop::new(owner, nick));
        let nick_changed = shop.nick != nick;
        shop.nick = nick.to_string();

        let merged = shop.items.iter_mut().find(|i| {
            i.item_id == item_id
                && i.tab == tab
                && i.durability == durability
                && i.max_durability == max_durability
        });

        let listing = match merged {
            Some(existing) => {
                existing.price_buy = price_buy;
                existing.price_sell = price_sell;
                existing.stock += amount;
                existing.quantity += amount;
                existing.clone()
            }
            None => {
                let listing = PlayerShopListing {
                    unique_id: tracker.next_unique_id,
                    item_id: item_id.to_string(),
                    quantity: amount,
                    price_buy,
                    price_sell,
                    durability,
                    max_durability,
                    stock: amount,
                    tab: tab.to_string(),
                };
                tracker.next_unique_id += 1;
                tracker
                    .shops
                    .get_mut(owner)
                    .expect("shop just inserted")
                    .items
                    .push(listing.clone());
                listing
            }
        };
        let shop_record = tracker
            .shops
            .get(owner)
            .expect("shop just inserted")
            .clone();
        drop(guard);

        // A refreshed nick must reach the backend too, or it is lost on
        // reload.
        if shop_is_new || nick_changed {
            self.backend.upsert_shop(&shop_record).await?;
        }
        self.backend.upsert_item(owner, &listing).await?;
        Ok(listing.unique_id)
    }

    /// A purchase: stock goes down, never up. Rejected when fewer units are
    /// left than requested.
    pub async fn record_sale(&self, unique_id: u64, amount: u32) -> Result<(), PlayerShopError> {
        let mut tracker = self.tracker.write().await;
        let mut updated = None;
        for shop in tracker.shops.values_mut() {
            if let Some(item) = shop.items.iter_mut().find(|i| i.unique_id == unique_id) {
                if item.stock < amount {
                    return Err(PlayerShopError::InsufficientStock {
                        available: item.stock,
                        requested: amount,
                    });
                }
                item.stock -= amount;
                updated = Some((shop.uuid.clone(), item.clone()));
                break;
            }
        }
        drop(tracker);

        let (owner, listing) = updated.ok_or(PlayerShopError::ListingNotFound(unique_id))?;
        self.backend.upsert_item(&owner, &listing).await?;
        Ok(())
    }

    /// Two-phase removal. Phase one hands the current stock (never the
    /// original quantity) back to the owner through `inventory`; a full
    /// inventory aborts the removal with the listing untouched. Phase two
    /// deletes the listing from the backend; if that fails, the granted
    /// units are taken back so no duplicates survive. Returns the number of
    /// units handed back.
    pub async fn remove_item(
        &self,
        unique_id: u64,
        inventory: &dyn OwnerInventory,
    ) -> Result<u32, PlayerShopError> {
        let (owner, listing) = self
            .listing(unique_id)
            .await
            .ok_or(PlayerShopError::ListingNotFound(unique_id))?;

        if listing.stock > 0 && !inventory.grant(&owner, &listing.item_id, listing.stock).await {
            return Err(PlayerShopError::InventoryFull);
        }

        if let Err(err) = self.backend.delete_item(&owner, unique_id).await {
            // Compensating reversal so the grant does not duplicate items
            if listing.stock > 0
                && !inventory.revoke(&owner, &listing.item_id, listing.stock).await
            {
                tracing::error!(
                    unique_id,
                    owner = %owner,
                    item_id = %listing.item_id,
                    stock = listing.stock,
                    "listing delete failed and grant reversal failed; stock invariant may be violated"
                );
                return Err(PlayerShopError::StockInvariantBroken(unique_id));
            }
            return Err(err.into());
        }

        let mut tracker = self.tracker.write().await;
        if let Some(shop) = tracker.shops.get_mut(&owner) {
            shop.items.retain(|i| i.unique_id != unique_id);
        }
        drop(tracker);

        Ok(listing.stock)
    }

    pub async fn set_open(&self, owner: &str, open: bool) -> Result<bool, PlayerShopError> {
        self.update_shop(owner, |shop| shop.is_open = open).await
    }

    pub async fn set_custom_name(
        &self,
        owner: &str,
        name: Option<String>,
    ) -> Result<bool, PlayerShopError> {
        self.update_shop(owner, |shop| shop.custom_name = name).await
    }

    pub async fn set_icon(
        &self,
        owner: &str,
        icon: Option<String>,
    ) -> Result<bool, PlayerShopError> {
        self.update_shop(owner, |shop| shop.icon = icon).await
    }

    /// Returns false for a duplicate name; rejects outright once the owner
    /// holds `MAX_TABS` tabs.
    pub async fn add_tab(&self, owner: &str, tab: &str) -> Result<bool, PlayerShopError> {
        let mut tracker = self.tracker.write().await;
        let shop = match tracker.shops.get_mut(owner) {
            Some(shop) => shop,
            None => return Ok(false),
        };
        if shop.tabs.iter().any(|t| t == tab) {
            return Ok(false);
        }
        if shop.tabs.len() >= MAX_TABS {
            return Err(PlayerShopError::TabLimit {
                owner: owner.to_string(),
            });
        }
        shop.tabs.push(tab.to_string());
        let shop = shop.clone();
        drop(tracker);

        self.backend.upsert_shop(&shop).await?;
        Ok(true)
    }

    /// No cascade: listings keep the retired tab name and simply drop out of
    /// tab-filtered views.
    pub async fn remove_tab(&self, owner: &str, tab: &str) -> Result<bool, PlayerShopError> {
        let mut tracker = self.tracker.write().await;
        let shop = match tracker.shops.get_mut(owner) {
            Some(shop) => shop,
            None => return Ok(false),
        };
        let before = shop.tabs.len();
        shop.tabs.retain(|t| t != tab);
        if shop.tabs.len() == before {
            return Ok(false);
        }
        let shop = shop.clone();
        drop(tracker);

        self.backend.upsert_shop(&shop).await?;
        Ok(true)
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        self.backend.flush().await
    }

    pub async fn shutdown(&self) -> Result<(), StorageError> {
        self.backend.flush().await?;
        self.backend.close().await;
        Ok(())
    }

    async fn update_shop<F>(&self, owner: &str, apply: F) -> Result<bool, PlayerShopError>
    where
        F: FnOnce(&mut PlayerShop),
    {
        let mut tracker = self.tracker.write().await;
        let shop = match tracker.shops.get_mut(owner) {
            Some(shop) => shop,
            None => return Ok(false),
        };
        apply(shop);
        let shop = shop.clone();
        drop(tracker);

        self.backend.upsert_shop(&shop).await?;
        Ok(true)
    }
}
