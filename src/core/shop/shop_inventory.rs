// Admin shop catalog - listings and tabs across independent namespaces.
//
// Namespace 0 is the always-present default shop; positive namespaces are
// bound 1:1 to NPC entities and spring into existence on first reference.
// Each namespace carries its own monotonic listing-id counter.

use crate::core::storage::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

pub const DEFAULT_NAMESPACE: u32 = 0;

/// Hard cap on tabs per namespace.
pub const MAX_TABS: usize = 7;

/// One catalog entry. `unique_id` is unique within its namespace only and is
/// never reused there, even after the listing is removed.
///
/// Field renames match the on-disk snapshot format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopListing {
    #[serde(rename = "UniqueId")]
    pub unique_id: u32,
    #[serde(rename = "ItemId")]
    pub item_id: String,
    #[serde(rename = "Quantity")]
    pub quantity: u32,
    #[serde(rename = "PriceSell")]
    pub price_sell: f64,
    #[serde(rename = "PriceBuy")]
    pub price_buy: f64,
    #[serde(rename = "Tab", default)]
    pub tab: String,
    /// Console-command mode: instead of granting `item_id`, a templated
    /// command is executed on purchase.
    #[serde(rename = "IsConsoleCommand", default)]
    pub is_console_command: bool,
    #[serde(rename = "ConsoleCommand", default)]
    pub console_command: String,
    #[serde(rename = "DisplayName", default)]
    pub display_name: String,
    /// Charge the secondary currency instead of the balance.
    #[serde(rename = "UseCash", default)]
    pub use_cash: bool,
}

/// Complete persisted state of one namespace; doubles as the snapshot
/// document layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShopTracker {
    #[serde(rename = "NextUniqueId", default)]
    pub next_unique_id: u32,
    #[serde(rename = "Items", default)]
    pub items: Vec<ShopListing>,
    #[serde(rename = "Tabs", default)]
    pub tabs: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ShopError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Namespace {namespace} already has the maximum of {MAX_TABS} tabs")]
    TabLimit { namespace: u32 },
    #[error("The default shop cannot be cleared")]
    DefaultNamespaceProtected,
}

/// Persistence contract for the admin shop, addressed per namespace.
#[async_trait]
pub trait ShopBackend: Send + Sync {
    /// Persisted state of one namespace. Returns an empty tracker for a
    /// namespace that was never written.
    async fn load_namespace(&self, namespace: u32) -> Result<ShopTracker, StorageError>;

    async fn upsert_item(&self, namespace: u32, listing: &ShopListing)
        -> Result<(), StorageError>;

    async fn delete_item(&self, namespace: u32, unique_id: u32) -> Result<(), StorageError>;

    async fn insert_tab(&self, namespace: u32, tab: &str) -> Result<(), StorageError>;

    async fn delete_tab(&self, namespace: u32, tab: &str) -> Result<(), StorageError>;

    /// Drop every listing and tab of the namespace along with its
    /// file/partition. Used when the owning NPC is destroyed.
    async fn clear_namespace(&self, namespace: u32) -> Result<(), StorageError>;

    async fn flush(&self) -> Result<(), StorageError>;

    async fn close(&self) {}
}

#[async_trait]
impl ShopBackend for Box<dyn ShopBackend> {
    async fn load_namespace(&self, namespace: u32) -> Result<ShopTracker, StorageError> {
        (**self).load_namespace(namespace).await
    }

    async fn upsert_item(
        &self,
        namespace: u32,
        listing: &ShopListing,
    ) -> Result<(), StorageError> {
        (**self).upsert_item(namespace, listing).await
    }

    async fn delete_item(&self, namespace: u32, unique_id: u32) -> Result<(), StorageError> {
        (**self).delete_item(namespace, unique_id).await
    }

    async fn insert_tab(&self, namespace: u32, tab: &str) -> Result<(), StorageError> {
        (**self).insert_tab(namespace, tab).await
    }

    async fn delete_tab(&self, namespace: u32, tab: &str) -> Result<(), StorageError> {
        (**self).delete_tab(namespace, tab).await
    }

    async fn clear_namespace(&self, namespace: u32) -> Result<(), StorageError> {
        (**self).clear_namespace(namespace).await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        (**self).flush().await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

/// In-memory state of one loaded namespace.
struct ShopNamespace {
    items: HashMap<u32, ShopListing>,
    tabs: Vec<String>,
    next_unique_id: u32,
}

impl ShopNamespace {
    /// The id counter starts at 1 and is advanced past the highest id seen,
    /// so reloads never hand out an id that a persisted listing already
    /// carries - even when records come back out of order.
    fn from_tracker(tracker: ShopTracker) -> Self {
        let max_seen = tracker.items.iter().map(|i| i.unique_id).max().unwrap_or(0);
        let next_unique_id = tracker.next_unique_id.max(max_seen + 1).max(1);

        Self {
            items: tracker
                .items
                .into_iter()
                .map(|i| (i.unique_id, i))
                .collect(),
            tabs: tracker.tabs,
            next_unique_id,
        }
    }
}

/// Manager for the multi-namespace admin shop catalog.
pub struct ShopInventory<B: ShopBackend> {
    backend: B,
    namespaces: RwLock<HashMap<u32, ShopNamespace>>,
}

impl<B: ShopBackend> ShopInventory<B> {
    /// Loads the default namespace eagerly; every other namespace loads on
    /// first reference.
    pub async fn new(backend: B) -> Result<Self, ShopError> {
        let inventory = Self {
            backend,
            namespaces: RwLock::new(HashMap::new()),
        };
        inventory.ensure_namespace(DEFAULT_NAMESPACE).await?;
        Ok(inventory)
    }

    async fn ensure_namespace(&self, namespace: u32) -> Result<(), ShopError> {
        {
            let namespaces = self.namespaces.read().await;
            if namespaces.contains_key(&namespace) {
                return Ok(());
            }
        }

        let tracker = self.backend.load_namespace(namespace).await?;
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(namespace)
            .or_insert_with(|| ShopNamespace::from_tracker(tracker));
        Ok(())
    }

    /// Add a listing. A `unique_id` of 0 means "assign the next id"; a
    /// non-zero id is preserved as-is (backend migration path) and the
    /// counter advances past it either way. Returns the id in effect.
    pub async fn add_item(
        &self,
        namespace: u32,
        mut listing: ShopListing,
    ) -> Result<u32, ShopError> {
        self.ensure_namespace(namespace).await?;

        let mut namespaces = self.namespaces.write().await;
        // A concurrent clear may have evicted the namespace after the
        // ensure step; reseed it empty instead of assuming it is cached.
        let ns = namespaces
            .entry(namespace)
            .or_insert_with(|| ShopNamespace::from_tracker(ShopTracker::default()));

        if listing.unique_id == 0 {
            listing.unique_id = ns.next_unique_id;
        }
        ns.next_unique_id = ns.next_unique_id.max(listing.unique_id + 1);

        let unique_id = listing.unique_id;
        ns.items.insert(unique_id, listing.clone());
        drop(namespaces);

        self.backend.upsert_item(namespace, &listing).await?;
        Ok(unique_id)
    }

    pub async fn item(&self, namespace: u32, unique_id: u32) -> Result<Option<ShopListing>, ShopError> {
        self.ensure_namespace(namespace).await?;
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(&namespace)
            .and_then(|ns| ns.items.get(&unique_id).cloned()))
    }

    /// All listings of a namespace, ordered by id.
    pub async fn items(&self, namespace: u32) -> Result<Vec<ShopListing>, ShopError> {
        self.ensure_namespace(namespace).await?;
        let namespaces = self.namespaces.read().await;
        let mut items: Vec<ShopListing> = namespaces
            .get(&namespace)
            .map(|ns| ns.items.values().cloned().collect())
            .unwrap_or_default();
        items.sort_by_key(|i| i.unique_id);
        Ok(items)
    }

    pub async fn items_in_tab(
        &self,
        namespace: u32,
        tab: &str,
    ) -> Result<Vec<ShopListing>, ShopError> {
        let mut items = self.items(namespace).await?;
        items.retain(|i| i.tab == tab);
        Ok(items)
    }

    /// Returns false when the listing did not exist. The freed id is not
    /// reused.
    pub async fn remove_item(&self, namespace: u32, unique_id: u32) -> Result<bool, ShopError> {
        self.ensure_namespace(namespace).await?;

        let mut namespaces = self.namespaces.write().await;
        let ns = namespaces
            .entry(namespace)
            .or_insert_with(|| ShopNamespace::from_tracker(ShopTracker::default()));
        let existed = ns.items.remove(&unique_id).is_some();
        drop(namespaces);

        if existed {
            self.backend.delete_item(namespace, unique_id).await?;
        }
        Ok(existed)
    }

    pub async fn tabs(&self, namespace: u32) -> Result<Vec<String>, ShopError> {
        self.ensure_namespace(namespace).await?;
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(&namespace)
            .map(|ns| ns.tabs.clone())
            .unwrap_or_default())
    }

    /// Returns false for a duplicate name; rejects outright once the
    /// namespace holds `MAX_TABS` tabs.
    pub async fn add_tab(&self, namespace: u32, tab: &str) -> Result<bool, ShopError> {
        self.ensure_namespace(namespace).await?;

        let mut namespaces = self.namespaces.write().await;
        let ns = namespaces
            .entry(namespace)
            .or_insert_with(|| ShopNamespace::from_tracker(ShopTracker::default()));
        if ns.tabs.iter().any(|t| t == tab) {
            return Ok(false);
        }
        if ns.tabs.len() >= MAX_TABS {
            return Err(ShopError::TabLimit { namespace });
        }
        ns.tabs.push(tab.to_string());
        drop(namespaces);

        self.backend.insert_tab(namespace, tab).await?;
        Ok(true)
    }

    /// Removing a tab cascades to every listing tagged with it.
    pub async fn remove_tab(&self, namespace: u32, tab: &str) -> Result<bool, ShopError> {
        self.ensure_namespace(namespace).await?;

        let mut namespaces = self.namespaces.write().await;
        let ns = namespaces
            .entry(namespace)
            .or_insert_with(|| ShopNamespace::from_tracker(ShopTracker::default()));
        let pos = match ns.tabs.iter().position(|t| t == tab) {
            Some(pos) => pos,
            None => return Ok(false),
        };
        ns.tabs.remove(pos);

        let orphaned: Vec<u32> = ns
            .items
            .values()
            .filter(|i| i.tab == tab)
            .map(|i| i.unique_id)
            .collect();
        for unique_id in &orphaned {
            ns.items.remove(unique_id);
        }
        drop(namespaces);

        self.backend.delete_tab(namespace, tab).await?;
        for unique_id in orphaned {
            self.backend.delete_item(namespace, unique_id).await?;
        }
        Ok(true)
    }

    /// Drop an NPC-bound namespace entirely. The default shop is protected.
    pub async fn clear_shop(&self, namespace: u32) -> Result<(), ShopError> {
        if namespace == DEFAULT_NAMESPACE {
            return Err(ShopError::DefaultNamespaceProtected);
        }

        let mut namespaces = self.namespaces.write().await;
        namespaces.remove(&namespace);
        drop(namespaces);

        self.backend.clear_namespace(namespace).await?;
        Ok(())
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        self.backend.flush().await
    }

    pub async fn shutdown(&self) -> Result<(), StorageError> {
        self.backend.flush().await?;
        self.backend.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    // Clonable so tests can keep a handle across a simulated reload
    #[derive(Default, Clone)]
    struct InMemoryShopBackend {
        trackers: Arc<Mutex<HashMap<u32, ShopTracker>>>,
    }

    #[async_trait]
    impl ShopBackend for InMemoryShopBackend {
        async fn load_namespace(&self, namespace: u32) -> Result<ShopTracker, StorageError> {
            Ok(self
                .trackers
                .lock()
                .unwrap()
                .get(&namespace)
                .cloned()
                .unwrap_or_default())
        }

        async fn upsert_item(
            &self,
            namespace: u32,
            listing: &ShopListing,
        ) -> Result<(), StorageError> {
            let mut trackers = self.trackers.lock().unwrap();
            let tracker = trackers.entry(namespace).or_default();
            tracker.items.retain(|i| i.unique_id != listing.unique_id);
            tracker.items.push(listing.clone());
            tracker.next_unique_id = tracker.next_unique_id.max(listing.unique_id + 1);
            Ok(())
        }

        async fn delete_item(&self, namespace: u32, unique_id: u32) -> Result<(), StorageError> {
            let mut trackers = self.trackers.lock().unwrap();
            if let Some(tracker) = trackers.get_mut(&namespace) {
                tracker.items.retain(|i| i.unique_id != unique_id);
            }
            Ok(())
        }

        async fn insert_tab(&self, namespace: u32, tab: &str) -> Result<(), StorageError> {
            let mut trackers = self.trackers.lock().unwrap();
            trackers
                .entry(namespace)
                .or_default()
                .tabs
                .push(tab.to_string());
            Ok(())
        }

        async fn delete_tab(&self, namespace: u32, tab: &str) -> Result<(), StorageError> {
            let mut trackers = self.trackers.lock().unwrap();
            if let Some(tracker) = trackers.get_mut(&namespace) {
                tracker.tabs.retain(|t| t != tab);
            }
            Ok(())
        }

        async fn clear_namespace(&self, namespace: u32) -> Result<(), StorageError> {
            self.trackers.lock().unwrap().remove(&namespace);
            Ok(())
        }

        async fn flush(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn listing(item_id: &str, tab: &str) -> ShopListing {
        ShopListing {
            unique_id: 0,
            item_id: item_id.to_string(),
            quantity: 1,
            price_sell: 10.0,
            price_buy: 5.0,
            tab: tab.to_string(),
            is_console_command: false,
            console_command: String::new(),
            display_name: String::new(),
            use_cash: false,
        }
    }

    #[tokio::test]
    async fn ids_start_at_one_and_increase() {
        let shop = ShopInventory::new(InMemoryShopBackend::default())
            .await
            .unwrap();

        let first = shop.add_item(0, listing("stone", "")).await.unwrap();
        let second = shop.add_item(0, listing("dirt", "")).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn ids_survive_reload() {
        let backend = InMemoryShopBackend::default();
        {
            let shop = ShopInventory::new(backend.clone()).await.unwrap();
            shop.add_item(0, listing("stone", "")).await.unwrap();
            shop.add_item(0, listing("dirt", "")).await.unwrap();
        }

        let shop = ShopInventory::new(backend).await.unwrap();
        let third = shop.add_item(0, listing("sand", "")).await.unwrap();
        assert_eq!(third, 3);
    }

    #[tokio::test]
    async fn counter_advances_past_out_of_order_records() {
        let backend = InMemoryShopBackend::default();
        {
            // Persist records in non-monotonic order with no counter saved
            let mut trackers = backend.trackers.lock().unwrap();
            let tracker = trackers.entry(0).or_default();
            for id in [7, 3, 5] {
                let mut l = listing("stone", "");
                l.unique_id = id;
                tracker.items.push(l);
            }
        }

        let shop = ShopInventory::new(backend).await.unwrap();
        let next = shop.add_item(0, listing("dirt", "")).await.unwrap();
        assert_eq!(next, 8);
    }

    #[tokio::test]
    async fn explicit_id_is_preserved_and_advances_counter() {
        let shop = ShopInventory::new(InMemoryShopBackend::default())
            .await
            .unwrap();

        let mut l = listing("stone", "");
        l.unique_id = 40;
        assert_eq!(shop.add_item(0, l).await.unwrap(), 40);
        assert_eq!(shop.add_item(0, listing("dirt", "")).await.unwrap(), 41);
    }

    #[tokio::test]
    async fn removed_ids_are_not_reused() {
        let shop = ShopInventory::new(InMemoryShopBackend::default())
            .await
            .unwrap();

        let id = shop.add_item(0, listing("stone", "")).await.unwrap();
        assert!(shop.remove_item(0, id).await.unwrap());
        let next = shop.add_item(0, listing("dirt", "")).await.unwrap();
        assert_eq!(next, id + 1);
    }

    #[tokio::test]
    async fn tab_limit_is_enforced() {
        let shop = ShopInventory::new(InMemoryShopBackend::default())
            .await
            .unwrap();

        for i in 0..MAX_TABS {
            assert!(shop.add_tab(0, &format!("tab{}", i)).await.unwrap());
        }
        // Duplicate is a no-op, not an error
        assert!(!shop.add_tab(0, "tab0").await.unwrap());

        let err = shop.add_tab(0, "one-too-many").await.unwrap_err();
        assert!(matches!(err, ShopError::TabLimit { namespace: 0 }));
        assert_eq!(shop.tabs(0).await.unwrap().len(), MAX_TABS);
    }

    #[tokio::test]
    async fn removing_a_tab_cascades_to_its_listings() {
        let shop = ShopInventory::new(InMemoryShopBackend::default())
            .await
            .unwrap();

        shop.add_tab(0, "tools").await.unwrap();
        shop.add_item(0, listing("pickaxe", "tools")).await.unwrap();
        shop.add_item(0, listing("shovel", "tools")).await.unwrap();
        let kept = shop.add_item(0, listing("stone", "blocks")).await.unwrap();

        assert!(shop.remove_tab(0, "tools").await.unwrap());
        let items = shop.items(0).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].unique_id, kept);
    }

    #[tokio::test]
    async fn namespaces_are_independent() {
        let shop = ShopInventory::new(InMemoryShopBackend::default())
            .await
            .unwrap();

        // Both counters start at 1
        assert_eq!(shop.add_item(0, listing("stone", "")).await.unwrap(), 1);
        assert_eq!(shop.add_item(9, listing("stone", "")).await.unwrap(), 1);
        assert_eq!(shop.add_item(9, listing("dirt", "")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn clear_shop_rejects_default_namespace() {
        let shop = ShopInventory::new(InMemoryShopBackend::default())
            .await
            .unwrap();

        shop.add_item(0, listing("stone", "")).await.unwrap();
        let err = shop.clear_shop(0).await.unwrap_err();
        assert!(matches!(err, ShopError::DefaultNamespaceProtected));
        assert_eq!(shop.items(0).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clearing_races_with_tab_updates_without_panicking() {
        let shop = Arc::new(
            ShopInventory::new(InMemoryShopBackend::default())
                .await
                .unwrap(),
        );

        for _ in 0..50 {
            let clearer = {
                let shop = shop.clone();
                tokio::spawn(async move { shop.clear_shop(7).await })
            };
            let adder = {
                let shop = shop.clone();
                tokio::spawn(async move { shop.add_tab(7, "blocks").await })
            };
            clearer.await.unwrap().unwrap();
            adder.await.unwrap().unwrap();
        }

        assert!(shop.tabs(7).await.unwrap().len() <= 1);
    }

    #[tokio::test]
    async fn clear_shop_drops_npc_namespace() {
        let shop = ShopInventory::new(InMemoryShopBackend::default())
            .await
            .unwrap();

        shop.add_item(4, listing("stone", "")).await.unwrap();
        shop.add_tab(4, "blocks").await.unwrap();
        shop.clear_shop(4).await.unwrap();

        assert!(shop.items(4).await.unwrap().is_empty());
        assert!(shop.tabs(4).await.unwrap().is_empty());
        // The counter restarts because the whole partition is gone
        assert_eq!(shop.add_item(4, listing("dirt", "")).await.unwrap(), 1);
    }
}
