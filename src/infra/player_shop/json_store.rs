use crate::core::player_shop::{PlayerShop, PlayerShopBackend, PlayerShopListing, PlayerShopTracker};
use crate::core::storage::StorageError;
use crate::infra::snapshot::{load_or_init, write_snapshot};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Snapshot backend for player shops: every owner in one JSON document.
pub struct JsonPlayerShopStore {
    path: PathBuf,
    mirror: RwLock<PlayerShopTracker>,
    dirty: AtomicBool,
}

impl JsonPlayerShopStore {
    /// Idempotent: creates the file with an empty-but-valid document when it
    /// does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let doc: PlayerShopTracker = load_or_init(&path)?;

        Ok(Self {
            path,
            mirror: RwLock::new(doc),
            dirty: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl PlayerShopBackend for JsonPlayerShopStore {
    async fn load(&self) -> Result<PlayerShopTracker, StorageError> {
        let mirror = self.mirror.read().await;
        Ok(mirror.clone())
    }

    async fn upsert_shop(&self, shop: &PlayerShop) -> Result<(), StorageError> {
        let mut mirror = self.mirror.write().await;
        if let Some(existing) = mirror.shops.iter_mut().find(|s| s.uuid == shop.uuid) {
            // Listings are owned by upsert_item/delete_item
            let items = std::mem::take(&mut existing.items);
            *existing = shop.clone();
            existing.items = items;
        } else {
            let mut shop = shop.clone();
            shop.items.clear();
            mirror.shops.push(shop);
        }
        drop(mirror);

        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    async fn upsert_item(
        &self,
        owner: &str,
        listing: &PlayerShopListing,
    ) -> Result<(), StorageError> {
        let mut mirror = self.mirror.write().await;
        mirror.next_unique_id = mirror.next_unique_id.max(listing.unique_id + 1);
        if let Some(shop) = mirror.shops.iter_mut().find(|s| s.uuid == owner) {
            shop.items.retain(|i| i.unique_id != listing.unique_id);
            shop.items.push(listing.clone());
        }
        drop(mirror);

        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    async fn delete_item(&self, owner: &str, unique_id: u64) -> Result<(), StorageError> {
        let mut mirror = self.mirror.write().await;
        if let Some(shop) = mirror.shops.iter_mut().find(|s| s.uuid == owner) {
            shop.items.retain(|i| i.unique_id != unique_id);
        }
        drop(mirror);

        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mut doc = {
            let mirror = self.mirror.read().await;
            mirror.clone()
        };
        doc.shops.sort_by(|a, b| a.uuid.cmp(&b.uuid));

        if let Err(err) = write_snapshot(&self.path, &doc) {
            self.dirty.store(true, Ordering::Release);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn shop(uuid: &str) -> PlayerShop {
        PlayerShop {
            uuid: uuid.to_string(),
            nick: uuid.to_string(),
            custom_name: Some("My Shop".to_string()),
            icon: None,
            is_open: true,
            tabs: vec!["main".to_string()],
            items: Vec::new(),
        }
    }

    fn item(unique_id: u64, item_id: &str, stock: u32) -> PlayerShopListing {
        PlayerShopListing {
            unique_id,
            item_id: item_id.to_string(),
            quantity: stock,
            price_buy: 10.0,
            price_sell: 5.0,
            durability: 0,
            max_durability: 0,
            stock,
            tab: "main".to_string(),
        }
    }

    #[tokio::test]
    async fn flush_then_reopen_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("player_shops.json");

        let store = JsonPlayerShopStore::open(&path).unwrap();
        store.upsert_shop(&shop("alice")).await.unwrap();
        store.upsert_item("alice", &item(1, "stone", 8)).await.unwrap();
        store.upsert_item("alice", &item(2, "dirt", 3)).await.unwrap();
        store.flush().await.unwrap();

        let reopened = JsonPlayerShopStore::open(&path).unwrap();
        let tracker = reopened.load().await.unwrap();
        assert_eq!(tracker.next_unique_id, 3);
        assert_eq!(tracker.shops.len(), 1);

        let alice = &tracker.shops[0];
        assert_eq!(alice.custom_name.as_deref(), Some("My Shop"));
        assert!(alice.is_open);
        assert_eq!(alice.items.len(), 2);
        assert_eq!(alice.items.iter().find(|i| i.unique_id == 1).unwrap().stock, 8);
    }

    #[tokio::test]
    async fn upsert_shop_does_not_clobber_items() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("player_shops.json");

        let store = JsonPlayerShopStore::open(&path).unwrap();
        store.upsert_shop(&shop("alice")).await.unwrap();
        store.upsert_item("alice", &item(1, "stone", 8)).await.unwrap();

        let mut updated = shop("alice");
        updated.is_open = false;
        updated.items.push(item(99, "should-be-ignored", 1));
        store.upsert_shop(&updated).await.unwrap();

        let tracker = store.load().await.unwrap();
        let alice = &tracker.shops[0];
        assert!(!alice.is_open);
        assert_eq!(alice.items.len(), 1);
        assert_eq!(alice.items[0].unique_id, 1);
    }

    #[tokio::test]
    async fn delete_item_marks_dirty_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("player_shops.json");

        let store = JsonPlayerShopStore::open(&path).unwrap();
        store.upsert_shop(&shop("alice")).await.unwrap();
        store.upsert_item("alice", &item(1, "stone", 8)).await.unwrap();
        store.flush().await.unwrap();

        store.delete_item("alice", 1).await.unwrap();
        store.flush().await.unwrap();

        let reopened = JsonPlayerShopStore::open(&path).unwrap();
        let tracker = reopened.load().await.unwrap();
        assert!(tracker.shops[0].items.is_empty());
        // The counter does not regress when the highest listing goes away
        assert_eq!(tracker.next_unique_id, 2);
    }
}
