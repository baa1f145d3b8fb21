use crate::core::config::StorageConfig;
use crate::core::shop::{ShopBackend, ShopListing, ShopTracker};
use crate::core::storage::StorageError;
use crate::infra::snapshot::{load_or_init, write_snapshot};
use async_trait::async_trait;
use dashmap::DashSet;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Snapshot backend for the admin shop: one JSON document per namespace
/// (`shop.json`, `shop_<n>.json`). Namespaces load on first reference and
/// dirty ones are rewritten atomically by `flush`.
pub struct JsonShopStore {
    data_dir: PathBuf,
    docs: RwLock<HashMap<u32, ShopTracker>>,
    dirty: DashSet<u32>,
}

impl JsonShopStore {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        Ok(Self {
            data_dir,
            docs: RwLock::new(HashMap::new()),
            dirty: DashSet::new(),
        })
    }

    fn namespace_path(&self, namespace: u32) -> PathBuf {
        StorageConfig::shop_namespace_path(&self.data_dir, namespace)
    }

    async fn ensure_doc(&self, namespace: u32) -> Result<(), StorageError> {
        {
            let docs = self.docs.read().await;
            if docs.contains_key(&namespace) {
                return Ok(());
            }
        }

        let tracker: ShopTracker = load_or_init(&self.namespace_path(namespace))?;
        let mut docs = self.docs.write().await;
        docs.entry(namespace).or_insert(tracker);
        Ok(())
    }

    /// Every namespace persisted on disk, loaded. Feeds the one-time
    /// database migration.
    pub async fn load_all_namespaces(&self) -> Result<Vec<(u32, ShopTracker)>, StorageError> {
        let mut namespaces = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == "shop.json" {
                namespaces.push(0);
            } else if let Some(ns) = name
                .strip_prefix("shop_")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|n| n.parse::<u32>().ok())
            {
                namespaces.push(ns);
            }
        }
        namespaces.sort_unstable();

        let mut loaded = Vec::with_capacity(namespaces.len());
        for namespace in namespaces {
            loaded.push((namespace, self.load_namespace(namespace).await?));
        }
        Ok(loaded)
    }
}

#[async_trait]
impl ShopBackend for JsonShopStore {
    async fn load_namespace(&self, namespace: u32) -> Result<ShopTracker, StorageError> {
        self.ensure_doc(namespace).await?;
        let docs = self.docs.read().await;
        Ok(docs.get(&namespace).cloned().unwrap_or_default())
    }

    async fn upsert_item(
        &self,
        namespace: u32,
        listing: &ShopListing,
    ) -> Result<(), StorageError> {
        self.ensure_doc(namespace).await?;
        let mut docs = self.docs.write().await;
        let doc = docs.entry(namespace).or_default();
        doc.items.retain(|i| i.unique_id != listing.unique_id);
        doc.items.push(listing.clone());
        // Never let the persisted counter fall behind a live id
        doc.next_unique_id = doc.next_unique_id.max(listing.unique_id + 1);
        drop(docs);

        self.dirty.insert(namespace);
        Ok(())
    }

    async fn delete_item(&self, namespace: u32, unique_id: u32) -> Result<(), StorageError> {
        self.ensure_doc(namespace).await?;
        let mut docs = self.docs.write().await;
        if let Some(doc) = docs.get_mut(&namespace) {
            doc.items.retain(|i| i.unique_id != unique_id);
        }
        drop(docs);

        self.dirty.insert(namespace);
        Ok(())
    }

    async fn insert_tab(&self, namespace: u32, tab: &str) -> Result<(), StorageError> {
        self.ensure_doc(namespace).await?;
        let mut docs = self.docs.write().await;
        let doc = docs.entry(namespace).or_default();
        if !doc.tabs.iter().any(|t| t == tab) {
            doc.tabs.push(tab.to_string());
        }
        drop(docs);

        self.dirty.insert(namespace);
        Ok(())
    }

    async fn delete_tab(&self, namespace: u32, tab: &str) -> Result<(), StorageError> {
        self.ensure_doc(namespace).await?;
        let mut docs = self.docs.write().await;
        if let Some(doc) = docs.get_mut(&namespace) {
            doc.tabs.retain(|t| t != tab);
        }
        drop(docs);

        self.dirty.insert(namespace);
        Ok(())
    }

    async fn clear_namespace(&self, namespace: u32) -> Result<(), StorageError> {
        let mut docs = self.docs.write().await;
        docs.remove(&namespace);
        drop(docs);
        self.dirty.remove(&namespace);

        match std::fs::remove_file(self.namespace_path(namespace)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let pending: Vec<u32> = self.dirty.iter().map(|ns| *ns).collect();
        for namespace in pending {
            self.dirty.remove(&namespace);

            let doc = {
                let docs = self.docs.read().await;
                docs.get(&namespace).cloned()
            };
            // Cleared between tick and write; nothing to persist
            let Some(mut doc) = doc else { continue };
            doc.items.sort_by_key(|i| i.unique_id);

            if let Err(err) = write_snapshot(&self.namespace_path(namespace), &doc) {
                self.dirty.insert(namespace);
                return Err(err);
            }
        }
        Ok(())
    }
}
