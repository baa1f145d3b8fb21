use crate::core::balance::{BalanceBackend, PlayerAccount};
use crate::core::storage::StorageError;
use crate::infra::snapshot::{load_or_init, write_snapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// On-disk document: { "Values": [account, ...] }
#[derive(Debug, Default, Serialize, Deserialize)]
struct BalanceDocument {
    #[serde(rename = "Values", default)]
    values: Vec<PlayerAccount>,
}

/// Snapshot backend for the balance ledger. Upserts only touch the mirror
/// and the dirty flag; the file is written by `flush` alone, atomically.
pub struct JsonBalanceStore {
    path: PathBuf,
    mirror: RwLock<HashMap<String, PlayerAccount>>,
    dirty: AtomicBool,
}

impl JsonBalanceStore {
    /// Idempotent: creates the file with an empty-but-valid document when it
    /// does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let doc: BalanceDocument = load_or_init(&path)?;

        Ok(Self {
            path,
            mirror: RwLock::new(
                doc.values
                    .into_iter()
                    .map(|a| (a.uuid.clone(), a))
                    .collect(),
            ),
            dirty: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl BalanceBackend for JsonBalanceStore {
    async fn load(&self) -> Result<Vec<PlayerAccount>, StorageError> {
        let mirror = self.mirror.read().await;
        Ok(mirror.values().cloned().collect())
    }

    async fn upsert(&self, account: &PlayerAccount) -> Result<(), StorageError> {
        let mut mirror = self.mirror.write().await;
        mirror.insert(account.uuid.clone(), account.clone());
        drop(mirror);

        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mirror = self.mirror.read().await;
        let mut values: Vec<PlayerAccount> = mirror.values().cloned().collect();
        drop(mirror);
        values.sort_by(|a, b| a.uuid.cmp(&b.uuid));

        if let Err(err) = write_snapshot(&self.path, &BalanceDocument { values }) {
            // Keep the state flagged so the next flush retries
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

    fn account(uuid: &str, balance: f64) -> PlayerAccount {
        PlayerAccount {
            uuid: uuid.to_string(),
            nick: Some(format!("{}-nick", uuid)),
            balance,
            cash: 3,
        }
    }

    #[tokio::test]
    async fn flush_then_reopen_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("balances.json");

        let store = JsonBalanceStore::open(&path).unwrap();
        store.upsert(&account("a", 12.5)).await.unwrap();
        store.upsert(&account("b", 99.0)).await.unwrap();
        store.flush().await.unwrap();

        let reopened = JsonBalanceStore::open(&path).unwrap();
        let mut accounts = reopened.load().await.unwrap();
        accounts.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].uuid, "a");
        assert_eq!(accounts[0].balance, 12.5);
        assert_eq!(accounts[0].nick.as_deref(), Some("a-nick"));
        assert_eq!(accounts[1].cash, 3);
    }

    #[tokio::test]
    async fn unflushed_upserts_stay_in_memory_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("balances.json");

        let store = JsonBalanceStore::open(&path).unwrap();
        store.upsert(&account("a", 1.0)).await.unwrap();

        // The file still holds the empty document written at open
        let reopened = JsonBalanceStore::open(&path).unwrap();
        assert!(reopened.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clean_flush_does_not_rewrite_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("balances.json");

        let store = JsonBalanceStore::open(&path).unwrap();
        store.upsert(&account("a", 1.0)).await.unwrap();
        store.flush().await.unwrap();

        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        store.flush().await.unwrap();
        assert_eq!(
            std::fs::metadata(&path).unwrap().modified().unwrap(),
            modified
        );
    }
}
