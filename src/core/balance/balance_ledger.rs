// Balance ledger - per-player currency balances, cash and nicknames.
//
// This module contains the domain logic only. The two storage backends
// (snapshot file and relational database) live in infra and implement the
// BalanceBackend trait defined here.

use crate::core::storage::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Ranking queries only consider this many positions; anything below is
/// reported as unranked.
pub const RANK_LIMIT: usize = 500;

/// Display name used when neither the online cache nor the persisted
/// nickname knows the player.
pub const UNKNOWN_NAME: &str = "unknown";

/// One player's currency state. Accounts are created lazily on first
/// reference and never deleted, only reset to zero.
///
/// Field renames match the on-disk snapshot format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerAccount {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "Nick", default)]
    pub nick: Option<String>,
    #[serde(rename = "Balance")]
    pub balance: f64,
    #[serde(rename = "Cash")]
    pub cash: i64,
}

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Persistence contract for the balance ledger.
///
/// The snapshot implementation mutates its document mirror and marks itself
/// dirty on `upsert`; only `flush` touches the file. The relational
/// implementation writes through immediately and treats `flush` as a no-op.
#[async_trait]
pub trait BalanceBackend: Send + Sync {
    /// Complete persisted state, used to seed the in-memory tracker.
    async fn load(&self) -> Result<Vec<PlayerAccount>, StorageError>;

    async fn upsert(&self, account: &PlayerAccount) -> Result<(), StorageError>;

    async fn flush(&self) -> Result<(), StorageError>;

    /// Release backend resources (connection pool). Called once during
    /// shutdown, after the final flush.
    async fn close(&self) {}
}

#[async_trait]
impl BalanceBackend for Box<dyn BalanceBackend> {
    async fn load(&self) -> Result<Vec<PlayerAccount>, StorageError> {
        (**self).load().await
    }

    async fn upsert(&self, account: &PlayerAccount) -> Result<(), StorageError> {
        (**self).upsert(account).await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        (**self).flush().await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

/// Manager for player balances, cash and nicknames.
pub struct BalanceLedger<B: BalanceBackend> {
    backend: B,
    accounts: RwLock<HashMap<String, PlayerAccount>>,
    /// Volatile display names, populated externally when a player connects.
    online_names: DashMap<String, String>,
    initial_balance: f64,
}

impl<B: BalanceBackend> BalanceLedger<B> {
    /// Seed the tracker from the backend's persisted state.
    pub async fn new(backend: B, initial_balance: f64) -> Result<Self, BalanceError> {
        let accounts = backend
            .load()
            .await?
            .into_iter()
            .map(|a| (a.uuid.clone(), a))
            .collect();

        Ok(Self {
            backend,
            accounts: RwLock::new(accounts),
            online_names: DashMap::new(),
            initial_balance,
        })
    }

    /// Get the account, creating it with the configured initial balance if
    /// this is the first reference.
    async fn account(&self, uuid: &str) -> Result<PlayerAccount, BalanceError> {
        {
            let accounts = self.accounts.read().await;
            if let Some(account) = accounts.get(uuid) {
                return Ok(account.clone());
            }
        }

        let account = PlayerAccount {
            uuid: uuid.to_string(),
            nick: None,
            balance: self.initial_balance,
            cash: 0,
        };

        let mut accounts = self.accounts.write().await;
        let account = accounts
            .entry(uuid.to_string())
            .or_insert(account)
            .clone();
        drop(accounts);

        self.backend.upsert(&account).await?;
        Ok(account)
    }

    async fn store(&self, account: PlayerAccount) -> Result<(), BalanceError> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.uuid.clone(), account.clone());
        drop(accounts);

        self.backend.upsert(&account).await?;
        Ok(())
    }

    pub async fn balance(&self, uuid: &str) -> Result<f64, BalanceError> {
        Ok(self.account(uuid).await?.balance)
    }

    /// Administrative assignment; the only path that may leave a negative
    /// balance.
    pub async fn set_balance(&self, uuid: &str, amount: f64) -> Result<(), BalanceError> {
        let mut account = self.account(uuid).await?;
        account.balance = amount;
        self.store(account).await
    }

    pub async fn deposit(&self, uuid: &str, amount: f64) -> Result<(), BalanceError> {
        let mut account = self.account(uuid).await?;
        account.balance += amount;
        self.store(account).await
    }

    /// Guarded subtraction: fails (returns false, no mutation) when the
    /// requested amount exceeds the current balance.
    pub async fn withdraw(&self, uuid: &str, amount: f64) -> Result<bool, BalanceError> {
        let mut account = self.account(uuid).await?;
        if amount > account.balance {
            return Ok(false);
        }
        account.balance -= amount;
        self.store(account).await?;
        Ok(true)
    }

    pub async fn cash(&self, uuid: &str) -> Result<i64, BalanceError> {
        Ok(self.account(uuid).await?.cash)
    }

    pub async fn set_cash(&self, uuid: &str, amount: i64) -> Result<(), BalanceError> {
        let mut account = self.account(uuid).await?;
        account.cash = amount;
        self.store(account).await
    }

    pub async fn deposit_cash(&self, uuid: &str, amount: i64) -> Result<(), BalanceError> {
        let mut account = self.account(uuid).await?;
        account.cash += amount;
        self.store(account).await
    }

    /// Same guard rules as `withdraw`.
    pub async fn withdraw_cash(&self, uuid: &str, amount: i64) -> Result<bool, BalanceError> {
        let mut account = self.account(uuid).await?;
        if amount > account.cash {
            return Ok(false);
        }
        account.cash -= amount;
        self.store(account).await?;
        Ok(true)
    }

    pub async fn nickname(&self, uuid: &str) -> Option<String> {
        let accounts = self.accounts.read().await;
        accounts.get(uuid).and_then(|a| a.nick.clone())
    }

    pub async fn set_nickname(&self, uuid: &str, nick: &str) -> Result<(), BalanceError> {
        let mut account = self.account(uuid).await?;
        account.nick = Some(nick.to_string());
        self.store(account).await
    }

    /// Record the currently known display name. Volatile; callers that want
    /// it to survive a restart also call `set_nickname`.
    pub fn note_online_name(&self, uuid: &str, name: &str) {
        self.online_names
            .insert(uuid.to_string(), name.to_string());
    }

    pub fn forget_online_name(&self, uuid: &str) {
        self.online_names.remove(uuid);
    }

    /// Resolution order: online cache, persisted nickname, `UNKNOWN_NAME`.
    pub async fn display_name(&self, uuid: &str) -> String {
        if let Some(name) = self.online_names.get(uuid) {
            return name.clone();
        }
        self.nickname(uuid)
            .await
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }

    /// Accounts sorted by balance descending, ties broken by uuid so the
    /// order is stable across calls.
    pub async fn top_balances(&self, limit: usize) -> Vec<PlayerAccount> {
        let accounts = self.accounts.read().await;
        let mut all: Vec<PlayerAccount> = accounts.values().cloned().collect();
        all.sort_by(|a, b| {
            b.balance
                .partial_cmp(&a.balance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.uuid.cmp(&b.uuid))
        });
        all.truncate(limit);
        all
    }

    /// 1-based position in the balance ranking, or None when the player sits
    /// below `RANK_LIMIT` (or has no account).
    pub async fn rank_of(&self, uuid: &str) -> Option<usize> {
        self.top_balances(RANK_LIMIT)
            .await
            .iter()
            .position(|a| a.uuid == uuid)
            .map(|i| i + 1)
    }

    /// Account-delete request: the row stays, balance and cash reset to
    /// zero.
    pub async fn reset_account(&self, uuid: &str) -> Result<(), BalanceError> {
        let mut account = self.account(uuid).await?;
        account.balance = 0.0;
        account.cash = 0;
        self.store(account).await
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        self.backend.flush().await
    }

    /// Final flush, then release the backend.
    pub async fn shutdown(&self) -> Result<(), StorageError> {
        self.backend.flush().await?;
        self.backend.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Simple in-memory backend for testing
    #[derive(Default)]
    struct InMemoryBalanceBackend {
        rows: Mutex<HashMap<String, PlayerAccount>>,
    }

    #[async_trait]
    impl BalanceBackend for InMemoryBalanceBackend {
        async fn load(&self) -> Result<Vec<PlayerAccount>, StorageError> {
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }

        async fn upsert(&self, account: &PlayerAccount) -> Result<(), StorageError> {
            self.rows
                .lock()
                .unwrap()
                .insert(account.uuid.clone(), account.clone());
            Ok(())
        }

        async fn flush(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    async fn ledger() -> BalanceLedger<InMemoryBalanceBackend> {
        BalanceLedger::new(InMemoryBalanceBackend::default(), 0.0)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn withdraw_requires_sufficient_balance() {
        let ledger = ledger().await;
        ledger.set_balance("a", 100.0).await.unwrap();

        // Over-withdrawal is rejected without touching the balance
        assert!(!ledger.withdraw("a", 150.0).await.unwrap());
        assert_eq!(ledger.balance("a").await.unwrap(), 100.0);

        assert!(ledger.withdraw("a", 40.0).await.unwrap());
        assert_eq!(ledger.balance("a").await.unwrap(), 60.0);
    }

    #[tokio::test]
    async fn cash_follows_the_same_guard() {
        let ledger = ledger().await;
        ledger.set_cash("a", 5).await.unwrap();

        assert!(!ledger.withdraw_cash("a", 6).await.unwrap());
        assert_eq!(ledger.cash("a").await.unwrap(), 5);

        assert!(ledger.withdraw_cash("a", 5).await.unwrap());
        assert_eq!(ledger.cash("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn accounts_created_lazily_with_initial_balance() {
        let backend = InMemoryBalanceBackend::default();
        let ledger = BalanceLedger::new(backend, 25.0).await.unwrap();

        assert_eq!(ledger.balance("fresh").await.unwrap(), 25.0);
        // First reference persisted the account
        assert_eq!(ledger.backend.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn admin_set_may_go_negative_but_deposit_restores() {
        let ledger = ledger().await;
        ledger.set_balance("a", -50.0).await.unwrap();
        assert_eq!(ledger.balance("a").await.unwrap(), -50.0);

        ledger.deposit("a", 80.0).await.unwrap();
        assert_eq!(ledger.balance("a").await.unwrap(), 30.0);
    }

    #[tokio::test]
    async fn top_balances_sorted_and_ties_stable() {
        let ledger = ledger().await;
        ledger.set_balance("c", 10.0).await.unwrap();
        ledger.set_balance("a", 50.0).await.unwrap();
        ledger.set_balance("b", 10.0).await.unwrap();

        let top = ledger.top_balances(10).await;
        let order: Vec<&str> = top.iter().map(|a| a.uuid.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        let top2 = ledger.top_balances(2).await;
        assert_eq!(top2.len(), 2);
    }

    #[tokio::test]
    async fn rank_of_returns_position_or_none() {
        let ledger = ledger().await;
        ledger.set_balance("a", 50.0).await.unwrap();
        ledger.set_balance("b", 70.0).await.unwrap();

        assert_eq!(ledger.rank_of("b").await, Some(1));
        assert_eq!(ledger.rank_of("a").await, Some(2));
        assert_eq!(ledger.rank_of("nobody").await, None);
    }

    #[tokio::test]
    async fn display_name_resolution_order() {
        let ledger = ledger().await;
        assert_eq!(ledger.display_name("a").await, UNKNOWN_NAME);

        ledger.set_nickname("a", "Stored").await.unwrap();
        assert_eq!(ledger.display_name("a").await, "Stored");

        ledger.note_online_name("a", "Online");
        assert_eq!(ledger.display_name("a").await, "Online");

        ledger.forget_online_name("a");
        assert_eq!(ledger.display_name("a").await, "Stored");
    }

    #[tokio::test]
    async fn reset_keeps_account_but_zeroes_currency() {
        let ledger = ledger().await;
        ledger.set_balance("a", 99.0).await.unwrap();
        ledger.set_cash("a", 7).await.unwrap();
        ledger.set_nickname("a", "Keep").await.unwrap();

        ledger.reset_account("a").await.unwrap();
        assert_eq!(ledger.balance("a").await.unwrap(), 0.0);
        assert_eq!(ledger.cash("a").await.unwrap(), 0);
        assert_eq!(ledger.nickname("a").await.as_deref(), Some("Keep"));
    }
}
