// Periodic snapshot flusher.
//
// The scheduler is the sole writer of the snapshot files: every other code
// path only mutates in-memory trackers and dirty flags. It is a cancellable
// task rather than a detached sleep loop so shutdown can stop it
// deterministically and run one last flush afterwards.

use crate::core::balance::{BalanceBackend, BalanceLedger};
use crate::core::player_shop::{PlayerShopBackend, PlayerShopInventory};
use crate::core::shop::{ShopBackend, ShopInventory};
use crate::core::storage::StorageError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Anything the scheduler flushes on its tick. Flushing is cheap on a clean
/// snapshot backend and a no-op on the relational one.
#[async_trait]
pub trait Flushable: Send + Sync {
    fn label(&self) -> &'static str;

    async fn flush(&self) -> Result<(), StorageError>;
}

#[async_trait]
impl<B: BalanceBackend> Flushable for BalanceLedger<B> {
    fn label(&self) -> &'static str {
        "balances"
    }

    async fn flush(&self) -> Result<(), StorageError> {
        BalanceLedger::flush(self).await
    }
}

#[async_trait]
impl<B: ShopBackend> Flushable for ShopInventory<B> {
    fn label(&self) -> &'static str {
        "shop"
    }

    async fn flush(&self) -> Result<(), StorageError> {
        ShopInventory::flush(self).await
    }
}

#[async_trait]
impl<B: PlayerShopBackend> Flushable for PlayerShopInventory<B> {
    fn label(&self) -> &'static str {
        "player_shops"
    }

    async fn flush(&self) -> Result<(), StorageError> {
        PlayerShopInventory::flush(self).await
    }
}

pub struct FlushScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FlushScheduler {
    pub fn start(targets: Vec<Arc<dyn Flushable>>, period: Duration) -> Self {
        let (shutdown, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of an interval fires immediately; harmless, the
            // trackers are still clean.
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for target in &targets {
                            if let Err(err) = target.flush().await {
                                tracing::error!(ledger = target.label(), "periodic flush failed: {err}");
                            }
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("flush task stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the task and wait for it to finish, bounded so shutdown can
    /// never hang on it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .is_err()
        {
            tracing::warn!("flush task did not stop within 5s, abandoning it");
        }
    }
}
