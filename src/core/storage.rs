// Shared storage types used by every ledger backend.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of a one-time snapshot-to-database migration.
///
/// `migrate_if_empty` returns `None` when the database already held rows and
/// nothing was copied; otherwise `Some` with per-record totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: usize,
    pub failed: usize,
}

impl MigrationReport {
    pub fn record_ok(&mut self) {
        self.migrated += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }
}
