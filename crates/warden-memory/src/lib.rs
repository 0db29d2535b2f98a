//! `warden-memory` – Durable State.
//!
//! SQLite-backed implementations of the kernel's persistence seams.
//!
//! # Modules
//!
//! - [`reputation_ledger`] – [`SqliteReputationLedger`][reputation_ledger::SqliteReputationLedger]:
//!   the cross-run agent reputation counters, updated with commutative
//!   increments inside a single-writer transaction.
//! - [`shard_vault`] – [`SqliteShardVault`][shard_vault::SqliteShardVault]:
//!   sealed shards and sub-agent outputs, with tombstoning discard and
//!   `secure_delete` so wiped rows are overwritten on disk.
//! - [`deferred_queue`] – [`SqliteDeferredQueue`][deferred_queue::SqliteDeferredQueue]:
//!   notarization requests whose retries were exhausted, kept for a later
//!   replay.

pub mod deferred_queue;
pub mod reputation_ledger;
pub mod shard_vault;

pub use deferred_queue::{DeferredEntry, DeferredQueue, SqliteDeferredQueue};
pub use reputation_ledger::SqliteReputationLedger;
pub use shard_vault::SqliteShardVault;

use thiserror::Error;
use warden_types::WardenError;

/// Errors raised by the SQLite stores.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("Connection lock poisoned")]
    Poisoned,
}

impl From<StorageError> for WardenError {
    fn from(err: StorageError) -> Self {
        WardenError::Storage(err.to_string())
    }
}
