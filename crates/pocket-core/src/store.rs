//! Cache entry metadata and the on-disk store abstraction.
//!
//! An entry is a pair: a small textual metadata record and an opaque value
//! blob. The metadata is readable without touching the blob, which is what
//! enumeration, stats and invalidation-by-function rely on. Drivers
//! implement [`EntryStore`] in separate crates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keying::{EntryPath, Fingerprint};

//─────────────────────────────
//  Metadata record
//─────────────────────────────

/// Metadata stored beside every value blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Qualified name of the producing callable.
    pub fn_name: String,
    /// Human-readable canonical identifier of the producing call.
    pub id: String,
    /// Full fingerprint; the entry directory only carries a prefix.
    pub fingerprint: Fingerprint,
    /// Version tag of the codec that wrote the blob.
    pub encoder_version: String,
    /// Wall-clock time the entry was written.
    pub created_at: DateTime<Utc>,
    /// Human-readable rendering of each argument, in call order.
    pub args_summary: Vec<String>,
}

/// One enumerated entry: where it lives, what it describes, how big it is.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// Entry location relative to the base directory.
    pub path: EntryPath,
    /// The parsed metadata record.
    pub meta: EntryMeta,
    /// Bytes on disk for this entry (metadata file plus blob).
    pub disk_bytes: u64,
}

//─────────────────────────────
//  Store errors
//─────────────────────────────

/// Errors produced by entry store drivers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The filesystem failed underneath the driver.
    #[error("i/o failure at {path}: {detail}")]
    Io {
        /// Path the operation targeted.
        path: String,
        /// Rendered i/o failure.
        detail: String,
    },
    /// An entry exists but its metadata cannot be parsed.
    #[error("corrupt entry at {path}: {detail}")]
    Corrupt {
        /// Path of the corrupt entry.
        path: String,
        /// What failed to parse.
        detail: String,
    },
}

impl StoreError {
    /// Build an [`StoreError::Io`] from a path and any i/o failure.
    pub fn io(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Io { path: path.to_string(), detail: err.to_string() }
    }

    /// Build a [`StoreError::Corrupt`] from a path and a parse failure.
    pub fn corrupt(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Corrupt { path: path.to_string(), detail: err.to_string() }
    }
}

//─────────────────────────────
//  Store trait
//─────────────────────────────

/// Abstraction over the durable cache tier.
///
/// Writes must be atomic at entry granularity: a concurrent reader observes
/// both metadata and blob, or neither. Concurrent writers for the same entry
/// are permitted; writes are content-addressed, so last-rename-wins is
/// harmless.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Read an entry. `None` means absent, including half-written entries.
    async fn read(&self, path: &EntryPath) -> Result<Option<(EntryMeta, Vec<u8>)>, StoreError>;

    /// Durably write an entry, replacing any previous content.
    async fn write(
        &self,
        path: &EntryPath,
        meta: &EntryMeta,
        value: &[u8],
    ) -> Result<(), StoreError>;

    /// Remove an entry. Returns whether anything was removed.
    async fn delete(&self, path: &EntryPath) -> Result<bool, StoreError>;

    /// Walk all entries, optionally restricted to function-name directories
    /// starting with `fn_prefix`. Corrupt or half-written entries are
    /// skipped and reported through the observability channel, never raised.
    async fn enumerate(&self, fn_prefix: Option<&str>) -> Result<Vec<StoredEntry>, StoreError>;

    /// Remove every entry the store owns.
    async fn nuke(&self) -> Result<(), StoreError>;
}
