//! Cache client interface consumed by the engine.
//!
//! The engine never talks to a concrete cache. Anything that offers per-key
//! get, put-if-absent and compare-and-swap with per-write expiry can back it;
//! transactional caches additionally hand out [`StoreTransaction`]s.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::record::SessionRecord;

/// Atomicity the cache was configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomicityMode {
    /// Independent per-key operations.
    #[default]
    Atomic,
    /// Pessimistic, repeatable-read transactions are available.
    Transactional,
}

/// When a write is acknowledged to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteSyncMode {
    /// After every owning node applied it.
    #[default]
    FullSync,
    /// After the primary node applied it.
    PrimarySync,
    /// Immediately, without waiting for any node.
    FullAsync,
}

/// How entries are distributed across the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Single node, no replication.
    Local,
    /// Every node holds every entry.
    Replicated,
    /// Entries are split across nodes.
    #[default]
    Partitioned,
}

/// Static configuration of a cache, as reported by the cache itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDescriptor {
    /// Cache name; `None` is the default cache.
    pub name: Option<String>,
    pub atomicity: AtomicityMode,
    pub write_sync: WriteSyncMode,
    /// Whether expired entries are removed eagerly.
    pub eager_ttl: bool,
    pub mode: CacheMode,
}

impl Default for CacheDescriptor {
    fn default() -> Self {
        Self {
            name: None,
            atomicity: AtomicityMode::Atomic,
            write_sync: WriteSyncMode::FullSync,
            eager_ttl: true,
            mode: CacheMode::Partitioned,
        }
    }
}

impl CacheDescriptor {
    /// Name for log and error messages.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<default>")
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_atomicity(mut self, atomicity: AtomicityMode) -> Self {
        self.atomicity = atomicity;
        self
    }

    pub fn with_write_sync(mut self, write_sync: WriteSyncMode) -> Self {
        self.write_sync = write_sync;
        self
    }

    pub fn with_eager_ttl(mut self, eager_ttl: bool) -> Self {
        self.eager_ttl = eager_ttl;
        self
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Cluster-wide key/value cache holding session records.
///
/// `expiry` is always relative to the write: `Some(d)` expires the entry `d`
/// after this write, `None` never expires it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Configuration the cache was started with.
    fn descriptor(&self) -> &CacheDescriptor;

    /// Read the current record for `id`.
    async fn get(&self, id: &str) -> StoreResult<Option<SessionRecord>>;

    /// Install `record` unless a record for its id exists.
    ///
    /// Returns the existing record when one was already installed, in which
    /// case nothing is written.
    async fn put_if_absent(
        &self,
        record: &SessionRecord,
        expiry: Option<Duration>,
    ) -> StoreResult<Option<SessionRecord>>;

    /// Compare-and-swap: install `updated` only if the stored record still
    /// equals `current`. Returns whether the write happened.
    async fn replace(
        &self,
        current: &SessionRecord,
        updated: &SessionRecord,
        expiry: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Start a pessimistic, repeatable-read transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Err(StoreError::TransactionsUnsupported)
    }
}

/// A pessimistic, repeatable-read transaction over a [`SessionStore`].
///
/// Keys are locked on first access and stay locked until the transaction
/// ends. Dropping an uncommitted transaction discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Lock `id` and read it; repeated reads return the same value.
    async fn get(&mut self, id: &str) -> StoreResult<Option<SessionRecord>>;

    /// Install `record` unless a record for its id exists.
    async fn put_if_absent(
        &mut self,
        record: &SessionRecord,
        expiry: Option<Duration>,
    ) -> StoreResult<Option<SessionRecord>>;

    /// Write `record` unconditionally.
    async fn put(&mut self, record: &SessionRecord, expiry: Option<Duration>) -> StoreResult<()>;

    /// Apply all writes and release locks.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard all writes and release locks.
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_descriptor_is_usable() {
        let descriptor = CacheDescriptor::default();
        assert_eq!(descriptor.atomicity, AtomicityMode::Atomic);
        assert_eq!(descriptor.write_sync, WriteSyncMode::FullSync);
        assert!(descriptor.eager_ttl);
        assert_eq!(descriptor.display_name(), "<default>");
    }

    #[test]
    fn test_modes_use_snake_case() {
        let json = serde_json::to_string(&WriteSyncMode::FullAsync).unwrap();
        assert_eq!(json, "\"full_async\"");
        let mode: AtomicityMode = serde_json::from_str("\"transactional\"").unwrap();
        assert_eq!(mode, AtomicityMode::Transactional);
    }
}
