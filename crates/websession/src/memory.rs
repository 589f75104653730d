//! In-memory [`SessionStore`] with LRU eviction, eager expiry and
//! pessimistic transactions.
//!
//! Records are kept serialized so that every write goes through the same
//! encoding a networked cache would use, and compare-and-swap compares the
//! encoded state.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::MemoryStoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::record::SessionRecord;
use crate::store::{AtomicityMode, CacheDescriptor, SessionStore, StoreTransaction};

/// Stored value with its expiry deadline.
#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(bytes: Vec<u8>, expiry: Option<Duration>) -> Self {
        Self {
            bytes,
            expires_at: expiry.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

struct StoreInner {
    entries: Mutex<LruCache<String, Entry>>,
    locks: Mutex<HashMap<String, KeyLock>>,
}

impl StoreInner {
    /// Live entry for `id`, dropping it first if it has expired.
    fn live_entry(&self, id: &str) -> Option<Entry> {
        let mut entries = self.entries.lock();
        if entries.peek(id)?.is_expired(Instant::now()) {
            debug!(session_id = %id, "Entry expired, removing from store");
            entries.pop(id);
            return None;
        }
        entries.get(id).cloned()
    }

    fn write(&self, id: &str, entry: Entry) {
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(id.to_string(), entry)
            && evicted != id
        {
            debug!(session_id = %evicted, "Evicting LRU entry to make room");
        }
    }

    fn key_lock(&self, id: &str) -> KeyLock {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Forget per-key locks nobody holds or waits on.
    fn prune_locks<'a>(&self, ids: impl Iterator<Item = &'a str>) {
        let mut locks = self.locks.lock();
        for id in ids {
            if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(id);
            }
        }
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            entries.pop(id);
        }
        expired.len()
    }
}

fn decode(bytes: &[u8]) -> StoreResult<SessionRecord> {
    Ok(serde_json::from_slice(bytes)?)
}

fn encode(record: &SessionRecord) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

/// Single-process session store.
///
/// Cloning shares the same underlying entries.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
    descriptor: CacheDescriptor,
    config: MemoryStoreConfig,
}

impl MemoryStore {
    pub fn new(descriptor: CacheDescriptor, config: MemoryStoreConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);

        Self {
            inner: Arc::new(StoreInner {
                entries: Mutex::new(LruCache::new(cap)),
                locks: Mutex::new(HashMap::new()),
            }),
            descriptor,
            config,
        }
    }

    /// Store with default settings for the given atomicity.
    pub fn with_atomicity(atomicity: AtomicityMode) -> Self {
        Self::new(
            CacheDescriptor::default().with_atomicity(atomicity),
            MemoryStoreConfig::default(),
        )
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let count = self.inner.purge_expired();
        if count > 0 {
            debug!(count = count, "Purged expired sessions");
        }
        count
    }

    /// Spawn a task that purges expired entries every `sweep_interval`.
    ///
    /// The task ends once every clone of the store has been dropped.
    pub fn spawn_expiry_reaper(&self) -> JoinHandle<()> {
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let count = inner.purge_expired();
                if count > 0 {
                    trace!(count = count, "Expiry reaper removed sessions");
                }
            }
        })
    }

    pub fn stats(&self) -> StoreStats {
        let entries = self.inner.entries.lock();
        StoreStats {
            size: entries.len(),
            capacity: self.config.max_entries,
            expiring: entries.iter().filter(|(_, e)| e.expires_at.is_some()).count(),
        }
    }

    /// Remove a record regardless of expiry.
    pub fn evict(&self, id: &str) -> bool {
        self.inner.entries.lock().pop(id).is_some()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    fn descriptor(&self) -> &CacheDescriptor {
        &self.descriptor
    }

    async fn get(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        self.inner
            .live_entry(id)
            .map(|entry| decode(&entry.bytes))
            .transpose()
    }

    async fn put_if_absent(
        &self,
        record: &SessionRecord,
        expiry: Option<Duration>,
    ) -> StoreResult<Option<SessionRecord>> {
        let bytes = encode(record)?;
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();

        if let Some(existing) = entries.get(&record.id)
            && !existing.is_expired(now)
        {
            return decode(&existing.bytes).map(Some);
        }

        entries.push(record.id.clone(), Entry::new(bytes, expiry));
        trace!(session_id = %record.id, cache_size = entries.len(), "Record installed");
        Ok(None)
    }

    async fn replace(
        &self,
        current: &SessionRecord,
        updated: &SessionRecord,
        expiry: Option<Duration>,
    ) -> StoreResult<bool> {
        let bytes = encode(updated)?;
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();

        // Compare decoded state: re-encoding `current` is not guaranteed to
        // reproduce the stored bytes for every float.
        let stored = match entries.get(&current.id) {
            Some(entry) if !entry.is_expired(now) => decode(&entry.bytes)?,
            _ => return Ok(false),
        };
        if stored != *current {
            return Ok(false);
        }

        entries.push(updated.id.clone(), Entry::new(bytes, expiry));
        Ok(true)
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        if self.descriptor.atomicity != AtomicityMode::Transactional {
            return Err(StoreError::TransactionsUnsupported);
        }
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            guards: HashMap::new(),
            reads: HashMap::new(),
            writes: HashMap::new(),
        }))
    }
}

/// Transaction over a [`MemoryStore`].
///
/// Each key is locked on first access; reads are cached so the transaction
/// sees its own writes and a stable snapshot of everything else.
struct MemoryTransaction {
    inner: Arc<StoreInner>,
    guards: HashMap<String, OwnedMutexGuard<()>>,
    reads: HashMap<String, Option<SessionRecord>>,
    writes: HashMap<String, (Vec<u8>, Option<Duration>)>,
}

impl MemoryTransaction {
    async fn lock(&mut self, id: &str) {
        if self.guards.contains_key(id) {
            return;
        }
        // Declared before the acquire so a cancelled wait drops its handle
        // on the lock first, then prunes.
        let _waiting = PendingLock {
            inner: Arc::clone(&self.inner),
            id: id.to_string(),
        };
        let guard = self.inner.key_lock(id).lock_owned().await;
        trace!(session_id = %id, "Key locked");
        self.guards.insert(id.to_string(), guard);
    }

    fn stage(&mut self, record: &SessionRecord, expiry: Option<Duration>) -> StoreResult<()> {
        let bytes = encode(record)?;
        self.writes.insert(record.id.clone(), (bytes, expiry));
        self.reads.insert(record.id.clone(), Some(record.clone()));
        Ok(())
    }

    fn release(&mut self) {
        let keys: Vec<String> = self.guards.keys().cloned().collect();
        self.guards.clear();
        self.inner.prune_locks(keys.iter().map(String::as_str));
    }
}

/// Prunes a key's lock when a wait for it ends, acquired or not.
///
/// Once acquired the guard keeps the lock alive, so the prune is a no-op.
struct PendingLock {
    inner: Arc<StoreInner>,
    id: String,
}

impl Drop for PendingLock {
    fn drop(&mut self) {
        self.inner.prune_locks(std::iter::once(self.id.as_str()));
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, id: &str) -> StoreResult<Option<SessionRecord>> {
        self.lock(id).await;
        if let Some(cached) = self.reads.get(id) {
            return Ok(cached.clone());
        }

        let record = self
            .inner
            .live_entry(id)
            .map(|entry| decode(&entry.bytes))
            .transpose()?;
        self.reads.insert(id.to_string(), record.clone());
        Ok(record)
    }

    async fn put_if_absent(
        &mut self,
        record: &SessionRecord,
        expiry: Option<Duration>,
    ) -> StoreResult<Option<SessionRecord>> {
        if let Some(existing) = self.get(&record.id).await? {
            return Ok(Some(existing));
        }
        self.stage(record, expiry)?;
        Ok(None)
    }

    async fn put(&mut self, record: &SessionRecord, expiry: Option<Duration>) -> StoreResult<()> {
        self.lock(&record.id).await;
        self.stage(record, expiry)
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let writes = std::mem::take(&mut self.writes);
        let count = writes.len();
        for (id, (bytes, expiry)) in writes {
            // Expiry counts from the moment the write becomes visible.
            self.inner.write(&id, Entry::new(bytes, expiry));
        }
        self.release();
        trace!(writes = count, "Transaction committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        let discarded = self.writes.len();
        self.writes.clear();
        self.release();
        trace!(writes = discarded, "Transaction rolled back");
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.release();
    }
}

/// Store statistics.
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Current number of entries, including expired ones not yet purged.
    pub size: usize,

    /// Maximum capacity.
    pub capacity: usize,

    /// Number of entries with an expiry deadline.
    pub expiring: usize,
}
