#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pocket-store-memory** – In-memory cache tier for Pocket.
//!
//! A bounded map from fingerprint to computed value with a swappable
//! eviction policy. Eviction is decided at insert and lookup time only;
//! there is no background thread, which keeps the concurrency model trivial.
//! All data is lost when the process terminates; durability is the disk
//! tier's job.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tokio::sync::Mutex;
use tracing::debug;

use pocket_core::{Fingerprint, Value};

//─────────────────────────────
//  Eviction policies
//─────────────────────────────

/// How the memory store decides what to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Drop the least recently accessed entry once `capacity` is exceeded.
    Lru {
        /// Maximum number of live entries.
        capacity: usize,
    },
    /// Drop the oldest inserted entry once `capacity` is exceeded.
    Fifo {
        /// Maximum number of live entries.
        capacity: usize,
    },
    /// Drop entries older than `ttl`, lazily, on access.
    Ttl {
        /// Time from last write after which an entry is stale.
        ttl: Duration,
    },
}

struct MemEntry {
    value: Value,
    written_at: Instant,
}

//─────────────────────────────
//  Memory store
//─────────────────────────────

/// A bounded, policy-evicted map from fingerprint to computed value.
///
/// A cached nil is a present entry like any other; presence in the map is
/// the sentinel, never value nullability. Replacing the policy means
/// building a new store, so a policy change is always an atomic reset.
pub struct MemoryStore {
    policy: EvictionPolicy,
    entries: Mutex<IndexMap<Fingerprint, MemEntry>>,
}

impl MemoryStore {
    /// Create an empty store under the given eviction policy.
    pub fn new(policy: EvictionPolicy) -> Self {
        Self { policy, entries: Mutex::new(IndexMap::new()) }
    }

    /// The policy this store was built with.
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Look up a value, applying policy bookkeeping.
    ///
    /// Under LRU the entry becomes most recently used; under TTL a stale
    /// entry is dropped and reported as a miss.
    pub async fn lookup(&self, fp: &Fingerprint) -> Option<Value> {
        let mut entries = self.entries.lock().await;
        match self.policy {
            EvictionPolicy::Ttl { ttl } => {
                if entries.get(fp).is_some_and(|e| e.written_at.elapsed() > ttl) {
                    entries.shift_remove(fp);
                    debug!(fingerprint = %fp.prefix(8), "memory entry expired");
                    return None;
                }
                entries.get(fp).map(|e| e.value.clone())
            }
            EvictionPolicy::Lru { .. } => {
                // Move to the back of the insertion order on access.
                let entry = entries.shift_remove(fp)?;
                let value = entry.value.clone();
                entries.insert(*fp, entry);
                Some(value)
            }
            EvictionPolicy::Fifo { .. } => entries.get(fp).map(|e| e.value.clone()),
        }
    }

    /// Insert or replace a value, then evict per policy.
    pub async fn insert(&self, fp: Fingerprint, value: Value) {
        let mut entries = self.entries.lock().await;
        let entry = MemEntry { value, written_at: Instant::now() };
        match self.policy {
            EvictionPolicy::Lru { capacity } => {
                entries.shift_remove(&fp);
                entries.insert(fp, entry);
                while entries.len() > capacity {
                    if let Some((evicted, _)) = entries.shift_remove_index(0) {
                        debug!(fingerprint = %evicted.prefix(8), "memory entry evicted (lru)");
                    }
                }
            }
            EvictionPolicy::Fifo { capacity } => {
                // Re-inserting does not refresh the insertion position.
                entries.insert(fp, entry);
                while entries.len() > capacity {
                    if let Some((evicted, _)) = entries.shift_remove_index(0) {
                        debug!(fingerprint = %evicted.prefix(8), "memory entry evicted (fifo)");
                    }
                }
            }
            EvictionPolicy::Ttl { ttl } => {
                entries.insert(fp, entry);
                entries.retain(|_, e| e.written_at.elapsed() <= ttl);
            }
        }
    }

    /// Remove one entry. Returns whether it was present.
    pub async fn remove(&self, fp: &Fingerprint) -> bool {
        self.entries.lock().await.shift_remove(fp).is_some()
    }

    /// Empty the store, keeping the policy.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Presence check without policy bookkeeping. Diagnostic only.
    pub async fn contains(&self, fp: &Fingerprint) -> bool {
        self.entries.lock().await.contains_key(fp)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("policy", &self.policy).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(n: u8) -> Fingerprint {
        Fingerprint::from_canonical(&format!("entry-{n}"))
    }

    #[tokio::test]
    async fn lru_evicts_least_recently_used() {
        let store = MemoryStore::new(EvictionPolicy::Lru { capacity: 2 });
        store.insert(fp(1), Value::Int(1)).await;
        store.insert(fp(2), Value::Int(2)).await;

        // Touch entry 1 so entry 2 becomes the eviction candidate.
        assert_eq!(store.lookup(&fp(1)).await, Some(Value::Int(1)));
        store.insert(fp(3), Value::Int(3)).await;

        assert!(store.contains(&fp(1)).await);
        assert!(!store.contains(&fp(2)).await);
        assert!(store.contains(&fp(3)).await);
    }

    #[tokio::test]
    async fn fifo_evicts_oldest_insertion_regardless_of_access() {
        let store = MemoryStore::new(EvictionPolicy::Fifo { capacity: 2 });
        store.insert(fp(1), Value::Int(1)).await;
        store.insert(fp(2), Value::Int(2)).await;

        // Access does not refresh FIFO order.
        assert_eq!(store.lookup(&fp(1)).await, Some(Value::Int(1)));
        store.insert(fp(3), Value::Int(3)).await;

        assert!(!store.contains(&fp(1)).await);
        assert!(store.contains(&fp(2)).await);
        assert!(store.contains(&fp(3)).await);
    }

    #[tokio::test]
    async fn ttl_expires_entries_lazily() {
        let store = MemoryStore::new(EvictionPolicy::Ttl { ttl: Duration::from_millis(30) });
        store.insert(fp(1), Value::Int(1)).await;
        assert_eq!(store.lookup(&fp(1)).await, Some(Value::Int(1)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.lookup(&fp(1)).await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn cached_nil_is_a_present_entry() {
        let store = MemoryStore::new(EvictionPolicy::Lru { capacity: 4 });
        store.insert(fp(1), Value::Nil).await;
        assert_eq!(store.lookup(&fp(1)).await, Some(Value::Nil));
        assert!(store.contains(&fp(1)).await);
    }

    #[tokio::test]
    async fn clear_empties_but_keeps_policy() {
        let store = MemoryStore::new(EvictionPolicy::Lru { capacity: 2 });
        store.insert(fp(1), Value::Int(1)).await;
        store.clear().await;
        assert!(store.is_empty().await);
        assert_eq!(store.policy(), EvictionPolicy::Lru { capacity: 2 });
    }
}
