//! Concurrent key/value store with per-entry expiry.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// How long a record set into a [`CacheStore`] stays visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Use the store's default TTL (which may itself be "never").
    Default,
    /// Keep the record until it is deleted or replaced.
    Never,
    /// Expire the record once this much time has passed.
    After(Duration),
}

#[derive(Debug)]
struct Record<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Record<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A thread-safe key/value store whose records may expire.
///
/// Backed by a sharded [`DashMap`], so readers only contend with writers that
/// hash to the same shard, and no lock is held once a call returns. Expired
/// records are invisible to [`get`](Self::get) immediately and are physically
/// purged lazily on access or by the sweeper started with
/// [`spawn_sweeper`](Self::spawn_sweeper).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use starmap::cache::{CacheStore, Expiration};
///
/// let store = CacheStore::new(Some(Duration::from_secs(300)));
/// store.set("GET/ping", 1u32, Expiration::Never);
/// assert_eq!(store.get("GET/ping"), Some(1));
///
/// store.delete("GET/ping");
/// assert_eq!(store.get("GET/ping"), None);
/// ```
#[derive(Debug)]
pub struct CacheStore<V> {
    records: DashMap<String, Record<V>>,
    default_ttl: Option<Duration>,
}

impl<V: Clone> CacheStore<V> {
    /// Creates an empty store. `default_ttl` is what [`Expiration::Default`]
    /// resolves to; `None` means such records never expire.
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self {
            records: DashMap::new(),
            default_ttl,
        }
    }

    fn expiry(&self, expiration: Expiration) -> Option<Instant> {
        let ttl = match expiration {
            Expiration::Default => self.default_ttl?,
            Expiration::Never => return None,
            Expiration::After(ttl) => ttl,
        };
        Some(Instant::now() + ttl)
    }

    /// Returns a clone of the live value stored under `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let record = self.records.get(key)?;
        if !record.is_expired(now) {
            return Some(record.value.clone());
        }

        // Release the shard read lock before taking the write lock.
        drop(record);
        self.records.remove_if(key, |_, record| record.is_expired(now));
        None
    }

    /// Stores `value` under `key`, replacing any previous record.
    pub fn set(&self, key: impl Into<String>, value: V, expiration: Expiration) {
        let record = Record {
            value,
            expires_at: self.expiry(expiration),
        };
        self.records.insert(key.into(), record);
    }

    /// Stores `value` only if `key` holds no live record.
    ///
    /// The check and the insert happen under the same shard lock, so of any
    /// number of concurrent callers for one key exactly one gets `true`.
    pub fn add(&self, key: impl Into<String>, value: V, expiration: Expiration) -> bool {
        let record = Record {
            value,
            expires_at: self.expiry(expiration),
        };
        match self.records.entry(key.into()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(Instant::now()) {
                    return false;
                }
                occupied.insert(record);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                true
            }
        }
    }

    /// Removes the record under `key`. Returns `true` if one was present.
    pub fn delete(&self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    /// Purges every expired record, returning how many were removed.
    pub fn delete_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.records.retain(|_, record| {
            let keep = !record.is_expired(now);
            if !keep {
                purged += 1;
            }
            keep
        });
        purged
    }

    /// Number of stored records, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<V> CacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Starts a background task that calls [`delete_expired`](Self::delete_expired)
    /// every `interval`.
    ///
    /// The task only holds a weak reference and exits on the first tick after
    /// the last `Arc` to the store is dropped. Must be called from within a
    /// Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero; [`CacheConfig::validate`](super::CacheConfig::validate)
    /// rejects such configurations up front.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("cache store dropped; sweeper exiting");
                    break;
                };
                let purged = store.delete_expired();
                if purged > 0 {
                    debug!(purged, remaining = store.len(), "swept expired cache records");
                }
            }
        })
    }
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new(None)
    }
}
