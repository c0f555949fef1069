use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Lifetime used by `set` when no TTL is given.
/// Five minutes keeps list screens snappy without serving noticeably stale patches.
pub const DEFAULT_TTL_SECONDS: i64 = 300;

/// Soft cap on live entries before the cache starts evicting early.
pub const DEFAULT_MAX_ENTRIES: usize = 500;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    /// Maximum number of entries (0 = unlimited)
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::seconds(DEFAULT_TTL_SECONDS),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Time-expiring object cache keyed by string.
///
/// Values are type-erased; callers read them back with the type they stored.
/// Every operation takes the single internal lock, so a read overlapping a
/// write sees either the old or the new entry, never a mix.
///
/// Callers must tolerate a miss on any key at any time: once the store holds
/// `max_entries` entries, inserting a new key evicts expired entries and then,
/// if needed, the entry closest to expiry.
pub struct CacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl CacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, CacheConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            config,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        // Entries are only ever inserted or removed whole, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under `key` for the default TTL, replacing any existing entry.
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.set_with_ttl(key, value, self.config.default_ttl);
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// A zero or negative TTL stores an entry that is already expired on the next read.
    pub fn set_with_ttl<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let key = key.into();
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl.max(Duration::zero()))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut entries = self.lock();
        if !entries.contains_key(&key) {
            self.make_room(&mut entries, now);
        }
        entries.insert(
            key,
            CacheEntry {
                value: Arc::new(value),
                expires_at,
            },
        );
    }

    fn make_room(&self, entries: &mut HashMap<String, CacheEntry>, now: DateTime<Utc>) {
        let max = self.config.max_entries;
        if max == 0 || entries.len() < max {
            return;
        }

        entries.retain(|_, entry| !entry.is_expired(now));

        while entries.len() >= max {
            let soonest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(key, _)| key.clone());
            match soonest {
                Some(key) => {
                    debug!(key = %key, "Evicting cache entry to stay under capacity");
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Shared handle to the live value under `key`.
    ///
    /// Returns `None` if the key is absent, expired (the entry is evicted), or
    /// holds a value of a different type.
    pub fn get_shared<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let now = self.clock.now();
        let mut entries = self.lock();

        let entry = entries.get(key)?;
        if entry.is_expired(now) {
            debug!(key = %key, "Cache entry expired");
            entries.remove(key);
            return None;
        }

        match Arc::clone(&entry.value).downcast::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                debug!(key = %key, "Cache entry holds a different type");
                None
            }
        }
    }

    /// Clone of the live value under `key`. See `get_shared`.
    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        self.get_shared::<T>(key).map(|value| T::clone(&value))
    }

    /// Whether a live (unexpired) entry exists under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.lock()
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Remove the entry under `key`. No-op if absent.
    pub fn remove(&self, key: &str) {
        if self.lock().remove(key).is_some() {
            debug!(key = %key, "Removed cache entry");
        }
    }

    /// Remove every entry regardless of expiry.
    pub fn clear(&self) {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        debug!(count, "Cleared response cache");
    }

    /// Drop all expired entries now instead of waiting for them to be read.
    /// Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock().values().filter(|entry| !entry.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
