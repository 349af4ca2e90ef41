//! Size- and time-bounded associative cache with per-key single-flight
//! loading.
//!
//! Concurrent loads of one key issue at most one underlying fetch: the
//! first caller takes the key's flight lock and loads, later callers
//! queue on the same lock and find the freshly inserted value when they
//! re-check. A waiter whose future is dropped simply releases its queue
//! position; it never poisons the others. Failures are not cached.
//!
//! Eviction is opportunistic: expired entries are discovered lazily on
//! access and swept when the size bound trips, which evicts the least
//! recently touched entries. Removal causes are reported to an optional
//! listener. No lock is ever held across I/O.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use mc_domain::bundle::Target;
use mc_domain::error::Result;
use mc_domain::settings::Settings;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keys, causes, stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cache key for one persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocKey {
    pub target: Target,
    pub id: String,
}

impl DocKey {
    pub fn new(target: Target, id: impl Into<String>) -> Self {
        Self {
            target,
            id: id.into(),
        }
    }
}

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    Expired,
    Size,
    Explicit,
    Replaced,
}

/// Listener notified for every removal.
pub type RemovalListener<K> = Arc<dyn Fn(&K, RemovalCause) + Send + Sync>;

/// Counter snapshot. All zero when stats recording is off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

/// Bounds and toggles for one cache instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl: Option<Duration>,
    pub tti: Option<Duration>,
    pub record_stats: bool,
}

impl CacheConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let secs = |n: u64| (n > 0).then(|| Duration::from_secs(n));
        Self {
            max_size: settings.cache_max_size.max(1),
            ttl: secs(settings.cache_ttl_seconds),
            tti: secs(settings.cache_idle_seconds),
            record_stats: settings.cache_record_stats,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            ttl: Some(Duration::from_secs(600)),
            tti: None,
            record_stats: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Entry<V> {
    value: V,
    written: Instant,
    touched: Instant,
}

pub struct Cache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    flights: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
    config: CacheConfig,
    listener: Option<RemovalListener<K>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            config,
            listener: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_listener(mut self, listener: RemovalListener<K>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Look up without loading. Counts neither hit nor miss.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.find(key, false)
    }

    /// Hit-or-load. The loader runs under the key's flight lock; callers
    /// that arrive while it runs wait and then take the inserted value.
    pub async fn get_with<F, Fut>(&self, key: K, load: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.find(&key, true) {
            return Ok(value);
        }

        let gate = self
            .flights
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = gate.lock().await;

        // Double check: the flight that held the lock before us loaded it.
        if let Some(value) = self.find(&key, false) {
            drop(guard);
            self.release_flight(&key);
            return Ok(value);
        }

        let result = load().await;
        if let Ok(value) = &result {
            self.insert(key.clone(), value.clone());
        }
        drop(guard);
        self.release_flight(&key);
        result
    }

    pub fn insert(&self, key: K, value: V) {
        let mut removed = Vec::new();
        {
            let mut entries = self.entries.lock();
            let now = Instant::now();
            let previous = entries.insert(
                key.clone(),
                Entry {
                    value,
                    written: now,
                    touched: now,
                },
            );
            if previous.is_some() {
                removed.push((key.clone(), RemovalCause::Replaced));
            }
            if entries.len() > self.config.max_size {
                self.sweep(&mut entries, now, &mut removed);
            }
        }
        self.notify(removed);
    }

    pub fn invalidate(&self, key: &K) -> bool {
        let hit = self.entries.lock().remove(key).is_some();
        if hit {
            self.bump(&self.evictions);
            self.notify(vec![(key.clone(), RemovalCause::Explicit)]);
        }
        hit
    }

    pub fn invalidate_all(&self) {
        let drained: Vec<K> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(k, _)| k).collect()
        };
        self.evictions
            .fetch_add(self.stat_count(drained.len() as u64), Ordering::Relaxed);
        self.notify(
            drained
                .into_iter()
                .map(|k| (k, RemovalCause::Explicit))
                .collect(),
        );
    }

    /// Remove every entry whose key matches the predicate.
    pub fn invalidate_matching(&self, matches: impl Fn(&K) -> bool) {
        let drained: Vec<K> = {
            let mut entries = self.entries.lock();
            let keys: Vec<K> = entries.keys().filter(|k| matches(k)).cloned().collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };
        self.evictions
            .fetch_add(self.stat_count(drained.len() as u64), Ordering::Relaxed);
        self.notify(
            drained
                .into_iter()
                .map(|k| (k, RemovalCause::Explicit))
                .collect(),
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    // ── internals ────────────────────────────────────────────────────

    fn find(&self, key: &K, count: bool) -> Option<V> {
        let mut expired = None;
        let found = {
            let mut entries = self.entries.lock();
            let now = Instant::now();
            match entries.get_mut(key) {
                Some(entry) if self.expired(entry, now) => {
                    entries.remove(key);
                    expired = Some(key.clone());
                    None
                }
                Some(entry) => {
                    entry.touched = now;
                    Some(entry.value.clone())
                }
                None => None,
            }
        };
        if let Some(key) = expired {
            self.bump(&self.evictions);
            self.notify(vec![(key, RemovalCause::Expired)]);
        }
        if count {
            match found.is_some() {
                true => self.bump(&self.hits),
                false => self.bump(&self.misses),
            }
        }
        found
    }

    fn expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        if let Some(ttl) = self.config.ttl {
            if now.duration_since(entry.written) >= ttl {
                return true;
            }
        }
        if let Some(tti) = self.config.tti {
            if now.duration_since(entry.touched) >= tti {
                return true;
            }
        }
        false
    }

    /// Bring the map back under the size bound: expired entries first,
    /// then least-recently-touched.
    fn sweep(
        &self,
        entries: &mut HashMap<K, Entry<V>>,
        now: Instant,
        removed: &mut Vec<(K, RemovalCause)>,
    ) {
        let stale: Vec<K> = entries
            .iter()
            .filter(|(_, e)| self.expired(e, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            entries.remove(&key);
            self.bump(&self.evictions);
            removed.push((key, RemovalCause::Expired));
        }
        while entries.len() > self.config.max_size {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.touched)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    entries.remove(&key);
                    self.bump(&self.evictions);
                    removed.push((key, RemovalCause::Size));
                }
                None => break,
            }
        }
    }

    fn release_flight(&self, key: &K) {
        let mut flights = self.flights.lock();
        if let Some(gate) = flights.get(key) {
            // Map slot + our clone and nobody else queued: retire it.
            if Arc::strong_count(gate) <= 2 {
                flights.remove(key);
            }
        }
    }

    fn bump(&self, counter: &AtomicU64) {
        if self.config.record_stats {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn stat_count(&self, n: u64) -> u64 {
        if self.config.record_stats {
            n
        } else {
            0
        }
    }

    fn notify(&self, removed: Vec<(K, RemovalCause)>) {
        if let Some(listener) = &self.listener {
            for (key, cause) in &removed {
                listener(key, *cause);
            }
        }
    }
}
