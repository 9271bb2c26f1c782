//! Bounded key/value map with TTL expiry and policy-driven eviction.
//!
//! Size bounds come from the map's [`MapCacheConfig`]:
//!
//! | max size policy | bound                          |
//! |-----------------|--------------------------------|
//! | `PER_NODE`      | `max_size` entries             |
//! | `PER_PARTITION` | `max_size * PARTITION_COUNT`   |
//! | heap-based      | unbounded (not enforced here)  |
//!
//! A `max_size` of zero means unbounded. With eviction policy `NONE` the
//! map never evicts and grows past its bound.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use beacon_core::{EvictionPolicy, MapCacheConfig, MaxSizePolicy};
use serde_json::Value;
use tracing::{debug, warn};

/// Partitions per runtime, used to scale `PER_PARTITION` bounds.
pub const PARTITION_COUNT: usize = 271;

/// Hit/miss/eviction counters for one map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct Entry {
    value: Value,
    inserted_at: Instant,
    /// Tick of insertion; key into `Store::by_insert`.
    seq: u64,
    /// Tick of the last insert or read.
    last_access: u64,
    hits: u64,
    /// Position in `Store::slots`.
    slot: usize,
}

impl Entry {
    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.duration_since(self.inserted_at) > ttl)
    }
}

/// Entries plus the indexes eviction and expiry walk.
///
/// Every key in `entries` appears exactly once in each index. Ticks are
/// unique, so ranks never collide.
struct Store {
    entries: HashMap<String, Entry>,
    /// Eviction order, lowest rank first.
    by_rank: BTreeMap<(u64, u64), String>,
    /// Insertion order. The TTL is fixed per map, so this is also expiry order.
    by_insert: BTreeMap<u64, String>,
    /// Keys in no particular order, for random victims.
    slots: Vec<String>,
    lfu: bool,
    tick: u64,
    stats: MapStats,
}

impl Store {
    fn new(policy: EvictionPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            by_rank: BTreeMap::new(),
            by_insert: BTreeMap::new(),
            slots: Vec::new(),
            lfu: policy == EvictionPolicy::Lfu,
            tick: 0,
            stats: MapStats::default(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn insert(&mut self, key: String, value: Value, now: Instant) {
        let tick = self.next_tick();
        let entry = Entry {
            value,
            inserted_at: now,
            seq: tick,
            last_access: tick,
            hits: 0,
            slot: self.slots.len(),
        };
        self.slots.push(key.clone());
        self.by_rank.insert(rank(self.lfu, &entry), key.clone());
        self.by_insert.insert(tick, key.clone());
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.by_rank.remove(&rank(self.lfu, &entry));
        self.by_insert.remove(&entry.seq);

        self.slots.swap_remove(entry.slot);
        if let Some(moved) = self.slots.get(entry.slot) {
            if let Some(moved) = self.entries.get_mut(moved) {
                moved.slot = entry.slot;
            }
        }
        Some(entry)
    }

    /// Record a read of `key` and return its value.
    fn touch(&mut self, key: &str) -> Option<Value> {
        let tick = self.next_tick();
        let lfu = self.lfu;
        let entry = self.entries.get_mut(key)?;

        let rank_key = self.by_rank.remove(&rank(lfu, entry));
        entry.last_access = tick;
        entry.hits += 1;
        if let Some(rank_key) = rank_key {
            self.by_rank.insert(rank(lfu, entry), rank_key);
        }
        Some(entry.value.clone())
    }

    /// Drop expired entries, oldest first, stopping at the first live one.
    fn purge_expired(&mut self, ttl: Option<Duration>, now: Instant) {
        if ttl.is_none() {
            return;
        }
        while let Some((_, key)) = self.by_insert.first_key_value() {
            let expired = self
                .entries
                .get(key)
                .is_none_or(|entry| entry.is_expired(ttl, now));
            if !expired {
                break;
            }
            let key = key.clone();
            self.remove(&key);
            self.stats.expirations += 1;
        }
    }

    fn lowest_rank(&self) -> Option<String> {
        self.by_rank.first_key_value().map(|(_, key)| key.clone())
    }

    fn random_key(&self) -> Option<String> {
        if self.slots.is_empty() {
            return None;
        }
        let mut buf = [0u8; 8];
        if let Err(e) = getrandom::getrandom(&mut buf) {
            warn!(error = %e, "getrandom failed; falling back to LRU eviction");
            return self.lowest_rank();
        }
        let index = (u64::from_le_bytes(buf) % self.slots.len() as u64) as usize;
        self.slots.get(index).cloned()
    }
}

/// LRU ranks by last access; LFU by hit count, ties broken by last access.
fn rank(lfu: bool, entry: &Entry) -> (u64, u64) {
    if lfu {
        (entry.hits, entry.last_access)
    } else {
        (entry.last_access, 0)
    }
}

/// One named map inside a [`crate::LocalRuntime`].
///
/// Internally synchronized; share it behind an `Arc`.
pub struct LocalMap {
    config: Arc<MapCacheConfig>,
    ttl: Option<Duration>,
    capacity: Option<usize>,
    store: Mutex<Store>,
}

impl LocalMap {
    pub fn new(config: Arc<MapCacheConfig>) -> Self {
        let capacity = capacity_for(&config);
        if !config.max_size_policy.is_entry_count() {
            warn!(
                map = %config.id,
                policy = %config.max_size_policy,
                "heap-based max size policy is not enforced; map is unbounded"
            );
        }

        Self {
            ttl: config.ttl(),
            capacity,
            store: Mutex::new(Store::new(config.eviction_policy)),
            config,
        }
    }

    #[cfg(test)]
    fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &Arc<MapCacheConfig> {
        &self.config
    }

    /// Maximum number of live entries, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Insert or replace `key`, returning the previous live value.
    pub fn put(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        let now = Instant::now();
        let mut store = self.store.lock().expect("map store lock");

        let previous = store
            .remove(&key)
            .filter(|old| !old.is_expired(self.ttl, now))
            .map(|old| old.value);

        if previous.is_none() {
            store.purge_expired(self.ttl, now);
            if let Some(capacity) = self.capacity {
                if self.config.eviction_policy != EvictionPolicy::None {
                    while store.entries.len() >= capacity && !store.entries.is_empty() {
                        self.evict_one(&mut store);
                    }
                }
            }
        }

        store.insert(key, value, now);
        previous
    }

    /// Live value for `key`. Expired entries are removed eagerly.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut store = self.store.lock().expect("map store lock");

        let expired = match store.entries.get(key) {
            Some(entry) => entry.is_expired(self.ttl, now),
            None => {
                store.stats.misses += 1;
                return None;
            }
        };
        if expired {
            store.remove(key);
            store.stats.expirations += 1;
            store.stats.misses += 1;
            debug!(map = %self.config.id, key, "entry expired");
            return None;
        }

        store.stats.hits += 1;
        store.touch(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut store = self.store.lock().expect("map store lock");
        store
            .remove(key)
            .filter(|entry| !entry.is_expired(self.ttl, now))
            .map(|entry| entry.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        let store = self.store.lock().expect("map store lock");
        store
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(self.ttl, now))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut store = self.store.lock().expect("map store lock");
        store.purge_expired(self.ttl, now);
        store.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MapStats {
        self.store.lock().expect("map store lock").stats
    }

    fn evict_one(&self, store: &mut Store) {
        let victim = match self.config.eviction_policy {
            EvictionPolicy::Lru | EvictionPolicy::Lfu => store.lowest_rank(),
            EvictionPolicy::Random => store.random_key(),
            EvictionPolicy::None => None,
        };

        if let Some(key) = victim {
            store.remove(&key);
            store.stats.evictions += 1;
            debug!(
                map = %self.config.id,
                policy = %self.config.eviction_policy,
                evicted = %key,
                evictions = store.stats.evictions,
                "evicted entry"
            );
        }
    }
}

fn capacity_for(config: &MapCacheConfig) -> Option<usize> {
    if config.max_size == 0 {
        return None;
    }
    let max_size = config.max_size as usize;
    match config.max_size_policy {
        MaxSizePolicy::PerNode => Some(max_size),
        MaxSizePolicy::PerPartition => Some(max_size.saturating_mul(PARTITION_COUNT)),
        _ => None,
    }
}
