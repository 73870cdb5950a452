//! In-process L1 tier with TTL expiry and LRU eviction

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use parking_lot::Mutex;

use super::entry::{CacheEntry, CacheValue};

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Slot>,
    /// Recency index: access tick -> key, oldest first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    /// Bumped by every put, delete and clear
    generation: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        Some(slot.entry)
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }

    fn insert(&mut self, entry: CacheEntry, capacity: usize) {
        let key = entry.key.clone();

        if self.remove(&key).is_none() && self.entries.len() >= capacity {
            if let Some(evicted) = self.evict_lru() {
                tracing::debug!(key = %short(&evicted), "memory tier evicted least recently used entry");
            }
        }

        let tick = self.bump();
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, Slot { entry, tick });
    }
}

/// Fixed-capacity key/value store guarded by a single lock
pub struct MemoryTier {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl MemoryTier {
    /// Create a tier holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the value if present and valid, refreshing its recency.
    /// Expired entries are removed as a side effect.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let mut inner = self.inner.lock();
        let expired = inner.entries.get(key)?.entry.is_expired_at(Utc::now());
        if expired {
            inner.remove(key);
            tracing::debug!(key = %short(key), "memory tier entry expired");
            return None;
        }

        let tick = inner.bump();
        let slot = inner.entries.get_mut(key)?;
        let old_tick = std::mem::replace(&mut slot.tick, tick);
        slot.entry.touch();
        let value = slot.entry.value.clone();
        inner.recency.remove(&old_tick);
        inner.recency.insert(tick, key.to_string());
        Some(value)
    }

    pub fn put(&self, key: &str, value: CacheValue, ttl_seconds: u64) {
        self.put_entry(CacheEntry::new(key, value, ttl_seconds));
    }

    /// Insert a prepared entry as-is, keeping its timestamps
    pub fn put_entry(&self, entry: CacheEntry) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.insert(entry, self.capacity);
    }

    /// Current write generation. Capture it before reading the disk tier and
    /// hand it to [`MemoryTier::promote`].
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Insert an entry read from the disk tier, unless the tier changed
    /// underneath the read.
    ///
    /// A resident entry is only replaced by a strictly newer one. An absent
    /// key is only filled if no put, delete or clear happened since
    /// `seen_generation`, so a stale read cannot shadow a newer write or bring
    /// back an invalidated key. Returns whether the entry was inserted.
    pub fn promote(&self, entry: CacheEntry, seen_generation: u64) -> bool {
        let mut inner = self.inner.lock();
        let admit = match inner.entries.get(&entry.key) {
            Some(slot) => slot.entry.created_at < entry.created_at,
            None => inner.generation == seen_generation,
        };
        if admit {
            inner.insert(entry, self.capacity);
        }
        admit
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.remove(key).is_some()
    }

    /// Remove everything, returning how many entries were dropped
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        let count = inner.entries.len();
        inner.entries.clear();
        inner.recency.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a valid entry exists, without affecting recency
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|slot| !slot.entry.is_expired_at(Utc::now()))
            .unwrap_or(false)
    }

    /// Snapshot of an entry's metadata, without affecting recency
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.inner.lock().entries.get(key).map(|slot| slot.entry.clone())
    }

    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }
}

pub(crate) fn short(key: &str) -> &str {
    key.get(..16).unwrap_or(key)
}
