//! Sharded, capacity-bounded LRU cache.
//!
//! One instance backs the block cache (decoded data blocks, charged by
//! byte size) and another the table cache (open table handles, charged
//! one per entry). The key space is split across 16 shards, each behind
//! its own mutex, so block loads on different shards never contend.
//!
//! Entries are pinned by the `Arc` handles returned from
//! [`Cache::insert`] and [`Cache::lookup`]. Eviction only removes
//! entries whose sole owner is the cache itself; a pinned entry that is
//! erased or displaced keeps serving its holders and is dropped on last
//! release, running any cleanup its type carries.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const NUM_SHARD_BITS: usize = 4;
const NUM_SHARDS: usize = 1 << NUM_SHARD_BITS;

struct Entry<T> {
    value: Arc<T>,
    charge: usize,
    tick: u64,
}

struct Shard<T> {
    table: HashMap<Vec<u8>, Entry<T>>,
    /// Recency order: oldest tick first.
    recency: BTreeMap<u64, Vec<u8>>,
    next_tick: u64,
    usage: usize,
    capacity: usize,
}

impl<T> Shard<T> {
    fn new(capacity: usize) -> Self {
        Shard {
            table: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            usage: 0,
            capacity,
        }
    }

    fn touch(&mut self, key: &[u8]) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.table.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_vec());
        }
    }

    fn remove_entry(&mut self, key: &[u8]) -> Option<Arc<T>> {
        let entry = self.table.remove(key)?;
        self.recency.remove(&entry.tick);
        self.usage -= entry.charge;
        Some(entry.value)
    }

    /// Evict oldest unpinned entries until usage fits capacity.
    fn evict_to_capacity(&mut self) {
        while self.usage > self.capacity {
            let victim = self
                .recency
                .iter()
                .find(|(_, key)| {
                    // Pinned entries (live client handles) stay resident.
                    Arc::strong_count(&self.table[*key].value) == 1
                })
                .map(|(_, key)| key.clone());
            match victim {
                Some(key) => {
                    self.remove_entry(&key);
                }
                None => break,
            }
        }
    }
}

pub struct Cache<T> {
    shards: Vec<Mutex<Shard<T>>>,
    next_id: AtomicU64,
}

impl<T> Cache<T> {
    /// A cache that holds up to `capacity` units of charge. Zero
    /// disables retention entirely.
    pub fn new(capacity: usize) -> Self {
        let per_shard = (capacity + NUM_SHARDS - 1) / NUM_SHARDS;
        Cache {
            shards: (0..NUM_SHARDS)
                .map(|_| Mutex::new(Shard::new(per_shard)))
                .collect(),
            next_id: AtomicU64::new(1),
        }
    }

    fn shard_for(&self, key: &[u8]) -> &Mutex<Shard<T>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let shard = (hasher.finish() >> (64 - NUM_SHARD_BITS)) as usize;
        &self.shards[shard]
    }

    /// Insert, displacing any equal-keyed entry, and return a pinned
    /// handle. The cache holds `usage ≤ capacity` over unpinned entries
    /// when this returns.
    pub fn insert(&self, key: &[u8], value: T, charge: usize) -> Arc<T> {
        let value = Arc::new(value);
        let mut shard = self.shard_for(key).lock().unwrap();
        if shard.capacity == 0 {
            // Caching disabled: hand the value straight back.
            return value;
        }
        shard.remove_entry(key);
        let tick = shard.next_tick;
        shard.next_tick += 1;
        shard.table.insert(
            key.to_vec(),
            Entry {
                value: Arc::clone(&value),
                charge,
                tick,
            },
        );
        shard.recency.insert(tick, key.to_vec());
        shard.usage += charge;
        shard.evict_to_capacity();
        value
    }

    /// Look up and pin. Refreshes the entry's recency.
    pub fn lookup(&self, key: &[u8]) -> Option<Arc<T>> {
        let mut shard = self.shard_for(key).lock().unwrap();
        let value = shard.table.get(key).map(|e| Arc::clone(&e.value))?;
        shard.touch(key);
        Some(value)
    }

    /// Drop the entry for `key`, if any. Holders of live handles keep
    /// the value alive until they release it.
    pub fn erase(&self, key: &[u8]) {
        let mut shard = self.shard_for(key).lock().unwrap();
        shard.remove_entry(key);
    }

    /// Drop every unpinned entry.
    pub fn prune(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            let victims: Vec<Vec<u8>> = shard
                .recency
                .values()
                .filter(|key| Arc::strong_count(&shard.table[*key].value) == 1)
                .cloned()
                .collect();
            for key in victims {
                shard.remove_entry(&key);
            }
        }
    }

    /// Combined charge of all resident entries.
    pub fn total_charge(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap().usage)
            .sum()
    }

    /// A fresh identifier, used to namespace block-cache keys per open
    /// table.
    pub fn new_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}
