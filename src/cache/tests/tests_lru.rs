//! Cache behavior: hits, eviction order, pinning, charges, ids.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cache::Cache;

const CACHE_SIZE: usize = 1000;

fn key(i: u32) -> Vec<u8> {
    i.to_le_bytes().to_vec()
}

fn insert(cache: &Cache<u32>, k: u32, v: u32) {
    cache.insert(&key(k), v, 1);
}

fn get(cache: &Cache<u32>, k: u32) -> Option<u32> {
    cache.lookup(&key(k)).map(|v| *v)
}

#[test]
fn hit_and_miss() {
    let cache = Cache::new(CACHE_SIZE);
    assert_eq!(get(&cache, 100), None);

    insert(&cache, 100, 101);
    assert_eq!(get(&cache, 100), Some(101));
    assert_eq!(get(&cache, 200), None);

    insert(&cache, 200, 201);
    assert_eq!(get(&cache, 100), Some(101));
    assert_eq!(get(&cache, 200), Some(201));

    // Overwrite replaces.
    insert(&cache, 100, 102);
    assert_eq!(get(&cache, 100), Some(102));
}

#[test]
fn erase() {
    let cache = Cache::new(CACHE_SIZE);
    cache.erase(&key(200)); // absent key is a no-op

    insert(&cache, 100, 101);
    insert(&cache, 200, 201);
    cache.erase(&key(100));
    assert_eq!(get(&cache, 100), None);
    assert_eq!(get(&cache, 200), Some(201));
}

#[test]
fn recently_used_entry_survives_eviction() {
    let cache = Cache::new(CACHE_SIZE);
    insert(&cache, 1, 1);
    // Keep entry 1 hot while flooding far past capacity.
    for i in 0..(CACHE_SIZE as u32 * 2) {
        insert(&cache, 1000 + i, 2000 + i);
        assert_eq!(get(&cache, 1000 + i), Some(2000 + i));
        assert_eq!(get(&cache, 1), Some(1));
    }
    assert_eq!(get(&cache, 1), Some(1));
}

#[test]
fn usage_never_exceeds_capacity_after_insert() {
    let cache: Cache<Vec<u8>> = Cache::new(10_000);
    for i in 0..1000u32 {
        let charge = 1 + (i as usize * 37) % 500;
        cache.insert(&key(i), vec![0u8; charge], charge);
        assert!(
            cache.total_charge() <= 10_000,
            "usage {} after insert {}",
            cache.total_charge(),
            i
        );
    }
}

#[test]
fn heavy_entry_displaces_many_light_ones() {
    let cache: Cache<u32> = Cache::new(100);
    for i in 0..100u32 {
        cache.insert(&key(i), i, 1);
    }
    cache.insert(&key(9999), 1, 90);
    assert!(cache.total_charge() <= 100);
    assert_eq!(cache.lookup(&key(9999)).map(|v| *v), Some(1));
}

#[test]
fn pinned_entries_keep_their_value_after_displacement() {
    let cache: Cache<String> = Cache::new(CACHE_SIZE);
    let pinned = cache.insert(b"k", "v1".to_string(), 1);
    cache.insert(b"k", "v2".to_string(), 1);
    // The old handle still reads the old value.
    assert_eq!(*pinned, "v1");
    assert_eq!(cache.lookup(b"k").map(|v| (*v).clone()), Some("v2".into()));
}

#[test]
fn pinned_entries_are_not_evicted() {
    let cache: Cache<u32> = Cache::new(16);
    let handles: Vec<Arc<u32>> = (0..16u32).map(|i| cache.insert(&key(i), i, 1)).collect();
    // Flood: pinned entries must all remain readable.
    for i in 100..200u32 {
        cache.insert(&key(i), i, 1);
    }
    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(**handle, i as u32);
        assert_eq!(get(&cache, i as u32), Some(i as u32));
    }
}

#[test]
fn zero_capacity_disables_caching() {
    let cache: Cache<u32> = Cache::new(0);
    let handle = cache.insert(&key(1), 100, 1);
    assert_eq!(*handle, 100); // the returned handle still works
    assert_eq!(get(&cache, 1), None);
    assert_eq!(cache.total_charge(), 0);
}

#[test]
fn prune_removes_unpinned_only() {
    let cache: Cache<u32> = Cache::new(CACHE_SIZE);
    let _pinned = cache.insert(&key(1), 1, 1);
    insert(&cache, 2, 2);
    cache.prune();
    assert_eq!(get(&cache, 1), Some(1));
    assert_eq!(get(&cache, 2), None);
}

#[test]
fn value_drop_runs_on_last_release() {
    struct Tracked(Arc<AtomicUsize>);
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let cache: Cache<Tracked> = Cache::new(CACHE_SIZE);

    let handle = cache.insert(b"a", Tracked(Arc::clone(&drops)), 1);
    cache.erase(b"a");
    // Still pinned: not dropped yet.
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    drop(handle);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    cache.insert(b"b", Tracked(Arc::clone(&drops)), 1);
    cache.insert(b"b", Tracked(Arc::clone(&drops)), 1);
    // Displaced entry had no external handle: dropped immediately.
    assert_eq!(drops.load(Ordering::SeqCst), 2);
}

#[test]
fn new_ids_are_unique() {
    let cache: Cache<u32> = Cache::new(CACHE_SIZE);
    let mut seen = std::collections::HashSet::new();
    for _ in 0..1000 {
        assert!(seen.insert(cache.new_id()));
    }
}
