//! Memtable add/get semantics: versions, tombstones, snapshot bounds.

use std::sync::Arc;

use crate::comparator::{BytewiseComparator, InternalKeyComparator};
use crate::key::{LookupKey, ValueType};
use crate::memtable::{MemTable, MemTableGetResult};

fn new_mem() -> MemTable {
    MemTable::new(InternalKeyComparator::new(Arc::new(BytewiseComparator)))
}

#[test]
fn add_then_get() {
    let mem = new_mem();
    mem.add(1, ValueType::Value, b"k", b"v");
    assert_eq!(
        mem.get(&LookupKey::new(b"k", 1)),
        MemTableGetResult::Put(b"v".to_vec())
    );
}

#[test]
fn missing_key_is_not_found() {
    let mem = new_mem();
    mem.add(1, ValueType::Value, b"k", b"v");
    assert_eq!(
        mem.get(&LookupKey::new(b"other", 10)),
        MemTableGetResult::NotFound
    );
    // A key that is a strict prefix of a stored key must not match.
    mem.add(2, ValueType::Value, b"prefixed", b"v2");
    assert_eq!(
        mem.get(&LookupKey::new(b"prefix", 10)),
        MemTableGetResult::NotFound
    );
}

#[test]
fn newest_version_wins() {
    let mem = new_mem();
    mem.add(1, ValueType::Value, b"k", b"v1");
    mem.add(2, ValueType::Value, b"k", b"v2");
    mem.add(3, ValueType::Value, b"k", b"v3");
    assert_eq!(
        mem.get(&LookupKey::new(b"k", 100)),
        MemTableGetResult::Put(b"v3".to_vec())
    );
}

#[test]
fn lookup_respects_snapshot_sequence() {
    let mem = new_mem();
    mem.add(10, ValueType::Value, b"k", b"v10");
    mem.add(20, ValueType::Value, b"k", b"v20");

    assert_eq!(
        mem.get(&LookupKey::new(b"k", 15)),
        MemTableGetResult::Put(b"v10".to_vec())
    );
    assert_eq!(
        mem.get(&LookupKey::new(b"k", 20)),
        MemTableGetResult::Put(b"v20".to_vec())
    );
    // Before the first write nothing is visible.
    assert_eq!(
        mem.get(&LookupKey::new(b"k", 9)),
        MemTableGetResult::NotFound
    );
}

#[test]
fn tombstone_reports_delete() {
    let mem = new_mem();
    mem.add(1, ValueType::Value, b"k", b"v");
    mem.add(2, ValueType::Deletion, b"k", b"");

    assert_eq!(mem.get(&LookupKey::new(b"k", 5)), MemTableGetResult::Delete);
    // The older value is still visible below the tombstone.
    assert_eq!(
        mem.get(&LookupKey::new(b"k", 1)),
        MemTableGetResult::Put(b"v".to_vec())
    );
}

#[test]
fn empty_keys_and_values() {
    let mem = new_mem();
    mem.add(1, ValueType::Value, b"", b"empty-key");
    mem.add(2, ValueType::Value, b"empty-value", b"");
    assert_eq!(
        mem.get(&LookupKey::new(b"", 10)),
        MemTableGetResult::Put(b"empty-key".to_vec())
    );
    assert_eq!(
        mem.get(&LookupKey::new(b"empty-value", 10)),
        MemTableGetResult::Put(b"".to_vec())
    );
}

#[test]
fn memory_usage_grows() {
    let mem = new_mem();
    assert_eq!(mem.approximate_memory_usage(), 0);
    mem.add(1, ValueType::Value, b"key", &vec![0u8; 1024]);
    let after_one = mem.approximate_memory_usage();
    assert!(after_one >= 1024);
    for seq in 2..100 {
        mem.add(seq, ValueType::Value, b"key", &vec![0u8; 1024]);
    }
    assert!(mem.approximate_memory_usage() > after_one);
}
