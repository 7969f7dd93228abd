//! Memtable iteration: internal-key order, seeks, reverse walks.

use std::sync::Arc;

use crate::comparator::{BytewiseComparator, InternalKeyComparator};
use crate::iterator::Iter;
use crate::key::{parse_internal_key, InternalKey, ValueType};
use crate::memtable::MemTable;

fn new_mem() -> Arc<MemTable> {
    Arc::new(MemTable::new(InternalKeyComparator::new(Arc::new(
        BytewiseComparator,
    ))))
}

#[test]
fn scan_returns_internal_key_order() {
    let mem = new_mem();
    mem.add(3, ValueType::Value, b"b", b"b3");
    mem.add(1, ValueType::Value, b"a", b"a1");
    mem.add(2, ValueType::Value, b"b", b"b2");
    mem.add(4, ValueType::Deletion, b"c", b"");

    let mut it = mem.iter();
    it.seek_to_first();

    // (a,1,Value), (b,3,Value), (b,2,Value), (c,4,Deletion)
    let expected = [
        (b"a".as_ref(), 1u64, ValueType::Value, b"a1".as_ref()),
        (b"b", 3, ValueType::Value, b"b3"),
        (b"b", 2, ValueType::Value, b"b2"),
        (b"c", 4, ValueType::Deletion, b""),
    ];
    for (user_key, seq, vt, value) in expected {
        assert!(it.valid());
        let parsed = parse_internal_key(it.key()).unwrap();
        assert_eq!(parsed.user_key, user_key);
        assert_eq!(parsed.sequence, seq);
        assert_eq!(parsed.value_type, vt);
        assert_eq!(it.value(), value);
        it.next();
    }
    assert!(!it.valid());
}

#[test]
fn seek_by_internal_key() {
    let mem = new_mem();
    mem.add(5, ValueType::Value, b"apple", b"1");
    mem.add(6, ValueType::Value, b"banana", b"2");

    let mut it = mem.iter();
    // Seeking at a high sequence lands on the newest version.
    it.seek(InternalKey::new(b"banana", 100, ValueType::Value).encoded());
    assert!(it.valid());
    let parsed = parse_internal_key(it.key()).unwrap();
    assert_eq!(parsed.user_key, b"banana");
    assert_eq!(parsed.sequence, 6);

    // Seeking below the stored sequence skips to the next user key.
    it.seek(InternalKey::new(b"apple", 4, ValueType::Value).encoded());
    assert!(it.valid());
    assert_eq!(parse_internal_key(it.key()).unwrap().user_key, b"banana");
}

#[test]
fn reverse_walk() {
    let mem = new_mem();
    for (seq, key) in [(1u64, b"a"), (2, b"b"), (3, b"c")] {
        mem.add(seq, ValueType::Value, key, b"v");
    }
    let mut it = mem.iter();
    it.seek_to_last();
    let mut got = Vec::new();
    while it.valid() {
        got.push(parse_internal_key(it.key()).unwrap().user_key.to_vec());
        it.prev();
    }
    assert_eq!(got, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn iterator_keeps_memtable_alive() {
    let mem = new_mem();
    mem.add(1, ValueType::Value, b"k", b"v");
    let mut it = mem.iter();
    drop(mem);
    it.seek_to_first();
    assert!(it.valid());
    assert_eq!(it.value(), b"v");
}
