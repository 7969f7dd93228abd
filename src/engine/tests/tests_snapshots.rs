//! Snapshot isolation, including across flushes and compactions.

use tempfile::TempDir;

use crate::engine::tests::helpers::*;
use crate::{Iter, ReadOptions};

fn get_at(db: &crate::DB, snapshot: &std::sync::Arc<crate::Snapshot>, key: &str) -> Option<String> {
    let mut read = ReadOptions::default();
    read.snapshot = Some(std::sync::Arc::clone(snapshot));
    db.get(&read, key.as_bytes())
        .unwrap()
        .map(|v| String::from_utf8(v).unwrap())
}

#[test]
fn snapshot_pins_point_reads() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    put(&db, "k", "v1");
    let snap = db.snapshot();
    put(&db, "k", "v2");

    assert_eq!(get_at(&db, &snap, "k"), Some("v1".into()));
    assert_eq!(get(&db, "k"), Some("v2".into()));
    db.release_snapshot(snap);
}

#[test]
fn snapshot_hides_later_deletes() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    put(&db, "k", "v1");
    let snap = db.snapshot();
    delete(&db, "k");

    assert_eq!(get_at(&db, &snap, "k"), Some("v1".into()));
    assert_eq!(get(&db, "k"), None);
    db.release_snapshot(snap);
}

#[test]
fn snapshot_survives_full_compaction() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    put(&db, "k", "v1");
    let snap = db.snapshot();
    delete(&db, "k");

    // Push everything through flush and a full manual compaction.
    db.compact_range(None, None).unwrap();

    assert_eq!(get_at(&db, &snap, "k"), Some("v1".into()));
    assert_eq!(get(&db, "k"), None);

    // Once released, the next full compaction may collect the value;
    // the live view must be unchanged either way.
    db.release_snapshot(snap);
    db.compact_range(None, None).unwrap();
    assert_eq!(get(&db, "k"), None);
}

#[test]
fn snapshot_iterators_see_frozen_state() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    for i in 0..50u32 {
        put(&db, &format!("key{:03}", i), "before");
    }
    let snap = db.snapshot();
    for i in 0..50u32 {
        put(&db, &format!("key{:03}", i), "after");
    }
    for i in 50..80u32 {
        put(&db, &format!("key{:03}", i), "after");
    }
    delete(&db, "key000");

    let mut read = ReadOptions::default();
    read.snapshot = Some(std::sync::Arc::clone(&snap));
    let mut it = db.iter(&read);
    it.seek_to_first();
    let mut count = 0;
    while it.valid() {
        assert_eq!(it.value(), b"before");
        count += 1;
        it.next();
    }
    assert_eq!(count, 50);
    db.release_snapshot(snap);
}

#[test]
fn stacked_snapshots_resolve_independently() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    put(&db, "k", "v1");
    let s1 = db.snapshot();
    put(&db, "k", "v2");
    let s2 = db.snapshot();
    put(&db, "k", "v3");

    assert_eq!(get_at(&db, &s1, "k"), Some("v1".into()));
    assert_eq!(get_at(&db, &s2, "k"), Some("v2".into()));
    assert_eq!(get(&db, "k"), Some("v3".into()));

    // Release out of order.
    db.release_snapshot(s1);
    assert_eq!(get_at(&db, &s2, "k"), Some("v2".into()));
    db.release_snapshot(s2);
}
