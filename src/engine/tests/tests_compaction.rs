//! Flush and compaction behavior observable through the public surface.

use tempfile::TempDir;

use crate::engine::tests::helpers::*;
use crate::{ReadOptions, NUM_LEVELS};

fn total_files(db: &crate::DB) -> usize {
    (0..NUM_LEVELS).map(|l| db.num_files_at_level(l)).sum()
}

#[test]
fn manual_flush_creates_a_young_table() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());
    for i in 0..100u32 {
        put(&db, &format!("key{:04}", i), "value");
    }
    assert_eq!(total_files(&db), 0);
    db.force_compact_memtable().unwrap();
    assert!(total_files(&db) >= 1);
    // A fresh flush with no overlap may be placed below level 0, but
    // never deeper than the memtable-output ceiling.
    for level in 3..NUM_LEVELS {
        assert_eq!(db.num_files_at_level(level), 0);
    }
}

#[test]
fn compact_range_collapses_levels() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), small_buffer_options());
    let value = "v".repeat(1000);
    for i in 0..300u32 {
        put(&db, &format!("key{:06}", i), &value);
    }
    db.force_compact_memtable().unwrap();
    db.compact_range(None, None).unwrap();

    // Everything still readable after the dust settles.
    for i in 0..300u32 {
        assert_eq!(get(&db, &format!("key{:06}", i)), Some(value.clone()));
    }
    // A full-range compaction leaves level 0 empty.
    assert_eq!(db.num_files_at_level(0), 0);
}

#[test]
fn deleted_keys_stay_deleted_through_compactions() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    for i in 0..100u32 {
        put(&db, &format!("key{:04}", i), "v");
    }
    db.force_compact_memtable().unwrap();
    for i in 0..100u32 {
        if i % 2 == 0 {
            delete(&db, &format!("key{:04}", i));
        }
    }
    db.compact_range(None, None).unwrap();
    db.compact_range(None, None).unwrap();

    for i in 0..100u32 {
        let expected = if i % 2 == 0 { None } else { Some("v".into()) };
        assert_eq!(get(&db, &format!("key{:04}", i)), expected, "key {i}");
    }
}

#[test]
fn old_value_never_resurfaces_after_tombstone_compacts() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    put(&db, "k", "old");
    db.force_compact_memtable().unwrap();
    delete(&db, "k");
    db.force_compact_memtable().unwrap();
    db.compact_range(None, None).unwrap();
    assert_eq!(get(&db, "k"), None);

    // Another round, after the tombstone itself may have been dropped.
    db.compact_range(None, None).unwrap();
    assert_eq!(get(&db, "k"), None);

    // Reopen: disk state must agree.
    drop(db);
    let db = open(dir.path(), default_options());
    assert_eq!(get(&db, "k"), None);
}

#[test]
fn manual_compaction_pushes_a_lone_file_down() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    for i in 0..100u32 {
        put(&db, &format!("key{:04}", i), "value");
    }
    db.force_compact_memtable().unwrap();
    let level = (0..NUM_LEVELS)
        .find(|&l| db.num_files_at_level(l) == 1)
        .unwrap();

    db.compact_range_level(level, None, None).unwrap();
    assert_eq!(db.num_files_at_level(level), 0);
    assert_eq!(db.num_files_at_level(level + 1), 1);

    for i in 0..100u32 {
        assert_eq!(get(&db, &format!("key{:04}", i)), Some("value".into()));
    }
}

#[test]
fn level0_overlaps_resolve_newest_first() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    // Stack flushes so later ones overlap earlier levels and are
    // forced into level 0.
    put(&db, "a", "1");
    put(&db, "h", "old");
    db.force_compact_memtable().unwrap();
    put(&db, "h", "mid");
    put(&db, "z", "1");
    db.force_compact_memtable().unwrap();
    put(&db, "h", "new");
    db.force_compact_memtable().unwrap();
    put(&db, "h", "newest");
    db.force_compact_memtable().unwrap();
    assert!(db.num_files_at_level(0) >= 2, "setup failed to stack L0");

    assert_eq!(get(&db, "h"), Some("newest".into()));

    // And after merging everything down, still exactly one "h".
    db.compact_range(None, None).unwrap();
    assert_eq!(get(&db, "h"), Some("newest".into()));
    let entries = scan_all(&db);
    assert_eq!(entries.iter().filter(|(k, _)| k == "h").count(), 1);
    assert_eq!(
        entries.iter().find(|(k, _)| k == "h").map(|(_, v)| v.as_str()),
        Some("newest")
    );
}

#[test]
fn compaction_preserves_data_under_heavy_load() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), small_buffer_options());
    let value = "x".repeat(600);

    for round in 0..4u32 {
        for i in 0..400u32 {
            put(&db, &format!("key{:06}", i), &format!("{value}-{round}"));
        }
    }
    db.compact_range(None, None).unwrap();

    for i in 0..400u32 {
        assert_eq!(
            get(&db, &format!("key{:06}", i)),
            Some(format!("{value}-3")),
            "key {i}"
        );
    }
    assert_eq!(scan_all(&db).len(), 400);
}

#[test]
fn range_bounded_compaction_leaves_rest_alone() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), small_buffer_options());
    let value = "y".repeat(500);
    for i in 0..300u32 {
        put(&db, &format!("key{:06}", i), &value);
    }
    db.force_compact_memtable().unwrap();

    db.compact_range(Some(b"key000050"), Some(b"key000100"))
        .unwrap();
    for i in 0..300u32 {
        assert_eq!(get(&db, &format!("key{:06}", i)), Some(value.clone()));
    }
}

#[test]
fn iterators_pin_tables_across_compactions() {
    use crate::Iter;
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    for i in 0..100u32 {
        put(&db, &format!("key{:04}", i), "before");
    }
    db.force_compact_memtable().unwrap();

    let mut it = db.iter(&ReadOptions::default());
    it.seek_to_first();
    // Rewrite everything and compact while the iterator is live.
    for i in 0..100u32 {
        put(&db, &format!("key{:04}", i), "after");
    }
    db.compact_range(None, None).unwrap();

    let mut count = 0;
    while it.valid() {
        assert_eq!(it.value(), b"before");
        count += 1;
        it.next();
    }
    assert_eq!(count, 100);
}
