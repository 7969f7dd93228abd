//! Point read/write correctness through memtable rotation and flushes.

use tempfile::TempDir;

use crate::engine::tests::helpers::*;
use crate::{Error, Options, ReadOptions, WriteOptions, DB};

#[test]
fn empty_db_reads_nothing() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());
    assert_eq!(get(&db, "anything"), None);
    assert!(scan_all(&db).is_empty());
}

#[test]
fn put_get_delete() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    put(&db, "a", "1");
    put(&db, "b", "2");
    assert_eq!(get(&db, "a"), Some("1".into()));
    assert_eq!(get(&db, "b"), Some("2".into()));

    delete(&db, "a");
    assert_eq!(get(&db, "a"), None);
    assert_eq!(get(&db, "b"), Some("2".into()));

    // Deleting an absent key succeeds.
    delete(&db, "never-existed");
}

#[test]
fn overwrites_return_newest() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());
    for i in 0..50 {
        put(&db, "k", &format!("v{i}"));
    }
    assert_eq!(get(&db, "k"), Some("v49".into()));
}

#[test]
fn get_from_flushed_table() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());
    put(&db, "mem", "table");
    db.force_compact_memtable().unwrap();
    assert!(db.num_files_at_level(0) + db.num_files_at_level(1) + db.num_files_at_level(2) > 0);
    assert_eq!(get(&db, "mem"), Some("table".into()));
    assert_eq!(get(&db, "missing"), None);
}

#[test]
fn reads_hit_memtable_then_immutable_then_tables() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    put(&db, "table-key", "old");
    db.force_compact_memtable().unwrap();
    put(&db, "table-key", "new");
    assert_eq!(get(&db, "table-key"), Some("new".into()));

    // Older layers answer for keys the memtable lacks.
    put(&db, "other", "x");
    assert_eq!(get(&db, "table-key"), Some("new".into()));
}

#[test]
fn automatic_rotation_under_load() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), small_buffer_options());

    let value = "v".repeat(1000);
    for i in 0..500u32 {
        put(&db, &format!("key{:06}", i), &value);
    }
    // The 64 KiB buffer cannot hold 500 KiB; something must have hit
    // disk without any manual flush call.
    let total: usize = (0..crate::NUM_LEVELS)
        .map(|l| db.num_files_at_level(l))
        .sum();
    assert!(total > 0);

    for i in 0..500u32 {
        assert_eq!(get(&db, &format!("key{:06}", i)), Some(value.clone()));
    }
}

#[test]
fn batch_is_atomic_and_ordered() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    put(&db, "doomed", "present");
    let mut batch = crate::WriteBatch::new();
    batch.put(b"x", b"1");
    batch.delete(b"doomed");
    batch.put(b"y", b"2");
    batch.put(b"x", b"3"); // later record in the same batch wins
    db.write(&WriteOptions::default(), batch).unwrap();

    assert_eq!(get(&db, "x"), Some("3".into()));
    assert_eq!(get(&db, "y"), Some("2".into()));
    assert_eq!(get(&db, "doomed"), None);
}

#[test]
fn open_missing_db_without_create_flag_fails() {
    let dir = TempDir::new().unwrap();
    let options = Options::default(); // create_if_missing = false
    let err = DB::open(options, dir.path().join("nope")).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
}

#[test]
fn open_existing_db_with_error_if_exists_fails() {
    let dir = TempDir::new().unwrap();
    {
        let _db = open(dir.path(), default_options());
    }
    let mut options = default_options();
    options.error_if_exists = true;
    let err = DB::open(options, dir.path()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
}

#[test]
fn second_open_is_locked_out() {
    let dir = TempDir::new().unwrap();
    let _db = open(dir.path(), default_options());
    let err = DB::open(default_options(), dir.path()).unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err}");
}

#[test]
fn binary_keys_and_values() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());
    let write = WriteOptions::default();
    let read = ReadOptions::default();

    let key = vec![0x00, 0xff, 0x00, 0x01];
    let value = vec![0xde, 0xad, 0x00, 0xbe, 0xef];
    db.put(&write, &key, &value).unwrap();
    db.put(&write, b"", b"empty key").unwrap();
    db.put(&write, b"empty value", b"").unwrap();

    assert_eq!(db.get(&read, &key).unwrap(), Some(value));
    assert_eq!(db.get(&read, b"").unwrap(), Some(b"empty key".to_vec()));
    assert_eq!(db.get(&read, b"empty value").unwrap(), Some(Vec::new()));
}

#[test]
fn iterator_scans_in_order_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());

    // Interleave fresh keys with rewrites of a hot key.
    for i in 0..200u32 {
        put(&db, &format!("key{:04}", i), "cold");
        put(&db, "hot", &format!("rev{i}"));
    }
    db.force_compact_memtable().unwrap();
    for i in 200..400u32 {
        put(&db, &format!("key{:04}", i), "cold");
        put(&db, "hot", &format!("rev{i}"));
    }

    let entries = scan_all(&db);
    assert_eq!(entries.len(), 401);
    // Sorted, unique.
    for pair in entries.windows(2) {
        assert!(pair[0].0 < pair[1].0);
    }
    // The hot key shows its newest value exactly once.
    let hot: Vec<_> = entries.iter().filter(|(k, _)| k == "hot").collect();
    assert_eq!(hot.len(), 1);
    assert_eq!(hot[0].1, "rev399");
}

#[test]
fn reverse_iteration_matches_forward() {
    use crate::Iter;
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());
    for i in 0..100u32 {
        put(&db, &format!("key{:04}", i), &format!("v{i}"));
    }
    delete(&db, "key0050");

    let forward = scan_all(&db);
    let mut it = db.iter(&ReadOptions::default());
    it.seek_to_last();
    let mut backward = Vec::new();
    while it.valid() {
        backward.push((
            String::from_utf8(it.key().to_vec()).unwrap(),
            String::from_utf8(it.value().to_vec()).unwrap(),
        ));
        it.prev();
    }
    backward.reverse();
    assert_eq!(forward, backward);
    assert!(forward.iter().all(|(k, _)| k != "key0050"));
}

#[test]
fn iterator_seek_and_direction_changes() {
    use crate::Iter;
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());
    for key in ["a", "c", "e", "g"] {
        put(&db, key, &format!("v-{key}"));
    }

    let mut it = db.iter(&ReadOptions::default());
    it.seek(b"c");
    assert!(it.valid());
    assert_eq!(it.key(), b"c");
    it.seek(b"d");
    assert_eq!(it.key(), b"e");
    it.prev();
    assert_eq!(it.key(), b"c");
    it.next();
    assert_eq!(it.key(), b"e");
    it.seek(b"zzz");
    assert!(!it.valid());
}

#[test]
fn properties_respond() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), default_options());
    put(&db, "k", "v");

    assert!(db.property("stratadb.stats").is_some());
    assert!(db.property("stratadb.sstables").is_some());
    let usage: usize = db
        .property("stratadb.approximate-memory-usage")
        .unwrap()
        .parse()
        .unwrap();
    assert!(usage > 0);
    assert_eq!(db.property("stratadb.num-files-at-level0").unwrap(), "0");
    assert!(db.property("stratadb.num-files-at-level99").is_none());
    assert!(db.property("unknown.property").is_none());
}

#[test]
fn approximate_sizes_grow_with_data() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path(), small_buffer_options());
    let value = "x".repeat(10_000);
    for i in 0..80u32 {
        put(&db, &format!("key{:06}", i), &value);
    }
    db.force_compact_memtable().unwrap();

    let sizes = db.approximate_sizes(&[
        (b"key000000", b"key000079"),
        (b"zz-absent-1", b"zz-absent-2"),
    ]);
    assert!(sizes[0] > 100_000, "sizes: {sizes:?}");
    assert!(sizes[1] < 10_000, "sizes: {sizes:?}");
}
