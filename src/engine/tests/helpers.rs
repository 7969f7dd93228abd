//! Shared scaffolding for engine tests.

use std::path::Path;

use crate::{CompressionType, Options, ReadOptions, WriteOptions, DB};

/// Options sized so tests can force flushes with little data.
pub fn small_buffer_options() -> Options {
    let mut options = Options::default();
    options.create_if_missing = true;
    // The sanitizer clamps to 64 KiB, the smallest legal buffer.
    options.write_buffer_size = 64 * 1024;
    options.compression = CompressionType::None;
    options
}

pub fn default_options() -> Options {
    let mut options = Options::default();
    options.create_if_missing = true;
    options
}

pub fn open(path: &Path, options: Options) -> DB {
    DB::open(options, path).unwrap()
}

pub fn put(db: &DB, key: &str, value: &str) {
    db.put(&WriteOptions::default(), key.as_bytes(), value.as_bytes())
        .unwrap();
}

pub fn delete(db: &DB, key: &str) {
    db.delete(&WriteOptions::default(), key.as_bytes()).unwrap();
}

pub fn get(db: &DB, key: &str) -> Option<String> {
    db.get(&ReadOptions::default(), key.as_bytes())
        .unwrap()
        .map(|v| String::from_utf8(v).unwrap())
}

/// Collect the full forward scan as (key, value) strings.
pub fn scan_all(db: &DB) -> Vec<(String, String)> {
    use crate::Iter;
    let mut it = db.iter(&ReadOptions::default());
    it.seek_to_first();
    let mut out = Vec::new();
    while it.valid() {
        out.push((
            String::from_utf8(it.key().to_vec()).unwrap(),
            String::from_utf8(it.value().to_vec()).unwrap(),
        ));
        it.next();
    }
    it.status().unwrap();
    out
}
