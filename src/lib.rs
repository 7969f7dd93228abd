//! # StrataDB
//!
//! An embeddable, persistent, ordered key-value store built on a
//! **leveled Log-Structured Merge tree**. Single writer, many readers,
//! crash-safe.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                          DB                               │
//! │  ┌────────────┐   ┌─────────────┐   ┌─────────────────┐   │
//! │  │  Active    │   │  Immutable  │   │  Tables (disk)  │   │
//! │  │  memtable  │──►│  memtable   │──►│  L0 … L6        │   │
//! │  │  + WAL     │   │             │   │                 │   │
//! │  └────────────┘   └─────────────┘   └─────────────────┘   │
//! │        ▲                 │  flush          │ compaction   │
//! │   writer queue           └─────────────────┘              │
//! │                                                           │
//! │  ┌─────────────────────────────────────────────────────┐  │
//! │  │   Manifest: versioned file sets (VersionSet)        │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | The `DB` facade: writes, reads, snapshots, iteration, background work |
//! | [`memtable`] | Arena-backed skip list absorbing fresh writes |
//! | [`log`] | Framed, checksummed record streams (WAL and manifest) |
//! | [`sstable`] | Immutable sorted tables: blocks, filters, builder, reader |
//! | [`version`] | File-set versioning, manifest log, compaction selection |
//! | [`cache`] | Sharded LRU behind the block and table caches |
//! | [`filter`] | Bloom filter policy for table filter blocks |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use stratadb::{Options, DB, WriteOptions};
//!
//! let mut options = Options::default();
//! options.create_if_missing = true;
//! let db = DB::open(options, "/tmp/my-db").unwrap();
//!
//! db.put(&WriteOptions::default(), b"hello", b"world").unwrap();
//! assert_eq!(
//!     db.get(&stratadb::ReadOptions::default(), b"hello").unwrap(),
//!     Some(b"world".to_vec())
//! );
//! db.delete(&WriteOptions::default(), b"hello").unwrap();
//! ```
//!
//! ## Guarantees
//!
//! - **Durability**: a write with `WriteOptions { sync: true }` is on
//!   stable storage before the call returns; non-sync writes survive
//!   process crashes (WAL replay) but not power loss.
//! - **Atomic batches**: all records of a [`WriteBatch`] become visible
//!   at once, with contiguous sequence numbers.
//! - **Snapshot isolation**: reads against a [`Snapshot`] see exactly
//!   the writes sequenced at or before it, forever, regardless of
//!   intervening compactions.
//! - **Ordered iteration**: full scans yield each live user key exactly
//!   once, in comparator order.

pub mod cache;
pub mod comparator;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod filter;
pub mod iterator;
pub mod key;
pub mod log;
pub mod memtable;
pub mod sstable;
pub mod version;

pub use comparator::{BytewiseComparator, Comparator};
pub use engine::batch::WriteBatch;
pub use engine::iterator::DBIterator;
pub use engine::snapshot::Snapshot;
pub use engine::{destroy_db, repair_db, DB};
pub use error::{Error, Result};
pub use filter::{BloomFilterPolicy, FilterPolicy};
pub use iterator::Iter;

use std::sync::Arc;

use cache::Cache;
use sstable::block::Block;

/// Block compression codecs. The codec byte is persisted per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Snappy = 1,
    /// Recognized in the on-disk format; reading or writing it reports
    /// [`Error::NotSupported`] in this build.
    Zstd = 2,
}

impl CompressionType {
    pub fn from_u8(byte: u8) -> Option<CompressionType> {
        match byte {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Snappy),
            2 => Some(CompressionType::Zstd),
            _ => None,
        }
    }
}

/// Number of levels in the tree.
pub const NUM_LEVELS: usize = 7;

/// Options controlling a database instance.
#[derive(Clone)]
pub struct Options {
    /// Create the database if it does not exist.
    pub create_if_missing: bool,

    /// Fail `open` if the database already exists.
    pub error_if_exists: bool,

    /// Treat recoverable corruption as fatal and verify checksums
    /// aggressively.
    pub paranoid_checks: bool,

    /// Memtable rotation threshold in bytes.
    pub write_buffer_size: usize,

    /// Budget of open file descriptors; the table cache holds this
    /// minus a small reserve.
    pub max_open_files: usize,

    /// Target uncompressed size of a table data block.
    pub block_size: usize,

    /// Keys between restart points inside a block.
    pub block_restart_interval: usize,

    /// Per-file output cap for flushes and compactions.
    pub max_file_size: usize,

    /// Codec for data blocks.
    pub compression: CompressionType,

    /// Level passed to the zstd codec when it is available; inert under
    /// the other codecs.
    pub zstd_compression_level: i32,

    /// Reuse the tail WAL and manifest on open instead of rolling new
    /// ones.
    pub reuse_logs: bool,

    /// Order over user keys. Its name is persisted; reopening with a
    /// differently-named comparator fails.
    pub comparator: Arc<dyn Comparator>,

    /// When set, tables carry per-region filters consulted on point
    /// reads.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// Shared cache of decoded data blocks. `None` gets a private
    /// 8 MiB cache at open.
    pub block_cache: Option<Arc<Cache<Block>>>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 4 * 1024 * 1024,
            max_open_files: 1000,
            block_size: 4096,
            block_restart_interval: 16,
            max_file_size: 2 * 1024 * 1024,
            compression: CompressionType::Snappy,
            zstd_compression_level: 1,
            reuse_logs: false,
            comparator: Arc::new(BytewiseComparator),
            filter_policy: None,
            block_cache: None,
        }
    }
}

fn clip<T: Ord>(value: T, min: T, max: T) -> T {
    std::cmp::min(std::cmp::max(value, min), max)
}

impl Options {
    /// Clamp out-of-range knobs and fill in the default block cache.
    pub(crate) fn sanitize(mut self) -> Options {
        self.write_buffer_size = clip(self.write_buffer_size, 64 << 10, 1 << 30);
        self.max_open_files = clip(self.max_open_files, 74, 50_000);
        self.block_size = clip(self.block_size, 1 << 10, 4 << 20);
        self.max_file_size = clip(self.max_file_size, 1 << 20, 1 << 30);
        if self.block_cache.is_none() {
            self.block_cache = Some(Arc::new(Cache::new(8 << 20)));
        }
        self
    }
}

/// Options for read operations.
#[derive(Clone)]
pub struct ReadOptions {
    /// Verify block checksums on every read.
    pub verify_checksums: bool,

    /// Whether blocks read for this operation enter the block cache.
    /// Bulk scans turn this off.
    pub fill_cache: bool,

    /// Read as of this snapshot instead of the live state.
    pub snapshot: Option<Arc<Snapshot>>,
}

impl ReadOptions {
    pub fn new() -> Self {
        ReadOptions {
            verify_checksums: false,
            fill_cache: true,
            snapshot: None,
        }
    }
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for write operations.
#[derive(Clone, Default)]
pub struct WriteOptions {
    /// Fsync the WAL before acknowledging the write.
    pub sync: bool,
}
