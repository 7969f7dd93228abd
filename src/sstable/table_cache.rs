//! Cache of open tables, keyed by file number.
//!
//! Point reads and iterators go through here so a hot table's footer,
//! index, and filter are parsed once. Capacity is the open-file budget;
//! each entry charges one slot. Evicted-but-in-use tables stay open
//! until their last iterator drops.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::Cache;
use crate::comparator::InternalKeyComparator;
use crate::encoding::put_fixed64;
use crate::engine::filename::{sst_table_file_name, table_file_name};
use crate::error::{Error, Result};
use crate::iterator::{EmptyIterator, Iter};
use crate::sstable::Table;
use crate::{Options, ReadOptions};

pub struct TableCache {
    db_path: PathBuf,
    options: Options,
    icmp: InternalKeyComparator,
    cache: Cache<Table>,
}

impl TableCache {
    pub fn new(
        db_path: PathBuf,
        options: Options,
        icmp: InternalKeyComparator,
        entries: usize,
    ) -> TableCache {
        TableCache {
            db_path,
            options,
            icmp,
            cache: Cache::new(entries),
        }
    }

    /// Open (or fetch the open handle of) table `file_number`.
    pub fn find_table(&self, file_number: u64, file_size: u64) -> Result<Arc<Table>> {
        let mut key = Vec::with_capacity(8);
        put_fixed64(&mut key, file_number);
        if let Some(table) = self.cache.lookup(&key) {
            return Ok(table);
        }

        let path = table_file_name(&self.db_path, file_number);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(_) => {
                // Fall back to the legacy table name.
                File::open(sst_table_file_name(&self.db_path, file_number))
                    .map_err(|_| Error::Io(format!("missing table file {}", path.display())))?
            }
        };
        let table = Table::open(self.options.clone(), self.icmp.clone(), file, file_size)?;
        Ok(self.cache.insert(&key, table, 1))
    }

    /// Point lookup inside table `file_number`. Returns the entry at
    /// the first internal key ≥ the probe, if any.
    pub fn get(
        &self,
        read_options: &ReadOptions,
        file_number: u64,
        file_size: u64,
        internal_key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let table = self.find_table(file_number, file_size)?;
        table.internal_get(read_options, internal_key)
    }

    /// Iterator over table `file_number`; errors surface as an empty
    /// iterator carrying the status.
    pub fn new_iterator(
        &self,
        read_options: &ReadOptions,
        file_number: u64,
        file_size: u64,
    ) -> Box<dyn Iter> {
        match self.find_table(file_number, file_size) {
            Ok(table) => table.iter(read_options),
            Err(e) => Box::new(EmptyIterator::with_error(e)),
        }
    }

    /// Drop the cached handle; called right before the file is
    /// unlinked.
    pub fn evict(&self, file_number: u64) {
        let mut key = Vec::with_capacity(8);
        put_fixed64(&mut key, file_number);
        self.cache.erase(&key);
    }
}
