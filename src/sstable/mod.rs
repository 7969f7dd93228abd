//! Immutable sorted tables.
//!
//! A table is a sorted run of internal-key → value entries, laid out as
//! prefix-compressed blocks with an index block locating them, an
//! optional filter block for cheap negative point lookups, and a fixed
//! footer. Once the builder closes a table it never changes, so readers
//! share it freely.
//!
//! Reads go through two caches: the table cache (file number → open
//! [`Table`]) and the block cache (table id + block offset → decoded
//! [`Block`]).

pub mod block;
pub mod builder;
pub mod filter_block;
pub mod format;
pub mod table_cache;


pub use builder::TableBuilder;
pub use table_cache::TableCache;

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use crate::comparator::{BytewiseComparator, InternalKeyComparator};
use crate::encoding::put_fixed64;
use crate::error::{Error, Result};
use crate::iterator::{Iter, TwoLevelIterator};
use crate::sstable::block::Block;
use crate::sstable::filter_block::FilterBlockReader;
use crate::sstable::format::{read_block, BlockHandle, Footer, FOOTER_ENCODED_LENGTH};
use crate::{Options, ReadOptions};

/// An open, immutable table file.
pub struct Table {
    options: Options,
    icmp: InternalKeyComparator,
    file: Arc<File>,
    /// Namespaces this table's blocks inside the shared block cache.
    cache_id: u64,
    index_block: Arc<Block>,
    filter: Option<FilterBlockReader>,
    /// Where the meta blocks begin, i.e. where the data blocks end.
    metaindex_offset: u64,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").finish_non_exhaustive()
    }
}

impl Table {
    /// Open a table of `size` bytes. The footer and index block are
    /// read eagerly; the filter block is read too (it is small) but a
    /// broken filter only disables filtering.
    pub fn open(
        options: Options,
        icmp: InternalKeyComparator,
        file: File,
        size: u64,
    ) -> Result<Table> {
        if (size as usize) < FOOTER_ENCODED_LENGTH {
            return Err(Error::corruption("file is too short to be a table"));
        }
        let mut footer_bytes = vec![0u8; FOOTER_ENCODED_LENGTH];
        file.read_exact_at(&mut footer_bytes, size - FOOTER_ENCODED_LENGTH as u64)?;
        let footer = Footer::decode_from(&footer_bytes)?;

        let verify = options.paranoid_checks;
        let index_contents = read_block(&file, &footer.index_handle, verify)?;
        let index_block = Arc::new(Block::new(index_contents)?);

        let cache_id = options
            .block_cache
            .as_ref()
            .map(|cache| cache.new_id())
            .unwrap_or(0);

        let mut table = Table {
            options,
            icmp,
            file: Arc::new(file),
            cache_id,
            index_block,
            filter: None,
            metaindex_offset: footer.metaindex_handle.offset,
        };
        table.read_filter(&footer);
        Ok(table)
    }

    /// Locate and load the filter block named in the metaindex. Any
    /// failure just leaves filtering off.
    fn read_filter(&mut self, footer: &Footer) {
        let policy = match self.options.filter_policy.as_ref() {
            Some(policy) => policy.clone(),
            None => return,
        };
        let metaindex_contents = match read_block(&self.file, &footer.metaindex_handle, true) {
            Ok(contents) => contents,
            Err(_) => return,
        };
        let metaindex = match Block::new(metaindex_contents) {
            Ok(block) => Arc::new(block),
            Err(_) => return,
        };
        let mut iter = metaindex.iter(BytewiseComparator);
        let key = format!("filter.{}", policy.name());
        iter.seek(key.as_bytes());
        if iter.valid() && iter.key() == key.as_bytes() {
            if let Ok((handle, _)) = BlockHandle::decode_from(iter.value()) {
                if let Ok(contents) = read_block(&self.file, &handle, true) {
                    self.filter = Some(FilterBlockReader::new(policy, contents));
                }
            }
        }
    }

    /// Load the data block for an encoded handle, through the block
    /// cache when allowed.
    fn block_from_handle(
        &self,
        read_options: &ReadOptions,
        encoded_handle: &[u8],
    ) -> Result<Arc<Block>> {
        let (handle, _) = BlockHandle::decode_from(encoded_handle)?;
        let verify = read_options.verify_checksums || self.options.paranoid_checks;

        if let Some(cache) = self.options.block_cache.as_ref() {
            let mut cache_key = Vec::with_capacity(16);
            put_fixed64(&mut cache_key, self.cache_id);
            put_fixed64(&mut cache_key, handle.offset);
            if let Some(block) = cache.lookup(&cache_key) {
                return Ok(block);
            }
            let contents = read_block(&self.file, &handle, verify)?;
            let block = Block::new(contents)?;
            if read_options.fill_cache {
                let charge = block.size();
                return Ok(cache.insert(&cache_key, block, charge));
            }
            return Ok(Arc::new(block));
        }

        let contents = read_block(&self.file, &handle, verify)?;
        Ok(Arc::new(Block::new(contents)?))
    }

    /// Point lookup. Returns the entry at the first internal key ≥
    /// `internal_key`, if its block might contain the target; the
    /// caller inspects the entry's user key and tag.
    pub fn internal_get(
        &self,
        read_options: &ReadOptions,
        internal_key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut index_iter = self.index_block.iter(self.icmp.clone());
        index_iter.seek(internal_key);
        if !index_iter.valid() {
            index_iter.status()?;
            return Ok(None);
        }

        let encoded_handle = index_iter.value().to_vec();
        if let Some(filter) = self.filter.as_ref() {
            if let Ok((handle, _)) = BlockHandle::decode_from(&encoded_handle) {
                if !filter.key_may_match(handle.offset, internal_key) {
                    return Ok(None);
                }
            }
        }

        let block = self.block_from_handle(read_options, &encoded_handle)?;
        let mut block_iter = block.iter(self.icmp.clone());
        block_iter.seek(internal_key);
        if block_iter.valid() {
            let entry = (block_iter.key().to_vec(), block_iter.value().to_vec());
            block_iter.status()?;
            return Ok(Some(entry));
        }
        block_iter.status()?;
        Ok(None)
    }

    /// Full-table iterator.
    pub fn iter(self: &Arc<Table>, read_options: &ReadOptions) -> Box<dyn Iter> {
        let table = Arc::clone(self);
        let read_options = read_options.clone();
        let index_iter = Box::new(self.index_block.iter(self.icmp.clone()));
        Box::new(TwoLevelIterator::new(
            index_iter,
            Box::new(move |encoded_handle| {
                let block = table.block_from_handle(&read_options, encoded_handle)?;
                Ok(Box::new(block.iter(table.icmp.clone())) as Box<dyn Iter>)
            }),
        ))
    }

    /// Approximate file offset where `internal_key`'s data would live.
    pub fn approximate_offset_of(&self, internal_key: &[u8]) -> u64 {
        let mut index_iter = self.index_block.iter(self.icmp.clone());
        index_iter.seek(internal_key);
        if index_iter.valid() {
            if let Ok((handle, _)) = BlockHandle::decode_from(index_iter.value()) {
                return handle.offset;
            }
        }
        // Past every data block (or unparsable entry): the key lands
        // where the meta blocks begin.
        self.metaindex_offset
    }
}
