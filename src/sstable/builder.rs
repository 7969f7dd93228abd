//! Table construction.
//!
//! Consumes internal keys in strictly ascending order and writes the
//! table layout:
//!
//! ```text
//! [ data block | trailer ]*   [ filter block | trailer ]?
//! [ metaindex | trailer ]     [ index | trailer ]     [ footer ]
//! ```
//!
//! An index entry for a data block is not emitted until the *next* key
//! arrives, so the entry's key can be a shortened separator between the
//! two blocks rather than the full last key.

use std::fs::File;
use std::io::Write;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::{Error, Result};
use crate::sstable::block::BlockBuilder;
use crate::sstable::filter_block::FilterBlockBuilder;
use crate::sstable::format::{append_block_trailer, BlockHandle, Footer};
use crate::CompressionType;
use crate::Options;

pub struct TableBuilder {
    options: Options,
    icmp: InternalKeyComparator,
    file: File,
    offset: u64,
    num_entries: u64,
    closed: bool,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter_block: Option<FilterBlockBuilder>,
    last_key: Vec<u8>,
    /// A data block was flushed and its index entry is waiting for the
    /// next key to derive a separator from.
    pending_index_entry: bool,
    pending_handle: BlockHandle,
    status: Result<()>,
}

impl TableBuilder {
    pub fn new(options: Options, icmp: InternalKeyComparator, file: File) -> TableBuilder {
        let filter_block = options.filter_policy.as_ref().map(|policy| {
            let mut builder = FilterBlockBuilder::new(policy.clone());
            builder.start_block(0);
            builder
        });
        TableBuilder {
            data_block: BlockBuilder::new(options.block_restart_interval),
            // Index keys are already sparse; restarting every entry
            // keeps binary search exact.
            index_block: BlockBuilder::new(1),
            options,
            icmp,
            file,
            offset: 0,
            num_entries: 0,
            closed: false,
            filter_block,
            last_key: Vec::new(),
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
            status: Ok(()),
        }
    }

    /// Append an entry. `key` must sort after every key added before.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        assert!(!self.closed, "add after finish/abandon");
        self.status.clone()?;
        debug_assert!(
            self.num_entries == 0
                || self.icmp.compare(key, &self.last_key) == std::cmp::Ordering::Greater,
            "keys added out of order"
        );

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            let separator = self.icmp.find_shortest_separator(&self.last_key, key);
            self.index_block
                .add(&separator, &self.pending_handle.encoded());
            self.pending_index_entry = false;
        }

        if let Some(filter) = self.filter_block.as_mut() {
            filter.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Close out the current data block and write it.
    pub fn flush(&mut self) -> Result<()> {
        assert!(!self.closed);
        self.status.clone()?;
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(!self.pending_index_entry);

        self.pending_handle = self.write_block_from_data()?;
        self.pending_index_entry = true;
        self.file.flush().map_err(|e| self.fail(e.into()))?;
        if let Some(filter) = self.filter_block.as_mut() {
            filter.start_block(self.offset);
        }
        Ok(())
    }

    /// Write the remaining blocks and the footer.
    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        assert!(!self.closed);
        self.closed = true;

        // Filter block, stored uncompressed.
        let filter_handle = match self.filter_block.take() {
            Some(filter) => {
                let contents = filter.finish();
                Some(self.write_raw_block(&contents, CompressionType::None)?)
            }
            None => None,
        };

        // Metaindex block: names the filter, when there is one.
        let mut metaindex = BlockBuilder::new(self.options.block_restart_interval);
        if let Some(handle) = filter_handle {
            let key = format!(
                "filter.{}",
                self.options.filter_policy.as_ref().unwrap().name()
            );
            metaindex.add(key.as_bytes(), &handle.encoded());
        }
        let metaindex_contents = metaindex.finish().to_vec();
        let metaindex_handle = self.write_compressed_block(&metaindex_contents)?;

        // Index block; the final block's entry uses a short successor
        // of the very last key.
        if self.pending_index_entry {
            let successor = self.icmp.find_short_successor(&self.last_key);
            self.index_block
                .add(&successor, &self.pending_handle.encoded());
            self.pending_index_entry = false;
        }
        let index_contents = self.index_block.finish().to_vec();
        let index_handle = self.write_compressed_block(&index_contents)?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        self.file
            .write_all(&footer.encoded())
            .map_err(|e| self.fail(e.into()))?;
        self.offset += footer.encoded().len() as u64;
        self.file.flush().map_err(|e| self.fail(e.into()))?;
        Ok(())
    }

    /// Mark the builder dead without writing a footer; the partial file
    /// is garbage to be swept later.
    pub fn abandon(&mut self) {
        assert!(!self.closed);
        self.closed = true;
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written so far; after `finish`, the final file size.
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    /// Force the table contents to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Error {
        if self.status.is_ok() {
            self.status = Err(err.clone());
        }
        err
    }

    fn write_block_from_data(&mut self) -> Result<BlockHandle> {
        let contents = self.data_block.finish().to_vec();
        let handle = self.write_compressed_block(&contents)?;
        self.data_block.reset();
        Ok(handle)
    }

    /// Compress if the codec earns its keep (≥ 12.5 % saved), else
    /// store raw.
    fn write_compressed_block(&mut self, contents: &[u8]) -> Result<BlockHandle> {
        match self.options.compression {
            CompressionType::None => self.write_raw_block(contents, CompressionType::None),
            CompressionType::Snappy => {
                let compressed = snap::raw::Encoder::new()
                    .compress_vec(contents)
                    .map_err(|e| Error::Io(format!("snappy compression: {e}")))?;
                if compressed.len() < contents.len() - contents.len() / 8 {
                    self.write_raw_block(&compressed, CompressionType::Snappy)
                } else {
                    self.write_raw_block(contents, CompressionType::None)
                }
            }
            CompressionType::Zstd => Err(self.fail(Error::NotSupported(
                "zstd compression in a build without zstd".to_string(),
            ))),
        }
    }

    fn write_raw_block(
        &mut self,
        contents: &[u8],
        codec: CompressionType,
    ) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        let mut trailer = Vec::with_capacity(5);
        append_block_trailer(&mut trailer, contents, codec);
        let write = self
            .file
            .write_all(contents)
            .and_then(|_| self.file.write_all(&trailer));
        if let Err(e) = write {
            return Err(self.fail(e.into()));
        }
        self.offset += contents.len() as u64 + trailer.len() as u64;
        Ok(handle)
    }
}
