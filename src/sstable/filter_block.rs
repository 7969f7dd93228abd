//! Per-table filter blocks.
//!
//! One filter is built for every 2 KiB slab of data-block bytes: all
//! keys of data blocks whose start offset falls inside a slab go into
//! that slab's filter. The block ends with the filter offset array, the
//! array's own start offset, and the slab size exponent:
//!
//! ```text
//! | filter_0 … filter_{N-1} | fixed32 offsets[N] | fixed32 offsets_start | u8 base_lg |
//! ```

use std::sync::Arc;

use crate::encoding::{decode_fixed32, put_fixed32};
use crate::filter::FilterPolicy;

/// log2 of the slab size: one filter per 2 KiB of data-block offsets.
const FILTER_BASE_LG: u8 = 11;
const FILTER_BASE: u64 = 1 << FILTER_BASE_LG;

pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    /// Flattened keys of the slab being accumulated.
    keys: Vec<u8>,
    /// Start offset of each key inside `keys`.
    starts: Vec<usize>,
    /// Filter bytes emitted so far.
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        FilterBlockBuilder {
            policy,
            keys: Vec::new(),
            starts: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Called at every data-block boundary with the block's start
    /// offset. Materializes filters for every slab the table has moved
    /// past, including empty ones.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset / FILTER_BASE;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while (self.filter_offsets.len() as u64) < filter_index {
            self.generate_filter();
        }
    }

    /// Register a key of the current data block.
    pub fn add_key(&mut self, key: &[u8]) {
        self.starts.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    /// Complete the block.
    pub fn finish(mut self) -> Vec<u8> {
        if !self.starts.is_empty() {
            self.generate_filter();
        }
        let offsets_start = self.result.len() as u32;
        let offsets = std::mem::take(&mut self.filter_offsets);
        for offset in offsets {
            put_fixed32(&mut self.result, offset);
        }
        put_fixed32(&mut self.result, offsets_start);
        self.result.push(FILTER_BASE_LG);
        self.result
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.starts.is_empty() {
            // Slab with no keys: zero-length filter.
            return;
        }
        self.starts.push(self.keys.len()); // simplify length computation
        let key_refs: Vec<&[u8]> = self
            .starts
            .windows(2)
            .map(|w| &self.keys[w[0]..w[1]])
            .collect();
        let filter = self.policy.create_filter(&key_refs);
        self.result.extend_from_slice(&filter);
        self.keys.clear();
        self.starts.clear();
    }
}

pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Vec<u8>,
    /// Start of the offset array within `data`.
    offsets_start: usize,
    num_filters: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    /// `contents` is the filter block as written by the builder. A
    /// malformed block degrades to "no filtering" rather than erroring:
    /// reads stay correct, just slower.
    pub fn new(policy: Arc<dyn FilterPolicy>, contents: Vec<u8>) -> FilterBlockReader {
        let mut reader = FilterBlockReader {
            policy,
            data: Vec::new(),
            offsets_start: 0,
            num_filters: 0,
            base_lg: 0,
        };
        let n = contents.len();
        if n < 5 {
            // 1 byte base_lg + 4 bytes offsets_start
            return reader;
        }
        let base_lg = contents[n - 1];
        let offsets_start = decode_fixed32(&contents[n - 5..]) as usize;
        if offsets_start > n - 5 {
            return reader;
        }
        reader.base_lg = base_lg;
        reader.offsets_start = offsets_start;
        reader.num_filters = (n - 5 - offsets_start) / 4;
        reader.data = contents;
        reader
    }

    /// True if the key may be present in the data block starting at
    /// `block_offset`.
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num_filters {
            // Out of range: treat as a potential match.
            return true;
        }
        let start = decode_fixed32(&self.data[self.offsets_start + 4 * index..]) as usize;
        // One-past-the-end reads the offsets_start field itself, which
        // is exactly the last filter's limit.
        let limit = decode_fixed32(&self.data[self.offsets_start + 4 * (index + 1)..]) as usize;
        if start > limit || limit > self.offsets_start {
            return true;
        }
        if start == limit {
            // Empty filter: that slab held no keys.
            return false;
        }
        self.policy
            .key_may_match(key, &self.data[start..limit])
    }
}
