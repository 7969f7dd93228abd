//! Prefix-compressed key-value blocks.
//!
//! Keys are stored as deltas against the previous key. Every
//! `block_restart_interval` entries the full key is written instead and
//! its offset recorded in the restart array, giving seeks a binary
//! search over restarts followed by a short linear scan:
//!
//! ```text
//! entry    := | varint32 shared | varint32 non_shared | varint32 value_len
//!             | key_delta[non_shared] | value[value_len] |
//! block    := entry* | restarts: fixed32[num_restarts] | fixed32 num_restarts |
//! ```
//!
//! `shared == 0` marks a restart boundary.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::encoding::{decode_fixed32, get_varint32, put_fixed32, put_varint32};
use crate::error::{Error, Result};
use crate::iterator::Iter;

/// Builds the serialized form of one block.
#[derive(Debug)]
pub struct BlockBuilder {
    restart_interval: usize,
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    /// Entries since the last restart point.
    counter: usize,
    finished: bool,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        assert!(restart_interval >= 1);
        BlockBuilder {
            restart_interval,
            buffer: Vec::new(),
            restarts: vec![0], // first restart is at offset 0
            counter: 0,
            finished: false,
            last_key: Vec::new(),
        }
    }

    /// Ready the builder for a fresh block.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.finished = false;
        self.last_key.clear();
    }

    /// Append an entry. Keys must arrive in strictly ascending order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        assert!(!self.finished, "add after finish");
        assert!(self.counter <= self.restart_interval);

        let mut shared = 0;
        if self.counter < self.restart_interval {
            let min_length = std::cmp::min(self.last_key.len(), key.len());
            while shared < min_length && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Append the restart array and return the completed block body.
    pub fn finish(&mut self) -> &[u8] {
        for &restart in &self.restarts {
            put_fixed32(&mut self.buffer, restart);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    /// Uncompressed size the block would have if finished now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// A decoded, immutable block.
#[derive(Debug)]
pub struct Block {
    data: Vec<u8>,
    /// Offset of the restart array.
    restart_offset: usize,
    num_restarts: usize,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Result<Block> {
        if data.len() < 4 {
            return Err(Error::corruption("block too small for restart count"));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]) as usize;
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts > max_restarts {
            return Err(Error::corruption("bad restart count in block"));
        }
        let restart_offset = data.len() - 4 - 4 * num_restarts;
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Bytes the block occupies in memory; the block cache charge.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: usize) -> usize {
        debug_assert!(index < self.num_restarts);
        decode_fixed32(&self.data[self.restart_offset + 4 * index..]) as usize
    }

    /// Iterate under `comparator` (the same one the block was built
    /// with).
    pub fn iter<C: Comparator + Clone + 'static>(self: &Arc<Self>, comparator: C) -> BlockIter<C> {
        BlockIter {
            block: Arc::clone(self),
            comparator,
            current: self.restart_offset,
            restart_index: self.num_restarts,
            key: Vec::new(),
            value_range: (0, 0),
            status: Ok(()),
        }
    }
}

pub struct BlockIter<C: Comparator> {
    block: Arc<Block>,
    comparator: C,
    /// Offset of the current entry, or `restart_offset` when exhausted.
    current: usize,
    /// Restart block containing the current entry.
    restart_index: usize,
    /// Current key, reassembled from the shared prefix chain.
    key: Vec<u8>,
    /// Current value span within the block data.
    value_range: (usize, usize),
    status: Result<()>,
}

impl<C: Comparator> BlockIter<C> {
    fn corrupt(&mut self) {
        if self.status.is_ok() {
            self.status = Err(Error::corruption("bad entry in block"));
        }
        self.current = self.block.restart_offset;
        self.restart_index = self.block.num_restarts;
        self.key.clear();
        self.value_range = (0, 0);
    }

    /// Offset just past the current entry.
    fn next_entry_offset(&self) -> usize {
        self.value_range.1
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.key.clear();
        self.restart_index = index;
        let offset = self.block.restart_point(index);
        // Degenerate span positioned before the restart's first entry.
        self.value_range = (offset, offset);
    }

    /// Decode the entry at `next_entry_offset`, extending the shared
    /// key. Returns false at the end of the block or on corruption.
    fn parse_next_entry(&mut self) -> bool {
        let offset = self.next_entry_offset();
        if offset >= self.block.restart_offset {
            self.current = self.block.restart_offset;
            self.restart_index = self.block.num_restarts;
            return false;
        }

        let data = &self.block.data[..self.block.restart_offset];
        let parse = || -> Result<(u32, u32, u32, usize)> {
            let mut pos = offset;
            let (shared, n) = get_varint32(&data[pos..])?;
            pos += n;
            let (non_shared, n) = get_varint32(&data[pos..])?;
            pos += n;
            let (value_len, n) = get_varint32(&data[pos..])?;
            pos += n;
            if pos + non_shared as usize + value_len as usize > data.len() {
                return Err(Error::corruption("entry overruns block"));
            }
            Ok((shared, non_shared, value_len, pos))
        };
        match parse() {
            Ok((shared, non_shared, value_len, pos)) => {
                if (shared as usize) > self.key.len() {
                    self.corrupt();
                    return false;
                }
                self.current = offset;
                self.key.truncate(shared as usize);
                self.key
                    .extend_from_slice(&data[pos..pos + non_shared as usize]);
                let value_start = pos + non_shared as usize;
                self.value_range = (value_start, value_start + value_len as usize);
                // Track which restart region we are in.
                while self.restart_index + 1 < self.block.num_restarts
                    && self.block.restart_point(self.restart_index + 1) <= self.current
                {
                    self.restart_index += 1;
                }
                true
            }
            Err(_) => {
                self.corrupt();
                false
            }
        }
    }
}

impl<C: Comparator> Iter for BlockIter<C> {
    fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) {
        if self.block.num_restarts == 0 {
            self.corrupt();
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    fn seek_to_last(&mut self) {
        if self.block.num_restarts == 0 {
            self.corrupt();
            return;
        }
        self.seek_to_restart_point(self.block.num_restarts - 1);
        // Walk to the final entry of the final restart region.
        while self.parse_next_entry() && self.next_entry_offset() < self.block.restart_offset {}
    }

    fn seek(&mut self, target: &[u8]) {
        if self.block.num_restarts == 0 {
            self.corrupt();
            return;
        }
        // Binary search over restart points for the last restart whose
        // key is < target; every restart key is stored in full.
        let mut left = 0usize;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let region_offset = self.block.restart_point(mid);
            let data = &self.block.data[..self.block.restart_offset];
            let parsed = (|| -> Result<&[u8]> {
                let mut pos = region_offset;
                let (shared, n) = get_varint32(&data[pos..])?;
                pos += n;
                let (non_shared, n) = get_varint32(&data[pos..])?;
                pos += n;
                let (_value_len, n) = get_varint32(&data[pos..])?;
                pos += n;
                if shared != 0 || pos + non_shared as usize > data.len() {
                    return Err(Error::corruption("bad restart entry"));
                }
                Ok(&data[pos..pos + non_shared as usize])
            })();
            match parsed {
                Ok(mid_key) => {
                    if self.comparator.compare(mid_key, target) == Ordering::Less {
                        left = mid;
                    } else {
                        right = mid - 1;
                    }
                }
                Err(_) => {
                    self.corrupt();
                    return;
                }
            }
        }

        self.seek_to_restart_point(left);
        // Linear scan inside the chosen region.
        loop {
            if !self.parse_next_entry() {
                return;
            }
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_entry();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let original = self.current;
        // Back up to the restart point before the current entry, then
        // scan forward to the entry just before it.
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                // No entry precedes the first one.
                self.current = self.block.restart_offset;
                self.restart_index = self.block.num_restarts;
                self.key.clear();
                return;
            }
            self.restart_index -= 1;
        }
        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_entry() && self.next_entry_offset() < original {}
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.block.data[self.value_range.0..self.value_range.1]
    }

    fn status(&mut self) -> Result<()> {
        self.status.clone()
    }
}
