//! Atomic write batches.
//!
//! A batch is a serialized run of put/delete records applied as one
//! unit. The wire form doubles as the WAL record payload:
//!
//! ```text
//! | sequence: fixed64 | count: fixed32 |
//! | tag: u8 | key varstring | [value varstring when tag = put] |*
//! ```
//!
//! The sequence field is stamped by the engine when the batch commits,
//! never by the caller.

use crate::encoding::{
    decode_fixed32, decode_fixed64, get_length_prefixed_slice, put_fixed64,
    put_length_prefixed_slice,
};
use crate::error::{Error, Result};
use crate::key::{SequenceNumber, ValueType};
use crate::memtable::MemTable;

/// sequence (8) + count (4).
pub(crate) const BATCH_HEADER_SIZE: usize = 12;

#[derive(Clone, Debug)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives the records of a batch in order during replay.
pub trait BatchHandler {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

impl WriteBatch {
    pub fn new() -> WriteBatch {
        WriteBatch {
            rep: vec![0; BATCH_HEADER_SIZE],
        }
    }

    /// Remove every buffered record.
    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(BATCH_HEADER_SIZE, 0);
    }

    /// Queue a key-value insertion.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Value as u8);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    /// Queue a deletion.
    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Deletion as u8);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    /// Append every record of `other` to this batch.
    pub fn append(&mut self, other: &WriteBatch) {
        self.set_count(self.count() + other.count());
        self.rep.extend_from_slice(&other.rep[BATCH_HEADER_SIZE..]);
    }

    /// Serialized size in bytes.
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    /// Number of queued records.
    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..])
    }

    pub(crate) fn set_count(&mut self, count: u32) {
        self.rep[8..12].copy_from_slice(&count.to_le_bytes());
    }

    /// Sequence number of the first record.
    pub(crate) fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep)
    }

    pub(crate) fn set_sequence(&mut self, sequence: SequenceNumber) {
        let mut buf = Vec::with_capacity(8);
        put_fixed64(&mut buf, sequence);
        self.rep[..8].copy_from_slice(&buf);
    }

    /// The WAL payload.
    pub(crate) fn contents(&self) -> &[u8] {
        &self.rep
    }

    /// Adopt a WAL payload as this batch's contents.
    pub(crate) fn set_contents(&mut self, contents: &[u8]) -> Result<()> {
        if contents.len() < BATCH_HEADER_SIZE {
            return Err(Error::corruption("malformed WriteBatch (too small)"));
        }
        self.rep.clear();
        self.rep.extend_from_slice(contents);
        Ok(())
    }

    /// Walk the records in insertion order.
    pub fn iterate<H: BatchHandler>(&self, handler: &mut H) -> Result<()> {
        let mut input = &self.rep[..];
        if input.len() < BATCH_HEADER_SIZE {
            return Err(Error::corruption("malformed WriteBatch (too small)"));
        }
        input = &input[BATCH_HEADER_SIZE..];

        let mut found = 0u32;
        while !input.is_empty() {
            found += 1;
            let tag = input[0];
            input = &input[1..];
            match ValueType::from_u8(tag) {
                Some(ValueType::Value) => {
                    let (key, n) = get_length_prefixed_slice(input)
                        .map_err(|_| Error::corruption("bad WriteBatch Put"))?;
                    let (value, m) = get_length_prefixed_slice(&input[n..])
                        .map_err(|_| Error::corruption("bad WriteBatch Put"))?;
                    handler.put(key, value);
                    input = &input[n + m..];
                }
                Some(ValueType::Deletion) => {
                    let (key, n) = get_length_prefixed_slice(input)
                        .map_err(|_| Error::corruption("bad WriteBatch Delete"))?;
                    handler.delete(key);
                    input = &input[n..];
                }
                None => return Err(Error::corruption("unknown WriteBatch tag")),
            }
        }
        if found != self.count() {
            return Err(Error::corruption("WriteBatch has wrong count"));
        }
        Ok(())
    }

    /// Apply every record to `mem`, assigning sequence numbers upward
    /// from the batch sequence.
    pub(crate) fn insert_into(&self, mem: &MemTable) -> Result<()> {
        let mut inserter = MemTableInserter {
            sequence: self.sequence(),
            mem,
        };
        self.iterate(&mut inserter)
    }
}

struct MemTableInserter<'a> {
    sequence: SequenceNumber,
    mem: &'a MemTable,
}

impl BatchHandler for MemTableInserter<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.mem.add(self.sequence, ValueType::Value, key, value);
        self.sequence += 1;
    }

    fn delete(&mut self, key: &[u8]) {
        self.mem.add(self.sequence, ValueType::Deletion, key, b"");
        self.sequence += 1;
    }
}
