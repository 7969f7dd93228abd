//! In-memory write buffer.
//!
//! The memtable absorbs every write before it reaches a table file. It
//! is an arena-backed skip list whose entries encode, in one span:
//!
//! ```text
//! | varint32 internal_key_len | user_key | trailer | varint32 value_len | value |
//! ```
//!
//! Lifecycle: created on rotation, mutated only by the single writer at
//! the head of the write queue, frozen when it fills, dropped after a
//! flush installs its contents as a level-0 table. Readers and the
//! flush hold `Arc` references; the arena (and every span readers point
//! into) lives until the last reference goes away.

pub mod arena;
pub mod skiplist;

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::encoding::{get_length_prefixed_slice, get_varint32, put_varint32, varint_length};
use crate::error::Result;
use crate::iterator::Iter;
use crate::key::{pack_sequence_and_type, LookupKey, SequenceNumber, ValueType};
use crate::memtable::arena::Arena;
use crate::memtable::skiplist::{SkipList, SkipListCursor};

/// Orders raw memtable entries by their embedded internal key.
#[derive(Clone)]
pub struct MemTableKeyComparator {
    icmp: InternalKeyComparator,
}

impl Comparator for MemTableKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let (akey, _) = get_length_prefixed_slice(a).expect("corrupt memtable entry");
        let (bkey, _) = get_length_prefixed_slice(b).expect("corrupt memtable entry");
        self.icmp.compare(akey, bkey)
    }

    fn name(&self) -> &str {
        "stratadb.MemTableKeyComparator"
    }

    fn find_shortest_separator(&self, start: &[u8], _limit: &[u8]) -> Vec<u8> {
        start.to_vec()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        key.to_vec()
    }
}

/// Outcome of a memtable point lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum MemTableGetResult {
    /// The key's newest visible entry is a value.
    Put(Vec<u8>),
    /// The key's newest visible entry is a tombstone.
    Delete,
    /// The memtable holds nothing visible for this key; fall through to
    /// older layers.
    NotFound,
}

pub struct MemTable {
    table: SkipList<MemTableKeyComparator>,
    arena: Arc<Arena>,
    icmp: InternalKeyComparator,
}

impl MemTable {
    pub fn new(icmp: InternalKeyComparator) -> MemTable {
        let arena = Arc::new(Arena::new());
        let comparator = MemTableKeyComparator { icmp: icmp.clone() };
        MemTable {
            table: SkipList::new(comparator, Arc::clone(&arena)),
            arena,
            icmp,
        }
    }

    /// Bytes of arena the table has consumed.
    pub fn approximate_memory_usage(&self) -> usize {
        self.arena.memory_usage()
    }

    /// Append an entry. Caller is the single writer.
    pub fn add(&self, seq: SequenceNumber, value_type: ValueType, user_key: &[u8], value: &[u8]) {
        let internal_key_len = user_key.len() + 8;
        let encoded_len = varint_length(internal_key_len as u64)
            + internal_key_len
            + varint_length(value.len() as u64)
            + value.len();

        let mut buf = Vec::with_capacity(encoded_len);
        put_varint32(&mut buf, internal_key_len as u32);
        buf.extend_from_slice(user_key);
        crate::encoding::put_fixed64(&mut buf, pack_sequence_and_type(seq, value_type));
        put_varint32(&mut buf, value.len() as u32);
        buf.extend_from_slice(value);
        debug_assert_eq!(buf.len(), encoded_len);

        let dst = self.arena.allocate(encoded_len);
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), dst, encoded_len);
            self.table
                .insert(std::slice::from_raw_parts(dst, encoded_len));
        }
    }

    /// Point lookup at the snapshot baked into `key`.
    pub fn get(&self, key: &LookupKey) -> MemTableGetResult {
        let mut cursor = SkipListCursor::new();
        cursor.seek(&self.table, key.memtable_key());
        if !cursor.valid() {
            return MemTableGetResult::NotFound;
        }

        // The cursor is at the first entry with internal key ≥ the probe.
        // Same user key means this is the newest visible version; a
        // different user key means the memtable has nothing for us.
        let entry = cursor.key();
        let (internal_key, consumed) =
            get_length_prefixed_slice(entry).expect("corrupt memtable entry");
        let user_key = &internal_key[..internal_key.len() - 8];
        if self
            .icmp
            .user_comparator()
            .compare(user_key, key.user_key())
            != Ordering::Equal
        {
            return MemTableGetResult::NotFound;
        }

        let trailer = crate::encoding::decode_fixed64(&internal_key[internal_key.len() - 8..]);
        match ValueType::from_u8((trailer & 0xff) as u8) {
            Some(ValueType::Value) => {
                let (value, _) = get_length_prefixed_slice(&entry[consumed..])
                    .expect("corrupt memtable entry");
                MemTableGetResult::Put(value.to_vec())
            }
            Some(ValueType::Deletion) => MemTableGetResult::Delete,
            None => MemTableGetResult::NotFound,
        }
    }

    /// Iterator over internal keys. The iterator shares ownership of
    /// the memtable, keeping the arena alive.
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            mem: Arc::clone(self),
            cursor: SkipListCursor::new(),
            scratch: Vec::new(),
        }
    }
}

pub struct MemTableIterator {
    mem: Arc<MemTable>,
    cursor: SkipListCursor,
    /// Seek targets must be re-encoded in entry form.
    scratch: Vec<u8>,
}

impl MemTableIterator {
    /// Current raw entry; only while valid.
    fn entry(&self) -> &[u8] {
        self.cursor.key()
    }
}

impl Iter for MemTableIterator {
    fn valid(&self) -> bool {
        self.cursor.valid()
    }

    fn seek_to_first(&mut self) {
        self.cursor.seek_to_first(&self.mem.table);
    }

    fn seek_to_last(&mut self) {
        self.cursor.seek_to_last(&self.mem.table);
    }

    fn seek(&mut self, target: &[u8]) {
        self.scratch.clear();
        put_varint32(&mut self.scratch, target.len() as u32);
        self.scratch.extend_from_slice(target);
        let scratch = std::mem::take(&mut self.scratch);
        self.cursor.seek(&self.mem.table, &scratch);
        self.scratch = scratch;
    }

    fn next(&mut self) {
        self.cursor.next();
    }

    fn prev(&mut self) {
        self.cursor.prev(&self.mem.table);
    }

    fn key(&self) -> &[u8] {
        let (internal_key, _) =
            get_length_prefixed_slice(self.entry()).expect("corrupt memtable entry");
        internal_key
    }

    fn value(&self) -> &[u8] {
        let entry = self.entry();
        let (key_len, n) = get_varint32(entry).expect("corrupt memtable entry");
        let (value, _) = get_length_prefixed_slice(&entry[n + key_len as usize..])
            .expect("corrupt memtable entry");
        value
    }

    fn status(&mut self) -> Result<()> {
        Ok(())
    }
}
