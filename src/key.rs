//! Internal key layout.
//!
//! Every entry the engine stores is addressed by an *internal key*:
//! the user key followed by an 8-byte trailer packing a 56-bit sequence
//! number and an 8-bit value type:
//!
//! ```text
//! | user_key bytes ... | (sequence << 8 | type) as fixed64 |
//! ```
//!
//! Internal keys order by (user_key ascending, sequence descending,
//! type descending), so a forward scan positioned at a given sequence
//! meets the newest visible version of each user key first.

use crate::encoding::{decode_fixed64, put_fixed64, put_varint32, varint_length};

/// Monotonically increasing, assigned per record. Only the low 56 bits
/// are usable; the top byte of the packed trailer carries the type.
pub type SequenceNumber = u64;

/// Largest representable sequence number.
pub const MAX_SEQUENCE: SequenceNumber = (1 << 56) - 1;

/// Tag stored in the low byte of the internal-key trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueType {
    /// A tombstone.
    Deletion = 0,
    /// A live value.
    Value = 1,
}

/// The type used when packing a seek target: the highest-sorting type,
/// so a seek at `(user_key, seq)` lands at or before every entry for
/// that user key with sequence ≤ seq.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl ValueType {
    /// Decode a trailer tag byte.
    pub fn from_u8(tag: u8) -> Option<ValueType> {
        match tag {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            _ => None,
        }
    }
}

/// Pack a sequence number and value type into the 8-byte trailer.
#[inline]
pub fn pack_sequence_and_type(seq: SequenceNumber, t: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE);
    (seq << 8) | t as u64
}

/// Append the internal-key form of `(user_key, seq, t)` to `buf`.
pub fn append_internal_key(buf: &mut Vec<u8>, user_key: &[u8], seq: SequenceNumber, t: ValueType) {
    buf.extend_from_slice(user_key);
    put_fixed64(buf, pack_sequence_and_type(seq, t));
}

/// The user-key portion of an internal key.
#[inline]
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= 8);
    &internal_key[..internal_key.len() - 8]
}

/// A decoded internal key, borrowing the user-key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

/// Decode an internal key. Returns `None` when the trailer is malformed.
pub fn parse_internal_key(internal_key: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if internal_key.len() < 8 {
        return None;
    }
    let trailer = decode_fixed64(&internal_key[internal_key.len() - 8..]);
    let value_type = ValueType::from_u8((trailer & 0xff) as u8)?;
    Some(ParsedInternalKey {
        user_key: &internal_key[..internal_key.len() - 8],
        sequence: trailer >> 8,
        value_type,
    })
}

/// An owned internal key, used in file metadata and manifest records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    /// Build from parts.
    pub fn new(user_key: &[u8], seq: SequenceNumber, t: ValueType) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut rep, user_key, seq, t);
        InternalKey { rep }
    }

    /// Adopt an already-encoded internal key.
    pub fn decode_from(encoded: &[u8]) -> Self {
        InternalKey {
            rep: encoded.to_vec(),
        }
    }

    /// The encoded bytes.
    #[inline]
    pub fn encoded(&self) -> &[u8] {
        &self.rep
    }

    /// The user-key portion.
    #[inline]
    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    /// True for a default-constructed (never assigned) key.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rep.is_empty()
    }
}

/// The memtable probe form of an internal key.
///
/// Memtable entries start with a varint32 length of the internal key, so
/// the probe must carry the same prefix:
///
/// ```text
/// | varint32(user_key.len + 8) | user_key | trailer |
/// ```
pub struct LookupKey {
    data: Vec<u8>,
    kstart: usize,
}

impl LookupKey {
    /// Build a probe for `user_key` visible at `sequence`.
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        let internal_len = user_key.len() + 8;
        let kstart = varint_length(internal_len as u64);
        let mut data = Vec::with_capacity(kstart + internal_len);
        put_varint32(&mut data, internal_len as u32);
        data.extend_from_slice(user_key);
        put_fixed64(
            &mut data,
            pack_sequence_and_type(sequence, VALUE_TYPE_FOR_SEEK),
        );
        LookupKey { data, kstart }
    }

    /// The full length-prefixed form, suitable for memtable seeks.
    #[inline]
    pub fn memtable_key(&self) -> &[u8] {
        &self.data
    }

    /// The internal-key form, suitable for table seeks.
    #[inline]
    pub fn internal_key(&self) -> &[u8] {
        &self.data[self.kstart..]
    }

    /// The bare user key.
    #[inline]
    pub fn user_key(&self) -> &[u8] {
        &self.data[self.kstart..self.data.len() - 8]
    }
}
