//! Key ordering.
//!
//! A [`Comparator`] provides the total order over user keys. The active
//! comparator's name is persisted in the manifest and checked on reopen,
//! so a database is never silently read with a different order than it
//! was written with.
//!
//! [`InternalKeyComparator`] lifts a user comparator to internal keys:
//! user keys ascending, then sequence numbers descending, so newer
//! versions of a key sort first.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::key::{extract_user_key, pack_sequence_and_type, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK};

/// A total order over byte-string keys.
///
/// Implementations must be thread-safe; the engine invokes comparator
/// methods concurrently from reader threads and the background worker.
pub trait Comparator: Send + Sync {
    /// Three-way comparison.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// The persisted comparator name. Checked on reopen; change it
    /// whenever the order changes incompatibly.
    fn name(&self) -> &str;

    /// Returns a short key `k` with `start <= k < limit` under this
    /// order, used to shrink index-block entries. Returning `start`
    /// unchanged is always correct.
    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8>;

    /// Returns a short key ≥ `key`. Returning `key` unchanged is always
    /// correct.
    fn find_short_successor(&self, key: &[u8]) -> Vec<u8>;
}

impl Comparator for Arc<dyn Comparator> {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (**self).compare(a, b)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        (**self).find_shortest_separator(start, limit)
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        (**self).find_short_successor(key)
    }
}

/// Lexicographic byte-wise ordering. The default user comparator.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "stratadb.BytewiseComparator"
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        let min_length = std::cmp::min(start.len(), limit.len());
        let mut diff_index = 0;
        while diff_index < min_length && start[diff_index] == limit[diff_index] {
            diff_index += 1;
        }
        if diff_index < min_length {
            // Do not shorten if one string is a prefix of the other.
            let diff_byte = start[diff_index];
            if diff_byte < 0xff && diff_byte + 1 < limit[diff_index] {
                let mut sep = start[..=diff_index].to_vec();
                *sep.last_mut().unwrap() += 1;
                debug_assert_eq!(self.compare(&sep, limit), Ordering::Less);
                return sep;
            }
        }
        start.to_vec()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        // First byte that can be incremented wins.
        for (i, &byte) in key.iter().enumerate() {
            if byte != 0xff {
                let mut succ = key[..=i].to_vec();
                *succ.last_mut().unwrap() += 1;
                return succ;
            }
        }
        // Run of 0xff bytes: leave unchanged.
        key.to_vec()
    }
}

/// Orders internal keys by (user key asc, sequence desc, type desc).
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user_comparator: Arc<dyn Comparator>) -> Self {
        InternalKeyComparator { user_comparator }
    }

    /// The wrapped user comparator.
    #[inline]
    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user_comparator
    }
}

impl Comparator for InternalKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self
            .user_comparator
            .compare(extract_user_key(a), extract_user_key(b))
        {
            Ordering::Equal => {
                let anum = crate::encoding::decode_fixed64(&a[a.len() - 8..]);
                let bnum = crate::encoding::decode_fixed64(&b[b.len() - 8..]);
                // Larger (sequence, type) sorts first.
                bnum.cmp(&anum)
            }
            ord => ord,
        }
    }

    fn name(&self) -> &str {
        "stratadb.InternalKeyComparator"
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Vec<u8> {
        // Shorten the user-key portion; if it actually shrank, a maximal
        // trailer keeps the result before every real entry at that key.
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let tmp = self
            .user_comparator
            .find_shortest_separator(user_start, user_limit);
        if tmp.len() < user_start.len()
            && self.user_comparator.compare(user_start, &tmp) == Ordering::Less
        {
            let mut sep = tmp;
            crate::encoding::put_fixed64(
                &mut sep,
                pack_sequence_and_type(MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(start, &sep), Ordering::Less);
            debug_assert_eq!(self.compare(&sep, limit), Ordering::Less);
            return sep;
        }
        start.to_vec()
    }

    fn find_short_successor(&self, key: &[u8]) -> Vec<u8> {
        let user_key = extract_user_key(key);
        let tmp = self.user_comparator.find_short_successor(user_key);
        if tmp.len() < user_key.len()
            && self.user_comparator.compare(user_key, &tmp) == Ordering::Less
        {
            let mut succ = tmp;
            crate::encoding::put_fixed64(
                &mut succ,
                pack_sequence_and_type(MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK),
            );
            debug_assert_eq!(self.compare(key, &succ), Ordering::Less);
            return succ;
        }
        key.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{InternalKey, ValueType};

    #[test]
    fn bytewise_separator() {
        let cases: Vec<(&[u8], &[u8], &[u8])> = vec![
            (b"", b"1111", b""),
            (b"1111", b"", b"1111"),
            (b"1111", b"111", b"1111"),
            (b"123", b"1234", b"123"),
            (b"1234", b"1234", b"1234"),
            (b"1", b"2", b"1"),
            (b"1357", b"2", b"1357"),
            (b"1111", b"12345", b"1111"),
            (b"1111", b"13345", b"12"),
            (&[0x30, 0xff], &[0x30, 0x31, 0x32], &[0x30, 0xff]),
        ];
        let c = BytewiseComparator;
        for (start, limit, expected) in cases {
            assert_eq!(c.find_shortest_separator(start, limit), expected);
        }
    }

    #[test]
    fn bytewise_successor() {
        let c = BytewiseComparator;
        assert_eq!(c.find_short_successor(b""), b"");
        assert_eq!(c.find_short_successor(b"111"), b"2");
        assert_eq!(c.find_short_successor(b"222"), b"3");
        assert_eq!(c.find_short_successor(&[0xff, 0xff, 1]), vec![0xff, 0xff, 2]);
        assert_eq!(
            c.find_short_successor(&[0xff, 0xff, 0xff]),
            vec![0xff, 0xff, 0xff]
        );
    }

    fn ikey(user_key: &[u8], seq: u64, t: ValueType) -> Vec<u8> {
        InternalKey::new(user_key, seq, t).encoded().to_vec()
    }

    #[test]
    fn internal_key_order() {
        let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        // Same user key: higher sequence sorts first.
        assert_eq!(
            icmp.compare(
                &ikey(b"a", 100, ValueType::Value),
                &ikey(b"a", 99, ValueType::Value)
            ),
            Ordering::Less
        );
        // Same (user key, sequence): Value sorts before Deletion.
        assert_eq!(
            icmp.compare(
                &ikey(b"a", 7, ValueType::Value),
                &ikey(b"a", 7, ValueType::Deletion)
            ),
            Ordering::Less
        );
        // Different user keys dominate.
        assert_eq!(
            icmp.compare(
                &ikey(b"a", 1, ValueType::Value),
                &ikey(b"b", 100, ValueType::Value)
            ),
            Ordering::Less
        );
    }

    #[test]
    fn internal_separator_carries_max_trailer() {
        let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        let start = ikey(b"foo", 100, ValueType::Value);
        let limit = ikey(b"hello", 200, ValueType::Value);
        let sep = icmp.find_shortest_separator(&start, &limit);
        assert_eq!(extract_user_key(&sep), b"g");
        assert_eq!(icmp.compare(&start, &sep), Ordering::Less);
        assert_eq!(icmp.compare(&sep, &limit), Ordering::Less);
    }
}
