//! User-facing iteration.
//!
//! The merged internal iterator yields every version of every key:
//! multiple sequence numbers per user key, tombstones included. This
//! wrapper collapses that stream to the newest visible version of each
//! live user key relative to the iterator's snapshot, in both
//! directions, and samples bytes read to feed seek-compaction
//! accounting.

use std::cmp::Ordering;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::comparator::Comparator;
use crate::engine::DbCore;
use crate::error::Result;
use crate::iterator::Iter;
use crate::key::{
    append_internal_key, parse_internal_key, ParsedInternalKey, SequenceNumber, ValueType,
    VALUE_TYPE_FOR_SEEK,
};
use crate::version::READ_BYTES_PERIOD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// `inner` is positioned at the exact entry that yields the current
    /// key and value.
    Forward,
    /// `inner` is positioned before every entry of the current user
    /// key; the entry itself is parked in `saved_key`/`saved_value`.
    Reverse,
}

pub struct DBIterator {
    core: Arc<DbCore>,
    /// Pins the file set the inner iterators read from, so no table
    /// under this iterator is deleted while it lives.
    _version: Arc<crate::version::Version>,
    inner: Box<dyn Iter>,
    user_comparator: Arc<dyn Comparator>,
    sequence: SequenceNumber,
    direction: Direction,
    valid: bool,
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    rng: StdRng,
    bytes_until_read_sampling: u64,
    status: Result<()>,
}

impl DBIterator {
    pub(crate) fn new(
        core: Arc<DbCore>,
        version: Arc<crate::version::Version>,
        inner: Box<dyn Iter>,
        user_comparator: Arc<dyn Comparator>,
        sequence: SequenceNumber,
        seed: u64,
    ) -> DBIterator {
        let mut rng = StdRng::seed_from_u64(seed);
        let bytes_until_read_sampling = random_compaction_period(&mut rng);
        DBIterator {
            core,
            _version: version,
            inner,
            user_comparator,
            sequence,
            direction: Direction::Forward,
            valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            rng,
            bytes_until_read_sampling,
            status: Ok(()),
        }
    }

    /// Parse the current inner entry, charging the read sampler.
    fn parse_key(&mut self) -> Option<ParsedInternalKey<'_>> {
        let bytes = (self.inner.key().len() + self.inner.value().len()) as u64;

        if bytes >= self.bytes_until_read_sampling {
            let mut budget = self.bytes_until_read_sampling;
            while budget < bytes {
                budget += random_compaction_period(&mut self.rng);
            }
            self.bytes_until_read_sampling = budget - bytes;
            self.core.record_read_sample(self.inner.key());
        } else {
            self.bytes_until_read_sampling -= bytes;
        }

        match parse_internal_key(self.inner.key()) {
            Some(parsed) => Some(parsed),
            None => {
                if self.status.is_ok() {
                    self.status = Err(crate::Error::corruption(
                        "corrupted internal key in DBIterator",
                    ));
                }
                None
            }
        }
    }

    /// Advance to the newest visible non-deleted entry at or after the
    /// inner position. `skipping` suppresses entries whose user key is
    /// ≤ `saved_key` (already emitted or deleted).
    fn find_next_user_entry(&mut self, mut skipping: bool) {
        debug_assert_eq!(self.direction, Direction::Forward);
        while self.inner.valid() {
            let parsed = self
                .parse_key()
                .map(|p| (p.value_type, p.sequence, p.user_key.to_vec()));
            let visible = match parsed {
                Some((value_type, sequence, user_key)) if sequence <= self.sequence => {
                    Some((value_type, user_key))
                }
                _ => None,
            };
            if let Some((value_type, user_key)) = visible {
                match value_type {
                    ValueType::Deletion => {
                        // Everything older at this user key is shadowed.
                        self.saved_key = user_key;
                        skipping = true;
                    }
                    ValueType::Value => {
                        if skipping
                            && self
                                .user_comparator
                                .compare(&user_key, &self.saved_key)
                                != Ordering::Greater
                        {
                            // Hidden by a newer deletion or already emitted.
                        } else {
                            self.valid = true;
                            self.saved_key.clear();
                            return;
                        }
                    }
                }
            }
            self.inner.next();
        }
        self.saved_key.clear();
        self.valid = false;
    }

    /// Walk backward to the previous user key and park its newest
    /// visible value in the saved slots.
    fn find_prev_user_entry(&mut self) {
        debug_assert_eq!(self.direction, Direction::Reverse);
        let mut value_type = ValueType::Deletion;
        if self.inner.valid() {
            loop {
                let parsed = self
                    .parse_key()
                    .map(|p| (p.value_type, p.sequence, p.user_key.to_vec()));
                if let Some((entry_type, sequence, user_key)) = parsed {
                    if sequence <= self.sequence {
                        if value_type != ValueType::Deletion
                            && self.user_comparator.compare(&user_key, &self.saved_key)
                                == Ordering::Less
                        {
                            // saved_* holds the newest visible value of
                            // the user key we just walked past.
                            break;
                        }
                        value_type = entry_type;
                        if value_type == ValueType::Deletion {
                            self.saved_key.clear();
                            self.saved_value.clear();
                        } else {
                            self.saved_key = user_key;
                            self.saved_value = self.inner.value().to_vec();
                        }
                    }
                }
                self.inner.prev();
                if !self.inner.valid() {
                    break;
                }
            }
        }

        if value_type == ValueType::Deletion {
            // Ran off the front.
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
    }
}

fn random_compaction_period(rng: &mut StdRng) -> u64 {
    rng.gen_range(0..2 * READ_BYTES_PERIOD)
}

impl Iter for DBIterator {
    fn valid(&self) -> bool {
        self.valid
    }

    fn seek_to_first(&mut self) {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.inner.seek_to_first();
        if self.inner.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    fn seek_to_last(&mut self) {
        self.direction = Direction::Reverse;
        self.saved_value.clear();
        self.saved_key.clear();
        self.inner.seek_to_last();
        self.find_prev_user_entry();
    }

    fn seek(&mut self, target: &[u8]) {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.saved_key.clear();
        let mut probe = Vec::with_capacity(target.len() + 8);
        append_internal_key(&mut probe, target, self.sequence, VALUE_TYPE_FOR_SEEK);
        self.inner.seek(&probe);
        if self.inner.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid);

        if self.direction == Direction::Reverse {
            self.direction = Direction::Forward;
            // inner sits before every entry of the current key; step to
            // the first entry at or after it.
            if !self.inner.valid() {
                self.inner.seek_to_first();
            } else {
                self.inner.next();
            }
            if !self.inner.valid() {
                self.valid = false;
                self.saved_key.clear();
                return;
            }
            // saved_key already holds the current user key to skip.
        } else {
            // Remember the emitted user key so older versions of it are
            // skipped.
            self.saved_key = self
                .user_key_of_current()
                .to_vec();
        }

        self.find_next_user_entry(true);
    }

    fn prev(&mut self) {
        debug_assert!(self.valid);

        if self.direction == Direction::Forward {
            // inner is at the current entry; walk back past every entry
            // of the current user key.
            debug_assert!(self.inner.valid());
            self.saved_key = self.user_key_of_current().to_vec();
            loop {
                self.inner.prev();
                if !self.inner.valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    self.saved_value.clear();
                    return;
                }
                let user_key = crate::key::extract_user_key(self.inner.key());
                if self.user_comparator.compare(user_key, &self.saved_key) == Ordering::Less {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }

        self.find_prev_user_entry();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        match self.direction {
            Direction::Forward => crate::key::extract_user_key(self.inner.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        match self.direction {
            Direction::Forward => self.inner.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    fn status(&mut self) -> Result<()> {
        self.status.clone()?;
        self.inner.status()
    }
}

impl DBIterator {
    fn user_key_of_current(&self) -> &[u8] {
        crate::key::extract_user_key(self.inner.key())
    }
}
