//! Seekable, bidirectional iteration.
//!
//! Unlike `std::iter::Iterator`, storage iterators are cursors: they can
//! be positioned from either end or at an arbitrary key, walked in both
//! directions, and queried for the current entry without advancing.
//! I/O and corruption problems park the cursor in the invalid state and
//! are reported through [`Iter::status`].

pub mod merge;
pub mod two_level;

pub use merge::MergingIterator;
pub use two_level::TwoLevelIterator;

use crate::error::Result;

/// A cursor over an ordered sequence of key-value entries.
pub trait Iter {
    /// True when positioned at an entry; `key`/`value` may only be
    /// called while valid.
    fn valid(&self) -> bool;

    /// Position at the first entry.
    fn seek_to_first(&mut self);

    /// Position at the last entry.
    fn seek_to_last(&mut self);

    /// Position at the first entry with key ≥ `target`.
    fn seek(&mut self, target: &[u8]);

    /// Advance to the next entry.
    fn next(&mut self);

    /// Step back to the previous entry.
    fn prev(&mut self);

    /// Key at the current position.
    fn key(&self) -> &[u8];

    /// Value at the current position.
    fn value(&self) -> &[u8];

    /// First error this cursor encountered, if any.
    fn status(&mut self) -> Result<()>;
}

/// An iterator over nothing, optionally carrying an error.
pub struct EmptyIterator {
    status: Result<()>,
}

impl EmptyIterator {
    pub fn new() -> Self {
        EmptyIterator { status: Ok(()) }
    }

    pub fn with_error(err: crate::Error) -> Self {
        EmptyIterator { status: Err(err) }
    }
}

impl Default for EmptyIterator {
    fn default() -> Self {
        Self::new()
    }
}

impl Iter for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }

    fn seek_to_first(&mut self) {}

    fn seek_to_last(&mut self) {}

    fn seek(&mut self, _target: &[u8]) {}

    fn next(&mut self) {
        unreachable!("next on an empty iterator")
    }

    fn prev(&mut self) {
        unreachable!("prev on an empty iterator")
    }

    fn key(&self) -> &[u8] {
        panic!("key on an empty iterator")
    }

    fn value(&self) -> &[u8] {
        panic!("value on an empty iterator")
    }

    fn status(&mut self) -> Result<()> {
        self.status.clone()
    }
}
