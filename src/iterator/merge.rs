//! K-way merge over sorted child iterators.

use std::cmp::Ordering;

use crate::comparator::Comparator;
use crate::error::Result;
use crate::iterator::Iter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges several sorted iterators into one sorted stream.
///
/// Children must each be sorted under the same comparator. Entries with
/// equal keys across children are all yielded; when that matters (e.g.
/// internal keys during a scan), the caller supplies children in
/// newest-first order and relies on the merge being stable with respect
/// to child index.
pub struct MergingIterator<C: Comparator> {
    comparator: C,
    children: Vec<Box<dyn Iter>>,
    current: Option<usize>,
    direction: Direction,
}

impl<C: Comparator> MergingIterator<C> {
    pub fn new(comparator: C, children: Vec<Box<dyn Iter>>) -> Self {
        MergingIterator {
            comparator,
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for i in 0..self.children.len() {
            if !self.children[i].valid() {
                continue;
            }
            smallest = match smallest {
                None => Some(i),
                Some(s) => {
                    // `<` keeps the earlier (newer) child on ties.
                    if self
                        .comparator
                        .compare(self.children[i].key(), self.children[s].key())
                        == Ordering::Less
                    {
                        Some(i)
                    } else {
                        Some(s)
                    }
                }
            };
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for i in (0..self.children.len()).rev() {
            if !self.children[i].valid() {
                continue;
            }
            largest = match largest {
                None => Some(i),
                Some(l) => {
                    if self
                        .comparator
                        .compare(self.children[i].key(), self.children[l].key())
                        == Ordering::Greater
                    {
                        Some(i)
                    } else {
                        Some(l)
                    }
                }
            };
        }
        self.current = largest;
    }
}

impl<C: Comparator> Iter for MergingIterator<C> {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.direction = Direction::Forward;
        self.find_smallest();
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.direction = Direction::Reverse;
        self.find_largest();
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.direction = Direction::Forward;
        self.find_smallest();
    }

    fn next(&mut self) {
        let current = self.current.expect("next on invalid merging iterator");

        // After reverse movement every non-current child sits before the
        // current key; bring them all to the first entry after it.
        if self.direction == Direction::Reverse {
            let key = self.children[current].key().to_vec();
            for i in 0..self.children.len() {
                if i == current {
                    continue;
                }
                let child = &mut self.children[i];
                child.seek(&key);
                if child.valid() && self.comparator.compare(&key, child.key()) == Ordering::Equal {
                    child.next();
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        let current = self.current.expect("prev on invalid merging iterator");

        // Mirror image of next(): position every non-current child at the
        // last entry before the current key.
        if self.direction == Direction::Forward {
            let key = self.children[current].key().to_vec();
            for i in 0..self.children.len() {
                if i == current {
                    continue;
                }
                let child = &mut self.children[i];
                child.seek(&key);
                if child.valid() {
                    // Child is at the first entry >= key; step back.
                    child.prev();
                } else {
                    // Everything in this child is < key.
                    child.seek_to_last();
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        self.children[self.current.expect("key on invalid merging iterator")].key()
    }

    fn value(&self) -> &[u8] {
        self.children[self.current.expect("value on invalid merging iterator")].value()
    }

    fn status(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.status()?;
        }
        Ok(())
    }
}
