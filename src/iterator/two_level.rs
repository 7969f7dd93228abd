//! Index-then-data iteration.
//!
//! A two-level iterator walks an outer "index" iterator whose values
//! locate inner data sequences, materializing each inner iterator on
//! demand. Tables use it with their index block over data blocks; the
//! version layer uses it with a per-level file list over whole tables.

use crate::error::Result;
use crate::iterator::Iter;

/// Produces the inner iterator for an index entry's value.
pub type BlockIterBuilder = Box<dyn Fn(&[u8]) -> Result<Box<dyn Iter>>>;

pub struct TwoLevelIterator {
    index_iter: Box<dyn Iter>,
    block_builder: BlockIterBuilder,
    data_iter: Option<Box<dyn Iter>>,
    /// Index value the current `data_iter` was built from; avoids
    /// rebuilding when outer movement lands on the same block.
    data_block_handle: Vec<u8>,
    status: Result<()>,
}

impl TwoLevelIterator {
    pub fn new(index_iter: Box<dyn Iter>, block_builder: BlockIterBuilder) -> Self {
        TwoLevelIterator {
            index_iter,
            block_builder,
            data_iter: None,
            data_block_handle: Vec::new(),
            status: Ok(()),
        }
    }

    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.data_iter = None;
            return;
        }
        let handle = self.index_iter.value();
        if self.data_iter.is_some() && self.data_block_handle == handle {
            // data_iter already points at this block.
            return;
        }
        match (self.block_builder)(handle) {
            Ok(iter) => {
                self.data_block_handle = handle.to_vec();
                self.data_iter = Some(iter);
            }
            Err(e) => {
                if self.status.is_ok() {
                    self.status = Err(e);
                }
                self.data_iter = None;
            }
        }
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |it| !it.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(it) = self.data_iter.as_mut() {
                it.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |it| !it.valid()) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(it) = self.data_iter.as_mut() {
                it.seek_to_last();
            }
        }
    }
}

impl Iter for TwoLevelIterator {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|it| it.valid())
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(it) = self.data_iter.as_mut() {
            it.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(it) = self.data_iter.as_mut() {
            it.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(it) = self.data_iter.as_mut() {
            it.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        self.data_iter
            .as_mut()
            .expect("next on invalid two-level iterator")
            .next();
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        self.data_iter
            .as_mut()
            .expect("prev on invalid two-level iterator")
            .prev();
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        self.data_iter.as_ref().unwrap().key()
    }

    fn value(&self) -> &[u8] {
        self.data_iter.as_ref().unwrap().value()
    }

    fn status(&mut self) -> Result<()> {
        self.index_iter.status()?;
        if let Some(it) = self.data_iter.as_mut() {
            it.status()?;
        }
        self.status.clone()
    }
}
