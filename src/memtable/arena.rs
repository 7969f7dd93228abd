//! Bump allocation for memtable entries and skip-list nodes.
//!
//! The arena hands out raw byte spans from 4 KiB blocks. Nothing is ever
//! freed individually; all blocks drop together with the arena, which
//! happens once the owning memtable's last reference goes away. That
//! one-way lifecycle is what lets skip-list readers hold bare pointers
//! into the arena without any per-node bookkeeping.
//!
//! # Concurrency
//!
//! Exactly one thread allocates at a time (the single writer that feeds
//! the memtable). Any number of threads may concurrently read previously
//! allocated spans and [`Arena::memory_usage`].

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

const BLOCK_SIZE: usize = 4096;

pub struct Arena {
    inner: UnsafeCell<Inner>,
    /// Total bytes allocated from the OS, including per-block
    /// bookkeeping. Readable without synchronization.
    memory_usage: AtomicUsize,
}

struct Inner {
    /// Bump pointer into the current block.
    alloc_ptr: *mut u8,
    /// Bytes left in the current block.
    alloc_remaining: usize,
    /// Every block ever allocated; keeps the memory alive.
    blocks: Vec<Box<[u8]>>,
}

// Readers only dereference spans handed out earlier and load the usage
// counter; mutation is confined to the single writer. See module docs.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    pub fn new() -> Arena {
        Arena {
            inner: UnsafeCell::new(Inner {
                alloc_ptr: std::ptr::null_mut(),
                alloc_remaining: 0,
                blocks: Vec::new(),
            }),
            memory_usage: AtomicUsize::new(0),
        }
    }

    /// Allocate `bytes` with no alignment guarantee.
    ///
    /// Must only be called from the writer thread.
    pub fn allocate(&self, bytes: usize) -> *mut u8 {
        assert!(bytes > 0);
        let inner = unsafe { &mut *self.inner.get() };
        if bytes <= inner.alloc_remaining {
            let result = inner.alloc_ptr;
            inner.alloc_ptr = unsafe { inner.alloc_ptr.add(bytes) };
            inner.alloc_remaining -= bytes;
            return result;
        }
        self.allocate_fallback(inner, bytes)
    }

    /// Allocate `bytes` aligned for pointer-sized atomics.
    ///
    /// Must only be called from the writer thread.
    pub fn allocate_aligned(&self, bytes: usize) -> *mut u8 {
        let align = std::cmp::max(8, std::mem::align_of::<usize>());
        debug_assert!(align.is_power_of_two());
        let inner = unsafe { &mut *self.inner.get() };

        let current_mod = inner.alloc_ptr as usize & (align - 1);
        let slop = if current_mod == 0 { 0 } else { align - current_mod };
        let needed = bytes + slop;
        if needed <= inner.alloc_remaining {
            let result = unsafe { inner.alloc_ptr.add(slop) };
            inner.alloc_ptr = unsafe { inner.alloc_ptr.add(needed) };
            inner.alloc_remaining -= needed;
            return result;
        }
        // Fresh blocks are always max-aligned.
        self.allocate_fallback(inner, bytes)
    }

    /// Total bytes reserved by the arena.
    #[inline]
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Relaxed)
    }

    fn allocate_fallback(&self, inner: &mut Inner, bytes: usize) -> *mut u8 {
        if bytes > BLOCK_SIZE / 4 {
            // A dedicated block avoids wasting the tail of the current
            // block on oversized requests.
            return self.allocate_new_block(inner, bytes);
        }

        let ptr = self.allocate_new_block(inner, BLOCK_SIZE);
        inner.alloc_ptr = unsafe { ptr.add(bytes) };
        inner.alloc_remaining = BLOCK_SIZE - bytes;
        ptr
    }

    fn allocate_new_block(&self, inner: &mut Inner, block_bytes: usize) -> *mut u8 {
        let mut block = vec![0u8; block_bytes].into_boxed_slice();
        let ptr = block.as_mut_ptr();
        inner.blocks.push(block);
        self.memory_usage.fetch_add(
            block_bytes + std::mem::size_of::<Box<[u8]>>(),
            Ordering::Relaxed,
        );
        ptr
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}
