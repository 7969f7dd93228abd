//! Ordered index behind the memtable.
//!
//! A probabilistic skip list whose nodes and keys live in an [`Arena`].
//! Readers are wait-free and may run concurrently with the single
//! writer; the writer publishes each new node with a release store on
//! the predecessor link after the node is fully initialized, so a reader
//! observes either the old list or the complete new node, never a
//! half-built one.
//!
//! `max_height` is read with relaxed ordering. A reader that sees a
//! height the writer has bumped but whose levels are not yet linked just
//! finds null links there and drops down a level, which is the normal
//! end-of-level case.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::comparator::Comparator;
use crate::memtable::arena::Arena;

const MAX_HEIGHT: usize = 12;
const BRANCHING: u32 = 4;

#[repr(C)]
struct Node {
    key_ptr: *const u8,
    key_len: usize,
    /// First slot of the link tower; a node of height `h` is allocated
    /// with `h` consecutive slots. Never index past the height the node
    /// was created with.
    tower: [AtomicPtr<Node>; 1],
}

impl Node {
    #[inline]
    fn key(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.key_ptr, self.key_len) }
    }

    #[inline]
    fn tower_slot(&self, level: usize) -> &AtomicPtr<Node> {
        unsafe { &*self.tower.as_ptr().add(level) }
    }

    #[inline]
    fn next(&self, level: usize) -> *mut Node {
        // Acquire pairs with the release in set_next: everything the
        // writer did to the returned node is visible.
        self.tower_slot(level).load(Ordering::Acquire)
    }

    #[inline]
    fn set_next(&self, level: usize, node: *mut Node) {
        self.tower_slot(level).store(node, Ordering::Release);
    }

    #[inline]
    fn nobarrier_next(&self, level: usize) -> *mut Node {
        self.tower_slot(level).load(Ordering::Relaxed)
    }

    #[inline]
    fn nobarrier_set_next(&self, level: usize, node: *mut Node) {
        self.tower_slot(level).store(node, Ordering::Relaxed);
    }

    fn alloc(arena: &Arena, key: &[u8], height: usize) -> *mut Node {
        let size = std::mem::size_of::<Node>()
            + (height - 1) * std::mem::size_of::<AtomicPtr<Node>>();
        let mem = arena.allocate_aligned(size) as *mut Node;
        unsafe {
            (*mem).key_ptr = key.as_ptr();
            (*mem).key_len = key.len();
            for level in 0..height {
                (*mem)
                    .tower
                    .as_mut_ptr()
                    .add(level)
                    .write(AtomicPtr::new(ptr::null_mut()));
            }
        }
        mem
    }
}

pub struct SkipList<C: Comparator> {
    comparator: C,
    arena: Arc<Arena>,
    head: *mut Node,
    max_height: AtomicUsize,
}

unsafe impl<C: Comparator> Send for SkipList<C> {}
unsafe impl<C: Comparator> Sync for SkipList<C> {}

impl<C: Comparator> SkipList<C> {
    pub fn new(comparator: C, arena: Arc<Arena>) -> Self {
        let head = Node::alloc(&arena, &[], MAX_HEIGHT);
        SkipList {
            comparator,
            arena,
            head,
            max_height: AtomicUsize::new(1),
        }
    }

    /// Insert `key`. No equal key may already be present.
    ///
    /// `key` must point into this list's arena (entries are encoded
    /// there by the memtable) and callers serialize inserts externally:
    /// one writer at a time.
    pub fn insert(&self, key: &[u8]) {
        let mut prev = [ptr::null_mut::<Node>(); MAX_HEIGHT];
        let node = self.find_greater_or_equal(key, Some(&mut prev));
        assert!(
            node.is_null() || self.comparator.compare(unsafe { (*node).key() }, key) != std::cmp::Ordering::Equal,
            "duplicate key inserted into skip list"
        );

        let height = self.random_height();
        let list_height = self.height();
        if height > list_height {
            for slot in prev.iter_mut().take(height).skip(list_height) {
                *slot = self.head;
            }
            // Concurrent readers that observe the new height before the
            // new node is linked find null links and fall through to a
            // lower level, which is harmless.
            self.max_height.store(height, Ordering::Relaxed);
        }

        let node = Node::alloc(&self.arena, key, height);
        for level in 0..height {
            unsafe {
                // The node is unpublished, so its own link can be lazy;
                // the predecessor store is the release that publishes it.
                (*node).nobarrier_set_next(level, (*prev[level]).nobarrier_next(level));
                (*prev[level]).set_next(level, node);
            }
        }
    }

    /// True if an equal key is in the list.
    pub fn contains(&self, key: &[u8]) -> bool {
        let node = self.find_greater_or_equal(key, None);
        !node.is_null()
            && self.comparator.compare(unsafe { (*node).key() }, key) == std::cmp::Ordering::Equal
    }

    #[inline]
    fn height(&self) -> usize {
        self.max_height.load(Ordering::Relaxed)
    }

    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_ratio(1, BRANCHING) {
            height += 1;
        }
        height
    }

    /// True if `key` sorts after the key in `node` (null = past the end).
    fn key_is_after_node(&self, key: &[u8], node: *mut Node) -> bool {
        !node.is_null()
            && self.comparator.compare(unsafe { (*node).key() }, key) == std::cmp::Ordering::Less
    }

    /// First node with key ≥ `key`, or null. When `prev` is supplied it
    /// receives the predecessor at every level, for linking an insert.
    fn find_greater_or_equal(
        &self,
        key: &[u8],
        mut prev: Option<&mut [*mut Node; MAX_HEIGHT]>,
    ) -> *mut Node {
        let mut node = self.head;
        let mut level = self.height() - 1;
        loop {
            let next = unsafe { (*node).next(level) };
            if self.key_is_after_node(key, next) {
                node = next;
            } else {
                if let Some(prev) = prev.as_deref_mut() {
                    prev[level] = node;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    /// Last node with key < `key`, or the head sentinel.
    fn find_less_than(&self, key: &[u8]) -> *mut Node {
        let mut node = self.head;
        let mut level = self.height() - 1;
        loop {
            let next = unsafe { (*node).next(level) };
            if next.is_null()
                || self.comparator.compare(unsafe { (*next).key() }, key)
                    != std::cmp::Ordering::Less
            {
                if level == 0 {
                    return node;
                }
                level -= 1;
            } else {
                node = next;
            }
        }
    }

    /// Last node in the list, or the head sentinel when empty.
    fn find_last(&self) -> *mut Node {
        let mut node = self.head;
        let mut level = self.height() - 1;
        loop {
            let next = unsafe { (*node).next(level) };
            if next.is_null() {
                if level == 0 {
                    return node;
                }
                level -= 1;
            } else {
                node = next;
            }
        }
    }
}

/// Cursor over a [`SkipList`].
///
/// Holds a borrowed list internally via raw pointer so owners (the
/// memtable iterator) can pair it with whatever keeps the list alive.
pub struct SkipListCursor {
    node: *const Node,
}

impl SkipListCursor {
    pub fn new() -> Self {
        SkipListCursor { node: ptr::null() }
    }

    #[inline]
    pub fn valid(&self) -> bool {
        !self.node.is_null()
    }

    /// Key at the cursor. The returned slice lives in the list's arena.
    #[inline]
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        unsafe { (*self.node).key() }
    }

    pub fn seek<C: Comparator>(&mut self, list: &SkipList<C>, target: &[u8]) {
        self.node = list.find_greater_or_equal(target, None);
    }

    pub fn seek_to_first<C: Comparator>(&mut self, list: &SkipList<C>) {
        self.node = unsafe { (*list.head).next(0) };
    }

    pub fn seek_to_last<C: Comparator>(&mut self, list: &SkipList<C>) {
        let node = list.find_last();
        self.node = if node == list.head { ptr::null() } else { node };
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid());
        self.node = unsafe { (*self.node).next(0) };
    }

    /// There are no back links; stepping back re-searches for the last
    /// key before the current one.
    pub fn prev<C: Comparator>(&mut self, list: &SkipList<C>) {
        debug_assert!(self.valid());
        let node = list.find_less_than(self.key());
        self.node = if node == list.head { ptr::null() } else { node };
    }
}

impl Default for SkipListCursor {
    fn default() -> Self {
        Self::new()
    }
}
