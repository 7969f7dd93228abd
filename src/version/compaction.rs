//! A picked compaction: its inputs and the bookkeeping that shapes its
//! outputs.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::key::extract_user_key;
use crate::version::edit::VersionEdit;
use crate::version::{
    max_grandparent_overlap_bytes, total_file_size, FileMetaData, Version,
};
use crate::{Options, NUM_LEVELS};

/// Merge of `inputs[0]` (level L) with `inputs[1]` (level L+1),
/// producing new level-(L+1) files.
pub struct Compaction {
    level: usize,
    max_output_file_size: u64,
    grandparent_overlap_limit: u64,
    /// The version the inputs were chosen from; pinned so no input file
    /// is deleted mid-compaction.
    pub(crate) input_version: Option<Arc<Version>>,
    /// The manifest delta this compaction will install.
    pub edit: VersionEdit,
    pub(crate) inputs: [Vec<Arc<FileMetaData>>; 2],
    /// Level L+2 files overlapping the key range, consulted to split
    /// outputs before they overlap too much of the next compaction.
    pub(crate) grandparents: Vec<Arc<FileMetaData>>,
    grandparent_index: usize,
    seen_key: bool,
    /// Bytes of grandparent overlap accumulated for the current output.
    overlapped_bytes: u64,
    /// Per-level cursors for `is_base_level_for_key`, valid because
    /// compaction consumes keys in ascending order.
    level_ptrs: [usize; NUM_LEVELS],
}

impl Compaction {
    pub(crate) fn new(options: &Options, level: usize) -> Compaction {
        Compaction {
            level,
            max_output_file_size: options.max_file_size as u64,
            grandparent_overlap_limit: max_grandparent_overlap_bytes(options),
            input_version: None,
            edit: VersionEdit::new(),
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: [0; NUM_LEVELS],
        }
    }

    /// The level being compacted; outputs land at `level() + 1`.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    pub fn input(&self, which: usize, i: usize) -> &Arc<FileMetaData> {
        &self.inputs[which][i]
    }

    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    /// A single input file with nothing to merge against and modest
    /// grandparent overlap can simply be relabeled one level down.
    pub fn is_trivial_move(&self) -> bool {
        self.num_input_files(0) == 1
            && self.num_input_files(1) == 0
            && total_file_size(&self.grandparents) <= self.grandparent_overlap_limit
    }

    /// Record every input file as deleted in the edit.
    pub fn add_input_deletions(&mut self) {
        let mut deletions = Vec::new();
        for which in 0..2 {
            for file in &self.inputs[which] {
                deletions.push((self.level + which, file.number));
            }
        }
        for (level, number) in deletions {
            self.edit.remove_file(level, number);
        }
    }

    /// True when no level deeper than the output holds `user_key`, so
    /// a tombstone at or below the smallest snapshot can be dropped
    /// outright.
    pub fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let version = self
            .input_version
            .as_ref()
            .expect("compaction without input version");
        let ucmp = version.icmp().user_comparator();
        for level in self.level + 2..NUM_LEVELS {
            let files = &version.files[level];
            while self.level_ptrs[level] < files.len() {
                let file = &files[self.level_ptrs[level]];
                if ucmp.compare(user_key, file.largest.user_key()) != Ordering::Greater {
                    if ucmp.compare(user_key, file.smallest.user_key()) != Ordering::Less {
                        return false;
                    }
                    break;
                }
                // Keys arrive in ascending order; never look back.
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// True when the current output should be closed before writing
    /// `internal_key`, to bound how many grandparent files a single
    /// output overlaps.
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        let version = self
            .input_version
            .as_ref()
            .expect("compaction without input version");
        let icmp = version.icmp();
        while self.grandparent_index < self.grandparents.len()
            && icmp.compare(
                internal_key,
                self.grandparents[self.grandparent_index].largest.encoded(),
            ) == Ordering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size;
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > self.grandparent_overlap_limit {
            self.overlapped_bytes = 0;
            return true;
        }
        false
    }

    /// Drop the pin on the input version once the compaction's edit has
    /// been installed (or abandoned).
    pub fn release_inputs(&mut self) {
        self.input_version = None;
    }
}

impl std::fmt::Debug for Compaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let numbers = |which: usize| -> Vec<u64> {
            self.inputs[which].iter().map(|f| f.number).collect()
        };
        f.debug_struct("Compaction")
            .field("level", &self.level)
            .field("inputs0", &numbers(0))
            .field("inputs1", &numbers(1))
            .field(
                "grandparents",
                &self.grandparents.iter().map(|g| g.number).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Extend `inputs` with same-level files whose key ranges abut the
/// current largest key on the same user key: a newer version of a user
/// key must never be compacted down while an older version stays
/// behind.
pub(crate) fn add_boundary_inputs(
    icmp: &crate::comparator::InternalKeyComparator,
    level_files: &[Arc<FileMetaData>],
    inputs: &mut Vec<Arc<FileMetaData>>,
) {
    let mut largest = match largest_key(icmp, inputs) {
        Some(key) => key,
        None => return,
    };
    loop {
        match find_smallest_boundary_file(icmp, level_files, &largest) {
            Some(boundary) => {
                largest = boundary.largest.encoded().to_vec();
                inputs.push(boundary);
            }
            None => break,
        }
    }
}

fn largest_key(
    icmp: &crate::comparator::InternalKeyComparator,
    files: &[Arc<FileMetaData>],
) -> Option<Vec<u8>> {
    let mut largest: Option<&[u8]> = None;
    for file in files {
        let key = file.largest.encoded();
        largest = match largest {
            None => Some(key),
            Some(current) => {
                if icmp.compare(key, current) == Ordering::Greater {
                    Some(key)
                } else {
                    Some(current)
                }
            }
        };
    }
    largest.map(|k| k.to_vec())
}

fn find_smallest_boundary_file(
    icmp: &crate::comparator::InternalKeyComparator,
    level_files: &[Arc<FileMetaData>],
    largest_key: &[u8],
) -> Option<Arc<FileMetaData>> {
    let ucmp = icmp.user_comparator();
    let mut smallest_boundary: Option<Arc<FileMetaData>> = None;
    for file in level_files {
        // A boundary file starts after `largest_key` but on the same
        // user key (an older version stranded in a different file).
        if icmp.compare(file.smallest.encoded(), largest_key) == Ordering::Greater
            && ucmp.compare(file.smallest.user_key(), extract_user_key(largest_key))
                == Ordering::Equal
        {
            let replace = match &smallest_boundary {
                None => true,
                Some(current) => {
                    icmp.compare(file.smallest.encoded(), current.smallest.encoded())
                        == Ordering::Less
                }
            };
            if replace {
                smallest_boundary = Some(Arc::clone(file));
            }
        }
    }
    smallest_boundary
}
