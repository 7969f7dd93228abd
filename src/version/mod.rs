//! Versioned file sets.
//!
//! A [`Version`] is an immutable snapshot of which table files exist
//! and at which level. Level 0 files may overlap and are consulted
//! newest-first; levels 1 and up hold disjoint, sorted key ranges, so a
//! point read touches at most one file per level.
//!
//! Versions are shared behind `Arc`: readers and running compactions
//! pin the version they started with, while the
//! [`VersionSet`](set::VersionSet) installs successors. A table file is
//! deletable only once no live version references it.

pub mod compaction;
pub mod edit;
pub mod set;

#[cfg(test)]
mod tests;

pub use compaction::Compaction;
pub use edit::VersionEdit;
pub use set::VersionSet;

use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::encoding::put_fixed64;
use crate::error::Result;
use crate::iterator::{Iter, TwoLevelIterator};
use crate::key::{
    parse_internal_key, InternalKey, LookupKey, ValueType, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK,
};
use crate::sstable::TableCache;
use crate::{Options, ReadOptions, NUM_LEVELS};

/// Level-0 file count that wakes the size-compaction trigger.
pub const L0_COMPACTION_TRIGGER: usize = 4;

/// Level-0 file count at which writes are briefly slowed.
pub const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/// Level-0 file count at which writes stop until compaction catches up.
pub const L0_STOP_WRITES_TRIGGER: usize = 12;

/// Highest level a fresh memtable flush may be placed at when nothing
/// overlaps it.
pub const MAX_MEM_COMPACT_LEVEL: usize = 2;

/// Approximate bytes of iteration between read samples.
pub const READ_BYTES_PERIOD: u64 = 1_048_576;

/// Byte budget for a level: 10 MiB at level 1, ×10 per level after.
pub fn max_bytes_for_level(level: usize) -> f64 {
    let mut result = 10.0 * 1048576.0;
    let mut level = level;
    while level > 1 {
        result *= 10.0;
        level -= 1;
    }
    result
}

/// Output file cap; identical for every level.
pub fn max_file_size_for_level(options: &Options, _level: usize) -> u64 {
    options.max_file_size as u64
}

/// Grandparent-overlap bound that splits compaction outputs.
pub fn max_grandparent_overlap_bytes(options: &Options) -> u64 {
    10 * options.max_file_size as u64
}

/// Cap on widening the lower level of a compaction.
pub fn expanded_compaction_byte_size_limit(options: &Options) -> u64 {
    25 * options.max_file_size as u64
}

pub fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

/// Per-table metadata carried by versions and manifest edits.
#[derive(Debug)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
    /// Seeks this file may absorb before it becomes a compaction
    /// candidate. Charged by reads that consulted it fruitlessly.
    pub allowed_seeks: AtomicI64,
}

impl FileMetaData {
    pub fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        FileMetaData {
            number,
            file_size,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(1 << 30),
        }
    }
}

impl Clone for FileMetaData {
    fn clone(&self) -> Self {
        FileMetaData {
            number: self.number,
            file_size: self.file_size,
            smallest: self.smallest.clone(),
            largest: self.largest.clone(),
            allowed_seeks: AtomicI64::new(self.allowed_seeks.load(AtomicOrdering::Relaxed)),
        }
    }
}

/// Index of the first file whose largest key is ≥ `key`.
pub fn find_file(icmp: &InternalKeyComparator, files: &[Arc<FileMetaData>], key: &[u8]) -> usize {
    files.partition_point(|f| icmp.compare(f.largest.encoded(), key) == Ordering::Less)
}

fn after_file(ucmp: &Arc<dyn Comparator>, user_key: Option<&[u8]>, file: &FileMetaData) -> bool {
    match user_key {
        Some(user_key) => ucmp.compare(user_key, file.largest.user_key()) == Ordering::Greater,
        // No lower bound: nothing is after the file.
        None => false,
    }
}

fn before_file(ucmp: &Arc<dyn Comparator>, user_key: Option<&[u8]>, file: &FileMetaData) -> bool {
    match user_key {
        Some(user_key) => ucmp.compare(user_key, file.smallest.user_key()) == Ordering::Less,
        None => false,
    }
}

/// Does any file in `files` overlap `[smallest_user_key, largest_user_key]`?
/// `disjoint_sorted_files` turns on the binary-search fast path valid
/// for levels ≥ 1.
pub fn some_file_overlaps_range(
    icmp: &InternalKeyComparator,
    disjoint_sorted_files: bool,
    files: &[Arc<FileMetaData>],
    smallest_user_key: Option<&[u8]>,
    largest_user_key: Option<&[u8]>,
) -> bool {
    let ucmp = icmp.user_comparator();
    if !disjoint_sorted_files {
        return files
            .iter()
            .any(|f| !after_file(ucmp, smallest_user_key, f) && !before_file(ucmp, largest_user_key, f));
    }

    let index = match smallest_user_key {
        Some(user_key) => {
            let small =
                InternalKey::new(user_key, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK);
            find_file(icmp, files, small.encoded())
        }
        None => 0,
    };
    if index >= files.len() {
        return false;
    }
    !before_file(ucmp, largest_user_key, &files[index])
}

/// Outcome bookkeeping of a point read: the first file consulted
/// without an answer, for seek-compaction accounting.
#[derive(Clone)]
pub struct GetStats {
    pub seek_file: Arc<FileMetaData>,
    pub seek_file_level: usize,
}

pub struct Version {
    icmp: InternalKeyComparator,
    options: Options,
    table_cache: Arc<TableCache>,
    /// Files per level; level 0 sorted newest-first by file number,
    /// deeper levels sorted by smallest key with disjoint ranges.
    pub files: Vec<Vec<Arc<FileMetaData>>>,
    /// Next file to compact due to exhausted seek allowance, set under
    /// the engine lock.
    seek_compact_file: Mutex<Option<(Arc<FileMetaData>, usize)>>,
    /// Best size-compaction candidate, precomputed on install.
    pub(crate) compaction_score: f64,
    pub(crate) compaction_level: usize,
}

impl Version {
    pub(crate) fn new(
        icmp: InternalKeyComparator,
        options: Options,
        table_cache: Arc<TableCache>,
    ) -> Version {
        Version {
            icmp,
            options,
            table_cache,
            files: vec![Vec::new(); NUM_LEVELS],
            seek_compact_file: Mutex::new(None),
            compaction_score: -1.0,
            compaction_level: 0,
        }
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    pub(crate) fn icmp(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    /// The files a point read of `user_key` must consult, newest to
    /// oldest; stops when `visit` returns false.
    fn for_each_overlapping(
        &self,
        user_key: &[u8],
        internal_key: &[u8],
        mut visit: impl FnMut(usize, &Arc<FileMetaData>) -> bool,
    ) {
        let ucmp = self.icmp.user_comparator();

        // Level 0: all overlapping files, newest first.
        let mut l0: Vec<&Arc<FileMetaData>> = self.files[0]
            .iter()
            .filter(|f| {
                ucmp.compare(user_key, f.smallest.user_key()) != Ordering::Less
                    && ucmp.compare(user_key, f.largest.user_key()) != Ordering::Greater
            })
            .collect();
        l0.sort_by(|a, b| b.number.cmp(&a.number));
        for file in l0 {
            if !visit(0, file) {
                return;
            }
        }

        // Deeper levels: at most one candidate each.
        for level in 1..NUM_LEVELS {
            let files = &self.files[level];
            if files.is_empty() {
                continue;
            }
            let index = find_file(&self.icmp, files, internal_key);
            if index < files.len() {
                let file = &files[index];
                if ucmp.compare(user_key, file.smallest.user_key()) != Ordering::Less {
                    if !visit(level, file) {
                        return;
                    }
                }
            }
        }
    }

    /// Point lookup against the file set. `Ok(Some(v))` for a live
    /// value, `Ok(None)` for absent or deleted. The returned stats name
    /// the first file that was consulted without yielding an answer,
    /// when more than one file was touched.
    pub fn get(
        &self,
        read_options: &ReadOptions,
        key: &LookupKey,
    ) -> (Result<Option<Vec<u8>>>, Option<GetStats>) {
        let ucmp = self.icmp.user_comparator().clone();
        let mut stats: Option<GetStats> = None;
        let mut last_file_read: Option<(Arc<FileMetaData>, usize)> = None;
        let mut outcome: Option<Result<Option<Vec<u8>>>> = None;

        self.for_each_overlapping(key.user_key(), key.internal_key(), |level, file| {
            if stats.is_none() {
                if let Some((seek_file, seek_level)) = last_file_read.take() {
                    // Second file consulted: charge the first one.
                    stats = Some(GetStats {
                        seek_file,
                        seek_file_level: seek_level,
                    });
                }
            }
            last_file_read = Some((Arc::clone(file), level));

            match self
                .table_cache
                .get(read_options, file.number, file.file_size, key.internal_key())
            {
                Err(e) => {
                    outcome = Some(Err(e));
                    false
                }
                Ok(None) => true,
                Ok(Some((found_key, found_value))) => match parse_internal_key(&found_key) {
                    None => {
                        outcome = Some(Err(crate::Error::corruption(
                            "corrupted internal key in table",
                        )));
                        false
                    }
                    Some(parsed) => {
                        if ucmp.compare(parsed.user_key, key.user_key()) != Ordering::Equal {
                            // Nothing for this user key here; keep going.
                            true
                        } else {
                            match parsed.value_type {
                                ValueType::Value => {
                                    outcome = Some(Ok(Some(found_value)));
                                    false
                                }
                                ValueType::Deletion => {
                                    outcome = Some(Ok(None));
                                    false
                                }
                            }
                        }
                    }
                },
            }
        });

        (outcome.unwrap_or(Ok(None)), stats)
    }

    /// Charge a seek to the file `get` consulted first. Returns true
    /// when the file's allowance ran out and a compaction should be
    /// scheduled. Caller holds the engine lock.
    pub fn update_stats(&self, stats: &GetStats) -> bool {
        let remaining = stats.seek_file.allowed_seeks.fetch_sub(1, AtomicOrdering::Relaxed) - 1;
        let mut pending = self.seek_compact_file.lock().unwrap();
        if remaining <= 0 && pending.is_none() {
            *pending = Some((Arc::clone(&stats.seek_file), stats.seek_file_level));
            return true;
        }
        false
    }

    /// Account one sampled read during iteration: when two or more
    /// files would have been consulted for this key, charge the first.
    /// Caller holds the engine lock.
    pub fn record_read_sample(&self, internal_key: &[u8]) -> bool {
        let parsed = match parse_internal_key(internal_key) {
            Some(parsed) => parsed,
            None => return false,
        };

        let mut first: Option<GetStats> = None;
        let mut matches = 0;
        self.for_each_overlapping(parsed.user_key, internal_key, |level, file| {
            matches += 1;
            if matches == 1 {
                first = Some(GetStats {
                    seek_file: Arc::clone(file),
                    seek_file_level: level,
                });
            }
            matches < 2
        });

        if matches >= 2 {
            if let Some(stats) = first {
                return self.update_stats(&stats);
            }
        }
        false
    }

    /// The file whose seek allowance ran out, if any.
    pub(crate) fn seek_compaction_candidate(&self) -> Option<(Arc<FileMetaData>, usize)> {
        self.seek_compact_file.lock().unwrap().clone()
    }

    pub fn overlap_in_level(
        &self,
        level: usize,
        smallest_user_key: Option<&[u8]>,
        largest_user_key: Option<&[u8]>,
    ) -> bool {
        some_file_overlaps_range(
            &self.icmp,
            level > 0,
            &self.files[level],
            smallest_user_key,
            largest_user_key,
        )
    }

    /// Level to drop a fresh memtable flush at: 0 when L0 overlaps it,
    /// else as deep as levels stay non-overlapping and the grandparent
    /// overlap stays modest.
    pub fn pick_level_for_memtable_output(
        &self,
        smallest_user_key: &[u8],
        largest_user_key: &[u8],
    ) -> usize {
        if self.overlap_in_level(0, Some(smallest_user_key), Some(largest_user_key)) {
            return 0;
        }
        let start = InternalKey::new(smallest_user_key, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK);
        let limit = InternalKey::new(largest_user_key, 0, ValueType::Deletion);
        let mut level = 0;
        while level < MAX_MEM_COMPACT_LEVEL {
            if self.overlap_in_level(level + 1, Some(smallest_user_key), Some(largest_user_key)) {
                break;
            }
            if level + 2 < NUM_LEVELS {
                let mut overlaps = Vec::new();
                self.get_overlapping_inputs(level + 2, Some(&start), Some(&limit), &mut overlaps);
                if total_file_size(&overlaps) > max_grandparent_overlap_bytes(&self.options) {
                    break;
                }
            }
            level += 1;
        }
        level
    }

    /// Collect files at `level` overlapping `[begin, end]`. For level 0
    /// a hit widens the search range and restarts, so every transitive
    /// overlapper is included.
    pub fn get_overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
        inputs: &mut Vec<Arc<FileMetaData>>,
    ) {
        inputs.clear();
        let ucmp = self.icmp.user_comparator();
        let mut user_begin = begin.map(|k| k.user_key().to_vec());
        let mut user_end = end.map(|k| k.user_key().to_vec());

        let mut i = 0;
        while i < self.files[level].len() {
            let file = &self.files[level][i];
            i += 1;
            let file_start = file.smallest.user_key();
            let file_limit = file.largest.user_key();
            if user_begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(file_limit, b) == Ordering::Less)
            {
                continue; // wholly before range
            }
            if user_end
                .as_deref()
                .is_some_and(|e| ucmp.compare(file_start, e) == Ordering::Greater)
            {
                continue; // wholly after range
            }
            inputs.push(Arc::clone(file));
            if level == 0 {
                // L0 files overlap each other: a file that extends the
                // range may pull further files in. Restart with the
                // widened range.
                if user_begin
                    .as_deref()
                    .is_some_and(|b| ucmp.compare(file_start, b) == Ordering::Less)
                {
                    user_begin = Some(file_start.to_vec());
                    inputs.clear();
                    i = 0;
                } else if user_end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare(file_limit, e) == Ordering::Greater)
                {
                    user_end = Some(file_limit.to_vec());
                    inputs.clear();
                    i = 0;
                }
            }
        }
    }

    /// Iterators covering every file of this version, for the merged
    /// read view.
    pub fn add_iterators(
        self: &Arc<Self>,
        read_options: &ReadOptions,
        iters: &mut Vec<Box<dyn Iter>>,
    ) {
        // L0 files can overlap: each gets its own iterator.
        for file in &self.files[0] {
            iters.push(
                self.table_cache
                    .new_iterator(read_options, file.number, file.file_size),
            );
        }
        // Deeper levels are disjoint and sorted: walk files lazily.
        for level in 1..NUM_LEVELS {
            if !self.files[level].is_empty() {
                iters.push(self.new_concatenating_iterator(read_options, level));
            }
        }
    }

    pub(crate) fn new_concatenating_iterator(
        self: &Arc<Self>,
        read_options: &ReadOptions,
        level: usize,
    ) -> Box<dyn Iter> {
        concat_iterator(
            self.icmp.clone(),
            self.files[level].clone(),
            Arc::clone(&self.table_cache),
            read_options.clone(),
        )
    }

    /// One line per level with file counts, for diagnostics.
    pub fn level_summary(&self) -> String {
        let counts: Vec<String> = self.files.iter().map(|f| f.len().to_string()).collect();
        format!("files[ {} ]", counts.join(" "))
    }
}

/// Walk a disjoint, sorted file list as one sequence, opening tables
/// lazily through the table cache.
pub(crate) fn concat_iterator(
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    table_cache: Arc<TableCache>,
    read_options: ReadOptions,
) -> Box<dyn Iter> {
    Box::new(TwoLevelIterator::new(
        Box::new(LevelFileNumIterator::new(icmp, files)),
        Box::new(move |file_value| {
            if file_value.len() != 16 {
                return Err(crate::Error::corruption(
                    "file iterator invoked with unexpected value",
                ));
            }
            let number = crate::encoding::decode_fixed64(&file_value[..8]);
            let size = crate::encoding::decode_fixed64(&file_value[8..]);
            Ok(table_cache.new_iterator(&read_options, number, size))
        }),
    ))
}

/// Iterates a level's file list as (largest key → number|size) entries;
/// the index stage of a concatenating iterator.
struct LevelFileNumIterator {
    icmp: InternalKeyComparator,
    files: Vec<Arc<FileMetaData>>,
    index: usize,
    value_buf: Vec<u8>,
}

impl LevelFileNumIterator {
    fn new(icmp: InternalKeyComparator, files: Vec<Arc<FileMetaData>>) -> Self {
        let index = files.len();
        LevelFileNumIterator {
            icmp,
            files,
            index,
            value_buf: Vec::with_capacity(16),
        }
    }

    fn fill_value(&mut self) {
        if self.index < self.files.len() {
            let file = &self.files[self.index];
            self.value_buf.clear();
            put_fixed64(&mut self.value_buf, file.number);
            put_fixed64(&mut self.value_buf, file.file_size);
        }
    }
}

impl Iter for LevelFileNumIterator {
    fn valid(&self) -> bool {
        self.index < self.files.len()
    }

    fn seek_to_first(&mut self) {
        self.index = 0;
        self.fill_value();
    }

    fn seek_to_last(&mut self) {
        self.index = self.files.len().saturating_sub(1);
        if self.files.is_empty() {
            self.index = 0;
        }
        self.fill_value();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index = find_file(&self.icmp, &self.files, target);
        self.fill_value();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.index += 1;
        self.fill_value();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if self.index == 0 {
            self.index = self.files.len(); // invalid
            return;
        }
        self.index -= 1;
        self.fill_value();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.files[self.index].largest.encoded()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.value_buf
    }

    fn status(&mut self) -> Result<()> {
        Ok(())
    }
}
