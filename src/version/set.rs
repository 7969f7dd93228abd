//! The set of live versions and the manifest that records them.
//!
//! `VersionSet` owns the current [`Version`], the counters every file
//! and sequence number is allocated from, the per-level compaction
//! pointers, and the open manifest writer. All mutation happens under
//! the engine's central lock.
//!
//! Applying a [`VersionEdit`] builds a successor version (merge base
//! files with the edit's additions and deletions), appends the edit to
//! the manifest, syncs, and only then installs the new version as
//! current. Recovery replays the manifest into a builder the same way.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tracing::{error, info};

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::engine::filename::{manifest_file_name, read_current_file, set_current_file};
use crate::error::{Error, Result};
use crate::key::InternalKey;
use crate::log;
use crate::sstable::TableCache;
use crate::version::compaction::{add_boundary_inputs, Compaction};
use crate::version::edit::VersionEdit;
use crate::version::{
    expanded_compaction_byte_size_limit, max_bytes_for_level, max_file_size_for_level,
    total_file_size, FileMetaData, Version, L0_COMPACTION_TRIGGER,
};
use crate::{Options, NUM_LEVELS};

pub struct VersionSet {
    db_path: PathBuf,
    options: Options,
    icmp: InternalKeyComparator,
    table_cache: Arc<TableCache>,

    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: u64,
    log_number: u64,
    /// Log of the memtable currently being flushed, or zero.
    prev_log_number: u64,

    descriptor_log: Option<log::Writer<File>>,
    current: Arc<Version>,
    /// Every version still pinned somewhere (readers, compactions);
    /// consulted when computing the live-file set.
    live_versions: Vec<Weak<Version>>,
    /// Where the next size compaction at each level resumes.
    compact_pointer: [Vec<u8>; NUM_LEVELS],
}

impl VersionSet {
    pub fn new(
        db_path: PathBuf,
        options: Options,
        icmp: InternalKeyComparator,
        table_cache: Arc<TableCache>,
    ) -> VersionSet {
        let mut first = Version::new(icmp.clone(), options.clone(), Arc::clone(&table_cache));
        finalize(&mut first);
        VersionSet {
            db_path,
            options,
            icmp,
            table_cache,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            descriptor_log: None,
            current: Arc::new(first),
            live_versions: Vec::new(),
            compact_pointer: Default::default(),
        }
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    pub fn icmp(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    pub fn table_cache(&self) -> &Arc<TableCache> {
        &self.table_cache
    }

    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Hand back an unused number, when it was the most recent one.
    pub fn reuse_file_number(&mut self, number: u64) {
        if self.next_file_number == number + 1 {
            self.next_file_number = number;
        }
    }

    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn set_last_sequence(&mut self, sequence: u64) {
        debug_assert!(sequence >= self.last_sequence);
        self.last_sequence = sequence;
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    pub fn num_level_files(&self, level: usize) -> usize {
        self.current.files[level].len()
    }

    pub fn num_level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.current.files[level])
    }

    /// Apply `edit` to the current version, persist it to the manifest,
    /// and install the result. Called with the engine lock held.
    pub fn log_and_apply(&mut self, edit: &mut VersionEdit) -> Result<()> {
        match edit.log_number {
            Some(number) => {
                debug_assert!(number >= self.log_number);
                debug_assert!(number < self.next_file_number);
            }
            None => edit.set_log_number(self.log_number),
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number);
        }
        edit.set_next_file_number(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);

        let mut version = Version::new(
            self.icmp.clone(),
            self.options.clone(),
            Arc::clone(&self.table_cache),
        );
        {
            let mut builder = Builder::new(&self.icmp, self.current());
            builder.apply(edit, &mut self.compact_pointer);
            builder.save_to(&mut version);
        }
        finalize(&mut version);

        // First edit after open: start a new manifest seeded with a
        // full snapshot of the current state.
        let mut created_manifest = false;
        if self.descriptor_log.is_none() {
            let path = manifest_file_name(&self.db_path, self.manifest_file_number);
            let file = File::create(&path)?;
            let mut writer = log::Writer::new(file);
            created_manifest = true;
            if let Err(e) = self.write_snapshot(&mut writer) {
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
            self.descriptor_log = Some(writer);
        }

        let status = (|| -> Result<()> {
            let record = edit.encode();
            let writer = self.descriptor_log.as_mut().unwrap();
            writer.add_record(&record)?;
            writer.sync()?;
            if created_manifest {
                set_current_file(&self.db_path, self.manifest_file_number)?;
            }
            Ok(())
        })();

        match status {
            Ok(()) => {
                let version = Arc::new(version);
                self.live_versions.push(Arc::downgrade(&version));
                self.current = version;
                self.log_number = edit.log_number.unwrap();
                self.prev_log_number = edit.prev_log_number.unwrap();
                Ok(())
            }
            Err(e) => {
                error!("manifest write failed: {e}");
                if created_manifest {
                    self.descriptor_log = None;
                    let _ = std::fs::remove_file(manifest_file_name(
                        &self.db_path,
                        self.manifest_file_number,
                    ));
                }
                Err(e)
            }
        }
    }

    /// Load the version state named by `CURRENT`. Returns whether the
    /// caller must write a fresh manifest (i.e. the old one was not
    /// reused).
    pub fn recover(&mut self) -> Result<bool> {
        let manifest_name = read_current_file(&self.db_path)?;
        let manifest_path = self.db_path.join(&manifest_name);
        let manifest_file = File::open(&manifest_path).map_err(|e| {
            Error::corruption(format!("CURRENT points to missing manifest: {e}"))
        })?;
        let manifest_size = manifest_file.metadata()?.len();

        struct FailFast(std::sync::Arc<std::sync::Mutex<Option<Error>>>);
        impl log::Reporter for FailFast {
            fn corruption(&mut self, _bytes: usize, reason: &str) {
                let mut slot = self.0.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(Error::corruption(format!("manifest: {reason}")));
                }
            }
        }
        let first_error = std::sync::Arc::new(std::sync::Mutex::new(None));
        let mut reader = log::Reader::new(
            std::io::BufReader::new(manifest_file),
            Some(Box::new(FailFast(first_error.clone()))),
            true,
        );

        let mut builder = Builder::new(&self.icmp, self.current());
        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file_number = None;
        let mut last_sequence = None;

        let mut record = Vec::new();
        while reader.read_record(&mut record) {
            let edit = VersionEdit::decode(&record)?;
            if let Some(name) = &edit.comparator {
                if name != self.icmp.user_comparator().name() {
                    return Err(Error::InvalidArgument(format!(
                        "{} does not match existing comparator {}",
                        self.icmp.user_comparator().name(),
                        name
                    )));
                }
            }
            builder.apply(&edit, &mut self.compact_pointer);
            if edit.log_number.is_some() {
                log_number = edit.log_number;
            }
            if edit.prev_log_number.is_some() {
                prev_log_number = edit.prev_log_number;
            }
            if edit.next_file_number.is_some() {
                next_file_number = edit.next_file_number;
            }
            if edit.last_sequence.is_some() {
                last_sequence = edit.last_sequence;
            }
        }
        if let Some(e) = first_error.lock().unwrap().take() {
            return Err(e);
        }

        let next_file_number =
            next_file_number.ok_or_else(|| Error::corruption("no meta-nextfile entry in manifest"))?;
        let log_number =
            log_number.ok_or_else(|| Error::corruption("no meta-lognumber entry in manifest"))?;
        let last_sequence =
            last_sequence.ok_or_else(|| Error::corruption("no last-sequence-number entry in manifest"))?;
        let prev_log_number = prev_log_number.unwrap_or(0);

        self.next_file_number = next_file_number;
        self.mark_file_number_used(log_number);
        self.mark_file_number_used(prev_log_number);
        self.last_sequence = last_sequence;
        self.log_number = log_number;
        self.prev_log_number = prev_log_number;

        let mut version = Version::new(
            self.icmp.clone(),
            self.options.clone(),
            Arc::clone(&self.table_cache),
        );
        builder.save_to(&mut version);
        finalize(&mut version);
        let version = Arc::new(version);
        self.live_versions.push(Arc::downgrade(&version));
        self.current = version;

        let reused = self.maybe_reuse_manifest(&manifest_name, manifest_size);
        if !reused {
            self.manifest_file_number = self.new_file_number();
        }
        info!(
            manifest = %manifest_name,
            log_number, last_sequence, "recovered version state"
        );
        Ok(!reused)
    }

    /// Keep appending to the existing manifest when allowed and still
    /// reasonably sized.
    fn maybe_reuse_manifest(&mut self, manifest_name: &str, manifest_size: u64) -> bool {
        if !self.options.reuse_logs {
            return false;
        }
        let number = match crate::engine::filename::parse_file_name(manifest_name) {
            Some((crate::engine::filename::FileType::Manifest, number)) => number,
            _ => return false,
        };
        if manifest_size >= max_file_size_for_level(&self.options, 0) {
            return false;
        }
        let path = self.db_path.join(manifest_name);
        match std::fs::OpenOptions::new().append(true).open(&path) {
            Ok(file) => {
                info!(manifest = manifest_name, "reusing manifest");
                self.descriptor_log = Some(log::Writer::with_dest_length(file, manifest_size));
                self.manifest_file_number = number;
                true
            }
            Err(_) => false,
        }
    }

    fn write_snapshot(&self, writer: &mut log::Writer<File>) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        for (level, pointer) in self.compact_pointer.iter().enumerate() {
            if !pointer.is_empty() {
                edit.set_compact_pointer(level, InternalKey::decode_from(pointer));
            }
        }
        for (level, files) in self.current.files.iter().enumerate() {
            for file in files {
                edit.add_file(
                    level,
                    file.number,
                    file.file_size,
                    file.smallest.clone(),
                    file.largest.clone(),
                );
            }
        }
        writer.add_record(&edit.encode())
    }

    /// Every table file referenced by any live version.
    pub fn live_files(&mut self) -> HashSet<u64> {
        let mut live = HashSet::new();
        self.live_versions.retain(|weak| weak.upgrade().is_some());
        let versions: Vec<Arc<Version>> = self
            .live_versions
            .iter()
            .filter_map(|weak| weak.upgrade())
            .collect();
        for version in versions {
            for files in &version.files {
                for file in files {
                    live.insert(file.number);
                }
            }
        }
        for files in &self.current.files {
            for file in files {
                live.insert(file.number);
            }
        }
        live
    }

    /// Is any compaction waiting to run?
    pub fn needs_compaction(&self) -> bool {
        self.current.compaction_score >= 1.0
            || self.current.seek_compaction_candidate().is_some()
    }

    /// Choose the most urgent compaction: size-triggered first, then
    /// seek-triggered. Returns `None` when the tree is in shape.
    pub fn pick_compaction(&mut self) -> Option<Compaction> {
        let current = self.current();
        let size_compaction = current.compaction_score >= 1.0;
        let seek_compaction = current.seek_compaction_candidate();

        let mut compaction = if size_compaction {
            let level = current.compaction_level;
            debug_assert!(level + 1 < NUM_LEVELS);
            let mut c = Compaction::new(&self.options, level);
            // Resume after the last compacted key at this level; wrap
            // to the start when past the end.
            for file in &current.files[level] {
                if self.compact_pointer[level].is_empty()
                    || self
                        .icmp
                        .compare(file.largest.encoded(), &self.compact_pointer[level])
                        == Ordering::Greater
                {
                    c.inputs[0].push(Arc::clone(file));
                    break;
                }
            }
            if c.inputs[0].is_empty() {
                if let Some(file) = current.files[level].first() {
                    c.inputs[0].push(Arc::clone(file));
                }
            }
            c
        } else if let Some((file, level)) = seek_compaction {
            let mut c = Compaction::new(&self.options, level);
            c.inputs[0].push(file);
            c
        } else {
            return None;
        };

        compaction.input_version = Some(Arc::clone(&current));

        // Level-0 inputs may overlap each other: pull in everything
        // overlapping the chosen file's range.
        if compaction.level() == 0 {
            let (smallest, largest) = self.get_range(&compaction.inputs[0]);
            let mut expanded = Vec::new();
            current.get_overlapping_inputs(0, Some(&smallest), Some(&largest), &mut expanded);
            debug_assert!(!expanded.is_empty());
            compaction.inputs[0] = expanded;
        }

        self.setup_other_inputs(&mut compaction);
        Some(compaction)
    }

    /// Manual compaction of `[begin, end]` at `level`. Returns `None`
    /// when nothing overlaps.
    pub fn compact_range(
        &mut self,
        level: usize,
        begin: Option<&InternalKey>,
        end: Option<&InternalKey>,
    ) -> Option<Compaction> {
        let current = self.current();
        let mut inputs = Vec::new();
        current.get_overlapping_inputs(level, begin, end, &mut inputs);
        if inputs.is_empty() {
            return None;
        }

        // Levels ≥ 1 chunk giant manual ranges one file-size budget at
        // a time; the caller loops.
        if level > 0 {
            let limit = max_file_size_for_level(&self.options, level);
            let mut total = 0;
            for i in 0..inputs.len() {
                total += inputs[i].file_size;
                if total >= limit {
                    inputs.truncate(i + 1);
                    break;
                }
            }
        }

        let mut compaction = Compaction::new(&self.options, level);
        compaction.input_version = Some(current);
        compaction.inputs[0] = inputs;
        self.setup_other_inputs(&mut compaction);
        Some(compaction)
    }

    fn setup_other_inputs(&mut self, compaction: &mut Compaction) {
        let current = compaction.input_version.as_ref().unwrap().clone();
        let level = compaction.level();

        add_boundary_inputs(&self.icmp, &current.files[level], &mut compaction.inputs[0]);
        let (smallest, largest) = self.get_range(&compaction.inputs[0]);

        current.get_overlapping_inputs(
            level + 1,
            Some(&smallest),
            Some(&largest),
            &mut compaction.inputs[1],
        );
        add_boundary_inputs(&self.icmp, &current.files[level + 1], &mut compaction.inputs[1]);

        // Range spanned by both input levels together.
        let (mut all_start, mut all_limit) =
            self.get_range2(&compaction.inputs[0], &compaction.inputs[1]);

        // Try to widen the level-L inputs without changing the L+1 set
        // or blowing the expansion budget.
        if !compaction.inputs[1].is_empty() {
            let mut expanded0 = Vec::new();
            current.get_overlapping_inputs(level, Some(&all_start), Some(&all_limit), &mut expanded0);
            add_boundary_inputs(&self.icmp, &current.files[level], &mut expanded0);
            let inputs0_size = total_file_size(&compaction.inputs[0]);
            let inputs1_size = total_file_size(&compaction.inputs[1]);
            let expanded0_size = total_file_size(&expanded0);
            if expanded0.len() > compaction.inputs[0].len()
                && inputs1_size + expanded0_size
                    < expanded_compaction_byte_size_limit(&self.options)
            {
                let (new_start, new_limit) = self.get_range(&expanded0);
                let mut expanded1 = Vec::new();
                current.get_overlapping_inputs(
                    level + 1,
                    Some(&new_start),
                    Some(&new_limit),
                    &mut expanded1,
                );
                add_boundary_inputs(&self.icmp, &current.files[level + 1], &mut expanded1);
                if expanded1.len() == compaction.inputs[1].len() {
                    info!(
                        level,
                        from_files = compaction.inputs[0].len(),
                        to_files = expanded0.len(),
                        from_bytes = inputs0_size,
                        to_bytes = expanded0_size,
                        "expanding compaction inputs"
                    );
                    compaction.inputs[0] = expanded0;
                    compaction.inputs[1] = expanded1;
                    let ranges = self.get_range2(&compaction.inputs[0], &compaction.inputs[1]);
                    all_start = ranges.0;
                    all_limit = ranges.1;
                }
            }
        }

        // Grandparents bound how much each output file may overlap the
        // level after next.
        if level + 2 < NUM_LEVELS {
            current.get_overlapping_inputs(
                level + 2,
                Some(&all_start),
                Some(&all_limit),
                &mut compaction.grandparents,
            );
        }

        // Future size compactions at this level resume past this range,
        // recorded both in memory and in the edit so a crash before the
        // compaction lands still advances the cursor.
        self.compact_pointer[level] = largest.encoded().to_vec();
        compaction
            .edit
            .set_compact_pointer(level, largest.clone());
    }

    fn get_range(&self, inputs: &[Arc<FileMetaData>]) -> (InternalKey, InternalKey) {
        debug_assert!(!inputs.is_empty());
        let mut smallest = inputs[0].smallest.clone();
        let mut largest = inputs[0].largest.clone();
        for file in &inputs[1..] {
            if self
                .icmp
                .compare(file.smallest.encoded(), smallest.encoded())
                == Ordering::Less
            {
                smallest = file.smallest.clone();
            }
            if self.icmp.compare(file.largest.encoded(), largest.encoded()) == Ordering::Greater {
                largest = file.largest.clone();
            }
        }
        (smallest, largest)
    }

    fn get_range2(
        &self,
        inputs0: &[Arc<FileMetaData>],
        inputs1: &[Arc<FileMetaData>],
    ) -> (InternalKey, InternalKey) {
        let mut all: Vec<Arc<FileMetaData>> = inputs0.to_vec();
        all.extend(inputs1.iter().cloned());
        self.get_range(&all)
    }

    /// Byte offset `key` approximately maps to within `version`'s data.
    pub fn approximate_offset_of(&self, version: &Arc<Version>, key: &InternalKey) -> u64 {
        let mut result = 0;
        for (level, files) in version.files.iter().enumerate() {
            for file in files {
                if self
                    .icmp
                    .compare(file.largest.encoded(), key.encoded())
                    != Ordering::Greater
                {
                    // Entirely before the key.
                    result += file.file_size;
                } else if self
                    .icmp
                    .compare(file.smallest.encoded(), key.encoded())
                    == Ordering::Greater
                {
                    // Entirely after. At levels ≥ 1 nothing later in
                    // the level can matter either.
                    if level > 0 {
                        break;
                    }
                } else {
                    // Key falls inside the file: ask the table.
                    if let Ok(table) = self.table_cache.find_table(file.number, file.file_size) {
                        result += table.approximate_offset_of(key.encoded());
                    }
                }
            }
        }
        result
    }

    /// Printable per-level file counts, bytes, and read/write stats go
    /// through the engine; this is the raw level occupancy line.
    pub fn level_summary(&self) -> String {
        self.current.level_summary()
    }
}

/// Precompute the best size-compaction candidate for a freshly built
/// version. Level 0 scores by file count (too many files means every
/// read touches all of them); deeper levels score by byte occupancy.
fn finalize(version: &mut Version) {
    let mut best_level = 0;
    let mut best_score: f64 = -1.0;
    for level in 0..NUM_LEVELS - 1 {
        let score = if level == 0 {
            version.files[0].len() as f64 / L0_COMPACTION_TRIGGER as f64
        } else {
            total_file_size(&version.files[level]) as f64 / max_bytes_for_level(level)
        };
        if score > best_score {
            best_level = level;
            best_score = score;
        }
    }
    version.compaction_level = best_level;
    version.compaction_score = best_score;
}

/// Accumulates edits against a base version and materializes the
/// merged file lists of the successor.
struct Builder {
    icmp: InternalKeyComparator,
    base: Arc<Version>,
    deleted: [HashSet<u64>; NUM_LEVELS],
    added: [Vec<Arc<FileMetaData>>; NUM_LEVELS],
}

impl Builder {
    fn new(icmp: &InternalKeyComparator, base: Arc<Version>) -> Builder {
        Builder {
            icmp: icmp.clone(),
            base,
            deleted: Default::default(),
            added: Default::default(),
        }
    }

    fn apply(&mut self, edit: &VersionEdit, compact_pointer: &mut [Vec<u8>; NUM_LEVELS]) {
        for (level, key) in &edit.compact_pointers {
            compact_pointer[*level] = key.encoded().to_vec();
        }
        for (level, number) in &edit.deleted_files {
            self.deleted[*level].insert(*number);
        }
        for (level, file) in &edit.new_files {
            let file = Arc::new(file.clone());
            // One seek costs roughly as much as compacting 16 KiB, so
            // a file earns one allowed seek per 16 KiB, floored at 100.
            let allowed = std::cmp::max(file.file_size as i64 / 16384, 100);
            file.allowed_seeks
                .store(allowed, std::sync::atomic::Ordering::Relaxed);
            self.deleted[*level].remove(&file.number);
            self.added[*level].push(file);
        }
    }

    fn save_to(&mut self, version: &mut Version) {
        for level in 0..NUM_LEVELS {
            let mut merged: Vec<Arc<FileMetaData>> = Vec::with_capacity(
                self.base.files[level].len() + self.added[level].len(),
            );
            merged.extend(self.base.files[level].iter().cloned());
            merged.extend(self.added[level].drain(..));
            if level == 0 {
                // Newest flushes last in edit order; number order keeps
                // read precedence well-defined.
                merged.sort_by_key(|f| f.number);
            } else {
                let icmp = self.icmp.clone();
                merged.sort_by(|a, b| icmp.compare(a.smallest.encoded(), b.smallest.encoded()));
            }
            merged.retain(|f| !self.deleted[level].contains(&f.number));

            if level > 0 {
                // Ranges at levels ≥ 1 must stay disjoint.
                debug_assert!(
                    merged.windows(2).all(|pair| {
                        self.icmp
                            .compare(pair[0].largest.encoded(), pair[1].smallest.encoded())
                            == Ordering::Less
                    }),
                    "overlapping files installed at level {level}"
                );
            }
            version.files[level] = merged;
        }
    }
}
