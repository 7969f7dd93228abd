//! The database facade.
//!
//! Ties the whole engine together: the writer queue and WAL on the
//! write path, memtables and the version set on the read path, and a
//! single background thread that flushes immutable memtables and runs
//! compactions.
//!
//! ## Concurrency model
//!
//! One mutex guards all mutable state ([`DbState`]). Writers enqueue
//! under it and the queue head becomes the *leader*: it grabs the WAL
//! and memtable, releases the lock for the I/O, and completes every
//! writer it merged. Readers take `Arc` references to the memtables and
//! current version under the lock, then read without it. At most one
//! background thread exists at a time, gated by
//! `bg_compaction_scheduled`.
//!
//! ## Failure model
//!
//! A failed WAL sync, flush, or compaction records a sticky background
//! error: subsequent writes return it, background work stops, and reads
//! continue against the last installed version.

pub mod batch;
pub mod filename;
pub mod flock;
pub mod iterator;
pub mod snapshot;

#[cfg(test)]
mod tests;

pub use iterator::DBIterator;

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{info, warn};

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::engine::batch::WriteBatch;
use crate::engine::filename::{
    current_file_name, lock_file_name, log_file_name, manifest_file_name, parse_file_name,
    set_current_file, table_file_name, FileType,
};
use crate::engine::flock::FileLock;
use crate::engine::snapshot::Snapshot;
use crate::error::{Error, Result};
use crate::iterator::{Iter, MergingIterator};
use crate::key::{
    parse_internal_key, InternalKey, LookupKey, ValueType, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK,
};
use crate::log;
use crate::memtable::{MemTable, MemTableGetResult};
use crate::sstable::{TableBuilder, TableCache};
use crate::version::{
    concat_iterator, Compaction, Version, VersionEdit, VersionSet, L0_SLOWDOWN_WRITES_TRIGGER,
    L0_STOP_WRITES_TRIGGER,
};
use crate::{Options, ReadOptions, WriteOptions, NUM_LEVELS};

/// An open database. All methods are safe to call from any thread.
pub struct DB {
    core: Arc<DbCore>,
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB").finish_non_exhaustive()
    }
}

struct WriterRequest {
    /// Taken by the leader when this writer's batch joins a group.
    /// `None` marks a rotation-forcing write.
    batch: Mutex<Option<WriteBatch>>,
    sync: bool,
    done: AtomicBool,
    result: Mutex<Option<Result<()>>>,
}

impl WriterRequest {
    fn new(batch: Option<WriteBatch>, sync: bool) -> WriterRequest {
        WriterRequest {
            batch: Mutex::new(batch),
            sync,
            done: AtomicBool::new(false),
            result: Mutex::new(None),
        }
    }

    fn complete(&self, result: Result<()>) {
        *self.result.lock().unwrap() = Some(result);
        self.done.store(true, AtomicOrdering::Release);
    }
}

struct ManualCompaction {
    id: u64,
    level: usize,
    done: bool,
    begin: Option<InternalKey>,
    end: Option<InternalKey>,
}

#[derive(Debug, Default, Clone, Copy)]
struct CompactionStats {
    micros: u128,
    bytes_read: u64,
    bytes_written: u64,
}

impl CompactionStats {
    fn add(&mut self, micros: u128, bytes_read: u64, bytes_written: u64) {
        self.micros += micros;
        self.bytes_read += bytes_read;
        self.bytes_written += bytes_written;
    }
}

struct Output {
    number: u64,
    file_size: u64,
    smallest: InternalKey,
    largest: InternalKey,
}

struct CompactionState {
    compaction: Compaction,
    /// Sequence numbers at or below this are invisible to every live
    /// snapshot and may be collapsed.
    smallest_snapshot: u64,
    outputs: Vec<Output>,
    builder: Option<TableBuilder>,
    total_bytes: u64,
}

impl CompactionState {
    fn new(compaction: Compaction) -> CompactionState {
        CompactionState {
            compaction,
            smallest_snapshot: 0,
            outputs: Vec::new(),
            builder: None,
            total_bytes: 0,
        }
    }
}

struct DbState {
    mem: Arc<MemTable>,
    imm: Option<Arc<MemTable>>,
    wal: Option<log::Writer<File>>,
    log_file_number: u64,
    versions: VersionSet,
    writers: VecDeque<Arc<WriterRequest>>,
    snapshots: Vec<Arc<Snapshot>>,
    /// Table files being written by flushes/compactions; protected
    /// from the obsolete-file sweep until installed or abandoned.
    pending_outputs: HashSet<u64>,
    bg_compaction_scheduled: bool,
    manual_compaction: Option<ManualCompaction>,
    bg_error: Option<Error>,
    stats: [CompactionStats; NUM_LEVELS],
    /// Per-iterator sampling seeds.
    seed: u64,
}

pub(crate) struct DbCore {
    db_path: PathBuf,
    options: Options,
    icmp: InternalKeyComparator,
    table_cache: Arc<TableCache>,
    _lock: FileLock,
    state: Mutex<DbState>,
    background_work_finished: Condvar,
    writers_cv: Condvar,
    shutting_down: AtomicBool,
    /// Mirror of `state.imm.is_some()`, readable mid-compaction
    /// without the lock.
    has_imm: AtomicBool,
    next_manual_id: AtomicU64,
}

type StateGuard<'a> = MutexGuard<'a, DbState>;

impl DB {
    /// Open (or, with `create_if_missing`, create) the database at
    /// `path`.
    pub fn open(options: Options, path: impl AsRef<Path>) -> Result<DB> {
        let options = options.sanitize();
        let db_path = path.as_ref().to_path_buf();
        let _ = std::fs::create_dir_all(&db_path);

        let lock = FileLock::lock(lock_file_name(&db_path)).map_err(|e| {
            Error::Io(format!(
                "unable to acquire database lock {}: {e}",
                db_path.display()
            ))
        })?;

        let icmp = InternalKeyComparator::new(options.comparator.clone());
        let table_cache = Arc::new(TableCache::new(
            db_path.clone(),
            options.clone(),
            icmp.clone(),
            options.max_open_files - 10,
        ));
        let mut versions = VersionSet::new(
            db_path.clone(),
            options.clone(),
            icmp.clone(),
            Arc::clone(&table_cache),
        );

        if !current_file_name(&db_path).exists() {
            if !options.create_if_missing {
                return Err(Error::InvalidArgument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    db_path.display()
                )));
            }
            new_db(&db_path, &options)?;
            info!(path = %db_path.display(), "created new database");
        } else if options.error_if_exists {
            return Err(Error::InvalidArgument(format!(
                "{}: exists (error_if_exists is true)",
                db_path.display()
            )));
        }

        let mut save_manifest = versions.recover()?;

        // Every table the manifest references must exist, and any WAL
        // at or after the recovery point gets replayed.
        let mut expected = versions.live_files();
        let mut logs: Vec<u64> = Vec::new();
        let min_log = versions.log_number();
        let prev_log = versions.prev_log_number();
        for entry in std::fs::read_dir(&db_path)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some((file_type, number)) = name.to_str().and_then(parse_file_name) {
                expected.remove(&number);
                if file_type == FileType::Log && (number >= min_log || number == prev_log) {
                    logs.push(number);
                }
            }
        }
        if !expected.is_empty() {
            let mut missing: Vec<u64> = expected.into_iter().collect();
            missing.sort_unstable();
            return Err(Error::corruption(format!(
                "{} missing table files; e.g. {:06}.ldb",
                missing.len(),
                missing[0]
            )));
        }
        logs.sort_unstable();

        let mut edit = VersionEdit::new();
        let mut max_sequence = 0;
        let mut mem: Option<Arc<MemTable>> = None;
        let mut wal: Option<log::Writer<File>> = None;
        let mut log_file_number = 0;
        let log_count = logs.len();
        for (i, number) in logs.iter().enumerate() {
            let adopted = recover_log_file(
                &db_path,
                &options,
                &icmp,
                &table_cache,
                &mut versions,
                *number,
                i + 1 == log_count,
                &mut edit,
                &mut max_sequence,
                &mut save_manifest,
            )?;
            versions.mark_file_number_used(*number);
            if let Some((adopted_mem, adopted_wal)) = adopted {
                mem = Some(adopted_mem);
                wal = Some(adopted_wal);
                log_file_number = *number;
            }
        }
        if versions.last_sequence() < max_sequence {
            versions.set_last_sequence(max_sequence);
        }

        if mem.is_none() {
            log_file_number = versions.new_file_number();
            let file = File::create(log_file_name(&db_path, log_file_number))?;
            wal = Some(log::Writer::new(file));
            mem = Some(Arc::new(MemTable::new(icmp.clone())));
        }

        if save_manifest {
            edit.set_prev_log_number(0);
            edit.set_log_number(log_file_number);
            versions.log_and_apply(&mut edit)?;
        }

        let core = Arc::new(DbCore {
            db_path,
            options,
            icmp,
            table_cache,
            _lock: lock,
            state: Mutex::new(DbState {
                mem: mem.unwrap(),
                imm: None,
                wal,
                log_file_number,
                versions,
                writers: VecDeque::new(),
                snapshots: Vec::new(),
                pending_outputs: HashSet::new(),
                bg_compaction_scheduled: false,
                manual_compaction: None,
                bg_error: None,
                stats: [CompactionStats::default(); NUM_LEVELS],
                seed: 0,
            }),
            background_work_finished: Condvar::new(),
            writers_cv: Condvar::new(),
            shutting_down: AtomicBool::new(false),
            has_imm: AtomicBool::new(false),
            next_manual_id: AtomicU64::new(1),
        });

        {
            let guard = core.state.lock().unwrap();
            let mut guard = core.remove_obsolete_files(guard);
            core.maybe_schedule_compaction(&mut guard);
        }
        Ok(DB { core })
    }

    /// Store `value` under `key`.
    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(options, batch)
    }

    /// Remove `key`. Removing an absent key succeeds.
    pub fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(options, batch)
    }

    /// Apply `batch` atomically.
    pub fn write(&self, options: &WriteOptions, batch: WriteBatch) -> Result<()> {
        self.core.write(options.sync, Some(batch))
    }

    /// Read the newest visible value of `key`.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.core.get(options, key)
    }

    /// Ordered iterator over the live (or snapshot) state.
    pub fn iter(&self, options: &ReadOptions) -> DBIterator {
        self.core.new_iterator(options)
    }

    /// Pin the current state for repeatable reads.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let mut guard = self.core.state.lock().unwrap();
        let snapshot = Arc::new(Snapshot::new(guard.versions.last_sequence()));
        guard.snapshots.push(Arc::clone(&snapshot));
        snapshot
    }

    /// Release a snapshot, letting compaction collect what only it
    /// could see.
    pub fn release_snapshot(&self, snapshot: Arc<Snapshot>) {
        let mut guard = self.core.state.lock().unwrap();
        guard
            .snapshots
            .retain(|held| !Arc::ptr_eq(held, &snapshot));
    }

    /// Compact every level overlapping `[begin, end]`; `None` bounds
    /// are open. Blocks until the work is done.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let max_level_with_files = {
            let guard = self.core.state.lock().unwrap();
            let current = guard.versions.current();
            let mut max = 1;
            for level in 1..NUM_LEVELS {
                if current.overlap_in_level(level, begin, end) {
                    max = level;
                }
            }
            max
        };
        self.core.force_compact_memtable()?;
        for level in 0..max_level_with_files {
            self.core.compact_range_level(level, begin, end)?;
        }
        Ok(())
    }

    /// Engine introspection. Recognized names: `stratadb.stats`,
    /// `stratadb.sstables`, `stratadb.approximate-memory-usage`,
    /// `stratadb.num-files-at-level<N>`.
    pub fn property(&self, name: &str) -> Option<String> {
        self.core.property(name)
    }

    /// Approximate on-disk bytes spanned by each `[start, limit)`
    /// range.
    pub fn approximate_sizes(&self, ranges: &[(&[u8], &[u8])]) -> Vec<u64> {
        self.core.approximate_sizes(ranges)
    }

    /// Rotate the memtable and wait for its flush. Exposed for tests
    /// and tooling; normal writes rotate on their own.
    #[doc(hidden)]
    pub fn force_compact_memtable(&self) -> Result<()> {
        self.core.force_compact_memtable()
    }

    /// Compact one level of the range synchronously. Exposed for tests.
    #[doc(hidden)]
    pub fn compact_range_level(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        self.core.compact_range_level(level, begin, end)
    }

    /// Number of table files at `level`. Exposed for tests.
    #[doc(hidden)]
    pub fn num_files_at_level(&self, level: usize) -> usize {
        self.core
            .state
            .lock()
            .unwrap()
            .versions
            .num_level_files(level)
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        self.core.shutting_down.store(true, AtomicOrdering::Release);
        let mut guard = self.core.state.lock().unwrap();
        while guard.bg_compaction_scheduled {
            guard = self.core.background_work_finished.wait(guard).unwrap();
        }
    }
}

impl DbCore {
    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    fn write(self: &Arc<Self>, sync: bool, batch: Option<WriteBatch>) -> Result<()> {
        let me = Arc::new(WriterRequest::new(batch, sync));
        let mut guard = self.state.lock().unwrap();
        guard.writers.push_back(Arc::clone(&me));
        while !me.done.load(AtomicOrdering::Acquire)
            && !Arc::ptr_eq(guard.writers.front().unwrap(), &me)
        {
            guard = self.writers_cv.wait(guard).unwrap();
        }
        if me.done.load(AtomicOrdering::Acquire) {
            return me.result.lock().unwrap().take().unwrap();
        }

        // Leader: drive this round on behalf of everyone merged below.
        let force = me.batch.lock().unwrap().is_none();
        let (mut guard, mut status) = self.make_room_for_write(guard, force);
        let mut last_writer = Arc::clone(&me);

        if status.is_ok() && !force {
            let (mut group, last) = build_batch_group(&mut guard);
            last_writer = last;
            let sequence = guard.versions.last_sequence() + 1;
            group.set_sequence(sequence);
            let count = group.count() as u64;

            // Log and memtable I/O run without the lock. The head-of-
            // queue discipline keeps this safe: no other writer can be
            // here until this round completes.
            let mut wal = guard.wal.take().expect("write-ahead log missing");
            let mem = Arc::clone(&guard.mem);
            drop(guard);

            let mut sync_error = false;
            status = (|| {
                wal.add_record(group.contents())?;
                if sync {
                    if let Err(e) = wal.sync() {
                        sync_error = true;
                        return Err(e);
                    }
                }
                group.insert_into(&mem)
            })();

            guard = self.state.lock().unwrap();
            guard.wal = Some(wal);
            if sync_error {
                // The log may be missing a tail; no further writes can
                // be trusted to land after it.
                self.record_background_error(&mut guard, status.clone().unwrap_err());
            }
            guard.versions.set_last_sequence(sequence + count - 1);
        }

        loop {
            let ready = guard.writers.pop_front().expect("writer queue underflow");
            let is_self = Arc::ptr_eq(&ready, &me);
            if !is_self {
                ready.complete(status.clone());
            }
            if Arc::ptr_eq(&ready, &last_writer) {
                break;
            }
        }
        drop(guard);
        self.writers_cv.notify_all();
        status
    }

    /// Ensure the mutable memtable can take the next write: stall on a
    /// crowded level 0, wait out a pending flush, or rotate.
    fn make_room_for_write<'a>(
        self: &'a Arc<Self>,
        mut guard: StateGuard<'a>,
        mut force: bool,
    ) -> (StateGuard<'a>, Result<()>) {
        let mut allow_delay = !force;
        loop {
            if let Some(e) = guard.bg_error.clone() {
                return (guard, Err(e));
            }
            if allow_delay
                && guard.versions.num_level_files(0) >= L0_SLOWDOWN_WRITES_TRIGGER
            {
                // Hand the CPU to compaction for a moment instead of
                // stalling a later write for seconds. At most once per
                // write.
                drop(guard);
                std::thread::sleep(std::time::Duration::from_millis(1));
                allow_delay = false;
                guard = self.state.lock().unwrap();
                continue;
            }
            if !force
                && guard.mem.approximate_memory_usage() <= self.options.write_buffer_size
            {
                return (guard, Ok(()));
            }
            if guard.imm.is_some() {
                // Previous memtable still flushing; wait for it.
                info!("current memtable full; waiting on flush");
                guard = self.background_work_finished.wait(guard).unwrap();
                continue;
            }
            if guard.versions.num_level_files(0) >= L0_STOP_WRITES_TRIGGER {
                info!("too many level-0 files; waiting");
                guard = self.background_work_finished.wait(guard).unwrap();
                continue;
            }

            // Rotate: fresh WAL, current memtable becomes immutable.
            let new_log_number = guard.versions.new_file_number();
            let file = match File::create(log_file_name(&self.db_path, new_log_number)) {
                Ok(file) => file,
                Err(e) => {
                    guard.versions.reuse_file_number(new_log_number);
                    return (guard, Err(e.into()));
                }
            };
            guard.wal = Some(log::Writer::new(file));
            guard.log_file_number = new_log_number;
            let full_mem = std::mem::replace(
                &mut guard.mem,
                Arc::new(MemTable::new(self.icmp.clone())),
            );
            guard.imm = Some(full_mem);
            self.has_imm.store(true, AtomicOrdering::Release);
            force = false;
            self.maybe_schedule_compaction(&mut guard);
        }
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    fn get(self: &Arc<Self>, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (sequence, mem, imm, current) = {
            let guard = self.state.lock().unwrap();
            let sequence = match &options.snapshot {
                Some(snapshot) => snapshot.sequence(),
                None => guard.versions.last_sequence(),
            };
            (
                sequence,
                Arc::clone(&guard.mem),
                guard.imm.clone(),
                guard.versions.current(),
            )
        };

        let lookup_key = LookupKey::new(key, sequence);
        let mut stats = None;
        let result = match mem.get(&lookup_key) {
            MemTableGetResult::Put(value) => Ok(Some(value)),
            MemTableGetResult::Delete => Ok(None),
            MemTableGetResult::NotFound => {
                let imm_result = imm.as_ref().map(|imm| imm.get(&lookup_key));
                match imm_result {
                    Some(MemTableGetResult::Put(value)) => Ok(Some(value)),
                    Some(MemTableGetResult::Delete) => Ok(None),
                    _ => {
                        let (result, get_stats) = current.get(options, &lookup_key);
                        stats = get_stats;
                        result
                    }
                }
            }
        };

        if let Some(stats) = stats {
            let mut guard = self.state.lock().unwrap();
            if current.update_stats(&stats) {
                self.maybe_schedule_compaction(&mut guard);
            }
        }
        result
    }

    fn new_iterator(self: &Arc<Self>, options: &ReadOptions) -> DBIterator {
        let mut guard = self.state.lock().unwrap();
        let sequence = match &options.snapshot {
            Some(snapshot) => snapshot.sequence(),
            None => guard.versions.last_sequence(),
        };

        let mut children: Vec<Box<dyn Iter>> = Vec::new();
        children.push(Box::new(guard.mem.iter()));
        if let Some(imm) = &guard.imm {
            children.push(Box::new(imm.iter()));
        }
        let current = guard.versions.current();
        current.add_iterators(options, &mut children);
        guard.seed += 1;
        let seed = guard.seed;
        drop(guard);

        let merged = MergingIterator::new(self.icmp.clone(), children);
        DBIterator::new(
            Arc::clone(self),
            current,
            Box::new(merged),
            self.options.comparator.clone(),
            sequence,
            seed,
        )
    }

    /// Charge one sampled iterator read against the current version's
    /// seek accounting.
    pub(crate) fn record_read_sample(self: &Arc<Self>, internal_key: &[u8]) {
        let mut guard = self.state.lock().unwrap();
        let current = guard.versions.current();
        if current.record_read_sample(internal_key) {
            self.maybe_schedule_compaction(&mut guard);
        }
    }

    // ------------------------------------------------------------------
    // Background work
    // ------------------------------------------------------------------

    fn record_background_error(&self, guard: &mut DbState, error: Error) {
        if guard.bg_error.is_none() {
            warn!("background error becomes sticky: {error}");
            guard.bg_error = Some(error);
            self.background_work_finished.notify_all();
        }
    }

    fn maybe_schedule_compaction(self: &Arc<Self>, guard: &mut DbState) {
        if guard.bg_compaction_scheduled {
            return;
        }
        if self.shutting_down.load(AtomicOrdering::Acquire) || guard.bg_error.is_some() {
            return;
        }
        let manual_pending = matches!(&guard.manual_compaction, Some(m) if !m.done);
        if guard.imm.is_none() && !manual_pending && !guard.versions.needs_compaction() {
            return;
        }
        guard.bg_compaction_scheduled = true;
        let core = Arc::clone(self);
        std::thread::spawn(move || core.background_call());
    }

    fn background_call(self: Arc<Self>) {
        let mut guard = self.state.lock().unwrap();
        debug_assert!(guard.bg_compaction_scheduled);
        if !self.shutting_down.load(AtomicOrdering::Acquire) && guard.bg_error.is_none() {
            guard = self.background_compaction(guard);
        }
        guard.bg_compaction_scheduled = false;
        // The just-installed version may immediately warrant more work.
        self.maybe_schedule_compaction(&mut guard);
        drop(guard);
        self.background_work_finished.notify_all();
        self.writers_cv.notify_all();
    }

    fn background_compaction<'a>(self: &'a Arc<Self>, mut guard: StateGuard<'a>) -> StateGuard<'a> {
        if guard.imm.is_some() {
            return self.compact_memtable(guard);
        }

        // A slot whose owner already saw `done` (or abandoned it) is
        // not a pending request.
        let is_manual = matches!(&guard.manual_compaction, Some(m) if !m.done);
        let mut manual_end: Option<InternalKey> = None;
        let compaction: Option<Compaction> = if is_manual {
            let state = &mut *guard;
            let manual = state.manual_compaction.as_mut().unwrap();
            let compaction =
                state
                    .versions
                    .compact_range(manual.level, manual.begin.as_ref(), manual.end.as_ref());
            manual.done = compaction.is_none();
            if let Some(c) = compaction.as_ref() {
                manual_end = Some(c.input(0, c.num_input_files(0) - 1).largest.clone());
            }
            info!(
                level = manual.level,
                done = manual.done,
                "manual compaction round"
            );
            compaction
        } else {
            guard.versions.pick_compaction()
        };

        let mut status = Ok(());
        match compaction {
            None => {}
            Some(mut c) if !is_manual && c.is_trivial_move() => {
                // Relabel the file one level down; no data moves.
                let file = Arc::clone(c.input(0, 0));
                c.edit.remove_file(c.level(), file.number);
                c.edit.add_file(
                    c.level() + 1,
                    file.number,
                    file.file_size,
                    file.smallest.clone(),
                    file.largest.clone(),
                );
                status = guard.versions.log_and_apply(&mut c.edit);
                if let Err(e) = &status {
                    self.record_background_error(&mut guard, e.clone());
                }
                info!(
                    file = file.number,
                    from_level = c.level(),
                    bytes = file.file_size,
                    summary = %guard.versions.level_summary(),
                    "moved file to next level"
                );
                c.release_inputs();
            }
            Some(c) => {
                let mut compact = CompactionState::new(c);
                let (returned, work_status) = self.do_compaction_work(guard, &mut compact);
                guard = returned;
                status = work_status;
                if let Err(e) = &status {
                    self.record_background_error(&mut guard, e.clone());
                }
                guard = self.cleanup_compaction(guard, &mut compact);
                compact.compaction.release_inputs();
                guard = self.remove_obsolete_files(guard);
            }
        }

        match &status {
            Ok(()) => {}
            Err(_) if self.shutting_down.load(AtomicOrdering::Acquire) => {
                // Expected during teardown; already recorded if sticky.
            }
            Err(e) => {
                warn!("compaction error: {e}");
            }
        }

        if is_manual {
            let manual = guard.manual_compaction.as_mut().unwrap();
            if status.is_err() {
                manual.done = true;
            }
            if !manual.done {
                // Resume the next round after the range just drained.
                manual.begin = manual_end;
            }
        }
        guard
    }

    fn compact_memtable<'a>(self: &'a Arc<Self>, guard: StateGuard<'a>) -> StateGuard<'a> {
        debug_assert!(guard.imm.is_some());
        let mem = Arc::clone(guard.imm.as_ref().unwrap());
        let base = guard.versions.current();
        let mut edit = VersionEdit::new();
        let (mut guard, mut status) =
            self.write_level0_table(guard, mem, &mut edit, Some(base));

        if status.is_ok() && self.shutting_down.load(AtomicOrdering::Acquire) {
            status = Err(Error::Io(
                "deleting database during memtable compaction".to_string(),
            ));
        }
        if status.is_ok() {
            // The WAL that fed this memtable is no longer needed.
            edit.set_prev_log_number(0);
            edit.set_log_number(guard.log_file_number);
            status = guard.versions.log_and_apply(&mut edit);
        }

        match status {
            Ok(()) => {
                guard.imm = None;
                self.has_imm.store(false, AtomicOrdering::Release);
                self.remove_obsolete_files(guard)
            }
            Err(e) => {
                self.record_background_error(&mut guard, e);
                guard
            }
        }
    }

    fn write_level0_table<'a>(
        self: &'a Arc<Self>,
        mut guard: StateGuard<'a>,
        mem: Arc<MemTable>,
        edit: &mut VersionEdit,
        base: Option<Arc<Version>>,
    ) -> (StateGuard<'a>, Result<()>) {
        let start = Instant::now();
        let number = guard.versions.new_file_number();
        guard.pending_outputs.insert(number);
        info!(file = number, "level-0 table started");

        drop(guard);
        let built = build_table(
            &self.db_path,
            &self.options,
            &self.icmp,
            &self.table_cache,
            mem.iter(),
            number,
        );
        let mut guard = self.state.lock().unwrap();
        guard.pending_outputs.remove(&number);

        match built {
            Ok(Some((file_size, smallest, largest))) => {
                info!(file = number, bytes = file_size, "level-0 table built");
                let level = base
                    .map(|base| {
                        base.pick_level_for_memtable_output(
                            smallest.user_key(),
                            largest.user_key(),
                        )
                    })
                    .unwrap_or(0);
                edit.add_file(level, number, file_size, smallest, largest);
                guard.stats[level].add(start.elapsed().as_micros(), 0, file_size);
                (guard, Ok(()))
            }
            Ok(None) => {
                // Empty memtable; nothing written.
                guard.versions.reuse_file_number(number);
                (guard, Ok(()))
            }
            Err(e) => (guard, Err(e)),
        }
    }

    fn do_compaction_work<'a>(
        self: &'a Arc<Self>,
        guard: StateGuard<'a>,
        compact: &mut CompactionState,
    ) -> (StateGuard<'a>, Result<()>) {
        let start = Instant::now();
        let mut imm_micros: u128 = 0;
        let level = compact.compaction.level();
        info!(
            level,
            inputs0 = compact.compaction.num_input_files(0),
            inputs1 = compact.compaction.num_input_files(1),
            "compacting"
        );
        debug_assert!(guard.versions.num_level_files(level) > 0);
        debug_assert!(compact.builder.is_none());

        compact.smallest_snapshot = match guard.snapshots.first() {
            Some(oldest) => oldest.sequence(),
            None => guard.versions.last_sequence(),
        };
        let mut input = self.make_input_iterator(&compact.compaction);
        drop(guard);

        let ucmp = self.icmp.user_comparator().clone();
        let mut status: Result<()> = Ok(());
        let mut current_user_key: Option<Vec<u8>> = None;
        let mut last_sequence_for_key = MAX_SEQUENCE;

        input.seek_to_first();
        while input.valid() && !self.shutting_down.load(AtomicOrdering::Acquire) {
            // The foreground needs its immutable memtable flushed more
            // urgently than this merge needs to finish.
            if self.has_imm.load(AtomicOrdering::Relaxed) {
                let imm_start = Instant::now();
                let inner = self.state.lock().unwrap();
                if inner.imm.is_some() {
                    let inner = self.compact_memtable(inner);
                    drop(inner);
                    self.background_work_finished.notify_all();
                }
                imm_micros += imm_start.elapsed().as_micros();
            }

            let key = input.key().to_vec();
            // Grandparent tracking advances on every key, whether or
            // not an output file is open yet.
            let split_output = compact.compaction.should_stop_before(&key);
            if split_output && compact.builder.is_some() {
                status = self.finish_compaction_output_file(compact, &mut input);
                if status.is_err() {
                    break;
                }
            }

            let mut drop_entry = false;
            match parse_internal_key(&key) {
                None => {
                    // Keep unparsable entries verbatim; hiding them
                    // would mask corruption.
                    current_user_key = None;
                    last_sequence_for_key = MAX_SEQUENCE;
                }
                Some(parsed) => {
                    let first_occurrence = match &current_user_key {
                        Some(seen) => {
                            ucmp.compare(parsed.user_key, seen) != std::cmp::Ordering::Equal
                        }
                        None => true,
                    };
                    if first_occurrence {
                        current_user_key = Some(parsed.user_key.to_vec());
                        last_sequence_for_key = MAX_SEQUENCE;
                    }

                    if last_sequence_for_key <= compact.smallest_snapshot {
                        // A newer entry for this user key at or below
                        // the snapshot floor shadows this one.
                        drop_entry = true;
                    } else if parsed.value_type == ValueType::Deletion
                        && parsed.sequence <= compact.smallest_snapshot
                        && compact.compaction.is_base_level_for_key(parsed.user_key)
                    {
                        // Tombstone with nothing underneath to shadow:
                        // the deletion itself can go.
                        drop_entry = true;
                    }
                    last_sequence_for_key = parsed.sequence;
                }
            }

            if !drop_entry {
                if compact.builder.is_none() {
                    status = self.open_compaction_output_file(compact);
                    if status.is_err() {
                        break;
                    }
                }
                let builder = compact.builder.as_mut().unwrap();
                let output = compact.outputs.last_mut().unwrap();
                if builder.num_entries() == 0 {
                    output.smallest = InternalKey::decode_from(&key);
                }
                output.largest = InternalKey::decode_from(&key);
                if let Err(e) = builder.add(&key, input.value()) {
                    status = Err(e);
                    break;
                }
                if builder.file_size() >= compact.compaction.max_output_file_size() {
                    status = self.finish_compaction_output_file(compact, &mut input);
                    if status.is_err() {
                        break;
                    }
                }
            }

            input.next();
        }

        if status.is_ok() && self.shutting_down.load(AtomicOrdering::Acquire) {
            status = Err(Error::Io(
                "deleting database during compaction".to_string(),
            ));
        }
        if status.is_ok() && compact.builder.is_some() {
            status = self.finish_compaction_output_file(compact, &mut input);
        }
        if status.is_ok() {
            status = input.status();
        }
        drop(input);

        let micros = start.elapsed().as_micros().saturating_sub(imm_micros);
        let bytes_read: u64 = (0..2)
            .map(|which| {
                (0..compact.compaction.num_input_files(which))
                    .map(|i| compact.compaction.input(which, i).file_size)
                    .sum::<u64>()
            })
            .sum();
        let bytes_written: u64 = compact.outputs.iter().map(|o| o.file_size).sum();

        let mut guard = self.state.lock().unwrap();
        guard.stats[level + 1].add(micros, bytes_read, bytes_written);
        if status.is_ok() {
            status = self.install_compaction_results(&mut guard, compact);
        }
        info!(
            summary = %guard.versions.level_summary(),
            ok = status.is_ok(),
            "compacted"
        );
        (guard, status)
    }

    fn make_input_iterator(&self, compaction: &Compaction) -> Box<dyn Iter> {
        // Bulk reads: checksum per paranoia setting, never pollute the
        // block cache.
        let read_options = ReadOptions {
            verify_checksums: self.options.paranoid_checks,
            fill_cache: false,
            snapshot: None,
        };
        let mut children: Vec<Box<dyn Iter>> = Vec::new();
        for which in 0..2 {
            if compaction.num_input_files(which) == 0 {
                continue;
            }
            if compaction.level() + which == 0 {
                // Level-0 files overlap; each reads independently.
                for i in 0..compaction.num_input_files(0) {
                    let file = compaction.input(0, i);
                    children.push(self.table_cache.new_iterator(
                        &read_options,
                        file.number,
                        file.file_size,
                    ));
                }
            } else {
                let files: Vec<_> = (0..compaction.num_input_files(which))
                    .map(|i| Arc::clone(compaction.input(which, i)))
                    .collect();
                children.push(concat_iterator(
                    self.icmp.clone(),
                    files,
                    Arc::clone(&self.table_cache),
                    read_options.clone(),
                ));
            }
        }
        Box::new(MergingIterator::new(self.icmp.clone(), children))
    }

    fn open_compaction_output_file(&self, compact: &mut CompactionState) -> Result<()> {
        debug_assert!(compact.builder.is_none());
        let number = {
            let mut guard = self.state.lock().unwrap();
            let number = guard.versions.new_file_number();
            guard.pending_outputs.insert(number);
            number
        };
        compact.outputs.push(Output {
            number,
            file_size: 0,
            smallest: InternalKey::default(),
            largest: InternalKey::default(),
        });
        let file = File::create(table_file_name(&self.db_path, number))?;
        compact.builder = Some(TableBuilder::new(
            self.options.clone(),
            self.icmp.clone(),
            file,
        ));
        Ok(())
    }

    fn finish_compaction_output_file(
        &self,
        compact: &mut CompactionState,
        input: &mut Box<dyn Iter>,
    ) -> Result<()> {
        let mut builder = compact.builder.take().expect("no open compaction output");
        let output_number = compact.outputs.last().unwrap().number;
        debug_assert!(output_number != 0);

        let mut status = input.status();
        let current_entries = builder.num_entries();
        if status.is_ok() {
            status = builder.finish();
        } else {
            builder.abandon();
        }
        let current_bytes = builder.file_size();
        compact.outputs.last_mut().unwrap().file_size = current_bytes;
        compact.total_bytes += current_bytes;

        if status.is_ok() {
            status = builder.sync();
        }
        if status.is_ok() && current_entries > 0 {
            // The table must open cleanly; it is about to become live.
            let read_options = ReadOptions {
                verify_checksums: false,
                fill_cache: false,
                snapshot: None,
            };
            let mut it =
                self.table_cache
                    .new_iterator(&read_options, output_number, current_bytes);
            status = it.status();
            if status.is_ok() {
                info!(
                    file = output_number,
                    entries = current_entries,
                    bytes = current_bytes,
                    "compaction output"
                );
            }
        }
        status
    }

    fn install_compaction_results(
        &self,
        guard: &mut DbState,
        compact: &mut CompactionState,
    ) -> Result<()> {
        let level = compact.compaction.level();
        info!(
            level,
            inputs0 = compact.compaction.num_input_files(0),
            inputs1 = compact.compaction.num_input_files(1),
            output_bytes = compact.total_bytes,
            "installing compaction results"
        );
        compact.compaction.add_input_deletions();
        for output in &compact.outputs {
            compact.compaction.edit.add_file(
                level + 1,
                output.number,
                output.file_size,
                output.smallest.clone(),
                output.largest.clone(),
            );
        }
        guard.versions.log_and_apply(&mut compact.compaction.edit)
    }

    fn cleanup_compaction<'a>(
        &self,
        mut guard: StateGuard<'a>,
        compact: &mut CompactionState,
    ) -> StateGuard<'a> {
        if let Some(mut builder) = compact.builder.take() {
            // Interrupted mid-output.
            builder.abandon();
        }
        for output in &compact.outputs {
            guard.pending_outputs.remove(&output.number);
        }
        guard
    }

    /// Delete every file no live state references. Deletion runs with
    /// the lock released.
    fn remove_obsolete_files<'a>(&'a self, mut guard: StateGuard<'a>) -> StateGuard<'a> {
        if guard.bg_error.is_some() {
            // After a background error the version state may not
            // reflect disk; deleting anything would be a guess.
            return guard;
        }

        let mut live = guard.pending_outputs.clone();
        live.extend(guard.versions.live_files());
        let log_number = guard.versions.log_number();
        let prev_log_number = guard.versions.prev_log_number();
        let manifest_number = guard.versions.manifest_file_number();

        let mut to_delete: Vec<(String, FileType, u64)> = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.db_path) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = match name.to_str() {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                if let Some((file_type, number)) = parse_file_name(&name) {
                    let keep = match file_type {
                        FileType::Log => number >= log_number || number == prev_log_number,
                        FileType::Manifest => number >= manifest_number,
                        FileType::Table | FileType::Temp => live.contains(&number),
                        FileType::Current | FileType::Lock | FileType::InfoLog => true,
                    };
                    if !keep {
                        if file_type == FileType::Table {
                            self.table_cache.evict(number);
                        }
                        to_delete.push((name, file_type, number));
                    }
                }
            }
        }

        drop(guard);
        for (name, file_type, number) in to_delete {
            info!(?file_type, number, "deleting obsolete file {}", name);
            let _ = std::fs::remove_file(self.db_path.join(&name));
        }
        self.state.lock().unwrap()
    }

    // ------------------------------------------------------------------
    // Manual compaction and test hooks
    // ------------------------------------------------------------------

    fn force_compact_memtable(self: &Arc<Self>) -> Result<()> {
        // A null write forces rotation of the current memtable.
        self.write(false, None)?;
        let mut guard = self.state.lock().unwrap();
        while guard.imm.is_some() && guard.bg_error.is_none() {
            guard = self.background_work_finished.wait(guard).unwrap();
        }
        match &guard.bg_error {
            Some(e) if guard.imm.is_some() => Err(e.clone()),
            _ => Ok(()),
        }
    }

    fn compact_range_level(
        self: &Arc<Self>,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        debug_assert!(level + 1 < NUM_LEVELS);
        let id = self.next_manual_id.fetch_add(1, AtomicOrdering::Relaxed);
        let begin_key =
            begin.map(|key| InternalKey::new(key, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK));
        let end_key = end.map(|key| InternalKey::new(key, 0, ValueType::Deletion));

        let mut guard = self.state.lock().unwrap();
        loop {
            if self.shutting_down.load(AtomicOrdering::Acquire) || guard.bg_error.is_some() {
                break;
            }
            let mine_done = matches!(&guard.manual_compaction, Some(m) if m.id == id && m.done);
            if mine_done {
                guard.manual_compaction = None;
                break;
            }
            // A finished slot whose owner bailed out would block every
            // later request; sweep it once the worker is idle.
            if matches!(&guard.manual_compaction, Some(m) if m.done && m.id != id)
                && !guard.bg_compaction_scheduled
            {
                guard.manual_compaction = None;
            }
            if guard.manual_compaction.is_none() {
                guard.manual_compaction = Some(ManualCompaction {
                    id,
                    level,
                    done: false,
                    begin: begin_key.clone(),
                    end: end_key.clone(),
                });
                self.maybe_schedule_compaction(&mut guard);
            } else {
                guard = self.background_work_finished.wait(guard).unwrap();
            }
        }

        // Abnormal exit: reclaim the slot once no round is running.
        if matches!(&guard.manual_compaction, Some(m) if m.id == id)
            && !guard.bg_compaction_scheduled
        {
            guard.manual_compaction = None;
        }
        match &guard.bg_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    fn property(&self, name: &str) -> Option<String> {
        let rest = name.strip_prefix("stratadb.")?;
        let guard = self.state.lock().unwrap();

        if let Some(level_str) = rest.strip_prefix("num-files-at-level") {
            let level: usize = level_str.parse().ok()?;
            if level >= NUM_LEVELS {
                return None;
            }
            return Some(guard.versions.num_level_files(level).to_string());
        }

        match rest {
            "stats" => {
                let mut out = String::from(
                    "                               Compactions\n\
                     Level  Files Size(MB) Time(sec) Read(MB) Write(MB)\n\
                     --------------------------------------------------\n",
                );
                for level in 0..NUM_LEVELS {
                    let files = guard.versions.num_level_files(level);
                    let stats = guard.stats[level];
                    if stats.micros > 0 || files > 0 {
                        out.push_str(&format!(
                            "{:3} {:8} {:8.0} {:9.0} {:8.0} {:9.0}\n",
                            level,
                            files,
                            guard.versions.num_level_bytes(level) as f64 / 1048576.0,
                            stats.micros as f64 / 1e6,
                            stats.bytes_read as f64 / 1048576.0,
                            stats.bytes_written as f64 / 1048576.0,
                        ));
                    }
                }
                Some(out)
            }
            "sstables" => {
                let current = guard.versions.current();
                let mut out = String::new();
                for (level, files) in current.files.iter().enumerate() {
                    out.push_str(&format!("--- level {level} ---\n"));
                    for file in files {
                        out.push_str(&format!(
                            " {}:{}[{:?} .. {:?}]\n",
                            file.number,
                            file.file_size,
                            file.smallest.user_key(),
                            file.largest.user_key()
                        ));
                    }
                }
                Some(out)
            }
            "approximate-memory-usage" => {
                let mut total = guard.mem.approximate_memory_usage();
                if let Some(imm) = &guard.imm {
                    total += imm.approximate_memory_usage();
                }
                if let Some(cache) = &self.options.block_cache {
                    total += cache.total_charge();
                }
                Some(total.to_string())
            }
            _ => None,
        }
    }

    fn approximate_sizes(&self, ranges: &[(&[u8], &[u8])]) -> Vec<u64> {
        let guard = self.state.lock().unwrap();
        let version = guard.versions.current();
        ranges
            .iter()
            .map(|(start, limit)| {
                let start_key = InternalKey::new(start, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK);
                let limit_key = InternalKey::new(limit, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK);
                let start_offset = guard.versions.approximate_offset_of(&version, &start_key);
                let limit_offset = guard.versions.approximate_offset_of(&version, &limit_key);
                limit_offset.saturating_sub(start_offset)
            })
            .collect()
    }
}

/// Merge queued writers behind the leader into one batch, bounded so a
/// burst of small writes coalesces without penalizing a single large
/// one. Returns the group and the last writer included.
fn build_batch_group(guard: &mut DbState) -> (WriteBatch, Arc<WriterRequest>) {
    let first = Arc::clone(guard.writers.front().expect("empty writer queue"));
    let mut group = first
        .batch
        .lock()
        .unwrap()
        .take()
        .expect("leader has no batch");

    let mut total = group.approximate_size();
    let max_size = if total <= 128 << 10 {
        total + (128 << 10)
    } else {
        1 << 20
    };

    let mut last = Arc::clone(&first);
    for writer in guard.writers.iter().skip(1) {
        if writer.sync && !first.sync {
            // A sync write must not ride a non-sync round.
            break;
        }
        let taken = {
            let mut slot = writer.batch.lock().unwrap();
            match slot.as_ref() {
                None => None, // rotation request; never grouped
                Some(batch) => {
                    if total + batch.approximate_size() > max_size {
                        None
                    } else {
                        total += batch.approximate_size();
                        slot.take()
                    }
                }
            }
        };
        match taken {
            Some(batch) => {
                group.append(&batch);
                last = Arc::clone(writer);
            }
            None => break,
        }
    }
    (group, last)
}

/// Write `mem`'s contents as a table file; `Ok(None)` when the
/// memtable is empty. On failure the partial file is removed.
fn build_table(
    db_path: &Path,
    options: &Options,
    icmp: &InternalKeyComparator,
    table_cache: &TableCache,
    mut iter: crate::memtable::MemTableIterator,
    number: u64,
) -> Result<Option<(u64, InternalKey, InternalKey)>> {
    iter.seek_to_first();
    if !iter.valid() {
        return Ok(None);
    }

    let path = table_file_name(db_path, number);
    let result = (|| {
        let file = File::create(&path)?;
        let mut builder = TableBuilder::new(options.clone(), icmp.clone(), file);
        let smallest = InternalKey::decode_from(iter.key());
        let mut largest = InternalKey::decode_from(iter.key());
        while iter.valid() {
            largest = InternalKey::decode_from(iter.key());
            builder.add(iter.key(), iter.value())?;
            iter.next();
        }
        builder.finish()?;
        builder.sync()?;
        let file_size = builder.file_size();

        // Verify the fresh table is readable before it becomes live.
        let read_options = ReadOptions {
            verify_checksums: false,
            fill_cache: false,
            snapshot: None,
        };
        let mut check = table_cache.new_iterator(&read_options, number, file_size);
        check.status()?;
        Ok(Some((file_size, smallest, largest)))
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&path);
    }
    result
}

/// Initialize an empty database: manifest 1 plus a CURRENT pointing at
/// it.
fn new_db(db_path: &Path, options: &Options) -> Result<()> {
    let mut edit = VersionEdit::new();
    edit.set_comparator_name(options.comparator.name());
    edit.set_log_number(0);
    edit.set_next_file_number(2);
    edit.set_last_sequence(0);

    let manifest_path = manifest_file_name(db_path, 1);
    let file = File::create(&manifest_path)?;
    let mut writer = log::Writer::new(file);
    let status = writer
        .add_record(&edit.encode())
        .and_then(|_| writer.sync())
        .and_then(|_| set_current_file(db_path, 1));
    if status.is_err() {
        let _ = std::fs::remove_file(&manifest_path);
    }
    status
}

/// Replay one WAL into memtables, flushing level-0 tables when they
/// fill. Returns the adopted (memtable, writer) pair when the log can
/// keep serving as the live WAL.
#[allow(clippy::too_many_arguments)]
fn recover_log_file(
    db_path: &Path,
    options: &Options,
    icmp: &InternalKeyComparator,
    table_cache: &Arc<TableCache>,
    versions: &mut VersionSet,
    number: u64,
    last_log: bool,
    edit: &mut VersionEdit,
    max_sequence: &mut u64,
    save_manifest: &mut bool,
) -> Result<Option<(Arc<MemTable>, log::Writer<File>)>> {
    let path = log_file_name(db_path, number);
    let file = File::open(&path)?;
    info!(log = number, "recovering write-ahead log");

    let reporter_status: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
    struct SharedReporter {
        paranoid: bool,
        slot: Arc<Mutex<Option<Error>>>,
    }
    impl log::Reporter for SharedReporter {
        fn corruption(&mut self, bytes: usize, reason: &str) {
            warn!(bytes, "log record dropped: {reason}");
            if self.paranoid {
                let mut slot = self.slot.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(Error::corruption(format!("log record: {reason}")));
                }
            }
        }
    }
    let mut reader = log::Reader::new(
        std::io::BufReader::new(file),
        Some(Box::new(SharedReporter {
            paranoid: options.paranoid_checks,
            slot: Arc::clone(&reporter_status),
        })),
        true,
    );

    let mut record = Vec::new();
    let mut batch = WriteBatch::new();
    let mut mem: Option<Arc<MemTable>> = None;
    let mut compactions = 0;
    while reader.read_record(&mut record) {
        if record.len() < batch::BATCH_HEADER_SIZE {
            warn!(bytes = record.len(), "log record dropped: too small");
            continue;
        }
        batch.set_contents(&record)?;
        let table = mem
            .get_or_insert_with(|| Arc::new(MemTable::new(icmp.clone())))
            .clone();
        if let Err(e) = batch.insert_into(&table) {
            if options.paranoid_checks {
                return Err(e);
            }
            warn!("ignoring batch replay error: {e}");
        }
        let last_seq = batch.sequence() + batch.count() as u64 - 1;
        if last_seq > *max_sequence {
            *max_sequence = last_seq;
        }

        if table.approximate_memory_usage() > options.write_buffer_size {
            compactions += 1;
            *save_manifest = true;
            write_level0_during_open(db_path, options, icmp, table_cache, versions, &table, edit)?;
            mem = None;
        }
    }
    if let Some(e) = reporter_status.lock().unwrap().take() {
        return Err(e);
    }

    if options.reuse_logs && last_log && compactions == 0 {
        if let Ok(reopened) = std::fs::OpenOptions::new().append(true).open(&path) {
            let len = reopened.metadata()?.len();
            info!(log = number, bytes = len, "reusing old write-ahead log");
            let writer = log::Writer::with_dest_length(reopened, len);
            let table =
                mem.unwrap_or_else(|| Arc::new(MemTable::new(icmp.clone())));
            return Ok(Some((table, writer)));
        }
    }

    if let Some(table) = mem {
        *save_manifest = true;
        write_level0_during_open(db_path, options, icmp, table_cache, versions, &table, edit)?;
    }
    Ok(None)
}

fn write_level0_during_open(
    db_path: &Path,
    options: &Options,
    icmp: &InternalKeyComparator,
    table_cache: &Arc<TableCache>,
    versions: &mut VersionSet,
    mem: &Arc<MemTable>,
    edit: &mut VersionEdit,
) -> Result<()> {
    let number = versions.new_file_number();
    match build_table(db_path, options, icmp, table_cache, mem.iter(), number)? {
        Some((file_size, smallest, largest)) => {
            info!(file = number, bytes = file_size, "recovered level-0 table");
            edit.add_file(0, number, file_size, smallest, largest);
        }
        None => versions.reuse_file_number(number),
    }
    Ok(())
}

/// Remove every file of the database at `path`. The database must not
/// be open.
pub fn destroy_db(path: impl AsRef<Path>, _options: &Options) -> Result<()> {
    let db_path = path.as_ref();
    let entries = match std::fs::read_dir(db_path) {
        Ok(entries) => entries,
        // Missing directory counts as destroyed.
        Err(_) => return Ok(()),
    };

    let lock_path = lock_file_name(db_path);
    let _lock = FileLock::lock(&lock_path)
        .map_err(|e| Error::Io(format!("unable to lock {}: {e}", db_path.display())))?;

    let mut result = Ok(());
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        match parse_file_name(name) {
            Some((FileType::Lock, _)) | None => {}
            Some(_) => {
                if let Err(e) = std::fs::remove_file(db_path.join(name)) {
                    if result.is_ok() {
                        result = Err(e.into());
                    }
                }
            }
        }
    }
    drop(_lock);
    let _ = std::fs::remove_file(&lock_path);
    let _ = std::fs::remove_dir(db_path);
    result
}

/// Declared for API completeness; this build recovers through
/// [`DB::open`]'s replay path instead.
pub fn repair_db(path: impl AsRef<Path>, _options: &Options) -> Result<()> {
    Err(Error::NotSupported(format!(
        "repair_db is not implemented (database {})",
        path.as_ref().display()
    )))
}
