use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering::Relaxed},
    },
};

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::{
    BifId, Blob, CodeAddr, CodeCursor, FunctionKey, GenerationId, IndexTable, NUM_GENERATIONS,
    Trampoline,
};

/// Configuration for a dispatch table instance.
#[derive(Debug, Clone, Copy)]
pub struct DispatchTableCreateInfo {
    /// Pre-sized capacity of each generation table.
    pub initial_capacity: usize,
    /// Hard ceiling on distinct live function keys per generation.
    pub max_entries: usize,
}

impl Default for DispatchTableCreateInfo {
    fn default() -> Self {
        Self {
            initial_capacity: 4000,
            max_entries: 512 * 1024,
        }
    }
}

#[derive(Debug, Default)]
struct StagingState {
    /// Generation prepared by the last `start_staging`, until `end_staging`
    /// closes the cycle.
    load_target: Option<GenerationId>,
}

/// The function-dispatch table: one keyed table per generation plus the
/// cursor that says which generation running code reads.
///
/// Writers only ever touch the staging generation, under the staging lock;
/// a lookup against the active generation takes an uncontended read lock
/// and nothing else. Lock order is always the staging lock first, then a
/// generation table.
pub struct DispatchTable {
    generations: [RwLock<IndexTable>; NUM_GENERATIONS],
    cursor: CodeCursor,
    staging: Mutex<StagingState>,
    total_entry_bytes: Arc<AtomicUsize>,
    stub_races: AtomicU64,
}

impl DispatchTable {
    pub fn new(info: DispatchTableCreateInfo) -> Self {
        Self {
            generations: std::array::from_fn(|_| {
                RwLock::new(IndexTable::new(info.initial_capacity, info.max_entries))
            }),
            cursor: CodeCursor::new(),
            staging: Mutex::new(StagingState::default()),
            total_entry_bytes: Arc::new(AtomicUsize::new(0)),
            stub_races: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn cursor(&self) -> &CodeCursor {
        &self.cursor
    }

    /// Record for `key` in `generation`, stubs included.
    ///
    /// Functions referenced by loaded code but not yet loaded themselves
    /// have a record here too; calling through it reaches the error
    /// handler. Suitable for implementing dynamic application of a function
    /// to arguments.
    pub fn find_entry(&self, key: &FunctionKey, generation: GenerationId) -> Option<Arc<Blob>> {
        self.generations[generation.0]
            .read()
            .lookup(key)
            .map(|entry| Arc::clone(entry.blob()))
    }

    /// As `find_entry`, but never reports phantom stubs: a record whose slot
    /// still routes through the error handler is absent for this query,
    /// unless the trampoline has been repurposed as a breakpoint hook.
    /// Suitable for introspection that cannot rely on the error handler.
    pub fn find_loaded_function(
        &self,
        key: &FunctionKey,
        generation: GenerationId,
    ) -> Option<Arc<Blob>> {
        let table = self.generations[generation.0].read();
        let entry = table.lookup(key)?;
        if entry.record().is_trampoline_active(generation)
            && entry.record().trampoline() != Trampoline::Breakpoint
        {
            return None;
        }
        Some(Arc::clone(entry.blob()))
    }

    /// Lookup-or-create against the staging generation. Only for loading
    /// code; idempotent within a staging cycle.
    pub fn put(&self, key: FunctionKey) -> Arc<Blob> {
        debug_assert!(key.module.is_valid() && key.function.is_valid());
        let _staging = self.staging.lock();
        self.put_locked(key)
    }

    fn put_locked(&self, key: FunctionKey) -> Arc<Blob> {
        let generation = self.cursor.staging();
        let mut table = self.generations[generation.0].write();
        let entry = table.lookup_or_insert(key, None, &self.total_entry_bytes);
        Arc::clone(entry.blob())
    }

    /// Bind the freshly compiled entry point for `record` in the staging
    /// generation.
    pub fn bind(&self, record: &Blob, addr: CodeAddr) {
        let _staging = self.staging.lock();
        record.bind_address(self.cursor.staging(), addr);
    }

    /// Record for `key`, creating a stub in staging when the function is not
    /// visible in the active generation. The common already-loaded path
    /// takes no lock at all.
    pub fn get_or_make_stub(&self, key: FunctionKey) -> Arc<Blob> {
        self.get_or_make_stub_inner(key, || {})
    }

    /// Optimistic retry protocol, with a pre-lock hook so tests can force
    /// the commit race deterministically.
    fn get_or_make_stub_inner(
        &self,
        key: FunctionKey,
        mut before_lock: impl FnMut(),
    ) -> Arc<Blob> {
        debug_assert!(key.module.is_valid() && key.function.is_valid());
        loop {
            let epoch = self.cursor.active();
            if let Some(record) = self.find_entry(&key, epoch) {
                return record;
            }
            before_lock();
            {
                let _staging = self.staging.lock();
                if self.cursor.active() == epoch {
                    // Not loaded yet. The stub goes into staging so the
                    // active table never needs a write lock; no commit ran
                    // since the epoch read, so active still cannot resolve
                    // the key.
                    return self.put_locked(key);
                }
            }
            // A commit flipped the active generation between the unlocked
            // lookup and the lock. The key may be resolvable there now.
            self.stub_races.fetch_add(1, Relaxed);
            debug!("stub creation for {key} raced with a commit, retrying");
        }
    }

    /// Seed the staging generation as a full replica of the active one, so
    /// a load cycle starts from the complete currently-visible baseline.
    /// Records already published in staging are reused through their shared
    /// allocation, never reallocated.
    pub fn start_staging(&self) {
        let dst = self.cursor.staging();
        let src = self.cursor.active();
        assert_ne!(dst, src, "staging and active generation must differ");

        let mut state = self.staging.lock();
        debug_assert!(state.load_target.is_none(), "staging cycle already open");

        let src_table = self.generations[src.0].read();
        let mut dst_table = self.generations[dst.0].write();
        for entry in src_table.iter() {
            let blob = entry.blob();
            blob.copy_address(src, dst);
            let staged =
                dst_table.lookup_or_insert(*blob.key(), Some(blob), &self.total_entry_bytes);
            debug_assert!(
                Arc::ptr_eq(staged.blob(), blob),
                "staged entry must share the active record"
            );
        }
        debug!(
            "staging generation {} seeded with {} entries",
            dst.0,
            dst_table.count()
        );
        state.load_target = Some(dst);
    }

    /// Close the staging cycle opened by `start_staging`. Purely a
    /// checkpoint: the flip of the active generation is `cursor().publish()`,
    /// driven by the committer after a committing close.
    pub fn end_staging(&self, commit: bool) {
        let mut state = self.staging.lock();
        debug_assert_eq!(
            state.load_target,
            Some(self.cursor.staging()),
            "closing a staging cycle that was never started"
        );
        state.load_target = None;
        debug!("staging cycle closed, commit: {commit}");
    }

    /// Staging insert that also marks the record as a built-in.
    pub fn register_bif(&self, key: FunctionKey, bif: BifId) -> Arc<Blob> {
        debug_assert!(key.module.is_valid() && key.function.is_valid());
        let _staging = self.staging.lock();
        let record = self.put_locked(key);
        record.set_bif(bif);
        record
    }

    /// Toggle call tracing for the record.
    pub fn set_traced(&self, record: &Blob, traced: bool) {
        let _staging = self.staging.lock();
        record.set_traced(traced);
    }

    /// Repurpose the record's fallback trampoline as a breakpoint hook.
    /// A breakpointed stub counts as loaded for `find_loaded_function`.
    pub fn set_breakpoint(&self, record: &Blob) {
        let _staging = self.staging.lock();
        record.set_trampoline(Trampoline::Breakpoint);
    }

    pub fn clear_breakpoint(&self, record: &Blob) {
        let _staging = self.staging.lock();
        record.set_trampoline(Trampoline::ErrorHandler);
    }

    pub fn ordinal_lookup(&self, i: usize, generation: GenerationId) -> Option<Arc<Blob>> {
        self.generations[generation.0]
            .read()
            .ordinal(i)
            .map(|entry| Arc::clone(entry.blob()))
    }

    pub fn count(&self, generation: GenerationId) -> usize {
        self.generations[generation.0].read().count()
    }

    /// Live bytes across all record allocations.
    pub fn total_bytes(&self) -> usize {
        self.total_entry_bytes.load(Relaxed)
    }

    /// Approximate heap footprint of the generation tables themselves.
    pub fn table_bytes(&self) -> usize {
        let _staging = self.staging.lock();
        self.generations.iter().map(|g| g.read().footprint()).sum()
    }

    /// Commits observed between the unlocked lookup and the lock in stub
    /// creation. A runaway value means sustained concurrent reloads are
    /// starving a caller in the retry loop.
    pub fn stub_races(&self) -> u64 {
        self.stub_races.load(Relaxed)
    }

    /// Write every active-generation entry plus staging-table statistics.
    ///
    /// `emergency` skips all locking for crash introspection; the tables
    /// are then read raw and the output is best-effort.
    pub fn dump<W: io::Write>(&self, out: &mut W, emergency: bool) -> io::Result<()> {
        let _staging = if emergency {
            None
        } else {
            Some(self.staging.lock())
        };

        let active = self.cursor.active();
        let staging_gen = self.cursor.staging();

        let write_tables = |out: &mut W,
                            active_table: &IndexTable,
                            staging_table: &IndexTable|
         -> io::Result<()> {
            writeln!(out, "dispatch table, active generation {}:", active.0)?;
            for (i, entry) in active_table.iter().enumerate() {
                let record = entry.record();
                match record.address(active) {
                    Some(addr) => {
                        writeln!(out, "  {:>6}: {} -> {:#x}", i, record.key(), addr.0)?;
                    }
                    None => {
                        let state = match record.trampoline() {
                            Trampoline::Breakpoint => "breakpoint",
                            Trampoline::ErrorHandler => "stub",
                        };
                        writeln!(out, "  {:>6}: {} -> {}", i, record.key(), state)?;
                    }
                }
            }
            writeln!(out, "staging generation {}:", staging_gen.0)?;
            writeln!(out, "  entries: {}", staging_table.count())?;
            writeln!(out, "  bytes: {}", staging_table.footprint())?;
            Ok(())
        };

        if emergency {
            // SAFETY: crash introspection runs with every scheduler stopped;
            // blocking on a lock here could hang the dump instead of
            // producing one.
            let active_table = unsafe { &*self.generations[active.0].data_ptr() };
            let staging_table = unsafe { &*self.generations[staging_gen.0].data_ptr() };
            write_tables(out, active_table, staging_table)
        } else {
            let active_table = self.generations[active.0].read();
            let staging_table = self.generations[staging_gen.0].read();
            write_tables(out, &active_table, &staging_table)
        }
    }
}
