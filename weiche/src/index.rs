use std::{
    collections::HashMap,
    mem,
    sync::{Arc, atomic::AtomicUsize},
};

use log::error;

use crate::{Blob, FunctionKey, GenerationEntry};

/// Keyed, ordinal-indexed table for one generation. Insert-only: an entry
/// leaves the table only when the table itself is torn down, and its ordinal
/// is stable for the lifetime of the generation.
#[derive(Debug)]
pub struct IndexTable {
    map: HashMap<FunctionKey, usize, ahash::RandomState>,
    entries: Vec<GenerationEntry>,
    max_entries: usize,
}

impl IndexTable {
    pub fn new(initial_capacity: usize, max_entries: usize) -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(initial_capacity, ahash::RandomState::new()),
            entries: Vec::with_capacity(initial_capacity),
            max_entries,
        }
    }

    pub fn lookup(&self, key: &FunctionKey) -> Option<&GenerationEntry> {
        self.map.get(key).map(|&ordinal| &self.entries[ordinal])
    }

    /// Existing entry for `key`, or publish one at the next ordinal: attach
    /// a slot on `shared` when the record already lives elsewhere, allocate
    /// a fresh blob otherwise.
    ///
    /// The table is foundational to execution, so running out of configured
    /// capacity aborts instead of dropping a function identity.
    pub fn lookup_or_insert(
        &mut self,
        key: FunctionKey,
        shared: Option<&Arc<Blob>>,
        bytes: &Arc<AtomicUsize>,
    ) -> &GenerationEntry {
        if let Some(&ordinal) = self.map.get(&key) {
            return &self.entries[ordinal];
        }
        if self.entries.len() >= self.max_entries {
            error!(
                "dispatch table generation is full ({} entries)",
                self.max_entries
            );
            panic!(
                "dispatch table generation is full ({} entries)",
                self.max_entries
            );
        }
        let blob = match shared {
            Some(blob) => Arc::clone(blob),
            None => Blob::allocate(key, bytes),
        };
        let ordinal = self.entries.len();
        self.entries.push(blob.attach());
        self.map.insert(key, ordinal);
        &self.entries[ordinal]
    }

    pub fn ordinal(&self, i: usize) -> Option<&GenerationEntry> {
        self.entries.get(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GenerationEntry> {
        self.entries.iter()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Approximate heap footprint, for diagnostics.
    pub fn footprint(&self) -> usize {
        mem::size_of::<Self>()
            + self.map.capacity() * (mem::size_of::<FunctionKey>() + mem::size_of::<usize>())
            + self.entries.capacity() * mem::size_of::<GenerationEntry>()
    }
}
