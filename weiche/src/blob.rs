use std::{
    mem,
    ops::Deref,
    sync::{
        Arc,
        atomic::{
            AtomicU32, AtomicUsize,
            Ordering::{AcqRel, Acquire, Relaxed},
        },
    },
};

use log::trace;

use crate::{DispatchRecord, FunctionKey, NUM_GENERATIONS};

/// One allocation backing a function everywhere: the shared record plus one
/// reservable slot per generation table.
///
/// Slot occupancy is a bitmask, claimed at publish and cleared at release.
/// The allocation itself lives as long as any published entry still holds
/// its `Arc`, so the last release is what actually frees it.
#[derive(Debug)]
pub struct Blob {
    record: DispatchRecord,
    slots: AtomicU32,
    bytes: Arc<AtomicUsize>,
}

impl Deref for Blob {
    type Target = DispatchRecord;

    fn deref(&self) -> &DispatchRecord {
        &self.record
    }
}

impl Blob {
    /// Fresh allocation for a key seen for the first time. No slot is
    /// claimed yet; the record starts out routing every generation through
    /// the error-handler trampoline.
    pub(crate) fn allocate(key: FunctionKey, bytes: &Arc<AtomicUsize>) -> Arc<Blob> {
        bytes.fetch_add(mem::size_of::<Blob>(), Relaxed);
        trace!("allocating record for {key}");
        Arc::new(Blob {
            record: DispatchRecord::new(key),
            slots: AtomicU32::new(0),
            bytes: Arc::clone(bytes),
        })
    }

    #[inline]
    pub fn record(&self) -> &DispatchRecord {
        &self.record
    }

    /// Claim the first free slot and publish it as a `GenerationEntry`.
    /// The caller must hold the staging lock; a key is published at most
    /// once per generation table, so a free slot always exists.
    pub(crate) fn attach(self: &Arc<Self>) -> GenerationEntry {
        let mut mask = self.slots.load(Acquire);
        loop {
            let slot = (0..NUM_GENERATIONS as u32)
                .find(|i| mask & (1 << i) == 0)
                .expect("every generation slot of the record is already published");
            match self
                .slots
                .compare_exchange_weak(mask, mask | (1 << slot), AcqRel, Acquire)
            {
                Ok(_) => {
                    return GenerationEntry {
                        blob: Arc::clone(self),
                        slot: slot as u8,
                    };
                }
                Err(cur) => mask = cur,
            }
        }
    }

    fn unpublish(&self, slot: u8) {
        self.slots.fetch_and(!(1u32 << slot), AcqRel);
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.slots.load(Relaxed),
            0,
            "record freed while a generation slot is still published"
        );
        trace!("freeing record for {}", self.record.key());
        self.bytes.fetch_sub(mem::size_of::<Blob>(), Relaxed);
    }
}

/// A published (key, generation) handle: the record's blob plus the slot it
/// claimed there. Dropping the entry releases the slot; the blob goes away
/// with the last published slot.
#[derive(Debug)]
pub struct GenerationEntry {
    blob: Arc<Blob>,
    slot: u8,
}

impl GenerationEntry {
    #[inline]
    pub fn record(&self) -> &DispatchRecord {
        self.blob.record()
    }

    #[inline]
    pub fn blob(&self) -> &Arc<Blob> {
        &self.blob
    }
}

impl Drop for GenerationEntry {
    fn drop(&mut self) {
        self.blob.unpublish(self.slot);
    }
}
