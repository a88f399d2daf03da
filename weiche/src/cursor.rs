use std::sync::atomic::{
    AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};

/// Number of rotation slots in the generation ring.
pub const NUM_GENERATIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationId(pub usize);

/// Cursor over the generation ring: which slot running code reads (active)
/// and which slot the next load cycle writes (staging).
///
/// Owned by a table instance rather than living as process-global state, so
/// tests can spin up independent tables. `publish` is the release boundary
/// that makes everything written to the staged generation visible to readers
/// that observe the new active index.
#[derive(Debug)]
pub struct CodeCursor {
    active: AtomicUsize,
}

impl CodeCursor {
    pub fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn active(&self) -> GenerationId {
        GenerationId(self.active.load(Acquire))
    }

    #[inline]
    pub fn staging(&self) -> GenerationId {
        GenerationId((self.active.load(Acquire) + 1) % NUM_GENERATIONS)
    }

    /// Flip the staged generation to active. Only the single committer calls
    /// this, bracketed 1:1 by `start_staging`/`end_staging`.
    pub fn publish(&self) {
        let next = (self.active.load(Relaxed) + 1) % NUM_GENERATIONS;
        self.active.store(next, Release);
    }
}
