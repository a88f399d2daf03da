use std::{
    fmt,
    sync::atomic::{
        AtomicBool, AtomicU8, AtomicU32, AtomicUsize,
        Ordering::{Acquire, Relaxed, Release},
    },
};

use crate::{GenerationId, NUM_GENERATIONS, Symbol};

/// Fully qualified function identity: owning module, name, arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionKey {
    pub module: Symbol,
    pub function: Symbol,
    pub arity: u32,
}

impl FunctionKey {
    #[must_use]
    pub fn new(module: Symbol, function: Symbol, arity: u32) -> Self {
        Self {
            module,
            function,
            arity,
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.module, self.function, self.arity)
    }
}

/// Entry address of compiled code. Never zero; zero is the internal marker
/// for a slot that still routes through the trampoline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeAddr(pub usize);

/// Identifier of a built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BifId(pub u32);

/// Role of the fallback op occupying an unbound slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trampoline {
    /// Calls land in the runtime's module-loading error handler.
    ErrorHandler,
    /// The fallback has been repurposed as a breakpoint/trace hook.
    Breakpoint,
}

const TRAMP_ERROR_HANDLER: u8 = 0;
const TRAMP_BREAKPOINT: u8 = 1;
const NO_BIF: u32 = u32::MAX;
const UNBOUND: usize = 0;

/// Shared, generation-independent payload for one function.
///
/// `addresses` is indexed by generation. Each slot is written only by
/// whoever owns that generation's mutability; after creation that is only
/// ever the staging generation, under the staging lock. The remaining
/// fields are written at creation time or under the staging lock, so a
/// reader of the active generation never observes them mid-write.
#[derive(Debug)]
pub struct DispatchRecord {
    key: FunctionKey,
    addresses: [AtomicUsize; NUM_GENERATIONS],
    trampoline: AtomicU8,
    bif: AtomicU32,
    traced: AtomicBool,
}

impl DispatchRecord {
    pub(crate) fn new(key: FunctionKey) -> Self {
        Self {
            key,
            addresses: [const { AtomicUsize::new(UNBOUND) }; NUM_GENERATIONS],
            trampoline: AtomicU8::new(TRAMP_ERROR_HANDLER),
            bif: AtomicU32::new(NO_BIF),
            traced: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn key(&self) -> &FunctionKey {
        &self.key
    }

    /// Bound address for the slot, or `None` while the trampoline is active.
    #[inline]
    pub fn address(&self, generation: GenerationId) -> Option<CodeAddr> {
        match self.addresses[generation.0].load(Acquire) {
            UNBOUND => None,
            addr => Some(CodeAddr(addr)),
        }
    }

    #[inline]
    pub fn is_trampoline_active(&self, generation: GenerationId) -> bool {
        self.addresses[generation.0].load(Acquire) == UNBOUND
    }

    /// Bind real code to the slot. The caller must own the generation's
    /// mutability, which after creation means holding the staging lock.
    pub(crate) fn bind_address(&self, generation: GenerationId, addr: CodeAddr) {
        assert_ne!(addr.0, UNBOUND, "cannot bind a null code address");
        self.addresses[generation.0].store(addr.0, Release);
    }

    /// Seed `dst` with `src`'s current address. Stub slots stay stubs.
    pub(crate) fn copy_address(&self, src: GenerationId, dst: GenerationId) {
        self.addresses[dst.0].store(self.addresses[src.0].load(Acquire), Release);
    }

    pub fn trampoline(&self) -> Trampoline {
        match self.trampoline.load(Acquire) {
            TRAMP_BREAKPOINT => Trampoline::Breakpoint,
            _ => Trampoline::ErrorHandler,
        }
    }

    pub(crate) fn set_trampoline(&self, trampoline: Trampoline) {
        let raw = match trampoline {
            Trampoline::ErrorHandler => TRAMP_ERROR_HANDLER,
            Trampoline::Breakpoint => TRAMP_BREAKPOINT,
        };
        self.trampoline.store(raw, Release);
    }

    pub fn bif(&self) -> Option<BifId> {
        match self.bif.load(Acquire) {
            NO_BIF => None,
            id => Some(BifId(id)),
        }
    }

    pub(crate) fn set_bif(&self, bif: BifId) {
        assert_ne!(bif.0, NO_BIF, "reserved builtin id");
        self.bif.store(bif.0, Release);
    }

    #[inline]
    pub fn is_traced(&self) -> bool {
        self.traced.load(Relaxed)
    }

    pub(crate) fn set_traced(&self, traced: bool) {
        self.traced.store(traced, Relaxed);
    }
}
