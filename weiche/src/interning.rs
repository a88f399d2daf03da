use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;

/// Opaque interned identifier for a module or function name.
///
/// Equality and hashing are O(1) and the id is stable for the lifetime of
/// the process. `Symbol::NIL` is reserved and never names anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(u64);

impl Symbol {
    pub const NIL: Symbol = Symbol(0);

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

// TODO: the intern table grows forever; add symbol reclamation once module
// purging exists
struct SymbolTableImpl {
    table: HashMap<Symbol, Arc<str>>,
    mappings: HashMap<String, Symbol>,
}

/// Process-wide name interner. The dispatch table only ever consumes
/// `Symbol` values; resolving them back to text is a diagnostics concern.
#[derive(Clone)]
pub struct SymbolTable(Arc<RwLock<SymbolTableImpl>>);

impl SymbolTableImpl {
    fn new() -> Self {
        Self {
            table: HashMap::new(),
            mappings: HashMap::new(),
        }
    }

    fn get_or_add(&mut self, value: &str) -> Symbol {
        if let Some(&id) = self.mappings.get(value) {
            return id;
        }
        use std::hash::Hasher;
        let mut hasher = ahash::AHasher::default();
        hasher.write(value.as_bytes());
        // 0 is reserved for Symbol::NIL
        let id = Symbol(hasher.finish().max(1));
        let owned = value.to_owned();
        let interned = Arc::<str>::from(value);
        self.mappings.insert(owned, id);
        self.table.insert(id, interned);
        id
    }

    fn get(&self, id: &Symbol) -> Option<Arc<str>> {
        self.table.get(id).cloned()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(SymbolTableImpl::new())))
    }

    pub fn intern(&self, value: &str) -> Symbol {
        self.0.write().get_or_add(value)
    }

    pub fn resolve(&self, id: &Symbol) -> Option<Arc<str>> {
        self.0.read().get(id)
    }
}
