mod blob;
mod cursor;
mod index;
mod interning;
mod record;
mod table;

pub use blob::{Blob, GenerationEntry};
pub use cursor::{CodeCursor, GenerationId, NUM_GENERATIONS};
pub use index::IndexTable;
pub use interning::{Symbol, SymbolTable};
pub use record::{BifId, CodeAddr, DispatchRecord, FunctionKey, Trampoline};
pub use table::{DispatchTable, DispatchTableCreateInfo};
