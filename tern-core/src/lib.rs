//! # Tern Core
//!
//! Data-model leaves for the Tern query engine:
//! - [`Id`]: 64-bit tagged values with order-preserving encodings
//! - [`IdTable`] / [`ResultTable`]: column-major, budget-charged tables
//! - [`MemoryBudget`]: shared byte budget for all query allocations
//! - [`TripleIndex`]: the index interface the execution core consumes,
//!   with [`MemoryIndex`] as the in-memory reference implementation

pub mod alloc;
pub mod error;
pub mod id;
pub mod index;
pub mod local_vocab;
pub mod permutation;
pub mod table;

pub use alloc::{AllocError, MemoryBudget, MemoryCharge};
pub use error::{Error, Result};
pub use id::{Datatype, Id};
pub use index::{MemoryIndex, MemoryIndexBuilder, PatternId, TripleIndex};
pub use local_vocab::LocalVocab;
pub use permutation::Permutation;
pub use table::{IdTable, ResultTable};
