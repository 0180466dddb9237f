//! Error types for planning and execution.

use tern_core::AllocError;
use thiserror::Error;

/// Query planning and execution errors.
///
/// Every kind is propagated as a tagged value; operators surface the first
/// error from their children unchanged and the result cache never caches
/// errors.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Surfaced from the parser collaborator unchanged.
    #[error("parse error: {0}")]
    Parse(String),

    /// The planner cannot handle the query (e.g. more than 64 triple
    /// nodes after clique collapse).
    #[error("planning error: {0}")]
    Planning(String),

    /// An expression operand was not of the expected kind.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The shared allocator refused. Never cached.
    #[error(transparent)]
    AllocationLimitExceeded(#[from] AllocError),

    /// Deadline elapsed or the query was cancelled.
    #[error("query cancelled")]
    Cancelled,

    /// The index raised an I/O or lookup failure.
    #[error("index error: {0}")]
    Index(String),

    /// Explicit escape hatch for parser-produced constructs the planner
    /// does not yet handle.
    #[error("not yet implemented: {0}")]
    NotYetImplemented(String),

    /// Internal invariant violation (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tern_core::Error> for QueryError {
    fn from(e: tern_core::Error) -> Self {
        match e {
            tern_core::Error::Alloc(a) => QueryError::AllocationLimitExceeded(a),
            tern_core::Error::Index(msg) => QueryError::Index(msg),
        }
    }
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
