//! Error types for the core data model.

use crate::alloc::AllocError;
use thiserror::Error;

/// Core errors.
#[derive(Error, Debug)]
pub enum Error {
    /// The shared memory budget refused an allocation.
    #[error(transparent)]
    Alloc(#[from] AllocError),

    /// An index lookup or scan failed.
    #[error("index error: {0}")]
    Index(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
