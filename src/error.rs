//! Error types shared across the storage engine.

use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the record engine and the tree index.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An underlying file operation failed. Short reads and writes land
    /// here too; there is no partial-write recovery.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Counters or on-disk structure are inconsistent beyond repair.
    /// The table must be rebuilt from its contents.
    #[error("structural corruption: {0}")]
    Corruption(String),

    /// A stored link addressed a slot outside the physical file and no
    /// parent context was available to heal it in place.
    #[error("dangling handle {handle} addresses a non-existent slot")]
    DanglingHandle {
        /// Raw slot index that was out of range.
        handle: i32,
    },

    /// A repeated node was found while walking a linked structure. The
    /// offending links have been reset in place; the operation reports
    /// a degraded result instead of looping forever.
    #[error("cyclic structure repaired: {0}")]
    Cycle(String),

    /// A caller-supplied row or schema disagrees with the open file.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A diagnostic walk exceeded its time budget and aborted cleanly.
    #[error("time budget exceeded: {0}")]
    TimeBudget(String),

    /// A caller-supplied argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
