//! Invariant violation reporting
//!
//! Operations on the version index never fail. This type is only produced by
//! explicit consistency checks, which recompute state from scratch and
//! compare it with what the index tracks incrementally.

use thiserror::Error;

/// A broken structural invariant of the version index
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// A RAM counter drifted from the sum of its entries' costs
    #[error("ram accounting mismatch in {structure}: tracked {tracked} bytes, entries cost {actual} bytes")]
    RamAccountingMismatch {
        /// Which structure the counter belongs to
        structure: &'static str,
        /// Value of the incremental counter
        tracked: u64,
        /// Recomputed cost of the stored entries
        actual: u64,
    },

    /// An id is live in the current generation and tombstoned at the same time
    #[error("document {id} is live in the current generation and also tombstoned")]
    LiveAndTombstone {
        /// Offending document id
        id: String,
    },

    /// A generation map holds a delete record
    #[error("document {id} has a tombstone stored in a generation map")]
    TombstoneInGeneration {
        /// Offending document id
        id: String,
    },
}

/// Result of a consistency check
pub type Result<T> = std::result::Result<T, InvariantViolation>;
