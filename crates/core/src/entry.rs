//! Version records and RAM accounting constants
//!
//! A [`VersionEntry`] is either the version state of a live document or a
//! delete marker (tombstone). Every structure holding entries charges the
//! same per-entry cost, computed by [`entry_ram_bytes`], so that RAM
//! counters can be compared and summed across structures.
//!
//! ## Cost Model
//!
//! ```text
//! entry_ram_bytes(id, entry) = BYTES_PER_KEY + id.len()
//!                            + BYTES_PER_MAP_ENTRY
//!                            + entry.ram_bytes_used()
//! ```

use crate::types::DocId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::mem::size_of;

/// Fixed overhead charged for every heap object
pub const OBJECT_HEADER_BYTES: u64 = 16;

/// Fixed cost of a key handle: the `DocId` itself plus the reference
/// counts in front of the shared byte allocation
pub const BYTES_PER_KEY: u64 = (size_of::<DocId>() + 2 * size_of::<usize>()) as u64;

/// Fixed cost of one slot in a concurrent map (hash, key and value slots)
pub const BYTES_PER_MAP_ENTRY: u64 = (size_of::<u64>() + 2 * size_of::<usize>()) as u64;

const LIVE_FIELD_BYTES: u64 = (size_of::<u64>() + 2 * size_of::<i64>()) as u64;
const TOMBSTONE_FIELD_BYTES: u64 = LIVE_FIELD_BYTES + size_of::<i64>() as u64;

/// Version state recorded for a document id
///
/// # Examples
///
/// ```
/// use versionmap_core::VersionEntry;
///
/// let live = VersionEntry::live(1, 0, 1);
/// let gone = VersionEntry::tombstone(2, 1, 1, 100);
/// assert!(!live.is_delete());
/// assert_eq!(gone.delete_time(), Some(100));
/// assert!(gone.ram_bytes_used() > live.ram_bytes_used());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionEntry {
    /// The document exists with this version state
    Live {
        /// Document version
        version: u64,
        /// Sequence number of the operation that produced it
        seq_no: i64,
        /// Primary term of that operation
        term: i64,
    },

    /// The document was deleted
    Tombstone {
        /// Version assigned by the delete
        version: u64,
        /// Sequence number of the delete
        seq_no: i64,
        /// Primary term of the delete
        term: i64,
        /// Time the delete was recorded, in milliseconds
        ///
        /// Only meaningful relative to other tombstones.
        delete_time: i64,
    },
}

impl VersionEntry {
    /// Create a live version record
    pub fn live(version: u64, seq_no: i64, term: i64) -> Self {
        VersionEntry::Live {
            version,
            seq_no,
            term,
        }
    }

    /// Create a tombstone with an explicit delete time
    pub fn tombstone(version: u64, seq_no: i64, term: i64, delete_time: i64) -> Self {
        VersionEntry::Tombstone {
            version,
            seq_no,
            term,
            delete_time,
        }
    }

    /// Create a tombstone stamped with the current wall clock (millis)
    pub fn tombstone_now(version: u64, seq_no: i64, term: i64) -> Self {
        Self::tombstone(version, seq_no, term, Utc::now().timestamp_millis())
    }

    /// Document version
    #[inline]
    pub fn version(&self) -> u64 {
        match self {
            VersionEntry::Live { version, .. } | VersionEntry::Tombstone { version, .. } => {
                *version
            }
        }
    }

    /// Sequence number of the operation that produced this entry
    #[inline]
    pub fn seq_no(&self) -> i64 {
        match self {
            VersionEntry::Live { seq_no, .. } | VersionEntry::Tombstone { seq_no, .. } => *seq_no,
        }
    }

    /// Primary term of the operation that produced this entry
    #[inline]
    pub fn term(&self) -> i64 {
        match self {
            VersionEntry::Live { term, .. } | VersionEntry::Tombstone { term, .. } => *term,
        }
    }

    /// Check if this entry records a delete
    #[inline]
    pub fn is_delete(&self) -> bool {
        matches!(self, VersionEntry::Tombstone { .. })
    }

    /// Delete time for tombstones, `None` for live entries
    #[inline]
    pub fn delete_time(&self) -> Option<i64> {
        match self {
            VersionEntry::Tombstone { delete_time, .. } => Some(*delete_time),
            VersionEntry::Live { .. } => None,
        }
    }

    /// Estimated heap footprint of the entry itself
    #[inline]
    pub fn ram_bytes_used(&self) -> u64 {
        match self {
            VersionEntry::Live { .. } => OBJECT_HEADER_BYTES + LIVE_FIELD_BYTES,
            VersionEntry::Tombstone { .. } => OBJECT_HEADER_BYTES + TOMBSTONE_FIELD_BYTES,
        }
    }
}

/// Full cost of storing `entry` under `id` in a map
#[inline]
pub fn entry_ram_bytes(id: &DocId, entry: &VersionEntry) -> u64 {
    BYTES_PER_KEY + id.len() as u64 + BYTES_PER_MAP_ENTRY + entry.ram_bytes_used()
}
