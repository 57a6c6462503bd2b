//! Current/previous generation pair and its refresh rotation
//!
//! ## Rotation Protocol
//!
//! ```text
//! (C, P?)  --rotate()-->  (fresh, C)        before a refresh starts
//! (C, P)   --retire()-->  (C, none)         after it completes, P goes to the archive
//! ```
//!
//! A pair is immutable apart from its lookups' contents and the safe access
//! latch. Rotation builds a new pair, and the owner publishes it with a
//! single atomic swap, so readers see either the old pair or the new one.
//!
//! ## Safe Access Inheritance
//!
//! A rotated pair stays in safe access mode when the outgoing pair had the
//! latch set explicitly, or when the outgoing pair was only in safe access
//! mode by inheritance and its current generation saw no operation at all.

use crate::archive::VersionArchive;
use crate::lookup::VersionLookup;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use versionmap_core::{DocId, VersionEntry};

/// The live generation plus the one retiring through an in-flight refresh
#[derive(Debug)]
pub struct GenerationPair {
    current: Arc<VersionLookup>,
    previous: Option<Arc<VersionLookup>>,
    needs_safe_access: AtomicBool,
    previous_needed_safe_access: bool,
}

impl GenerationPair {
    /// Create a pair with an empty current generation and no previous one
    pub fn new(capacity: usize, needs_safe_access: bool) -> Self {
        GenerationPair {
            current: Arc::new(VersionLookup::with_capacity(capacity)),
            previous: None,
            needs_safe_access: AtomicBool::new(needs_safe_access),
            previous_needed_safe_access: false,
        }
    }

    /// Generation receiving writes
    pub fn current(&self) -> &Arc<VersionLookup> {
        &self.current
    }

    /// Generation retiring through an in-flight refresh, if any
    pub fn previous(&self) -> Option<&Arc<VersionLookup>> {
        self.previous.as_ref()
    }

    /// Build the pair for the start of a refresh
    ///
    /// The new current generation is sized after the one it replaces.
    pub fn rotate(&self) -> GenerationPair {
        GenerationPair {
            current: Arc::new(VersionLookup::with_capacity(self.current.len())),
            previous: Some(Arc::clone(&self.current)),
            needs_safe_access: AtomicBool::new(false),
            previous_needed_safe_access: self.should_inherit_safe_access(),
        }
    }

    /// Hand the previous generation to `archive` and build the pair
    /// without it
    pub fn retire(&self, archive: &dyn VersionArchive) -> GenerationPair {
        if let Some(previous) = &self.previous {
            archive.after_refresh(Arc::clone(previous));
        }
        GenerationPair {
            current: Arc::clone(&self.current),
            previous: None,
            needs_safe_access: AtomicBool::new(self.needs_safe_access()),
            previous_needed_safe_access: self.previous_needed_safe_access,
        }
    }

    /// Lookup in current, then previous
    #[inline]
    pub fn get(&self, id: &DocId) -> Option<VersionEntry> {
        self.current
            .get(id)
            .or_else(|| self.previous.as_ref().and_then(|p| p.get(id)))
    }

    /// Write `entry` into the current generation
    #[inline]
    pub fn put(&self, id: DocId, entry: VersionEntry) -> Option<VersionEntry> {
        self.current.put(id, entry)
    }

    /// Drop `id` from both generations because of `tombstone`
    ///
    /// The delete time is tracked by the current generation so tombstones it
    /// covers are not pruned while this pair is live.
    pub fn remove_with_tombstone(&self, id: &DocId, tombstone: &VersionEntry) {
        self.current.remove(id);
        if let Some(delete_time) = tombstone.delete_time() {
            self.current.update_min_delete_timestamp(delete_time);
        }
        if let Some(previous) = &self.previous {
            // a stale live entry in the retiring generation must not resurface
            previous.remove(id);
        }
    }

    /// Set the safe access latch, returning true if it was not set before
    pub fn enforce_safe_access(&self) -> bool {
        !self.needs_safe_access.swap(true, Ordering::AcqRel)
    }

    /// Check if the safe access latch is set on this pair
    pub fn needs_safe_access(&self) -> bool {
        self.needs_safe_access.load(Ordering::Acquire)
    }

    /// Check if the pair this one was rotated from required safe access
    pub fn previous_needed_safe_access(&self) -> bool {
        self.previous_needed_safe_access
    }

    /// Check if writes must take the fully indexed path
    pub fn is_safe_access_mode(&self) -> bool {
        self.needs_safe_access() || self.previous_needed_safe_access
    }

    /// Check if the next rotated pair must stay in safe access mode
    pub fn should_inherit_safe_access(&self) -> bool {
        let no_operations_yet = self.current.is_empty() && !self.current.is_unsafe();
        self.needs_safe_access() || (no_operations_yet && self.previous_needed_safe_access)
    }

    /// Check if either generation saw a fast-path write
    pub fn is_unsafe(&self) -> bool {
        self.current.is_unsafe() || self.previous.as_ref().map_or(false, |p| p.is_unsafe())
    }

    /// Smallest delete time tracked by either generation
    pub fn min_delete_timestamp(&self) -> i64 {
        let previous = self
            .previous
            .as_ref()
            .map_or(i64::MAX, |p| p.min_delete_timestamp());
        self.current.min_delete_timestamp().min(previous)
    }

    /// RAM of the current generation
    pub fn current_ram_bytes(&self) -> u64 {
        self.current.ram_bytes_used()
    }

    /// RAM of the previous generation
    pub fn previous_ram_bytes(&self) -> u64 {
        self.previous.as_ref().map_or(0, |p| p.ram_bytes_used())
    }

    /// RAM of both generations
    pub fn ram_bytes_used(&self) -> u64 {
        self.current_ram_bytes() + self.previous_ram_bytes()
    }
}
