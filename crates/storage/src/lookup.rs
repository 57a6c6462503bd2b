//! RAM-accounted id -> version map
//!
//! VersionLookup is the leaf structure of the version index. Every other
//! structure is built from one or more lookups.
//!
//! # Design
//!
//! - DashMap with FxHash: sharded writes, concurrent reads
//! - AtomicU64 RAM counter: adjusted by one signed delta per mutation
//! - AtomicI64 running minimum of recorded delete times
//! - AtomicBool "unsafe" marker set by fast-path writes
//!
//! Mutations require the caller to hold the per-id lock. The counter stays
//! exact because the entry a mutation replaces was accounted by an earlier
//! mutation of the same id, ordered before it by that lock.

use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use versionmap_core::{entry_ram_bytes, DocId, VersionEntry};

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Concurrent map from document id to its version entry
pub struct VersionLookup {
    map: DashMap<DocId, VersionEntry, FxBuildHasher>,
    ram_bytes_used: AtomicU64,
    /// `i64::MAX` until the first delete is recorded
    min_delete_timestamp: AtomicI64,
    is_unsafe: AtomicBool,
}

impl VersionLookup {
    /// Create an empty lookup
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a lookup pre-sized for `capacity` ids
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: DashMap::with_capacity_and_hasher(capacity, FxBuildHasher::default()),
            ram_bytes_used: AtomicU64::new(0),
            min_delete_timestamp: AtomicI64::new(i64::MAX),
            is_unsafe: AtomicBool::new(false),
        }
    }

    /// Get the entry for `id`
    ///
    /// Does not require the id lock.
    #[inline]
    pub fn get(&self, id: &DocId) -> Option<VersionEntry> {
        self.map.get(id).map(|entry| *entry.value())
    }

    /// Insert or replace the entry for `id`, returning the previous one
    ///
    /// Caller must hold the id lock.
    pub fn put(&self, id: DocId, entry: VersionEntry) -> Option<VersionEntry> {
        let added = entry_ram_bytes(&id, &entry);
        let previous = self.map.insert(id.clone(), entry);
        let removed = previous
            .as_ref()
            .map(|prev| entry_ram_bytes(&id, prev))
            .unwrap_or(0);
        self.adjust_ram(added, removed);
        previous
    }

    /// Remove the entry for `id`
    ///
    /// Caller must hold the id lock.
    pub fn remove(&self, id: &DocId) -> Option<VersionEntry> {
        let (key, removed) = self.map.remove(id)?;
        self.adjust_ram(0, entry_ram_bytes(&key, &removed));
        Some(removed)
    }

    /// Absorb every entry of `other`
    ///
    /// Entries of `other` win over entries already present. A replaced
    /// entry's cost is subtracted once, so merging never double counts.
    pub fn merge(&self, other: &VersionLookup) {
        if std::ptr::eq(self, other) {
            return;
        }
        let mut added = 0;
        let mut removed = 0;
        for item in other.map.iter() {
            let (id, entry) = item.pair();
            added += entry_ram_bytes(id, entry);
            if let Some(prev) = self.map.insert(id.clone(), *entry) {
                removed += entry_ram_bytes(id, &prev);
            }
        }
        self.adjust_ram(added, removed);
        self.update_min_delete_timestamp(other.min_delete_timestamp());
        if other.is_unsafe() {
            self.mark_unsafe();
        }
    }

    /// Record that a fast-path write bypassed this lookup
    pub fn mark_unsafe(&self) {
        self.is_unsafe.store(true, Ordering::Release);
    }

    /// Check if a fast-path write was recorded
    pub fn is_unsafe(&self) -> bool {
        self.is_unsafe.load(Ordering::Acquire)
    }

    /// Lower the running minimum delete time to `delete_time` if smaller
    pub fn update_min_delete_timestamp(&self, delete_time: i64) {
        self.min_delete_timestamp
            .fetch_min(delete_time, Ordering::AcqRel);
    }

    /// Smallest delete time ever recorded, `i64::MAX` if none
    pub fn min_delete_timestamp(&self) -> i64 {
        self.min_delete_timestamp.load(Ordering::Acquire)
    }

    /// Tracked RAM usage of all entries
    pub fn ram_bytes_used(&self) -> u64 {
        self.ram_bytes_used.load(Ordering::Acquire)
    }

    /// Number of ids stored
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if no id is stored
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Copy of all entries
    pub fn entries(&self) -> Vec<(DocId, VersionEntry)> {
        self.map
            .iter()
            .map(|item| (item.key().clone(), *item.value()))
            .collect()
    }

    /// Recompute the RAM cost of the stored entries from scratch
    pub fn computed_ram_bytes(&self) -> u64 {
        self.map
            .iter()
            .map(|item| entry_ram_bytes(item.key(), item.value()))
            .sum()
    }

    fn adjust_ram(&self, added: u64, removed: u64) {
        if added >= removed {
            self.ram_bytes_used
                .fetch_add(added - removed, Ordering::AcqRel);
        } else {
            let delta = removed - added;
            let before = self.ram_bytes_used.fetch_sub(delta, Ordering::AcqRel);
            debug_assert!(before >= delta, "ram counter underflow: {before} - {delta}");
        }
    }
}

impl Default for VersionLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VersionLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionLookup")
            .field("len", &self.len())
            .field("ram_bytes_used", &self.ram_bytes_used())
            .field("min_delete_timestamp", &self.min_delete_timestamp())
            .field("is_unsafe", &self.is_unsafe())
            .finish()
    }
}
