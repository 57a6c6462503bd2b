//! Refresh-independent delete records
//!
//! Tombstones outlive generation rotation: a delete stays here until a newer
//! operation on the same id supersedes it or pruning collects it.
//!
//! ## Pruning
//!
//! A tombstone is eligible when
//!
//! ```text
//! delete_time < max_timestamp  &&  seq_no <= max_seq_no  &&  !is_excluded(id, tombstone)
//! ```
//!
//! Pruning never blocks on an id lock. Eligible ids are locked with
//! `try_acquire`; contended ids are skipped for this pass, the others are
//! re-checked under the lock before removal.

use dashmap::DashMap;
use rustc_hash::FxHasher;
use serde::Serialize;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU64, Ordering};
use versionmap_concurrency::KeyedMutex;
use versionmap_core::{entry_ram_bytes, DocId, VersionEntry};

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Outcome of one pruning pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    /// Tombstones that passed the eligibility check before locking
    pub candidates: usize,
    /// Tombstones removed
    pub pruned: usize,
    /// Candidates skipped because their id lock was held
    pub contended: usize,
}

/// Map from id to its latest tombstone, with its own RAM counter
#[derive(Debug)]
pub struct TombstoneTable {
    map: DashMap<DocId, VersionEntry, FxBuildHasher>,
    ram_bytes_used: AtomicU64,
}

impl TombstoneTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            map: DashMap::with_hasher(FxBuildHasher::default()),
            ram_bytes_used: AtomicU64::new(0),
        }
    }

    /// Get the tombstone for `id`
    #[inline]
    pub fn get(&self, id: &DocId) -> Option<VersionEntry> {
        self.map.get(id).map(|entry| *entry.value())
    }

    /// Record `tombstone` for `id`, replacing any older one
    ///
    /// Caller must hold the id lock.
    pub fn put(&self, id: DocId, tombstone: VersionEntry) -> Option<VersionEntry> {
        debug_assert!(tombstone.is_delete(), "tombstone table only holds deletes");
        let added = entry_ram_bytes(&id, &tombstone);
        let previous = self.map.insert(id.clone(), tombstone);
        let removed = previous
            .as_ref()
            .map(|prev| entry_ram_bytes(&id, prev))
            .unwrap_or(0);
        self.adjust_ram(added, removed);
        previous
    }

    /// Remove the tombstone for `id`
    ///
    /// Caller must hold the id lock.
    pub fn remove(&self, id: &DocId) -> Option<VersionEntry> {
        let (key, removed) = self.map.remove(id)?;
        self.adjust_ram(0, entry_ram_bytes(&key, &removed));
        Some(removed)
    }

    /// Remove tombstones older than `max_timestamp` with a sequence number
    /// at most `max_seq_no`, unless `is_excluded` keeps them
    ///
    /// `is_excluded` is evaluated once before locking and again under the
    /// id lock, so it should read live state on every call.
    pub fn prune<F>(
        &self,
        max_timestamp: i64,
        max_seq_no: i64,
        locks: &KeyedMutex<DocId>,
        is_excluded: F,
    ) -> PruneStats
    where
        F: Fn(&DocId, &VersionEntry) -> bool,
    {
        let can_remove = |id: &DocId, tombstone: &VersionEntry| {
            let too_old = tombstone
                .delete_time()
                .map_or(false, |time| time < max_timestamp);
            too_old && tombstone.seq_no() <= max_seq_no && !is_excluded(id, tombstone)
        };

        // Collect first: removing while iterating would deadlock on the shard.
        let candidates: Vec<DocId> = self
            .map
            .iter()
            .filter(|item| can_remove(item.key(), item.value()))
            .map(|item| item.key().clone())
            .collect();

        let mut stats = PruneStats {
            candidates: candidates.len(),
            ..PruneStats::default()
        };
        for id in candidates {
            let Some(_guard) = locks.try_acquire(id.clone()) else {
                stats.contended += 1;
                continue;
            };
            // The id may have been indexed or deleted again since the scan.
            if let Some(tombstone) = self.get(&id) {
                if can_remove(&id, &tombstone) {
                    self.remove(&id);
                    stats.pruned += 1;
                }
            }
        }
        stats
    }

    /// Drop every tombstone
    ///
    /// Only valid while no writer can touch the table.
    pub fn clear(&self) {
        self.map.clear();
        self.ram_bytes_used.store(0, Ordering::Release);
    }

    /// Tracked RAM usage of all tombstones
    pub fn ram_bytes_used(&self) -> u64 {
        self.ram_bytes_used.load(Ordering::Acquire)
    }

    /// Recompute the RAM cost of the stored tombstones from scratch
    pub fn computed_ram_bytes(&self) -> u64 {
        self.map
            .iter()
            .map(|item| entry_ram_bytes(item.key(), item.value()))
            .sum()
    }

    /// Number of tombstones
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Check if `id` has a tombstone
    pub fn contains(&self, id: &DocId) -> bool {
        self.map.contains_key(id)
    }

    /// Copy of all tombstones
    pub fn entries(&self) -> Vec<(DocId, VersionEntry)> {
        self.map
            .iter()
            .map(|item| (item.key().clone(), *item.value()))
            .collect()
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

impl Default for TombstoneTable {
    fn default() -> Self {
        Self::new()
    }
}
