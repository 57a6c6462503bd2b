//! Live version index for one shard's write path
//!
//! Answers "what is the latest version state of document X" and "was X
//! deleted" without touching durable segments, for the window between a
//! write and the refresh that makes it searchable.
//!
//! # Structure
//!
//! - `KeyedMutex<DocId>`: per-document locks callers take before mutating
//! - `ArcSwap<GenerationPair>`: current/previous generations, swapped
//!   atomically around each refresh
//! - `TombstoneTable`: deletes, independent of refresh
//! - `VersionArchive`: optional retention of retired generations
//!
//! # Lookup Order
//!
//! ```text
//! current -> previous -> tombstones -> archive
//! ```
//!
//! Writers keep the earliest consulted structure most up to date, so the
//! first hit wins.
//!
//! # Thread Safety
//!
//! - `*_under_lock` operations require the caller to hold the id lock from
//!   `acquire_lock()`; checked with debug assertions only
//! - `get()` takes no lock and reads whichever pair is published
//! - `clear()` excludes every other operation except `get()`

use crate::archive::{NoopArchive, VersionArchive};
use crate::generation::GenerationPair;
use crate::tombstones::{PruneStats, TombstoneTable};
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};
use versionmap_concurrency::{KeyedGuard, KeyedMutex};
use versionmap_core::{DocId, InvariantViolation, VersionEntry, VersionMapConfig};

/// Point-in-time figures of a live version index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionMapStats {
    /// Ids in the current generation
    pub current_entries: usize,
    /// Ids in the previous generation
    pub previous_entries: usize,
    /// Tombstones held
    pub tombstones: usize,
    /// Total tracked RAM, archive included
    pub ram_bytes_used: u64,
    /// RAM held by tombstones
    pub tombstone_ram_bytes: u64,
    /// RAM held by the archive
    pub archive_ram_bytes: u64,
    /// RAM used by refresh: both generations plus the archive
    pub ram_bytes_for_refresh: u64,
    /// RAM refreshing could reclaim
    pub reclaimable_refresh_bytes: u64,
    /// RAM being freed by an in-flight refresh
    pub refreshing_bytes: u64,
    /// Whether writes must take the fully indexed path
    pub safe_access_mode: bool,
    /// Whether any fast-path write is still tracked
    pub is_unsafe: bool,
}

/// Per-document version and tombstone index
///
/// # Example
///
/// ```
/// use versionmap_core::{DocId, VersionEntry};
/// use versionmap_storage::LiveVersionIndex;
///
/// let index = LiveVersionIndex::new();
/// let id = DocId::from("doc1");
/// {
///     let _lock = index.acquire_lock(&id);
///     index.put_index_under_lock(&id, VersionEntry::live(1, 0, 1));
///     assert_eq!(index.get_under_lock(&id).unwrap().version(), 1);
/// }
/// index.before_refresh();
/// index.after_refresh(true);
/// assert!(index.get(&id).is_none());
/// ```
pub struct LiveVersionIndex {
    locks: KeyedMutex<DocId>,
    pair: ArcSwap<GenerationPair>,
    tombstones: TombstoneTable,
    archive: Arc<dyn VersionArchive>,
    config: VersionMapConfig,
    /// Shared by mutating operations, exclusive for `clear()`
    structure: RwLock<()>,
    /// Receives fast-path writes so consistency checks can still see them
    #[cfg(any(debug_assertions, feature = "assertion-map"))]
    assertion_pair: ArcSwap<GenerationPair>,
}

impl LiveVersionIndex {
    /// Create an index with default settings and no archive
    pub fn new() -> Self {
        Self::with_config(VersionMapConfig::default(), Arc::new(NoopArchive))
    }

    /// Create an index that retires generations into `archive`
    pub fn with_archive(archive: Arc<dyn VersionArchive>) -> Self {
        Self::with_config(VersionMapConfig::default(), archive)
    }

    /// Create an index from `config` and `archive`
    pub fn with_config(config: VersionMapConfig, archive: Arc<dyn VersionArchive>) -> Self {
        let pair = GenerationPair::new(config.initial_capacity, config.safe_access_on_open);
        LiveVersionIndex {
            locks: KeyedMutex::new(),
            pair: ArcSwap::from_pointee(pair),
            tombstones: TombstoneTable::new(),
            archive,
            config,
            structure: RwLock::new(()),
            #[cfg(any(debug_assertions, feature = "assertion-map"))]
            assertion_pair: ArcSwap::from_pointee(GenerationPair::new(0, false)),
        }
    }

    /// Settings this index was built with
    pub fn config(&self) -> &VersionMapConfig {
        &self.config
    }

    // ========================================================================
    // Locking
    // ========================================================================

    /// Lock `id` for the lifetime of the returned guard
    pub fn acquire_lock(&self, id: &DocId) -> KeyedGuard<'_, DocId> {
        self.locks.acquire(id.clone())
    }

    /// Lock `id` only if it is free
    pub fn try_acquire_lock(&self, id: &DocId) -> Option<KeyedGuard<'_, DocId>> {
        self.locks.try_acquire(id.clone())
    }

    /// Check if the calling thread holds the lock for `id`
    pub fn is_lock_held_by_current_thread(&self, id: &DocId) -> bool {
        self.locks.is_held_by_current_thread(id)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Latest known entry for `id`, without taking any lock
    ///
    /// May miss a write racing with this call; the durable segments remain
    /// the authority for such reads.
    pub fn get(&self, id: &DocId) -> Option<VersionEntry> {
        let pair = self.pair.load();
        self.lookup(&pair, id)
    }

    /// Latest known entry for `id`
    ///
    /// Caller must hold the id lock.
    pub fn get_under_lock(&self, id: &DocId) -> Option<VersionEntry> {
        debug_assert!(self.locks.is_held_by_current_thread(id), "lock for {id} not held");
        let _structure = self.structure.read();
        let pair = self.pair.load();
        if let Some(entry) = pair.current().get(id) {
            debug_assert!(
                !self.tombstones.contains(id),
                "{id} is live in the current generation and also tombstoned"
            );
            return Some(entry);
        }
        self.lookup(&pair, id)
    }

    /// Like `get_under_lock`, falling back to fast-path writes
    #[cfg(any(debug_assertions, feature = "assertion-map"))]
    pub fn version_for_assert(&self, id: &DocId) -> Option<VersionEntry> {
        self.get_under_lock(id)
            .or_else(|| self.assertion_pair.load().get(id))
    }

    fn lookup(&self, pair: &GenerationPair, id: &DocId) -> Option<VersionEntry> {
        pair.get(id)
            .or_else(|| self.tombstones.get(id))
            .or_else(|| self.archive.get(id))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Record an index operation, skipping the generation maps when safe
    /// access is not required
    ///
    /// The fast path only clears a superseded tombstone and marks the
    /// current generation unsafe. Caller must hold the id lock.
    pub fn maybe_put_index_under_lock(&self, id: &DocId, entry: VersionEntry) {
        debug_assert!(self.locks.is_held_by_current_thread(id), "lock for {id} not held");
        debug_assert!(!entry.is_delete(), "index operation recorded as {entry:?}");
        let _structure = self.structure.read();
        let pair = self.pair.load();
        if pair.is_safe_access_mode() {
            self.put_index(&pair, id, entry);
        } else {
            self.tombstones.remove(id);
            pair.current().mark_unsafe();
            #[cfg(any(debug_assertions, feature = "assertion-map"))]
            self.assertion_pair.load().put(id.clone(), entry);
        }
    }

    /// Record an index operation in the current generation
    ///
    /// Caller must hold the id lock.
    pub fn put_index_under_lock(&self, id: &DocId, entry: VersionEntry) {
        debug_assert!(self.locks.is_held_by_current_thread(id), "lock for {id} not held");
        let _structure = self.structure.read();
        let pair = self.pair.load();
        self.put_index(&pair, id, entry);
    }

    fn put_index(&self, pair: &GenerationPair, id: &DocId, entry: VersionEntry) {
        debug_assert!(!entry.is_delete(), "index operation recorded as {entry:?}");
        pair.put(id.clone(), entry);
        self.tombstones.remove(id);
    }

    /// Record a delete
    ///
    /// The tombstone goes to the tombstone table and the id leaves both
    /// generations, so the delete is visible whichever generation a reader
    /// consults. Caller must hold the id lock.
    pub fn put_delete_under_lock(&self, id: &DocId, tombstone: VersionEntry) {
        debug_assert!(self.locks.is_held_by_current_thread(id), "lock for {id} not held");
        debug_assert!(tombstone.is_delete(), "delete recorded as {tombstone:?}");
        let _structure = self.structure.read();
        self.tombstones.put(id.clone(), tombstone);
        self.pair.load().remove_with_tombstone(id, &tombstone);
    }

    /// Drop the tombstone for `id`, if any
    ///
    /// Caller must hold the id lock.
    pub fn remove_tombstone_under_lock(&self, id: &DocId) {
        debug_assert!(self.locks.is_held_by_current_thread(id), "lock for {id} not held");
        let _structure = self.structure.read();
        self.tombstones.remove(id);
    }

    // ========================================================================
    // Safe access
    // ========================================================================

    /// Require the fully indexed write path from now on
    ///
    /// The latch stays set until rotations stop inheriting it.
    pub fn enforce_safe_access(&self) {
        let _structure = self.structure.read();
        if self.pair.load().enforce_safe_access() {
            debug!("version index switched to safe access mode");
        }
    }

    /// Check if writes must take the fully indexed path
    pub fn is_safe_access_required(&self) -> bool {
        self.pair.load().is_safe_access_mode()
    }

    /// Check if any tracked generation, or the archive, saw a fast-path write
    pub fn is_unsafe(&self) -> bool {
        self.pair.load().is_unsafe() || self.archive.is_unsafe()
    }

    // ========================================================================
    // Refresh lifecycle
    // ========================================================================

    /// Rotate generations at the start of a refresh
    ///
    /// Must not run concurrently with another refresh cycle.
    pub fn before_refresh(&self) {
        let _structure = self.structure.read();
        let outgoing = self.pair.load_full();
        let rotated = outgoing.rotate();
        debug!(
            retiring_entries = outgoing.current().len(),
            retiring_bytes = outgoing.current_ram_bytes(),
            safe_access = rotated.is_safe_access_mode(),
            "version index rotating generations"
        );
        self.pair.store(Arc::new(rotated));
        #[cfg(any(debug_assertions, feature = "assertion-map"))]
        self.assertion_pair
            .store(Arc::new(self.assertion_pair.load().rotate()));
    }

    /// Retire the previous generation once a refresh completed
    pub fn after_refresh(&self, did_refresh: bool) {
        let _structure = self.structure.read();
        let outgoing = self.pair.load_full();
        debug!(
            did_refresh,
            archived_entries = outgoing.previous().map_or(0, |p| p.len()),
            archived_bytes = outgoing.previous_ram_bytes(),
            "version index retiring previous generation"
        );
        self.pair.store(Arc::new(outgoing.retire(self.archive.as_ref())));
        #[cfg(any(debug_assertions, feature = "assertion-map"))]
        self.assertion_pair
            .store(Arc::new(self.assertion_pair.load().retire(&NoopArchive)));
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Remove tombstones deleted before `max_timestamp` with a sequence
    /// number at most `max_seq_no`
    ///
    /// Tombstones at or after the minimum delete time still tracked by a
    /// generation or the archive are kept. Best effort: ids locked by other
    /// threads are skipped.
    pub fn prune_tombstones(&self, max_timestamp: i64, max_seq_no: i64) -> PruneStats {
        let _structure = self.structure.read();
        let stats = self
            .tombstones
            .prune(max_timestamp, max_seq_no, &self.locks, |_, tombstone| {
                let tracked = self
                    .pair
                    .load()
                    .min_delete_timestamp()
                    .min(self.archive.min_delete_timestamp());
                tombstone.delete_time().map_or(true, |time| time >= tracked)
            });
        trace!(
            max_timestamp,
            max_seq_no,
            candidates = stats.candidates,
            pruned = stats.pruned,
            contended = stats.contended,
            "pruned tombstones"
        );
        stats
    }

    /// Drop all generations and tombstones
    ///
    /// Used when the owning engine closes or resets. Waits for in-flight
    /// operations and blocks new ones until done.
    pub fn clear(&self) {
        let _structure = self.structure.write();
        let dropped_tombstones = self.tombstones.len();
        self.pair.store(Arc::new(GenerationPair::new(
            self.config.initial_capacity,
            self.config.safe_access_on_open,
        )));
        self.tombstones.clear();
        #[cfg(any(debug_assertions, feature = "assertion-map"))]
        self.assertion_pair
            .store(Arc::new(GenerationPair::new(0, false)));
        debug!(dropped_tombstones, "version index cleared");
    }

    // ========================================================================
    // RAM accounting
    // ========================================================================

    /// Total tracked RAM: generations, tombstones and archive
    pub fn ram_bytes_used(&self) -> u64 {
        self.ram_bytes_used_in(&self.pair.load())
    }

    /// RAM used by refresh: both generations plus the archive
    pub fn ram_bytes_for_refresh(&self) -> u64 {
        self.ram_bytes_for_refresh_in(&self.pair.load())
    }

    /// RAM that refreshing could reclaim
    ///
    /// Without an archive this is the current generation only: tombstones
    /// outlive refresh and the previous generation is already being
    /// reclaimed. With an archive both generations count, plus whatever the
    /// archive could release once its consumers catch up.
    pub fn reclaimable_refresh_bytes(&self) -> u64 {
        self.reclaimable_refresh_bytes_in(&self.pair.load())
    }

    /// RAM currently being freed by an in-flight refresh
    ///
    /// The previous generation without an archive, the archive's
    /// still-propagating state otherwise.
    pub fn refreshing_bytes(&self) -> u64 {
        self.refreshing_bytes_in(&self.pair.load())
    }

    /// RAM held by the archive
    pub fn ram_bytes_used_for_archive(&self) -> u64 {
        self.archive.ram_bytes_used()
    }

    /// RAM held by tombstones
    pub fn tombstone_ram_bytes(&self) -> u64 {
        self.tombstones.ram_bytes_used()
    }

    fn ram_bytes_used_in(&self, pair: &GenerationPair) -> u64 {
        pair.ram_bytes_used() + self.tombstones.ram_bytes_used() + self.archive.ram_bytes_used()
    }

    fn ram_bytes_for_refresh_in(&self, pair: &GenerationPair) -> u64 {
        pair.ram_bytes_used() + self.archive.ram_bytes_used()
    }

    fn reclaimable_refresh_bytes_in(&self, pair: &GenerationPair) -> u64 {
        if self.archive.is_noop() {
            pair.current_ram_bytes()
        } else {
            pair.ram_bytes_used() + self.archive.reclaimable_ram_bytes()
        }
    }

    fn refreshing_bytes_in(&self, pair: &GenerationPair) -> u64 {
        if self.archive.is_noop() {
            pair.previous_ram_bytes()
        } else {
            self.archive.refreshing_ram_bytes()
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Copy of the current generation
    pub fn all_current(&self) -> HashMap<DocId, VersionEntry> {
        self.pair.load().current().entries().into_iter().collect()
    }

    /// Copy of all tombstones
    pub fn all_tombstones(&self) -> HashMap<DocId, VersionEntry> {
        self.tombstones.entries().into_iter().collect()
    }

    /// Number of tombstones
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Archive receiving retired generations
    pub fn archive(&self) -> &Arc<dyn VersionArchive> {
        &self.archive
    }

    /// Point-in-time figures, all taken from one generation pair
    pub fn stats(&self) -> VersionMapStats {
        let pair = self.pair.load();
        VersionMapStats {
            current_entries: pair.current().len(),
            previous_entries: pair.previous().map_or(0, |p| p.len()),
            tombstones: self.tombstones.len(),
            ram_bytes_used: self.ram_bytes_used_in(&pair),
            tombstone_ram_bytes: self.tombstones.ram_bytes_used(),
            archive_ram_bytes: self.archive.ram_bytes_used(),
            ram_bytes_for_refresh: self.ram_bytes_for_refresh_in(&pair),
            reclaimable_refresh_bytes: self.reclaimable_refresh_bytes_in(&pair),
            refreshing_bytes: self.refreshing_bytes_in(&pair),
            safe_access_mode: pair.is_safe_access_mode(),
            is_unsafe: pair.is_unsafe() || self.archive.is_unsafe(),
        }
    }

    /// Recompute all accounting from the stored entries and check the
    /// structural invariants
    ///
    /// Writers must be quiescent while this runs.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let _structure = self.structure.write();
        let pair = self.pair.load();

        let mut generations = vec![("current generation", pair.current())];
        if let Some(previous) = pair.previous() {
            generations.push(("previous generation", previous));
        }
        for (structure, lookup) in generations {
            let (tracked, actual) = (lookup.ram_bytes_used(), lookup.computed_ram_bytes());
            if tracked != actual {
                return Err(InvariantViolation::RamAccountingMismatch {
                    structure,
                    tracked,
                    actual,
                });
            }
            if let Some((id, _)) = lookup.entries().into_iter().find(|(_, e)| e.is_delete()) {
                return Err(InvariantViolation::TombstoneInGeneration { id: id.to_string() });
            }
        }

        let (tracked, actual) = (
            self.tombstones.ram_bytes_used(),
            self.tombstones.computed_ram_bytes(),
        );
        if tracked != actual {
            return Err(InvariantViolation::RamAccountingMismatch {
                structure: "tombstones",
                tracked,
                actual,
            });
        }

        for (id, _) in pair.current().entries() {
            if self.tombstones.contains(&id) {
                return Err(InvariantViolation::LiveAndTombstone { id: id.to_string() });
            }
        }
        Ok(())
    }
}

impl Default for LiveVersionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LiveVersionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveVersionIndex")
            .field("stats", &self.stats())
            .field("locked_ids", &self.locks.len())
            .finish()
    }
}
