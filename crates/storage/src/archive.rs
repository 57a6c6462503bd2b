//! Long-term holders for retired generations
//!
//! When a refresh completes, the generation it made durable is handed to a
//! [`VersionArchive`]. The archive decides how long that state stays
//! consultable. It is the last fallback of every lookup and contributes its
//! RAM figures and minimum delete time to the index.
//!
//! - [`NoopArchive`]: discards immediately. Indistinguishable from having no
//!   archive at all, and the default.
//! - [`RetainingArchive`]: keeps retired generations until the engine
//!   reports that every consumer of the durable layer has caught up.

use crate::lookup::VersionLookup;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use versionmap_core::{DocId, VersionEntry};

/// Receiver of retired generations
///
/// All methods have defaults matching an archive that keeps nothing.
pub trait VersionArchive: Send + Sync {
    /// Take ownership of the generation retired by a completed refresh
    fn after_refresh(&self, retired: Arc<VersionLookup>);

    /// Fallback lookup once generations and tombstones have no entry
    fn get(&self, _id: &DocId) -> Option<VersionEntry> {
        None
    }

    /// Check if any retained state saw a fast-path write
    fn is_unsafe(&self) -> bool {
        false
    }

    /// Smallest delete time still tracked, `i64::MAX` if none
    fn min_delete_timestamp(&self) -> i64 {
        i64::MAX
    }

    /// RAM held by retained state
    fn ram_bytes_used(&self) -> u64 {
        0
    }

    /// RAM that could be freed once consumers catch up
    fn reclaimable_ram_bytes(&self) -> u64 {
        0
    }

    /// RAM of retained state whose refresh is still propagating
    fn refreshing_ram_bytes(&self) -> u64 {
        0
    }

    /// Check if this archive discards everything it receives
    ///
    /// The index reports reclaimable and refreshing RAM from its own
    /// generations when this is true, and from the archive otherwise.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Archive that discards retired generations immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopArchive;

impl VersionArchive for NoopArchive {
    fn after_refresh(&self, _retired: Arc<VersionLookup>) {}

    fn is_noop(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct RetainedState {
    /// Generation that retirements are currently added to
    open_generation: u64,
    /// Retired lookups per generation, oldest first
    retained: BTreeMap<u64, Vec<Arc<VersionLookup>>>,
}

impl RetainedState {
    fn lookups(&self) -> impl DoubleEndedIterator<Item = &Arc<VersionLookup>> {
        self.retained.values().flatten()
    }
}

/// Archive that retains retired generations until released
///
/// Every retired lookup is kept as the shared handle the index retired,
/// including empty ones, so a write that raced with the refresh into the
/// retiring generation stays visible and its delete time stays tracked.
/// The engine seals the open generation when it publishes a new durable
/// point, and releases sealed generations once every consumer of that
/// point has refreshed.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use versionmap_core::{DocId, VersionEntry};
/// use versionmap_storage::{RetainingArchive, VersionArchive, VersionLookup};
///
/// let archive = RetainingArchive::new();
/// let retired = VersionLookup::new();
/// retired.put(DocId::from("doc1"), VersionEntry::live(1, 0, 1));
/// archive.after_refresh(Arc::new(retired));
///
/// let sealed = archive.seal_generation();
/// assert!(archive.get(&DocId::from("doc1")).is_some());
/// archive.release_through(sealed);
/// assert!(archive.get(&DocId::from("doc1")).is_none());
/// ```
#[derive(Debug, Default)]
pub struct RetainingArchive {
    state: RwLock<RetainedState>,
}

impl RetainingArchive {
    /// Create an empty archive with generation 0 open
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the open generation and return its number
    ///
    /// Later retirements go to the next generation.
    pub fn seal_generation(&self) -> u64 {
        let mut state = self.state.write();
        let sealed = state.open_generation;
        state.open_generation += 1;
        sealed
    }

    /// Drop every generation up to and including `generation`
    pub fn release_through(&self, generation: u64) {
        let mut state = self.state.write();
        state.retained.retain(|gen, _| *gen > generation);
    }

    /// Generation that retirements are currently added to
    pub fn open_generation(&self) -> u64 {
        self.state.read().open_generation
    }

    /// Number of generations holding retained state
    pub fn retained_generations(&self) -> usize {
        self.state.read().retained.len()
    }
}

impl VersionArchive for RetainingArchive {
    fn after_refresh(&self, retired: Arc<VersionLookup>) {
        let mut state = self.state.write();
        let open = state.open_generation;
        state.retained.entry(open).or_default().push(retired);
    }

    fn get(&self, id: &DocId) -> Option<VersionEntry> {
        self.state.read().lookups().rev().find_map(|l| l.get(id))
    }

    fn is_unsafe(&self) -> bool {
        self.state.read().lookups().any(|l| l.is_unsafe())
    }

    fn min_delete_timestamp(&self) -> i64 {
        self.state
            .read()
            .lookups()
            .map(|l| l.min_delete_timestamp())
            .min()
            .unwrap_or(i64::MAX)
    }

    fn ram_bytes_used(&self) -> u64 {
        self.state.read().lookups().map(|l| l.ram_bytes_used()).sum()
    }

    fn reclaimable_ram_bytes(&self) -> u64 {
        let state = self.state.read();
        state
            .retained
            .range(..state.open_generation)
            .flat_map(|(_, lookups)| lookups)
            .map(|l| l.ram_bytes_used())
            .sum()
    }

    fn refreshing_ram_bytes(&self) -> u64 {
        let state = self.state.read();
        state
            .retained
            .get(&state.open_generation)
            .map(|lookups| lookups.iter().map(|l| l.ram_bytes_used()).sum())
            .unwrap_or(0)
    }
}
