//! Storage layer for the live version index
//!
//! This crate implements the in-memory version structures:
//! - VersionLookup: RAM-accounted id -> version map
//! - GenerationPair: current/previous generations and refresh rotation
//! - TombstoneTable: delete records with best-effort pruning
//! - VersionArchive: retention of retired generations (NoopArchive, RetainingArchive)
//! - LiveVersionIndex: orchestration consumed by the storage engine

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod generation;
pub mod live;
pub mod lookup;
pub mod tombstones;

pub use archive::{NoopArchive, RetainingArchive, VersionArchive};
pub use generation::GenerationPair;
pub use live::{LiveVersionIndex, VersionMapStats};
pub use lookup::VersionLookup;
pub use tombstones::{PruneStats, TombstoneTable};
