//! # versionmap
//!
//! In-memory live version index for a document storage engine.
//!
//! The index answers two questions on the hot write/read path without
//! touching durable segments: what is the latest version state of a
//! document, and has it been deleted. It bridges the window between a write
//! and the refresh that makes the write searchable.
//!
//! ## Quick Start
//!
//! ```
//! use versionmap::prelude::*;
//!
//! let index = LiveVersionIndex::new();
//! let id = DocId::from("doc1");
//!
//! {
//!     let _lock = index.acquire_lock(&id);
//!     index.put_index_under_lock(&id, VersionEntry::live(1, 0, 1));
//! }
//!
//! // around every refresh
//! index.before_refresh();
//! index.after_refresh(true);
//!
//! // periodically
//! index.prune_tombstones(i64::MAX, i64::MAX);
//! ```
//!
//! ## Crates
//!
//! - [`versionmap_core`]: `DocId`, `VersionEntry`, config, invariant errors
//! - [`versionmap_concurrency`]: `KeyedMutex`
//! - [`versionmap_storage`]: lookups, generations, tombstones, archives, the index

#![warn(missing_docs)]

pub mod prelude;

pub use versionmap_concurrency::{KeyedGuard, KeyedMutex};
pub use versionmap_core::{
    entry_ram_bytes, DocId, InvariantViolation, VersionEntry, VersionMapConfig,
};
pub use versionmap_storage::{
    GenerationPair, LiveVersionIndex, NoopArchive, PruneStats, RetainingArchive,
    TombstoneTable, VersionArchive, VersionLookup, VersionMapStats,
};
