//! Convenient imports for versionmap.
//!
//! ```
//! use versionmap::prelude::*;
//!
//! let index = LiveVersionIndex::new();
//! assert_eq!(index.ram_bytes_used(), 0);
//! ```

// Main entry point
pub use crate::LiveVersionIndex;

// Values and ids
pub use crate::{DocId, VersionEntry};

// Configuration and archives
pub use crate::{NoopArchive, RetainingArchive, VersionArchive, VersionLookup, VersionMapConfig};

// Reporting
pub use crate::{InvariantViolation, PruneStats, VersionMapStats};
