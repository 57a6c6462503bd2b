//! Core types for the live version index
//!
//! This crate defines the value types shared by every layer:
//! - DocId: shared document identifier
//! - VersionEntry: live version record or tombstone, with its RAM cost
//! - VersionMapConfig: construction-time settings
//! - InvariantViolation: result of consistency checks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod entry;
pub mod error;
pub mod types;

pub use config::VersionMapConfig;
pub use entry::{
    entry_ram_bytes, VersionEntry, BYTES_PER_KEY, BYTES_PER_MAP_ENTRY, OBJECT_HEADER_BYTES,
};
pub use error::InvariantViolation;
pub use types::DocId;
