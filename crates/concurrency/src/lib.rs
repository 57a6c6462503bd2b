//! Concurrency primitives for the live version index
//!
//! This crate implements per-document locking:
//! - KeyedMutex: registry of per-key locks created on demand and reclaimed
//!   when the last holder or waiter leaves
//! - KeyedGuard: scoped lock ownership, released on drop

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod keyed_mutex;

pub use keyed_mutex::{KeyedGuard, KeyedMutex};
