//! Version index configuration

use serde::{Deserialize, Serialize};

/// Construction-time settings for a live version index
///
/// # Examples
///
/// ```
/// use versionmap_core::VersionMapConfig;
///
/// let config = VersionMapConfig::default()
///     .with_initial_capacity(1024)
///     .with_safe_access_on_open(true);
/// assert_eq!(config.initial_capacity, 1024);
/// assert!(config.safe_access_on_open);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionMapConfig {
    /// Capacity hint for the first current generation
    ///
    /// Later generations are sized from the generation they replace.
    pub initial_capacity: usize,

    /// Start every fresh generation pair in safe access mode
    ///
    /// Applies on open and after `clear()`. Engines that apply operations
    /// out of sequence-number order from the start (recovery, replicas)
    /// set this so the fast path is never taken.
    pub safe_access_on_open: bool,
}

impl VersionMapConfig {
    /// Set the initial capacity hint
    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    /// Set whether fresh generation pairs start in safe access mode
    pub fn with_safe_access_on_open(mut self, safe_access_on_open: bool) -> Self {
        self.safe_access_on_open = safe_access_on_open;
        self
    }
}
