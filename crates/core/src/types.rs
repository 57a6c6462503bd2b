//! Core identifier types for the version index
//!
//! - [`DocId`]: Cheaply clonable document identifier used as the map key
//!   in every version structure

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Identifier of a single document
///
/// DocId is an immutable byte string shared by reference count, so the same
/// id can sit in a generation, the tombstone table and the keyed lock
/// registry without copying the bytes.
///
/// # Examples
///
/// ```
/// use versionmap_core::types::DocId;
///
/// let a = DocId::from("doc1");
/// let b = DocId::from(b"doc1".to_vec());
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 4);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocId(Arc<[u8]>);

impl DocId {
    /// Create a DocId from raw bytes
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        DocId(Arc::from(bytes.as_ref()))
    }

    /// Raw bytes of the id
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the id in bytes
    ///
    /// This is the variable part of the per-key RAM cost.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the id is the empty byte string
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        DocId::new(s.as_bytes())
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        DocId(Arc::from(s.into_bytes().into_boxed_slice()))
    }
}

impl From<&[u8]> for DocId {
    fn from(bytes: &[u8]) -> Self {
        DocId::new(bytes)
    }
}

impl From<Vec<u8>> for DocId {
    fn from(bytes: Vec<u8>) -> Self {
        DocId(Arc::from(bytes.into_boxed_slice()))
    }
}

impl Borrow<[u8]> for DocId {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for DocId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocId({:?})", String::from_utf8_lossy(&self.0))
    }
}
