//! Shared helpers for the version index tests

pub use std::sync::Arc;
pub use versionmap::prelude::*;

/// Route index log output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::TRACE)
        .try_init();
}

pub fn doc(key: &str) -> DocId {
    DocId::from(key)
}

/// Record a live version of `key` through the fully indexed path
pub fn index_live(index: &LiveVersionIndex, key: &str, version: u64, seq_no: i64) {
    let id = doc(key);
    let _lock = index.acquire_lock(&id);
    index.put_index_under_lock(&id, VersionEntry::live(version, seq_no, 1));
}

/// Record a delete of `key` at `delete_time`
pub fn delete(index: &LiveVersionIndex, key: &str, version: u64, seq_no: i64, delete_time: i64) {
    let id = doc(key);
    let _lock = index.acquire_lock(&id);
    index.put_delete_under_lock(&id, VersionEntry::tombstone(version, seq_no, 1, delete_time));
}

pub fn get_locked(index: &LiveVersionIndex, key: &str) -> Option<VersionEntry> {
    let id = doc(key);
    let _lock = index.acquire_lock(&id);
    index.get_under_lock(&id)
}

pub fn refresh(index: &LiveVersionIndex) {
    index.before_refresh();
    index.after_refresh(true);
}
