//! Per-key mutual exclusion
//!
//! Gives a thread exclusive access to the state of one key without blocking
//! threads working on other keys.
//!
//! ## Design
//!
//! - One `parking_lot::Mutex` per key, created on first use
//! - A reference count of holders plus waiters per key
//! - The count is only changed while the registry shard for the key is
//!   write-locked, so a lock is removed from the registry exactly when its
//!   last user leaves and is never handed out after that
//!
//! Locks are not reentrant: acquiring a key twice on the same thread
//! deadlocks, and `try_acquire` on a key the thread already holds returns
//! `None`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{BuildHasherDefault, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Lock state for a single key
struct KeyLock {
    mutex: Arc<Mutex<()>>,
    /// Holders plus waiters
    refs: AtomicUsize,
    /// Thread currently holding `mutex`
    owner: Mutex<Option<ThreadId>>,
}

impl KeyLock {
    fn new() -> Self {
        KeyLock {
            mutex: Arc::new(Mutex::new(())),
            refs: AtomicUsize::new(1),
            owner: Mutex::new(None),
        }
    }
}

/// Registry of per-key locks
///
/// # Thread Safety
///
/// - `acquire()`: blocks only while another thread holds the same key
/// - `try_acquire()`: never blocks on the key
/// - Registry bookkeeping takes a short shard lock in the underlying DashMap
///
/// # Example
///
/// ```
/// use versionmap_concurrency::KeyedMutex;
///
/// let locks: KeyedMutex<String> = KeyedMutex::new();
/// {
///     let _guard = locks.acquire("doc1".to_string());
///     assert!(locks.is_held_by_current_thread(&"doc1".to_string()));
///     // a different key is independent
///     assert!(locks.try_acquire("doc2".to_string()).is_some());
/// }
/// assert!(locks.is_empty());
/// ```
pub struct KeyedMutex<K>
where
    K: Eq + Hash,
{
    locks: DashMap<K, Arc<KeyLock>, FxBuildHasher>,
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            locks: DashMap::with_hasher(FxBuildHasher::default()),
        }
    }

    /// Acquire the lock for `key`, blocking until it is free
    ///
    /// The lock is released when the returned guard is dropped.
    pub fn acquire(&self, key: K) -> KeyedGuard<'_, K> {
        let lock = self.register(&key);
        let guard = lock.mutex.lock_arc();
        *lock.owner.lock() = Some(thread::current().id());
        KeyedGuard {
            registry: self,
            key,
            lock,
            guard: Some(guard),
        }
    }

    /// Acquire the lock for `key` only if nobody holds it
    ///
    /// Returns `None` immediately when the key is contended.
    pub fn try_acquire(&self, key: K) -> Option<KeyedGuard<'_, K>> {
        let lock = self.register(&key);
        match lock.mutex.try_lock_arc() {
            Some(guard) => {
                *lock.owner.lock() = Some(thread::current().id());
                Some(KeyedGuard {
                    registry: self,
                    key,
                    lock,
                    guard: Some(guard),
                })
            }
            None => {
                self.unregister(&key, &lock);
                None
            }
        }
    }

    /// Check if the calling thread holds the lock for `key`
    pub fn is_held_by_current_thread(&self, key: &K) -> bool {
        let me = thread::current().id();
        self.locks
            .get(key)
            .map(|lock| *lock.owner.lock() == Some(me))
            .unwrap_or(false)
    }

    /// Check if any thread holds or waits for `key`
    pub fn has_lock_for(&self, key: &K) -> bool {
        self.locks.contains_key(key)
    }

    /// Number of keys with at least one holder or waiter
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Check if no key is locked or awaited
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn register(&self, key: &K) -> Arc<KeyLock> {
        match self.locks.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let lock = Arc::clone(entry.get());
                lock.refs.fetch_add(1, Ordering::Relaxed);
                lock
            }
            Entry::Vacant(entry) => {
                let lock = Arc::new(KeyLock::new());
                entry.insert(Arc::clone(&lock));
                lock
            }
        }
    }

    fn unregister(&self, key: &K, lock: &Arc<KeyLock>) {
        // Our reference keeps the entry alive, so it must still be `lock`.
        self.locks.remove_if(key, |_, current| {
            debug_assert!(Arc::ptr_eq(current, lock));
            current.refs.fetch_sub(1, Ordering::Relaxed) == 1
        });
    }
}

impl<K> Default for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for KeyedMutex<K>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedMutex")
            .field("locked_keys", &self.locks.len())
            .finish()
    }
}

/// Scoped ownership of one key's lock
///
/// Released on drop, on every exit path.
#[must_use = "the key is unlocked as soon as the guard is dropped"]
pub struct KeyedGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    registry: &'a KeyedMutex<K>,
    key: K,
    lock: Arc<KeyLock>,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl<K> KeyedGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    /// The key this guard locks
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for KeyedGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        *self.lock.owner.lock() = None;
        drop(self.guard.take());
        self.registry.unregister(&self.key, &self.lock);
    }
}

impl<K> fmt::Debug for KeyedGuard<'_, K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedGuard").field("key", &self.key).finish()
    }
}
