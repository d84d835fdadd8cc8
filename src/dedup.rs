// src/dedup.rs
//! Bounded FIFO window of recently seen message fingerprints.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use crate::models::Platform;

/// How many distinct fingerprints the window holds before the oldest rolls off.
pub const WINDOW_CAPACITY: usize = 200;

/// Fingerprint of a captured message: platform + sender + body.
pub fn message_key(platform: Platform, sender: &str, body: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    platform.as_str().hash(&mut hasher);
    sender.hash(&mut hasher);
    body.hash(&mut hasher);
    hasher.finish()
}

/// Insertion-ordered set of recent fingerprints.
///
/// Eviction is strict FIFO, not LRU: re-seeing a key does not refresh its
/// position, so a message reintroduced after the window rolled past it is
/// treated as new. In-process only; a restarted service starts empty.
pub struct DedupWindow {
    inner: Mutex<Inner>,
    capacity: usize,
}

struct Inner {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
}

impl DedupWindow {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                seen: HashSet::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Atomic insert-if-absent. Returns true if the key was not in the
    /// window (and is now recorded); false means duplicate, caller discards.
    pub fn insert(&self, key: u64) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.seen.contains(&key) {
            return false;
        }

        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }

        inner.order.push_back(key);
        inner.seen.insert(key);
        true
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new()
    }
}
