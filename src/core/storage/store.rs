// src/core/storage/store.rs

//! The process-wide key-value store.

use bytes::Bytes;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// A single stored value together with its optional absolute expiry.
///
/// Created or replaced by `SET`, removed by `DEL` or lazily on a
/// read-after-expiry. A missing `expires_at` means the entry never expires.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Bytes,
    pub expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// The process-wide, concurrent key-value store.
///
/// Each key is guarded independently by `DashMap`'s internal sharded locking,
/// which is enough to make every single-key operation below atomic; callers
/// observe `get` following `set` on the same key, in the order they issued
/// them, as required by the store's linearizability contract.
#[derive(Debug, Default)]
pub struct Store {
    entries: DashMap<Bytes, Entry>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Replaces any existing entry for `key`. If `px_ms` is given, the entry
    /// expires `px_ms` milliseconds from now; otherwise it never expires.
    pub fn set(&self, key: Bytes, value: Bytes, px_ms: Option<u64>) {
        let expires_at = px_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        self.entries.insert(key, Entry { value, expires_at });
    }

    /// Returns the value for `key` iff present and not expired. An expired
    /// entry is lazily removed, but correctness never depends on that
    /// cleanup happening — a subsequent `get` would see the same result
    /// either way, since `is_expired` is purely a function of time.
    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => return None,
        };
        if expired {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
        }
        None
    }

    /// Deletes each of `keys`, returning the count of keys that were present
    /// (and not expired) immediately before the call. An expired entry
    /// counts as absent.
    pub fn del(&self, keys: &[Bytes]) -> u64 {
        let now = Instant::now();
        let mut deleted = 0u64;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(key) {
                if !entry.is_expired(now) {
                    deleted += 1;
                }
            }
        }
        deleted
    }
}
