//! Key-Value Store with Lazy Expiry
//!
//! This module implements the store behind every command. It keeps two
//! maps: `key -> value` and `key -> deadline`. A key listed in the deadline
//! map is always present in the value map.
//!
//! ## Design Decisions
//!
//! 1. **Single owner**: The store is owned by the event loop thread and
//!    handed to the dispatcher as `&mut Store`. There are no locks; a
//!    multi-threaded server would have to wrap it in a `Mutex`.
//! 2. **Lazy Expiry**: Keys are checked for expiry on read and removed
//!    right there. There is no background sweeper.
//! 3. **No eviction**: The store grows without bound.

use bytes::Bytes;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Counters describing store activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of live and not-yet-reclaimed keys
    pub keys: usize,
    /// Keys currently carrying a deadline
    pub volatile_keys: usize,
    /// Total GET operations
    pub gets: u64,
    /// Total SET operations
    pub sets: u64,
    /// Expired keys removed on access
    pub expired: u64,
}

/// The in-memory key-value store.
///
/// # Example
///
/// ```
/// use pulsekv::storage::Store;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let mut store = Store::new();
///
/// store.set(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(store.get(b"name"), Some(Bytes::from("Ariz")));
///
/// let deadline = store.set_with_ttl(Bytes::from("session"), Bytes::from("abc123"), Duration::from_secs(60));
/// assert_eq!(store.expiry_of(b"session"), deadline);
/// ```
#[derive(Debug, Default)]
pub struct Store {
    /// Current value of every key
    values: HashMap<Bytes, Bytes>,
    /// Absolute deadline of every key that has a TTL
    expiries: HashMap<Bytes, Instant>,
    gets: u64,
    sets: u64,
    expired: u64,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key-value pair without expiry.
    ///
    /// Overwrites any previous value and clears any previous TTL.
    pub fn set(&mut self, key: Bytes, value: Bytes) {
        self.sets += 1;
        self.expiries.remove(&key);
        self.values.insert(key, value);
    }

    /// Sets a key-value pair that expires `ttl` from now.
    ///
    /// Returns the installed deadline, or `None` without touching the store
    /// when `ttl` is too large to represent as an [`Instant`].
    #[must_use = "a TTL that overflows the clock stores nothing"]
    pub fn set_with_ttl(&mut self, key: Bytes, value: Bytes, ttl: Duration) -> Option<Instant> {
        let deadline = Instant::now().checked_add(ttl)?;
        self.set_with_deadline(key, value, deadline);
        Some(deadline)
    }

    /// Sets a key-value pair that expires at `deadline`.
    pub fn set_with_deadline(&mut self, key: Bytes, value: Bytes, deadline: Instant) {
        self.sets += 1;
        self.expiries.insert(key.clone(), deadline);
        self.values.insert(key, value);
    }

    /// Gets the value of a key, deleting it first if its deadline passed.
    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        self.get_at(key, Instant::now())
    }

    /// Gets the value of a key as observed at `now`.
    ///
    /// A key whose deadline is at or before `now` is removed from both maps
    /// and reported as absent.
    pub fn get_at(&mut self, key: &[u8], now: Instant) -> Option<Bytes> {
        self.gets += 1;

        let expired = self
            .expiries
            .get(key)
            .is_some_and(|deadline| now >= *deadline);

        if expired {
            self.expiries.remove(key);
            self.values.remove(key);
            self.expired += 1;
            return None;
        }

        self.values.get(key).cloned()
    }

    /// Returns true if the key is physically present, expired or not.
    pub fn contains_raw(&self, key: &[u8]) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the stored deadline of a key, if any.
    pub fn expiry_of(&self, key: &[u8]) -> Option<Instant> {
        self.expiries.get(key).copied()
    }

    /// Returns the number of physically present keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns a snapshot of the store counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            keys: self.values.len(),
            volatile_keys: self.expiries.len(),
            gets: self.gets,
            sets: self.sets,
            expired: self.expired,
        }
    }
}
