//! Storage Module
//!
//! This module provides the key-value store behind the command dispatcher.
//! Values and deadlines live in two maps owned by a single thread, and
//! expired keys are removed when they are next read.
//!
//! ## Example
//!
//! ```
//! use pulsekv::storage::Store;
//! use bytes::Bytes;
//! use std::time::{Duration, Instant};
//!
//! let mut store = Store::new();
//!
//! // Basic operations
//! store.set(Bytes::from("name"), Bytes::from("Ariz"));
//! assert_eq!(store.get(b"name"), Some(Bytes::from("Ariz")));
//!
//! // A deadline that already passed is reclaimed by the next read
//! let now = Instant::now();
//! store.set_with_deadline(Bytes::from("gone"), Bytes::from("x"), now);
//! assert_eq!(store.get_at(b"gone", now + Duration::from_millis(1)), None);
//! assert!(!store.contains_raw(b"gone"));
//! ```

pub mod engine;

// Re-export commonly used types
pub use engine::{Store, StoreStats};
