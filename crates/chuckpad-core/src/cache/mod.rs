//! In-memory response cache.
//!
//! This module provides the `CacheStore`, a time-expiring object cache used to
//! memoize decoded API responses, and `CacheKey` for deriving deterministic,
//! environment-qualified keys.
//!
//! Entries expire lazily: expiry is checked against the injected clock when a
//! key is read. Nothing here survives a process restart.

pub mod keys;
pub mod store;

pub use keys::CacheKey;
pub use store::{CacheConfig, CacheStore, DEFAULT_MAX_ENTRIES, DEFAULT_TTL_SECONDS};
