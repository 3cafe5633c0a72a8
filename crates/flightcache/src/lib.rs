//! # flightcache
//!
//! Concurrency-safe memoizing cache with single-flight loads.
//!
//! ## Architecture
//! - **Entry table**: AHash-indexed LRU list behind a parking_lot mutex
//! - **Flights**: per-key load slots so one loader call serves every
//!   concurrent miss for a key
//! - **Fencing**: `put` and invalidation win over in-flight loads; a
//!   fenced load still resolves for its callers but is never installed
//! - **Failures**: propagated to every joined caller, never cached
//!
//! Values are treated as opaque and immutable-by-convention; lookups
//! return clones, so cheap-to-clone value types (or `Arc`-wrapped ones)
//! work best.

#![warn(missing_docs)]

mod cache;
mod error;
mod flight;
mod lru;
mod noop;
mod stats;

pub use cache::{Cache, CacheBuilder, CacheStore, RemovalCause};
pub use error::{Error, Result};
pub use noop::NoopCache;
pub use stats::CacheStats;
