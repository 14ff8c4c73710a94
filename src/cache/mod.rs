//! Request caching.
//!
//! [`RequestCache`] is an explicitly constructed keyed store with TTL expiry
//! and in-flight deduplication. Share one instance (behind an `Arc`) between
//! orchestrators that should see each other's results.

mod coordinator;
mod key;
mod store;

pub use coordinator::CacheCoordinator;
pub use key::hashed_key;
pub use store::{CacheEntry, RequestCache, SharedFetch};
