//! Response cache keyed by prompt fingerprint.

pub mod fingerprint;
pub mod store;

pub use fingerprint::Fingerprint;
pub use store::{CacheEntry, CacheStats, ResponseCache};
