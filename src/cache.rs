//! Action-result caching: stable cache keys over effect state hashes, and a
//! concurrent memoization store with optional persistent backing.

pub mod key;
pub mod store;
