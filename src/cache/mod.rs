// Cache management module
// Author: kelexine (https://github.com/kelexine)

pub mod backing;
pub mod models;
pub mod store;

pub use backing::{BackingError, DistributedBacking, HttpBacking, MemoryBacking};
pub use models::{Blob, CacheConfig, CacheStats, CachedContent};
pub use store::CacheStore;
