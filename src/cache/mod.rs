//! # Cache Storage
//!
//! Cache keys, lookup evaluation, the storage backend contract and an in-memory reference
//! backend.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheKey`] | Resource identity derived from scheme, host, path and query |
//! | [`LookupRequest`] | One lookup: key, requested ranges, timestamp |
//! | [`LookupResult`] | Backend answer: miss, hit or requires-validation |
//! | [`HttpCache`] | Trait for storage backends |
//! | [`LookupContext`] / [`InsertContext`] | Per-request read and write handles |
//! | [`SimpleHttpCache`] | Mutex-guarded in-memory backend that never evicts |
//!
//! ## Example
//!
//! ```rust
//! use proxy_http_cache::cache::{
//!     CacheKey, HttpCache, LookupRequest, LookupResult, SimpleHttpCache,
//! };
//! use std::time::SystemTime;
//!
//! let cache = SimpleHttpCache::new();
//! let key = CacheKey::new("https", "example.com", "/logo.png", None);
//! let request = LookupRequest::new(key, &http::HeaderMap::new(), vec![], SystemTime::now());
//! let mut lookup = cache.make_lookup_context(request);
//! lookup.get_headers(Box::new(|result: LookupResult| println!("{:?}", result.status)));
//! ```

mod backend;
mod key;
mod lookup;
mod memory;

pub use backend::{
    CacheInfo, HttpCache, HttpCacheFactory, InsertCallback, InsertContext, LookupBodyCallback,
    LookupContext, LookupHeadersCallback, LookupTrailersCallback,
};
pub use key::CacheKey;
pub use lookup::{
    AdjustedByteRange, CacheEntryStatus, LookupRequest, LookupResult, RangeResolution, Validators,
};
pub use memory::{SimpleCacheStats, SimpleHttpCache, SimpleHttpCacheFactory, SIMPLE_CACHE_NAME};
