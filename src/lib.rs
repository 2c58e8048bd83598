//! # proxy-http-cache
//!
//! HTTP response caching for proxies: a filter that answers GET requests from a pluggable
//! storage backend, revalidates stale entries upstream and stores cacheable responses as
//! they stream through.
//!
//! ## Overview
//!
//! - **Byte ranges** (RFC 7233): [`range::RangeParser`] turns a Range header into raw ranges;
//!   lookups resolve them against the stored body and the filter answers 206, 200 or 416.
//! - **Freshness** (RFC 7234): [`freshness::effective_max_age`] and
//!   [`freshness::http_time`] decide whether a stored response may be served as is.
//! - **Storage**: [`cache::HttpCache`] is the backend contract, with a pull-based read handle
//!   and a push-based write handle. [`cache::SimpleHttpCache`] is the in-memory reference.
//! - **Filter**: [`filter::CacheFilter`] drives lookups on a per-connection
//!   [`dispatcher::Dispatcher`] and delivers cached bodies in chunks under backpressure.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::rc::Rc;
//! use std::sync::Arc;
//!
//! use proxy_http_cache::cache::{HttpCacheFactory, SimpleHttpCacheFactory};
//! use proxy_http_cache::config::CacheFilterConfig;
//! use proxy_http_cache::dispatcher::TaskQueue;
//! use proxy_http_cache::filter::CacheFilterFactory;
//!
//! # fn main() -> proxy_http_cache::Result<()> {
//! let config = CacheFilterConfig::from_yaml_str("backend: simple\nbyte_range_parse_limit: 8\n")?;
//! let backends: Vec<Arc<dyn HttpCacheFactory>> = vec![Arc::new(SimpleHttpCacheFactory::new())];
//! let factory = CacheFilterFactory::from_config(&config, &backends)?;
//!
//! // One queue per connection; the host runs it after each I/O event.
//! let queue = Rc::new(TaskQueue::new());
//! # let _ = (factory, queue);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`range`] | Range header grammar |
//! | [`freshness`] | Cache-Control max-age and HTTP-date parsing |
//! | [`cache`] | Cache keys, lookups, backend contract, in-memory backend |
//! | [`filter`] | The request/response state machine |
//! | [`dispatcher`] | Task scheduling primitive and adapters |
//! | [`config`] | Filter configuration and backend selection |
//! | [`time`] | Wall-clock sources |

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod freshness;
pub mod range;
pub mod time;

pub use cache::{CacheKey, HttpCache, HttpCacheFactory, SimpleHttpCache, SimpleHttpCacheFactory};
pub use config::CacheFilterConfig;
pub use dispatcher::{Dispatcher, TaskQueue};
pub use error::{Error, ErrorContext};
pub use filter::{
    CacheFilter, CacheFilterFactory, FilterCallbacks, FilterDataStatus, FilterHeadersStatus,
    FilterState,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
