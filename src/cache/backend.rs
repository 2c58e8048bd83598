//! Storage backend contract.
//!
//! Reads are pull-based: the filter asks a [`LookupContext`] for headers, then for body
//! windows one at a time. Writes are push-based: the filter feeds an [`InsertContext`]
//! headers and body chunks as they pass through. Every callback may fire synchronously or
//! later, at the backend's discretion; the filter re-posts them to its own dispatcher either
//! way.

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;

use super::lookup::{AdjustedByteRange, LookupRequest, LookupResult};

pub type LookupHeadersCallback = Box<dyn FnOnce(LookupResult)>;
/// `None` signals that the body could not be read.
pub type LookupBodyCallback = Box<dyn FnOnce(Option<Bytes>)>;
pub type LookupTrailersCallback = Box<dyn FnOnce(Option<HeaderMap>)>;
/// Called with `true` when the backend wants the next chunk, `false` to abort the insert.
pub type InsertCallback = Box<dyn FnOnce(bool)>;

/// Read handle for one lookup.
pub trait LookupContext {
    /// Perform the lookup. The callback runs exactly once.
    fn get_headers(&mut self, callback: LookupHeadersCallback);

    /// Fetch a window of the body found by `get_headers`.
    ///
    /// The range must lie within the body length reported by the lookup result. A backend
    /// may return fewer bytes than requested; the caller asks again for the remainder.
    fn get_body(&mut self, range: &AdjustedByteRange, callback: LookupBodyCallback);

    fn get_trailers(&mut self, callback: LookupTrailersCallback);

    fn request(&self) -> &LookupRequest;
}

/// Write handle for one response. Committed on the first call carrying `end_stream`.
pub trait InsertContext {
    fn insert_headers(&mut self, headers: &HeaderMap, end_stream: bool);

    /// Append a chunk. `ready_for_next_chunk` is invoked unless `end_stream` is set.
    fn insert_body(
        &mut self,
        chunk: Bytes,
        ready_for_next_chunk: Option<InsertCallback>,
        end_stream: bool,
    );

    fn insert_trailers(&mut self, trailers: &HeaderMap);
}

/// Static description of a backend's capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
    pub name: &'static str,
    pub supports_range_requests: bool,
    pub supports_header_updates: bool,
}

/// A storage backend. Shared across connections, so implementations must be thread-safe.
pub trait HttpCache: Send + Sync {
    fn make_lookup_context(&self, request: LookupRequest) -> Box<dyn LookupContext>;

    /// Create a write handle for the key looked up by `lookup`.
    fn make_insert_context(&self, lookup: Box<dyn LookupContext>) -> Box<dyn InsertContext>;

    /// Replace the stored headers of the entry found by `lookup`, keeping its body.
    fn update_headers(&self, lookup: &dyn LookupContext, headers: &HeaderMap);

    fn cache_info(&self) -> CacheInfo;
}

/// Named constructor for a backend, handed to backend selection.
pub trait HttpCacheFactory: Send + Sync {
    fn name(&self) -> &str;

    fn get_cache(&self) -> Arc<dyn HttpCache>;
}
