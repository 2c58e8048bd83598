//! In-memory reference backend.
//!
//! One map from key to entry behind one mutex. The lock is held for the map access only;
//! body windows are served from a copy held by the lookup context. Entries are never evicted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use tracing::{debug, warn};

use super::backend::{
    CacheInfo, HttpCache, HttpCacheFactory, InsertCallback, InsertContext, LookupBodyCallback,
    LookupContext, LookupHeadersCallback, LookupTrailersCallback,
};
use super::key::CacheKey;
use super::lookup::{AdjustedByteRange, LookupRequest, LookupResult};

/// Name under which [`SimpleHttpCacheFactory`] is selected.
pub const SIMPLE_CACHE_NAME: &str = "simple";

#[derive(Debug, Clone)]
struct CacheEntry {
    headers: HeaderMap,
    body: Bytes,
    inserted_at: SystemTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleCacheStats {
    pub lookups: u64,
    pub hits: u64,
    pub inserts: u64,
}

#[derive(Default)]
struct AtomicStats {
    lookups: AtomicU64,
    hits: AtomicU64,
    inserts: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> SimpleCacheStats {
        SimpleCacheStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct Store {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    stats: AtomicStats,
}

impl Store {
    fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => {
                warn!(key = %key, "cache map lock poisoned, treating lookup as miss");
                return None;
            }
        };
        let entry = entries.get(key).cloned();
        drop(entries);
        if entry.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        }
        entry
    }

    fn insert(&self, key: CacheKey, entry: CacheEntry) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(key, entry);
                self.stats.inserts.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => warn!(key = %key, "cache map lock poisoned, dropping insert"),
        }
    }
}

/// Mutex-guarded in-memory [`HttpCache`].
///
/// Does not support trailers or header-only updates; calling those panics.
#[derive(Clone, Default)]
pub struct SimpleHttpCache {
    store: Arc<Store>,
}

impl SimpleHttpCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> SimpleCacheStats {
        self.store.stats.to_stats()
    }

    pub fn len(&self) -> usize {
        self.store.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HttpCache for SimpleHttpCache {
    fn make_lookup_context(&self, request: LookupRequest) -> Box<dyn LookupContext> {
        Box::new(SimpleLookupContext {
            store: Arc::clone(&self.store),
            request,
            body: Bytes::new(),
        })
    }

    fn make_insert_context(&self, lookup: Box<dyn LookupContext>) -> Box<dyn InsertContext> {
        let request = lookup.request();
        Box::new(SimpleInsertContext {
            store: Arc::clone(&self.store),
            key: request.key().clone(),
            timestamp: request.timestamp(),
            headers: None,
            body: BytesMut::new(),
            committed: false,
        })
    }

    fn update_headers(&self, _lookup: &dyn LookupContext, _headers: &HeaderMap) {
        panic!("SimpleHttpCache does not support header updates");
    }

    fn cache_info(&self) -> CacheInfo {
        CacheInfo {
            name: "SimpleHttpCache",
            supports_range_requests: true,
            supports_header_updates: false,
        }
    }
}

struct SimpleLookupContext {
    store: Arc<Store>,
    request: LookupRequest,
    body: Bytes,
}

impl LookupContext for SimpleLookupContext {
    fn get_headers(&mut self, callback: LookupHeadersCallback) {
        let result = match self.store.lookup(self.request.key()) {
            Some(entry) => {
                self.body = entry.body;
                self.request.make_lookup_result(
                    entry.headers,
                    self.body.len() as u64,
                    entry.inserted_at,
                )
            }
            None => LookupResult::miss(),
        };
        debug!(key = %self.request.key(), status = ?result.status, "cache lookup");
        callback(result);
    }

    fn get_body(&mut self, range: &AdjustedByteRange, callback: LookupBodyCallback) {
        assert!(
            range.last_byte_pos() < self.body.len() as u64,
            "attempt to read past end of body"
        );
        let first = range.first_byte_pos() as usize;
        let last = range.last_byte_pos() as usize;
        callback(Some(self.body.slice(first..=last)));
    }

    fn get_trailers(&mut self, _callback: LookupTrailersCallback) {
        panic!("SimpleHttpCache never stores trailers");
    }

    fn request(&self) -> &LookupRequest {
        &self.request
    }
}

struct SimpleInsertContext {
    store: Arc<Store>,
    key: CacheKey,
    timestamp: SystemTime,
    headers: Option<HeaderMap>,
    body: BytesMut,
    committed: bool,
}

impl SimpleInsertContext {
    fn commit(&mut self) {
        self.committed = true;
        let entry = CacheEntry {
            headers: self.headers.take().unwrap_or_default(),
            body: std::mem::take(&mut self.body).freeze(),
            inserted_at: self.timestamp,
        };
        debug!(key = %self.key, len = entry.body.len(), "cache insert committed");
        self.store.insert(self.key.clone(), entry);
    }
}

impl InsertContext for SimpleInsertContext {
    fn insert_headers(&mut self, headers: &HeaderMap, end_stream: bool) {
        assert!(!self.committed, "insert after commit");
        self.headers = Some(headers.clone());
        if end_stream {
            self.commit();
        }
    }

    fn insert_body(
        &mut self,
        chunk: Bytes,
        ready_for_next_chunk: Option<InsertCallback>,
        end_stream: bool,
    ) {
        assert!(!self.committed, "insert after commit");
        self.body.extend_from_slice(&chunk);
        if end_stream {
            self.commit();
        } else if let Some(ready) = ready_for_next_chunk {
            ready(true);
        }
    }

    fn insert_trailers(&mut self, _trailers: &HeaderMap) {
        panic!("SimpleHttpCache never stores trailers");
    }
}

/// Factory handing out one shared [`SimpleHttpCache`].
#[derive(Clone, Default)]
pub struct SimpleHttpCacheFactory {
    cache: SimpleHttpCache,
}

impl SimpleHttpCacheFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HttpCacheFactory for SimpleHttpCacheFactory {
    fn name(&self) -> &str {
        SIMPLE_CACHE_NAME
    }

    fn get_cache(&self) -> Arc<dyn HttpCache> {
        Arc::new(self.cache.clone())
    }
}
