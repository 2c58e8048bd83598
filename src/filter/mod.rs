//! # Cache Filter
//!
//! Per-request state machine that sits in a proxy's filter chain, answers requests from a
//! storage backend when it can, revalidates stale entries and stores cacheable responses.
//!
//! ```text
//! Created ──(uncacheable request)──────────────────────────────▶ PassThrough
//!    │
//!    └─▶ LookupInProgress ─┬─ miss ─▶ (response) ─┬─ cacheable ─▶ Inserting
//!                          │                      └─ otherwise ─▶ PassThrough
//!                          ├─ requires validation ─▶ Validating ─┬─ 304 ─▶ ServingFromCache
//!                          │                                     └─ other ─▶ as a miss
//!                          └─ hit ─▶ ServingFromCache
//! any ──(on_destroy)──▶ Destroyed
//! ```
//!
//! The filter runs on one connection's single-threaded dispatcher. Backend callbacks are
//! never acted on directly: each posts a task holding a weak handle and a [`CancelToken`],
//! so a task that fires after the filter is destroyed does nothing.

mod cancel;
mod delivery;
mod headers;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use bytes::Bytes;
use http::{request, response, HeaderMap, StatusCode};
use tracing::{debug, trace, warn};

use crate::cache::{
    AdjustedByteRange, CacheEntryStatus, HttpCache, HttpCacheFactory, InsertContext,
    LookupContext, LookupRequest, LookupResult, RangeResolution, Validators,
};
use crate::config::{select_cache, CacheFilterConfig};
use crate::dispatcher::Dispatcher;
use crate::range::RangeParser;
use crate::time::{SystemTimeSource, TimeSource};
use crate::Result;

pub use cancel::CancelToken;
pub use delivery::plan_chunks;

use delivery::{BodyDelivery, DeliveryMode, Watermarks};

/// Verdict on a headers frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterHeadersStatus {
    Continue,
    /// Hold the request until the filter resumes it.
    StopIteration,
    /// Forward the headers but keep the stream open; the filter injects the body.
    ContinueAndDontEndStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDataStatus {
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Created,
    LookupInProgress,
    Validating,
    ServingFromCache,
    Inserting,
    PassThrough,
    Destroyed,
}

/// Stream operations the filter drives on its host.
///
/// Implementations may call the filter's watermark methods from inside these callbacks.
pub trait FilterCallbacks {
    /// Continue a request held by [`FilterHeadersStatus::StopIteration`], adding
    /// `conditional_headers` (empty unless revalidating) to it first.
    fn resume_decoding(&self, conditional_headers: HeaderMap);

    /// Send a response synthesized from cache downstream.
    fn encode_headers(&self, response: response::Parts, end_stream: bool);

    /// Send a body chunk of a response synthesized from cache.
    fn encode_data(&self, data: Bytes, end_stream: bool);

    /// Add a body chunk to the upstream response being encoded (304 replay).
    fn inject_encoded_data(&self, data: Bytes, end_stream: bool);

    /// Largest chunk the downstream buffer accepts at once; zero for no limit.
    fn buffer_limit(&self) -> u64;

    fn reset_stream(&self);
}

/// Stored response remembered while a revalidation is in flight.
struct CachedResponse {
    headers: HeaderMap,
    content_length: u64,
}

struct Inner {
    state: FilterState,
    /// The lookup callback has been handled.
    lookup_resolved: bool,
    lookup: Option<Box<dyn LookupContext>>,
    insert: Option<Box<dyn InsertContext>>,
    /// Body chunks held back until the backend asks for the next one.
    insert_backlog: VecDeque<(Bytes, bool)>,
    /// A `ready_for_next_chunk` callback is outstanding.
    awaiting_ready: bool,
    cached: Option<CachedResponse>,
    delivery: Option<BodyDelivery>,
    watermarks: Watermarks,
}

struct Shared {
    cache: Arc<dyn HttpCache>,
    range_parser: RangeParser,
    time_source: Arc<dyn TimeSource>,
    dispatcher: Rc<dyn Dispatcher>,
    callbacks: Rc<dyn FilterCallbacks>,
    token: CancelToken,
    inner: RefCell<Inner>,
}

/// Per-listener settings from which per-request filters are created.
#[derive(Clone)]
pub struct CacheFilterFactory {
    cache: Arc<dyn HttpCache>,
    range_parser: RangeParser,
    time_source: Arc<dyn TimeSource>,
}

impl CacheFilterFactory {
    pub fn new(cache: Arc<dyn HttpCache>) -> Self {
        Self {
            cache,
            range_parser: RangeParser::default(),
            time_source: Arc::new(SystemTimeSource),
        }
    }

    /// Validate `config`, select its backend among `factories` and apply its range limits.
    pub fn from_config(
        config: &CacheFilterConfig,
        factories: &[Arc<dyn HttpCacheFactory>],
    ) -> Result<Self> {
        config.validate()?;
        let cache = select_cache(config, factories)?;
        Ok(Self::new(cache).with_range_parser(config.range_parser()?))
    }

    pub fn with_range_parser(mut self, parser: RangeParser) -> Self {
        self.range_parser = parser;
        self
    }

    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn cache(&self) -> &Arc<dyn HttpCache> {
        &self.cache
    }

    pub fn create_filter(
        &self,
        dispatcher: Rc<dyn Dispatcher>,
        callbacks: Rc<dyn FilterCallbacks>,
    ) -> CacheFilter {
        CacheFilter {
            shared: Rc::new(Shared {
                cache: Arc::clone(&self.cache),
                range_parser: self.range_parser.clone(),
                time_source: Arc::clone(&self.time_source),
                dispatcher,
                callbacks,
                token: CancelToken::new(),
                inner: RefCell::new(Inner {
                    state: FilterState::Created,
                    lookup_resolved: false,
                    lookup: None,
                    insert: None,
                    insert_backlog: VecDeque::new(),
                    awaiting_ready: false,
                    cached: None,
                    delivery: None,
                    watermarks: Watermarks::default(),
                }),
            }),
        }
    }
}

/// The caching filter for one request/response exchange.
///
/// Dropping it has the same effect as [`CacheFilter::on_destroy`].
pub struct CacheFilter {
    shared: Rc<Shared>,
}

impl CacheFilter {
    pub fn state(&self) -> FilterState {
        self.shared.inner.borrow().state
    }

    /// Handle request headers. `end_stream` is true when the request has no body.
    pub fn decode_headers(
        &self,
        request: &request::Parts,
        end_stream: bool,
    ) -> FilterHeadersStatus {
        let shared = &self.shared;
        let mut inner = shared.inner.borrow_mut();
        if inner.state != FilterState::Created {
            return FilterHeadersStatus::Continue;
        }
        let Some(key) = headers::cacheable_request_key(request, end_stream) else {
            debug!(method = %request.method, uri = %request.uri, "request not cacheable");
            inner.state = FilterState::PassThrough;
            return FilterHeadersStatus::Continue;
        };

        let ranges = shared.range_parser.parse_headers(&request.headers);
        let lookup_request = LookupRequest::new(
            key,
            &request.headers,
            ranges,
            shared.time_source.system_time(),
        );
        debug!(key = %lookup_request.key(), "starting cache lookup");
        let mut lookup = shared.cache.make_lookup_context(lookup_request);
        inner.state = FilterState::LookupInProgress;
        lookup.get_headers(shared.bind(Shared::on_headers));
        inner.lookup = Some(lookup);
        FilterHeadersStatus::StopIteration
    }

    /// Handle upstream response headers.
    pub fn encode_headers(
        &self,
        response: &mut response::Parts,
        end_stream: bool,
    ) -> FilterHeadersStatus {
        self.shared.on_response_headers(response, end_stream)
    }

    /// Handle an upstream response body chunk.
    pub fn encode_data(&self, data: &Bytes, end_stream: bool) -> FilterDataStatus {
        self.shared.on_response_data(data, end_stream);
        FilterDataStatus::Continue
    }

    pub fn on_above_write_buffer_high_watermark(&self) {
        self.shared.inner.borrow_mut().watermarks.raise();
        trace!("downstream above high watermark");
    }

    pub fn on_below_write_buffer_low_watermark(&self) {
        let mut inner = self.shared.inner.borrow_mut();
        if !inner.watermarks.lower() {
            return;
        }
        let paused = inner
            .delivery
            .as_mut()
            .map_or(false, |d| std::mem::take(&mut d.paused));
        drop(inner);
        if paused {
            trace!("downstream drained, resuming body delivery");
            self.shared.post(Shared::resume_delivery);
        }
    }

    /// Tear down the filter. Pending tasks become no-ops.
    pub fn on_destroy(&self) {
        self.shared.token.cancel();
        let mut inner = self.shared.inner.borrow_mut();
        if inner.state != FilterState::Destroyed {
            debug!(state = ?inner.state, "cache filter destroyed");
        }
        inner.state = FilterState::Destroyed;
        inner.lookup = None;
        inner.insert = None;
        inner.insert_backlog.clear();
        inner.cached = None;
        inner.delivery = None;
    }
}

impl Drop for CacheFilter {
    fn drop(&mut self) {
        self.shared.token.cancel();
    }
}

impl Shared {
    /// Wrap a handler as a backend callback that re-enters the dispatcher first.
    fn bind<T: 'static>(self: &Rc<Self>, handler: fn(&Rc<Shared>, T)) -> Box<dyn FnOnce(T)> {
        let weak = Rc::downgrade(self);
        let token = self.token.clone();
        let dispatcher = Rc::clone(&self.dispatcher);
        Box::new(move |value| {
            dispatcher.post(Box::new(move || run_if_alive(&weak, &token, |s| handler(s, value))));
        })
    }

    fn post(self: &Rc<Self>, handler: fn(&Rc<Shared>)) {
        let weak = Rc::downgrade(self);
        let token = self.token.clone();
        self.dispatcher
            .post(Box::new(move || run_if_alive(&weak, &token, handler)));
    }

    fn on_headers(self: &Rc<Self>, mut result: LookupResult) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != FilterState::LookupInProgress || inner.lookup_resolved {
            return;
        }
        inner.lookup_resolved = true;
        let headers = match (result.status, result.headers.take()) {
            (CacheEntryStatus::Miss, _) | (_, None) => {
                debug!("cache miss");
                drop(inner);
                self.callbacks.resume_decoding(HeaderMap::new());
                return;
            }
            (_, Some(headers)) => headers,
        };

        if result.status == CacheEntryStatus::RequiresValidation {
            let conditional = headers::conditional_headers(&Validators::from_headers(&headers));
            debug!(
                conditional_headers = conditional.len(),
                "cached response requires validation"
            );
            inner.cached = Some(CachedResponse {
                headers,
                content_length: result.content_length,
            });
            inner.state = FilterState::Validating;
            drop(inner);
            self.callbacks.resume_decoding(conditional);
            return;
        }

        inner.state = FilterState::ServingFromCache;
        drop(inner);
        let now = self.time_source.system_time();
        let age = result
            .response_time
            .and_then(|t| now.duration_since(t).ok())
            .unwrap_or_default();
        let range = if self.cache.cache_info().supports_range_requests {
            result.range
        } else {
            RangeResolution::Full
        };
        let (parts, body) =
            headers::hit_response(headers, result.content_length, &range, age);
        debug!(status = %parts.status, age = age.as_secs(), "serving from cache");
        let end_stream = body.is_empty();
        self.callbacks.encode_headers(parts, end_stream);
        if !end_stream {
            self.start_delivery(DeliveryMode::Encode, &body);
        }
    }

    fn on_response_headers(
        self: &Rc<Self>,
        response: &mut response::Parts,
        end_stream: bool,
    ) -> FilterHeadersStatus {
        let mut inner = self.inner.borrow_mut();
        let state = inner.state;
        match state {
            FilterState::LookupInProgress if !inner.lookup_resolved => {
                // A local reply overtook the lookup.
                debug!("response before cache lookup finished, bypassing cache");
                inner.state = FilterState::PassThrough;
                inner.lookup = None;
                return FilterHeadersStatus::Continue;
            }
            FilterState::Validating if response.status == StatusCode::NOT_MODIFIED => {
                let Some(cached) = inner.cached.take() else {
                    return FilterHeadersStatus::Continue;
                };
                let merged = headers::merge_not_modified(
                    &cached.headers,
                    &response.headers,
                    cached.content_length,
                );
                if self.cache.cache_info().supports_header_updates {
                    if let Some(lookup) = inner.lookup.as_deref() {
                        self.cache.update_headers(lookup, &merged);
                    }
                }
                response.status = StatusCode::OK;
                response.headers = merged;
                inner.state = FilterState::ServingFromCache;
                debug!(len = cached.content_length, "validated, replaying cached body");
                if cached.content_length == 0 {
                    return FilterHeadersStatus::Continue;
                }
                drop(inner);
                let body = [AdjustedByteRange::new(0, cached.content_length - 1)];
                self.start_delivery(DeliveryMode::Inject, &body);
                return FilterHeadersStatus::ContinueAndDontEndStream;
            }
            FilterState::LookupInProgress | FilterState::Validating => {}
            _ => return FilterHeadersStatus::Continue,
        }

        inner.cached = None;
        let Some(lookup) = inner.lookup.take() else {
            inner.state = FilterState::PassThrough;
            return FilterHeadersStatus::Continue;
        };
        if !headers::is_cacheable_response(response) {
            debug!(status = %response.status, "response not cacheable");
            inner.state = FilterState::PassThrough;
            return FilterHeadersStatus::Continue;
        }
        let mut insert = self.cache.make_insert_context(lookup);
        insert.insert_headers(&response.headers, end_stream);
        inner.state = FilterState::Inserting;
        if !end_stream {
            inner.insert = Some(insert);
        }
        debug!(status = %response.status, end_stream, "inserting response into cache");
        FilterHeadersStatus::Continue
    }

    fn on_response_data(self: &Rc<Self>, data: &Bytes, end_stream: bool) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != FilterState::Inserting || inner.insert.is_none() {
            return;
        }
        if inner.awaiting_ready {
            trace!(len = data.len(), end_stream, "backend busy, holding body chunk");
            inner.insert_backlog.push_back((data.clone(), end_stream));
            return;
        }
        self.insert_chunk(&mut inner, data.clone(), end_stream);
    }

    /// Hand one chunk to the backend. Only called while no ready callback is outstanding.
    fn insert_chunk(self: &Rc<Self>, inner: &mut Inner, chunk: Bytes, end_stream: bool) {
        let Some(insert) = inner.insert.as_mut() else {
            return;
        };
        let ready = (!end_stream).then(|| self.bind(Shared::on_insert_ready));
        insert.insert_body(chunk, ready, end_stream);
        if end_stream {
            inner.insert = None;
            inner.insert_backlog.clear();
        } else {
            inner.awaiting_ready = true;
        }
    }

    fn on_insert_ready(self: &Rc<Self>, ready: bool) {
        let mut inner = self.inner.borrow_mut();
        inner.awaiting_ready = false;
        if !ready {
            inner.insert_backlog.clear();
            if inner.insert.take().is_some() {
                warn!("cache aborted insertion");
            }
            return;
        }
        if let Some((chunk, end_stream)) = inner.insert_backlog.pop_front() {
            self.insert_chunk(&mut inner, chunk, end_stream);
        }
    }

    fn start_delivery(self: &Rc<Self>, mode: DeliveryMode, body: &[AdjustedByteRange]) {
        let limit = self.callbacks.buffer_limit();
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != FilterState::ServingFromCache {
                return;
            }
            inner.delivery = Some(BodyDelivery::new(mode, body, limit));
        }
        self.fetch_next_chunk();
    }

    fn fetch_next_chunk(self: &Rc<Self>) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != FilterState::ServingFromCache {
            return;
        }
        let blocked = inner.watermarks.is_blocked();
        let Inner {
            delivery, lookup, ..
        } = &mut *inner;
        let (Some(delivery), Some(lookup)) = (delivery.as_mut(), lookup.as_mut()) else {
            return;
        };
        if blocked {
            trace!("downstream backed up, pausing body delivery");
            delivery.paused = true;
            return;
        }
        if let Some(range) = delivery.next_range() {
            lookup.get_body(&range, self.bind(Shared::on_body));
        }
    }

    fn on_body(self: &Rc<Self>, body: Option<Bytes>) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != FilterState::ServingFromCache {
            return;
        }
        let blocked = inner.watermarks.is_blocked();
        let Some(delivery) = inner.delivery.as_mut() else {
            return;
        };
        let Some(chunk) = body else {
            warn!("cache failed to return body, resetting stream");
            drop(inner);
            self.callbacks.reset_stream();
            return;
        };
        let end_stream = match delivery.accept(chunk.len() as u64) {
            Ok(end_stream) => end_stream,
            Err(oversized) => {
                warn!(
                    expected = oversized.expected,
                    received = oversized.received,
                    "oversized body chunk from cache, resetting stream"
                );
                drop(inner);
                self.callbacks.reset_stream();
                return;
            }
        };
        if blocked {
            trace!(len = chunk.len(), "downstream backed up, holding chunk");
            delivery.pending = Some((chunk, end_stream));
            delivery.paused = true;
            return;
        }
        let mode = delivery.mode;
        drop(inner);
        self.deliver(mode, chunk, end_stream);
    }

    fn resume_delivery(self: &Rc<Self>) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != FilterState::ServingFromCache {
            return;
        }
        let blocked = inner.watermarks.is_blocked();
        let Some(delivery) = inner.delivery.as_mut() else {
            return;
        };
        if blocked {
            delivery.paused = true;
            return;
        }
        let mode = delivery.mode;
        let pending = delivery.pending.take();
        drop(inner);
        match pending {
            Some((chunk, end_stream)) => self.deliver(mode, chunk, end_stream),
            None => self.fetch_next_chunk(),
        }
    }

    fn deliver(self: &Rc<Self>, mode: DeliveryMode, chunk: Bytes, end_stream: bool) {
        trace!(len = chunk.len(), end_stream, "delivering cached body chunk");
        match mode {
            DeliveryMode::Encode => self.callbacks.encode_data(chunk, end_stream),
            DeliveryMode::Inject => self.callbacks.inject_encoded_data(chunk, end_stream),
        }
        if end_stream {
            let mut inner = self.inner.borrow_mut();
            inner.delivery = None;
            inner.lookup = None;
            return;
        }
        self.fetch_next_chunk();
    }
}

fn run_if_alive(weak: &Weak<Shared>, token: &CancelToken, handler: impl FnOnce(&Rc<Shared>)) {
    if token.is_cancelled() {
        trace!("dropping task for destroyed cache filter");
        return;
    }
    if let Some(shared) = weak.upgrade() {
        handler(&shared);
    }
}
