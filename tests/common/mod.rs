//! Shared harness for filter scenario tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::{request, response, HeaderMap, Request, Response, StatusCode};
use proxy_http_cache::dispatcher::TaskQueue;
use proxy_http_cache::filter::{
    CacheFilter, CacheFilterFactory, FilterCallbacks, FilterDataStatus, FilterHeadersStatus,
};
use proxy_http_cache::freshness::format_http_time;
use proxy_http_cache::time::{SimulatedTimeSource, TimeSource};
use proxy_http_cache::SimpleHttpCache;

pub const DEFAULT_BUFFER_LIMIT: u64 = 1024;

/// Route filter logs to the test writer; set `RUST_LOG=proxy_http_cache=trace` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ResumeDecoding(HeaderMap),
    Headers {
        status: StatusCode,
        headers: HeaderMap,
        end_stream: bool,
    },
    Data {
        data: Bytes,
        end_stream: bool,
    },
    Injected {
        data: Bytes,
        end_stream: bool,
    },
    Reset,
}

/// Records every call the filter makes on its host.
pub struct RecordingCallbacks {
    events: RefCell<Vec<Event>>,
    buffer_limit: Cell<u64>,
}

impl RecordingCallbacks {
    pub fn new(buffer_limit: u64) -> Self {
        Self {
            events: RefCell::new(Vec::new()),
            buffer_limit: Cell::new(buffer_limit),
        }
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }
}

impl FilterCallbacks for RecordingCallbacks {
    fn resume_decoding(&self, conditional_headers: HeaderMap) {
        self.events
            .borrow_mut()
            .push(Event::ResumeDecoding(conditional_headers));
    }

    fn encode_headers(&self, response: response::Parts, end_stream: bool) {
        self.events.borrow_mut().push(Event::Headers {
            status: response.status,
            headers: response.headers,
            end_stream,
        });
    }

    fn encode_data(&self, data: Bytes, end_stream: bool) {
        self.events
            .borrow_mut()
            .push(Event::Data { data, end_stream });
    }

    fn inject_encoded_data(&self, data: Bytes, end_stream: bool) {
        self.events
            .borrow_mut()
            .push(Event::Injected { data, end_stream });
    }

    fn buffer_limit(&self) -> u64 {
        self.buffer_limit.get()
    }

    fn reset_stream(&self) {
        self.events.borrow_mut().push(Event::Reset);
    }
}

/// One cache, one simulated clock, one connection's task queue.
pub struct Harness {
    pub cache: SimpleHttpCache,
    pub clock: Arc<SimulatedTimeSource>,
    pub factory: CacheFilterFactory,
    pub queue: TaskQueue,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let cache = SimpleHttpCache::new();
        let clock = Arc::new(SimulatedTimeSource::new(
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000),
        ));
        let factory = CacheFilterFactory::new(Arc::new(cache.clone()))
            .with_time_source(Arc::clone(&clock) as Arc<dyn TimeSource>);
        Self {
            cache,
            clock,
            factory,
            queue: TaskQueue::new(),
        }
    }

    pub fn filter(&self) -> (CacheFilter, Rc<RecordingCallbacks>) {
        self.filter_with_limit(DEFAULT_BUFFER_LIMIT)
    }

    pub fn filter_with_limit(&self, buffer_limit: u64) -> (CacheFilter, Rc<RecordingCallbacks>) {
        let callbacks = Rc::new(RecordingCallbacks::new(buffer_limit));
        let filter = self
            .factory
            .create_filter(Rc::new(self.queue.clone()), callbacks.clone());
        (filter, callbacks)
    }

    pub fn now_http_date(&self) -> String {
        format_http_time(self.clock.system_time())
    }

    pub fn advance(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }

    /// Run a request through a fresh filter as a miss and store `body` with `headers`.
    pub fn store(&self, path: &str, headers: &[(&str, &str)], body: &str) {
        let (filter, callbacks) = self.filter();
        let request = get(path, &[]);
        assert_eq!(
            filter.decode_headers(&request, true),
            FilterHeadersStatus::StopIteration
        );
        self.queue.run_until_idle();
        assert!(matches!(callbacks.take()[..], [Event::ResumeDecoding(_)]));

        let mut response = self.response(200, headers);
        assert_eq!(
            filter.encode_headers(&mut response, body.is_empty()),
            FilterHeadersStatus::Continue
        );
        if !body.is_empty() {
            assert_eq!(
                filter.encode_data(&Bytes::copy_from_slice(body.as_bytes()), true),
                FilterDataStatus::Continue
            );
        }
        filter.on_destroy();
    }

    /// A response stamped with the current simulated date.
    pub fn response(&self, status: u16, headers: &[(&str, &str)]) -> response::Parts {
        let mut builder = Response::builder()
            .status(status)
            .header("date", self.now_http_date());
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }
}

/// A cacheable GET for `path` with extra headers.
pub fn get(path: &str, headers: &[(&str, &str)]) -> request::Parts {
    let mut builder = Request::get(path)
        .header("host", "cache.example.com")
        .header("x-forwarded-proto", "https");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(()).unwrap().into_parts().0
}

/// Concatenate data events, asserting only the last one ends the stream.
pub fn collect_body(events: &[Event]) -> (Vec<usize>, Bytes) {
    let mut sizes = Vec::new();
    let mut body = Vec::new();
    for (i, event) in events.iter().enumerate() {
        let (data, end_stream) = match event {
            Event::Data { data, end_stream } | Event::Injected { data, end_stream } => {
                (data, *end_stream)
            }
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(end_stream, i + 1 == events.len(), "end_stream on chunk {}", i);
        sizes.push(data.len());
        body.extend_from_slice(data);
    }
    (sizes, Bytes::from(body))
}
