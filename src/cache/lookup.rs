//! Lookup requests and results exchanged with a storage backend.

use std::time::SystemTime;

use http::header::{HeaderMap, CACHE_CONTROL, DATE, ETAG, EXPIRES, LAST_MODIFIED, PRAGMA};
use http::HeaderValue;

use super::key::CacheKey;
use crate::freshness::{effective_max_age, has_directive, http_time};
use crate::range::RawByteRange;

/// Outcome of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEntryStatus {
    /// Nothing usable is stored under the key.
    Miss,
    /// A fresh entry that may be served without contacting the origin.
    Hit,
    /// An entry exists but must be revalidated upstream before use.
    RequiresValidation,
}

/// A byte range resolved against a concrete body length: inclusive `[first, last]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustedByteRange {
    first: u64,
    last: u64,
}

impl AdjustedByteRange {
    /// # Panics
    ///
    /// Panics if `first > last`.
    pub fn new(first: u64, last: u64) -> Self {
        assert!(first <= last, "illegal byte range {}-{}", first, last);
        Self { first, last }
    }

    pub fn first_byte_pos(&self) -> u64 {
        self.first
    }

    pub fn last_byte_pos(&self) -> u64 {
        self.last
    }

    pub fn length(&self) -> u64 {
        self.last - self.first + 1
    }

    /// Drop `n` bytes from the front of the window.
    ///
    /// # Panics
    ///
    /// Panics unless `n` is smaller than the current length.
    pub fn trim_front(&mut self, n: u64) {
        assert!(n < self.length(), "attempt to trim too much from range");
        self.first += n;
    }
}

/// How the requested ranges map onto a stored body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeResolution {
    /// No usable range request: serve the whole body.
    Full,
    /// At least one requested range overlaps the body.
    Satisfiable(Vec<AdjustedByteRange>),
    /// Ranges were requested but none overlap the body.
    Unsatisfiable,
}

/// Validators of a stored response, used to build conditional request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<HeaderValue>,
    pub last_modified: Option<HeaderValue>,
    pub date: Option<HeaderValue>,
}

impl Validators {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            etag: headers.get(ETAG).cloned(),
            last_modified: headers.get(LAST_MODIFIED).cloned(),
            date: headers.get(DATE).cloned(),
        }
    }

    /// Value for `If-Modified-Since`: Last-Modified when it parses, otherwise Date.
    pub fn modified_since(&self) -> Option<&HeaderValue> {
        match self.last_modified {
            Some(ref value) if http_time(Some(value)).is_some() => Some(value),
            _ => self.date.as_ref().filter(|v| http_time(Some(v)).is_some()),
        }
    }
}

/// Result of `LookupContext::get_headers`.
#[derive(Debug, Clone)]
pub struct LookupResult {
    pub status: CacheEntryStatus,
    /// Stored response headers; present for `Hit` and `RequiresValidation`.
    pub headers: Option<HeaderMap>,
    pub content_length: u64,
    /// When the stored response was received, for computing `Age`.
    pub response_time: Option<SystemTime>,
    pub range: RangeResolution,
}

impl LookupResult {
    pub fn miss() -> Self {
        Self {
            status: CacheEntryStatus::Miss,
            headers: None,
            content_length: 0,
            response_time: None,
            range: RangeResolution::Full,
        }
    }
}

/// Everything a backend needs to answer one lookup. Immutable once built.
#[derive(Debug, Clone)]
pub struct LookupRequest {
    key: CacheKey,
    ranges: Vec<RawByteRange>,
    timestamp: SystemTime,
    requires_validation: bool,
}

impl LookupRequest {
    /// Build a lookup for `key` at `timestamp` with the parsed request ranges.
    ///
    /// Request `Cache-Control: no-cache` or `max-age=0`, or `Pragma: no-cache` when the
    /// request has no Cache-Control, force any stored entry to be revalidated.
    pub fn new(
        key: CacheKey,
        request_headers: &HeaderMap,
        ranges: Vec<RawByteRange>,
        timestamp: SystemTime,
    ) -> Self {
        let requires_validation = match request_headers.get(CACHE_CONTROL) {
            Some(value) => value.to_str().map_or(false, |cc| {
                has_directive(cc, "no-cache") || cc_has_zero_max_age(cc)
            }),
            None => request_headers
                .get_all(PRAGMA)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .any(|p| has_directive(p, "no-cache")),
        };
        Self {
            key,
            ranges,
            timestamp,
            requires_validation,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn ranges(&self) -> &[RawByteRange] {
        &self.ranges
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Evaluate a stored response against this request.
    pub fn make_lookup_result(
        &self,
        headers: HeaderMap,
        content_length: u64,
        response_time: SystemTime,
    ) -> LookupResult {
        let status = if self.requires_validation || !self.is_fresh(&headers) {
            CacheEntryStatus::RequiresValidation
        } else {
            CacheEntryStatus::Hit
        };
        LookupResult {
            status,
            headers: Some(headers),
            content_length,
            response_time: Some(response_time),
            range: self.adjust_byte_ranges(content_length),
        }
    }

    fn is_fresh(&self, headers: &HeaderMap) -> bool {
        if let Some(cache_control) = headers.get(CACHE_CONTROL) {
            let max_age = cache_control
                .to_str()
                .map(effective_max_age)
                .unwrap_or_default();
            return match http_time(headers.get(DATE)) {
                Some(date) => {
                    let age = self.timestamp.duration_since(date).unwrap_or_default();
                    age < max_age
                }
                None => false,
            };
        }
        match http_time(headers.get(EXPIRES)) {
            Some(expires) => self.timestamp <= expires,
            None => false,
        }
    }

    /// Resolve the requested ranges against a body of `content_length` bytes.
    pub fn adjust_byte_ranges(&self, content_length: u64) -> RangeResolution {
        if self.ranges.is_empty() {
            return RangeResolution::Full;
        }
        if content_length == 0 {
            return RangeResolution::Unsatisfiable;
        }
        let mut adjusted = Vec::with_capacity(self.ranges.len());
        for range in &self.ranges {
            match (range.first_byte_pos(), range.last_byte_pos()) {
                (Some(first), Some(last)) => {
                    if first >= content_length {
                        continue;
                    }
                    adjusted.push(AdjustedByteRange::new(first, last.min(content_length - 1)));
                }
                _ => {
                    let suffix = range.suffix_length().unwrap_or_default();
                    if suffix >= content_length {
                        // The whole body was asked for.
                        return RangeResolution::Full;
                    }
                    if suffix == 0 {
                        continue;
                    }
                    adjusted.push(AdjustedByteRange::new(
                        content_length - suffix,
                        content_length - 1,
                    ));
                }
            }
        }
        if adjusted.is_empty() {
            RangeResolution::Unsatisfiable
        } else {
            RangeResolution::Satisfiable(adjusted)
        }
    }
}

fn cc_has_zero_max_age(cache_control: &str) -> bool {
    cache_control
        .split(',')
        .map(|d| d.trim_matches(|c: char| c == ' ' || c == '\t'))
        .any(|d| d.eq_ignore_ascii_case("max-age=0"))
}
