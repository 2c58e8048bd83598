//! Request and response header policy: cacheability checks and synthesized headers.

use std::time::Duration;

use http::header::{
    HeaderMap, HeaderName, HeaderValue, AGE, AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH,
    CONTENT_RANGE, EXPIRES, IF_MODIFIED_SINCE, IF_NONE_MATCH, TRANSFER_ENCODING, VARY,
};
use http::{request, response, Method, Response, StatusCode};

use crate::cache::{AdjustedByteRange, CacheKey, RangeResolution, Validators};
use crate::freshness::has_directive;

/// Headers describing message framing; a 304 never overrides them.
const FRAMING_HEADERS: [HeaderName; 3] = [CONTENT_LENGTH, CONTENT_RANGE, TRANSFER_ENCODING];

fn cache_control(headers: &HeaderMap) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    (!values.is_empty()).then(|| values.join(", "))
}

/// The cache key of a request that may be served from cache, or `None` if it must bypass.
///
/// Only bodiless GETs over http or https with a known host qualify; `Authorization` and
/// `Cache-Control: no-store` also force a bypass.
pub(crate) fn cacheable_request_key(parts: &request::Parts, end_stream: bool) -> Option<CacheKey> {
    if parts.method != Method::GET || !end_stream {
        return None;
    }
    if parts.headers.contains_key(AUTHORIZATION) {
        return None;
    }
    if cache_control(&parts.headers).is_some_and(|cc| has_directive(&cc, "no-store")) {
        return None;
    }
    let key = CacheKey::from_request(parts)?;
    matches!(key.scheme.as_str(), "http" | "https").then_some(key)
}

/// Whether an upstream response may be stored.
pub(crate) fn is_cacheable_response(parts: &response::Parts) -> bool {
    if parts.status != StatusCode::OK || parts.headers.contains_key(VARY) {
        return false;
    }
    match cache_control(&parts.headers) {
        Some(cc) => !has_directive(&cc, "no-store") && !has_directive(&cc, "private"),
        None => parts.headers.contains_key(EXPIRES),
    }
}

/// Conditional headers for revalidating a stored response.
///
/// The entity-tag wins when present; otherwise `If-Modified-Since` is taken from
/// Last-Modified, falling back to Date.
pub(crate) fn conditional_headers(validators: &Validators) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(ref etag) = validators.etag {
        headers.insert(IF_NONE_MATCH, etag.clone());
    } else if let Some(since) = validators.modified_since() {
        headers.insert(IF_MODIFIED_SINCE, since.clone());
    }
    headers
}

/// Stored headers refreshed by a 304: every 304 header wins except framing headers.
pub(crate) fn merge_not_modified(
    cached: &HeaderMap,
    not_modified: &HeaderMap,
    content_length: u64,
) -> HeaderMap {
    let mut merged = cached.clone();
    for name in not_modified.keys() {
        if FRAMING_HEADERS.contains(name) {
            continue;
        }
        merged.remove(name);
        for value in not_modified.get_all(name) {
            merged.append(name.clone(), value.clone());
        }
    }
    merged.insert(CONTENT_LENGTH, HeaderValue::from(content_length));
    merged
}

/// Response parts and body windows for serving a fresh stored response.
///
/// One satisfiable range yields a 206; several fall back to the full body since multipart
/// bodies aren't produced; an unsatisfiable set yields an empty 416.
pub(crate) fn hit_response(
    mut headers: HeaderMap,
    content_length: u64,
    range: &RangeResolution,
    age: Duration,
) -> (response::Parts, Vec<AdjustedByteRange>) {
    headers.insert(AGE, HeaderValue::from(age.as_secs()));
    let full_body = || {
        if content_length == 0 {
            Vec::new()
        } else {
            vec![AdjustedByteRange::new(0, content_length - 1)]
        }
    };

    let (status, body) = match range {
        RangeResolution::Satisfiable(ranges) if ranges.len() == 1 => {
            let r = ranges[0];
            set_content_range(
                &mut headers,
                format!("bytes {}-{}/{}", r.first_byte_pos(), r.last_byte_pos(), content_length),
            );
            (StatusCode::PARTIAL_CONTENT, vec![r])
        }
        RangeResolution::Unsatisfiable => {
            set_content_range(&mut headers, format!("bytes */{}", content_length));
            (StatusCode::RANGE_NOT_SATISFIABLE, Vec::new())
        }
        RangeResolution::Full | RangeResolution::Satisfiable(_) => (StatusCode::OK, full_body()),
    };
    let body_len: u64 = body.iter().map(AdjustedByteRange::length).sum();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body_len));

    let (mut parts, ()) = Response::new(()).into_parts();
    parts.status = status;
    parts.headers = headers;
    (parts, body)
}

fn set_content_range(headers: &mut HeaderMap, value: String) {
    if let Ok(value) = HeaderValue::try_from(value) {
        headers.insert(CONTENT_RANGE, value);
    }
}
