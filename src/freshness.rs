//! Cache-Control and HTTP-date evaluation (RFC 7234 §5.2, RFC 7231 §7.1.1.1).
//!
//! ```text
//! Cache-Control   = 1#cache-directive
//! cache-directive = token [ "=" ( token / quoted-string ) ]
//! ```
//!
//! Overflow and garbage are handled asymmetrically: a max-age that overflows saturates to
//! [`Duration::MAX`], while non-numeric text after a value forces a zero max-age so the
//! response is always validated.

use std::time::{Duration, SystemTime};

use http::HeaderValue;

/// True for `tchar` as defined by RFC 7230 §3.2.6.
fn is_tchar(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'#'
            | b'$'
            | b'%'
            | b'&'
            | b'\''
            | b'*'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~'
    ) || b.is_ascii_alphanumeric()
}

/// Remove a leading token; `None` if the input doesn't start with one.
fn eat_token(s: &str) -> Option<&str> {
    let end = s.bytes().position(|b| !is_tchar(b)).unwrap_or(s.len());
    (end > 0).then(|| &s[end..])
}

/// Remove a leading quoted-string; `None` if it is unterminated.
fn eat_quoted_string(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(&s[i + 1..]),
            _ => i += 1,
        }
    }
    None
}

/// Remove a directive argument (token or quoted-string), if present.
fn eat_directive_argument(s: &str) -> Option<&str> {
    if s.starts_with('"') {
        eat_quoted_string(s)
    } else {
        Some(eat_token(s).unwrap_or(s))
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn trim_ows(s: &str) -> &str {
    s.trim_start_matches(|c: char| c == ' ' || c == '\t')
}

/// Read a delta-seconds value. `None` means the value is malformed.
///
/// Values beyond `i64::MAX` seconds (including ones overflowing 64 bits) saturate to
/// [`Duration::MAX`].
fn eat_leading_duration(s: &str) -> (Option<Duration>, &str) {
    let end = s.bytes().position(|b| !b.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return (None, s);
    }
    let (digits, rest) = s.split_at(end);
    let duration = match digits.parse::<u64>() {
        Ok(n) if n <= i64::MAX as u64 => Duration::from_secs(n),
        _ => Duration::MAX,
    };
    let rest = trim_ows(rest);
    if rest.is_empty() || rest.starts_with(',') {
        (Some(duration), rest)
    } else {
        (None, rest)
    }
}

/// Effective max-age of a response given its Cache-Control value.
///
/// A zero result means the response must be validated before it is served.
/// `s-maxage` takes precedence over `max-age` regardless of order, and a bare
/// `no-cache` short-circuits to zero.
pub fn effective_max_age(cache_control: &str) -> Duration {
    let mut s = trim_ows(cache_control);
    let mut max_age = Duration::ZERO;
    let mut found_s_maxage = false;

    while !s.is_empty() {
        // Each branch consumes exactly one directive or returns.
        if let Some(rest) = strip_prefix_ignore_case(s, "no-cache") {
            if rest.starts_with('=') {
                // no-cache="field" only restricts the listed fields.
                match skip_argument(rest) {
                    Some(rest) => s = rest,
                    None => return Duration::ZERO,
                }
            } else if let Some(rest) = eat_token(rest) {
                // A longer token that merely starts with "no-cache".
                match skip_argument(rest) {
                    Some(rest) => s = rest,
                    None => return Duration::ZERO,
                }
            } else {
                return Duration::ZERO;
            }
        } else if let Some(rest) = strip_prefix_ignore_case(s, "s-maxage=") {
            let (duration, rest) = eat_leading_duration(rest);
            match duration {
                Some(duration) => max_age = duration,
                None => return Duration::ZERO,
            }
            found_s_maxage = true;
            s = rest;
        } else if let Some(rest) =
            strip_prefix_ignore_case(s, "max-age=").filter(|_| !found_s_maxage)
        {
            let (duration, rest) = eat_leading_duration(rest);
            match duration {
                Some(duration) => max_age = duration,
                None => return Duration::ZERO,
            }
            s = rest;
        } else if let Some(rest) = eat_token(s) {
            // Unknown directive (or max-age after s-maxage): skip it.
            match skip_argument(rest) {
                Some(rest) => s = rest,
                None => return Duration::ZERO,
            }
        } else {
            // Directive starts with illegal characters.
            return Duration::ZERO;
        }

        s = trim_ows(s);
        s = trim_ows(s.strip_prefix(',').unwrap_or(s));
    }
    max_age
}

/// Skip an optional `=argument` following a directive name.
fn skip_argument(s: &str) -> Option<&str> {
    match s.strip_prefix('=') {
        Some(arg) => eat_directive_argument(arg),
        None => Some(s),
    }
}

/// Whether a Cache-Control value carries the named directive (with or without argument).
pub fn has_directive(cache_control: &str, name: &str) -> bool {
    let mut s = trim_ows(cache_control);
    while !s.is_empty() {
        let Some(rest) = eat_token(s) else {
            return false;
        };
        if s[..s.len() - rest.len()].eq_ignore_ascii_case(name) {
            return true;
        }
        let Some(rest) = skip_argument(rest) else {
            return false;
        };
        s = rest;
        s = trim_ows(s);
        s = trim_ows(s.strip_prefix(',').unwrap_or(s));
    }
    false
}

/// Parse an HTTP date header.
///
/// Accepts, in order, IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`), the obsolete
/// RFC 850 form (`Sunday, 06-Nov-94 08:49:37 GMT`) and ANSI C asctime
/// (`Sun Nov  6 08:49:37 1994`). Missing or unparseable values are `None`, as are dates
/// whose weekday does not match and dates before 1970.
pub fn http_time(value: Option<&HeaderValue>) -> Option<SystemTime> {
    let value = value?.to_str().ok()?;
    httpdate::parse_http_date(value.trim()).ok()
}

/// Format a timestamp as an IMF-fixdate.
pub fn format_http_time(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}
