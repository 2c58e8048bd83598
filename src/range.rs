//! Byte-range request parsing (RFC 7233 §2.1).
//!
//! ```text
//! ranges = unit "=" range *( "," range )
//! range  = first "-" last | first "-" | "-" suffix-length
//! ```
//!
//! Any grammar violation discards the whole header: callers treat an empty result as
//! "serve the full resource". Ranges are only meaningful on GET requests, so callers must
//! not invoke the parser for other methods.

use std::fmt;

use http::header::{HeaderMap, HeaderName, RANGE};
use tracing::debug;

/// Range unit used when the request carries no range-unit header.
pub const DEFAULT_RANGE_UNIT: &str = "bytes";

/// Default name of the non-standard range-unit request header.
pub const DEFAULT_RANGE_UNIT_HEADER: &str = "range-unit";

/// Historical cap on the length of a Range header value.
pub const MAX_RANGE_HEADER_LEN: usize = 100;

/// A byte range as requested by the client, before the body length is known.
///
/// Either a bounded `[first, last]` window (`first <= last`) or a suffix holding only the
/// number of trailing bytes requested. An open-ended `first-` range is bounded with
/// `last == u64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawByteRange {
    /// `None` marks a suffix range; no real byte offset maps to it.
    first: Option<u64>,
    last: u64,
}

impl RawByteRange {
    /// A bounded range. Returns `None` when `first > last`.
    pub fn new(first: u64, last: u64) -> Option<Self> {
        (first <= last).then_some(Self {
            first: Some(first),
            last,
        })
    }

    /// A range requesting the final `length` bytes of the body.
    pub fn suffix(length: u64) -> Self {
        Self {
            first: None,
            last: length,
        }
    }

    pub fn is_suffix(&self) -> bool {
        self.first.is_none()
    }

    pub fn first_byte_pos(&self) -> Option<u64> {
        self.first
    }

    pub fn last_byte_pos(&self) -> Option<u64> {
        self.first.map(|_| self.last)
    }

    pub fn suffix_length(&self) -> Option<u64> {
        match self.first {
            None => Some(self.last),
            Some(_) => None,
        }
    }
}

impl fmt::Display for RawByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first {
            None => write!(f, "-{}", self.last),
            Some(first) if self.last == u64::MAX => write!(f, "{}-", first),
            Some(first) => write!(f, "{}-{}", first, self.last),
        }
    }
}

/// Serialize ranges back into a Range header value (`unit=r1,r2,...`).
pub fn format_range_header(unit: &str, ranges: &[RawByteRange]) -> String {
    let specs: Vec<String> = ranges.iter().map(ToString::to_string).collect();
    format!("{}={}", unit, specs.join(","))
}

/// Range header parser configured with the parse limits of one filter.
#[derive(Debug, Clone)]
pub struct RangeParser {
    unit_header: HeaderName,
    max_ranges: Option<usize>,
    max_header_len: Option<usize>,
}

impl Default for RangeParser {
    fn default() -> Self {
        Self {
            unit_header: HeaderName::from_static(DEFAULT_RANGE_UNIT_HEADER),
            max_ranges: None,
            max_header_len: Some(MAX_RANGE_HEADER_LEN),
        }
    }
}

impl RangeParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of ranges accepted from one header.
    pub fn with_max_ranges(mut self, limit: Option<usize>) -> Self {
        self.max_ranges = limit;
        self
    }

    /// Cap the length of the Range header value.
    pub fn with_max_header_len(mut self, limit: Option<usize>) -> Self {
        self.max_header_len = limit;
        self
    }

    /// Name of the header carrying a non-default range unit.
    pub fn with_unit_header(mut self, name: HeaderName) -> Self {
        self.unit_header = name;
        self
    }

    /// Extract the requested ranges from request headers.
    ///
    /// More than one Range or range-unit header instance invalidates the request
    /// (RFC 7230 §3.2.2), as does a header value that is not visible ASCII.
    pub fn parse_headers(&self, headers: &HeaderMap) -> Vec<RawByteRange> {
        let mut units = headers.get_all(&self.unit_header).iter();
        let unit = match (units.next(), units.next()) {
            (None, _) => DEFAULT_RANGE_UNIT,
            (Some(value), None) => match value.to_str() {
                Ok(unit) => unit,
                Err(_) => return Vec::new(),
            },
            (Some(_), Some(_)) => {
                debug!("multiple range-unit headers, ignoring range request");
                return Vec::new();
            }
        };

        let mut values = headers.get_all(RANGE).iter();
        let value = match (values.next(), values.next()) {
            (Some(value), None) => value,
            (None, _) => return Vec::new(),
            (Some(_), Some(_)) => {
                debug!("multiple range headers, ignoring range request");
                return Vec::new();
            }
        };
        match value.to_str() {
            Ok(value) => self.parse(unit, value),
            Err(_) => Vec::new(),
        }
    }

    /// Parse a Range header value given the expected unit.
    pub fn parse(&self, unit: &str, value: &str) -> Vec<RawByteRange> {
        if let Some(max) = self.max_header_len {
            if value.len() > max {
                debug!(len = value.len(), max, "range header too long, ignoring");
                return Vec::new();
            }
        }
        match self.parse_ranges(unit, value) {
            Some(ranges) => ranges,
            None => {
                debug!(value, "malformed range header, ignoring");
                Vec::new()
            }
        }
    }

    fn parse_ranges(&self, unit: &str, value: &str) -> Option<Vec<RawByteRange>> {
        if unit.is_empty() {
            return None;
        }
        let specs = value.strip_prefix(unit)?.strip_prefix('=')?;
        let mut ranges = Vec::new();
        for spec in specs.split(',') {
            if self.max_ranges.is_some_and(|max| ranges.len() >= max) {
                return None;
            }
            // List syntax allows optional whitespace around commas.
            ranges.push(parse_range_spec(spec.trim_matches(|c: char| c == ' ' || c == '\t'))?);
        }
        Some(ranges)
    }
}

fn parse_range_spec(spec: &str) -> Option<RawByteRange> {
    let (first, last) = spec.split_once('-')?;
    if first.is_empty() {
        return Some(RawByteRange::suffix(parse_digits(last)?));
    }
    let first = parse_digits(first)?;
    if last.is_empty() {
        return RawByteRange::new(first, u64::MAX);
    }
    RawByteRange::new(first, parse_digits(last)?)
}

/// Parse a non-empty run of ASCII digits; overflow is an error, not saturation.
fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    s.bytes().try_fold(0u64, |acc, b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add(u64::from(b - b'0'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn parse(value: &str) -> Vec<RawByteRange> {
        RangeParser::new().parse(DEFAULT_RANGE_UNIT, value)
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_single_bounded_range() {
        let ranges = parse("bytes=0-4");
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].first_byte_pos(), Some(0));
        assert_eq!(ranges[0].last_byte_pos(), Some(4));
        assert!(!ranges[0].is_suffix());
    }

    #[test]
    fn test_suffix_range() {
        let ranges = parse("bytes=-500");
        assert_eq!(ranges, vec![RawByteRange::suffix(500)]);
        assert_eq!(ranges[0].suffix_length(), Some(500));
        assert_eq!(ranges[0].first_byte_pos(), None);
    }

    #[test]
    fn test_open_ended_range() {
        let ranges = parse("bytes=123-");
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].first_byte_pos(), Some(123));
        assert_eq!(ranges[0].last_byte_pos(), Some(u64::MAX));
    }

    #[test]
    fn test_multiple_ranges_keep_order() {
        let ranges = parse("bytes=10-20,30-40,50-50,-1");
        assert_eq!(
            ranges,
            vec![
                RawByteRange::new(10, 20).unwrap(),
                RawByteRange::new(30, 40).unwrap(),
                RawByteRange::new(50, 50).unwrap(),
                RawByteRange::suffix(1),
            ]
        );
    }

    #[test]
    fn test_optional_whitespace_between_ranges() {
        assert_eq!(
            parse("bytes=0-1, 5-6"),
            vec![RawByteRange::new(0, 1).unwrap(), RawByteRange::new(5, 6).unwrap()]
        );
        assert_eq!(parse("bytes=0-1 ,\t-2").len(), 2);
    }

    #[test]
    fn test_malformed_headers_are_discarded() {
        for value in [
            "1-2",
            "bytes=12",
            "bytes=1-2-3",
            "bytes=--2",
            "bytes=a-2",
            "bytes=1-2,3-4a",
            "bytes=",
            "bytes=-",
            "bytes=1-2,",
            "bytes=5-4",
            "bytes 0-4",
            "bits=0-4",
            "bytes=18446744073709551616-",
            "bytes=-18446744073709551616",
        ] {
            assert!(parse(value).is_empty(), "expected {:?} to be rejected", value);
        }
    }

    #[test]
    fn test_max_u64_digits_accepted() {
        let ranges = parse("bytes=0-18446744073709551615");
        assert_eq!(ranges[0].last_byte_pos(), Some(u64::MAX));
    }

    #[test]
    fn test_range_limit() {
        let parser = RangeParser::new().with_max_ranges(Some(2));
        assert_eq!(parser.parse("bytes", "bytes=0-1,2-3").len(), 2);
        assert!(parser.parse("bytes", "bytes=0-1,2-3,4-5").is_empty());
    }

    #[test]
    fn test_header_length_cap() {
        let long = format!("bytes=0-1{}", ",2-3".repeat(30));
        assert!(long.len() > MAX_RANGE_HEADER_LEN);
        assert!(parse(&long).is_empty());
        let unlimited = RangeParser::new().with_max_header_len(None);
        assert_eq!(unlimited.parse("bytes", &long).len(), 31);
    }

    #[test]
    fn test_reparse_canonical_form() {
        let ranges = parse("bytes=0-4, 10-20,30-");
        let canonical = format_range_header(DEFAULT_RANGE_UNIT, &ranges);
        assert_eq!(canonical, "bytes=0-4,10-20,30-");
        assert_eq!(parse(&canonical), ranges);
    }

    #[test]
    fn test_illegal_bounded_range_not_constructible() {
        assert!(RawByteRange::new(5, 4).is_none());
        assert!(RawByteRange::new(4, 4).is_some());
    }

    #[test]
    fn test_parse_headers_default_unit() {
        let parser = RangeParser::new();
        let ranges = parser.parse_headers(&headers(&[("range", "bytes=0-4")]));
        assert_eq!(ranges, vec![RawByteRange::new(0, 4).unwrap()]);
        assert!(parser.parse_headers(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn test_parse_headers_custom_unit() {
        let parser = RangeParser::new();
        let map = headers(&[("range-unit", "items"), ("range", "items=1-2")]);
        assert_eq!(parser.parse_headers(&map).len(), 1);
        let map = headers(&[("range-unit", "items"), ("range", "bytes=1-2")]);
        assert!(parser.parse_headers(&map).is_empty());
    }

    #[test]
    fn test_parse_headers_duplicate_instances() {
        let parser = RangeParser::new();
        let map = headers(&[("range", "bytes=0-1"), ("range", "bytes=2-3")]);
        assert!(parser.parse_headers(&map).is_empty());
        let map = headers(&[
            ("range-unit", "bytes"),
            ("range-unit", "bytes"),
            ("range", "bytes=0-1"),
        ]);
        assert!(parser.parse_headers(&map).is_empty());
    }
}
