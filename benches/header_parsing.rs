//! Benchmarks for request/response header parsing
//!
//! This benchmark measures:
//! - Range header parsing across range counts
//! - Cache-Control max-age extraction
//! - HTTP-date parsing in all three formats

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use http::HeaderValue;
use proxy_http_cache::freshness::{effective_max_age, http_time};
use proxy_http_cache::range::RangeParser;

const CACHE_CONTROLS: [&str; 4] = [
    "max-age=3600",
    "public, max-age=60",
    "no-transform, s-maxage=120, max-age=30, must-revalidate",
    "private=\"set-cookie, x-session\", max-age=600",
];

const HTTP_DATES: [(&str, &str); 3] = [
    ("imf_fixdate", "Sun, 06 Nov 1994 08:49:37 GMT"),
    ("rfc850", "Sunday, 06-Nov-94 08:49:37 GMT"),
    ("asctime", "Sun Nov  6 08:49:37 1994"),
];

fn range_header(count: usize) -> String {
    let specs: Vec<String> = (0..count).map(|i| format!("{}-{}", i * 10, i * 10 + 9)).collect();
    format!("bytes={}", specs.join(","))
}

fn bench_range_parsing(c: &mut Criterion) {
    let parser = RangeParser::new().with_max_header_len(None);
    let mut group = c.benchmark_group("range_parsing");

    for count in [1usize, 4, 16] {
        let header = range_header(count);
        group.throughput(Throughput::Bytes(header.len() as u64));
        group.bench_with_input(BenchmarkId::new("ranges", count), &header, |b, header| {
            b.iter(|| black_box(parser.parse("bytes", black_box(header))))
        });
    }

    group.bench_function("suffix", |b| {
        b.iter(|| black_box(parser.parse("bytes", black_box("bytes=-500"))))
    });

    group.finish();
}

fn bench_freshness(c: &mut Criterion) {
    let mut group = c.benchmark_group("freshness");

    for (i, cache_control) in CACHE_CONTROLS.iter().enumerate() {
        group.bench_with_input(
            BenchmarkId::new("effective_max_age", i),
            cache_control,
            |b, cc| b.iter(|| black_box(effective_max_age(black_box(cc)))),
        );
    }

    for (name, date) in HTTP_DATES {
        let value = HeaderValue::from_static(date);
        group.bench_with_input(BenchmarkId::new("http_time", name), &value, |b, value| {
            b.iter(|| black_box(http_time(Some(black_box(value)))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_range_parsing, bench_freshness);
criterion_main!(benches);
