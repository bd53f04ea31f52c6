use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mmap_httpd::buffer::Buffer;
use mmap_httpd::http::{push_error_response, push_response_head, RequestParser, Status};

const SIMPLE_REQUEST: &[u8] = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";

const BROWSER_REQUEST: &[u8] = b"GET http://example.com/assets/app.html HTTP/1.1\r\n\
Host: example.com\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/118.0\r\n\
Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n\
Accept-Language: en-US,en;q=0.5\r\n\
Accept-Encoding: gzip, deflate, br\r\n\
Connection: keep-alive\r\n\
Upgrade-Insecure-Requests: 1\r\n\
\r\n";

fn benchmark_request_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("http_parser");

    group.bench_function("parse_simple_get", |b| {
        let mut parser = RequestParser::new();
        b.iter(|| {
            parser.reset();
            black_box(parser.parse(black_box(SIMPLE_REQUEST)))
        })
    });

    group.bench_function("parse_browser_get", |b| {
        let mut parser = RequestParser::new();
        b.iter(|| {
            parser.reset();
            black_box(parser.parse(black_box(BROWSER_REQUEST)))
        })
    });

    group.bench_function("parse_byte_at_a_time", |b| {
        let mut parser = RequestParser::new();
        b.iter(|| {
            parser.reset();
            let mut code = None;
            for filled in 1..=BROWSER_REQUEST.len() {
                code = Some(parser.parse(&BROWSER_REQUEST[..filled]));
            }
            black_box(code)
        })
    });

    group.finish();
}

fn benchmark_response_formatting(c: &mut Criterion) {
    let mut group = c.benchmark_group("response");

    group.bench_function("file_response_head", |b| {
        let mut buf = Buffer::new(2048);
        b.iter(|| {
            buf.clear();
            black_box(push_response_head(&mut buf, Status::Ok, black_box(1_048_576), true))
        })
    });

    group.bench_function("canned_404", |b| {
        let mut buf = Buffer::new(2048);
        b.iter(|| {
            buf.clear();
            black_box(push_error_response(&mut buf, Status::NotFound, false))
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_request_parsing, benchmark_response_formatting);
criterion_main!(benches);
