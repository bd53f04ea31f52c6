use mmap_httpd::buffer::Buffer;
use std::io::Cursor;

#[test]
fn test_buffer_creation() {
    let buffer = Buffer::new(1024);
    assert_eq!(buffer.capacity(), 1024);
    assert_eq!(buffer.len(), 0);
    assert!(buffer.is_empty());
    assert_eq!(buffer.remaining_capacity(), 1024);
}

#[test]
fn test_buffer_append() {
    let mut buffer = Buffer::new(1024);
    let data = b"Hello, World!";

    assert!(buffer.append(data));
    assert_eq!(buffer.len(), data.len());
    assert_eq!(buffer.remaining_capacity(), 1024 - data.len());
    assert_eq!(buffer.slice(), data);
}

#[test]
fn test_buffer_append_fails_closed() {
    let mut buffer = Buffer::new(8);
    assert!(buffer.append(b"12345"));
    assert!(!buffer.append(b"6789"));
    assert_eq!(buffer.slice(), b"12345");

    assert!(buffer.append(b"678"));
    assert!(buffer.is_full());
    assert!(!buffer.append(b"9"));
}

#[test]
fn test_buffer_append_fmt() {
    let mut buffer = Buffer::new(64);
    assert!(buffer.append_fmt(format_args!("Content-Length: {}\r\n", 42)));
    assert_eq!(buffer.slice(), b"Content-Length: 42\r\n");
}

#[test]
fn test_buffer_append_fmt_overflow_keeps_length() {
    let mut buffer = Buffer::new(16);
    assert!(buffer.append(b"HTTP/1.1 "));
    let before = buffer.len();

    assert!(!buffer.append_fmt(format_args!("{} {}\r\n", 404, "Not Found")));
    assert_eq!(buffer.len(), before);
    assert_eq!(buffer.slice(), b"HTTP/1.1 ");
}

#[test]
fn test_buffer_read_from() {
    let mut buffer = Buffer::new(1024);
    let data = b"Hello, World!";
    let mut cursor = Cursor::new(data);

    let bytes_read = buffer.read_from(&mut cursor).unwrap();
    assert_eq!(bytes_read, data.len());
    assert_eq!(buffer.len(), data.len());
    assert_eq!(buffer.slice(), data);
}

#[test]
fn test_buffer_read_from_stops_at_capacity() {
    let mut buffer = Buffer::new(4);
    let mut cursor = Cursor::new(b"abcdefgh".to_vec());

    assert_eq!(buffer.read_from(&mut cursor).unwrap(), 4);
    assert!(buffer.is_full());
    assert_eq!(buffer.read_from(&mut cursor).unwrap(), 0);
    assert_eq!(buffer.slice(), b"abcd");
}

#[test]
fn test_buffer_clear() {
    let mut buffer = Buffer::new(32);
    buffer.append(b"GET / HTTP/1.1\r\n");
    buffer.clear();

    assert!(buffer.is_empty());
    assert_eq!(buffer.remaining_capacity(), 32);
    assert_eq!(buffer.slice(), b"");
}
