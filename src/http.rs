use crate::buffer::Buffer;
use log::trace;
use std::str;

/// HTTP Status Codes the server can answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 200,
    BadRequest = 400,
    Forbidden = 403,
    NotFound = 404,
    InternalServerError = 500,
    ServiceUnavailable = 503,
}

impl Status {
    /// Numeric status code
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Reason phrase written on the status line
    pub fn as_str(&self) -> &'static str {
        match *self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::InternalServerError => "Internal Error",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Canned body sent with an error status
    pub fn error_body(&self) -> Option<&'static str> {
        match *self {
            Status::Ok => None,
            Status::BadRequest => {
                Some("Your request has bad syntax or is inherently impossible to satisfy.\n")
            }
            Status::Forbidden => Some("You do not have permission to get file from this server.\n"),
            Status::NotFound => Some("The requested file was not found on this server.\n"),
            Status::InternalServerError => {
                Some("There was an unusual problem serving the requested file.\n")
            }
            Status::ServiceUnavailable => {
                Some("The server is too busy to handle your request right now.\n")
            }
        }
    }
}

/// HTTP Methods
///
/// Only `GET` is served; anything else is a bad request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
}

impl Method {
    /// Parse a method token (ASCII case-insensitive)
    pub fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("GET") {
            Some(Method::Get)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
        }
    }
}

/// Main parser state: which part of the request is being examined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    RequestLine,
    Headers,
    Body,
}

/// Result of scanning for the next CRLF-terminated line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    Complete,
    Malformed,
    Incomplete,
}

/// Outcome of parsing and resolving a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCode {
    /// More bytes are needed before anything can be decided
    NoRequest,
    /// A complete GET request was parsed
    GetRequest,
    BadRequest,
    NoResource,
    Forbidden,
    /// The target resolved to a readable regular file
    FileRequest,
    InternalError,
    /// The work queue refused the connection
    ServiceUnavailable,
}

impl HttpCode {
    /// Status line for outcomes that produce a response
    pub fn status(&self) -> Option<Status> {
        match *self {
            HttpCode::NoRequest | HttpCode::GetRequest => None,
            HttpCode::FileRequest => Some(Status::Ok),
            HttpCode::BadRequest => Some(Status::BadRequest),
            HttpCode::NoResource => Some(Status::NotFound),
            HttpCode::Forbidden => Some(Status::Forbidden),
            HttpCode::InternalError => Some(Status::InternalServerError),
            HttpCode::ServiceUnavailable => Some(Status::ServiceUnavailable),
        }
    }
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Match `name` (which includes the trailing colon) case-insensitively at the
/// start of `line` and return the value with leading blanks removed.
fn header_value<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    if line.len() < name.len() || !line[..name.len()].eq_ignore_ascii_case(name) {
        return None;
    }
    let value = &line[name.len()..];
    let skip = value.iter().take_while(|&&b| b == b' ' || b == b'\t').count();
    Some(&value[skip..])
}

/// Decimal digits only: no sign, no inner whitespace, no overflow.
fn parse_content_length(value: &[u8]) -> Option<usize> {
    let end = value.len() - value.iter().rev().take_while(|&&b| b == b' ' || b == b'\t').count();
    let digits = &value[..end];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    str::from_utf8(digits).ok()?.parse().ok()
}

/// Incremental HTTP/1.1 request parser.
///
/// The parser does not own the bytes it examines. Every call to
/// [`RequestParser::parse`] receives the whole filled region of the
/// connection's read buffer and resumes from the cursor left by the previous
/// call, so a request may arrive split at any byte boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParser {
    check_state: CheckState,
    checked_idx: usize,
    start_line: usize,
    content_length: usize,
    method: Option<Method>,
    target: String,
    host: String,
    keep_alive: bool,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    /// Create a parser positioned at the start of a request line
    pub fn new() -> Self {
        Self {
            check_state: CheckState::RequestLine,
            checked_idx: 0,
            start_line: 0,
            content_length: 0,
            method: None,
            target: String::new(),
            host: String::new(),
            keep_alive: false,
        }
    }

    /// Return to the initial state, keeping allocated string capacity
    pub fn reset(&mut self) {
        self.check_state = CheckState::RequestLine;
        self.checked_idx = 0;
        self.start_line = 0;
        self.content_length = 0;
        self.method = None;
        self.target.clear();
        self.host.clear();
        self.keep_alive = false;
    }

    /// Scan `buf` from the cursor for a CRLF line terminator.
    pub fn parse_line(&mut self, buf: &[u8]) -> LineStatus {
        while self.checked_idx < buf.len() {
            match buf[self.checked_idx] {
                b'\r' => {
                    if self.checked_idx + 1 == buf.len() {
                        return LineStatus::Incomplete;
                    }
                    if buf[self.checked_idx + 1] == b'\n' {
                        self.checked_idx += 2;
                        return LineStatus::Complete;
                    }
                    return LineStatus::Malformed;
                }
                b'\n' => {
                    if self.checked_idx > self.start_line && buf[self.checked_idx - 1] == b'\r' {
                        self.checked_idx += 1;
                        return LineStatus::Complete;
                    }
                    return LineStatus::Malformed;
                }
                _ => self.checked_idx += 1,
            }
        }
        LineStatus::Incomplete
    }

    /// Drive the state machine over everything currently buffered.
    ///
    /// Returns `NoRequest` while more bytes are needed, `BadRequest` on a
    /// protocol error and `GetRequest` once the request (and any declared
    /// body) is complete.
    pub fn parse(&mut self, buf: &[u8]) -> HttpCode {
        loop {
            if self.check_state == CheckState::Body {
                return self.parse_body(buf);
            }

            match self.parse_line(buf) {
                LineStatus::Complete => {}
                LineStatus::Incomplete => return HttpCode::NoRequest,
                LineStatus::Malformed => return HttpCode::BadRequest,
            }

            // Both terminator forms occupy the two bytes before the cursor.
            let line = &buf[self.start_line..self.checked_idx - 2];
            self.start_line = self.checked_idx;
            trace!("http line: {:?}", String::from_utf8_lossy(line));

            let code = match self.check_state {
                CheckState::RequestLine => self.parse_request_line(line),
                CheckState::Headers => self.parse_header(line),
                CheckState::Body => return self.parse_body(buf),
            };
            if code != HttpCode::NoRequest {
                return code;
            }
        }
    }

    fn parse_request_line(&mut self, line: &[u8]) -> HttpCode {
        let Ok(text) = str::from_utf8(line) else {
            return HttpCode::BadRequest;
        };

        let Some((method, rest)) = text.split_once(is_blank) else {
            return HttpCode::BadRequest;
        };
        let Some(method) = Method::from_token(method) else {
            return HttpCode::BadRequest;
        };

        let Some((mut target, version)) = rest.trim_start_matches(is_blank).split_once(is_blank)
        else {
            return HttpCode::BadRequest;
        };
        if !version.trim_start_matches(is_blank).eq_ignore_ascii_case("HTTP/1.1") {
            return HttpCode::BadRequest;
        }

        if target
            .get(..7)
            .map_or(false, |scheme| scheme.eq_ignore_ascii_case("http://"))
        {
            let authority_and_path = &target[7..];
            match authority_and_path.find('/') {
                Some(slash) => target = &authority_and_path[slash..],
                None => return HttpCode::BadRequest,
            }
        }
        if !target.starts_with('/') {
            return HttpCode::BadRequest;
        }

        self.method = Some(method);
        self.target.clear();
        self.target.push_str(target);
        self.check_state = CheckState::Headers;
        HttpCode::NoRequest
    }

    fn parse_header(&mut self, line: &[u8]) -> HttpCode {
        if line.is_empty() {
            if self.content_length != 0 {
                self.check_state = CheckState::Body;
                return HttpCode::NoRequest;
            }
            return HttpCode::GetRequest;
        }

        if let Some(value) = header_value(line, b"Connection:") {
            if value.eq_ignore_ascii_case(b"keep-alive") {
                self.keep_alive = true;
            }
        } else if let Some(value) = header_value(line, b"Content-Length:") {
            match parse_content_length(value) {
                Some(length) => self.content_length = length,
                None => return HttpCode::BadRequest,
            }
        } else if let Some(value) = header_value(line, b"Host:") {
            self.host.clear();
            self.host.push_str(&String::from_utf8_lossy(value));
        } else {
            trace!("ignoring header: {:?}", String::from_utf8_lossy(line));
        }

        HttpCode::NoRequest
    }

    fn parse_body(&self, buf: &[u8]) -> HttpCode {
        if buf.len() - self.checked_idx >= self.content_length {
            HttpCode::GetRequest
        } else {
            HttpCode::NoRequest
        }
    }

    pub fn check_state(&self) -> CheckState {
        self.check_state
    }

    /// Index of the next unexamined byte
    pub fn checked_index(&self) -> usize {
        self.checked_idx
    }

    /// Index where the line currently being scanned starts
    pub fn line_start(&self) -> usize {
        self.start_line
    }

    pub fn method(&self) -> Option<Method> {
        self.method
    }

    /// Request target, already reduced to its path for absolute URIs
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }
}

/// Write `HTTP/1.1 <code> <reason>\r\n`
pub fn push_status_line(buf: &mut Buffer, status: Status) -> bool {
    buf.append_fmt(format_args!("HTTP/1.1 {} {}\r\n", status.code(), status.as_str()))
}

/// Write the fixed header block followed by the blank line
pub fn push_headers(buf: &mut Buffer, content_length: usize, keep_alive: bool) -> bool {
    buf.append_fmt(format_args!("Content-Length: {}\r\n", content_length))
        && buf.append(b"Content-Type: text/html\r\n")
        && buf.append_fmt(format_args!(
            "Connection: {}\r\n",
            if keep_alive { "keep-alive" } else { "close" }
        ))
        && buf.append(b"\r\n")
}

/// Status line plus headers for a body of `content_length` bytes
pub fn push_response_head(
    buf: &mut Buffer,
    status: Status,
    content_length: usize,
    keep_alive: bool,
) -> bool {
    push_status_line(buf, status) && push_headers(buf, content_length, keep_alive)
}

/// A complete canned error response (head and body) in one region
pub fn push_error_response(buf: &mut Buffer, status: Status, keep_alive: bool) -> bool {
    let body = status.error_body().unwrap_or_default();
    push_response_head(buf, status, body.len(), keep_alive) && buf.append(body.as_bytes())
}
