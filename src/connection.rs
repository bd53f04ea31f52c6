use crate::buffer::Buffer;
use crate::error::{ServerError, ServerResult};
use crate::files::{DocumentRoot, MappedFile};
use crate::http::{self, HttpCode, RequestParser, Status};
use std::io::{self, ErrorKind, IoSlice, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

/// What a connection needs next after a processing step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// The request is incomplete; wait for more bytes
    AwaitRead,
    /// A response is queued; wait for the socket to accept it
    AwaitWrite,
    /// Nothing sensible can be sent; drop the connection
    Close,
}

/// Result of a write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The socket stopped accepting data before the response was sent
    Pending,
    /// The whole response was sent. With `keep_alive` the connection has
    /// already been reset for its next request.
    Done { keep_alive: bool, sent: usize },
}

/// Per-socket state: buffers, parse cursor and queued response.
///
/// A `Connection` lives in a preallocated slot for the whole life of the
/// server and is re-initialised for every accepted socket. Only one thread
/// touches it at a time: the reactor while reading or writing, a worker
/// while parsing and formatting.
pub struct Connection {
    stream: Option<TcpStream>,
    peer_addr: Option<SocketAddr>,
    generation: u32,
    read_buf: Buffer,
    write_buf: Buffer,
    parser: RequestParser,
    file: Option<MappedFile>,
    linger: bool,
    status: Option<Status>,
    bytes_to_send: usize,
    bytes_have_sent: usize,
}

impl Connection {
    /// Create a free slot with buffers of the given capacities
    pub fn new(read_capacity: usize, write_capacity: usize) -> Self {
        Self {
            stream: None,
            peer_addr: None,
            generation: 0,
            read_buf: Buffer::new(read_capacity),
            write_buf: Buffer::new(write_capacity),
            parser: RequestParser::new(),
            file: None,
            linger: false,
            status: None,
            bytes_to_send: 0,
            bytes_have_sent: 0,
        }
    }

    /// Attach a freshly accepted socket to this slot
    pub fn open(&mut self, stream: TcpStream, peer_addr: SocketAddr, generation: u32) {
        self.stream = Some(stream);
        self.peer_addr = Some(peer_addr);
        self.generation = generation;
        self.init();
    }

    /// Reset parse and response state and zero both buffers.
    ///
    /// Used between keep-alive requests; the socket stays attached.
    pub fn init(&mut self) {
        self.parser.reset();
        self.read_buf.clear();
        self.write_buf.clear();
        self.file = None;
        self.linger = false;
        self.status = None;
        self.bytes_to_send = 0;
        self.bytes_have_sent = 0;
    }

    /// Detach the socket and return the slot to its free state.
    ///
    /// The generation is kept so the next `open` can advance it.
    pub fn release(&mut self) -> Option<TcpStream> {
        self.init();
        self.peer_addr = None;
        self.stream.take()
    }

    /// Drain the socket into the read buffer until it would block.
    ///
    /// Returns the number of bytes read. Peer shutdown, a full buffer and
    /// any transport error are all fatal to the connection.
    pub fn read(&mut self) -> ServerResult<usize> {
        let stream = self.stream.as_mut().ok_or(ServerError::PeerClosed)?;
        let mut total = 0;

        loop {
            if self.read_buf.is_full() {
                return Err(ServerError::BufferFull {
                    capacity: self.read_buf.capacity(),
                });
            }

            match self.read_buf.read_from(stream) {
                Ok(0) => return Err(ServerError::PeerClosed),
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(total),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Worker entry point: parse what has been read and queue a response.
    pub fn process(&mut self, root: &DocumentRoot) -> Next {
        let code = self.process_read(root);
        if code == HttpCode::NoRequest {
            return Next::AwaitRead;
        }

        if !self.process_write(code) {
            return Next::Close;
        }
        Next::AwaitWrite
    }

    /// Run the parser over the read buffer and, for a complete request,
    /// resolve its target.
    pub fn process_read(&mut self, root: &DocumentRoot) -> HttpCode {
        match self.parser.parse(self.read_buf.slice()) {
            HttpCode::GetRequest => self.do_request(root),
            code => code,
        }
    }

    fn do_request(&mut self, root: &DocumentRoot) -> HttpCode {
        match root.resolve(self.parser.target()) {
            Ok(file) => {
                self.file = Some(file);
                HttpCode::FileRequest
            }
            Err(code) => code,
        }
    }

    /// Format the response for `code` using the keep-alive preference the
    /// client sent.
    pub fn process_write(&mut self, code: HttpCode) -> bool {
        let keep_alive = self.parser.keep_alive();
        self.format_response(code, keep_alive)
    }

    /// Queue a canned 503 that closes the connection once sent
    pub fn reject_busy(&mut self) -> bool {
        self.file = None;
        self.format_response(HttpCode::ServiceUnavailable, false)
    }

    fn format_response(&mut self, code: HttpCode, keep_alive: bool) -> bool {
        let Some(status) = code.status() else {
            return false;
        };

        self.write_buf.clear();
        let formatted = match code {
            HttpCode::FileRequest => {
                let body_len = self.file.as_ref().map_or(0, MappedFile::len);
                http::push_response_head(&mut self.write_buf, status, body_len, keep_alive)
            }
            _ => http::push_error_response(&mut self.write_buf, status, keep_alive),
        };
        if !formatted {
            self.file = None;
            return false;
        }

        self.linger = keep_alive;
        self.status = Some(status);
        self.bytes_have_sent = 0;
        self.bytes_to_send = self.write_buf.len() + self.file.as_ref().map_or(0, MappedFile::len);
        true
    }

    /// Send as much of the queued response as the socket accepts.
    ///
    /// The header bytes and the mapped file body go out together as one
    /// vectored write; partial writes resume where they stopped.
    pub fn write(&mut self) -> ServerResult<WriteStatus> {
        let stream = self.stream.as_mut().ok_or(ServerError::PeerClosed)?;

        while self.bytes_have_sent < self.bytes_to_send {
            let header = self.write_buf.slice();
            let body = self.file.as_ref().map_or(&[][..], MappedFile::as_slice);
            let sent = self.bytes_have_sent;

            let regions = if sent < header.len() {
                [IoSlice::new(&header[sent..]), IoSlice::new(body)]
            } else {
                [IoSlice::new(&body[sent - header.len()..]), IoSlice::new(&[])]
            };

            let result = stream.write_vectored(&regions);
            match result {
                Ok(0) => {
                    self.file = None;
                    return Err(io::Error::from(ErrorKind::WriteZero).into());
                }
                Ok(n) => self.bytes_have_sent += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(WriteStatus::Pending),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.file = None;
                    return Err(e.into());
                }
            }
        }

        self.file = None;
        let sent = self.bytes_have_sent;
        let keep_alive = self.linger;
        if keep_alive {
            self.init();
        }
        Ok(WriteStatus::Done { keep_alive, sent })
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|stream| stream.as_raw_fd())
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Get the connection's peer address
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn parser(&self) -> &RequestParser {
        &self.parser
    }

    /// Get a reference to the connection's read buffer
    pub fn read_buffer(&self) -> &Buffer {
        &self.read_buf
    }

    /// Get a reference to the formatted response head (or whole error response)
    pub fn write_buffer(&self) -> &Buffer {
        &self.write_buf
    }

    /// Status of the response currently queued, if any
    pub fn response_status(&self) -> Option<Status> {
        self.status
    }

    /// Whether a mapped file body is queued behind the header bytes
    pub fn has_mapped_body(&self) -> bool {
        self.file.is_some()
    }

    pub fn bytes_to_send(&self) -> usize {
        self.bytes_to_send
    }

    pub fn bytes_have_sent(&self) -> usize {
        self.bytes_have_sent
    }
}
