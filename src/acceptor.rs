use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};

/// The ConnectionAcceptor owns the non-blocking listening socket and hands
/// out accepted streams ready for the reactor.
pub struct ConnectionAcceptor {
    listener: TcpListener,
    backlog: i32,
}

impl ConnectionAcceptor {
    /// Create a new connection acceptor bound to the specified address
    pub fn new<A: ToSocketAddrs>(addr: A, backlog: i32) -> io::Result<Self> {
        // Take the first resolved address
        let socket_addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "No socket addresses found")
        })?;

        let socket = Self::create_socket(&socket_addr, backlog)?;

        Ok(Self {
            listener: socket.into(),
            backlog,
        })
    }

    /// Accept one pending connection.
    ///
    /// The stream comes back non-blocking with Nagle disabled.
    /// `WouldBlock` means nothing was pending.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept()?;

        // The reactor never blocks on a client socket
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok((stream, addr))
    }

    /// Get the local address this acceptor is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn backlog(&self) -> i32 {
        self.backlog
    }

    /// Create a properly configured socket
    fn create_socket(addr: &SocketAddr, backlog: i32) -> io::Result<Socket> {
        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

        // Non-blocking so a spurious readiness never stalls the reactor
        socket.set_nonblocking(true)?;

        // Allow a restart to rebind while old connections sit in TIME_WAIT
        socket.set_reuse_address(true)?;
        socket.set_reuse_port(true)?;

        socket.bind(&(*addr).into())?;

        // Pending connections beyond the backlog are refused by the kernel
        socket.listen(backlog)?;

        Ok(socket)
    }
}

impl AsRawFd for ConnectionAcceptor {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}
