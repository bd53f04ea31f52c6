use mmap_httpd::config::ServerConfig;
use mmap_httpd::event_loop::{EventPoller, Events};
use mmap_httpd::http::Status;
use mmap_httpd::slab::{ConnectionSlab, Token, LISTENER_TOKEN};
use mmap_httpd::stats::ServerStats;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    listener: TcpListener,
    poller: Arc<EventPoller>,
    stats: Arc<ServerStats>,
    slab: ConnectionSlab,
}

fn fixture(max_connections: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::new()
        .with_max_connections(max_connections)
        .with_doc_root(dir.path());
    let poller = Arc::new(EventPoller::new().unwrap());
    let stats = Arc::new(ServerStats::new());
    let slab = ConnectionSlab::new(&config, poller.clone(), stats.clone()).unwrap();

    Fixture {
        _dir: dir,
        listener: TcpListener::bind("127.0.0.1:0").unwrap(),
        poller,
        stats,
        slab,
    }
}

fn accept_pair(listener: &TcpListener) -> (TcpStream, TcpStream, SocketAddr) {
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, addr) = listener.accept().unwrap();
    server.set_nonblocking(true).unwrap();
    (client, server, addr)
}

/// Poll until an event for `token` shows up and return its flags
fn wait_for(poller: &EventPoller, token: Token) -> Option<u32> {
    let mut events = Events::with_capacity(16);
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        poller.poll(&mut events, 50).unwrap();
        if let Some((_, flags)) = events.iter().find(|(data, _)| *data == token.as_u64()) {
            return Some(flags);
        }
    }
    None
}

#[test]
fn test_token_packing() {
    let token = Token::new(7, 3);
    assert_eq!(token.index(), 7);
    assert_eq!(token.generation(), 3);
    assert_eq!(Token::from_u64(token.as_u64()), token);
    assert_ne!(token.as_u64(), LISTENER_TOKEN);
}

#[test]
fn test_admission_is_bounded() {
    let f = fixture(2);
    let mut clients = Vec::new();

    for _ in 0..2 {
        let (client, server, addr) = accept_pair(&f.listener);
        assert!(f.slab.insert(server, addr).unwrap().is_some());
        clients.push(client);
    }
    assert_eq!(f.slab.live(), 2);
    assert_eq!(f.slab.free_slots(), 0);

    let (_client, server, addr) = accept_pair(&f.listener);
    assert!(f.slab.insert(server, addr).unwrap().is_none());
    assert_eq!(f.slab.live(), 2);
    assert_eq!(f.stats.accepted(), 2);
    assert_eq!(f.stats.rejected_at_capacity(), 1);
}

#[test]
fn test_close_frees_slot_and_bumps_generation() {
    let f = fixture(1);

    let (_c1, server, addr) = accept_pair(&f.listener);
    let first = f.slab.insert(server, addr).unwrap().unwrap();
    f.slab.close(first);
    assert_eq!(f.slab.live(), 0);
    assert_eq!(f.slab.free_slots(), 1);
    assert_eq!(f.stats.closed(), 1);

    let (_c2, server, addr) = accept_pair(&f.listener);
    let second = f.slab.insert(server, addr).unwrap().unwrap();
    assert_eq!(second.index(), first.index());
    assert_eq!(second.generation(), first.generation().wrapping_add(1));

    // The old token no longer resolves, and closing it is harmless.
    assert!(f.slab.get(first).is_none());
    f.slab.close(first);
    assert_eq!(f.slab.live(), 1);
    assert!(f.slab.get(second).is_some());
}

#[test]
fn test_double_close_counts_once() {
    let f = fixture(4);
    let (_client, server, addr) = accept_pair(&f.listener);
    let token = f.slab.insert(server, addr).unwrap().unwrap();

    f.slab.close(token);
    f.slab.close(token);
    assert_eq!(f.slab.live(), 0);
    assert_eq!(f.slab.free_slots(), 4);
    assert_eq!(f.stats.closed(), 1);
}

#[test]
fn test_process_rearms_for_write_once() {
    let f = fixture(4);
    let (mut client, server, addr) = accept_pair(&f.listener);
    let token = f.slab.insert(server, addr).unwrap().unwrap();

    client.write_all(b"GET /missing.html HTTP/1.1\r\n\r\n").unwrap();
    let flags = wait_for(&f.poller, token).expect("no read readiness");
    assert_ne!(flags & libc::EPOLLIN as u32, 0);

    {
        let mut conn = f.slab.get(token).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while conn.read_buffer().len() < 30 {
            conn.read().unwrap();
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(2));
        }
    }

    f.slab.process(token);
    assert_eq!(
        f.slab.get(token).unwrap().response_status(),
        Some(Status::NotFound)
    );
    assert_eq!(f.stats.responses(), (0, 1, 0));

    let flags = wait_for(&f.poller, token).expect("no write readiness");
    assert_ne!(flags & libc::EPOLLOUT as u32, 0);

    // One-shot: nothing more until re-armed.
    let mut events = Events::with_capacity(16);
    f.poller.poll(&mut events, 50).unwrap();
    assert!(events.iter().all(|(data, _)| data != token.as_u64()));
}

#[test]
fn test_close_all() {
    let f = fixture(8);
    let mut clients = Vec::new();
    for _ in 0..5 {
        let (client, server, addr) = accept_pair(&f.listener);
        f.slab.insert(server, addr).unwrap().unwrap();
        clients.push(client);
    }
    assert_eq!(f.slab.live(), 5);

    f.slab.close_all();
    assert_eq!(f.slab.live(), 0);
    assert_eq!(f.slab.free_slots(), 8);
    assert_eq!(f.stats.closed(), 5);
}

#[test]
fn test_rejects_empty_table() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::new()
        .with_max_connections(0)
        .with_doc_root(dir.path());
    let poller = Arc::new(EventPoller::new().unwrap());
    let stats = Arc::new(ServerStats::new());
    assert!(ConnectionSlab::new(&config, poller, stats).is_err());
}

#[test]
fn test_panicking_step_closes_connection() {
    let f = fixture(2);
    let (mut client, server, addr) = accept_pair(&f.listener);
    let token = f.slab.insert(server, addr).unwrap().unwrap();
    assert_eq!(f.slab.live(), 1);

    f.slab.process_with(token, |_, _| panic!("handler failure"));

    assert_eq!(f.slab.live(), 0);
    assert_eq!(f.slab.free_slots(), 2);
    assert_eq!(f.stats.closed(), 1);
    assert!(f.slab.get(token).is_none());

    // The peer sees the close.
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut rest = Vec::new();
    assert_eq!(client.read_to_end(&mut rest).unwrap(), 0);

    // The slot is usable again.
    let (_client, server, addr) = accept_pair(&f.listener);
    assert!(f.slab.insert(server, addr).unwrap().is_some());
}
