use mmap_httpd::error::ServerError;
use mmap_httpd::pool::WorkerPool;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_rejects_zero_threads() {
    let result = WorkerPool::new(0, 16, |_: u32| {});
    assert!(matches!(result, Err(ServerError::WorkerPool(_))));
}

#[test]
fn test_rejects_zero_queue_bound() {
    let result = WorkerPool::new(2, 0, |_: u32| {});
    assert!(matches!(result, Err(ServerError::WorkerPool(_))));
}

#[test]
fn test_single_worker_is_fifo() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut pool = {
        let seen = seen.clone();
        WorkerPool::new(1, 1000, move |item: u32| seen.lock().push(item)).unwrap()
    };

    for i in 0..500 {
        assert!(pool.submit(i).is_ok());
    }
    pool.shutdown();

    let seen = seen.lock();
    assert_eq!(*seen, (0..500).collect::<Vec<u32>>());
}

#[test]
fn test_full_queue_rejects_without_blocking() {
    let (started_tx, started_rx) = channel::<()>();
    let (release_tx, release_rx) = channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));
    let started_tx = Arc::new(Mutex::new(started_tx));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut pool = {
        let seen = seen.clone();
        WorkerPool::new(1, 3, move |item: u32| {
            if item == 0 {
                let _ = started_tx.lock().send(());
                let _ = release_rx.lock().recv();
            }
            seen.lock().push(item);
        })
        .unwrap()
    };

    // Park the only worker on item 0 so later items stay queued.
    pool.submit(0).unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    for i in 1..=3 {
        assert!(pool.submit(i).is_ok());
    }
    assert_eq!(pool.queued(), 3);

    let start = Instant::now();
    assert_eq!(pool.submit(4), Err(4));
    assert_eq!(pool.submit(5), Err(5));
    assert!(start.elapsed() < Duration::from_secs(1));

    release_tx.send(()).unwrap();
    pool.shutdown();

    assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
}

#[test]
fn test_shutdown_drains_queue() {
    let processed = Arc::new(AtomicUsize::new(0));
    let mut pool = {
        let processed = processed.clone();
        WorkerPool::new(4, 10_000, move |_: usize| {
            thread::sleep(Duration::from_micros(100));
            processed.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
    };

    for i in 0..1000 {
        pool.submit(i).unwrap();
    }
    pool.shutdown();

    assert_eq!(processed.load(Ordering::SeqCst), 1000);
    assert_eq!(pool.thread_count(), 0);
}

#[test]
fn test_submit_after_shutdown_is_rejected() {
    let mut pool = WorkerPool::new(2, 8, |_: u8| {}).unwrap();
    pool.shutdown();
    assert_eq!(pool.submit(7), Err(7));
}

#[test]
fn test_panicking_task_does_not_kill_worker() {
    let (tx, rx) = channel::<u32>();
    let tx: Arc<Mutex<Sender<u32>>> = Arc::new(Mutex::new(tx));
    let mut pool = WorkerPool::new(1, 8, move |item: u32| {
        if item == 0 {
            panic!("task failure");
        }
        let _ = tx.lock().send(item);
    })
    .unwrap();

    pool.submit(0).unwrap();
    pool.submit(1).unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    pool.shutdown();
}

#[test]
fn test_shutdown_timeout_gives_up_on_busy_worker() {
    let (release_tx, release_rx) = channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));
    let mut pool = WorkerPool::new(1, 4, move |_: u32| {
        let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
    })
    .unwrap();

    pool.submit(1).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(!pool.shutdown_timeout(Duration::from_millis(50)));

    let _ = release_tx.send(());
}

#[test]
fn test_shutdown_timeout_with_idle_workers() {
    let mut pool = WorkerPool::new(3, 4, |_: u32| {}).unwrap();
    assert!(pool.shutdown_timeout(Duration::from_secs(5)));
    assert_eq!(pool.thread_count(), 0);
}
