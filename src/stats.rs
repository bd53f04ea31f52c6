use crate::http::Status;
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A simple counter that can be incremented atomically
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicUsize,
}

impl Counter {
    /// Create a new counter with an initial value
    pub fn new(initial_value: usize) -> Self {
        Self {
            value: AtomicUsize::new(initial_value),
        }
    }

    /// Increment the counter by a specific amount
    pub fn increment(&self, amount: usize) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Get the current value of the counter
    pub fn value(&self) -> usize {
        self.value.load(Ordering::Relaxed)
    }
}

/// Process-wide server counters.
///
/// Each update is also forwarded to the `metrics` facade, which is a no-op
/// unless the embedding application installs a recorder.
#[derive(Debug, Default)]
pub struct ServerStats {
    accepted: Counter,
    rejected_at_capacity: Counter,
    closed: Counter,
    queue_rejections: Counter,
    responses_2xx: Counter,
    responses_4xx: Counter,
    responses_5xx: Counter,
    bytes_sent: Counter,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accept(&self, live: usize) {
        self.accepted.increment(1);
        counter!("mmap_httpd_connections_accepted_total", 1);
        gauge!("mmap_httpd_connections_live", live as f64);
    }

    pub fn record_capacity_reject(&self) {
        self.rejected_at_capacity.increment(1);
        counter!("mmap_httpd_connections_rejected_total", 1);
    }

    pub fn record_close(&self, live: usize) {
        self.closed.increment(1);
        counter!("mmap_httpd_connections_closed_total", 1);
        gauge!("mmap_httpd_connections_live", live as f64);
    }

    pub fn record_queue_reject(&self) {
        self.queue_rejections.increment(1);
        counter!("mmap_httpd_queue_rejections_total", 1);
    }

    pub fn record_response(&self, status: Status) {
        match status.code() {
            200..=299 => self.responses_2xx.increment(1),
            400..=499 => self.responses_4xx.increment(1),
            _ => self.responses_5xx.increment(1),
        }
        counter!("mmap_httpd_responses_total", 1, "status" => status.code().to_string());
    }

    pub fn record_bytes_sent(&self, bytes: usize) {
        self.bytes_sent.increment(bytes);
        counter!("mmap_httpd_bytes_sent_total", bytes as u64);
    }

    pub fn accepted(&self) -> usize {
        self.accepted.value()
    }

    pub fn rejected_at_capacity(&self) -> usize {
        self.rejected_at_capacity.value()
    }

    pub fn closed(&self) -> usize {
        self.closed.value()
    }

    pub fn queue_rejections(&self) -> usize {
        self.queue_rejections.value()
    }

    /// Responses sent per status class: (2xx, 4xx, 5xx)
    pub fn responses(&self) -> (usize, usize, usize) {
        (
            self.responses_2xx.value(),
            self.responses_4xx.value(),
            self.responses_5xx.value(),
        )
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent.value()
    }

    /// Get the counters as a one-line summary
    pub fn format(&self) -> String {
        let (ok, client_errors, server_errors) = self.responses();
        format!(
            "accepted={} rejected={} closed={} queue_rejections={} 2xx={} 4xx={} 5xx={} bytes_sent={}",
            self.accepted(),
            self.rejected_at_capacity(),
            self.closed(),
            self.queue_rejections(),
            ok,
            client_errors,
            server_errors,
            self.bytes_sent()
        )
    }
}
