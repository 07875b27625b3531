//! Flow metrics
//!
//! Lock-free counters for the conditions the pipeline must keep observable:
//! queue drops, expiry discards, malformed payloads, and late responses.
//! One `FlowMetrics` instance is shared by the client, dispatcher, and
//! processor of a single pipeline; there is no global registry.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct FlowMetrics {
    published: AtomicU64,
    requests_sent: AtomicU64,
    responses_matched: AtomicU64,
    responses_late: AtomicU64,
    queue_dropped: AtomicU64,
    expired_discarded: AtomicU64,
    malformed_payloads: AtomicU64,
    delivered: AtomicU64,
}

impl FlowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_matched(&self) {
        self.responses_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_late(&self) {
        self.responses_late.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_dropped(&self) {
        self.queue_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired_discarded(&self) {
        self.expired_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_payload(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            responses_late: self.responses_late.load(Ordering::Relaxed),
            queue_dropped: self.queue_dropped.load(Ordering::Relaxed),
            expired_discarded: self.expired_discarded.load(Ordering::Relaxed),
            malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub requests_sent: u64,
    pub responses_matched: u64,
    pub responses_late: u64,
    pub queue_dropped: u64,
    pub expired_discarded: u64,
    pub malformed_payloads: u64,
    pub delivered: u64,
}
