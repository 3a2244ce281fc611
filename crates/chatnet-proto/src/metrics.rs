//! Process-wide counters the admin surface's `get_stats` reads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct Metrics {
    pub total_messages: AtomicU64,
    pub bytes_transferred: AtomicU64,
    pub decode_errors: AtomicU64,
    pub checksum_errors: AtomicU64,
    started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            total_messages: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            checksum_errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }
}

impl Metrics {
    pub fn record_frame(&self, bytes: usize) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
