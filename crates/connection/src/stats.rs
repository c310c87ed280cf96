//! Connection activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters tracking manager activity.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_queued: AtomicU64,
    messages_dropped: AtomicU64,
    batches_sent: AtomicU64,
    reconnect_attempts: AtomicU64,
    parse_errors: AtomicU64,
}

impl ConnectionStats {
    pub(crate) fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queued(&self) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self, frames: u64) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.messages_sent.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`ConnectionStats`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_queued: u64,
    /// Oldest entries discarded by queue overflow.
    pub messages_dropped: u64,
    pub batches_sent: u64,
    pub reconnect_attempts: u64,
    /// Malformed inbound payloads discarded by the read pump.
    pub parse_errors: u64,
}
