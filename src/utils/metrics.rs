//! Observability and Metrics
//!
//! Per-channel counters for packet flow, validation failures and
//! retransmission activity.
//!
//! Uses atomic counters so the send and receive halves of a channel can record
//! into the same instance from different tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one channel
#[derive(Debug)]
pub struct ChannelMetrics {
    /// Frames written
    pub packets_sent: AtomicU64,
    /// Frames that decoded successfully
    pub packets_received: AtomicU64,
    /// Whole messages sent
    pub messages_sent: AtomicU64,
    /// Whole messages delivered
    pub messages_received: AtomicU64,
    /// Application bytes sent
    pub bytes_sent: AtomicU64,
    /// Application bytes delivered
    pub bytes_received: AtomicU64,
    /// Frames discarded for a bad MAC
    pub authentication_failures: AtomicU64,
    /// Frames discarded for a bad checksum
    pub integrity_failures: AtomicU64,
    /// Frames discarded by the freshness guard
    pub replays_rejected: AtomicU64,
    /// Fragments sent again after a timeout or NACK
    pub retransmissions: AtomicU64,
    /// NACKs emitted
    pub nacks_sent: AtomicU64,
    /// NACKs observed
    pub nacks_received: AtomicU64,
    /// Acknowledgement rounds that expired
    pub ack_timeouts: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl ChannelMetrics {
    pub fn new() -> Self {
        Self {
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            authentication_failures: AtomicU64::new(0),
            integrity_failures: AtomicU64::new(0),
            replays_rejected: AtomicU64::new(0),
            retransmissions: AtomicU64::new(0),
            nacks_sent: AtomicU64::new(0),
            nacks_received: AtomicU64::new(0),
            ack_timeouts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message sent
    pub fn message_sent(&self, byte_count: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a message delivered to the caller
    pub fn message_received(&self, byte_count: u64) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn authentication_failure(&self) {
        self.authentication_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn integrity_failure(&self) {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replay_rejected(&self) {
        self.replays_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn nack_sent(&self) {
        self.nacks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn nack_received(&self) {
        self.nacks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_timeout(&self) {
        self.ack_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            authentication_failures: self.authentication_failures.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            replays_rejected: self.replays_rejected.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            nacks_sent: self.nacks_sent.load(Ordering::Relaxed),
            nacks_received: self.nacks_received.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            messages_sent = snapshot.messages_sent,
            messages_received = snapshot.messages_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            authentication_failures = snapshot.authentication_failures,
            integrity_failures = snapshot.integrity_failures,
            replays_rejected = snapshot.replays_rejected,
            retransmissions = snapshot.retransmissions,
            nacks_sent = snapshot.nacks_sent,
            nacks_received = snapshot.nacks_received,
            ack_timeouts = snapshot.ack_timeouts,
            uptime_seconds = snapshot.uptime_seconds,
            "Channel metrics snapshot"
        );
    }
}

impl Default for ChannelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub authentication_failures: u64,
    pub integrity_failures: u64,
    pub replays_rejected: u64,
    pub retransmissions: u64,
    pub nacks_sent: u64,
    pub nacks_received: u64,
    pub ack_timeouts: u64,
    pub uptime_seconds: u64,
}
