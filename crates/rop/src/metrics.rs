// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection metrics.
//!
//! Counters are updated without the directory lock, so they can be read
//! from any thread at any time.
//!
//! # Example
//!
//! ```
//! use rop::ConnectionMetrics;
//!
//! let metrics = ConnectionMetrics::new();
//! metrics.record_message_sent();
//! metrics.record_bytes_sent(42);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.messages_sent, 1);
//! assert_eq!(snapshot.bytes_sent, 42);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics for one connection.
#[derive(Debug)]
pub struct ConnectionMetrics {
    // Message metrics
    /// Total messages fully encoded
    messages_sent: AtomicU64,

    /// Total messages fully decoded
    messages_received: AtomicU64,

    // Byte metrics
    /// Total bytes written to the stream
    bytes_sent: AtomicU64,

    /// Total bytes read from the stream
    bytes_received: AtomicU64,

    // Call metrics
    /// Outbound calls issued (one-way included)
    calls_issued: AtomicU64,

    /// Inbound requests executed
    requests_dispatched: AtomicU64,

    /// Release notifications sent to the peer
    releases_sent: AtomicU64,

    // Error / backpressure metrics
    /// Number of times a write would have blocked
    send_blocked: AtomicU64,

    /// Frames that aborted during decode
    malformed_frames: AtomicU64,

    /// When metrics collection started
    start_time: Instant,
}

impl ConnectionMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            calls_issued: AtomicU64::new(0),
            requests_dispatched: AtomicU64::new(0),
            releases_sent: AtomicU64::new(0),
            send_blocked: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Record a message fully encoded.
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message fully decoded.
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes written.
    pub fn record_bytes_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record bytes read.
    pub fn record_bytes_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record an outbound call.
    pub fn record_call(&self) {
        self.calls_issued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an inbound request executed.
    pub fn record_dispatch(&self) {
        self.requests_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a release notification sent.
    pub fn record_release(&self) {
        self.releases_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a send blocked event.
    pub fn record_send_blocked(&self) {
        self.send_blocked.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a malformed frame.
    pub fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            calls_issued: self.calls_issued.load(Ordering::Relaxed),
            requests_dispatched: self.requests_dispatched.load(Ordering::Relaxed),
            releases_sent: self.releases_sent.load(Ordering::Relaxed),
            send_blocked: self.send_blocked.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of connection metrics.
#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    /// Total messages sent
    pub messages_sent: u64,

    /// Total messages received
    pub messages_received: u64,

    /// Total bytes sent
    pub bytes_sent: u64,

    /// Total bytes received
    pub bytes_received: u64,

    /// Outbound calls issued
    pub calls_issued: u64,

    /// Inbound requests executed
    pub requests_dispatched: u64,

    /// Release notifications sent
    pub releases_sent: u64,

    /// Send blocked count
    pub send_blocked: u64,

    /// Malformed frames seen
    pub malformed_frames: u64,

    /// Uptime in seconds
    pub uptime_secs: f64,
}

impl MetricsSnapshot {
    /// Calculate message rate (messages/second).
    pub fn message_rate(&self) -> f64 {
        if self.uptime_secs > 0.0 {
            (self.messages_sent + self.messages_received) as f64 / self.uptime_secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ConnectionMetrics::new();
        metrics.record_call();
        metrics.record_call();
        metrics.record_dispatch();
        metrics.record_send_blocked();
        metrics.record_malformed();
        metrics.record_bytes_received(10);
        metrics.record_bytes_received(5);

        let snap = metrics.snapshot();
        assert_eq!(snap.calls_issued, 2);
        assert_eq!(snap.requests_dispatched, 1);
        assert_eq!(snap.send_blocked, 1);
        assert_eq!(snap.malformed_frames, 1);
        assert_eq!(snap.bytes_received, 15);
        assert_eq!(snap.releases_sent, 0);
    }

    #[test]
    fn test_message_rate() {
        let snap = MetricsSnapshot {
            messages_sent: 10,
            messages_received: 10,
            uptime_secs: 2.0,
            ..Default::default()
        };
        assert!((snap.message_rate() - 10.0).abs() < f64::EPSILON);
        assert_eq!(MetricsSnapshot::default().message_rate(), 0.0);
    }
}
