//! Per-connection statistics
//!
//! Lock-free counters updated from the I/O, sender and heartbeat threads.
//! Read as a snapshot from any thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Connection counters
pub struct ConnectionStats {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
    /// Complete text/binary messages handed to callbacks
    messages_received: AtomicU64,
    pings_sent: AtomicU64,
    pongs_received: AtomicU64,
    reconnects: AtomicU64,
    errors: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of [`ConnectionStats`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub messages_received: u64,
    pub pings_sent: u64,
    pub pongs_received: u64,
    pub reconnects: u64,
    pub errors: u64,
    pub message_rate: f64, // messages per second
    pub uptime_seconds: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            pings_sent: AtomicU64::new(0),
            pongs_received: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one encoded frame written to the transport
    #[inline]
    pub fn record_frame_sent(&self, wire_bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(wire_bytes as u64, Ordering::Relaxed);
    }

    /// Record one decoded frame with its payload size
    #[inline]
    pub fn record_frame_received(&self, payload_bytes: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(payload_bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ping_sent(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_pong(&self) {
        self.pongs_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let messages = self.messages_received.load(Ordering::Relaxed);
        let uptime = self.start_time.elapsed().as_secs();
        let rate = if uptime > 0 {
            messages as f64 / uptime as f64
        } else {
            0.0
        };

        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_received: messages,
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            pongs_received: self.pongs_received.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            message_rate: rate,
            uptime_seconds: uptime,
        }
    }
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}
