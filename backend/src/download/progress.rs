//! Debounced progress reporting

use std::time::{Duration, Instant};

/// Decides when accumulated progress is worth reporting.
///
/// A report is due once `interval` has passed since the last one or
/// `byte_threshold` bytes have arrived, whichever happens first. Time is
/// passed in by the caller so the gate can be driven by a fake clock.
#[derive(Debug)]
pub struct ProgressGate {
    interval: Duration,
    byte_threshold: u64,
    last_report: Instant,
    pending_bytes: u64,
}

impl ProgressGate {
    pub fn new(interval: Duration, byte_threshold: u64, now: Instant) -> Self {
        Self {
            interval,
            byte_threshold,
            last_report: now,
            pending_bytes: 0,
        }
    }

    /// Account for `bytes` written at `now`.
    ///
    /// Returns the transfer rate (bytes/sec) over the window since the last
    /// report when a report is due, `None` otherwise.
    pub fn record(&mut self, bytes: u64, now: Instant) -> Option<u64> {
        self.pending_bytes += bytes;

        let elapsed = now.saturating_duration_since(self.last_report);
        if elapsed < self.interval && self.pending_bytes < self.byte_threshold {
            return None;
        }

        let speed = if elapsed.is_zero() {
            // Threshold hit within one clock tick; report the bytes as one second
            self.pending_bytes
        } else {
            (self.pending_bytes as f64 / elapsed.as_secs_f64()).round() as u64
        };

        self.last_report = now;
        self.pending_bytes = 0;
        Some(speed)
    }
}
