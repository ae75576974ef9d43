//! Shared bandwidth limiter
//!
//! A single token bucket covers every active transfer. Waiters queue on a
//! fair (FIFO) mutex, so transfers that request tokens chunk by chunk are
//! served round-robin and none of them can be starved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Longest single sleep while waiting for tokens, so rate changes made
/// during a wait are picked up promptly
const MAX_WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Bucket {
    /// May go negative when a grant exceeds the bucket capacity
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiter shared by all transfers
#[derive(Debug)]
pub struct ThrottleController {
    /// Bytes per second, 0 = unlimited
    rate: AtomicU64,
    bucket: Mutex<Bucket>,
}

impl ThrottleController {
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            rate: AtomicU64::new(bytes_per_sec),
            bucket: Mutex::new(Bucket {
                tokens: bytes_per_sec as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    /// Change the cap; applies to the next grant, including current waiters
    pub fn set_rate(&self, bytes_per_sec: u64) {
        let old = self.rate.swap(bytes_per_sec, Ordering::Relaxed);
        if old != bytes_per_sec {
            tracing::debug!(
                target: crate::logging::NETWORK,
                "Speed throttle changed: {} -> {} B/s",
                old,
                bytes_per_sec
            );
        }
    }

    /// Wait until `bytes` may be written.
    ///
    /// Requests larger than one second of capacity are granted once the
    /// bucket is full and leave it in debt, which later requests pay off.
    pub async fn acquire(&self, bytes: usize) {
        if bytes == 0 || self.rate() == 0 {
            return;
        }

        let mut bucket = self.bucket.lock().await;
        loop {
            let rate = self.rate();
            if rate == 0 {
                return;
            }

            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            let capacity = rate as f64;
            bucket.tokens = (bucket.tokens + elapsed * capacity).min(capacity);
            bucket.last_refill = now;

            let needed = (bytes as f64).min(capacity);
            if bucket.tokens >= needed {
                bucket.tokens -= bytes as f64;
                return;
            }

            let wait = Duration::from_secs_f64((needed - bucket.tokens) / capacity);
            tokio::time::sleep(wait.min(MAX_WAIT_SLICE)).await;
        }
    }
}
