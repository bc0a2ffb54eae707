//! Per-transfer bandwidth throttling
//!
//! NIST 800-53: SC-6 (Resource Availability)
//! Implementation: Paces a transfer against a KB/s ceiling by comparing
//! the wall-clock time elapsed since the transfer began with the minimum
//! time the cumulative byte count requires, and sleeping the shortfall
//! after each chunk. A cap of 0 disables pacing.

use std::time::{Duration, Instant};

/// Cumulative-byte pacer for one transfer direction
#[derive(Debug)]
pub struct BandwidthLimiter {
    limit_kbps: u64,
    started: Instant,
    transferred: u64,
}

impl BandwidthLimiter {
    /// Create a pacer with a ceiling in kilobytes per second (0 = unlimited)
    pub fn new(limit_kbps: u64) -> Self {
        Self {
            limit_kbps,
            started: Instant::now(),
            transferred: 0,
        }
    }

    /// Total bytes accounted so far
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Account a chunk and sleep if the transfer is running ahead of the cap
    pub async fn throttle(&mut self, chunk_bytes: u64) {
        self.transferred = self.transferred.saturating_add(chunk_bytes);
        if let Some(pause) = self.required_pause() {
            tokio::time::sleep(pause).await;
        }
    }

    /// The sleep currently owed, if any
    fn required_pause(&self) -> Option<Duration> {
        if self.limit_kbps == 0 || self.transferred == 0 {
            return None;
        }
        let required =
            Duration::from_secs_f64(self.transferred as f64 / (self.limit_kbps * 1024) as f64);
        let elapsed = self.started.elapsed();
        if required > elapsed {
            Some(required - elapsed)
        } else {
            None
        }
    }
}
