//! Transfer progress tracking
//!
//! Integer percentages for progress events, plus speed and ETA estimates for
//! status displays.

use std::time::{Duration, Instant};

/// Whole percentage of `done` out of `total`, rounded down.
///
/// Clamped to `[0, 100]`; `0` when `total` is zero.
#[must_use]
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = u128::from(done) * 100 / u128::from(total);
    // Clamped to 100 above, so the narrowing cannot truncate
    pct.min(100) as u8
}

/// Detailed progress of one file transfer
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// File name
    pub name: String,

    /// Bytes transferred so far
    pub bytes_done: u64,

    /// Total bytes to transfer
    pub bytes_total: u64,

    /// Average speed since the transfer started, in bytes/second
    pub speed_bytes_per_sec: f64,

    /// Estimated time remaining
    pub eta: Option<Duration>,

    started_at: Instant,
}

impl TransferProgress {
    /// Start tracking a transfer of `bytes_total` bytes
    pub fn new(name: impl Into<String>, bytes_total: u64) -> Self {
        Self {
            name: name.into(),
            bytes_done: 0,
            bytes_total,
            speed_bytes_per_sec: 0.0,
            eta: None,
            started_at: Instant::now(),
        }
    }

    /// Record the current byte count
    pub fn update(&mut self, bytes_done: u64) {
        let elapsed = self.started_at.elapsed();
        self.update_with_elapsed(bytes_done, elapsed);
    }

    /// Record the current byte count with an explicit elapsed time
    pub fn update_with_elapsed(&mut self, bytes_done: u64, elapsed: Duration) {
        self.bytes_done = bytes_done.min(self.bytes_total);

        let secs = elapsed.as_secs_f64();
        self.speed_bytes_per_sec = if secs > 0.0 {
            self.bytes_done as f64 / secs
        } else {
            0.0
        };

        if self.speed_bytes_per_sec > 0.0 && self.bytes_done < self.bytes_total {
            let remaining = (self.bytes_total - self.bytes_done) as f64;
            self.eta = Some(Duration::from_secs_f64(remaining / self.speed_bytes_per_sec));
        } else {
            self.eta = None;
        }
    }

    /// Whole percentage complete
    #[must_use]
    pub fn percent(&self) -> u8 {
        percent(self.bytes_done, self.bytes_total)
    }

    /// Check if every byte has been transferred
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bytes_total > 0 && self.bytes_done >= self.bytes_total
    }

    /// Time since tracking started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get human-readable ETA string
    pub fn eta_string(&self) -> String {
        match self.eta {
            Some(duration) => {
                let seconds = duration.as_secs();
                if seconds < 60 {
                    format!("{seconds}s")
                } else if seconds < 3600 {
                    format!("{}m {}s", seconds / 60, seconds % 60)
                } else {
                    format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
                }
            }
            None if self.is_complete() => "Complete".to_string(),
            None => "Calculating...".to_string(),
        }
    }

    /// Get human-readable speed string
    pub fn speed_string(&self) -> String {
        const KIB: f64 = 1024.0;
        let speed = self.speed_bytes_per_sec;
        if speed < KIB {
            format!("{speed:.2} B/s")
        } else if speed < KIB * KIB {
            format!("{:.2} KiB/s", speed / KIB)
        } else if speed < KIB * KIB * KIB {
            format!("{:.2} MiB/s", speed / (KIB * KIB))
        } else {
            format!("{:.2} GiB/s", speed / (KIB * KIB * KIB))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_floor() {
        assert_eq!(percent(0, 12), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(12, 12), 100);
        assert_eq!(percent(1_000_000, 2_097_152), 47);
    }

    #[test]
    fn test_percent_edges() {
        assert_eq!(percent(5, 0), 0);
        assert_eq!(percent(20, 10), 100);
        assert_eq!(percent(u64::MAX, u64::MAX), 100);
        assert_eq!(percent(u64::MAX - 1, u64::MAX), 99);
    }

    #[test]
    fn test_progress_update() {
        let mut progress = TransferProgress::new("b.bin", 1000);
        progress.update_with_elapsed(500, Duration::from_secs(5));

        assert_eq!(progress.bytes_done, 500);
        assert_eq!(progress.percent(), 50);
        assert_eq!(progress.speed_bytes_per_sec, 100.0);
        assert_eq!(progress.eta.map(|d| d.as_secs()), Some(5));
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_progress_complete() {
        let mut progress = TransferProgress::new("a.txt", 12);
        progress.update_with_elapsed(12, Duration::from_secs(1));
        assert!(progress.is_complete());
        assert!(progress.eta.is_none());
        assert_eq!(progress.eta_string(), "Complete");
    }

    #[test]
    fn test_progress_zero_elapsed() {
        let mut progress = TransferProgress::new("a.txt", 12);
        progress.update_with_elapsed(6, Duration::ZERO);
        assert_eq!(progress.speed_bytes_per_sec, 0.0);
        assert_eq!(progress.eta_string(), "Calculating...");
    }

    #[test]
    fn test_eta_string() {
        let mut progress = TransferProgress::new("x", 100);
        progress.eta = Some(Duration::from_secs(45));
        assert_eq!(progress.eta_string(), "45s");
        progress.eta = Some(Duration::from_secs(125));
        assert_eq!(progress.eta_string(), "2m 5s");
        progress.eta = Some(Duration::from_secs(3725));
        assert_eq!(progress.eta_string(), "1h 2m");
    }

    #[test]
    fn test_speed_string() {
        let mut progress = TransferProgress::new("x", 100);
        progress.speed_bytes_per_sec = 512.0;
        assert_eq!(progress.speed_string(), "512.00 B/s");
        progress.speed_bytes_per_sec = 2048.0;
        assert_eq!(progress.speed_string(), "2.00 KiB/s");
        progress.speed_bytes_per_sec = 3.0 * 1024.0 * 1024.0;
        assert_eq!(progress.speed_string(), "3.00 MiB/s");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn percent_bounded_and_monotonic(total in 1u64.., a in any::<u64>(), b in any::<u64>()) {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                prop_assert!(percent(hi, total) <= 100);
                prop_assert!(percent(lo, total) <= percent(hi, total));
                prop_assert_eq!(percent(total, total), 100);
            }
        }
    }
}
