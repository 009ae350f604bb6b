// ═══════════════════════════════════════════════════════════════
// METRICS - Because "it felt faster" is not a benchmark result
// ═══════════════════════════════════════════════════════════════
//
// Atomic counters shared by every scan worker. No locks: workers bump
// them with Relaxed adds and whoever wants a number takes a snapshot.

use portable_atomic::{AtomicU64, Ordering};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Point-in-time view of a scan's counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub records_scanned: u64,
    pub duplicates: u64,
    pub elapsed_ms: u128,
    pub records_per_sec: f64,
}

/// Lock-free scan counters.
pub struct ScanMetrics {
    records: AtomicU64,
    duplicates: AtomicU64,
    start_time: Instant,
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self {
            records: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Count `n` more records. Returns the running total including them.
    pub fn add_records(&self, n: u64) -> u64 {
        self.records.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn add_duplicates(&self, n: u64) {
        self.duplicates.fetch_add(n, Ordering::Relaxed);
    }

    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed = self.elapsed();
        let records = self.records();
        let secs = elapsed.as_secs_f64();
        let records_per_sec = if secs > 0.0 { records as f64 / secs } else { 0.0 };

        MetricsSnapshot {
            records_scanned: records,
            duplicates: self.duplicates(),
            elapsed_ms: elapsed.as_millis(),
            records_per_sec,
        }
    }
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// True when a running total just crossed a multiple of `interval`.
pub fn crossed_interval(before: u64, after: u64, interval: u64) -> bool {
    interval > 0 && before / interval != after / interval
}
