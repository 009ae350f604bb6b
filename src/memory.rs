// =============================================================================
// memory.rs - HOW MUCH RAM DID THAT COST?
// =============================================================================
//
// Reads VmRSS / VmHWM out of /proc/self/status. On anything that isn't
// Linux (or if procfs is being weird) the fields are simply None.
// =============================================================================

use serde::Serialize;
use std::fmt;

const MIB: u64 = 1024 * 1024;

/// Resident memory of this process, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub resident_bytes: Option<u64>,
    pub peak_resident_bytes: Option<u64>,
}

impl fmt::Display for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn mib(v: Option<u64>) -> String {
            v.map_or_else(|| "n/a".to_string(), |b| format!("{} MiB", b / MIB))
        }
        write!(
            f,
            "rss = {}, peak rss = {}",
            mib(self.resident_bytes),
            mib(self.peak_resident_bytes)
        )
    }
}

/// Take a snapshot of the current process.
pub fn snapshot() -> MemorySnapshot {
    std::fs::read_to_string("/proc/self/status")
        .map(|status| parse_status(&status))
        .unwrap_or_default()
}

fn parse_status(status: &str) -> MemorySnapshot {
    let mut snap = MemorySnapshot::default();
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            snap.resident_bytes = parse_kib(rest);
        } else if let Some(rest) = line.strip_prefix("VmHWM:") {
            snap.peak_resident_bytes = parse_kib(rest);
        }
    }
    snap
}

/// "   12345 kB" -> bytes
fn parse_kib(field: &str) -> Option<u64> {
    let mut parts = field.split_whitespace();
    let value: u64 = parts.next()?.parse().ok()?;
    match parts.next() {
        Some("kB") | None => value.checked_mul(1024),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let status = "Name:\tbloom_dedup\nVmHWM:\t  204800 kB\nVmRSS:\t  102400 kB\nThreads:\t4\n";
        let snap = parse_status(status);
        assert_eq!(snap.resident_bytes, Some(100 * MIB));
        assert_eq!(snap.peak_resident_bytes, Some(200 * MIB));
        assert_eq!(snap.to_string(), "rss = 100 MiB, peak rss = 200 MiB");
    }

    #[test]
    fn test_parse_status_missing_fields() {
        let snap = parse_status("Name:\tsomething\n");
        assert_eq!(snap, MemorySnapshot::default());
        assert_eq!(snap.to_string(), "rss = n/a, peak rss = n/a");
    }

    #[test]
    fn test_parse_kib_rejects_junk() {
        assert_eq!(parse_kib(" 12 kB"), Some(12 * 1024));
        assert_eq!(parse_kib(" twelve kB"), None);
        assert_eq!(parse_kib(" 12 MB"), None);
        assert_eq!(parse_kib(""), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_live_snapshot_on_linux() {
        let snap = snapshot();
        assert!(snap.resident_bytes.unwrap_or(0) > 0);
    }
}
