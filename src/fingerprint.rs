// =============================================================================
// fingerprint.rs - TURNING A RECORD INTO 16 OPAQUE BYTES
// =============================================================================
//
// The dedup key for a record is FNV-1a 128 over, in exactly this order:
//
//   1. the timestamp, RFC3339 in UTC, cut down to the configured precision
//   2. the capability id
//   3. the location id
//   4. the category, as base-10 ASCII
//
// No separators. Changing the order, the timestamp rendering, or the hash
// changes every fingerprint ever produced, so treat any of those as a
// breaking format change.
//
// The default precision is whole seconds: two records from the same second
// with the same ids and category collapse to one key. That coarsening is
// deliberate (it acts as a one-second dedup window) but it is a knob, not a
// constant.
// =============================================================================

use std::fmt::{self, Write as _};
use std::str::FromStr;

use crate::models::Record;

const FNV128_OFFSET_BASIS: u128 = 0x6c62272e07bb014262b821756295c58d;
const FNV128_PRIME: u128 = 0x0000000001000000000000000000013b;

const FINGERPRINT_LEN: usize = 16;

/// A 16-byte record fingerprint. Plain value, copy it around freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// How much of the timestamp survives into the fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampPrecision {
    #[default]
    Seconds,
    Millis,
    Micros,
    Nanos,
}

impl TimestampPrecision {
    fn format_str(self) -> &'static str {
        match self {
            TimestampPrecision::Seconds => "%Y-%m-%dT%H:%M:%SZ",
            TimestampPrecision::Millis => "%Y-%m-%dT%H:%M:%S%.3fZ",
            TimestampPrecision::Micros => "%Y-%m-%dT%H:%M:%S%.6fZ",
            TimestampPrecision::Nanos => "%Y-%m-%dT%H:%M:%S%.9fZ",
        }
    }
}

impl FromStr for TimestampPrecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "seconds" => Ok(TimestampPrecision::Seconds),
            "ms" | "millis" | "milliseconds" => Ok(TimestampPrecision::Millis),
            "us" | "micros" | "microseconds" => Ok(TimestampPrecision::Micros),
            "ns" | "nanos" | "nanoseconds" => Ok(TimestampPrecision::Nanos),
            other => Err(format!("unknown timestamp precision: {other}")),
        }
    }
}

impl fmt::Display for TimestampPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimestampPrecision::Seconds => "seconds",
            TimestampPrecision::Millis => "millis",
            TimestampPrecision::Micros => "micros",
            TimestampPrecision::Nanos => "nanos",
        };
        f.write_str(name)
    }
}

/// FNV-1a, 128-bit. Implements `fmt::Write` so formatted fields stream
/// straight into the hash without an intermediate `String`.
#[derive(Debug, Clone, Copy)]
struct Fnv128a(u128);

impl Fnv128a {
    fn new() -> Self {
        Self(FNV128_OFFSET_BASIS)
    }

    fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= u128::from(byte);
            self.0 = self.0.wrapping_mul(FNV128_PRIME);
        }
    }

    fn finish(self) -> [u8; FINGERPRINT_LEN] {
        self.0.to_be_bytes()
    }
}

impl fmt::Write for Fnv128a {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.update(s.as_bytes());
        Ok(())
    }
}

/// Derives fingerprints at a fixed timestamp precision.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintDeriver {
    precision: TimestampPrecision,
}

impl FingerprintDeriver {
    pub fn new(precision: TimestampPrecision) -> Self {
        Self { precision }
    }

    pub fn precision(&self) -> TimestampPrecision {
        self.precision
    }

    /// Fingerprint a record. Pure and deterministic; never fails.
    pub fn derive(&self, record: &Record) -> Fingerprint {
        let mut hasher = Fnv128a::new();
        // Writing into the hasher cannot fail, so the fmt::Results are noise.
        let _ = write!(hasher, "{}", record.ts.format(self.precision.format_str()));
        hasher.update(record.capability_id.as_bytes());
        hasher.update(record.location_id.as_bytes());
        let _ = write!(hasher, "{}", record.category);
        Fingerprint(hasher.finish())
    }
}
