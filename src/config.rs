// =============================================================================
// config.rs - THE KNOB PANEL
// =============================================================================
//
// Every tunable lives here and every one can be overridden with a
// BLOOM_DEDUP_* environment variable (or a .env file, if you keep one).
// Unparseable values fall back to the default. Values that parse but make no
// sense (a false-positive target of 3.0, say) are caught later, when the
// structure that uses them is built.
// =============================================================================

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fingerprint::TimestampPrecision;

/// Everything the three commands need.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // RECORD STREAM
    // =========================================================================
    /// Where the record stream lives. Default: out.ldrec
    pub file: PathBuf,

    // =========================================================================
    // GENERATION
    // =========================================================================
    /// Records in the main generation run. Default: 10 million.
    pub record_count: u64,

    /// Chance a generated record is written twice in a row. Default: 0.001,
    /// roughly one in a thousand.
    pub duplicate_probability: f64,

    /// Copies of earlier records appended at the end. Default: 0.
    pub appended_copies: u64,

    /// RNG seed. None = seed from OS entropy.
    pub seed: Option<u64>,

    // =========================================================================
    // MEMBERSHIP STRUCTURES
    // =========================================================================
    /// Bloom filter `n`. Default: 10 million.
    pub bloom_expected_items: u64,

    /// Bloom filter `p`. Default: 0.001.
    pub bloom_false_positive_rate: f64,

    /// Initial capacity reserved by the exact index. Default: 30 million.
    pub exact_capacity: usize,

    /// How much of the timestamp goes into the fingerprint.
    pub precision: TimestampPrecision,

    // =========================================================================
    // SCAN
    // =========================================================================
    /// Scan workers. 1 = sequential.
    pub workers: usize,

    /// Records per batch handed to a worker.
    pub batch_size: usize,

    /// Progress log cadence, in records.
    pub progress_interval: u64,

    /// Optional wall-clock budget for a scan. When it runs out the scan stops
    /// as if the stream had ended.
    pub deadline: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            file: PathBuf::from("out.ldrec"),
            record_count: 10_000_000,
            duplicate_probability: 0.001,
            appended_copies: 0,
            seed: None,
            bloom_expected_items: 10_000_000,
            bloom_false_positive_rate: 0.001,
            exact_capacity: 30_000_000,
            precision: TimestampPrecision::Seconds,
            workers: 1,
            batch_size: 4096,
            progress_interval: 1_000_000,
            deadline: None,
        }
    }
}

impl Config {
    /// Load from the process environment (after an optional .env file).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `from_env` is this over `env::var`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Config {
            file: get("BLOOM_DEDUP_FILE").map(PathBuf::from).unwrap_or(defaults.file),
            record_count: parse_or(&get, "BLOOM_DEDUP_RECORD_COUNT", defaults.record_count),
            duplicate_probability: parse_or(
                &get,
                "BLOOM_DEDUP_DUPLICATE_PROBABILITY",
                defaults.duplicate_probability,
            ),
            appended_copies: parse_or(&get, "BLOOM_DEDUP_APPENDED_COPIES", defaults.appended_copies),
            seed: get("BLOOM_DEDUP_SEED").and_then(|v| v.trim().parse().ok()),
            bloom_expected_items: parse_or(
                &get,
                "BLOOM_DEDUP_EXPECTED_ITEMS",
                defaults.bloom_expected_items,
            ),
            bloom_false_positive_rate: parse_or(
                &get,
                "BLOOM_DEDUP_FP_RATE",
                defaults.bloom_false_positive_rate,
            ),
            exact_capacity: parse_or(&get, "BLOOM_DEDUP_EXACT_CAPACITY", defaults.exact_capacity),
            precision: parse_or(&get, "BLOOM_DEDUP_PRECISION", defaults.precision),
            workers: parse_or(&get, "BLOOM_DEDUP_WORKERS", defaults.workers).max(1),
            batch_size: parse_or(&get, "BLOOM_DEDUP_BATCH_SIZE", defaults.batch_size).max(1),
            progress_interval: parse_or(
                &get,
                "BLOOM_DEDUP_PROGRESS_INTERVAL",
                defaults.progress_interval,
            ),
            deadline: get("BLOOM_DEDUP_DEADLINE_SECS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

/// Parse `key` if present and well-formed, else `default`.
fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
