// =============================================================================
// bloom.rs - THE BLOOM FILTER ENGINE
// =============================================================================
//
// Sizing (reproduced exactly, so false-positive rates line up with any other
// implementation using the same formulas):
//
//   m = ceil(n * ln(p) / ln(1 / 2^ln2))      i.e. -n * ln(p) / (ln2)^2
//   k = round((m / n) * ln2), at least 1
//
// Positions come from two SipHash-1-3 hashes with fixed keys, combined with
// enhanced double hashing:
//
//   pos_i = (h1 + i*h2 + (i^3 - i)/6) mod m
//
// `test_and_add` first checks lock-free: bits only ever go from 0 to 1, so
// a key whose k bits are all set is present and needs no write. Anything
// else takes a mutex for the whole check-and-set, so its answer is a
// consistent before-snapshot of its own k positions even with many
// callers. The store underneath is atomic on its own, which is what lets
// the read-only path skip the lock.
//
// Feeding it more than `n` items is allowed. The false-positive rate just
// climbs past `p`. That is the deal you make with a Bloom filter.
// =============================================================================

use parking_lot::Mutex;
use siphasher::sip::SipHasher13;
use std::f64::consts::LN_2;
use std::hash::Hasher;
use tracing::info;

use crate::bitarray::BitArray;
use crate::dedup::Membership;
use crate::error::{DedupError, Result};

/// Seeds for the two SipHash instances. Changing them changes every
/// position, which only matters if filters are ever compared across builds.
const HASHER_SEEDS: [[u8; 16]; 2] = [
    [
        0x3b, 0x9a, 0x51, 0xe0, 0x7c, 0x12, 0xd4, 0x8f, 0x66, 0x21, 0xaa, 0x05, 0xc3, 0x7e,
        0x94, 0x18,
    ],
    [
        0xf1, 0x4d, 0x2c, 0x87, 0x0b, 0xe5, 0x39, 0x72, 0xbd, 0x58, 0x13, 0xca, 0x6f, 0x90,
        0x2e, 0xa7,
    ],
];

/// Filter dimensions derived from (n, p).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomSizing {
    /// Total bits (m).
    pub bits: usize,
    /// Hash functions (k).
    pub hashes: u32,
}

impl BloomSizing {
    /// Compute `m` and `k` for `expected_items` at `false_positive_target`.
    pub fn for_target(expected_items: u64, false_positive_target: f64) -> Result<Self> {
        if expected_items == 0 {
            return Err(DedupError::InvalidParameters(
                "expected item count must be positive".to_string(),
            ));
        }
        if !false_positive_target.is_finite()
            || false_positive_target <= 0.0
            || false_positive_target >= 1.0
        {
            return Err(DedupError::InvalidParameters(format!(
                "false positive target must be in (0, 1), got {false_positive_target}"
            )));
        }

        let n = expected_items as f64;
        let m = (n * false_positive_target.ln() / (1.0 / 2f64.powf(LN_2)).ln()).ceil();
        if !m.is_finite() || m < 1.0 || m > usize::MAX as f64 {
            return Err(DedupError::InvalidParameters(format!(
                "cannot size a filter for n = {expected_items}, p = {false_positive_target}"
            )));
        }
        let k = ((m / n) * LN_2).round().max(1.0);

        Ok(Self {
            bits: m as usize,
            hashes: k as u32,
        })
    }
}

/// Thread-safe Bloom filter over raw key bytes.
pub struct BloomFilter {
    store: BitArray,
    hashes: u32,
    hashers: [SipHasher13; 2],
    write_lock: Mutex<()>,
}

impl BloomFilter {
    /// Build a filter sized for `expected_items` at `false_positive_target`.
    pub fn new(expected_items: u64, false_positive_target: f64) -> Result<Self> {
        let sizing = BloomSizing::for_target(expected_items, false_positive_target)?;
        let filter = Self::with_sizing(sizing)?;
        info!(
            expected_items = expected_items,
            fp_target = false_positive_target,
            bits = filter.bits(),
            hashes = filter.hashes(),
            mib = filter.memory_bytes() as f64 / (1024.0 * 1024.0),
            "Bloom filter initialized"
        );
        Ok(filter)
    }

    /// Build a filter with explicit dimensions.
    pub fn with_sizing(sizing: BloomSizing) -> Result<Self> {
        let store = BitArray::new(sizing.bits);
        if store.is_empty() || sizing.hashes == 0 {
            return Err(DedupError::InvalidParameters(format!(
                "filter needs at least one bit and one hash, got m = {}, k = {}",
                sizing.bits, sizing.hashes
            )));
        }
        Ok(Self {
            store,
            hashes: sizing.hashes,
            hashers: [
                SipHasher13::new_with_key(&HASHER_SEEDS[0]),
                SipHasher13::new_with_key(&HASHER_SEEDS[1]),
            ],
            write_lock: Mutex::new(()),
        })
    }

    /// Number of bits (m).
    pub fn bits(&self) -> usize {
        self.store.len()
    }

    /// Number of hash functions (k).
    pub fn hashes(&self) -> u32 {
        self.hashes
    }

    pub fn count_ones(&self) -> usize {
        self.store.count_ones()
    }

    /// Fraction of bits currently set.
    pub fn fill_ratio(&self) -> f64 {
        self.count_ones() as f64 / self.bits() as f64
    }

    /// Textbook estimate `(1 - e^(-kn/m))^k` after `items` insertions.
    pub fn estimated_false_positive_rate(&self, items: u64) -> f64 {
        let k = f64::from(self.hashes);
        let exponent = -k * items as f64 / self.bits() as f64;
        (1.0 - exponent.exp()).powf(k)
    }

    fn sip_hashes(&self, key: &[u8]) -> (u64, u64) {
        let mut sip1 = self.hashers[0];
        let mut sip2 = self.hashers[1];
        sip1.write(key);
        sip2.write(key);
        (sip1.finish(), sip2.finish())
    }

    fn positions(&self, key: &[u8]) -> impl Iterator<Item = usize> {
        let (h1, h2) = self.sip_hashes(key);
        let m = self.bits() as u64;
        (0..u64::from(self.hashes)).map(move |i| {
            let cubic = i.wrapping_mul(i).wrapping_mul(i).wrapping_sub(i) / 6;
            let h = h1
                .wrapping_add(i.wrapping_mul(h2))
                .wrapping_add(cubic);
            (h % m) as usize
        })
    }

    /// Possibly present? Lock-free; may race with concurrent writers.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        for pos in self.positions(key) {
            if !self.store.get(pos)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Membership for BloomFilter {
    fn test_and_add(&self, key: &[u8]) -> Result<bool> {
        if self.contains(key)? {
            return Ok(true);
        }
        let _guard = self.write_lock.lock();
        let mut present = true;
        for pos in self.positions(key) {
            // Set every position even after one comes back clear.
            present &= self.store.set(pos)?;
        }
        Ok(present)
    }

    fn name(&self) -> &'static str {
        "bloom-filter"
    }

    fn memory_bytes(&self) -> usize {
        self.store.memory_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn reference_sizing(n: u64, p: f64) -> (usize, u32) {
        let m = (n as f64 * p.ln() / (1.0 / 2f64.powf(LN_2)).ln()).ceil();
        let k = ((m / n as f64) * LN_2).round().max(1.0);
        (m as usize, k as u32)
    }

    #[test]
    fn test_sizing_known_values() {
        assert_eq!(
            BloomSizing::for_target(10_000, 0.01).unwrap(),
            BloomSizing { bits: 95_851, hashes: 7 }
        );
        assert_eq!(
            BloomSizing::for_target(10_000_000, 0.001).unwrap(),
            BloomSizing { bits: 143_775_876, hashes: 10 }
        );
        assert_eq!(
            BloomSizing::for_target(100, 0.1).unwrap(),
            BloomSizing { bits: 480, hashes: 3 }
        );
    }

    #[test]
    fn test_sizing_matches_formulas_across_inputs() {
        for n in [1u64, 2, 7, 100, 1_000, 65_537, 1_000_000] {
            for p in [0.5, 0.25, 0.1, 0.01, 0.001, 1e-6] {
                let sizing = BloomSizing::for_target(n, p).unwrap();
                assert_eq!((sizing.bits, sizing.hashes), reference_sizing(n, p));
                // Same answer as the "-n ln p / ln2^2" form, give or take one
                // bit of floating point noise at the ceiling.
                let alt = (-(n as f64) * p.ln() / (LN_2 * LN_2)).ceil() as usize;
                assert!(sizing.bits.abs_diff(alt) <= 1, "n={n} p={p}");
            }
        }
    }

    #[test]
    fn test_smallest_filter_does_not_panic() {
        let filter = BloomFilter::new(1, 0.5).unwrap();
        assert!(filter.hashes() >= 1);
        assert_eq!(filter.bits(), 2);
        assert!(!filter.test_and_add(b"only").unwrap());
        assert!(filter.test_and_add(b"only").unwrap());
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        for (n, p) in [
            (0u64, 0.01),
            (10, 0.0),
            (10, 1.0),
            (10, -0.5),
            (10, 1.5),
            (10, f64::NAN),
            (10, f64::INFINITY),
        ] {
            assert!(
                matches!(BloomFilter::new(n, p), Err(DedupError::InvalidParameters(_))),
                "n={n} p={p}"
            );
        }
        assert!(matches!(
            BloomFilter::with_sizing(BloomSizing { bits: 0, hashes: 3 }),
            Err(DedupError::InvalidParameters(_))
        ));
        assert!(matches!(
            BloomFilter::with_sizing(BloomSizing { bits: 64, hashes: 0 }),
            Err(DedupError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_positions_are_in_range_and_stable() {
        let filter = BloomFilter::new(1_000, 0.01).unwrap();
        let a: Vec<_> = filter.positions(b"key").collect();
        let b: Vec<_> = filter.positions(b"key").collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), filter.hashes() as usize);
        assert!(a.iter().all(|&p| p < filter.bits()));
    }

    #[test]
    fn test_first_insert_is_new_second_is_present() {
        let filter = BloomFilter::new(1_000, 0.01).unwrap();
        assert!(!filter.contains(b"needle").unwrap());
        assert!(!filter.test_and_add(b"needle").unwrap());
        assert!(filter.contains(b"needle").unwrap());
        assert!(filter.test_and_add(b"needle").unwrap());
    }

    #[test]
    fn test_repeat_key_leaves_bits_untouched() {
        let filter = BloomFilter::new(1_000, 0.01).unwrap();
        filter.test_and_add(b"seen").unwrap();
        let ones = filter.count_ones();
        for _ in 0..10 {
            assert!(filter.test_and_add(b"seen").unwrap());
        }
        assert_eq!(filter.count_ones(), ones);
    }

    #[test]
    fn test_fill_only_grows() {
        let filter = BloomFilter::new(500, 0.01).unwrap();
        let mut last = 0;
        for i in 0u32..500 {
            filter.test_and_add(&i.to_be_bytes()).unwrap();
            let ones = filter.count_ones();
            assert!(ones >= last);
            last = ones;
        }
        assert!(filter.fill_ratio() > 0.0 && filter.fill_ratio() < 1.0);
    }

    #[test]
    fn test_false_positive_rate_near_target() {
        let filter = BloomFilter::new(10_000, 0.01).unwrap();
        for i in 0u64..10_000 {
            filter.test_and_add(&i.to_le_bytes()).unwrap();
        }
        let false_positives = (10_000u64..110_000)
            .filter(|i| filter.contains(&i.to_le_bytes()).unwrap())
            .count();
        let rate = false_positives as f64 / 100_000.0;
        assert!(rate < 0.02, "observed false positive rate {rate}");
        let estimate = filter.estimated_false_positive_rate(10_000);
        assert!(estimate > 0.005 && estimate < 0.015, "estimate {estimate}");
    }

    #[test]
    fn test_concurrent_disjoint_inserts_have_no_false_negatives() {
        let filter = Arc::new(BloomFilter::new(40_000, 0.01).unwrap());
        let handles: Vec<_> = (0u64..4)
            .map(|t| {
                let filter = Arc::clone(&filter);
                thread::spawn(move || {
                    for i in (t * 10_000)..((t + 1) * 10_000) {
                        filter.test_and_add(&i.to_le_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for i in 0u64..40_000 {
            assert!(filter.test_and_add(&i.to_le_bytes()).unwrap());
        }
    }

    #[test]
    fn test_concurrent_same_key_reported_new_exactly_once() {
        let filter = Arc::new(BloomFilter::new(1_000, 0.001).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let filter = Arc::clone(&filter);
                thread::spawn(move || filter.test_and_add(b"contended").unwrap())
            })
            .collect();
        let fresh = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|present| !present)
            .count();
        assert_eq!(fresh, 1);
    }

    proptest! {
        #[test]
        fn prop_no_false_negatives(keys in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..32), 1..200)
        ) {
            let filter = BloomFilter::new(100, 0.01).unwrap();
            for key in &keys {
                filter.test_and_add(key).unwrap();
            }
            for key in &keys {
                prop_assert!(filter.test_and_add(key).unwrap());
            }
        }
    }
}
