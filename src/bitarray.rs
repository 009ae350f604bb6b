// =============================================================================
// bitarray.rs - A PACKED, SHARED, ONE-WAY BIT ARRAY
// =============================================================================
//
// Bits live in 64-bit atomic words. `set` is an atomic fetch-or, so any
// number of threads can hammer the same word without losing each other's
// writes. Bits only ever go from 0 to 1: there is no clear, no reset, no
// "oops". The array is born empty and dies full-ish.
//
// Out-of-range indices are a programming error upstream (bad sizing or bad
// hashing). They come back as `OutOfRangeAccess`, never clamped or wrapped.
// =============================================================================

use portable_atomic::{AtomicU64, Ordering};

use crate::error::{DedupError, Result};

const WORD_BITS: usize = 64;

/// Fixed-size, thread-safe bit array.
#[derive(Debug)]
pub struct BitArray {
    words: Box<[AtomicU64]>,
    nbits: usize,
}

impl BitArray {
    /// Create an array of `nbits` bits, all zero.
    pub fn new(nbits: usize) -> Self {
        let nwords = nbits.div_ceil(WORD_BITS);
        let words = (0..nwords).map(|_| AtomicU64::new(0)).collect();
        Self { words, nbits }
    }

    /// Length in bits.
    pub fn len(&self) -> usize {
        self.nbits
    }

    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    fn locate(&self, index: usize) -> Result<(usize, u64)> {
        if index >= self.nbits {
            return Err(DedupError::OutOfRangeAccess {
                index,
                len: self.nbits,
            });
        }
        Ok((index / WORD_BITS, 1u64 << (index % WORD_BITS)))
    }

    /// Set a bit. Returns whether it was already set before this call.
    pub fn set(&self, index: usize) -> Result<bool> {
        let (word, mask) = self.locate(index)?;
        let previous = self.words[word].fetch_or(mask, Ordering::AcqRel);
        Ok(previous & mask != 0)
    }

    /// Check whether a bit is set.
    pub fn get(&self, index: usize) -> Result<bool> {
        let (word, mask) = self.locate(index)?;
        Ok(self.words[word].load(Ordering::Acquire) & mask != 0)
    }

    /// Count the `1` bits. A racing snapshot if writers are active.
    pub fn count_ones(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Bytes held by the word storage.
    pub fn memory_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<AtomicU64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_word_rounding() {
        assert_eq!(BitArray::new(0).words.len(), 0);
        assert!(BitArray::new(0).is_empty());
        assert_eq!(BitArray::new(1).words.len(), 1);
        assert_eq!(BitArray::new(64).words.len(), 1);
        assert_eq!(BitArray::new(65).words.len(), 2);
        assert_eq!(BitArray::new(65).len(), 65);
        assert_eq!(BitArray::new(65).memory_bytes(), 16);
    }

    #[test]
    fn test_starts_all_zero() {
        let bits = BitArray::new(130);
        for i in 0..130 {
            assert!(!bits.get(i).unwrap());
        }
        assert_eq!(bits.count_ones(), 0);
    }

    #[test]
    fn test_set_reports_previous_state() {
        let bits = BitArray::new(9);
        assert!(!bits.set(8).unwrap());
        assert!(bits.set(8).unwrap());
        assert!(bits.get(8).unwrap());
        for i in 0..8 {
            assert!(!bits.get(i).unwrap());
        }
        assert_eq!(bits.count_ones(), 1);
    }

    #[test]
    fn test_word_boundaries() {
        let bits = BitArray::new(200);
        for i in [0, 63, 64, 127, 128, 199] {
            bits.set(i).unwrap();
        }
        for i in [0, 63, 64, 127, 128, 199] {
            assert!(bits.get(i).unwrap());
        }
        assert!(!bits.get(62).unwrap());
        assert!(!bits.get(65).unwrap());
        assert_eq!(bits.count_ones(), 6);
    }

    #[test]
    fn test_set_out_of_range_is_an_error() {
        let bits = BitArray::new(5);
        match bits.set(5) {
            Err(DedupError::OutOfRangeAccess { index, len }) => {
                assert_eq!(index, 5);
                assert_eq!(len, 5);
            }
            other => panic!("expected OutOfRangeAccess, got {other:?}"),
        }
        assert_eq!(bits.count_ones(), 0);
    }

    #[test]
    fn test_get_out_of_range_is_an_error() {
        // Index 70 lives in a word that exists, but past the logical length.
        let bits = BitArray::new(66);
        assert!(matches!(
            bits.get(70),
            Err(DedupError::OutOfRangeAccess { index: 70, len: 66 })
        ));
        assert!(matches!(
            BitArray::new(0).get(0),
            Err(DedupError::OutOfRangeAccess { .. })
        ));
    }

    #[test]
    fn test_set_bits_stay_set() {
        let bits = BitArray::new(256);
        for i in (0..256).step_by(3) {
            bits.set(i).unwrap();
        }
        let before = bits.count_ones();
        for i in 0..256 {
            bits.set(i).unwrap();
        }
        for i in (0..256).step_by(3) {
            assert!(bits.get(i).unwrap());
        }
        assert!(bits.count_ones() >= before);
        assert_eq!(bits.count_ones(), 256);
    }

    #[test]
    fn test_concurrent_sets_are_not_lost() {
        // Eight threads each own every eighth bit, so all of them contend on
        // every word.
        let bits = Arc::new(BitArray::new(64 * 64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let bits = Arc::clone(&bits);
                thread::spawn(move || {
                    for i in (t..64 * 64).step_by(8) {
                        bits.set(i).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(bits.count_ones(), 64 * 64);
    }
}
