// =============================================================================
// dedup.rs - "HAVE I SEEN YOU BEFORE?"
// =============================================================================
//
// Two answers to the same question, behind one trait:
//
// 1. `BloomFilter` (see bloom.rs) - fixed memory, sized up front, sometimes
//    says "yes" when the honest answer is "no". Never says "no" when the
//    honest answer is "yes".
//
// 2. `ExactIndex` (below) - a HashSet of fingerprints. Always right. Grows
//    forever. This is the ground truth the Bloom filter gets graded against.
//
// The scan driver only ever talks to `Membership`, so both run through the
// exact same code path and the comparison stays fair.
// =============================================================================

use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::info;

use crate::error::Result;

/// The one capability the scan driver needs: test a key, then remember it.
pub trait Membership: Send + Sync {
    /// Returns `true` if `key` was (possibly) present before this call.
    /// The key is always present afterwards.
    fn test_and_add(&self, key: &[u8]) -> Result<bool>;

    /// Short name for logs and summaries.
    fn name(&self) -> &'static str;

    /// Approximate bytes held by the structure itself.
    fn memory_bytes(&self) -> usize;
}

/// Exact membership over raw key bytes. No false anything; unbounded memory.
pub struct ExactIndex {
    seen: Mutex<HashSet<Box<[u8]>>>,
}

impl ExactIndex {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Pre-size the set. Rehashing thirty million entries mid-scan skews the
    /// timing comparison, so the CLI reserves up front.
    pub fn with_capacity(capacity: usize) -> Self {
        info!(capacity = capacity, "Exact index initialized");
        Self {
            seen: Mutex::new(HashSet::with_capacity(capacity)),
        }
    }

    /// Distinct keys stored so far.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl Default for ExactIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Membership for ExactIndex {
    fn test_and_add(&self, key: &[u8]) -> Result<bool> {
        let mut seen = self.seen.lock();
        if seen.contains(key) {
            return Ok(true);
        }
        seen.insert(key.into());
        Ok(false)
    }

    fn name(&self) -> &'static str {
        "exact-index"
    }

    fn memory_bytes(&self) -> usize {
        let seen = self.seen.lock();
        // Table slots (fat pointer + control byte) plus each boxed key.
        let slot = std::mem::size_of::<Box<[u8]>>() + 1;
        let keys: usize = seen.iter().map(|k| k.len()).sum();
        seen.capacity() * slot + keys
    }
}
