//! Probabilistic recently-freed-address membership set (§4.A).
//!
//! `check` is advisory: a positive result means "possibly present", never
//! "definitely present". Callers that need to distinguish a genuine
//! double free from a false positive should pair `check` with
//! [`RecentFrees`], the small exact-set cache from Design Note "Bloom
//! filter interaction with real double-free" (§9).

use std::collections::VecDeque;

/// Construction parameters for a [`BloomFilter`], per Design Note (ii):
/// capacity and the reset policy are explicit, not compile-time constants.
#[derive(Debug, Clone, Copy)]
pub struct BloomConfig {
    /// Size of the bit array, in bits. Rounded up to a multiple of 64.
    pub bits: usize,
    /// Number of hash positions set per insert.
    pub hashes: usize,
    /// Once the number of insertions since the last (or initial) `clear`
    /// exceeds this count, the next `add` clears the filter first, to cap
    /// the false-positive rate under sustained churn.
    pub reset_high_water: usize,
}

impl Default for BloomConfig {
    /// Sized for ~10M expected items at <1% false-positive rate
    /// (`m ≈ -n·ln(p)/(ln 2)²`, `k ≈ (m/n)·ln 2`), per §3 "Bloom filter".
    fn default() -> Self {
        BloomConfig {
            bits: 1 << 27, // 128 Mi bits = 16 MiB.
            hashes: 7,
            reset_high_water: 9_500_000,
        }
    }
}

/// Odd multiplicative-hash constants used to derive `hashes` independent
/// bit positions from a single pointer value. Distinct and odd so each
/// produces a different permutation of the address bits.
const MULTIPLIERS: [u64; 8] = [
    0x9E37_79B9_7F4A_7C15,
    0xC2B2_AE3D_27D4_EB4F,
    0x1656_67B1_9E37_79F9,
    0xFF51_AFD7_ED55_8CCD,
    0xC4CE_B9FE_1A85_EC53,
    0xD6E8_FEB8_6659_FD93,
    0xA24B_AED4_963E_E407,
    0x9FB2_1C65_1E98_DF25,
];

/// A fixed-size bit array with k-hash-position membership testing.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    config: BloomConfig,
    words: Vec<u64>,
    inserted_since_reset: usize,
}

impl BloomFilter {
    /// Build an empty filter sized per `config`.
    pub fn new(config: BloomConfig) -> BloomFilter {
        let word_count = config.bits.div_ceil(64).max(1);
        BloomFilter {
            config,
            words: vec![0u64; word_count],
            inserted_since_reset: 0,
        }
    }

    /// Record `ptr` as (possibly) freed. If the high-water mark has been
    /// exceeded, clears the filter first (§4.D "Periodically reset the
    /// Bloom filter once insertion count exceeds a high-water mark").
    pub fn add(&mut self, ptr: usize) {
        if self.inserted_since_reset >= self.config.reset_high_water {
            self.clear();
        }
        for bit in self.hash_positions(ptr) {
            let (word, offset) = (bit / 64, bit % 64);
            self.words[word] |= 1u64 << offset;
        }
        self.inserted_since_reset += 1;
    }

    /// "Possibly present" (`true`) or "definitely absent" (`false`).
    pub fn check(&self, ptr: usize) -> bool {
        self.hash_positions(ptr)
            .all(|bit| self.words[bit / 64] & (1u64 << (bit % 64)) != 0)
    }

    /// Clear every bit and reset the insertion counter.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.inserted_since_reset = 0;
    }

    /// The textbook false-positive-rate estimate for `n` items inserted
    /// into this filter's configured size: `(1 - e^(-kn/m))^k`.
    pub fn estimated_false_positive_rate(&self, n: usize) -> f64 {
        let m = (self.words.len() * 64) as f64;
        let k = self.config.hashes as f64;
        let n = n as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    /// Resident size of the bit array, in bytes.
    pub fn memory_usage(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }

    fn hash_positions(&self, ptr: usize) -> impl Iterator<Item = usize> + '_ {
        let bits = (self.words.len() * 64) as u64;
        let base = ptr as u64;
        MULTIPLIERS
            .iter()
            .take(self.config.hashes)
            .map(move |m| (base.wrapping_mul(*m).rotate_left(17) % bits) as usize)
    }
}

/// The last `capacity` freed addresses, consulted on a Bloom hit to
/// classify it as a genuine double free rather than a false positive
/// before any counter is updated (§9 Design Note "Bloom filter
/// interaction with real double-free").
#[derive(Debug)]
pub struct RecentFrees {
    capacity: usize,
    ring: VecDeque<usize>,
}

impl RecentFrees {
    /// An empty cache holding up to `capacity` addresses.
    pub fn new(capacity: usize) -> RecentFrees {
        RecentFrees {
            capacity,
            ring: VecDeque::with_capacity(capacity),
        }
    }

    /// Record `ptr` as freed, evicting the oldest entry if at capacity.
    pub fn record(&mut self, ptr: usize) {
        if self.ring.len() >= self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(ptr);
    }

    /// Whether `ptr` is exactly in the recent-frees cache — a true
    /// double-free signal, as opposed to the Bloom filter's mere
    /// "possibly present".
    pub fn contains(&self, ptr: usize) -> bool {
        self.ring.contains(&ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> BloomConfig {
        BloomConfig {
            bits: 1 << 16,
            hashes: 4,
            reset_high_water: 1000,
        }
    }

    #[test]
    fn added_pointer_is_possibly_present() {
        let mut filter = BloomFilter::new(small_config());
        filter.add(0x1000);
        assert!(filter.check(0x1000));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut filter = BloomFilter::new(small_config());
        filter.add(0x1000);
        filter.clear();
        // Not a guarantee in general (false positives remain possible),
        // but with a sparsely-populated small filter this specific address
        // should read absent again.
        assert!(!filter.check(0x1000));
    }

    #[test]
    fn reset_high_water_triggers_automatic_clear() {
        let mut filter = BloomFilter::new(BloomConfig {
            bits: 1 << 20,
            hashes: 4,
            reset_high_water: 4,
        });
        for i in 0..4u64 {
            filter.add(0x1000 + i as usize);
        }
        assert_eq!(filter.inserted_since_reset, 4);
        filter.add(0x2000);
        // The high-water mark was hit before this insert, so this is the
        // first insert after an automatic clear.
        assert_eq!(filter.inserted_since_reset, 1);
    }

    #[test]
    fn memory_usage_matches_configured_bit_count() {
        let filter = BloomFilter::new(small_config());
        assert_eq!(filter.memory_usage(), (1usize << 16) / 8);
    }

    #[test]
    fn false_positive_rate_increases_with_load() {
        let filter = BloomFilter::new(BloomConfig::default());
        let light = filter.estimated_false_positive_rate(1_000);
        let heavy = filter.estimated_false_positive_rate(10_000_000);
        assert!(heavy > light);
        assert!(heavy < 1.0 / 50.0 * 2.0); // stays in the right ballpark
    }

    #[test]
    fn recent_frees_classifies_exact_hits() {
        let mut recent = RecentFrees::new(4);
        recent.record(0x1000);
        recent.record(0x2000);
        assert!(recent.contains(0x1000));
        assert!(!recent.contains(0x3000));
    }

    #[test]
    fn recent_frees_evicts_oldest_past_capacity() {
        let mut recent = RecentFrees::new(2);
        recent.record(0x1);
        recent.record(0x2);
        recent.record(0x3);
        assert!(!recent.contains(0x1));
        assert!(recent.contains(0x2));
        assert!(recent.contains(0x3));
    }
}
