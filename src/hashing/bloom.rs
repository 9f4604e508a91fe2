//! Bloom filter for fast negative probes on join build keys.
//!
//! # Properties
//!
//! - No false negatives: if `might_contain` returns `false`, the key is
//!   definitely not in the set.
//! - Possible false positives: a `true` answer still requires a hash
//!   table lookup.
//! - Two probe bits per key; at the default 8 bits per key the false
//!   positive rate is about 5%.

/// A two-hash Bloom filter over pre-hashed u64 keys.
///
/// The two probe positions derive from the key itself: the key is already
/// a 64-bit hash, so the second probe reuses its upper bits mixed with an
/// odd constant. The bit array is a vector of u64 words.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    words: Vec<u64>,
    bit_mask: u64,
}

const DEFAULT_BITS_PER_KEY: usize = 8;

impl BloomFilter {
    /// Size the filter for `expected_keys` at the default ~5% false
    /// positive rate.
    pub fn new(expected_keys: usize) -> Self {
        Self::with_bits(expected_keys.saturating_mul(DEFAULT_BITS_PER_KEY))
    }

    /// Size the filter with an explicit bit count (rounded up to a power
    /// of two).
    pub fn with_bits(bits: usize) -> Self {
        let bits = bits.max(64).next_power_of_two();
        BloomFilter {
            words: vec![0u64; bits / 64],
            bit_mask: (bits - 1) as u64,
        }
    }

    /// Insert a pre-hashed key.
    pub fn insert(&mut self, key: u64) {
        let (b1, b2) = self.probe_bits(key);
        self.words[(b1 / 64) as usize] |= 1u64 << (b1 % 64);
        self.words[(b2 / 64) as usize] |= 1u64 << (b2 % 64);
    }

    /// Whether the key might be present. `false` is definitive.
    pub fn might_contain(&self, key: u64) -> bool {
        let (b1, b2) = self.probe_bits(key);
        self.words[(b1 / 64) as usize] & (1u64 << (b1 % 64)) != 0
            && self.words[(b2 / 64) as usize] & (1u64 << (b2 % 64)) != 0
    }

    /// Bits allocated.
    pub fn num_bits(&self) -> usize {
        self.words.len() * 64
    }

    pub fn memory_size(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }

    #[inline]
    fn probe_bits(&self, key: u64) -> (u64, u64) {
        let h1 = key;
        let h2 = (key >> 32).wrapping_mul(0xff51_afd7_ed55_8ccd) | 1;
        (h1 & self.bit_mask, h2 & self.bit_mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::new(1000);
        let keys: Vec<u64> = (0..1000u64)
            .map(|k| k.wrapping_mul(0x9e37_79b9_7f4a_7c15))
            .collect();
        for &k in &keys {
            filter.insert(k);
        }
        for &k in &keys {
            assert!(filter.might_contain(k));
        }
    }

    #[test]
    fn test_false_positive_rate_reasonable() {
        let mut filter = BloomFilter::new(10_000);
        for k in 0..10_000u64 {
            filter.insert(k.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        }
        let false_positives = (0..10_000u64)
            .map(|k| (k + 1_000_000).wrapping_mul(0x2545_f491_4f6c_dd1d))
            .filter(|&k| filter.might_contain(k))
            .count();
        // ~5% expected; allow slack for the fixed key sequence.
        assert!(false_positives < 1000, "fp = {false_positives}");
    }

    #[test]
    fn test_empty_filter_rejects() {
        let filter = BloomFilter::new(100);
        assert!(!filter.might_contain(12345));
    }

    #[test]
    fn test_bit_sizing() {
        let filter = BloomFilter::with_bits(1000);
        assert_eq!(filter.num_bits(), 1024);
    }
}
