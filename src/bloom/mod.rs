pub mod builder;

pub use builder::BloomFilterBuilder;

use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Error, Result};

/// Lowest and highest false positive rate a filter is sized for. Rates from
/// [`Options`](crate::Options) outside this range are clamped.
const MIN_FPR: f64 = 1e-6;
const MAX_FPR: f64 = 0.5;

/// Per-segment membership filter over user keys.
///
/// `may_contain` returning false means no version of the key, value or
/// tombstone, is stored in the segment, so a point lookup or a conflict
/// check can skip it without touching a data block.
///
/// Sized with the usual formulas:
///   bits_per_key = -1.44 * log2(fpr)
///   probes       = bits_per_key * ln(2)
///
/// Probe positions come from one xxh3-128 hash split into two halves,
/// `h1 + i * h2 (mod m)`.
pub struct BloomFilter {
    words: Vec<u64>,
    probes: u32,
    num_bits: u32,
}

impl BloomFilter {
    /// Empty filter for about `expected_keys` keys at `false_positive_rate`.
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Self {
        let rate = if false_positive_rate.is_nan() {
            MAX_FPR
        } else {
            false_positive_rate.clamp(MIN_FPR, MAX_FPR)
        };
        let bits_per_key = -1.44 * rate.log2();
        let wanted = (expected_keys.max(1) as f64 * bits_per_key).ceil();
        let num_bits = (wanted.min(u32::MAX as f64) as u32).max(64);
        let probes = ((bits_per_key * std::f64::consts::LN_2).ceil() as u32).clamp(1, 30);

        BloomFilter {
            words: vec![0; (num_bits as usize).div_ceil(64)],
            probes,
            num_bits,
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        for pos in self.positions(key) {
            self.words[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    /// False only when `key` was never inserted.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.positions(key)
            .all(|pos| self.words[(pos / 64) as usize] & (1 << (pos % 64)) != 0)
    }

    /// `[probes(4B)][num_bits(4B)][words(8B each)]`, little-endian.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.words.len() * 8);
        buf.extend_from_slice(&self.probes.to_le_bytes());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        for word in &self.words {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Parse a filter written by [`serialize`](Self::serialize).
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::Corruption("bloom filter too short".into()));
        }
        let probes = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let num_bits = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let word_count = (num_bits as usize).div_ceil(64);
        if probes == 0 || num_bits == 0 || data.len() != 8 + word_count * 8 {
            return Err(Error::Corruption(format!(
                "bloom filter of {num_bits} bits stored in {} bytes",
                data.len()
            )));
        }

        let words = data[8..]
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect();
        Ok(BloomFilter {
            words,
            probes,
            num_bits,
        })
    }

    pub fn num_hashes(&self) -> u32 {
        self.probes
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    fn positions(&self, key: &[u8]) -> impl Iterator<Item = u32> + use<> {
        let hash = xxh3_128(key);
        let h1 = hash as u64;
        let h2 = (hash >> 64) as u64;
        let m = u64::from(self.num_bits);
        (0..u64::from(self.probes)).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as u32)
    }
}
