//! Filter policies.
//!
//! A [`FilterPolicy`] maps a set of keys to a compact byte string that
//! can later answer "might this key be in the set?" with no false
//! negatives. Tables built with a policy carry one filter per 2 KiB
//! region of data-block bytes, letting point reads skip block fetches
//! for keys a table cannot contain.
//!
//! The built-in [`BloomFilterPolicy`] uses double hashing: a single base
//! hash per key, advanced by its own 17-bit rotation per probe. The probe
//! count `k` is derived from `bits_per_key` and stored as the final byte
//! of each filter so old filters stay readable if the parameter changes.

#[cfg(test)]
mod tests;

/// Policy for creating and querying per-table filters.
///
/// `key_may_match` must return `true` for every key that was passed to
/// `create_filter` for that filter. It may return `true` for absent keys
/// (the false-positive cost is an extra block read), never the reverse.
pub trait FilterPolicy: Send + Sync {
    /// Name persisted in the table's meta-index block. Change it
    /// whenever the filter byte format changes incompatibly.
    fn name(&self) -> &str;

    /// Build a filter over `keys`.
    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8>;

    /// True if `key` may be in the set `filter` was built from.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// FNV-1a, 32-bit, with a caller-chosen basis so the bloom probes are
/// decorrelated from any other hashing in the crate.
fn bloom_hash(data: &[u8]) -> u32 {
    const FNV_PRIME: u32 = 0x01000193;
    let mut hash: u32 = 0xbc9f1d34;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Bloom filter with double hashing.
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    k: usize,
}

impl BloomFilterPolicy {
    /// `bits_per_key` ≈ 10 yields a ~1% false-positive rate.
    pub fn new(bits_per_key: usize) -> Self {
        // Rounding down reduces probing cost a little.
        let k = (bits_per_key as f64 * 0.69) as usize; // 0.69 =~ ln(2)
        BloomFilterPolicy {
            bits_per_key,
            k: k.clamp(1, 30),
        }
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &str {
        "stratadb.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8> {
        // Small filter sets keep a floor of 64 bits to bound the
        // false-positive rate.
        let bits = std::cmp::max(keys.len() * self.bits_per_key, 64);
        let bytes = (bits + 7) / 8;
        let bits = bytes * 8;

        let mut filter = vec![0u8; bytes];
        for key in keys {
            let mut h = bloom_hash(key);
            let delta = h.rotate_right(17);
            for _ in 0..self.k {
                let bit_pos = (h % bits as u32) as usize;
                filter[bit_pos / 8] |= 1 << (bit_pos % 8);
                h = h.wrapping_add(delta);
            }
        }
        // Probe count rides along so readers built with a different
        // bits_per_key still decode this filter.
        filter.push(self.k as u8);
        filter
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            return false;
        }
        let bits = (filter.len() - 1) * 8;
        let k = filter[filter.len() - 1] as usize;
        if k > 30 {
            // Reserved for future encodings; err on the side of a read.
            return true;
        }

        let mut h = bloom_hash(key);
        let delta = h.rotate_right(17);
        for _ in 0..k {
            let bit_pos = (h % bits as u32) as usize;
            if filter[bit_pos / 8] & (1 << (bit_pos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}
