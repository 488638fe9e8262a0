//! Seed derivation for the seeded RNGs.
//!
//! `std`'s `DefaultHasher` may change between Rust releases, which would
//! silently change generated samples and jittered scores. Seeds are instead
//! folded with FNV-1a over little-endian bytes and finished with the
//! SplitMix64 finalizer, so a given input maps to the same seed everywhere.
//! The RNG stream itself still depends on the `rand` version in `Cargo.lock`.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Builder for a stable 64-bit seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedMixer(u64);

impl Default for SeedMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedMixer {
    pub fn new() -> Self {
        Self(FNV_OFFSET)
    }

    fn bytes(mut self, bytes: &[u8]) -> Self {
        for b in bytes {
            self.0 ^= u64::from(*b);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
        self
    }

    pub fn u64(self, v: u64) -> Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u32(self, v: u32) -> Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn i32(self, v: i32) -> Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn f64(self, v: f64) -> Self {
        self.u64(v.to_bits())
    }

    /// Length-prefixed, so `("ab", "c")` and `("a", "bc")` differ.
    pub fn str(self, s: &str) -> Self {
        self.u64(s.len() as u64).bytes(s.as_bytes())
    }

    pub fn finish(self) -> u64 {
        let mut z = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_are_pinned() {
        // Changing these values changes every generated sample.
        assert_eq!(SeedMixer::new().finish(), 0xc381_7c01_6ba4_ff30);
        assert_eq!(SeedMixer::new().u64(7).str("SEC001").finish(), 0xe4c2_85a5_dfa3_62ca);
    }

    #[test]
    fn strings_are_length_prefixed() {
        let a = SeedMixer::new().str("ab").str("c").finish();
        let b = SeedMixer::new().str("a").str("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn order_matters() {
        let a = SeedMixer::new().u32(1).u32(2).finish();
        let b = SeedMixer::new().u32(2).u32(1).finish();
        assert_ne!(a, b);
    }
}
