//! Explicit, splittable randomness.

use rand::rngs::StdRng;
use rand::SeedableRng;

const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

/// SplitMix64 finaliser.
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// A randomness token. Operations never read ambient randomness: every call
/// takes a key and splits it when it needs independent sub-randomness.
///
/// Equal keys reproduce equal outputs; distinct keys obtained through
/// [`PrngKey::split`] or [`PrngKey::split_n`] are treated as independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrngKey(u64);

impl PrngKey {
    pub fn new(seed: u64) -> Self {
        PrngKey(mix(seed))
    }

    /// Derive the `i`-th child key.
    pub fn fold_in(&self, i: u64) -> Self {
        PrngKey(mix(self.0 ^ mix(i.wrapping_add(1).wrapping_mul(GOLDEN_GAMMA))))
    }

    pub fn split(&self) -> (PrngKey, PrngKey) {
        (self.fold_in(0), self.fold_in(1))
    }

    pub fn split_n(&self, n: usize) -> Vec<PrngKey> {
        (0..n as u64).map(|i| self.fold_in(i)).collect()
    }

    /// A generator seeded from this key. Consuming the same key twice yields
    /// the same stream.
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.0)
    }
}
