//!
//! Keys are not stored whole. Each table addresses a slot with the low
//! `addr_bits` of a *permuted* key and stores only the high remainder, so a
//! slot spends fewer bits than the key is wide. For that split to be
//! reversible the hash must be lossless: the whole function is a bijection
//! over the key universe, and the table's bucket compression merely
//! truncates it
//!
//! hash = compression • permutation
//!
//!  * permutation: [0 .. 2^W) → [0 .. 2^W);
//!    reifies the randomness of the hash as a (read lossless) bijection
//!  * compression: keeps the low `addr_bits` as the bucket address;
//!    the discarded high bits are exactly what the slot stores
//!
//! The permutation itself is a one-round Feistel network: the low (address)
//! half is XOR-masked with a pairwise-independent multiply-add hash of the
//! high half. One round keeps the high half untouched, which makes the
//! remainder of a key independent of the hash id, and makes the round its
//! own inverse. Each hash id of a family draws its own round keys from the
//! table seed, so distinct ids behave as independent permutations while
//! sharing the cheap skeleton.

use crate::bits::mask;
use rand::thread_rng;
use rand::Rng;

/// Seed material for a permutation family: one 64-bit round seed per hash
/// function of the default three-hash family. Hash ids beyond the third
/// reuse the triple with an id-dependent mix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Seed(pub [u64; 3]);

impl Seed {
    /// Draws fresh seed material from the thread-local generator.
    pub fn random() -> Self {
        Seed(thread_rng().gen())
    }

    /// Deterministically derives an independent seed. Gives the iceberg
    /// secondary its own hash family from one caller-supplied seed.
    pub(crate) fn derive(self, salt: u64) -> Seed {
        Seed(self.0.map(|word| {
            let mut state = word ^ salt;
            splitmix64(&mut state)
        }))
    }
}

/// One standard splitmix64 step, used to stretch a seed word into the
/// per-hash-id round keys.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// A single member σᵢ of the keyed bijection family over `[0, 2^key_bits)`.
#[derive(Clone, Copy, Debug)]
pub struct Permutation {
    mul: u64,
    add: u64,
    key_bits: u32,
    addr_bits: u32,
}

impl Permutation {
    /// Builds the family {σ₀, …, σ_{H−1}} for one table level.
    pub(crate) fn family<const H: usize>(
        key_bits: u32,
        addr_bits: u32,
        seed: Seed,
    ) -> [Permutation; H] {
        core::array::from_fn(|i| {
            let mut state = seed.0[i % 3] ^ (i as u64).wrapping_mul(0xA24BAED4963EE407);
            // The multiplier must be odd for the multiply-add hash to use
            // all of its input bits.
            let mul = splitmix64(&mut state) | 1;
            let add = splitmix64(&mut state);
            Permutation {
                mul,
                add,
                key_bits,
                addr_bits,
            }
        })
    }

    /// Pairwise-independent round function over the high (remainder) half,
    /// truncated to the address width.
    #[inline]
    fn round(&self, hi: u64) -> u64 {
        hi.wrapping_mul(self.mul).wrapping_add(self.add) >> (64 - self.addr_bits)
    }

    /// σᵢ(key). The low `addr_bits` of the image are the bucket address,
    /// the high bits are the remainder.
    #[inline]
    pub fn apply(&self, key: u64) -> u64 {
        debug_assert!(key <= mask(self.key_bits));
        let hi = key >> self.addr_bits;
        let lo = key & mask(self.addr_bits);
        (hi << self.addr_bits) | (lo ^ self.round(hi))
    }

    /// σᵢ⁻¹(image). Exact for every image: the XOR round against the
    /// untouched high half is an involution.
    #[inline]
    pub fn invert(&self, image: u64) -> u64 {
        self.apply(image)
    }
}
