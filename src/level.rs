//! One compact table level: a power-of-two array of buckets whose slots
//! store `(state, remainder)` rows.
//!
//! A row packs a state tag in its top bits (`0` = empty, `1 + i` = occupied
//! via hash `i`) and the remainder of the permuted key in its bottom bits.
//! Together with the bucket address the row reconstructs the original key:
//!
//! key = σᵢ⁻¹((remainder ≪ addr_bits) | address)
//!
//! Slots are monotone: once occupied they are only ever overwritten with
//! another occupied row (cuckoo displacement) or wiped by a whole-level
//! clear. The put protocol relies on this: the occupied slots of a bucket
//! always form a prefix, so the popcount of an occupancy ballot is the next
//! free lane.

use crate::bits::bit_width;
use crate::bits::mask;
use crate::coop;
use crate::outcome::Outcome;
use crate::perm::Permutation;
use crate::perm::Seed;
use crate::slab::Slab;
use crate::Key;

/// Shape of one table level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// Key width in bits; the universe is `[0, 2^key_bits)`.
    pub key_bits: u32,
    /// Address width in bits; the level has `2^addr_bits` buckets.
    pub addr_bits: u32,
    /// Stored row width in bits. Must hold the state tag and the
    /// `key_bits − addr_bits` remainder.
    pub row_bits: u32,
}

impl Geometry {
    pub fn new(key_bits: u32, addr_bits: u32, row_bits: u32) -> Self {
        Geometry {
            key_bits,
            addr_bits,
            row_bits,
        }
    }

    /// Number of buckets in the level.
    #[inline]
    pub fn buckets(&self) -> usize {
        1 << self.addr_bits
    }
}

/// Rejected construction parameters. Construction is the only fallible
/// surface; capacity exhaustion is reported per key as [`Outcome::Full`].
#[derive(Debug, PartialEq, Eq)]
pub enum GeometryError {
    /// `key_bits` is zero or exceeds the 64-bit word.
    KeyWidth { key_bits: u32 },
    /// `addr_bits` is zero or does not leave room for a remainder.
    AddrWidth { addr_bits: u32, key_bits: u32 },
    /// `row_bits` cannot hold the state tag plus the remainder, or exceeds
    /// the 64-bit slot word.
    RowWidth { row_bits: u32, needed: u32 },
    /// Bucket size must be a power of two dividing the warp width.
    BucketSize { bucket_size: usize },
    /// A level needs at least one hash function.
    HashCount { hash_count: usize },
    /// Iceberg levels store one key universe; their key widths must agree.
    KeyWidthMismatch { primary: u32, secondary: u32 },
}

#[derive(Debug)]
pub(crate) struct Level<const B: usize, const H: usize> {
    geo: Geometry,
    /// Bit position of the state tag within a row.
    state_shift: u32,
    perms: [Permutation; H],
    slab: Slab,
}

impl<const B: usize, const H: usize> Level<B, H> {
    pub fn new(geo: Geometry, seed: Seed) -> Result<Self, GeometryError> {
        if H == 0 {
            return Err(GeometryError::HashCount { hash_count: H });
        }
        if B == 0 || !B.is_power_of_two() || coop::WARP_WIDTH % B != 0 {
            return Err(GeometryError::BucketSize { bucket_size: B });
        }
        if geo.key_bits == 0 || geo.key_bits > 64 {
            return Err(GeometryError::KeyWidth {
                key_bits: geo.key_bits,
            });
        }
        if geo.addr_bits == 0 || geo.addr_bits >= geo.key_bits {
            return Err(GeometryError::AddrWidth {
                addr_bits: geo.addr_bits,
                key_bits: geo.key_bits,
            });
        }
        let needed = bit_width(H as u64) + (geo.key_bits - geo.addr_bits);
        if geo.row_bits < needed || geo.row_bits > 64 {
            return Err(GeometryError::RowWidth {
                row_bits: geo.row_bits,
                needed,
            });
        }
        Ok(Level {
            geo,
            state_shift: geo.row_bits - bit_width(H as u64),
            perms: Permutation::family::<H>(geo.key_bits, geo.addr_bits, seed),
            slab: Slab::new(geo.buckets() * B),
        })
    }

    #[inline]
    pub fn geometry(&self) -> Geometry {
        self.geo
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slab.len()
    }

    /// Bucket address and stored row of `key` under hash `i`.
    #[inline]
    pub fn addr_row(&self, i: usize, key: Key) -> (usize, u64) {
        let image = self.perms[i].apply(key);
        let address = (image & mask(self.geo.addr_bits)) as usize;
        let remainder = image >> self.geo.addr_bits;
        (address, ((i as u64 + 1) << self.state_shift) | remainder)
    }

    /// Recovers `(hash id, key)` from an occupied row at `address`.
    #[inline]
    pub fn decode(&self, address: usize, row: u64) -> (usize, Key) {
        let state = row >> self.state_shift;
        debug_assert!(state != 0 && state as usize <= H);
        let i = state as usize - 1;
        let remainder = row & mask(self.geo.key_bits - self.geo.addr_bits);
        let image = (remainder << self.geo.addr_bits) | address as u64;
        (i, self.perms[i].invert(image))
    }

    /// Cooperative find. Safe against concurrent puts, but a put of the
    /// same key racing this probe may be missed.
    pub fn find(&self, key: Key) -> bool {
        for i in 0..H {
            let (address, row) = self.addr_row(i, key);
            let lanes = self.slab.bucket::<B>(address);
            if coop::ballot(&lanes, |slot| slot == row) != 0 {
                return true;
            }
            // Monotonicity: an empty slot means this hash never stored the
            // key, and no later hash was tried either.
            if coop::ballot(&lanes, |slot| slot == 0) != 0 {
                return false;
            }
        }
        false
    }

    /// Cooperative put with the full eviction chain.
    pub fn put(&self, key: Key, avoid_dups: bool, max_chain: u32) -> Outcome {
        let mut key = key;
        let mut hash = 0;
        let mut chain = 0;
        loop {
            let (address, row) = self.addr_row(hash, key);
            let lanes = self.slab.bucket::<B>(address);
            if avoid_dups && coop::ballot(&lanes, |slot| slot == row) != 0 {
                return Outcome::Found;
            }
            let load = coop::ballot(&lanes, |slot| slot != 0).count_ones() as usize;
            if load < B {
                match self.slab.publish(address * B + load, row) {
                    Ok(()) => return Outcome::Put,
                    Err(occupied) => {
                        if avoid_dups && occupied == row {
                            return Outcome::Found;
                        }
                        // Another insert claimed the lane; reprobe this hash.
                        continue;
                    }
                }
            }
            if chain >= max_chain {
                return Outcome::Full;
            }
            // Rotating victim lane: varies with the bucket and the chain
            // step, so concurrent chains spread their atomics over the
            // bucket instead of hammering one slot.
            let victim = (address + chain as usize) % B;
            let evicted = self.slab.displace(address * B + victim, row);
            let (evicted_hash, evicted_key) = self.decode(address, evicted);
            key = evicted_key;
            hash = (evicted_hash + 1) % H;
            chain += 1;
        }
    }

    /// Put restricted to the bucket of hash `i`: claims the leftmost free
    /// lane, never evicts. `None` means the bucket is full.
    pub fn put_in_bucket(&self, i: usize, key: Key, avoid_dups: bool) -> Option<Outcome> {
        let (address, row) = self.addr_row(i, key);
        loop {
            let lanes = self.slab.bucket::<B>(address);
            if avoid_dups && coop::ballot(&lanes, |slot| slot == row) != 0 {
                return Some(Outcome::Found);
            }
            let lane = coop::first_set(coop::ballot(&lanes, |slot| slot == 0))?;
            match self.slab.publish(address * B + lane, row) {
                Ok(()) => return Some(Outcome::Put),
                Err(occupied) => {
                    if avoid_dups && occupied == row {
                        return Some(Outcome::Found);
                    }
                    // Lost the lane race; reprobe the bucket.
                }
            }
        }
    }

    /// Occurrences of `key` over the whole level. Host-side scan; only
    /// meaningful after concurrent operations have completed.
    pub fn count(&self, key: Key) -> usize {
        self.slab
            .rows()
            .enumerate()
            .filter(|&(index, row)| row != 0 && self.decode(index / B, row).1 == key)
            .count()
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slab.rows().filter(|&row| row != 0).count()
    }

    pub fn clear(&mut self) {
        self.slab.clear();
    }
}
