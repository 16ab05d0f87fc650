//! Single-level bucketed cuckoo table over compact rows.

use std::fmt;

use rayon::prelude::*;

use crate::coop;
use crate::level::Geometry;
use crate::level::GeometryError;
use crate::level::Level;
use crate::outcome;
use crate::outcome::Outcome;
use crate::perm::Seed;
use crate::Key;

/// Default eviction chain budget per hash function.
const CHAIN_STEPS_PER_HASH: u32 = 20;

/// A cuckoo table with `2^addr_bits` buckets of `B` slots and `H` hash
/// functions.
///
/// All bulk operations borrow the caller's key and result buffers for the
/// duration of the call and run the per-key protocol in parallel. They may
/// be issued concurrently from several threads; host-side exclusive
/// operations ([`clear`](Self::clear)) take `&mut self`.
pub struct CuckooTable<const B: usize, const H: usize> {
    level: Level<B, H>,
    max_chain: u32,
}

impl<const B: usize, const H: usize> CuckooTable<B, H> {
    /// Constructs an empty table with a random permutation seed.
    pub fn new(geo: Geometry) -> Result<Self, GeometryError> {
        Self::with_seed(geo, Seed::random())
    }

    /// Constructs an empty table with the given permutation seed.
    pub fn with_seed(geo: Geometry, seed: Seed) -> Result<Self, GeometryError> {
        Ok(CuckooTable {
            level: Level::new(geo, seed)?,
            max_chain: CHAIN_STEPS_PER_HASH * H as u32,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.level.geometry()
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.level.capacity()
    }

    /// Host-side scan of the number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.level.occupied()
    }

    pub fn max_chain_length(&self) -> u32 {
        self.max_chain
    }

    /// Overrides the default `20·H` eviction chain bound.
    pub fn set_max_chain_length(&mut self, bound: u32) {
        self.max_chain = bound;
    }

    /// Attempts to insert every key, writing [`Outcome::Put`] or
    /// [`Outcome::Full`] per key. Does not detect duplicates: inserting a
    /// present key stores it again.
    pub fn put(&self, keys: &[Key], results: &mut [Outcome]) {
        coop::dispatch(keys, results, |key| {
            outcome::note(self.level.put(key, false, self.max_chain))
        });
    }

    /// As [`put`](Self::put), but writes [`Outcome::Found`] when the key is
    /// already present in the probed bucket.
    pub fn put_avoid_dups(&self, keys: &[Key], results: &mut [Outcome]) {
        coop::dispatch(keys, results, |key| {
            outcome::note(self.level.put(key, true, self.max_chain))
        });
    }

    /// Membership per key. Sees every put that completed before the call;
    /// a put racing the call may be missed.
    pub fn find(&self, keys: &[Key], results: &mut [bool]) {
        coop::dispatch(keys, results, |key| self.level.find(key));
    }

    /// Find-or-put over a key range sorted so duplicates are adjacent.
    ///
    /// First occurrences report [`Outcome::Found`], [`Outcome::Put`] or
    /// [`Outcome::Full`]; every later occurrence of a key reports
    /// [`Outcome::Found`] unconditionally, even when its first occurrence
    /// came back [`Outcome::Full`]. That coarsening is deliberate: it keeps
    /// the duplicate path write-free.
    pub fn find_or_put_sorted(&self, keys: &[Key], results: &mut [Outcome]) {
        debug_assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
        coop::dispatch_dedup(keys, results, Outcome::Found, |key, _| {
            if self.level.find(key) {
                Outcome::Found
            } else {
                Outcome::Put
            }
        });
        coop::dispatch_dedup(keys, results, Outcome::Found, |key, pending| {
            if pending == Outcome::Found {
                Outcome::Found
            } else {
                outcome::note(self.level.put(key, true, self.max_chain))
            }
        });
    }

    /// Find-or-put over an arbitrary key range.
    ///
    /// Sorts a view of the keys into `scratch` (which must hold
    /// `2 × keys.len()` words: a key copy and an index permutation) and
    /// runs the sorted protocol through the permuted view, so results land
    /// in caller order. Duplicate reporting matches
    /// [`find_or_put_sorted`](Self::find_or_put_sorted).
    pub fn find_or_put(&self, keys: &[Key], scratch: &mut [u64], results: &mut [Outcome]) {
        assert_eq!(scratch.len(), 2 * keys.len(), "scratch must be 2×L");
        let (copies, order) = scratch.split_at_mut(keys.len());
        copies.copy_from_slice(keys);
        for (index, slot) in order.iter_mut().enumerate() {
            *slot = index as u64;
        }
        // Stable, so equal keys keep caller order among themselves.
        order.par_sort_by_key(|&index| copies[index as usize]);

        coop::dispatch_dedup_gather(keys, order, results, Outcome::Found, |key, _| {
            if self.level.find(key) {
                Outcome::Found
            } else {
                Outcome::Put
            }
        });
        coop::dispatch_dedup_gather(keys, order, results, Outcome::Found, |key, pending| {
            if pending == Outcome::Found {
                Outcome::Found
            } else {
                outcome::note(self.level.put(key, true, self.max_chain))
            }
        });
    }

    /// Occurrences of `key` across the table. Host-side scan.
    pub fn count(&self, key: Key) -> usize {
        self.level.count(key)
    }

    /// Empties the table.
    pub fn clear(&mut self) {
        self.level.clear();
    }
}

impl<const B: usize, const H: usize> fmt::Debug for CuckooTable<B, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CuckooTable")
            .field("geometry", &self.geometry())
            .field("bucket_size", &B)
            .field("hashes", &H)
            .field("occupied", &self.occupied())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CuckooTable<32, 3> {
        CuckooTable::with_seed(Geometry::new(21, 5, 32), Seed([11, 13, 17])).unwrap()
    }

    #[test]
    fn sorted_find_or_put_reports_duplicates() {
        let table = table();
        let keys: Vec<Key> = vec![1, 1, 2, 3, 3, 3, 8];
        let mut results = vec![Outcome::Full; keys.len()];
        table.find_or_put_sorted(&keys, &mut results);
        assert_eq!(
            results,
            vec![
                Outcome::Put,
                Outcome::Found,
                Outcome::Put,
                Outcome::Put,
                Outcome::Found,
                Outcome::Found,
                Outcome::Put
            ]
        );
        assert_eq!(table.occupied(), 4);
    }

    #[test]
    fn unsorted_find_or_put_keeps_caller_order() {
        let table = table();
        let keys: Vec<Key> = vec![9, 4, 9, 1, 4, 9];
        let mut scratch = vec![0u64; 2 * keys.len()];
        let mut results = vec![Outcome::Full; keys.len()];
        table.find_or_put(&keys, &mut scratch, &mut results);
        // Stable sort: the first caller occurrence of each key is elected.
        assert_eq!(
            results,
            vec![
                Outcome::Put,
                Outcome::Put,
                Outcome::Found,
                Outcome::Put,
                Outcome::Found,
                Outcome::Found
            ]
        );
        assert_eq!(table.count(9), 1);
        assert_eq!(table.count(4), 1);
        assert_eq!(table.count(1), 1);
    }

    #[test]
    fn chain_bound_override() {
        let mut table = table();
        assert_eq!(table.max_chain_length(), 60);
        table.set_max_chain_length(0);
        assert_eq!(table.max_chain_length(), 0);

        // Fill one bucket under hash 0. Colliders whose second hash leaves
        // the bucket keep the eventual relocation short.
        let target = table.level.addr_row(0, 0).0;
        let colliders: Vec<Key> = (0..1u64 << 21)
            .filter(|&key| {
                table.level.addr_row(0, key).0 == target
                    && table.level.addr_row(1, key).0 != target
            })
            .take(33)
            .collect();
        let (bucket, overflow) = colliders.split_at(32);
        let mut results = vec![Outcome::Full; bucket.len()];
        table.put_avoid_dups(bucket, &mut results);
        assert!(results.iter().all(|&r| r == Outcome::Put));

        // With no chain budget the full bucket is a dead end; the default
        // budget relocates a victim instead.
        assert_eq!(
            table.level.put(overflow[0], true, table.max_chain_length()),
            Outcome::Full
        );
        table.set_max_chain_length(60);
        assert_eq!(
            table.level.put(overflow[0], true, table.max_chain_length()),
            Outcome::Put
        );
    }

    #[test]
    fn raw_put_stores_duplicates() {
        let table = table();
        let keys: Vec<Key> = vec![5, 5];
        let mut results = vec![Outcome::Full; 2];
        table.put(&keys, &mut results);
        assert_eq!(results, vec![Outcome::Put, Outcome::Put]);
        assert_eq!(table.count(5), 2);

        let mut results = vec![Outcome::Full; 2];
        table.put_avoid_dups(&keys, &mut results);
        assert_eq!(results, vec![Outcome::Found, Outcome::Found]);
    }
}
