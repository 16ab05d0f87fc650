//! Two-level iceberg table: a primary that serves the common case with a
//! short hash chain and no eviction, and a much smaller secondary with a
//! richer hash family that absorbs the overflow.

use std::fmt;

use crate::coop;
use crate::level::Geometry;
use crate::level::GeometryError;
use crate::level::Level;
use crate::outcome;
use crate::outcome::Outcome;
use crate::perm::Seed;
use crate::Key;

/// Default eviction chain budget per secondary hash function.
const CHAIN_STEPS_PER_HASH: u32 = 20;

/// An iceberg table with primary geometry `(PB, PH)` and secondary
/// geometry `(SB, SH)`. The two levels have independent shapes and hash
/// families; only the secondary runs eviction chains.
pub struct IcebergTable<const PB: usize, const PH: usize, const SB: usize, const SH: usize> {
    primary: Level<PB, PH>,
    secondary: Level<SB, SH>,
    max_chain: u32,
}

impl<const PB: usize, const PH: usize, const SB: usize, const SH: usize>
    IcebergTable<PB, PH, SB, SH>
{
    /// Constructs an empty table with a random permutation seed.
    pub fn new(primary: Geometry, secondary: Geometry) -> Result<Self, GeometryError> {
        Self::with_seed(primary, secondary, Seed::random())
    }

    /// Constructs an empty table with the given permutation seed. The
    /// secondary derives its own hash family from the same seed. Both
    /// levels must be shaped for the same key universe.
    pub fn with_seed(
        primary: Geometry,
        secondary: Geometry,
        seed: Seed,
    ) -> Result<Self, GeometryError> {
        if primary.key_bits != secondary.key_bits {
            return Err(GeometryError::KeyWidthMismatch {
                primary: primary.key_bits,
                secondary: secondary.key_bits,
            });
        }
        Ok(IcebergTable {
            primary: Level::new(primary, seed)?,
            secondary: Level::new(secondary, seed.derive(0x1CEB_E56))?,
            max_chain: CHAIN_STEPS_PER_HASH * SH as u32,
        })
    }

    pub fn primary_geometry(&self) -> Geometry {
        self.primary.geometry()
    }

    pub fn secondary_geometry(&self) -> Geometry {
        self.secondary.geometry()
    }

    /// Total number of slots across both levels.
    pub fn capacity(&self) -> usize {
        self.primary.capacity() + self.secondary.capacity()
    }

    /// Number of slots in the primary level.
    pub fn primary_capacity(&self) -> usize {
        self.primary.capacity()
    }

    /// Number of slots in the secondary level.
    pub fn secondary_capacity(&self) -> usize {
        self.secondary.capacity()
    }

    /// Host-side scan of occupied slots, `(primary, secondary)`.
    pub fn occupied(&self) -> (usize, usize) {
        (self.primary.occupied(), self.secondary.occupied())
    }

    pub fn max_chain_length(&self) -> u32 {
        self.max_chain
    }

    /// Overrides the default `20·SH` secondary chain bound.
    pub fn set_max_chain_length(&mut self, bound: u32) {
        self.max_chain = bound;
    }

    /// Keys spill to the secondary only when every primary bucket is full.
    /// A probe must still visit the secondary after seeing a free primary
    /// slot: a concurrent batch may have filled the bucket and spilled
    /// this key after our snapshot was taken, so "primary has room" does
    /// not imply "not in the secondary".
    fn find_one(&self, key: Key) -> bool {
        self.primary.find(key) || self.secondary.find(key)
    }

    fn put_one(&self, key: Key, avoid_dups: bool) -> Outcome {
        for i in 0..PH {
            if let Some(decided) = self.primary.put_in_bucket(i, key, avoid_dups) {
                return decided;
            }
        }
        self.secondary.put(key, avoid_dups, self.max_chain)
    }

    /// Attempts to insert every key, writing [`Outcome::Put`] or
    /// [`Outcome::Full`] per key. Does not detect duplicates.
    pub fn put(&self, keys: &[Key], results: &mut [Outcome]) {
        coop::dispatch(keys, results, |key| outcome::note(self.put_one(key, false)));
    }

    /// As [`put`](Self::put), but writes [`Outcome::Found`] when the key is
    /// already present in a probed bucket.
    pub fn put_avoid_dups(&self, keys: &[Key], results: &mut [Outcome]) {
        coop::dispatch(keys, results, |key| outcome::note(self.put_one(key, true)));
    }

    /// Membership per key across both levels.
    pub fn find(&self, keys: &[Key], results: &mut [bool]) {
        coop::dispatch(keys, results, |key| self.find_one(key));
    }

    /// Find-or-put over a key range sorted so duplicates are adjacent.
    /// Duplicate occurrences report [`Outcome::Found`] unconditionally,
    /// as in [`CuckooTable::find_or_put_sorted`](crate::CuckooTable::find_or_put_sorted).
    pub fn find_or_put_sorted(&self, keys: &[Key], results: &mut [Outcome]) {
        debug_assert!(keys.windows(2).all(|pair| pair[0] <= pair[1]));
        coop::dispatch_dedup(keys, results, Outcome::Found, |key, _| {
            if self.find_one(key) {
                Outcome::Found
            } else {
                Outcome::Put
            }
        });
        coop::dispatch_dedup(keys, results, Outcome::Found, |key, pending| {
            if pending == Outcome::Found {
                Outcome::Found
            } else {
                outcome::note(self.put_one(key, true))
            }
        });
    }

    /// Find-or-put over an arbitrary key range, without caller scratch.
    ///
    /// The result buffer itself carries the intermediate state between the
    /// find pass and the put pass. Duplicates inside the range are caught
    /// by the bucket-level duplicate check: racing inserts of one key
    /// contend on the same leftmost slot, the losers reprobe and observe
    /// the winner's row.
    pub fn find_or_put(&self, keys: &[Key], results: &mut [Outcome]) {
        coop::dispatch(keys, results, |key| {
            if self.find_one(key) {
                Outcome::Found
            } else {
                Outcome::Put
            }
        });
        coop::rescan(keys, results, |key, pending| {
            if pending == Outcome::Found {
                Outcome::Found
            } else {
                outcome::note(self.put_one(key, true))
            }
        });
    }

    /// Occurrences of `key` across both levels. Host-side scan.
    pub fn count(&self, key: Key) -> usize {
        self.primary.count(key) + self.secondary.count(key)
    }

    /// Empties both levels.
    pub fn clear(&mut self) {
        self.primary.clear();
        self.secondary.clear();
    }
}

impl<const PB: usize, const PH: usize, const SB: usize, const SH: usize> fmt::Debug
    for IcebergTable<PB, PH, SB, SH>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (primary, secondary) = self.occupied();
        f.debug_struct("IcebergTable")
            .field("primary", &self.primary_geometry())
            .field("secondary", &self.secondary_geometry())
            .field("occupied_primary", &primary)
            .field("occupied_secondary", &secondary)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> IcebergTable<32, 1, 16, 3> {
        IcebergTable::with_seed(
            Geometry::new(21, 5, 32),
            Geometry::new(21, 2, 32),
            Seed([19, 23, 29]),
        )
        .unwrap()
    }

    #[test]
    fn rejects_mismatched_key_widths() {
        let mismatched = IcebergTable::<32, 1, 16, 3>::with_seed(
            Geometry::new(21, 5, 32),
            Geometry::new(30, 2, 32),
            Seed([1, 2, 3]),
        );
        assert_eq!(
            mismatched.unwrap_err(),
            GeometryError::KeyWidthMismatch {
                primary: 21,
                secondary: 30
            }
        );
    }

    #[test]
    fn chain_bound_override_guards_the_secondary() {
        let mut table = table();
        assert_eq!(table.max_chain_length(), 60);
        table.set_max_chain_length(0);
        assert_eq!(table.max_chain_length(), 0);

        // Saturate one secondary bucket; with no chain budget the next
        // collider is rejected even though the rest of the level is empty.
        // Colliders whose second hash leaves the bucket keep the eventual
        // relocation short.
        let target = table.secondary.addr_row(0, 0).0;
        let colliders: Vec<Key> = (0..1u64 << 21)
            .filter(|&key| {
                table.secondary.addr_row(0, key).0 == target
                    && table.secondary.addr_row(1, key).0 != target
            })
            .take(17)
            .collect();
        for &key in &colliders[..16] {
            assert_eq!(
                table.secondary.put(key, true, table.max_chain_length()),
                Outcome::Put
            );
        }
        assert_eq!(
            table.secondary.put(colliders[16], true, table.max_chain_length()),
            Outcome::Full
        );

        // The default budget relocates a victim instead.
        table.set_max_chain_length(60);
        assert_eq!(
            table.secondary.put(colliders[16], true, table.max_chain_length()),
            Outcome::Put
        );
    }

    #[test]
    fn overflow_spills_to_secondary() {
        let table = table();
        // 33 keys aimed at one primary bucket: 32 fill it, the last one
        // must take the secondary.
        let target = 11;
        let colliders: Vec<Key> = (0..1u64 << 21)
            .filter(|&key| table.primary.addr_row(0, key).0 == target)
            .take(33)
            .collect();
        let mut results = vec![Outcome::Full; colliders.len()];
        table.put_avoid_dups(&colliders, &mut results);
        assert!(results.iter().all(|&r| r == Outcome::Put));
        assert_eq!(table.occupied(), (32, 1));
        for &key in &colliders {
            assert!(table.find_one(key));
            assert_eq!(table.count(key), 1);
        }
    }

    #[test]
    fn find_or_put_handles_duplicates_in_place() {
        let table = table();
        let keys: Vec<Key> = vec![7, 3, 7, 7, 3, 100];
        let mut results = vec![Outcome::Full; keys.len()];
        table.find_or_put(&keys, &mut results);
        assert_eq!(results.iter().filter(|&&r| r == Outcome::Put).count(), 3);
        assert_eq!(results.iter().filter(|&&r| r == Outcome::Found).count(), 3);
        assert_eq!(table.count(7), 1);
        assert_eq!(table.count(3), 1);
        assert_eq!(table.count(100), 1);
    }

    #[test]
    fn sorted_find_or_put_matches_cuckoo_shape() {
        let table = table();
        let keys: Vec<Key> = vec![2, 2, 5, 9, 9];
        let mut results = vec![Outcome::Full; keys.len()];
        table.find_or_put_sorted(&keys, &mut results);
        assert_eq!(
            results,
            vec![
                Outcome::Put,
                Outcome::Found,
                Outcome::Put,
                Outcome::Put,
                Outcome::Found
            ]
        );
    }
}
