//! A flat, zero-initialized array of atomic slots.
//!
//! Buckets are laid out implicitly in the flat slice: bucket `a` of width
//! `B` owns slots `a·B .. a·B + B`. All concurrent mutation goes through
//! per-slot compare-exchange and swap; a row value is self-describing, so
//! relaxed ordering is sufficient and no slot ever needs to publish other
//! memory. The slab is released when its owner is dropped.

use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering::Relaxed;

#[derive(Debug)]
pub(crate) struct Slab {
    slots: Box<[AtomicU64]>,
}

impl Slab {
    /// Allocates `len` slots, all empty (zero).
    pub fn new(len: usize) -> Self {
        let slots = (0..len).map(|_| AtomicU64::new(0)).collect();
        Slab { slots }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn load(&self, index: usize) -> u64 {
        self.slots[index].load(Relaxed)
    }

    /// Snapshot of bucket `a`: one lane per slot.
    #[inline]
    pub fn bucket<const B: usize>(&self, a: usize) -> [u64; B] {
        core::array::from_fn(|lane| self.load(a * B + lane))
    }

    /// Publishes `row` into an empty slot. On failure returns the row that
    /// occupied the slot instead.
    #[inline]
    pub fn publish(&self, index: usize, row: u64) -> Result<(), u64> {
        match self.slots[index].compare_exchange(0, row, Relaxed, Relaxed) {
            Ok(_) => Ok(()),
            Err(occupied) => Err(occupied),
        }
    }

    /// Overwrites an occupied slot with another occupied row, returning the
    /// evicted row. Never writes zero; emptiness is monotone.
    #[inline]
    pub fn displace(&self, index: usize, row: u64) -> u64 {
        debug_assert!(row != 0);
        self.slots[index].swap(row, Relaxed)
    }

    /// Zeroes every slot. Exclusive access makes this a plain store.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot.get_mut() = 0;
        }
    }

    /// Iterates over the current value of every slot.
    pub fn rows(&self) -> impl Iterator<Item = u64> + '_ {
        self.slots.iter().map(|slot| slot.load(Relaxed))
    }
}
