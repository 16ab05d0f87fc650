//! Cooperative probing primitives and the bulk dispatcher.
//!
//! On a SIMT device a tile of `B` lanes probes one bucket together: every
//! lane reads one slot, the lanes vote with a ballot, and the elected lane
//! performs the single atomic. On the CPU the tile collapses to a loop with
//! a software ballot over a bucket snapshot; the protocol and its
//! correctness argument are unchanged.
//!
//! The dispatcher divides a key range into blocks and hands each block to a
//! worker. Within a block, keys are served one at a time in index order,
//! which takes the place of leader election; across blocks there is no
//! ordering. The sorted variant elects only the first occurrence of each
//! key and assigns `duplicate` to the rest, relying strictly on duplicates
//! being adjacent in the input.

use rayon::prelude::*;

use crate::Key;

/// Lanes in a warp. Bucket sizes must divide this so tiles partition warps
/// evenly.
pub(crate) const WARP_WIDTH: usize = 32;

/// Keys handed to one worker per dispatch block.
const BLOCK_SPAN: usize = 1 << 10;

/// Tile-wide vote: one bit per lane, set where `pred` holds.
#[inline]
pub(crate) fn ballot<const B: usize>(lanes: &[u64; B], pred: impl Fn(u64) -> bool) -> u32 {
    let mut mask = 0u32;
    for (lane, &row) in lanes.iter().enumerate() {
        mask |= (pred(row) as u32) << lane;
    }
    mask
}

/// Lowest set lane of a ballot mask.
#[inline]
pub(crate) fn first_set(mask: u32) -> Option<usize> {
    if mask == 0 {
        None
    } else {
        Some(mask.trailing_zeros() as usize)
    }
}

/// Runs `op` once per key, storing the result in place.
pub(crate) fn dispatch<R, F>(keys: &[Key], results: &mut [R], op: F)
where
    R: Send,
    F: Fn(Key) -> R + Sync,
{
    assert_eq!(keys.len(), results.len());
    keys.par_chunks(BLOCK_SPAN)
        .zip(results.par_chunks_mut(BLOCK_SPAN))
        .for_each(|(block, out)| {
            for (key, slot) in block.iter().zip(out) {
                *slot = op(*key);
            }
        });
}

/// Runs `op` once per key with the previously stored result, storing the
/// new result in place. Second pass of the two-pass find-or-put.
pub(crate) fn rescan<R, F>(keys: &[Key], results: &mut [R], op: F)
where
    R: Copy + Send,
    F: Fn(Key, R) -> R + Sync,
{
    assert_eq!(keys.len(), results.len());
    keys.par_chunks(BLOCK_SPAN)
        .zip(results.par_chunks_mut(BLOCK_SPAN))
        .for_each(|(block, out)| {
            for (key, slot) in block.iter().zip(out) {
                *slot = op(*key, *slot);
            }
        });
}

/// Runs `op` once per *first occurrence* in a sorted key range, storing the
/// new result in place; later occurrences of a key get `duplicate`.
pub(crate) fn dispatch_dedup<R, F>(keys: &[Key], results: &mut [R], duplicate: R, op: F)
where
    R: Copy + Send + Sync,
    F: Fn(Key, R) -> R + Sync,
{
    assert_eq!(keys.len(), results.len());
    keys.par_chunks(BLOCK_SPAN)
        .enumerate()
        .zip(results.par_chunks_mut(BLOCK_SPAN))
        .for_each(|((block_index, block), out)| {
            let base = block_index * BLOCK_SPAN;
            for (offset, (key, slot)) in block.iter().zip(out).enumerate() {
                let i = base + offset;
                if i == 0 || keys[i - 1] != *key {
                    *slot = op(*key, *slot);
                } else {
                    *slot = duplicate;
                }
            }
        });
}

/// Shared view of the caller's result buffer for gathered (permuted)
/// dispatch, where one worker's stores scatter across the buffer.
struct Sink<R> {
    ptr: *mut R,
}

// SAFETY: workers write through disjoint indices (see dispatch_dedup_gather).
unsafe impl<R: Send> Sync for Sink<R> {}

/// As [`dispatch_dedup`], but the key range is viewed through `order`:
/// position `j` serves `keys[order[j]]` and stores into
/// `results[order[j]]`. `order` must be a permutation of `0..keys.len()`
/// under which the viewed keys are sorted.
pub(crate) fn dispatch_dedup_gather<R, F>(
    keys: &[Key],
    order: &[u64],
    results: &mut [R],
    duplicate: R,
    op: F,
) where
    R: Copy + Send + Sync,
    F: Fn(Key, R) -> R + Sync,
{
    assert_eq!(keys.len(), order.len());
    assert_eq!(keys.len(), results.len());
    let sink = &Sink {
        ptr: results.as_mut_ptr(),
    };
    order
        .par_chunks(BLOCK_SPAN)
        .enumerate()
        .for_each(|(block_index, block)| {
            let base = block_index * BLOCK_SPAN;
            for (offset, &target) in block.iter().enumerate() {
                let j = base + offset;
                let key = keys[target as usize];
                // SAFETY: `order` is a permutation, so `target` is visited
                // by exactly one worker and the store cannot race.
                unsafe {
                    let slot = sink.ptr.add(target as usize);
                    if j == 0 || keys[order[j - 1] as usize] != key {
                        *slot = op(key, *slot);
                    } else {
                        *slot = duplicate;
                    }
                }
            }
        });
}
