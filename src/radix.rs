use rayon::prelude::*;

use crate::key::{encode_key, SortOrder};
use crate::scatter::ScatterSlice;

pub const RADIX_BITS: u32 = 8;
pub const RADIX_BUCKETS: usize = 1 << RADIX_BITS;
const RADIX_MASK: u32 = (RADIX_BUCKETS - 1) as u32;
/// Full 32-bit key, one byte per pass.
pub const RADIX_PASSES: u32 = 32 / RADIX_BITS;

/// Elements per scatter block. Blocks are identified by their position in
/// the input, never by completion order; that id ordering is what makes the
/// scatter stable.
pub const SCATTER_BLOCK: usize = 256;

/// Scratch for one radix sort: encoded keys, ping-pong index arrays, and the
/// per-block bucket tables.
#[derive(Debug)]
pub struct RadixScratch {
    keys: Vec<u32>,
    keys_tmp: Vec<u32>,
    indices: Vec<u32>,
    indices_tmp: Vec<u32>,
    block_counts: Vec<u32>,
    block_offsets: Vec<u32>,
}

impl RadixScratch {
    pub fn with_capacity(max_elements: usize) -> Self {
        let blocks = max_elements.div_ceil(SCATTER_BLOCK).max(1);
        Self {
            keys: Vec::with_capacity(max_elements),
            keys_tmp: Vec::with_capacity(max_elements),
            indices: Vec::with_capacity(max_elements),
            indices_tmp: Vec::with_capacity(max_elements),
            block_counts: Vec::with_capacity(blocks * RADIX_BUCKETS),
            block_offsets: Vec::with_capacity(blocks * RADIX_BUCKETS),
        }
    }
}

#[inline]
fn digit(key: u32, shift: u32) -> usize {
    ((key >> shift) & RADIX_MASK) as usize
}

/// Stable LSD radix sort over the sortable-unsigned encoding of `keys`.
/// Writes the permutation of original indices into `out`; equal keys keep
/// their original relative order regardless of worker scheduling.
pub fn sort_into(keys: &[f32], order: SortOrder, scratch: &mut RadixScratch, out: &mut [u32]) {
    debug_assert_eq!(keys.len(), out.len());
    let n = keys.len();
    if n == 0 {
        return;
    }

    keys.par_iter()
        .map(|&k| encode_key(k, order))
        .collect_into_vec(&mut scratch.keys);
    (0..n as u32).into_par_iter().collect_into_vec(&mut scratch.indices);

    scratch.keys_tmp.clear();
    scratch.keys_tmp.resize(n, 0);
    scratch.indices_tmp.clear();
    scratch.indices_tmp.resize(n, 0);

    let blocks = n.div_ceil(SCATTER_BLOCK);
    scratch.block_counts.clear();
    scratch.block_counts.resize(blocks * RADIX_BUCKETS, 0);
    scratch.block_offsets.clear();
    scratch.block_offsets.resize(blocks * RADIX_BUCKETS, 0);

    for pass in 0..RADIX_PASSES {
        let shift = pass * RADIX_BITS;
        radix_pass(
            &scratch.keys,
            &scratch.indices,
            &mut scratch.keys_tmp,
            &mut scratch.indices_tmp,
            &mut scratch.block_counts,
            &mut scratch.block_offsets,
            shift,
        );
        std::mem::swap(&mut scratch.keys, &mut scratch.keys_tmp);
        std::mem::swap(&mut scratch.indices, &mut scratch.indices_tmp);
    }

    out.copy_from_slice(&scratch.indices);
}

fn radix_pass(
    keys_in: &[u32],
    indices_in: &[u32],
    keys_out: &mut [u32],
    indices_out: &mut [u32],
    block_counts: &mut [u32],
    block_offsets: &mut [u32],
    shift: u32,
) {
    // Phase 1: deterministic per-block bucket counts.
    keys_in
        .par_chunks(SCATTER_BLOCK)
        .zip(block_counts.par_chunks_mut(RADIX_BUCKETS))
        .for_each(|(block, counts)| {
            counts.fill(0);
            for &key in block {
                counts[digit(key, shift)] += 1;
            }
        });

    // Phase 2: per-bucket totals, then each (bucket, block) start offset with
    // blocks contributing in increasing block-id order. That assignment is
    // the stability invariant: block g's elements always precede block g+1's
    // within the same bucket.
    let blocks = keys_in.len().div_ceil(SCATTER_BLOCK);
    let mut bucket_totals = [0u32; RADIX_BUCKETS];
    for (bucket, total) in bucket_totals.iter_mut().enumerate() {
        let mut sum = 0u32;
        for block in 0..blocks {
            sum += block_counts[block * RADIX_BUCKETS + bucket];
        }
        *total = sum;
    }
    let mut bucket_base = [0u32; RADIX_BUCKETS];
    let mut running = 0u32;
    for bucket in 0..RADIX_BUCKETS {
        bucket_base[bucket] = running;
        running += bucket_totals[bucket];
    }

    let offsets_writer = ScatterSlice::new(block_offsets);
    let counts_ref = &*block_counts;
    (0..RADIX_BUCKETS).into_par_iter().for_each(|bucket| {
        let mut cursor = bucket_base[bucket];
        for block in 0..blocks {
            let cell = block * RADIX_BUCKETS + bucket;
            // Each bucket column is owned by exactly one worker.
            unsafe { offsets_writer.write(cell, cursor) };
            cursor += counts_ref[cell];
        }
    });

    // Phase 3: each element ranks itself among same-bucket elements seen so
    // far within its own block (a scan bounded by the block size) and writes
    // to base + rank.
    let keys_writer = ScatterSlice::new(keys_out);
    let indices_writer = ScatterSlice::new(indices_out);
    keys_in
        .par_chunks(SCATTER_BLOCK)
        .zip(indices_in.par_chunks(SCATTER_BLOCK))
        .enumerate()
        .for_each(|(block, (block_keys, block_indices))| {
            let offsets = &block_offsets[block * RADIX_BUCKETS..(block + 1) * RADIX_BUCKETS];
            let mut seen = [0u32; RADIX_BUCKETS];
            for (key, index) in block_keys.iter().zip(block_indices.iter()) {
                let bucket = digit(*key, shift);
                let dst = (offsets[bucket] + seen[bucket]) as usize;
                seen[bucket] += 1;
                // Destination slots are disjoint across blocks by the phase 2
                // offset assignment and within a block by the rank.
                unsafe {
                    keys_writer.write(dst, *key);
                    indices_writer.write(dst, *index);
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_sort(keys: &[f32], order: SortOrder) -> Vec<u32> {
        let mut scratch = RadixScratch::with_capacity(keys.len());
        let mut out = vec![0u32; keys.len()];
        sort_into(keys, order, &mut scratch, &mut out);
        out
    }

    fn assert_permutation(perm: &[u32], n: usize) {
        let mut seen = vec![false; n];
        for &i in perm {
            assert!(!seen[i as usize], "index {i} appears twice");
            seen[i as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn sorts_ascending_including_negative_keys() {
        let keys: Vec<f32> = (0..20_000)
            .map(|i| (((i * 2654435761u64 as usize) % 40_001) as f32) * 0.01 - 200.0)
            .collect();
        let out = run_sort(&keys, SortOrder::FrontToBack);
        assert_permutation(&out, keys.len());
        for w in out.windows(2) {
            assert!(keys[w[0] as usize] <= keys[w[1] as usize]);
        }
    }

    #[test]
    fn sorts_descending_for_back_to_front() {
        let keys = [10.0f32, 1.0, 5.0, 2.0];
        let out = run_sort(&keys, SortOrder::BackToFront);
        assert_eq!(out, vec![0, 2, 3, 1]);
    }

    #[test]
    fn equal_keys_preserve_original_order() {
        // Four distinct key values, each repeated many times across blocks.
        let n = 4 * SCATTER_BLOCK + 37;
        let keys: Vec<f32> = (0..n).map(|i| (i % 4) as f32).collect();
        let out = run_sort(&keys, SortOrder::FrontToBack);
        assert_permutation(&out, n);

        for w in out.windows(2) {
            let (ka, kb) = (keys[w[0] as usize], keys[w[1] as usize]);
            assert!(ka <= kb);
            if ka == kb {
                assert!(w[0] < w[1], "ties must keep original relative order");
            }
        }
    }

    #[test]
    fn deterministic_across_runs() {
        let keys: Vec<f32> = (0..10_000)
            .map(|i| ((i * 37) % 256) as f32 - 128.0)
            .collect();
        let first = run_sort(&keys, SortOrder::FrontToBack);
        for _ in 0..4 {
            assert_eq!(run_sort(&keys, SortOrder::FrontToBack), first);
        }
    }

    #[test]
    fn handles_tiny_and_empty_inputs() {
        assert!(run_sort(&[], SortOrder::FrontToBack).is_empty());
        assert_eq!(run_sort(&[42.0], SortOrder::FrontToBack), vec![0]);
        assert_eq!(run_sort(&[2.0, -3.0], SortOrder::FrontToBack), vec![1, 0]);
    }

    #[test]
    fn infinite_keys_sort_to_the_far_end() {
        let keys = [1.0f32, f32::INFINITY, -1.0, f32::NEG_INFINITY];
        let out = run_sort(&keys, SortOrder::FrontToBack);
        assert_eq!(out, vec![3, 2, 0, 1]);
    }
}
