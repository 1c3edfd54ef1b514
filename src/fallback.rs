use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::key::{encode_key, SortOrder};
use crate::scatter::ScatterSlice;

/// Elements per worker-owned insertion-sort chunk.
pub const FALLBACK_CHUNK: usize = 256;

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Hard ceiling on barrier spin iterations. Exceeding it trips the
    /// shared failure flag and the whole sort aborts to the identity
    /// permutation.
    pub max_spin_iters: u32,
    /// Merged segments never exceed this many elements; larger segments are
    /// left unmerged. A scale limit of this path, not an error.
    pub max_merge_size: usize,
    /// Worker thread count; 0 picks from available parallelism.
    pub workers: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_spin_iters: 1 << 22,
            max_merge_size: 1 << 16,
            workers: 0,
        }
    }
}

/// What the fallback path actually produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackReport {
    /// True when a timeout aborted the sort and `out` holds the identity
    /// permutation instead of an ordering.
    pub aborted: bool,
    /// Bounded spin-waits that hit their ceiling.
    pub timeouts: u32,
}

#[derive(Debug, Default)]
pub struct FallbackScratch {
    pairs_a: Vec<AtomicU64>,
    pairs_b: Vec<AtomicU64>,
}

impl FallbackScratch {
    pub fn with_capacity(max_elements: usize) -> Self {
        let mut scratch = Self::default();
        scratch.pairs_a.resize_with(max_elements, || AtomicU64::new(0));
        scratch.pairs_b.resize_with(max_elements, || AtomicU64::new(0));
        scratch
    }

    fn ensure(&mut self, n: usize) {
        if self.pairs_a.len() < n {
            self.pairs_a.resize_with(n, || AtomicU64::new(0));
            self.pairs_b.resize_with(n, || AtomicU64::new(0));
        }
    }
}

#[inline]
fn pack(key: u32, index: u32) -> u64 {
    (u64::from(key) << 32) | u64::from(index)
}

#[inline]
fn unpack_index(pair: u64) -> u32 {
    pair as u32
}

/// One phase barrier per round. Arrival order is irrelevant; the wait is a
/// bounded spin, never unbounded.
struct RoundBarriers {
    arrivals: Vec<AtomicU32>,
    failed: AtomicBool,
    timeouts: AtomicU32,
}

impl RoundBarriers {
    fn new(rounds: usize) -> Self {
        Self {
            arrivals: (0..rounds).map(|_| AtomicU32::new(0)).collect(),
            failed: AtomicBool::new(false),
            timeouts: AtomicU32::new(0),
        }
    }

    /// Returns false when the sort must abort: either another worker already
    /// failed, or this wait hit the spin ceiling and set the flag itself.
    fn arrive_and_wait(&self, round: usize, workers: u32, ceiling: u32) -> bool {
        self.arrivals[round].fetch_add(1, Ordering::AcqRel);
        let mut iters = 0u32;
        loop {
            if self.failed.load(Ordering::Acquire) {
                return false;
            }
            if iters >= ceiling {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                self.failed.store(true, Ordering::Release);
                return false;
            }
            if self.arrivals[round].load(Ordering::Acquire) >= workers {
                return true;
            }
            iters += 1;
            std::hint::spin_loop();
        }
    }
}

fn insertion_sort_atomic(slice: &[AtomicU64]) {
    for i in 1..slice.len() {
        let value = slice[i].load(Ordering::Relaxed);
        let mut j = i;
        while j > 0 {
            let prev = slice[j - 1].load(Ordering::Relaxed);
            if prev <= value {
                break;
            }
            slice[j].store(prev, Ordering::Relaxed);
            j -= 1;
        }
        slice[j].store(value, Ordering::Relaxed);
    }
}

fn merge_runs(src: &[AtomicU64], dst: &[AtomicU64], lo: usize, mid: usize, hi: usize) {
    let mut left = lo;
    let mut right = mid;
    for slot in lo..hi {
        let take_left = if left >= mid {
            false
        } else if right >= hi {
            true
        } else {
            src[left].load(Ordering::Relaxed) <= src[right].load(Ordering::Relaxed)
        };
        let value = if take_left {
            let v = src[left].load(Ordering::Relaxed);
            left += 1;
            v
        } else {
            let v = src[right].load(Ordering::Relaxed);
            right += 1;
            v
        };
        dst[slot].store(value, Ordering::Relaxed);
    }
}

fn copy_range(src: &[AtomicU64], dst: &[AtomicU64], lo: usize, hi: usize) {
    for i in lo..hi {
        dst[i].store(src[i].load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

/// Conservative sorting path: per-worker insertion sort of fixed chunks,
/// phase-counter synchronization with bounded spin-waits, then iterative
/// pairwise merging of sorted runs up to `max_merge_size`. On any timeout
/// every worker aborts and `out` receives the identity permutation; a
/// partially-ordered result is never published.
pub fn sort_into(
    keys: &[f32],
    order: SortOrder,
    config: &FallbackConfig,
    scratch: &mut FallbackScratch,
    out: &mut [u32],
) -> FallbackReport {
    debug_assert_eq!(keys.len(), out.len());
    let n = keys.len();
    if n == 0 {
        return FallbackReport {
            aborted: false,
            timeouts: 0,
        };
    }

    scratch.ensure(n);
    let pairs_a = &scratch.pairs_a[..n];
    let pairs_b = &scratch.pairs_b[..n];

    // Pack (encoded key, original index); the index in the low bits makes
    // ties deterministic.
    for (i, (slot, &key)) in pairs_a.iter().zip(keys.iter()).enumerate() {
        slot.store(pack(encode_key(key, order), i as u32), Ordering::Relaxed);
    }

    let chunks = n.div_ceil(FALLBACK_CHUNK);
    let workers = match config.workers {
        0 => std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4),
        explicit => explicit,
    }
    .min(chunks)
    .max(1);

    let mut merge_rounds = 0usize;
    let mut run = FALLBACK_CHUNK;
    while run < n && run * 2 <= config.max_merge_size {
        run *= 2;
        merge_rounds += 1;
    }

    let barriers = RoundBarriers::new(1 + merge_rounds);
    let writer = ScatterSlice::new(out);
    let max_merge = config.max_merge_size;
    let ceiling = config.max_spin_iters;

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let barriers = &barriers;
            let writer = &writer;
            scope.spawn(move || {
                for chunk in (worker..chunks).step_by(workers) {
                    let lo = chunk * FALLBACK_CHUNK;
                    let hi = (lo + FALLBACK_CHUNK).min(n);
                    insertion_sort_atomic(&pairs_a[lo..hi]);
                }
                if !barriers.arrive_and_wait(0, workers as u32, ceiling) {
                    return;
                }

                let mut from_a = true;
                for round in 0..merge_rounds {
                    let run = FALLBACK_CHUNK << round;
                    let segment = run * 2;
                    let (src, dst) = if from_a {
                        (pairs_a, pairs_b)
                    } else {
                        (pairs_b, pairs_a)
                    };
                    let tasks = n.div_ceil(segment);
                    for task in (worker..tasks).step_by(workers) {
                        let lo = task * segment;
                        let mid = (lo + run).min(n);
                        let hi = (lo + segment).min(n);
                        if hi - lo > max_merge {
                            // Oversized segment: left unmerged by design.
                            copy_range(src, dst, lo, hi);
                        } else {
                            merge_runs(src, dst, lo, mid, hi);
                        }
                    }
                    if !barriers.arrive_and_wait(1 + round, workers as u32, ceiling) {
                        return;
                    }
                    from_a = !from_a;
                }

                if barriers.failed.load(Ordering::Acquire) {
                    return;
                }
                let final_pairs = if merge_rounds % 2 == 0 {
                    pairs_a
                } else {
                    pairs_b
                };
                let per_worker = n.div_ceil(workers);
                let lo = worker * per_worker;
                let hi = (lo + per_worker).min(n);
                for i in lo..hi {
                    let index = unpack_index(final_pairs[i].load(Ordering::Relaxed));
                    // Extraction ranges are disjoint per worker.
                    unsafe { writer.write(i, index) };
                }
            });
        }
    });

    let timeouts = barriers.timeouts.load(Ordering::Relaxed);
    if barriers.failed.load(Ordering::Acquire) {
        // Safety invariant: disable ordering rather than publish a partial
        // one. The designated writer is the invoking thread, after every
        // worker has stopped.
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = i as u32;
        }
        return FallbackReport {
            aborted: true,
            timeouts,
        };
    }

    FallbackReport {
        aborted: false,
        timeouts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(workers: usize) -> FallbackConfig {
        FallbackConfig {
            workers,
            ..FallbackConfig::default()
        }
    }

    fn run_sort(keys: &[f32], order: SortOrder, config: &FallbackConfig) -> (Vec<u32>, FallbackReport) {
        let mut scratch = FallbackScratch::with_capacity(keys.len());
        let mut out = vec![0u32; keys.len()];
        let report = sort_into(keys, order, config, &mut scratch, &mut out);
        (out, report)
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
    fn sorts_across_chunk_and_worker_boundaries() {
        let keys: Vec<f32> = (0..5000)
            .map(|i| (((i * 48271) % 9973) as f32) * 0.1 - 500.0)
            .collect();
        let (out, report) = run_sort(&keys, SortOrder::FrontToBack, &config(4));
        assert!(!report.aborted);
        assert_eq!(report.timeouts, 0);
        assert_permutation(&out, keys.len());
        for w in out.windows(2) {
            assert!(keys[w[0] as usize] <= keys[w[1] as usize]);
        }
    }

    #[test]
    fn descending_order_is_respected() {
        let keys = [10.0f32, 1.0, 5.0, 2.0];
        let (out, report) = run_sort(&keys, SortOrder::BackToFront, &config(1));
        assert!(!report.aborted);
        assert_eq!(out, vec![0, 2, 3, 1]);
    }

    #[test]
    fn zero_spin_ceiling_aborts_to_identity() {
        let keys: Vec<f32> = (0..4000).map(|i| -(i as f32)).collect();
        let cfg = FallbackConfig {
            max_spin_iters: 0,
            workers: 4,
            ..FallbackConfig::default()
        };
        let (out, report) = run_sort(&keys, SortOrder::FrontToBack, &cfg);
        assert!(report.aborted);
        assert!(report.timeouts >= 1);
        let identity: Vec<u32> = (0..keys.len() as u32).collect();
        assert_eq!(out, identity);
    }

    #[test]
    fn oversized_merges_leave_runs_unmerged() {
        // Merge bound below two chunks: every chunk stays locally sorted but
        // the chunks are never combined.
        let keys: Vec<f32> = (0..1000).map(|i| (999 - i) as f32).collect();
        let cfg = FallbackConfig {
            max_merge_size: FALLBACK_CHUNK,
            workers: 2,
            ..FallbackConfig::default()
        };
        let (out, report) = run_sort(&keys, SortOrder::FrontToBack, &cfg);
        assert!(!report.aborted);
        assert_permutation(&out, keys.len());
        for chunk in out.chunks(FALLBACK_CHUNK) {
            for w in chunk.windows(2) {
                assert!(keys[w[0] as usize] <= keys[w[1] as usize]);
            }
        }
    }

    #[test]
    fn success_path_is_deterministic_and_stable() {
        let keys: Vec<f32> = (0..3000).map(|i| (i % 7) as f32).collect();
        let (first, report) = run_sort(&keys, SortOrder::FrontToBack, &config(4));
        assert!(!report.aborted);
        for _ in 0..3 {
            let (again, _) = run_sort(&keys, SortOrder::FrontToBack, &config(4));
            assert_eq!(again, first);
        }
        for w in first.windows(2) {
            let (ka, kb) = (keys[w[0] as usize], keys[w[1] as usize]);
            assert!(ka <= kb);
            if ka == kb {
                assert!(w[0] < w[1]);
            }
        }
    }

    #[test]
    fn single_chunk_input_needs_no_merging() {
        let keys = [3.0f32, 1.0, 2.0];
        let (out, report) = run_sort(&keys, SortOrder::FrontToBack, &config(1));
        assert!(!report.aborted);
        assert_eq!(out, vec![1, 2, 0]);
    }
}
