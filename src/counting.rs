use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::key::SortOrder;
use crate::scatter::ScatterSlice;

/// Elements streamed per parallel worker in the histogram and scatter passes.
const PARTITION: usize = 256;

/// Coarse distance tiers for the camera-relative bucket layout.
pub const TIER_COUNT: usize = 16;

/// Precision budget per tier, indexed by band of |tier - camera_tier|:
/// 0, 1-2, 3-5, 6-10, >10. Nearer tiers get finer discrimination at the
/// same total bucket budget.
pub const TIER_BAND_WEIGHTS: [u32; 5] = [16, 8, 4, 2, 1];

fn band_weight(tier_distance: usize) -> u32 {
    match tier_distance {
        0 => TIER_BAND_WEIGHTS[0],
        1..=2 => TIER_BAND_WEIGHTS[1],
        3..=5 => TIER_BAND_WEIGHTS[2],
        6..=10 => TIER_BAND_WEIGHTS[3],
        _ => TIER_BAND_WEIGHTS[4],
    }
}

#[derive(Debug, Clone)]
struct TierLayout {
    /// First bucket id of each tier.
    start: [u32; TIER_COUNT],
    /// Sub-buckets allotted to each tier; always at least one.
    counts: [u32; TIER_COUNT],
}

/// Maps keys to bucket ids over a calibrated key range. Uniform by default;
/// the camera-relative layout subdivides coarse distance tiers with a budget
/// that decays away from the camera's own tier.
#[derive(Debug, Clone)]
pub struct BucketTable {
    lo: f32,
    inv_range: f32,
    range: f32,
    bucket_count: u32,
    descending: bool,
    tiers: Option<TierLayout>,
}

impl BucketTable {
    pub fn uniform(lo: f32, hi: f32, bucket_count: u32, order: SortOrder) -> Self {
        let (lo, range) = sanitize_range(lo, hi);
        Self {
            lo,
            inv_range: 1.0 / range,
            range,
            bucket_count: bucket_count.max(1),
            descending: order == SortOrder::BackToFront,
            tiers: None,
        }
    }

    /// Non-uniform layout: the key range is cut into `TIER_COUNT` coarse
    /// tiers, each granted a weighted share of the bucket budget by its
    /// distance from the tier containing `camera_key`.
    pub fn camera_relative(
        lo: f32,
        hi: f32,
        bucket_count: u32,
        camera_key: f32,
        order: SortOrder,
    ) -> Self {
        // A budget too small to give every tier a bucket degrades to uniform.
        if (bucket_count as usize) < TIER_COUNT {
            return Self::uniform(lo, hi, bucket_count, order);
        }

        let (lo, range) = sanitize_range(lo, hi);
        let camera_t = ((camera_key - lo) / range).clamp(0.0, 1.0);
        let camera_tier = ((camera_t * TIER_COUNT as f32) as usize).min(TIER_COUNT - 1);

        let mut weights = [0u32; TIER_COUNT];
        let mut total_weight = 0u64;
        for (tier, weight) in weights.iter_mut().enumerate() {
            *weight = band_weight(tier.abs_diff(camera_tier));
            total_weight += u64::from(*weight);
        }

        // Every tier keeps one guaranteed bucket; the remainder is split
        // proportionally, leftovers going to the heaviest tiers first.
        let mut counts = [1u32; TIER_COUNT];
        let spare = bucket_count - TIER_COUNT as u32;
        let mut assigned = 0u32;
        for tier in 0..TIER_COUNT {
            let extra = (u64::from(spare) * u64::from(weights[tier]) / total_weight) as u32;
            counts[tier] += extra;
            assigned += extra;
        }
        let mut leftover = spare - assigned;
        let mut order_by_weight: Vec<usize> = (0..TIER_COUNT).collect();
        order_by_weight.sort_by(|&a, &b| weights[b].cmp(&weights[a]).then(a.cmp(&b)));
        for &tier in order_by_weight.iter().cycle() {
            if leftover == 0 {
                break;
            }
            counts[tier] += 1;
            leftover -= 1;
        }

        let mut start = [0u32; TIER_COUNT];
        let mut acc = 0u32;
        for tier in 0..TIER_COUNT {
            start[tier] = acc;
            acc += counts[tier];
        }
        debug_assert_eq!(acc, bucket_count);

        Self {
            lo,
            inv_range: 1.0 / range,
            range,
            bucket_count,
            descending: order == SortOrder::BackToFront,
            tiers: Some(TierLayout { start, counts }),
        }
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    /// Bucket id for a key; out-of-range and non-finite keys clamp into
    /// [0, bucket_count - 1].
    pub fn bucket_for(&self, key: f32) -> u32 {
        let t = if key.is_nan() {
            1.0
        } else {
            ((key - self.lo) * self.inv_range).clamp(0.0, 1.0)
        };

        let bucket = match &self.tiers {
            None => (((t * self.bucket_count as f32) as u32).min(self.bucket_count - 1)),
            Some(layout) => {
                let scaled = t * TIER_COUNT as f32;
                let tier = (scaled as usize).min(TIER_COUNT - 1);
                let frac = (scaled - tier as f32).clamp(0.0, 1.0);
                let sub =
                    ((frac * layout.counts[tier] as f32) as u32).min(layout.counts[tier] - 1);
                layout.start[tier] + sub
            }
        };

        if self.descending {
            self.bucket_count - 1 - bucket
        } else {
            bucket
        }
    }

    /// Key-space width of the bucket containing `key`.
    pub fn width_at_key(&self, key: f32) -> f32 {
        match &self.tiers {
            None => self.range / self.bucket_count as f32,
            Some(layout) => {
                let t = ((key - self.lo) * self.inv_range).clamp(0.0, 1.0);
                let tier = ((t * TIER_COUNT as f32) as usize).min(TIER_COUNT - 1);
                (self.range / TIER_COUNT as f32) / layout.counts[tier] as f32
            }
        }
    }
}

fn sanitize_range(lo: f32, hi: f32) -> (f32, f32) {
    if !lo.is_finite() || !hi.is_finite() || hi - lo <= f32::EPSILON {
        // Degenerate calibration: everything lands in the first bucket.
        (if lo.is_finite() { lo } else { 0.0 }, 1.0)
    } else {
        (lo, hi - lo)
    }
}

/// Scratch for one counting sort: cached bucket ids plus the histogram and
/// scatter cursors. Lives for one invocation, reset at entry.
#[derive(Debug)]
pub struct CountingScratch {
    bucket_ids: Vec<u32>,
    histogram: Vec<AtomicU32>,
    cursors: Vec<AtomicU32>,
}

impl CountingScratch {
    pub fn with_capacity(max_elements: usize, max_buckets: u32) -> Self {
        let buckets = max_buckets.max(1) as usize;
        Self {
            bucket_ids: Vec::with_capacity(max_elements),
            histogram: (0..buckets).map(|_| AtomicU32::new(0)).collect(),
            cursors: (0..buckets).map(|_| AtomicU32::new(0)).collect(),
        }
    }
}

/// Bucketed O(n) sort: histogram, exclusive prefix, atomic scatter. Writes
/// the resulting permutation of original indices into `out`. Elements within
/// a bucket land in worker completion order; ordering is guaranteed at
/// bucket granularity only.
pub fn sort_into(
    keys: &[f32],
    table: &BucketTable,
    scratch: &mut CountingScratch,
    out: &mut [u32],
) {
    debug_assert_eq!(keys.len(), out.len());
    let n = keys.len();
    if n == 0 {
        return;
    }
    let bucket_count = table.bucket_count() as usize;
    debug_assert!(bucket_count <= scratch.histogram.len());

    let histogram = &scratch.histogram[..bucket_count];
    for cell in histogram {
        cell.store(0, Ordering::Relaxed);
    }

    // Histogram pass; bucket ids are cached so the scatter pass does not
    // recompute them.
    scratch.bucket_ids.clear();
    scratch.bucket_ids.resize(n, 0);
    keys.par_chunks(PARTITION)
        .zip(scratch.bucket_ids.par_chunks_mut(PARTITION))
        .for_each(|(key_part, id_part)| {
            for (key, id) in key_part.iter().zip(id_part.iter_mut()) {
                let bucket = table.bucket_for(*key);
                *id = bucket;
                histogram[bucket as usize].fetch_add(1, Ordering::Relaxed);
            }
        });

    // Exclusive prefix into the scatter cursors. Bucket counts stay small
    // enough that a serial scan is not worth parallelizing.
    let cursors = &scratch.cursors[..bucket_count];
    let mut running = 0u32;
    for (cell, cursor) in histogram.iter().zip(cursors.iter()) {
        cursor.store(running, Ordering::Relaxed);
        running += cell.load(Ordering::Relaxed);
    }
    debug_assert_eq!(running as usize, n);

    // Scatter: claim the bucket's next free slot, write the original index.
    let writer = ScatterSlice::new(out);
    scratch
        .bucket_ids
        .par_chunks(PARTITION)
        .enumerate()
        .for_each(|(part, ids)| {
            let base = part * PARTITION;
            for (offset, &bucket) in ids.iter().enumerate() {
                let slot = cursors[bucket as usize].fetch_add(1, Ordering::Relaxed);
                // Each fetch_add claims a distinct slot.
                unsafe { writer.write(slot as usize, (base + offset) as u32) };
            }
        });
}
