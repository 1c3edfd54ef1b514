use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::math::Vec3;

/// Elements reduced cooperatively per group before one atomic combine.
/// Cuts contention on the global accumulator by the group width.
pub const REDUCTION_GROUP: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    /// Empty bounds: +inf min, -inf max. Any finite point extends them.
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ]
    }
}

/// Global min/max accumulator over f32 bit patterns. Hardware has no atomic
/// float min/max with usable semantics, so both directions are optimistic
/// CAS retry loops. Stored values are never NaN: callers filter degenerate
/// input before merging.
pub struct SharedBounds {
    min: [AtomicU32; 3],
    max: [AtomicU32; 3],
}

impl SharedBounds {
    pub fn new() -> Self {
        let this = Self {
            min: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
            max: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
        };
        this.reset();
        this
    }

    pub fn reset(&self) {
        for cell in &self.min {
            cell.store(f32::INFINITY.to_bits(), Ordering::Relaxed);
        }
        for cell in &self.max {
            cell.store(f32::NEG_INFINITY.to_bits(), Ordering::Relaxed);
        }
    }

    fn atomic_min(cell: &AtomicU32, candidate: f32) {
        let mut current = f32::from_bits(cell.load(Ordering::Relaxed));
        while candidate < current {
            match cell.compare_exchange_weak(
                current.to_bits(),
                candidate.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = f32::from_bits(actual),
            }
        }
    }

    fn atomic_max(cell: &AtomicU32, candidate: f32) {
        let mut current = f32::from_bits(cell.load(Ordering::Relaxed));
        while candidate > current {
            match cell.compare_exchange_weak(
                current.to_bits(),
                candidate.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = f32::from_bits(actual),
            }
        }
    }

    /// One combine per reduction group. `local_min`/`local_max` must be
    /// NaN-free.
    pub fn merge(&self, local_min: Vec3, local_max: Vec3) {
        let min = [local_min.x, local_min.y, local_min.z];
        let max = [local_max.x, local_max.y, local_max.z];
        for axis in 0..3 {
            Self::atomic_min(&self.min[axis], min[axis]);
            Self::atomic_max(&self.max[axis], max[axis]);
        }
    }

    pub fn snapshot(&self) -> Bounds {
        let load = |cell: &AtomicU32| f32::from_bits(cell.load(Ordering::Relaxed));
        Bounds {
            min: Vec3::new(load(&self.min[0]), load(&self.min[1]), load(&self.min[2])),
            max: Vec3::new(load(&self.max[0]), load(&self.max[1]), load(&self.max[2])),
        }
    }
}

impl Default for SharedBounds {
    fn default() -> Self {
        Self::new()
    }
}

/// Two-level reduction: each group folds its candidates locally with no
/// global synchronization, then its representative does a single atomic
/// combine. Non-finite positions are excluded, never propagated.
pub fn reduce_bounds(positions: &[Vec3]) -> Bounds {
    let shared = SharedBounds::new();
    positions.par_chunks(REDUCTION_GROUP).for_each(|group| {
        let mut lo = Vec3::splat(f32::INFINITY);
        let mut hi = Vec3::splat(f32::NEG_INFINITY);
        let mut seen = false;
        for p in group {
            if !p.is_finite() {
                continue;
            }
            lo = lo.min_components(*p);
            hi = hi.max_components(*p);
            seen = true;
        }
        if seen {
            shared.merge(lo, hi);
        }
    });
    shared.snapshot()
}
