use std::time::Instant;

use crate::bounds::{reduce_bounds, Bounds};
use crate::camera::CameraPose;
use crate::counting::{self, BucketTable, CountingScratch};
use crate::error::SortError;
use crate::fallback::{self, FallbackConfig, FallbackScratch};
use crate::gate::{GateConfig, GateDecision, ResortGate};
use crate::key::{extract_keys, SortMode, SortOrder};
use crate::math::Vec3;
use crate::radix::{self, RadixScratch};

/// Largest supported bucket table; above this the histogram and its serial
/// prefix scan stop being the cheap part of the sort.
pub const MAX_BUCKET_COUNT: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Counting,
    Radix,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct SortConfig {
    pub mode: SortMode,
    pub order: SortOrder,
    pub algorithm: Algorithm,
    /// Bucket budget for the counting path.
    pub bucket_count: u32,
    /// Non-uniform bucket widths, finer near the camera.
    pub camera_relative: bool,
    pub gate: GateConfig,
    pub fallback: FallbackConfig,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            mode: SortMode::Radial,
            order: SortOrder::BackToFront,
            algorithm: Algorithm::Radix,
            bucket_count: 256,
            camera_relative: false,
            gate: GateConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    pub resorts: u64,
    pub skips: u64,
    /// Bounded spin-waits that hit their ceiling in the fallback path.
    pub sync_timeouts: u64,
    /// Fallback invocations that aborted to the identity permutation.
    pub aborted_sorts: u64,
    /// Non-finite keys sanitized across all resorts.
    pub sanitized_keys: u64,
}

/// Result of one sort invocation: either a fresh permutation or the cached
/// previous one when the resort gate decided nothing changed enough.
#[derive(Debug)]
pub enum SortOutcome<'a> {
    Reordered(&'a [u32]),
    ReusePrevious(&'a [u32]),
}

impl<'a> SortOutcome<'a> {
    pub fn permutation(&self) -> &'a [u32] {
        match self {
            Self::Reordered(perm) | Self::ReusePrevious(perm) => perm,
        }
    }

    pub fn was_resorted(&self) -> bool {
        matches!(self, Self::Reordered(_))
    }
}

/// The visibility-ordering engine. Owns all scratch memory, sized once at
/// construction; a sort invocation allocates nothing and either produces a
/// full permutation or leaves the previous ordering in place.
#[derive(Debug)]
pub struct Sorter {
    config: SortConfig,
    capacity: usize,
    gate: ResortGate,
    keys: Vec<f32>,
    counting: CountingScratch,
    radix: RadixScratch,
    fallback: FallbackScratch,
    permutation: Vec<u32>,
    stats: SortStats,
}

impl Sorter {
    pub fn new(capacity: usize, config: SortConfig) -> Result<Self, SortError> {
        if config.bucket_count == 0 || config.bucket_count > MAX_BUCKET_COUNT {
            return Err(SortError::InvalidBucketCount {
                bucket_count: config.bucket_count,
            });
        }

        let gate = ResortGate::new(config.gate.clone());
        Ok(Self {
            counting: CountingScratch::with_capacity(capacity, config.bucket_count),
            radix: RadixScratch::with_capacity(capacity),
            fallback: FallbackScratch::with_capacity(capacity),
            keys: Vec::with_capacity(capacity),
            permutation: Vec::new(),
            stats: SortStats::default(),
            capacity,
            gate,
            config,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    pub fn stats(&self) -> SortStats {
        self.stats
    }

    pub fn begin_interaction(&mut self) {
        self.gate.begin_interaction();
    }

    pub fn end_interaction(&mut self) {
        self.gate.end_interaction();
    }

    /// Forces the next invocation to resort regardless of camera motion,
    /// e.g. after the caller replaced the primitive set.
    pub fn invalidate(&mut self) {
        self.gate.invalidate();
    }

    pub fn sort<'a>(
        &'a mut self,
        positions: &[Vec3],
        pose: &CameraPose,
    ) -> Result<SortOutcome<'a>, SortError> {
        self.sort_at(positions, pose, Instant::now())
    }

    /// Like [`Sorter::sort`] with an explicit clock, which the resort gate's
    /// rate limiting is measured against.
    pub fn sort_at<'a>(
        &'a mut self,
        positions: &[Vec3],
        pose: &CameraPose,
        now: Instant,
    ) -> Result<SortOutcome<'a>, SortError> {
        let n = positions.len();
        if n > self.capacity {
            return Err(SortError::CapacityExceeded {
                requested: n,
                capacity: self.capacity,
            });
        }

        // A cached permutation of the wrong length can never be reused.
        let decision = if self.permutation.len() == n {
            self.gate.evaluate(pose, self.config.mode, now)
        } else {
            GateDecision::Resort
        };
        if decision == GateDecision::Skip {
            self.stats.skips += 1;
            return Ok(SortOutcome::ReusePrevious(&self.permutation));
        }

        let sanitized = extract_keys(positions, pose, self.config.mode, &mut self.keys);
        self.stats.sanitized_keys += sanitized as u64;

        self.permutation.clear();
        self.permutation.resize(n, 0);

        match self.config.algorithm {
            Algorithm::Counting => {
                let bounds = reduce_bounds(positions);
                let (lo, hi) = key_range(&bounds, pose, self.config.mode);
                let table = if self.config.camera_relative {
                    // The camera's own key is zero in both modes.
                    BucketTable::camera_relative(
                        lo,
                        hi,
                        self.config.bucket_count,
                        0.0,
                        self.config.order,
                    )
                } else {
                    BucketTable::uniform(lo, hi, self.config.bucket_count, self.config.order)
                };
                counting::sort_into(&self.keys, &table, &mut self.counting, &mut self.permutation);
            }
            Algorithm::Radix => {
                radix::sort_into(
                    &self.keys,
                    self.config.order,
                    &mut self.radix,
                    &mut self.permutation,
                );
            }
            Algorithm::Fallback => {
                let report = fallback::sort_into(
                    &self.keys,
                    self.config.order,
                    &self.config.fallback,
                    &mut self.fallback,
                    &mut self.permutation,
                );
                self.stats.sync_timeouts += u64::from(report.timeouts);
                if report.aborted {
                    self.stats.aborted_sorts += 1;
                }
            }
        }

        self.gate.commit(pose, now);
        self.stats.resorts += 1;
        Ok(SortOutcome::Reordered(&self.permutation))
    }
}

/// Key range for bucket calibration, derived from the position bounds: the
/// nearest/farthest the key function can reach inside the box.
fn key_range(bounds: &Bounds, pose: &CameraPose, mode: SortMode) -> (f32, f32) {
    if bounds.is_empty() {
        return (0.0, 0.0);
    }
    match mode {
        SortMode::Radial => {
            // Closest point of the box to the camera, by per-axis clamp.
            let nearest = Vec3::new(
                pose.position.x.clamp(bounds.min.x, bounds.max.x),
                pose.position.y.clamp(bounds.min.y, bounds.max.y),
                pose.position.z.clamp(bounds.min.z, bounds.max.z),
            );
            let lo = nearest.distance_squared(pose.position);
            let hi = bounds
                .corners()
                .iter()
                .map(|c| c.distance_squared(pose.position))
                .fold(lo, f32::max);
            (lo, hi)
        }
        SortMode::Planar => {
            let mut lo = f32::INFINITY;
            let mut hi = f32::NEG_INFINITY;
            for corner in bounds.corners() {
                let depth = (corner - pose.position).dot(pose.forward);
                lo = lo.min(depth);
                hi = hi.max(depth);
            }
            (lo, hi)
        }
    }
}
