//! Visibility-ordering engine for semi-transparent volumetric primitives
//! (Gaussian splats): given a position array and a camera pose, compute the
//! draw permutation that makes sequential alpha-compositing correct.
//!
//! Three sorting paths share one scratch-owning [`Sorter`]:
//! - a bucketed counting sort, optionally with camera-relative bucket
//!   widths that spend more resolution near the camera,
//! - a stable 4-pass LSD radix sort over an order-preserving unsigned
//!   encoding of the float keys,
//! - a conservative lock-free fallback (chunked insertion sort plus bounded
//!   pairwise merging) that aborts to the identity permutation rather than
//!   ever publishing a partial ordering.
//!
//! A [`ResortGate`] in front of the engines suppresses resorts while the
//! camera motion stays below configurable thresholds, and the previous
//! permutation is reused verbatim on a skip.

mod bounds;
mod camera;
mod counting;
mod engine;
mod error;
mod fallback;
mod gate;
mod heap;
mod key;
pub mod math;
mod radix;
mod scatter;

pub use bounds::{reduce_bounds, Bounds, SharedBounds};
pub use camera::CameraPose;
pub use counting::{BucketTable, TIER_BAND_WEIGHTS, TIER_COUNT};
pub use engine::{Algorithm, SortConfig, SortOutcome, SortStats, Sorter, MAX_BUCKET_COUNT};
pub use error::SortError;
pub use fallback::{FallbackConfig, FALLBACK_CHUNK};
pub use gate::{GateConfig, GateDecision, ResortGate};
pub use heap::AtomicHeap;
pub use key::{encode_key, encode_sortable, SortMode, SortOrder};
pub use radix::{RADIX_BITS, RADIX_BUCKETS, RADIX_PASSES};
