use rayon::prelude::*;

use crate::camera::CameraPose;
use crate::math::Vec3;

/// How the per-primitive depth key is derived from the camera.
///
/// Radial suits a mostly-translating camera, planar a mostly-rotating one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Squared Euclidean distance from the camera position.
    Radial,
    /// Projection onto the camera forward axis.
    Planar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    FrontToBack,
    BackToFront,
}

/// Depth key for one primitive. Non-finite positions yield a +inf key so
/// they sort deterministically to the far end and never reach bucket math
/// with NaN in hand.
pub fn primitive_key(position: Vec3, pose: &CameraPose, mode: SortMode) -> f32 {
    let rel = position - pose.position;
    let key = match mode {
        SortMode::Radial => rel.length_squared(),
        SortMode::Planar => rel.dot(pose.forward),
    };
    if key.is_finite() {
        key
    } else {
        f32::INFINITY
    }
}

/// Fills `keys` with one key per position. Returns how many positions
/// produced a non-finite key and were sanitized.
pub fn extract_keys(
    positions: &[Vec3],
    pose: &CameraPose,
    mode: SortMode,
    keys: &mut Vec<f32>,
) -> usize {
    positions
        .par_iter()
        .map(|&p| primitive_key(p, pose, mode))
        .collect_into_vec(keys);
    keys.par_iter().filter(|k| k.is_infinite()).count()
}

/// Order-preserving f32 -> u32 transform: flip the sign bit of positives,
/// invert all bits of negatives. `a < b` implies `encode(a) < encode(b)`
/// across the whole float range, negatives included. Required before any
/// radix-style digit sort.
pub fn encode_sortable(value: f32) -> u32 {
    let bits = value.to_bits();
    if bits & 0x8000_0000 == 0 {
        bits | 0x8000_0000
    } else {
        !bits
    }
}

/// Sortable encoding with the requested draw order baked in: ascending
/// unsigned order of the result matches the requested key order.
pub fn encode_key(value: f32, order: SortOrder) -> u32 {
    let encoded = encode_sortable(value);
    match order {
        SortOrder::FrontToBack => encoded,
        SortOrder::BackToFront => !encoded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_keys() -> Vec<f32> {
        vec![
            f32::NEG_INFINITY,
            f32::MIN,
            -1.0e20,
            -2.0,
            -1.0,
            -f32::MIN_POSITIVE,
            -1.0e-40, // subnormal
            -0.0,
            0.0,
            1.0e-40, // subnormal
            f32::MIN_POSITIVE,
            0.5,
            1.0,
            1.0e20,
            f32::MAX,
            f32::INFINITY,
        ]
    }

    #[test]
    fn encoding_is_monotonic_over_all_pairs() {
        let keys = sample_keys();
        for (i, &a) in keys.iter().enumerate() {
            for &b in &keys[i..] {
                if a < b {
                    assert!(
                        encode_sortable(a) < encode_sortable(b),
                        "encode({a}) should be < encode({b})"
                    );
                }
            }
        }
    }

    #[test]
    fn descending_encoding_inverts_order() {
        let keys = sample_keys();
        for (i, &a) in keys.iter().enumerate() {
            for &b in &keys[i..] {
                if a < b {
                    assert!(encode_key(a, SortOrder::BackToFront) > encode_key(b, SortOrder::BackToFront));
                }
            }
        }
    }

    #[test]
    fn radial_key_is_squared_distance() {
        let pose = CameraPose::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0));
        let key = primitive_key(Vec3::new(4.0, 4.0, 0.0), &pose, SortMode::Radial);
        assert!((key - 25.0).abs() < 1e-5);
    }

    #[test]
    fn planar_key_is_signed_projection() {
        let pose = CameraPose::new(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0));
        let ahead = primitive_key(Vec3::new(0.0, 0.0, 3.0), &pose, SortMode::Planar);
        let behind = primitive_key(Vec3::new(0.0, 0.0, -3.0), &pose, SortMode::Planar);
        assert!((ahead - 3.0).abs() < 1e-6);
        assert!((behind + 3.0).abs() < 1e-6);
    }

    #[test]
    fn non_finite_positions_sanitize_to_far_key() {
        let pose = CameraPose::new(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0));
        let positions = vec![
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(f32::NAN, 0.0, 0.0),
            Vec3::new(f32::INFINITY, 0.0, 0.0),
        ];
        let mut keys = Vec::new();
        let sanitized = extract_keys(&positions, &pose, SortMode::Radial, &mut keys);
        assert_eq!(sanitized, 2);
        assert_eq!(keys[1], f32::INFINITY);
        assert_eq!(keys[2], f32::INFINITY);
    }
}
