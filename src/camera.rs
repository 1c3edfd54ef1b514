use crate::math::Vec3;

/// Camera state supplied fresh per sort invocation: a position and a unit
/// forward vector. Orientation beyond the forward axis does not affect
/// visibility ordering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    pub forward: Vec3,
}

impl CameraPose {
    pub fn new(position: Vec3, forward: Vec3) -> Self {
        // Degenerate forward falls back to -Z, matching the usual view default.
        let forward = if forward.length_squared() < 1e-12 || !forward.is_finite() {
            Vec3::new(0.0, 0.0, -1.0)
        } else {
            forward.normalize()
        };
        Self { position, forward }
    }

    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        Self::new(position, target - position)
    }

    pub fn position_delta(&self, other: &CameraPose) -> f32 {
        (self.position - other.position).length()
    }

    /// Angle between the two forward axes, in radians.
    pub fn forward_angle(&self, other: &CameraPose) -> f32 {
        self.forward.dot(other.forward).clamp(-1.0, 1.0).acos()
    }
}
