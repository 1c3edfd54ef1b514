use std::time::{Duration, Instant};

use crate::camera::CameraPose;
use crate::key::SortMode;

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Camera translation below this never triggers a resort.
    pub position_epsilon: f32,
    /// Forward-axis rotation (radians) below this never triggers a resort
    /// in planar mode.
    pub orientation_epsilon: f32,
    /// Minimum time between committed resorts. Zero disables rate limiting.
    pub min_interval: Duration,
    /// Epsilon multiplier while the user is actively manipulating the view.
    pub interactive_relax: f32,
    /// Resort rate ceiling (per second) during interaction.
    pub interactive_max_rate: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            position_epsilon: 0.01,
            orientation_epsilon: 0.01,
            min_interval: Duration::ZERO,
            interactive_relax: 4.0,
            interactive_max_rate: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Resort,
    Skip,
}

/// Policy gate in front of the sort engines. Tracks the camera pose of the
/// last committed ordering and suppresses resorts for sub-threshold motion.
/// Never affects the correctness of a given sort, only how often one runs.
#[derive(Debug)]
pub struct ResortGate {
    config: GateConfig,
    committed: Option<(CameraPose, Instant)>,
    interactive: bool,
    final_resort_pending: bool,
}

impl ResortGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            committed: None,
            interactive: false,
            final_resort_pending: false,
        }
    }

    /// Relaxed thresholds and a resort rate cap while the user drags the
    /// view; ordering freshness traded for throughput.
    pub fn begin_interaction(&mut self) {
        self.interactive = true;
    }

    /// Ends interaction and forces one terminal high-quality resort.
    pub fn end_interaction(&mut self) {
        if self.interactive {
            self.interactive = false;
            self.final_resort_pending = true;
        }
    }

    /// Drops the committed pose so the next evaluation always resorts.
    pub fn invalidate(&mut self) {
        self.committed = None;
    }

    pub fn evaluate(&mut self, pose: &CameraPose, mode: SortMode, now: Instant) -> GateDecision {
        let (last_pose, last_at) = match self.committed {
            Some(committed) => committed,
            None => return GateDecision::Resort,
        };

        if self.final_resort_pending {
            return GateDecision::Resort;
        }

        let mut interval = self.config.min_interval;
        if self.interactive && self.config.interactive_max_rate > 0.0 {
            let rate_floor = Duration::from_secs_f32(1.0 / self.config.interactive_max_rate);
            interval = interval.max(rate_floor);
        }
        if !interval.is_zero() && now.saturating_duration_since(last_at) < interval {
            return GateDecision::Skip;
        }

        let relax = if self.interactive {
            self.config.interactive_relax.max(1.0)
        } else {
            1.0
        };
        let position_epsilon = self.config.position_epsilon * relax;
        let orientation_epsilon = self.config.orientation_epsilon * relax;

        let moved = pose.position_delta(&last_pose) > position_epsilon;
        // Radial keys depend only on camera position; rotation alone cannot
        // change the ordering there.
        let turned = match mode {
            SortMode::Radial => false,
            SortMode::Planar => pose.forward_angle(&last_pose) > orientation_epsilon,
        };

        if moved || turned {
            GateDecision::Resort
        } else {
            GateDecision::Skip
        }
    }

    /// Records the pose an ordering was just committed for.
    pub fn commit(&mut self, pose: &CameraPose, now: Instant) {
        self.committed = Some((*pose, now));
        self.final_resort_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    fn pose_at(x: f32) -> CameraPose {
        CameraPose::new(Vec3::new(x, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0))
    }

    fn gate() -> ResortGate {
        ResortGate::new(GateConfig {
            position_epsilon: 0.01,
            orientation_epsilon: 0.01,
            min_interval: Duration::ZERO,
            ..GateConfig::default()
        })
    }

    #[test]
    fn first_evaluation_always_resorts() {
        let mut gate = gate();
        let now = Instant::now();
        assert_eq!(
            gate.evaluate(&pose_at(0.0), SortMode::Radial, now),
            GateDecision::Resort
        );
    }

    #[test]
    fn sub_epsilon_translation_skips_and_super_epsilon_resorts() {
        let mut gate = gate();
        let now = Instant::now();
        gate.commit(&pose_at(0.0), now);

        assert_eq!(
            gate.evaluate(&pose_at(0.005), SortMode::Radial, now),
            GateDecision::Skip
        );
        assert_eq!(
            gate.evaluate(&pose_at(0.02), SortMode::Radial, now),
            GateDecision::Resort
        );
    }

    #[test]
    fn rotation_alone_ignored_in_radial_mode() {
        let mut gate = gate();
        let now = Instant::now();
        let start = pose_at(0.0);
        gate.commit(&start, now);

        let rotated = CameraPose::new(start.position, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(
            gate.evaluate(&rotated, SortMode::Radial, now),
            GateDecision::Skip
        );
        assert_eq!(
            gate.evaluate(&rotated, SortMode::Planar, now),
            GateDecision::Resort
        );
    }

    #[test]
    fn min_interval_rate_limits() {
        let mut gate = ResortGate::new(GateConfig {
            min_interval: Duration::from_millis(100),
            ..GateConfig::default()
        });
        let t0 = Instant::now();
        gate.commit(&pose_at(0.0), t0);

        let far = pose_at(10.0);
        assert_eq!(
            gate.evaluate(&far, SortMode::Radial, t0 + Duration::from_millis(10)),
            GateDecision::Skip
        );
        assert_eq!(
            gate.evaluate(&far, SortMode::Radial, t0 + Duration::from_millis(150)),
            GateDecision::Resort
        );
    }

    #[test]
    fn interaction_relaxes_epsilons_then_forces_final_resort() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.commit(&pose_at(0.0), t0);
        gate.begin_interaction();

        // Past the interactive rate floor, so the relaxed epsilon decides:
        // 0.02 clears the base epsilon but not the relaxed one (0.04).
        let t1 = t0 + Duration::from_secs(1);
        let nudged = pose_at(0.02);
        assert_eq!(
            gate.evaluate(&nudged, SortMode::Radial, t1),
            GateDecision::Skip
        );

        gate.end_interaction();
        assert_eq!(
            gate.evaluate(&nudged, SortMode::Radial, t1),
            GateDecision::Resort
        );
        gate.commit(&nudged, t1);
        assert_eq!(
            gate.evaluate(&nudged, SortMode::Radial, t1),
            GateDecision::Skip
        );
    }

    #[test]
    fn interaction_caps_resort_rate() {
        let mut gate = ResortGate::new(GateConfig {
            interactive_max_rate: 10.0,
            ..GateConfig::default()
        });
        let t0 = Instant::now();
        gate.commit(&pose_at(0.0), t0);
        gate.begin_interaction();

        let far = pose_at(100.0);
        assert_eq!(
            gate.evaluate(&far, SortMode::Radial, t0 + Duration::from_millis(50)),
            GateDecision::Skip
        );
        assert_eq!(
            gate.evaluate(&far, SortMode::Radial, t0 + Duration::from_millis(150)),
            GateDecision::Resort
        );
    }
}
