//! Remote player smoothing
//!
//! Each remote session's last replicated pose is a target; every render
//! frame the displayed pose moves a constant fraction of the way towards it.

use std::collections::BTreeMap;

use glam::{Quat, Vec3};
use skyhook::{PlayerPose, SessionId};

/// Interpolation settings
#[derive(Debug, Clone, Copy)]
pub struct InterpolationConfig {
    /// Fraction of the remaining distance covered per tick, in (0, 1]
    pub blend: f32,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self { blend: 0.2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum InterpolationError {
    #[error("Blend factor must be in (0, 1], got {0}")]
    InvalidBlend(f32),
}

/// Pose as currently displayed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedPose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl SmoothedPose {
    /// Exact pose, with the rotation normalized.
    pub fn from_pose(pose: &PlayerPose) -> Self {
        Self {
            position: Vec3::new(pose.x, pose.y, pose.z),
            rotation: target_rotation(pose),
        }
    }
}

/// Normalized rotation of a pose; degenerate quaternions become identity.
pub fn target_rotation(pose: &PlayerPose) -> Quat {
    let q = Quat::from_xyzw(pose.qx, pose.qy, pose.qz, pose.qw);
    if !q.is_finite() || q.length_squared() <= f32::EPSILON {
        return Quat::IDENTITY;
    }
    q.normalize()
}

/// Smooths remote sessions towards their replicated poses.
#[derive(Debug, Clone)]
pub struct PoseInterpolator {
    blend: f32,
    smoothed: BTreeMap<SessionId, SmoothedPose>,
}

impl PoseInterpolator {
    pub fn new(config: InterpolationConfig) -> Result<Self, InterpolationError> {
        // Written this way so NaN is rejected too
        if !(config.blend > 0.0 && config.blend <= 1.0) {
            return Err(InterpolationError::InvalidBlend(config.blend));
        }
        Ok(Self {
            blend: config.blend,
            smoothed: BTreeMap::new(),
        })
    }

    /// Advance one frame towards `targets`.
    ///
    /// New sessions snap to their target; sessions missing from `targets`
    /// are forgotten.
    pub fn tick(&mut self, targets: &BTreeMap<SessionId, PlayerPose>) {
        self.smoothed.retain(|id, _| targets.contains_key(id));

        for (id, target) in targets {
            let goal = SmoothedPose::from_pose(target);
            match self.smoothed.get_mut(id) {
                Some(current) => {
                    current.position = current.position.lerp(goal.position, self.blend);
                    current.rotation = current.rotation.slerp(goal.rotation, self.blend);
                }
                None => {
                    self.smoothed.insert(id.clone(), goal);
                }
            }
        }
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&SmoothedPose> {
        self.smoothed.get(session_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &SmoothedPose)> {
        self.smoothed.iter()
    }

    pub fn len(&self) -> usize {
        self.smoothed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.smoothed.is_empty()
    }

    pub fn blend(&self) -> f32 {
        self.blend
    }
}

impl Default for PoseInterpolator {
    fn default() -> Self {
        Self {
            blend: InterpolationConfig::default().blend,
            smoothed: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn targets(entries: &[(&str, PlayerPose)]) -> BTreeMap<SessionId, PlayerPose> {
        entries.iter().map(|(id, pose)| (SessionId::from(*id), *pose)).collect()
    }

    #[test]
    fn test_invalid_blend_rejected() {
        for blend in [0.0, -0.5, 1.5, f32::NAN] {
            assert!(PoseInterpolator::new(InterpolationConfig { blend }).is_err());
        }
        assert!(PoseInterpolator::new(InterpolationConfig { blend: 1.0 }).is_ok());
        assert_eq!(PoseInterpolator::default().blend(), 0.2);
    }

    #[test]
    fn test_first_sighting_snaps() {
        let mut interp = PoseInterpolator::default();
        let pose = PlayerPose::at(10.0, 12.0, -4.0);
        interp.tick(&targets(&[("a", pose)]));

        let smoothed = interp.get(&SessionId::from("a")).unwrap();
        assert_eq!(smoothed.position, Vec3::new(10.0, 12.0, -4.0));
        assert_eq!(smoothed.rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_moves_fraction_of_remaining_distance() {
        let mut interp = PoseInterpolator::default();
        interp.tick(&targets(&[("a", PlayerPose::at(0.0, 12.0, 0.0))]));
        interp.tick(&targets(&[("a", PlayerPose::at(10.0, 12.0, 0.0))]));

        let x = interp.get(&SessionId::from("a")).unwrap().position.x;
        assert!((x - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_absent_sessions_dropped() {
        let mut interp = PoseInterpolator::default();
        interp.tick(&targets(&[("a", PlayerPose::SPAWN), ("b", PlayerPose::SPAWN)]));
        assert_eq!(interp.len(), 2);

        interp.tick(&targets(&[("b", PlayerPose::SPAWN)]));
        assert_eq!(interp.len(), 1);
        assert!(interp.get(&SessionId::from("a")).is_none());
    }

    #[test]
    fn test_degenerate_rotation_is_identity() {
        let pose = PlayerPose::new([0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(target_rotation(&pose), Quat::IDENTITY);

        let scaled = PlayerPose::new([0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 3.0]);
        assert!(target_rotation(&scaled).is_normalized());
    }

    proptest! {
        #[test]
        fn prop_converges_without_overshoot(
            start in prop::array::uniform3(-50.0f32..50.0),
            goal in prop::array::uniform3(-50.0f32..50.0),
            yaw in -3.0f32..3.0,
            blend in 0.05f32..1.0,
        ) {
            let mut interp = PoseInterpolator::new(InterpolationConfig { blend }).unwrap();
            interp.tick(&targets(&[("a", PlayerPose::new(start, [0.0, 0.0, 0.0, 1.0]))]));

            let r = Quat::from_rotation_y(yaw);
            let target = PlayerPose::new(goal, [r.x, r.y, r.z, r.w]);
            let goal_pos = Vec3::from_array(goal);

            let mut last_dist = f32::INFINITY;
            let mut last_angle = f32::INFINITY;
            for _ in 0..200 {
                interp.tick(&targets(&[("a", target)]));
                let p = interp.get(&SessionId::from("a")).unwrap();
                let dist = p.position.distance(goal_pos);
                let angle = p.rotation.angle_between(r);
                prop_assert!(dist <= last_dist + 1e-4);
                prop_assert!(angle <= last_angle + 2e-3);
                last_dist = dist;
                last_angle = angle;
            }
            prop_assert!(last_dist < 0.5);
        }
    }
}
