//! Local player pose publishing

use std::f32::consts::TAU;
use std::time::{Duration, Instant};

use glam::{Quat, Vec3};
use skyhook::{PlayerPose, SPAWN_HEIGHT};

use crate::network::SyncClient;

// ============================================================================
// POSE SOURCE
// ============================================================================

/// Anything that can report the local player's current pose.
///
/// Pulled by the publisher; `None` means there is nothing to send yet.
pub trait PoseSource {
    fn sample(&mut self) -> Option<PlayerPose>;
}

/// A fixed pose, mostly for tests and idle clients.
impl PoseSource for PlayerPose {
    fn sample(&mut self) -> Option<PlayerPose> {
        Some(*self)
    }
}

// ============================================================================
// PUBLISHER
// ============================================================================

/// Rate-limits outbound pose updates and skips unchanged poses.
#[derive(Debug, Clone)]
pub struct PosePublisher {
    interval: Duration,
    last_sent_at: Option<Instant>,
    last_pose: Option<PlayerPose>,
}

impl PosePublisher {
    /// `send_rate_hz` of zero disables rate limiting.
    pub fn new(send_rate_hz: u32) -> Self {
        let interval = if send_rate_hz == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / send_rate_hz as f64)
        };

        Self {
            interval,
            last_sent_at: None,
            last_pose: None,
        }
    }

    /// Pose to send at `now`, if any.
    pub fn poll<S: PoseSource + ?Sized>(&mut self, now: Instant, source: &mut S) -> Option<PlayerPose> {
        if let Some(at) = self.last_sent_at {
            if now.saturating_duration_since(at) < self.interval {
                return None;
            }
        }

        let pose = source.sample()?;
        if self.last_pose.is_some_and(|last| same_bits(&last, &pose)) {
            return None;
        }

        self.last_sent_at = Some(now);
        self.last_pose = Some(pose);
        Some(pose)
    }

    /// Poll and send through `client`. Returns true if an update was queued.
    pub fn publish<S: PoseSource + ?Sized>(&mut self, now: Instant, source: &mut S, client: &SyncClient) -> bool {
        match self.poll(now, source) {
            Some(pose) => client.send_pose_update(pose),
            None => false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for PosePublisher {
    fn default() -> Self {
        Self::new(30)
    }
}

fn same_bits(a: &PlayerPose, b: &PlayerPose) -> bool {
    let bits = |p: &PlayerPose| [p.x, p.y, p.z, p.qx, p.qy, p.qz, p.qw].map(f32::to_bits);
    bits(a) == bits(b)
}

// ============================================================================
// ORBIT PATH
// ============================================================================

/// Scripted flight: a horizontal circle around the spawn axis, facing
/// along the direction of travel.
#[derive(Debug, Clone)]
pub struct OrbitPath {
    radius: f32,
    altitude: f32,
    /// Radians advanced per sample
    step: f32,
    angle: f32,
}

impl OrbitPath {
    /// Circle of `radius` at `altitude`, taking `samples_per_lap` samples
    /// per revolution, starting at `phase` radians.
    pub fn new(radius: f32, altitude: f32, samples_per_lap: u32, phase: f32) -> Self {
        Self {
            radius,
            altitude,
            step: TAU / samples_per_lap.max(1) as f32,
            angle: phase,
        }
    }

    fn pose_at(&self, angle: f32) -> PlayerPose {
        let (sin, cos) = angle.sin_cos();
        let position = Vec3::new(self.radius * cos, self.altitude, self.radius * sin);

        // Tangent of increasing angle; forward is -Z
        let heading = Vec3::new(-sin, 0.0, cos);
        let rotation = Quat::from_rotation_y((-heading.x).atan2(-heading.z));

        PlayerPose::new(position.to_array(), rotation.to_array())
    }
}

impl Default for OrbitPath {
    fn default() -> Self {
        Self::new(6.0, SPAWN_HEIGHT, 600, 0.0)
    }
}

impl PoseSource for OrbitPath {
    fn sample(&mut self) -> Option<PlayerPose> {
        let pose = self.pose_at(self.angle);
        self.angle = (self.angle + self.step) % TAU;
        Some(pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_rate_limited() {
        let mut publisher = PosePublisher::new(10);
        assert_eq!(publisher.interval(), Duration::from_millis(100));
        let mut orbit = OrbitPath::default();
        let start = Instant::now();

        assert!(publisher.poll(start, &mut orbit).is_some());
        assert!(publisher.poll(start + Duration::from_millis(50), &mut orbit).is_none());
        assert!(publisher.poll(start + Duration::from_millis(100), &mut orbit).is_some());
    }

    #[test]
    fn test_publisher_skips_identical_pose() {
        let mut publisher = PosePublisher::new(0);
        let mut fixed = PlayerPose::at(1.0, 2.0, 3.0);
        let now = Instant::now();

        assert_eq!(publisher.poll(now, &mut fixed), Some(PlayerPose::at(1.0, 2.0, 3.0)));
        assert!(publisher.poll(now, &mut fixed).is_none());

        fixed.x = 1.5;
        assert!(publisher.poll(now, &mut fixed).is_some());
    }

    #[test]
    fn test_orbit_stays_on_circle() {
        let mut orbit = OrbitPath::new(6.0, 12.0, 36, 0.0);
        for _ in 0..100 {
            let pose = orbit.sample().unwrap();
            let horizontal = (pose.x * pose.x + pose.z * pose.z).sqrt();
            assert!((horizontal - 6.0).abs() < 1e-4);
            assert_eq!(pose.y, 12.0);
            assert!(pose.is_normalized());
        }
    }

    #[test]
    fn test_orbit_faces_direction_of_travel() {
        let mut orbit = OrbitPath::new(6.0, 12.0, 360, 0.3);
        let a = orbit.sample().unwrap();
        let b = orbit.sample().unwrap();

        let travel = (Vec3::from(b.position()) - Vec3::from(a.position())).normalize();
        let forward = Quat::from_array(a.rotation()) * Vec3::NEG_Z;
        assert!(forward.dot(travel) > 0.99);
    }
}
