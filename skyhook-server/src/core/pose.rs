//! Player Pose
//!
//! Position and orientation of a single player in world space.
//! This is the only piece of per-player state the server replicates.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Spawn height above the planet center (world units).
pub const SPAWN_HEIGHT: f32 = 12.0;

/// Tolerance used when checking whether an orientation is a unit quaternion.
pub const UNIT_QUAT_EPSILON: f32 = 1e-3;

// =============================================================================
// PLAYER POSE
// =============================================================================

/// World position plus orientation as a quaternion `(qx, qy, qz, qw)`.
///
/// The server stores whatever the owning client sent. Orientation is
/// expected to be normalized by the client but is never re-normalized here.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerPose {
    /// World X
    pub x: f32,
    /// World Y
    pub y: f32,
    /// World Z
    pub z: f32,
    /// Quaternion X
    pub qx: f32,
    /// Quaternion Y
    pub qy: f32,
    /// Quaternion Z
    pub qz: f32,
    /// Quaternion W
    pub qw: f32,
}

impl PlayerPose {
    /// Pose assigned to every new session: hovering above the planet,
    /// identity orientation.
    pub const SPAWN: Self = Self {
        x: 0.0,
        y: SPAWN_HEIGHT,
        z: 0.0,
        qx: 0.0,
        qy: 0.0,
        qz: 0.0,
        qw: 1.0,
    };

    /// Create a pose from a position and a quaternion.
    #[inline]
    pub const fn new(position: [f32; 3], rotation: [f32; 4]) -> Self {
        Self {
            x: position[0],
            y: position[1],
            z: position[2],
            qx: rotation[0],
            qy: rotation[1],
            qz: rotation[2],
            qw: rotation[3],
        }
    }

    /// Create a pose at a position with identity orientation.
    #[inline]
    pub const fn at(x: f32, y: f32, z: f32) -> Self {
        Self::new([x, y, z], [0.0, 0.0, 0.0, 1.0])
    }

    /// Position as an array.
    #[inline]
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Orientation as an array `[x, y, z, w]`.
    #[inline]
    pub fn rotation(&self) -> [f32; 4] {
        [self.qx, self.qy, self.qz, self.qw]
    }

    /// True if every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.position().iter().chain(self.rotation().iter()).all(|c| c.is_finite())
    }

    /// Squared length of the orientation quaternion.
    #[inline]
    pub fn rotation_length_squared(&self) -> f32 {
        self.qx * self.qx + self.qy * self.qy + self.qz * self.qz + self.qw * self.qw
    }

    /// True if the orientation is a unit quaternion within [`UNIT_QUAT_EPSILON`].
    pub fn is_normalized(&self) -> bool {
        (self.rotation_length_squared() - 1.0).abs() <= UNIT_QUAT_EPSILON
    }

    /// Check the pose is acceptable for storage.
    ///
    /// Only non-finite components are rejected. Range and normalization are
    /// the client's responsibility.
    pub fn validate(&self) -> Result<(), PoseError> {
        if self.is_finite() {
            Ok(())
        } else {
            Err(PoseError::NonFinite)
        }
    }
}

impl Default for PlayerPose {
    fn default() -> Self {
        Self::SPAWN
    }
}

impl fmt::Debug for PlayerPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose(({:.3}, {:.3}, {:.3}), [{:.3}, {:.3}, {:.3}, {:.3}])",
            self.x, self.y, self.z, self.qx, self.qy, self.qz, self.qw
        )
    }
}

/// Pose validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoseError {
    /// A component is NaN or infinite.
    #[error("pose contains a non-finite component")]
    NonFinite,
}
