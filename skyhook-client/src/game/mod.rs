//! Game module - local pose publishing and remote pose smoothing
//!
//! Physics, rendering and input live outside this crate; they feed the
//! publisher through [`PoseSource`] and read [`PoseInterpolator`] each frame.

pub mod player;
pub mod remote;

pub use player::{OrbitPath, PosePublisher, PoseSource};
pub use remote::{InterpolationConfig, InterpolationError, PoseInterpolator, SmoothedPose};
