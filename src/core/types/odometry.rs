//! Odometry output type.

use serde::{Deserialize, Serialize};

/// One scan-to-start odometry estimate in the camera-like output frame.
///
/// The orientation quaternion carries the documented axis-swap convention
/// of the pipeline: it is built as `(-qy, -qz, qx, qw)` from the
/// quaternion of `(roll, -pitch, -yaw)` of the accumulated pose. Consumers
/// that feed the mapping stage rely on this exact convention.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LaserOdometry {
    /// Scan acquisition time in seconds.
    pub stamp: f64,
    /// Position (x, y, z) in the odometry origin frame, meters.
    pub position: [f32; 3],
    /// Orientation quaternion (x, y, z, w), axis-swapped as documented.
    pub orientation: [f32; 4],
}

impl LaserOdometry {
    /// Identity pose at the given timestamp.
    pub fn identity(stamp: f64) -> Self {
        Self {
            stamp,
            position: [0.0; 3],
            orientation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}
