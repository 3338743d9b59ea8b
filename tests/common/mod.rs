//! Synthetic LiDAR world for end-to-end pipeline tests.
//!
//! Ray-casts a box room (flat floor, four vertical walls) from a moving
//! sensor. The beam sweep is simulated column by column so that a scan
//! taken under motion carries the same intra-scan distortion the motion
//! model assumes: the sensor pose advances with each azimuth step.

use lidar_odom::{Point, ScanConfig};

/// Sensor pose in the world frame: position plus yaw about world z.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorPose {
    pub position: [f32; 3],
    pub yaw: f32,
}

/// Axis-aligned box room. The sensor starts at the origin, 0.8 m above
/// the floor.
pub struct BoxWorld {
    pub floor_z: f32,
    pub wall_x: (f32, f32),
    pub wall_y: (f32, f32),
    pub walls_enabled: bool,
}

impl Default for BoxWorld {
    fn default() -> Self {
        Self {
            floor_z: -0.8,
            wall_x: (-8.0, 8.0),
            wall_y: (-6.0, 6.0),
            walls_enabled: true,
        }
    }
}

impl BoxWorld {
    /// Floor only, no vertical structure anywhere.
    pub fn ground_only() -> Self {
        Self {
            walls_enabled: false,
            ..Self::default()
        }
    }

    /// Distance along `dir` from `origin` to the nearest surface.
    fn raycast(&self, origin: [f32; 3], dir: [f32; 3]) -> Option<f32> {
        let mut best: Option<f32> = None;
        let mut consider = |t: f32| {
            if t > 0.2 && t < 60.0 && best.map_or(true, |b| t < b) {
                best = Some(t);
            }
        };

        if dir[2] < -1e-6 {
            consider((self.floor_z - origin[2]) / dir[2]);
        }
        if self.walls_enabled {
            for wx in [self.wall_x.0, self.wall_x.1] {
                if dir[0].abs() > 1e-6 {
                    let t = (wx - origin[0]) / dir[0];
                    if t > 0.0 {
                        let y = origin[1] + t * dir[1];
                        if y >= self.wall_y.0 && y <= self.wall_y.1 {
                            consider(t);
                        }
                    }
                }
            }
            for wy in [self.wall_y.0, self.wall_y.1] {
                if dir[1].abs() > 1e-6 {
                    let t = (wy - origin[1]) / dir[1];
                    if t > 0.0 {
                        let x = origin[0] + t * dir[0];
                        if x >= self.wall_x.0 && x <= self.wall_x.1 {
                            consider(t);
                        }
                    }
                }
            }
        }
        best
    }

    /// Ray-cast one full revolution.
    ///
    /// `pose_at(tau)` gives the sensor pose at the fractional sweep time
    /// `tau` in [0, 1); the beam azimuth rotates clockwise so that the
    /// decoded per-point relative time increases over the sweep.
    pub fn scan<F>(&self, cfg: &ScanConfig, pose_at: F) -> Vec<Point>
    where
        F: Fn(f32) -> SensorPose,
    {
        let mut points = Vec::new();
        let steps = cfg.horizontal_scan;

        for s in 0..steps {
            let tau = s as f32 / steps as f32;
            let pose = pose_at(tau);
            let (sin_yaw, cos_yaw) = pose.yaw.sin_cos();
            let theta = -std::f32::consts::TAU * tau;

            for row in 0..cfg.n_scan {
                // nudged off the bin edge so the image row is stable
                let va = -cfg.ang_bottom + row as f32 * cfg.ang_res_y + 1e-4;
                let dir_sensor = [va.cos() * theta.cos(), va.cos() * theta.sin(), va.sin()];
                let dir_world = [
                    cos_yaw * dir_sensor[0] - sin_yaw * dir_sensor[1],
                    sin_yaw * dir_sensor[0] + cos_yaw * dir_sensor[1],
                    dir_sensor[2],
                ];

                let Some(t) = self.raycast(pose.position, dir_world) else {
                    continue;
                };

                let hit_world = [
                    pose.position[0] + t * dir_world[0],
                    pose.position[1] + t * dir_world[1],
                    pose.position[2] + t * dir_world[2],
                ];
                let dx = hit_world[0] - pose.position[0];
                let dy = hit_world[1] - pose.position[1];
                let dz = hit_world[2] - pose.position[2];
                points.push(Point::new(
                    cos_yaw * dx + sin_yaw * dy,
                    -sin_yaw * dx + cos_yaw * dy,
                    dz,
                ));
            }
        }
        points
    }

    /// Scan from a fixed pose (no intra-scan motion).
    pub fn scan_static(&self, cfg: &ScanConfig, pose: SensorPose) -> Vec<Point> {
        self.scan(cfg, |_| pose)
    }
}
