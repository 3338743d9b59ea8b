//! Per-scan motion compensation from interpolated IMU state.
//!
//! Points of one revolution are acquired over a whole scan period. Each
//! point's relative time is derived from its azimuth, the IMU ring is
//! interpolated at that instant, and the point is rotated/shifted into the
//! frame of the first point of the scan so that all returns share one
//! reference time.

use super::ImuBuffer;
use crate::core::types::{PointCloud, SegmentationInfo};
use nalgebra::Vector3;
use std::f32::consts::PI;

/// IMU-derived state for the scan currently being processed.
///
/// `*_start` fields freeze the interpolated state at the first point of
/// the scan; `*_cur` fields track the point currently being compensated;
/// `*_last` fields are committed once per scan and describe the previous
/// scan's end, which the pose integration folds into the global estimate.
#[derive(Debug, Clone, Default)]
pub struct ImuScanState {
    front: usize,
    /// Ring cursor carried across scans to amortize the sample search.
    last_iteration: usize,

    pub(crate) roll_start: f32,
    pub(crate) pitch_start: f32,
    pub(crate) yaw_start: f32,
    pub(crate) cos_roll_start: f32,
    pub(crate) sin_roll_start: f32,
    pub(crate) cos_pitch_start: f32,
    pub(crate) sin_pitch_start: f32,
    pub(crate) cos_yaw_start: f32,
    pub(crate) sin_yaw_start: f32,

    roll_cur: f32,
    pitch_cur: f32,
    yaw_cur: f32,

    velo_start: Vector3<f32>,
    shift_start: Vector3<f32>,
    velo_cur: Vector3<f32>,
    shift_cur: Vector3<f32>,

    shift_from_start_cur: Vector3<f32>,
    velo_from_start_cur: Vector3<f32>,

    angular_rotation_cur: Vector3<f32>,
    angular_rotation_last: Vector3<f32>,
    pub(crate) angular_from_start: Vector3<f32>,

    pub(crate) roll_last: f32,
    pub(crate) pitch_last: f32,
    pub(crate) yaw_last: f32,
    pub(crate) shift_from_start: Vector3<f32>,
    pub(crate) velo_from_start: Vector3<f32>,
}

impl ImuScanState {
    pub fn new() -> Self {
        let mut state = Self::default();
        state.update_start_sin_cos();
        state
    }

    /// Roll of the interpolated IMU attitude at scan start.
    pub fn roll_start(&self) -> f32 {
        self.roll_start
    }

    /// Pitch of the interpolated IMU attitude at scan start.
    pub fn pitch_start(&self) -> f32 {
        self.pitch_start
    }

    /// Refresh the cached sines/cosines of the start attitude.
    pub(crate) fn update_start_sin_cos(&mut self) {
        self.cos_roll_start = self.roll_start.cos();
        self.cos_pitch_start = self.pitch_start.cos();
        self.cos_yaw_start = self.yaw_start.cos();
        self.sin_roll_start = self.roll_start.sin();
        self.sin_pitch_start = self.pitch_start.sin();
        self.sin_yaw_start = self.yaw_start.sin();
    }

    /// Position drift since scan start, rotated into the start frame.
    fn shift_to_start(&mut self, point_time: f32) {
        let s = self.shift_cur - self.shift_start - self.velo_start * point_time;

        let x1 = self.cos_yaw_start * s.x - self.sin_yaw_start * s.z;
        let y1 = s.y;
        let z1 = self.sin_yaw_start * s.x + self.cos_yaw_start * s.z;

        let x2 = x1;
        let y2 = self.cos_pitch_start * y1 + self.sin_pitch_start * z1;
        let z2 = -self.sin_pitch_start * y1 + self.cos_pitch_start * z1;

        self.shift_from_start_cur = Vector3::new(
            self.cos_roll_start * x2 + self.sin_roll_start * y2,
            -self.sin_roll_start * x2 + self.cos_roll_start * y2,
            z2,
        );
    }

    /// Velocity gained since scan start, rotated into the start frame.
    fn velo_to_start(&mut self) {
        let v = self.velo_cur - self.velo_start;

        let x1 = self.cos_yaw_start * v.x - self.sin_yaw_start * v.z;
        let y1 = v.y;
        let z1 = self.sin_yaw_start * v.x + self.cos_yaw_start * v.z;

        let x2 = x1;
        let y2 = self.cos_pitch_start * y1 + self.sin_pitch_start * z1;
        let z2 = -self.sin_pitch_start * y1 + self.cos_pitch_start * z1;

        self.velo_from_start_cur = Vector3::new(
            self.cos_roll_start * x2 + self.sin_roll_start * y2,
            -self.sin_roll_start * x2 + self.cos_roll_start * y2,
            z2,
        );
    }

    /// Rotate a point by the current attitude, back by the inverse start
    /// attitude, and add the shift accumulated since scan start.
    fn transform_point_to_start(&self, x: f32, y: f32, z: f32) -> (f32, f32, f32) {
        let x1 = self.roll_cur.cos() * x - self.roll_cur.sin() * y;
        let y1 = self.roll_cur.sin() * x + self.roll_cur.cos() * y;
        let z1 = z;

        let x2 = x1;
        let y2 = self.pitch_cur.cos() * y1 - self.pitch_cur.sin() * z1;
        let z2 = self.pitch_cur.sin() * y1 + self.pitch_cur.cos() * z1;

        let x3 = self.yaw_cur.cos() * x2 + self.yaw_cur.sin() * z2;
        let y3 = y2;
        let z3 = -self.yaw_cur.sin() * x2 + self.yaw_cur.cos() * z2;

        let x4 = self.cos_yaw_start * x3 - self.sin_yaw_start * z3;
        let y4 = y3;
        let z4 = self.sin_yaw_start * x3 + self.cos_yaw_start * z3;

        let x5 = x4;
        let y5 = self.cos_pitch_start * y4 + self.sin_pitch_start * z4;
        let z5 = -self.sin_pitch_start * y4 + self.cos_pitch_start * z4;

        (
            self.cos_roll_start * x5 + self.sin_roll_start * y5 + self.shift_from_start_cur.x,
            -self.sin_roll_start * x5 + self.cos_roll_start * y5 + self.shift_from_start_cur.y,
            z5 + self.shift_from_start_cur.z,
        )
    }

    /// Interpolate roll/pitch/yaw, velocity and shift at `point_time`.
    ///
    /// Advances `front` from the scan-local cursor until the sample
    /// straddles the point time; falls back to the newest sample when no
    /// bracketing pair exists. Yaw interpolation unwraps across ±π.
    fn interpolate_at(&mut self, buffer: &ImuBuffer, newest: usize, point_time: f64) {
        let len = buffer.capacity();
        while self.front != newest {
            if point_time < buffer.entry(self.front).time {
                break;
            }
            self.front = (self.front + 1) % len;
        }

        let front = buffer.entry(self.front);
        if point_time > front.time {
            self.roll_cur = front.roll;
            self.pitch_cur = front.pitch;
            self.yaw_cur = front.yaw;
            self.velo_cur = front.velo;
            self.shift_cur = front.shift;
        } else {
            let back_idx = (self.front + len - 1) % len;
            let back = buffer.entry(back_idx);
            let span = (front.time - back.time) as f32;
            let ratio_front = ((point_time - back.time) as f32) / span;
            let ratio_back = ((front.time - point_time) as f32) / span;

            self.roll_cur = front.roll * ratio_front + back.roll * ratio_back;
            self.pitch_cur = front.pitch * ratio_front + back.pitch * ratio_back;
            if front.yaw - back.yaw > PI {
                self.yaw_cur = front.yaw * ratio_front + (back.yaw + 2.0 * PI) * ratio_back;
            } else if front.yaw - back.yaw < -PI {
                self.yaw_cur = front.yaw * ratio_front + (back.yaw - 2.0 * PI) * ratio_back;
            } else {
                self.yaw_cur = front.yaw * ratio_front + back.yaw * ratio_back;
            }

            self.velo_cur = front.velo * ratio_front + back.velo * ratio_back;
            self.shift_cur = front.shift * ratio_front + back.shift * ratio_back;
        }
    }

    /// Interpolate the integrated angular rotation at `point_time`.
    ///
    /// Uses the cursor position left by [`Self::interpolate_at`]; only
    /// evaluated for the first point of a scan.
    fn angular_rotation_at(&self, buffer: &ImuBuffer, point_time: f64) -> Vector3<f32> {
        let len = buffer.capacity();
        let front = buffer.entry(self.front);
        if point_time > front.time {
            front.angular_rotation
        } else {
            let back = buffer.entry((self.front + len - 1) % len);
            let span = (front.time - back.time) as f32;
            let ratio_front = ((point_time - back.time) as f32) / span;
            let ratio_back = ((front.time - point_time) as f32) / span;
            front.angular_rotation * ratio_front + back.angular_rotation * ratio_back
        }
    }

    /// Motion-compensate a segmented cloud in place.
    ///
    /// Also remaps every point into the camera-like working frame
    /// (`(x, y, z) = (y, z, x)` of the input) and rewrites the intensity
    /// tag to `ring + relative_time * scan_period`. Without IMU data only
    /// the remap and retagging are applied.
    pub fn adjust_distortion(
        &mut self,
        cloud: &mut PointCloud,
        seg: &SegmentationInfo,
        buffer: &ImuBuffer,
        scan_period: f32,
    ) {
        let mut half_passed = false;
        let time_scan_cur = seg.stamp;

        for i in 0..cloud.len() {
            let raw = cloud[i];
            let (mut x, mut y, mut z) = (raw.y, raw.z, raw.x);

            let mut ori = -f32::atan2(x, z);
            if !half_passed {
                if ori < seg.start_orientation - PI / 2.0 {
                    ori += 2.0 * PI;
                } else if ori > seg.start_orientation + PI * 3.0 / 2.0 {
                    ori -= 2.0 * PI;
                }
                if ori - seg.start_orientation > PI {
                    half_passed = true;
                }
            } else {
                ori += 2.0 * PI;
                if ori < seg.end_orientation - PI * 3.0 / 2.0 {
                    ori += 2.0 * PI;
                } else if ori > seg.end_orientation + PI / 2.0 {
                    ori -= 2.0 * PI;
                }
            }

            let rel_time = (ori - seg.start_orientation) / seg.orientation_diff;
            let intensity = raw.ring() as f32 + scan_period * rel_time;

            if let Some(newest) = buffer.newest() {
                let point_time = rel_time * scan_period;
                self.front = self.last_iteration;
                let abs_time = time_scan_cur + point_time as f64;
                self.interpolate_at(buffer, newest, abs_time);

                if i == 0 {
                    self.roll_start = self.roll_cur;
                    self.pitch_start = self.pitch_cur;
                    self.yaw_start = self.yaw_cur;
                    self.velo_start = self.velo_cur;
                    self.shift_start = self.shift_cur;

                    self.angular_rotation_cur = self.angular_rotation_at(buffer, abs_time);
                    self.angular_from_start =
                        self.angular_rotation_cur - self.angular_rotation_last;
                    self.angular_rotation_last = self.angular_rotation_cur;

                    self.update_start_sin_cos();
                } else {
                    self.shift_to_start(point_time);
                    self.velo_to_start();
                    let (tx, ty, tz) = self.transform_point_to_start(x, y, z);
                    x = tx;
                    y = ty;
                    z = tz;
                }
            }

            cloud[i].x = x;
            cloud[i].y = y;
            cloud[i].z = z;
            cloud[i].intensity = intensity;
        }

        if let Some(newest) = buffer.newest() {
            self.last_iteration = newest;
        }
    }

    /// Commit the current scan's end state for the next pose integration.
    ///
    /// Must run after [`Self::adjust_distortion`] and before the solver
    /// seeds its initial guess.
    pub fn commit_scan(&mut self) {
        self.roll_last = self.roll_cur;
        self.pitch_last = self.pitch_cur;
        self.yaw_last = self.yaw_cur;
        self.shift_from_start = self.shift_from_start_cur;
        self.velo_from_start = self.velo_from_start_cur;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Point;
    use crate::sensors::imu::ImuSample;
    use approx::assert_relative_eq;

    const GRAVITY: f32 = 9.81;

    fn seg_info_for(points: &[Point], stamp: f64) -> SegmentationInfo {
        let first = points.first().unwrap();
        let last = points.last().unwrap();
        let start = -f32::atan2(first.y, first.x);
        let end = crate::core::math::unwrap_scan_span(start, -f32::atan2(last.y, last.x) + 2.0 * PI);
        SegmentationInfo {
            stamp,
            start_orientation: start,
            end_orientation: end,
            orientation_diff: end - start,
            ..SegmentationInfo::with_rings(16)
        }
    }

    fn quarter_turn_cloud() -> PointCloud {
        // azimuths sweeping the first quarter of a revolution on ring 3
        (0..40)
            .map(|i| {
                let a = i as f32 * (PI / 2.0) / 40.0;
                Point::with_intensity(5.0 * a.cos(), -5.0 * a.sin(), 0.3, 3.0)
            })
            .collect()
    }

    #[test]
    fn test_remap_only_without_imu() {
        let mut cloud = quarter_turn_cloud();
        let original = cloud.clone();
        let seg = seg_info_for(&cloud.points, 10.0);
        let buffer = ImuBuffer::new(16, 0.1);
        let mut state = ImuScanState::new();

        state.adjust_distortion(&mut cloud, &seg, &buffer, 0.1);

        for (out, inp) in cloud.iter().zip(original.iter()) {
            assert_relative_eq!(out.x, inp.y);
            assert_relative_eq!(out.y, inp.z);
            assert_relative_eq!(out.z, inp.x);
            assert_eq!(out.ring(), 3);
        }
    }

    #[test]
    fn test_relative_time_tag_monotonic() {
        let mut cloud = quarter_turn_cloud();
        let seg = seg_info_for(&cloud.points, 10.0);
        let buffer = ImuBuffer::new(16, 0.1);
        let mut state = ImuScanState::new();

        state.adjust_distortion(&mut cloud, &seg, &buffer, 0.1);

        let fractions: Vec<f32> = cloud.iter().map(|p| p.time_fraction()).collect();
        assert_relative_eq!(fractions[0], 0.0, epsilon = 1e-5);
        for w in fractions.windows(2) {
            assert!(w[1] >= w[0] - 1e-6, "relative time must not decrease");
        }
        assert!(*fractions.last().unwrap() <= 0.1 + 1e-5);
    }

    #[test]
    fn test_zero_rate_imu_is_identity_on_coordinates() {
        let mut cloud = quarter_turn_cloud();
        let mut reference = cloud.clone();
        let seg = seg_info_for(&cloud.points, 10.0);

        // stationary IMU covering the scan window
        let mut buffer = ImuBuffer::new(64, 0.1);
        for i in 0..40 {
            buffer.push(&ImuSample {
                stamp: 9.9 + i as f64 * 0.01,
                orientation: [0.0, 0.0, 0.0, 1.0],
                linear_acceleration: [0.0, 0.0, GRAVITY],
                angular_velocity: [0.0, 0.0, 0.0],
            });
        }

        let mut state = ImuScanState::new();
        state.adjust_distortion(&mut cloud, &seg, &buffer, 0.1);

        let empty = ImuBuffer::new(16, 0.1);
        let mut remap_only = ImuScanState::new();
        remap_only.adjust_distortion(&mut reference, &seg, &empty, 0.1);

        for (a, b) in cloud.iter().zip(reference.iter()) {
            assert_relative_eq!(a.x, b.x, epsilon = 1e-4);
            assert_relative_eq!(a.y, b.y, epsilon = 1e-4);
            assert_relative_eq!(a.z, b.z, epsilon = 1e-4);
        }
        assert_relative_eq!(state.angular_from_start.norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_commit_scan_freezes_end_state() {
        let mut cloud = quarter_turn_cloud();
        let seg = seg_info_for(&cloud.points, 10.0);
        let mut buffer = ImuBuffer::new(64, 0.1);
        for i in 0..40 {
            buffer.push(&ImuSample {
                stamp: 9.9 + i as f64 * 0.01,
                orientation: [0.0, 0.0, 0.0, 1.0],
                linear_acceleration: [0.0, 0.0, GRAVITY],
                angular_velocity: [0.0, 0.0, 0.0],
            });
        }
        let mut state = ImuScanState::new();
        state.adjust_distortion(&mut cloud, &seg, &buffer, 0.1);
        state.commit_scan();
        assert_relative_eq!(state.shift_from_start.norm(), 0.0, epsilon = 1e-5);
        assert_relative_eq!(state.velo_from_start.norm(), 0.0, epsilon = 1e-5);
    }
}
