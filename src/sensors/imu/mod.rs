//! IMU ring buffer with in-lock integration.
//!
//! The buffer is the only object shared between threads: the ingestion
//! side appends one sample and runs one O(1) integration step under the
//! lock; the association worker holds the same lock for the whole
//! feature-extraction and solve sequence of a scan, so the samples it
//! observes are exactly those delivered before it entered the section.
//!
//! Axis convention: incoming measurements are remapped from the IMU body
//! frame into the camera-like frame the pipeline works in
//! (`(x, y, z)_camera = (y, z, x)_lidar`), with gravity compensated
//! component-wise during the remap.

mod deskew;

pub use deskew::ImuScanState;

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Standard gravity, m/s².
const GRAVITY: f32 = 9.81;

/// One raw inertial measurement as delivered by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImuSample {
    /// Measurement time in seconds.
    pub stamp: f64,
    /// Orientation quaternion (x, y, z, w), world-referenced.
    pub orientation: [f32; 4],
    /// Linear acceleration in the body frame, gravity included, m/s².
    pub linear_acceleration: [f32; 3],
    /// Angular velocity in the body frame, rad/s.
    pub angular_velocity: [f32; 3],
}

/// One processed slot of the ring buffer.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ImuEntry {
    pub(crate) time: f64,
    pub(crate) roll: f32,
    pub(crate) pitch: f32,
    pub(crate) yaw: f32,
    /// Remapped, gravity-compensated acceleration.
    pub(crate) acc: Vector3<f32>,
    /// Integrated world-frame velocity.
    pub(crate) velo: Vector3<f32>,
    /// Integrated world-frame position shift.
    pub(crate) shift: Vector3<f32>,
    /// Raw body-frame angular velocity.
    pub(crate) angular_velo: Vector3<f32>,
    /// Integrated angular rotation.
    pub(crate) angular_rotation: Vector3<f32>,
}

/// Fixed-capacity ring of inertial samples with cumulative integration.
#[derive(Debug)]
pub struct ImuBuffer {
    entries: Vec<ImuEntry>,
    /// Index of the most recently written sample, -1 while empty.
    newest: i64,
    /// Integration restarts when adjacent samples are further apart.
    scan_period: f32,
}

impl ImuBuffer {
    /// Create a buffer of `queue_length` slots.
    pub fn new(queue_length: usize, scan_period: f32) -> Self {
        Self {
            entries: vec![ImuEntry::default(); queue_length.max(1)],
            newest: -1,
            scan_period,
        }
    }

    /// Ring capacity in samples.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Index of the most recently written sample, if any.
    #[inline]
    pub fn newest(&self) -> Option<usize> {
        if self.newest < 0 {
            None
        } else {
            Some(self.newest as usize)
        }
    }

    #[inline]
    pub(crate) fn entry(&self, idx: usize) -> &ImuEntry {
        &self.entries[idx]
    }

    /// Append one measurement and run one integration step.
    ///
    /// The orientation quaternion is reduced to roll/pitch/yaw; the
    /// acceleration is remapped into the camera-like frame with gravity
    /// removed component-wise. Velocity, shift and angular rotation are
    /// integrated from the previous slot unless the time gap reaches a
    /// scan period, in which case the integrated fields keep the slot's
    /// previous content and integration restarts from there.
    pub fn push(&mut self, sample: &ImuSample) {
        let [qx, qy, qz, qw] = sample.orientation;
        let q = UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz));
        let (roll, pitch, yaw) = q.euler_angles();

        let [lx, ly, lz] = sample.linear_acceleration;
        let acc_x = ly - roll.sin() * pitch.cos() * GRAVITY;
        let acc_y = lz - roll.cos() * pitch.cos() * GRAVITY;
        let acc_z = lx + pitch.sin() * GRAVITY;

        let len = self.entries.len() as i64;
        self.newest = (self.newest + 1) % len;
        let idx = self.newest as usize;

        // Only the measured fields are overwritten; velo/shift/rotation are
        // produced by the integration step below.
        let entry = &mut self.entries[idx];
        entry.time = sample.stamp;
        entry.roll = roll;
        entry.pitch = pitch;
        entry.yaw = yaw;
        entry.acc = Vector3::new(acc_x, acc_y, acc_z);
        entry.angular_velo = Vector3::from(sample.angular_velocity);

        self.accumulate_shift_and_rotation();
    }

    /// Integrate shift, velocity and angular rotation into the newest slot.
    fn accumulate_shift_and_rotation(&mut self) {
        let idx = self.newest as usize;
        let len = self.entries.len();
        let back = (idx + len - 1) % len;

        let (roll, pitch, yaw, acc) = {
            let e = &self.entries[idx];
            (e.roll, e.pitch, e.yaw, e.acc)
        };

        // Rotate the compensated acceleration into the world frame.
        let x1 = roll.cos() * acc.x - roll.sin() * acc.y;
        let y1 = roll.sin() * acc.x + roll.cos() * acc.y;
        let z1 = acc.z;

        let x2 = x1;
        let y2 = pitch.cos() * y1 - pitch.sin() * z1;
        let z2 = pitch.sin() * y1 + pitch.cos() * z1;

        let acc_world = Vector3::new(
            yaw.cos() * x2 + yaw.sin() * z2,
            y2,
            -yaw.sin() * x2 + yaw.cos() * z2,
        );

        let time_diff = (self.entries[idx].time - self.entries[back].time) as f32;
        if time_diff < self.scan_period {
            let prev_velo = self.entries[back].velo;
            let prev_shift = self.entries[back].shift;
            let prev_ang_rot = self.entries[back].angular_rotation;
            let prev_ang_velo = self.entries[back].angular_velo;

            let e = &mut self.entries[idx];
            e.shift = prev_shift + prev_velo * time_diff + acc_world * (time_diff * time_diff / 2.0);
            e.velo = prev_velo + acc_world * time_diff;
            e.angular_rotation = prev_ang_rot + prev_ang_velo * time_diff;
        } else {
            log::debug!(
                "imu gap of {:.3}s at t={:.3}, integration restarted",
                time_diff,
                self.entries[idx].time
            );
        }
    }
}

/// Shared, lock-protected IMU buffer.
pub type SharedImuBuffer = Arc<Mutex<ImuBuffer>>;

/// Cloneable ingestion handle for the IMU callback thread.
#[derive(Debug, Clone)]
pub struct ImuHandle {
    buffer: SharedImuBuffer,
}

impl ImuHandle {
    /// Wrap a shared buffer.
    pub fn new(buffer: SharedImuBuffer) -> Self {
        Self { buffer }
    }

    /// Append one measurement under the buffer lock.
    pub fn push(&self, sample: &ImuSample) {
        self.buffer.lock().push(sample);
    }

    /// Access the underlying shared buffer.
    pub fn shared(&self) -> &SharedImuBuffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn level_sample(stamp: f64) -> ImuSample {
        ImuSample {
            stamp,
            orientation: [0.0, 0.0, 0.0, 1.0],
            // gravity along body z maps to the remapped y axis
            linear_acceleration: [0.0, 0.0, GRAVITY],
            angular_velocity: [0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn test_empty_buffer_has_no_newest() {
        let buf = ImuBuffer::new(8, 0.1);
        assert!(buf.newest().is_none());
    }

    #[test]
    fn test_gravity_cancels_when_level() {
        let mut buf = ImuBuffer::new(8, 0.1);
        buf.push(&level_sample(0.0));
        let e = buf.entry(buf.newest().unwrap());
        assert_relative_eq!(e.acc.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(e.acc.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(e.acc.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_pointer_wraps_modulo_capacity() {
        let mut buf = ImuBuffer::new(4, 0.1);
        for i in 0..6 {
            buf.push(&level_sample(i as f64 * 0.01));
        }
        assert_eq!(buf.newest(), Some(1));
    }

    #[test]
    fn test_stationary_integration_stays_put() {
        let mut buf = ImuBuffer::new(64, 0.1);
        for i in 0..50 {
            buf.push(&level_sample(i as f64 * 0.005));
        }
        let e = buf.entry(buf.newest().unwrap());
        assert_relative_eq!(e.velo.norm(), 0.0, epsilon = 1e-4);
        assert_relative_eq!(e.shift.norm(), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_constant_acceleration_integrates() {
        let mut buf = ImuBuffer::new(64, 0.5);
        // 1 m/s² along remapped x (body y), sampled at 100 Hz for 1 s
        for i in 0..=100 {
            buf.push(&ImuSample {
                stamp: i as f64 * 0.01,
                orientation: [0.0, 0.0, 0.0, 1.0],
                linear_acceleration: [0.0, 1.0, GRAVITY],
                angular_velocity: [0.0, 0.0, 0.0],
            });
        }
        let e = buf.entry(buf.newest().unwrap());
        assert_relative_eq!(e.velo.x, 1.0, epsilon = 0.02);
        assert_relative_eq!(e.shift.x, 0.5, epsilon = 0.02);
    }

    #[test]
    fn test_gap_skips_integration_step() {
        let mut buf = ImuBuffer::new(8, 0.1);
        buf.push(&ImuSample {
            stamp: 0.0,
            orientation: [0.0, 0.0, 0.0, 1.0],
            linear_acceleration: [0.0, 1.0, GRAVITY],
            angular_velocity: [0.0, 0.0, 0.0],
        });
        // second sample a full scan period later: no integration
        buf.push(&ImuSample {
            stamp: 0.5,
            orientation: [0.0, 0.0, 0.0, 1.0],
            linear_acceleration: [0.0, 1.0, GRAVITY],
            angular_velocity: [0.0, 0.0, 0.0],
        });
        let e = buf.entry(1);
        assert_relative_eq!(e.velo.norm(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(e.shift.norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_angular_rotation_integrates_rate() {
        let mut buf = ImuBuffer::new(64, 0.1);
        for i in 0..=10 {
            buf.push(&ImuSample {
                stamp: i as f64 * 0.01,
                orientation: [0.0, 0.0, 0.0, 1.0],
                linear_acceleration: [0.0, 0.0, GRAVITY],
                angular_velocity: [0.0, 0.0, 0.5],
            });
        }
        let e = buf.entry(buf.newest().unwrap());
        // 0.5 rad/s for 0.1 s
        assert_relative_eq!(e.angular_rotation.z, 0.05, epsilon = 1e-4);
    }

    #[test]
    fn test_rpy_extraction_pure_yaw() {
        let mut buf = ImuBuffer::new(8, 0.1);
        let half = 0.25_f32; // yaw of 0.5 rad
        buf.push(&ImuSample {
            stamp: 0.0,
            orientation: [0.0, 0.0, half.sin(), half.cos()],
            linear_acceleration: [0.0, 0.0, GRAVITY],
            angular_velocity: [0.0, 0.0, 0.0],
        });
        let e = buf.entry(0);
        assert_relative_eq!(e.yaw, 0.5, epsilon = 1e-5);
        assert_relative_eq!(e.roll, 0.0, epsilon = 1e-5);
        assert_relative_eq!(e.pitch, 0.0, epsilon = 1e-5);
    }
}
