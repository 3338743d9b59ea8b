//! Sensor processing layer: IMU buffering/integration and cloud filters.

pub mod imu;
pub mod preprocessing;
