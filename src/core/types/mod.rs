//! Core data types shared across the pipeline stages.

mod odometry;
mod point;
mod segmentation;

pub use odometry::LaserOdometry;
pub use point::{Point, PointCloud};
pub use segmentation::SegmentationInfo;
