//! Orchestration layer: the per-scan odometry engine.

mod odometry;

pub use odometry::{AssociationOutput, ScanOdometry, ScanResult};
