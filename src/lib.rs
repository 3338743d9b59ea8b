//! Ground-optimized LiDAR odometry front-end.
//!
//! Ingests raw 3D LiDAR scans and an inertial stream, and produces a
//! per-scan 6-DoF motion estimate plus feature-classified point clouds
//! for a downstream mapping stage.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   threads/                          │  ← Pipeline workers
//! │      (projection thread, odometry thread)           │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   engine/                           │  ← Orchestration
//! │               (scan odometry)                       │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                 algorithms/                         │  ← Core algorithms
//! │        (projection, features, matching)             │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  sensors/                           │  ← Sensor processing
//! │           (imu, preprocessing)                      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    core/                            │  ← Foundation
//! │                (types, math)                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Pipeline
//!
//! Two long-running workers connected by bounded channels:
//!
//! 1. **Projection** organizes each unordered scan into a (ring × azimuth)
//!    range image, separates ground with an adjacent-ring angle test, and
//!    clusters the rest by region growing.
//! 2. **Odometry** deskews the segmented scan against the IMU ring
//!    buffer, classifies curvature features, associates them with the
//!    previous scan (point-to-line for corners, point-to-plane for
//!    surfaces) and solves for the incremental motion with degeneracy
//!    protection.
//!
//! The working frame is camera-like: `(x, y, z) = (y, z, x)` of the
//! sensor frame, with rotations composed in z-x-y order. Output
//! quaternions carry the corresponding axis swap; consumers of the
//! mapping bundles rely on it.
//!
//! # Example
//!
//! ```no_run
//! use lidar_odom::{OdometryPipeline, PipelineConfig, RawScan};
//!
//! let pipeline = OdometryPipeline::spawn(PipelineConfig::default());
//! let imu = pipeline.imu_handle();
//!
//! // feed scans and IMU samples from the transport layer...
//! pipeline.submit_scan(RawScan { stamp: 0.0, points: vec![] }).ok();
//!
//! for odom in pipeline.odometry_output().iter() {
//!     println!("pose: {:?}", odom.position);
//! }
//! ```

pub mod algorithms;
pub mod config;
pub mod core;
pub mod engine;
pub mod sensors;
pub mod threads;

// Core types
pub use crate::core::types::{LaserOdometry, Point, PointCloud, SegmentationInfo};

// Configuration
pub use config::{FeatureConfig, ImuConfig, OdometryConfig, PipelineConfig, ScanConfig};

// Sensors
pub use sensors::imu::{ImuBuffer, ImuHandle, ImuSample, ImuScanState, SharedImuBuffer};
pub use sensors::preprocessing::VoxelGridFilter;

// Algorithms
pub use algorithms::features::{FeatureBuckets, FeatureExtractor};
pub use algorithms::matching::{FeatureMatcher, TransformSolver};
pub use algorithms::projection::{ProjectionOutput, ScanProjector};

// Engine
pub use engine::{AssociationOutput, ScanOdometry, ScanResult};

// Pipeline
pub use threads::{OdometryPipeline, PipelineError, RawScan};
