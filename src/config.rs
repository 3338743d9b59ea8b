//! Runtime configuration for the odometry front-end.
//!
//! All parameters are read once at startup and never mutated afterwards.
//! Defaults correspond to a Velodyne VLP-16 mounted level. Angular values
//! are radians unless the doc comment says otherwise.

use serde::{Deserialize, Serialize};

/// Scanner geometry and segmentation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Number of vertical beams (range-image rows).
    pub n_scan: usize,
    /// Azimuth bins per revolution (range-image columns).
    pub horizontal_scan: usize,
    /// Horizontal angular resolution.
    pub ang_res_x: f32,
    /// Vertical angular resolution.
    pub ang_res_y: f32,
    /// Angle below horizontal of the lowest beam.
    pub ang_bottom: f32,
    /// Highest row index that may contain ground returns.
    pub ground_scan_index: usize,
    /// Seconds per full revolution.
    pub scan_period: f32,
    /// Sensor mounting angle relative to the ground plane.
    pub sensor_mount_angle: f32,
    /// Angle threshold of the cluster growing test.
    pub segment_theta: f32,
    /// Horizontal step angle used in the cluster test (equals `ang_res_x`).
    pub segment_alpha_x: f32,
    /// Vertical step angle used in the cluster test (equals `ang_res_y`).
    pub segment_alpha_y: f32,
    /// Minimum points for a small cluster to be considered at all.
    pub segment_valid_point_num: usize,
    /// Minimum distinct rows for a small cluster to be accepted.
    pub segment_valid_line_num: usize,
    /// Returns closer than this are discarded, meters.
    pub min_range: f32,
}

impl ScanConfig {
    /// Velodyne VLP-16: 16 beams, 1800 columns, ±15° vertical field of view.
    pub fn vlp16() -> Self {
        Self {
            n_scan: 16,
            horizontal_scan: 1800,
            ang_res_x: 0.2_f32.to_radians(),
            ang_res_y: 2.0_f32.to_radians(),
            ang_bottom: 15.1_f32.to_radians(),
            ground_scan_index: 7,
            scan_period: 0.1,
            sensor_mount_angle: 0.0,
            segment_theta: 60.0_f32.to_radians(),
            segment_alpha_x: 0.2_f32.to_radians(),
            segment_alpha_y: 2.0_f32.to_radians(),
            segment_valid_point_num: 5,
            segment_valid_line_num: 3,
            min_range: 0.1,
        }
    }

    /// Total cell count of the range image.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.n_scan * self.horizontal_scan
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::vlp16()
    }
}

/// Feature extraction thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Curvature above which a non-ground point qualifies as a corner.
    pub edge_threshold: f32,
    /// Curvature below which a ground point qualifies as a surface.
    pub surf_threshold: f32,
    /// Leaf size of the less-flat surface downsampling, meters.
    pub voxel_leaf_size: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 0.1,
            surf_threshold: 0.1,
            voxel_leaf_size: 0.2,
        }
    }
}

/// Scan-to-scan association and solver parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdometryConfig {
    /// Squared distance gate for nearest-feature queries, meters².
    pub nearest_feature_search_sq_dist: f32,
    /// Maximum iterations of each solver pass (surface, then corner).
    pub max_iterations: usize,
    /// Forward every Nth scan's feature clouds to the mapping sink.
    pub mapping_frequency_divider: usize,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            nearest_feature_search_sq_dist: 25.0,
            max_iterations: 25,
            mapping_frequency_divider: 2,
        }
    }
}

/// IMU ring-buffer sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImuConfig {
    /// Ring-buffer capacity in samples. At 200 Hz this holds one second.
    pub queue_length: usize,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self { queue_length: 200 }
    }
}

/// Top-level configuration for the threaded pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub scan: ScanConfig,
    pub feature: FeatureConfig,
    pub odometry: OdometryConfig,
    pub imu: ImuConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vlp16_geometry() {
        let cfg = ScanConfig::vlp16();
        assert_eq!(cfg.cell_count(), 16 * 1800);
        // column resolution covers a full revolution
        assert_relative_eq!(
            cfg.ang_res_x * cfg.horizontal_scan as f32,
            std::f32::consts::TAU,
            epsilon = 1e-3
        );
        assert_relative_eq!(cfg.segment_alpha_x, cfg.ang_res_x);
        assert_relative_eq!(cfg.segment_alpha_y, cfg.ang_res_y);
    }

    #[test]
    fn test_defaults_are_consistent() {
        let cfg = PipelineConfig::default();
        assert!(cfg.scan.ground_scan_index < cfg.scan.n_scan);
        assert!(cfg.odometry.mapping_frequency_divider >= 1);
        assert!(cfg.imu.queue_length >= 200);
    }
}
