//! Range-image projection, ground removal and cloud segmentation.
//!
//! Unordered returns are organized into a (ring × azimuth) range image,
//! ground is separated with an adjacent-ring angle test, the remaining
//! cells are clustered by region growing, and a compact segmented cloud
//! plus its ring metadata are emitted for the association stage.

mod segmentation;

pub use segmentation::OUTLIER_LABEL;

use crate::config::ScanConfig;
use crate::core::math::unwrap_scan_span;
use crate::core::types::{Point, PointCloud, SegmentationInfo};
use segmentation::ClusterLabeler;
use std::f32::consts::{FRAC_PI_2, PI};

/// Ground matrix states.
const GROUND_UNKNOWN: i8 = -1;
const GROUND_NO: i8 = 0;
const GROUND_YES: i8 = 1;

/// One projected and segmented scan, handed to the association stage.
#[derive(Debug, Clone, Default)]
pub struct ProjectionOutput {
    /// Clustered non-ground points plus subsampled ground points.
    pub segmented_cloud: PointCloud,
    /// Subsampled returns from rejected small clusters.
    pub outlier_cloud: PointCloud,
    /// Ring windows and per-point metadata for `segmented_cloud`.
    pub seg_info: SegmentationInfo,
}

/// Projects raw scans into a range image and segments them.
///
/// Owns all per-scan working matrices; they are reset and reused across
/// scans, while each call's output is freshly allocated for the consumer.
#[derive(Debug)]
pub struct ScanProjector {
    config: ScanConfig,
    cloud_in: PointCloud,
    range_mat: Vec<f32>,
    ground_mat: Vec<i8>,
    label_mat: Vec<i32>,
    label_count: i32,
    full_cloud: PointCloud,
    full_info_cloud: PointCloud,
    ground_cloud: PointCloud,
    segmented_cloud_pure: PointCloud,
    labeler: ClusterLabeler,
}

impl ScanProjector {
    /// Create a projector for the given scanner geometry.
    pub fn new(config: ScanConfig) -> Self {
        let cells = config.cell_count();
        Self {
            config,
            cloud_in: PointCloud::new(),
            range_mat: vec![f32::MAX; cells],
            ground_mat: vec![GROUND_NO; cells],
            label_mat: vec![0; cells],
            label_count: 1,
            full_cloud: PointCloud::filled_invalid(cells),
            full_info_cloud: PointCloud::filled_invalid(cells),
            ground_cloud: PointCloud::new(),
            segmented_cloud_pure: PointCloud::new(),
            labeler: ClusterLabeler::new(),
        }
    }

    /// Scanner geometry this projector was built with.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// The full projected cloud of the last scan, one slot per image cell,
    /// positionally tagged (`row + col/10000`). Absent cells are invalid.
    pub fn full_cloud(&self) -> &PointCloud {
        &self.full_cloud
    }

    /// Like [`Self::full_cloud`] but with measured range in the tag slot.
    pub fn full_info_cloud(&self) -> &PointCloud {
        &self.full_info_cloud
    }

    /// Ground returns of the last scan.
    pub fn ground_cloud(&self) -> &PointCloud {
        &self.ground_cloud
    }

    /// Accepted cluster points of the last scan, cluster id in the tag.
    pub fn segmented_cloud_pure(&self) -> &PointCloud {
        &self.segmented_cloud_pure
    }

    #[inline]
    fn cell(&self, row: usize, col: usize) -> usize {
        col + row * self.config.horizontal_scan
    }

    fn reset(&mut self) {
        let cells = self.config.cell_count();
        self.cloud_in.clear();
        self.range_mat.clear();
        self.range_mat.resize(cells, f32::MAX);
        self.ground_mat.clear();
        self.ground_mat.resize(cells, GROUND_NO);
        self.label_mat.clear();
        self.label_mat.resize(cells, 0);
        self.label_count = 1;
        self.full_cloud.reset_invalid(cells);
        self.full_info_cloud.reset_invalid(cells);
        self.ground_cloud.clear();
        self.segmented_cloud_pure.clear();
    }

    /// Project and segment one scan.
    pub fn process(&mut self, stamp: f64, points: &[Point]) -> ProjectionOutput {
        self.reset();

        self.cloud_in
            .points
            .extend(points.iter().copied().filter(|p| !p.is_invalid()));

        let mut seg_info = SegmentationInfo::with_rings(self.config.n_scan);
        seg_info.stamp = stamp;

        if self.cloud_in.is_empty() {
            log::warn!("empty scan at t={:.3}, nothing to project", stamp);
            return ProjectionOutput {
                seg_info,
                ..ProjectionOutput::default()
            };
        }

        self.find_start_end_angle(&mut seg_info);
        self.project_point_cloud();
        self.ground_removal();
        self.segment_clusters();
        self.emit(seg_info)
    }

    /// Azimuth of the first and last return, unwrapped to one revolution.
    fn find_start_end_angle(&self, seg_info: &mut SegmentationInfo) {
        let first = self.cloud_in[0];
        let last = self.cloud_in[self.cloud_in.len() - 1];

        seg_info.start_orientation = -f32::atan2(first.y, first.x);
        let raw_end = -f32::atan2(last.y, last.x) + 2.0 * PI;
        seg_info.end_orientation = unwrap_scan_span(seg_info.start_orientation, raw_end);
        seg_info.orientation_diff = seg_info.end_orientation - seg_info.start_orientation;
    }

    /// Map each return to its (row, column) cell and record its range.
    fn project_point_cloud(&mut self) {
        let n_scan = self.config.n_scan as i32;
        let h_scan = self.config.horizontal_scan as i32;

        for i in 0..self.cloud_in.len() {
            let mut p = self.cloud_in[i];
            let range = p.range();

            let vertical_angle = (p.z / range).asin();
            let row = ((vertical_angle + self.config.ang_bottom) / self.config.ang_res_y) as i32;
            if row < 0 || row >= n_scan {
                continue;
            }

            let horizon_angle = f32::atan2(p.x, p.y);
            let mut col = (-((horizon_angle - FRAC_PI_2) / self.config.ang_res_x).round()
                + h_scan as f32 * 0.5) as i32;
            if col >= h_scan {
                col -= h_scan;
            }
            if col < 0 || col >= h_scan {
                continue;
            }

            if range < self.config.min_range {
                continue;
            }

            let idx = self.cell(row as usize, col as usize);
            self.range_mat[idx] = range;

            p.intensity = row as f32 + col as f32 / 10000.0;
            self.full_cloud[idx] = p;
            self.full_info_cloud[idx] = Point::with_intensity(p.x, p.y, p.z, range);
        }
    }

    /// Classify ground cells and mark segmentation-ineligible cells.
    fn ground_removal(&mut self) {
        let h_scan = self.config.horizontal_scan;

        for j in 0..h_scan {
            for i in 0..self.config.ground_scan_index {
                let lower = self.cell(i, j);
                let upper = self.cell(i + 1, j);

                if self.full_cloud[lower].intensity == -1.0
                    || self.full_cloud[upper].intensity == -1.0
                {
                    self.ground_mat[lower] = GROUND_UNKNOWN;
                    continue;
                }

                let dx = self.full_cloud[upper].x - self.full_cloud[lower].x;
                let dy = self.full_cloud[upper].y - self.full_cloud[lower].y;
                let dz = self.full_cloud[upper].z - self.full_cloud[lower].z;

                let vertical_angle = f32::atan2(dz, (dx * dx + dy * dy + dz * dz).sqrt());

                if vertical_angle - self.config.sensor_mount_angle <= 10.0_f32.to_radians() {
                    self.ground_mat[lower] = GROUND_YES;
                    self.ground_mat[upper] = GROUND_YES;
                }
            }
        }

        // Ground and absent cells take no part in clustering.
        for idx in 0..self.config.cell_count() {
            if self.ground_mat[idx] == GROUND_YES || self.range_mat[idx] == f32::MAX {
                self.label_mat[idx] = -1;
            }
        }

        for i in 0..=self.config.ground_scan_index {
            for j in 0..h_scan {
                let idx = self.cell(i, j);
                if self.ground_mat[idx] == GROUND_YES {
                    self.ground_cloud.push(self.full_cloud[idx]);
                }
            }
        }
    }

    /// Grow clusters from every unlabeled cell.
    fn segment_clusters(&mut self) {
        for i in 0..self.config.n_scan {
            for j in 0..self.config.horizontal_scan {
                if self.label_mat[self.cell(i, j)] == 0 {
                    self.labeler.label_component(
                        &self.config,
                        &self.range_mat,
                        &mut self.label_mat,
                        &mut self.label_count,
                        i,
                        j,
                    );
                }
            }
        }
    }

    /// Walk the image row-major and emit the segmented and outlier clouds.
    fn emit(&mut self, mut seg_info: SegmentationInfo) -> ProjectionOutput {
        let h_scan = self.config.horizontal_scan;
        let mut segmented_cloud = PointCloud::new();
        let mut outlier_cloud = PointCloud::new();

        let mut size = 0i32;
        for i in 0..self.config.n_scan {
            seg_info.start_ring_index[i] = size - 1 + 5;

            for j in 0..h_scan {
                let idx = self.cell(i, j);
                let label = self.label_mat[idx];
                let ground = self.ground_mat[idx] == GROUND_YES;

                if label > 0 || ground {
                    if label == OUTLIER_LABEL {
                        if i > self.config.ground_scan_index && j % 5 == 0 {
                            outlier_cloud.push(self.full_cloud[idx]);
                        }
                        continue;
                    }
                    // most ground points are redundant for matching
                    if ground && (j % 5 != 0 && j > 5 && j < h_scan - 5) {
                        continue;
                    }

                    seg_info.push_point(ground, j as i32, self.range_mat[idx]);
                    segmented_cloud.push(self.full_cloud[idx]);
                    size += 1;
                }
            }

            seg_info.end_ring_index[i] = size - 1 - 5;
        }

        for i in 0..self.config.n_scan {
            for j in 0..h_scan {
                let idx = self.cell(i, j);
                let label = self.label_mat[idx];
                if label > 0 && label != OUTLIER_LABEL {
                    let mut p = self.full_cloud[idx];
                    p.intensity = label as f32;
                    self.segmented_cloud_pure.push(p);
                }
            }
        }

        log::debug!(
            "scan t={:.3}: {} segmented, {} outliers, {} clusters",
            seg_info.stamp,
            segmented_cloud.len(),
            outlier_cloud.len(),
            self.label_count - 1
        );

        ProjectionOutput {
            segmented_cloud,
            outlier_cloud,
            seg_info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Ray-cast a flat floor below the sensor and a wall ahead of it.
    ///
    /// Down-tilted beams hit the floor at `z = -height`; up-tilted beams
    /// hit a wall at `x = wall_x` for forward azimuths.
    fn floor_and_wall_cloud(cfg: &ScanConfig, height: f32, wall_x: f32) -> Vec<Point> {
        let mut points = Vec::new();
        for col in 0..cfg.horizontal_scan {
            for row in 0..cfg.n_scan {
                // nudged off the exact bin edge so row truncation is stable
                let va = -cfg.ang_bottom + row as f32 * cfg.ang_res_y + 1e-4;
                // column formula inverted: azimuth measured as atan2(x, y)
                let ha = FRAC_PI_2
                    - (col as f32 - cfg.horizontal_scan as f32 * 0.5) * cfg.ang_res_x;
                let dir = [va.cos() * ha.sin(), va.cos() * ha.cos(), va.sin()];

                let t = if va < -0.01 {
                    height / -dir[2]
                } else if dir[0] > 0.3 {
                    wall_x / dir[0]
                } else {
                    continue;
                };
                if t <= 0.0 || t > 80.0 {
                    continue;
                }
                points.push(Point::new(dir[0] * t, dir[1] * t, dir[2] * t));
            }
        }
        points
    }

    fn project_scene() -> (ScanProjector, ProjectionOutput) {
        let cfg = ScanConfig::vlp16();
        let cloud = floor_and_wall_cloud(&cfg, 0.8, 6.0);
        let mut projector = ScanProjector::new(cfg);
        let out = projector.process(0.0, &cloud);
        (projector, out)
    }

    #[test]
    fn test_single_point_projection_tag() {
        let cfg = ScanConfig::vlp16();
        let mut projector = ScanProjector::new(cfg.clone());

        // straight ahead on the horizontal-most down beam
        let va = -cfg.ang_bottom + 7.0 * cfg.ang_res_y + 1e-4;
        let p = Point::new(5.0 * va.cos(), 0.0, 5.0 * va.sin());
        let out = projector.process(0.0, &[p]);

        assert_eq!(out.segmented_cloud.len(), 0); // lone point clusters away
        let projected: Vec<&Point> = projector
            .full_cloud()
            .iter()
            .filter(|p| !p.is_invalid())
            .collect();
        assert_eq!(projected.len(), 1);
        let tagged = projected[0];
        assert_eq!(tagged.ring(), 7);
        let col = (tagged.time_fraction() * 10000.0).round() as usize;
        assert!(col < cfg.horizontal_scan);
        // info cloud carries range in the tag slot
        let info: Vec<&Point> = projector
            .full_info_cloud()
            .iter()
            .filter(|p| !p.is_invalid())
            .collect();
        assert_relative_eq!(info[0].intensity, 5.0, epsilon = 1e-4);
    }

    #[test]
    fn test_too_close_returns_discarded() {
        let cfg = ScanConfig::vlp16();
        let mut projector = ScanProjector::new(cfg);
        let out = projector.process(0.0, &[Point::new(0.05, 0.0, 0.0)]);
        assert!(out.segmented_cloud.is_empty());
        assert!(projector.full_cloud().iter().all(|p| p.is_invalid()));
    }

    #[test]
    fn test_orientation_span_near_full_revolution() {
        let (_, out) = project_scene();
        let diff = out.seg_info.orientation_diff;
        assert!(diff > PI && diff < 3.0 * PI, "span {} out of (π, 3π)", diff);
    }

    #[test]
    fn test_floor_rows_marked_ground() {
        let (projector, out) = project_scene();
        // every emitted ground-flagged point must sit near the floor plane
        for (k, &is_ground) in out.seg_info.ground_flag.iter().enumerate() {
            if is_ground {
                assert!(
                    (out.segmented_cloud[k].z + 0.8).abs() < 0.05,
                    "ground point off the floor plane"
                );
            }
        }
        assert!(
            !projector.ground_cloud().is_empty(),
            "flat floor must produce ground returns"
        );
    }

    #[test]
    fn test_ring_windows_match_emitted_counts() {
        let (_, out) = project_scene();
        let n_scan = out.seg_info.start_ring_index.len();
        let mut total = 0i32;
        for i in 0..n_scan {
            let start = out.seg_info.start_ring_index[i];
            let end = out.seg_info.end_ring_index[i];
            // window bounds are monotone within the flattened cloud
            assert!(end + 6 >= start - 4, "ring {} window inverted", i);
            total += end - start + 10;
        }
        assert_eq!(total as usize, out.segmented_cloud.len());
        assert_eq!(out.seg_info.len(), out.segmented_cloud.len());
    }

    #[test]
    fn test_metadata_recoverable_from_tags() {
        let (projector, out) = project_scene();
        let cfg = projector.config();
        for k in 0..out.segmented_cloud.len() {
            let p = out.segmented_cloud[k];
            let row = p.ring() as usize;
            let col = (p.time_fraction() * 10000.0).round() as usize;
            assert!(col < cfg.horizontal_scan);
            assert_eq!(out.seg_info.col_index[k] as usize, col);
            let idx = col + row * cfg.horizontal_scan;
            assert_relative_eq!(
                out.seg_info.range[k],
                projector.range_mat[idx],
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_labels_partition_all_valid_cells() {
        let (projector, _) = project_scene();
        for idx in 0..projector.config().cell_count() {
            let has_return = projector.range_mat[idx] < f32::MAX;
            let ground = projector.ground_mat[idx] == GROUND_YES;
            let label = projector.label_mat[idx];
            if has_return && !ground {
                assert!(
                    label > 0,
                    "valid non-ground cell {} left unlabeled: {}",
                    idx,
                    label
                );
            }
            assert_ne!(label, 0, "cell {} not visited by segmentation", idx);
        }
    }

    #[test]
    fn test_cluster_ids_dense_from_one() {
        let (projector, _) = project_scene();
        let max_label = projector.label_count - 1;
        assert!(max_label >= 1, "scene must produce at least one cluster");
        let mut seen = vec![false; (max_label + 1) as usize];
        for &label in &projector.label_mat {
            if label > 0 && label != OUTLIER_LABEL {
                seen[label as usize] = true;
            }
        }
        for id in 1..=max_label as usize {
            assert!(seen[id], "cluster id {} unused", id);
        }
    }

    #[test]
    fn test_pure_cloud_carries_cluster_ids() {
        let (projector, _) = project_scene();
        for p in projector.segmented_cloud_pure().iter() {
            let id = p.intensity as i32;
            assert!(id >= 1 && id < projector.label_count);
        }
    }
}
