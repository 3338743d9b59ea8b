//! Curvature-based feature extraction.
//!
//! Each ring of the segmented cloud is scored with an 11-point smoothness
//! stencil, masked for occlusions and near-parallel beams, split into six
//! azimuthal sectors, and classified into sharp/less-sharp corners (non-
//! ground, high curvature) and flat/less-flat surfaces (ground, low
//! curvature). Less-flat surfaces are voxel-downsampled per ring before
//! they become the next scan's matching target.

use crate::config::FeatureConfig;
use crate::core::types::{PointCloud, SegmentationInfo};
use crate::sensors::preprocessing::VoxelGridFilter;
use std::cmp::Ordering;

/// Feature point labels, mirrored into the `label` scratch array.
const LABEL_SHARP: i8 = 2;
const LABEL_LESS_SHARP: i8 = 1;
const LABEL_FLAT: i8 = -1;

/// Per-scan classified feature clouds.
#[derive(Debug, Clone, Default)]
pub struct FeatureBuckets {
    /// Strongest corners, at most 2 per ring sector.
    pub corner_sharp: PointCloud,
    /// Corners including the sharp set, at most 20 per ring sector.
    pub corner_less_sharp: PointCloud,
    /// Flattest ground points, at most 4 per ring sector.
    pub surf_flat: PointCloud,
    /// Everything not classified as corner, voxel-downsampled per ring.
    pub surf_less_flat: PointCloud,
}

impl FeatureBuckets {
    pub fn clear(&mut self) {
        self.corner_sharp.clear();
        self.corner_less_sharp.clear();
        self.surf_flat.clear();
        self.surf_less_flat.clear();
    }
}

/// Smoothness scoring and feature classification for segmented scans.
#[derive(Debug)]
pub struct FeatureExtractor {
    config: FeatureConfig,
    n_scan: usize,
    curvature: Vec<f32>,
    neighbor_picked: Vec<bool>,
    label: Vec<i8>,
    /// (curvature, index) pairs, sorted per sector.
    smoothness: Vec<(f32, usize)>,
    less_flat_scan: PointCloud,
    less_flat_scan_ds: PointCloud,
    voxel_filter: VoxelGridFilter,
}

impl FeatureExtractor {
    /// Create an extractor for scans of `n_scan` rings.
    pub fn new(n_scan: usize, config: FeatureConfig) -> Self {
        let voxel_filter = VoxelGridFilter::new(config.voxel_leaf_size);
        Self {
            config,
            n_scan,
            curvature: Vec::new(),
            neighbor_picked: Vec::new(),
            label: Vec::new(),
            smoothness: Vec::new(),
            less_flat_scan: PointCloud::new(),
            less_flat_scan_ds: PointCloud::new(),
            voxel_filter,
        }
    }

    /// Score, mask and classify one segmented scan into `buckets`.
    pub fn extract(
        &mut self,
        cloud: &PointCloud,
        seg: &SegmentationInfo,
        buckets: &mut FeatureBuckets,
    ) {
        self.calculate_smoothness(seg, cloud.len());
        self.mark_occluded_points(seg, cloud.len());
        self.extract_features(cloud, seg, buckets);
    }

    /// 11-point range-difference stencil squared, per point.
    fn calculate_smoothness(&mut self, seg: &SegmentationInfo, cloud_size: usize) {
        self.curvature.clear();
        self.curvature.resize(cloud_size, 0.0);
        self.neighbor_picked.clear();
        self.neighbor_picked.resize(cloud_size, false);
        self.label.clear();
        self.label.resize(cloud_size, 0);
        self.smoothness.clear();
        self.smoothness.extend((0..cloud_size).map(|i| (0.0, i)));

        let r = &seg.range;
        for i in 5..cloud_size.saturating_sub(5) {
            let diff_range = r[i - 5] + r[i - 4] + r[i - 3] + r[i - 2] + r[i - 1] - r[i] * 10.0
                + r[i + 1]
                + r[i + 2]
                + r[i + 3]
                + r[i + 4]
                + r[i + 5];

            self.curvature[i] = diff_range * diff_range;
            self.smoothness[i] = (self.curvature[i], i);
        }
    }

    /// Mask points on occlusion boundaries and near-parallel beams.
    fn mark_occluded_points(&mut self, seg: &SegmentationInfo, cloud_size: usize) {
        let r = &seg.range;
        let col = &seg.col_index;

        for i in 5..cloud_size.saturating_sub(6) {
            let depth1 = r[i];
            let depth2 = r[i + 1];
            let column_diff = (col[i + 1] - col[i]).abs();

            if column_diff < 10 {
                // the farther side of a depth jump may be partly occluded
                if depth1 - depth2 > 0.3 {
                    for k in i - 5..=i {
                        self.neighbor_picked[k] = true;
                    }
                } else if depth2 - depth1 > 0.3 {
                    for k in i + 1..=i + 6 {
                        self.neighbor_picked[k] = true;
                    }
                }
            }

            let diff1 = (r[i - 1] - r[i]).abs();
            let diff2 = (r[i + 1] - r[i]).abs();
            if diff1 > 0.02 * r[i] && diff2 > 0.02 * r[i] {
                self.neighbor_picked[i] = true;
            }
        }
    }

    /// Classify each ring sector and fill the feature buckets.
    fn extract_features(
        &mut self,
        cloud: &PointCloud,
        seg: &SegmentationInfo,
        buckets: &mut FeatureBuckets,
    ) {
        buckets.clear();

        for i in 0..self.n_scan {
            self.less_flat_scan.clear();

            for j in 0..6 {
                let sp = (seg.start_ring_index[i] * (6 - j) + seg.end_ring_index[i] * j) / 6;
                let ep =
                    (seg.start_ring_index[i] * (5 - j) + seg.end_ring_index[i] * (j + 1)) / 6 - 1;

                if sp >= ep {
                    continue;
                }
                let sp = sp as usize;
                let ep = ep as usize;

                self.smoothness[sp..ep].sort_unstable_by(|a, b| {
                    a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal)
                });

                self.pick_corners(sp, ep, cloud, seg, buckets);
                self.pick_surfaces(sp, ep, cloud, seg, buckets);

                for k in sp..=ep {
                    if self.label[k] <= 0 {
                        self.less_flat_scan.push(cloud[k]);
                    }
                }
            }

            self.less_flat_scan_ds.clear();
            self.voxel_filter
                .filter_into(&self.less_flat_scan, &mut self.less_flat_scan_ds);
            buckets
                .surf_less_flat
                .points
                .extend_from_slice(&self.less_flat_scan_ds.points);
        }
    }

    /// Walk one sector from highest curvature down, accepting corners.
    fn pick_corners(
        &mut self,
        sp: usize,
        ep: usize,
        cloud: &PointCloud,
        seg: &SegmentationInfo,
        buckets: &mut FeatureBuckets,
    ) {
        let mut largest_picked = 0;
        for k in (sp..=ep).rev() {
            let ind = self.smoothness[k].1;
            if !self.neighbor_picked[ind]
                && self.curvature[ind] > self.config.edge_threshold
                && !seg.ground_flag[ind]
            {
                largest_picked += 1;
                if largest_picked <= 2 {
                    self.label[ind] = LABEL_SHARP;
                    buckets.corner_sharp.push(cloud[ind]);
                    buckets.corner_less_sharp.push(cloud[ind]);
                } else if largest_picked <= 20 {
                    self.label[ind] = LABEL_LESS_SHARP;
                    buckets.corner_less_sharp.push(cloud[ind]);
                } else {
                    break;
                }

                self.suppress_neighbors(ind, seg);
            }
        }
    }

    /// Walk one sector from lowest curvature up, accepting flat surfaces.
    fn pick_surfaces(
        &mut self,
        sp: usize,
        ep: usize,
        cloud: &PointCloud,
        seg: &SegmentationInfo,
        buckets: &mut FeatureBuckets,
    ) {
        let mut smallest_picked = 0;
        for k in sp..=ep {
            let ind = self.smoothness[k].1;
            if !self.neighbor_picked[ind]
                && self.curvature[ind] < self.config.surf_threshold
                && seg.ground_flag[ind]
            {
                self.label[ind] = LABEL_FLAT;
                buckets.surf_flat.push(cloud[ind]);

                smallest_picked += 1;
                if smallest_picked >= 4 {
                    break;
                }

                self.suppress_neighbors(ind, seg);
            }
        }
    }

    /// Mark the ±5 neighbors of an accepted feature as picked, stopping at
    /// column gaps wider than 10 bins.
    fn suppress_neighbors(&mut self, ind: usize, seg: &SegmentationInfo) {
        self.neighbor_picked[ind] = true;

        for l in 1..=5usize {
            if ind + l >= seg.col_index.len() {
                continue;
            }
            let column_diff = (seg.col_index[ind + l] - seg.col_index[ind + l - 1]).abs();
            if column_diff > 10 {
                break;
            }
            self.neighbor_picked[ind + l] = true;
        }
        for l in 1..=5usize {
            if l > ind {
                continue;
            }
            let column_diff = (seg.col_index[ind - l] - seg.col_index[ind - l + 1]).abs();
            if column_diff > 10 {
                break;
            }
            self.neighbor_picked[ind - l] = true;
        }
    }
}
