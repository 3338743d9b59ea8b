//! Per-scan segmentation metadata passed from projection to association.

use serde::{Deserialize, Serialize};

/// Ring-structured metadata for one segmented scan.
///
/// For every point emitted into the segmented cloud there is exactly one
/// entry at the same index in `ground_flag`, `col_index` and `range`; the
/// three vectors grow in lockstep with the cloud.
///
/// `start_ring_index[i]` / `end_ring_index[i]` bound each ring's usable
/// window in the flattened segmented cloud, inset by 5 points on either
/// side so the 11-point smoothness stencil never reads across a ring
/// boundary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SegmentationInfo {
    /// Scan acquisition time in seconds.
    pub stamp: f64,
    /// Azimuth of the first return, radians.
    pub start_orientation: f32,
    /// Azimuth of the last return plus unwrap offset, radians.
    pub end_orientation: f32,
    /// `end_orientation - start_orientation`.
    pub orientation_diff: f32,
    /// First usable index per ring (inset by +5).
    pub start_ring_index: Vec<i32>,
    /// Last usable index per ring (inset by -5).
    pub end_ring_index: Vec<i32>,
    /// Ground classification per emitted point.
    pub ground_flag: Vec<bool>,
    /// Original range-image column per emitted point.
    pub col_index: Vec<i32>,
    /// Measured range per emitted point, meters.
    pub range: Vec<f32>,
}

impl SegmentationInfo {
    /// Create metadata sized for `n_scan` rings, with empty point vectors.
    pub fn with_rings(n_scan: usize) -> Self {
        Self {
            start_ring_index: vec![0; n_scan],
            end_ring_index: vec![0; n_scan],
            ..Self::default()
        }
    }

    /// Reset for a new scan, reusing allocations.
    pub fn reset(&mut self, stamp: f64, n_scan: usize) {
        self.stamp = stamp;
        self.start_orientation = 0.0;
        self.end_orientation = 0.0;
        self.orientation_diff = 0.0;
        self.start_ring_index.clear();
        self.start_ring_index.resize(n_scan, 0);
        self.end_ring_index.clear();
        self.end_ring_index.resize(n_scan, 0);
        self.ground_flag.clear();
        self.col_index.clear();
        self.range.clear();
    }

    /// Record per-point metadata for one emitted segmented point.
    #[inline]
    pub fn push_point(&mut self, ground: bool, col: i32, range: f32) {
        self.ground_flag.push(ground);
        self.col_index.push(col);
        self.range.push(range);
    }

    /// Number of emitted points described by this metadata.
    #[inline]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}
