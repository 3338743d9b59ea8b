//! Voxel-grid downsampling.
//!
//! Replaces all points falling into one cubic leaf with their centroid.
//! Used to thin the less-flat surface accumulator before it becomes the
//! next scan's matching target.

use crate::core::types::{Point, PointCloud};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    x: f32,
    y: f32,
    z: f32,
    intensity: f32,
    count: u32,
}

/// Centroid-per-leaf voxel grid filter.
#[derive(Debug, Clone)]
pub struct VoxelGridFilter {
    leaf_size: f32,
    cells: HashMap<(i32, i32, i32), Accumulator>,
}

impl VoxelGridFilter {
    /// Create a filter with cubic leaves of `leaf_size` meters.
    pub fn new(leaf_size: f32) -> Self {
        assert!(leaf_size > 0.0, "leaf size must be positive");
        Self {
            leaf_size,
            cells: HashMap::new(),
        }
    }

    /// Leaf edge length in meters.
    pub fn leaf_size(&self) -> f32 {
        self.leaf_size
    }

    /// Downsample `input`, appending one centroid per occupied leaf to
    /// `output`. Non-finite points are dropped. Output order follows the
    /// leaf grid so consecutive scans sample consistently.
    pub fn filter_into(&mut self, input: &PointCloud, output: &mut PointCloud) {
        self.cells.clear();
        let inv_leaf = 1.0 / self.leaf_size;

        for p in input.iter() {
            if p.is_invalid() {
                continue;
            }
            let key = (
                (p.x * inv_leaf).floor() as i32,
                (p.y * inv_leaf).floor() as i32,
                (p.z * inv_leaf).floor() as i32,
            );
            let acc = self.cells.entry(key).or_default();
            acc.x += p.x;
            acc.y += p.y;
            acc.z += p.z;
            acc.intensity += p.intensity;
            acc.count += 1;
        }

        let mut keys: Vec<(i32, i32, i32)> = self.cells.keys().copied().collect();
        keys.sort_unstable();

        output.points.reserve(keys.len());
        for key in keys {
            let acc = self.cells[&key];
            let n = acc.count as f32;
            output.push(Point::with_intensity(
                acc.x / n,
                acc.y / n,
                acc.z / n,
                acc.intensity / n,
            ));
        }
    }

    /// Downsample into a fresh cloud.
    pub fn filter(&mut self, input: &PointCloud) -> PointCloud {
        let mut output = PointCloud::new();
        self.filter_into(input, &mut output);
        output
    }
}
