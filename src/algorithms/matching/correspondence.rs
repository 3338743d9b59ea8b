//! Correspondence search between current features and the previous scan.
//!
//! Corners pair with an edge line through two previous-scan corners on
//! nearby rings; surfaces pair with a plane through three previous-scan
//! surface points. Each accepted pairing contributes one weighted residual
//! row (original point + coefficient vector) to the solver.

use super::rotations::transform_to_start;
use crate::core::types::{Point, PointCloud};
use kiddo::{KdTree, SquaredEuclidean};

/// Build a 3D KD-tree over a cloud, payload = point index.
pub fn build_kdtree(cloud: &PointCloud) -> KdTree<f32, 3> {
    let mut tree: KdTree<f32, 3> = KdTree::new();
    for (i, p) in cloud.iter().enumerate() {
        tree.add(&[p.x, p.y, p.z], i as u64);
    }
    tree
}

/// Correspondence search state for one scan.
///
/// The per-feature target indices persist across solver iterations and
/// are refreshed every fifth iteration; `cloud_ori`/`coeff_sel` hold the
/// residual rows of the current iteration and are cleared by the caller
/// before each search.
#[derive(Debug)]
pub struct FeatureMatcher {
    nearest_sq_dist: f32,
    corner_ind1: Vec<i32>,
    corner_ind2: Vec<i32>,
    surf_ind1: Vec<i32>,
    surf_ind2: Vec<i32>,
    surf_ind3: Vec<i32>,
    /// Original (unwarped) feature points with an accepted residual.
    pub cloud_ori: PointCloud,
    /// Residual coefficients; `intensity` carries the weighted distance.
    pub coeff_sel: PointCloud,
}

impl FeatureMatcher {
    /// Create a matcher with the given squared nearest-neighbor gate.
    pub fn new(nearest_sq_dist: f32) -> Self {
        Self {
            nearest_sq_dist,
            corner_ind1: Vec::new(),
            corner_ind2: Vec::new(),
            surf_ind1: Vec::new(),
            surf_ind2: Vec::new(),
            surf_ind3: Vec::new(),
            cloud_ori: PointCloud::new(),
            coeff_sel: PointCloud::new(),
        }
    }

    /// Drop the residual rows of the previous iteration.
    pub fn clear_residuals(&mut self) {
        self.cloud_ori.clear();
        self.coeff_sel.clear();
    }

    /// Number of residual rows currently accumulated.
    pub fn residual_count(&self) -> usize {
        self.cloud_ori.len()
    }

    /// Pair each sharp corner with an edge line in `corner_last`.
    ///
    /// Every fifth iteration the target pair is re-searched: the KD-tree
    /// nearest neighbor plus a second corner on a different ring within
    /// ±2.5 rings, found by walking the target array outward from the
    /// nearest hit.
    pub fn find_corner_correspondences(
        &mut self,
        iter_count: usize,
        corner_sharp: &PointCloud,
        corner_last: &PointCloud,
        kdtree_corner_last: &KdTree<f32, 3>,
        transform: &[f32; 6],
    ) {
        let sharp_num = corner_sharp.len();
        self.corner_ind1.resize(sharp_num, -1);
        self.corner_ind2.resize(sharp_num, -1);
        // the search walk historically bounds the target walk by the
        // current sharp count; clamp to the target length for safety
        let forward_bound = sharp_num.min(corner_last.len());

        for i in 0..sharp_num {
            let point_sel = transform_to_start(&corner_sharp[i], transform);

            if iter_count % 5 == 0 {
                let nearest =
                    kdtree_corner_last.nearest_one::<SquaredEuclidean>(&[
                        point_sel.x,
                        point_sel.y,
                        point_sel.z,
                    ]);
                let mut closest_ind: i32 = -1;
                let mut min_ind2: i32 = -1;

                if nearest.distance < self.nearest_sq_dist
                    && (nearest.item as usize) < corner_last.len()
                {
                    closest_ind = nearest.item as i32;
                    let closest_scan = corner_last[closest_ind as usize].ring();

                    let mut min_sq2 = self.nearest_sq_dist;
                    for j in (closest_ind as usize + 1)..forward_bound {
                        if corner_last[j].ring() as f32 > closest_scan as f32 + 2.5 {
                            break;
                        }
                        let sq = sq_dist(&corner_last[j], &point_sel);
                        if corner_last[j].ring() > closest_scan && sq < min_sq2 {
                            min_sq2 = sq;
                            min_ind2 = j as i32;
                        }
                    }
                    for j in (0..closest_ind as usize).rev() {
                        if (corner_last[j].ring() as f32) < closest_scan as f32 - 2.5 {
                            break;
                        }
                        let sq = sq_dist(&corner_last[j], &point_sel);
                        if corner_last[j].ring() < closest_scan && sq < min_sq2 {
                            min_sq2 = sq;
                            min_ind2 = j as i32;
                        }
                    }
                }

                self.corner_ind1[i] = closest_ind;
                self.corner_ind2[i] = min_ind2;
            }

            if self.corner_ind2[i] >= 0 {
                let tripod1 = corner_last[self.corner_ind1[i] as usize];
                let tripod2 = corner_last[self.corner_ind2[i] as usize];

                let (x0, y0, z0) = (point_sel.x, point_sel.y, point_sel.z);
                let (x1, y1, z1) = (tripod1.x, tripod1.y, tripod1.z);
                let (x2, y2, z2) = (tripod2.x, tripod2.y, tripod2.z);

                let m11 = (x0 - x1) * (y0 - y2) - (x0 - x2) * (y0 - y1);
                let m22 = (x0 - x1) * (z0 - z2) - (x0 - x2) * (z0 - z1);
                let m33 = (y0 - y1) * (z0 - z2) - (y0 - y2) * (z0 - z1);

                let a012 = (m11 * m11 + m22 * m22 + m33 * m33).sqrt();
                let l12 =
                    ((x1 - x2) * (x1 - x2) + (y1 - y2) * (y1 - y2) + (z1 - z2) * (z1 - z2)).sqrt();

                let la = ((y1 - y2) * m11 + (z1 - z2) * m22) / a012 / l12;
                let lb = -((x1 - x2) * m11 - (z1 - z2) * m33) / a012 / l12;
                let lc = -((x1 - x2) * m22 + (y1 - y2) * m33) / a012 / l12;

                let ld2 = a012 / l12;

                let s = if iter_count >= 5 {
                    1.0 - 1.8 * ld2.abs()
                } else {
                    1.0
                };

                if s > 0.1 && ld2 != 0.0 {
                    self.cloud_ori.push(corner_sharp[i]);
                    self.coeff_sel
                        .push(Point::with_intensity(s * la, s * lb, s * lc, s * ld2));
                }
            }
        }
    }

    /// Pair each flat surface point with a plane in `surf_last`.
    ///
    /// The plane is spanned by the KD-tree nearest neighbor, a second
    /// point on the same or a lower ring, and a third point on a higher
    /// ring, all within ±2.5 rings of the nearest hit.
    pub fn find_surf_correspondences(
        &mut self,
        iter_count: usize,
        surf_flat: &PointCloud,
        surf_last: &PointCloud,
        kdtree_surf_last: &KdTree<f32, 3>,
        transform: &[f32; 6],
    ) {
        let flat_num = surf_flat.len();
        self.surf_ind1.resize(flat_num, -1);
        self.surf_ind2.resize(flat_num, -1);
        self.surf_ind3.resize(flat_num, -1);
        let forward_bound = flat_num.min(surf_last.len());

        for i in 0..flat_num {
            let point_sel = transform_to_start(&surf_flat[i], transform);

            if iter_count % 5 == 0 {
                let nearest = kdtree_surf_last.nearest_one::<SquaredEuclidean>(&[
                    point_sel.x,
                    point_sel.y,
                    point_sel.z,
                ]);
                let mut closest_ind: i32 = -1;
                let mut min_ind2: i32 = -1;
                let mut min_ind3: i32 = -1;

                if nearest.distance < self.nearest_sq_dist
                    && (nearest.item as usize) < surf_last.len()
                {
                    closest_ind = nearest.item as i32;
                    let closest_scan = surf_last[closest_ind as usize].ring();

                    let mut min_sq2 = self.nearest_sq_dist;
                    let mut min_sq3 = self.nearest_sq_dist;
                    for j in (closest_ind as usize + 1)..forward_bound {
                        if surf_last[j].ring() as f32 > closest_scan as f32 + 2.5 {
                            break;
                        }
                        let sq = sq_dist(&surf_last[j], &point_sel);
                        if surf_last[j].ring() <= closest_scan {
                            if sq < min_sq2 {
                                min_sq2 = sq;
                                min_ind2 = j as i32;
                            }
                        } else if sq < min_sq3 {
                            min_sq3 = sq;
                            min_ind3 = j as i32;
                        }
                    }
                    for j in (0..closest_ind as usize).rev() {
                        if (surf_last[j].ring() as f32) < closest_scan as f32 - 2.5 {
                            break;
                        }
                        let sq = sq_dist(&surf_last[j], &point_sel);
                        if surf_last[j].ring() >= closest_scan {
                            if sq < min_sq2 {
                                min_sq2 = sq;
                                min_ind2 = j as i32;
                            }
                        } else if sq < min_sq3 {
                            min_sq3 = sq;
                            min_ind3 = j as i32;
                        }
                    }
                }

                self.surf_ind1[i] = closest_ind;
                self.surf_ind2[i] = min_ind2;
                self.surf_ind3[i] = min_ind3;
            }

            if self.surf_ind2[i] >= 0 && self.surf_ind3[i] >= 0 {
                let tripod1 = surf_last[self.surf_ind1[i] as usize];
                let tripod2 = surf_last[self.surf_ind2[i] as usize];
                let tripod3 = surf_last[self.surf_ind3[i] as usize];

                let mut pa = (tripod2.y - tripod1.y) * (tripod3.z - tripod1.z)
                    - (tripod3.y - tripod1.y) * (tripod2.z - tripod1.z);
                let mut pb = (tripod2.z - tripod1.z) * (tripod3.x - tripod1.x)
                    - (tripod3.z - tripod1.z) * (tripod2.x - tripod1.x);
                let mut pc = (tripod2.x - tripod1.x) * (tripod3.y - tripod1.y)
                    - (tripod3.x - tripod1.x) * (tripod2.y - tripod1.y);
                let mut pd = -(pa * tripod1.x + pb * tripod1.y + pc * tripod1.z);

                let ps = (pa * pa + pb * pb + pc * pc).sqrt();
                pa /= ps;
                pb /= ps;
                pc /= ps;
                pd /= ps;

                let pd2 = pa * point_sel.x + pb * point_sel.y + pc * point_sel.z + pd;

                let s = if iter_count >= 5 {
                    1.0 - 1.8 * pd2.abs() / point_sel.range().sqrt()
                } else {
                    1.0
                };

                if s > 0.1 && pd2 != 0.0 {
                    self.cloud_ori.push(surf_flat[i]);
                    self.coeff_sel
                        .push(Point::with_intensity(s * pa, s * pb, s * pc, s * pd2));
                }
            }
        }
    }
}

#[inline]
fn sq_dist(a: &Point, b: &Point) -> f32 {
    (a.x - b.x) * (a.x - b.x) + (a.y - b.y) * (a.y - b.y) + (a.z - b.z) * (a.z - b.z)
}
