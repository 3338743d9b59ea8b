//! BFS cluster labeling on the range image.

use crate::config::ScanConfig;
use std::collections::VecDeque;

/// Label value for clusters rejected as too small.
pub const OUTLIER_LABEL: i32 = 999_999;

/// 4-connected neighborhood; columns wrap, rows do not.
const NEIGHBORS: [(i32, i32); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

/// Region-growing labeler with reusable scratch buffers.
///
/// Grows a cluster from a seed cell by the geometric angle test: for two
/// adjacent returns at ranges `d1 >= d2` separated by the beam step angle
/// `alpha`, the surface angle seen from the sensor satisfies
/// `tan(theta) = d2 * sin(alpha) / (d1 - d2 * cos(alpha))`; the neighbor
/// joins the cluster when `theta` exceeds the configured threshold.
#[derive(Debug, Default)]
pub(crate) struct ClusterLabeler {
    queue: VecDeque<(i32, i32)>,
    all_pushed: Vec<(i32, i32)>,
    line_count_flag: Vec<bool>,
}

impl ClusterLabeler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Grow and validate one cluster seeded at `(row, col)`.
    ///
    /// Accepted clusters keep the id assigned from `label_count`, which is
    /// then advanced; rejected clusters are overwritten with
    /// [`OUTLIER_LABEL`].
    pub(crate) fn label_component(
        &mut self,
        cfg: &ScanConfig,
        range_mat: &[f32],
        label_mat: &mut [i32],
        label_count: &mut i32,
        row: usize,
        col: usize,
    ) {
        let n_scan = cfg.n_scan as i32;
        let h_scan = cfg.horizontal_scan as i32;
        let theta_threshold = cfg.segment_theta.tan();

        self.queue.clear();
        self.all_pushed.clear();
        self.line_count_flag.clear();
        self.line_count_flag.resize(cfg.n_scan, false);

        self.queue.push_back((row as i32, col as i32));
        self.all_pushed.push((row as i32, col as i32));

        while let Some((from_x, from_y)) = self.queue.pop_front() {
            let from_idx = (from_y + from_x * h_scan) as usize;
            label_mat[from_idx] = *label_count;

            for (dx, dy) in NEIGHBORS {
                let this_x = from_x + dx;
                let mut this_y = from_y + dy;

                if this_x < 0 || this_x >= n_scan {
                    continue;
                }
                if this_y < 0 {
                    this_y = h_scan - 1;
                }
                if this_y >= h_scan {
                    this_y = 0;
                }

                let this_idx = (this_y + this_x * h_scan) as usize;
                if label_mat[this_idx] != 0 {
                    continue;
                }

                let d1 = range_mat[from_idx].max(range_mat[this_idx]);
                let d2 = range_mat[from_idx].min(range_mat[this_idx]);

                let alpha = if dx == 0 {
                    cfg.segment_alpha_x
                } else {
                    cfg.segment_alpha_y
                };
                let tang = d2 * alpha.sin() / (d1 - d2 * alpha.cos());

                if tang > theta_threshold {
                    self.queue.push_back((this_x, this_y));
                    label_mat[this_idx] = *label_count;
                    self.line_count_flag[this_x as usize] = true;
                    self.all_pushed.push((this_x, this_y));
                }
            }
        }

        let mut feasible = self.all_pushed.len() >= 30;
        if !feasible && self.all_pushed.len() >= cfg.segment_valid_point_num {
            let line_count = self.line_count_flag.iter().filter(|&&f| f).count();
            if line_count >= cfg.segment_valid_line_num {
                feasible = true;
            }
        }

        if feasible {
            *label_count += 1;
        } else {
            for &(x, y) in &self.all_pushed {
                label_mat[(y + x * h_scan) as usize] = OUTLIER_LABEL;
            }
        }
    }
}
