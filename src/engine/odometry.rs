//! Scan-to-scan odometry engine.
//!
//! Consumes one projected scan at a time: deskews it against the IMU
//! buffer, extracts features, associates them with the previous scan's
//! feature clouds, solves for the incremental motion in two passes
//! (surfaces constrain rx/rz/ty, corners constrain ry/tx/tz), folds the
//! increment into the accumulated pose, and rotates the current features
//! into the `last` slots for the next scan.

use crate::algorithms::features::{FeatureBuckets, FeatureExtractor};
use crate::algorithms::matching::{
    accumulate_rotation, build_kdtree, plugin_imu_rotation, rpy_to_quaternion, transform_to_end,
    FeatureMatcher, TransformSolver,
};
use crate::algorithms::projection::ProjectionOutput;
use crate::config::PipelineConfig;
use crate::core::types::{LaserOdometry, Point, PointCloud, SegmentationInfo};
use crate::sensors::imu::{ImuBuffer, ImuScanState};
use kiddo::KdTree;

/// Reduced-rate bundle for the downstream mapping stage.
#[derive(Debug, Clone, Default)]
pub struct AssociationOutput {
    /// Previous-scan corner features, warped to the scan-end frame.
    pub corner_last: PointCloud,
    /// Previous-scan surface features, warped to the scan-end frame.
    pub surf_last: PointCloud,
    /// Rejected-cluster returns with the mapping-frame axis remap applied.
    pub outlier_last: PointCloud,
    /// Odometry estimate of the bundled scan.
    pub odometry: LaserOdometry,
}

/// Everything one processed scan produces.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Pose estimate; `None` for the bootstrap scan.
    pub odometry: Option<LaserOdometry>,
    /// Classified feature clouds in the scan-start frame, for
    /// visualization consumers.
    pub features: FeatureBuckets,
    /// Mapping bundle, present every `mapping_frequency_divider`-th scan.
    pub mapping: Option<AssociationOutput>,
}

/// The feature-association worker state.
///
/// All buffers are private to the owning worker; the IMU buffer is the
/// only shared object and is passed in (already locked) per scan.
pub struct ScanOdometry {
    config: PipelineConfig,
    extractor: FeatureExtractor,
    buckets: FeatureBuckets,
    matcher: FeatureMatcher,
    solver: TransformSolver,
    imu_state: ImuScanState,

    segmented_cloud: PointCloud,
    outlier_cloud: PointCloud,
    seg_info: SegmentationInfo,

    corner_last: PointCloud,
    surf_last: PointCloud,
    kdtree_corner_last: Option<KdTree<f32, 3>>,
    kdtree_surf_last: Option<KdTree<f32, 3>>,
    corner_last_num: usize,
    surf_last_num: usize,

    /// Incremental transform, previous scan end to current scan end.
    transform_cur: [f32; 6],
    /// Accumulated pose since startup.
    transform_sum: [f32; 6],

    system_inited: bool,
    cycle_count: usize,
    stamp: f64,
}

impl ScanOdometry {
    pub fn new(config: PipelineConfig) -> Self {
        let extractor = FeatureExtractor::new(config.scan.n_scan, config.feature.clone());
        let matcher = FeatureMatcher::new(config.odometry.nearest_feature_search_sq_dist);
        Self {
            config,
            extractor,
            buckets: FeatureBuckets::default(),
            matcher,
            solver: TransformSolver::new(),
            imu_state: ImuScanState::new(),
            segmented_cloud: PointCloud::new(),
            outlier_cloud: PointCloud::new(),
            seg_info: SegmentationInfo::default(),
            corner_last: PointCloud::new(),
            surf_last: PointCloud::new(),
            kdtree_corner_last: None,
            kdtree_surf_last: None,
            corner_last_num: 0,
            surf_last_num: 0,
            transform_cur: [0.0; 6],
            transform_sum: [0.0; 6],
            system_inited: false,
            cycle_count: 0,
            stamp: 0.0,
        }
    }

    /// Accumulated pose (rx, ry, rz, tx, ty, tz) in the working frame.
    pub fn transform_sum(&self) -> &[f32; 6] {
        &self.transform_sum
    }

    /// Incremental transform of the last processed scan.
    pub fn transform_cur(&self) -> &[f32; 6] {
        &self.transform_cur
    }

    /// Whether the last solve hit unobservable directions.
    pub fn is_degenerate(&self) -> bool {
        self.solver.is_degenerate()
    }

    /// Whether the bootstrap scan has been consumed.
    pub fn is_initialized(&self) -> bool {
        self.system_inited
    }

    /// Process one projected scan. The caller holds the IMU buffer lock
    /// for the duration of the call.
    pub fn process(&mut self, input: ProjectionOutput, imu: &ImuBuffer) -> ScanResult {
        self.segmented_cloud = input.segmented_cloud;
        self.outlier_cloud = input.outlier_cloud;
        self.seg_info = input.seg_info;
        self.stamp = self.seg_info.stamp;

        self.imu_state.adjust_distortion(
            &mut self.segmented_cloud,
            &self.seg_info,
            imu,
            self.config.scan.scan_period,
        );

        self.extractor
            .extract(&self.segmented_cloud, &self.seg_info, &mut self.buckets);
        let features = self.buckets.clone();

        if !self.system_inited {
            self.initialize_system();
            log::info!("odometry initialized at t={:.3}", self.stamp);
            return ScanResult {
                odometry: None,
                features,
                mapping: None,
            };
        }

        self.update_initial_guess();
        self.update_transformation();
        self.integrate_transformation();

        let odometry = self.build_odometry();
        let mapping = self.publish_clouds_last(&odometry);

        ScanResult {
            odometry: Some(odometry),
            features,
            mapping,
        }
    }

    /// First scan: no association target yet, so the feature clouds just
    /// become the targets and the pose is seeded from the IMU attitude.
    fn initialize_system(&mut self) {
        std::mem::swap(&mut self.buckets.corner_less_sharp, &mut self.corner_last);
        std::mem::swap(&mut self.buckets.surf_less_flat, &mut self.surf_last);

        self.kdtree_corner_last = Some(build_kdtree(&self.corner_last));
        self.kdtree_surf_last = Some(build_kdtree(&self.surf_last));
        self.corner_last_num = self.corner_last.len();
        self.surf_last_num = self.surf_last.len();

        self.transform_sum[0] += self.imu_state.pitch_start();
        self.transform_sum[2] += self.imu_state.roll_start();

        self.system_inited = true;
    }

    /// Seed the incremental transform from the IMU deltas of this scan.
    fn update_initial_guess(&mut self) {
        self.imu_state.commit_scan();

        let ang = self.imu_state.angular_from_start;
        if ang.x != 0.0 || ang.y != 0.0 || ang.z != 0.0 {
            self.transform_cur[0] = -ang.y;
            self.transform_cur[1] = -ang.z;
            self.transform_cur[2] = -ang.x;
        }

        let velo = self.imu_state.velo_from_start;
        if velo.x != 0.0 || velo.y != 0.0 || velo.z != 0.0 {
            self.transform_cur[3] -= velo.x * self.config.scan.scan_period;
            self.transform_cur[4] -= velo.y * self.config.scan.scan_period;
            self.transform_cur[5] -= velo.z * self.config.scan.scan_period;
        }
    }

    /// Two-pass iterative solve: surfaces first, then corners.
    fn update_transformation(&mut self) {
        if self.corner_last_num < 10 || self.surf_last_num < 100 {
            log::debug!(
                "sparse targets ({} corners, {} surfaces), skipping solve",
                self.corner_last_num,
                self.surf_last_num
            );
            return;
        }
        let (Some(kdtree_corner), Some(kdtree_surf)) =
            (self.kdtree_corner_last.as_ref(), self.kdtree_surf_last.as_ref())
        else {
            return;
        };

        for iter_count in 0..self.config.odometry.max_iterations {
            self.matcher.clear_residuals();
            self.matcher.find_surf_correspondences(
                iter_count,
                &self.buckets.surf_flat,
                &self.surf_last,
                kdtree_surf,
                &self.transform_cur,
            );

            if self.matcher.residual_count() < 10 {
                continue;
            }
            if !self.solver.solve_surf(
                &self.matcher.cloud_ori,
                &self.matcher.coeff_sel,
                &mut self.transform_cur,
                iter_count,
            ) {
                break;
            }
        }

        for iter_count in 0..self.config.odometry.max_iterations {
            self.matcher.clear_residuals();
            self.matcher.find_corner_correspondences(
                iter_count,
                &self.buckets.corner_sharp,
                &self.corner_last,
                kdtree_corner,
                &self.transform_cur,
            );

            if self.matcher.residual_count() < 10 {
                continue;
            }
            if !self.solver.solve_corner(
                &self.matcher.cloud_ori,
                &self.matcher.coeff_sel,
                &mut self.transform_cur,
                iter_count,
            ) {
                break;
            }
        }
    }

    /// Fold the per-scan increment into the accumulated pose.
    fn integrate_transformation(&mut self) {
        let ts = self.transform_sum;
        let tc = self.transform_cur;

        let (rx, ry, rz) =
            accumulate_rotation(ts[0], ts[1], ts[2], -tc[0], -tc[1], -tc[2]);

        let shift = self.imu_state.shift_from_start;
        let x1 = rz.cos() * (tc[3] - shift.x) - rz.sin() * (tc[4] - shift.y);
        let y1 = rz.sin() * (tc[3] - shift.x) + rz.cos() * (tc[4] - shift.y);
        let z1 = tc[5] - shift.z;

        let x2 = x1;
        let y2 = rx.cos() * y1 - rx.sin() * z1;
        let z2 = rx.sin() * y1 + rx.cos() * z1;

        let tx = ts[3] - (ry.cos() * x2 + ry.sin() * z2);
        let ty = ts[4] - y2;
        let tz = ts[5] - (-ry.sin() * x2 + ry.cos() * z2);

        let (rx, ry, rz) = plugin_imu_rotation(
            rx,
            ry,
            rz,
            self.imu_state.pitch_start,
            self.imu_state.yaw_start,
            self.imu_state.roll_start,
            self.imu_state.pitch_last,
            self.imu_state.yaw_last,
            self.imu_state.roll_last,
        );

        self.transform_sum = [rx, ry, rz, tx, ty, tz];
    }

    /// Pose + axis-swapped quaternion for downstream consumers.
    fn build_odometry(&self) -> LaserOdometry {
        let ts = &self.transform_sum;
        let q = rpy_to_quaternion(ts[2], -ts[0], -ts[1]);
        LaserOdometry {
            stamp: self.stamp,
            position: [ts[3], ts[4], ts[5]],
            orientation: [-q[1], -q[2], q[0], q[3]],
        }
    }

    /// Rotate the current features into the scan-end frame, promote them
    /// to association targets, and emit the reduced-rate mapping bundle.
    fn publish_clouds_last(&mut self, odometry: &LaserOdometry) -> Option<AssociationOutput> {
        self.imu_state.update_start_sin_cos();

        for p in self.buckets.corner_less_sharp.points.iter_mut() {
            *p = transform_to_end(p, &self.transform_cur, &self.imu_state);
        }
        for p in self.buckets.surf_less_flat.points.iter_mut() {
            *p = transform_to_end(p, &self.transform_cur, &self.imu_state);
        }

        std::mem::swap(&mut self.buckets.corner_less_sharp, &mut self.corner_last);
        std::mem::swap(&mut self.buckets.surf_less_flat, &mut self.surf_last);

        self.corner_last_num = self.corner_last.len();
        self.surf_last_num = self.surf_last.len();

        if self.corner_last_num > 10 && self.surf_last_num > 100 {
            self.kdtree_corner_last = Some(build_kdtree(&self.corner_last));
            self.kdtree_surf_last = Some(build_kdtree(&self.surf_last));
        }

        self.adjust_outlier_cloud();

        self.cycle_count += 1;
        if self.cycle_count >= self.config.odometry.mapping_frequency_divider {
            self.cycle_count = 0;
            Some(AssociationOutput {
                corner_last: self.corner_last.clone(),
                surf_last: self.surf_last.clone(),
                outlier_last: self.outlier_cloud.clone(),
                odometry: *odometry,
            })
        } else {
            None
        }
    }

    /// Remap the outlier cloud into the mapping stage's frame convention.
    fn adjust_outlier_cloud(&mut self) {
        for p in self.outlier_cloud.points.iter_mut() {
            *p = Point {
                x: p.y,
                y: p.z,
                z: p.x,
                intensity: p.intensity,
            };
        }
    }
}
