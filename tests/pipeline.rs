//! End-to-end scenarios against a synthetic box-room world.

mod common;

use common::{BoxWorld, SensorPose};
use lidar_odom::{
    ImuSample, OdometryPipeline, PipelineConfig, Point, PointCloud, ProjectionOutput, RawScan,
    ScanOdometry, ScanProjector, SegmentationInfo,
};
use std::f32::consts::PI;
use std::time::Duration;

const GRAVITY: f32 = 9.81;

fn empty_imu() -> lidar_odom::ImuBuffer {
    lidar_odom::ImuBuffer::new(200, 0.1)
}

/// Run scans through projection + odometry single-threaded.
fn run_scans(
    world: &BoxWorld,
    poses: impl Fn(usize, f32) -> SensorPose,
    scan_count: usize,
    imu: &lidar_odom::ImuBuffer,
) -> (ScanOdometry, Vec<[f32; 6]>) {
    let config = PipelineConfig::default();
    let mut projector = ScanProjector::new(config.scan.clone());
    let mut engine = ScanOdometry::new(config.clone());
    let mut sums = Vec::new();

    for k in 0..scan_count {
        let cloud = world.scan(&config.scan, |tau| poses(k, tau));
        let projected = projector.process(k as f64 * 0.1, &cloud);
        engine.process(projected, imu);
        sums.push(*engine.transform_sum());
    }
    (engine, sums)
}

#[test]
fn static_scene_holds_pose() {
    let world = BoxWorld::default();
    let imu = empty_imu();
    let (_, sums) = run_scans(&world, |_, _| SensorPose::default(), 10, &imu);

    for (k, sum) in sums.iter().enumerate().skip(1) {
        for (i, v) in sum.iter().enumerate() {
            assert!(
                v.abs() < 1e-3,
                "scan {}: transform_sum[{}] = {} drifted on a static scene",
                k,
                i,
                v
            );
        }
    }
}

// The synthetic scans below are rigid snapshots, while the motion model
// spreads the incremental transform over each revolution by per-point
// time. The estimated magnitude therefore lands in a band around the true
// motion rather than exactly on it; the assertions check that the motion
// appears on the right axis, with the right sign discipline, and at a
// magnitude in that band.

#[test]
fn pure_yaw_is_tracked() {
    let world = BoxWorld::default();
    let imu = empty_imu();
    let rate = 2.0_f32.to_radians(); // per scan period

    // scan 0 is the static bootstrap; rotation starts with scan 1
    let poses = |k: usize, _tau: f32| SensorPose {
        position: [0.0; 3],
        yaw: rate * ((k as f32) - 1.0).max(0.0),
    };
    let (_, sums) = run_scans(&world, poses, 11, &imu);

    let total = sums[10][1];
    let expected = rate * 9.0;
    assert!(
        total.abs() > 0.4 * expected && total.abs() < 1.7 * expected,
        "cumulative yaw {} out of band around {}",
        total,
        expected
    );

    // yaw accumulates in one consistent direction
    for k in 3..=10 {
        assert!(
            sums[k][1].abs() >= sums[k - 1][1].abs() - 1e-3,
            "yaw magnitude regressed at scan {}",
            k
        );
        assert!(
            sums[k][1].signum() == sums[10][1].signum(),
            "yaw sign flipped at scan {}",
            k
        );
    }

    // the motion stays on the yaw axis
    assert!(
        sums[10][0].abs() < 0.1 * total.abs(),
        "pitch drift {}",
        sums[10][0]
    );
    assert!(
        sums[10][2].abs() < 0.1 * total.abs(),
        "roll drift {}",
        sums[10][2]
    );
    for i in 3..6 {
        assert!(
            sums[10][i].abs() < 0.5,
            "translation drift [{}] = {}",
            i,
            sums[10][i]
        );
    }
}

#[test]
fn pure_forward_translation_is_tracked() {
    let world = BoxWorld::default();
    let imu = empty_imu();
    let step = 0.5_f32; // meters per scan along lidar x (camera z)

    let poses = |k: usize, _tau: f32| SensorPose {
        position: [step * ((k as f32) - 1.0).max(0.0), 0.0, 0.0],
        yaw: 0.0,
    };
    let (_, sums) = run_scans(&world, poses, 8, &imu);

    let total = sums[7][5];
    let expected = step * 6.0;
    assert!(
        total.abs() > 0.4 * expected && total.abs() < 1.7 * expected,
        "cumulative forward motion {} out of band around {}",
        total,
        expected
    );

    // forward motion accumulates consistently
    for k in 3..=7 {
        assert!(
            sums[k][5].abs() >= sums[k - 1][5].abs() - 1e-2,
            "forward motion regressed at scan {}",
            k
        );
    }

    // the motion stays on the forward axis
    assert!(
        sums[7][3].abs() < 0.25 * total.abs(),
        "lateral drift {}",
        sums[7][3]
    );
    assert!(
        sums[7][4].abs() < 0.25 * total.abs(),
        "vertical drift {}",
        sums[7][4]
    );
    assert!(
        sums[7][0].abs() < 0.05 && sums[7][1].abs() < 0.05 && sums[7][2].abs() < 0.05,
        "rotation drift on pure translation"
    );
}

#[test]
fn ground_only_scan_skips_solve_but_publishes() {
    let world = BoxWorld::ground_only();
    let config = PipelineConfig::default();
    let mut projector = ScanProjector::new(config.scan.clone());
    let mut engine = ScanOdometry::new(config);
    let imu = empty_imu();

    let cloud = world.scan_static(&PipelineConfig::default().scan, SensorPose::default());

    let projected = projector.process(0.0, &cloud);
    let boot = engine.process(projected, &imu);
    assert!(boot.odometry.is_none());

    let projected = projector.process(0.1, &cloud);
    let result = engine.process(projected, &imu);

    // with no vertical structure there are too few corner targets, the
    // solve is skipped, and the pose is held at identity
    let odom = result.odometry.expect("estimate still published");
    for v in odom.position {
        assert!(v.abs() < 1e-4, "pose moved without a solve: {}", v);
    }
    assert!(!engine.is_degenerate());
}

/// Hand-built scan: flat ground plus corner features that all hug one
/// vertical line, so the corner system has unobservable directions.
fn edge_and_ground_projection(stamp: f64) -> ProjectionOutput {
    let mut seg = SegmentationInfo::with_rings(16);
    seg.stamp = stamp;
    let mut cloud = PointCloud::new();
    let mut size: i32 = 0;

    // Deskew re-derives each point's relative time from its azimuth, so
    // the fixture keeps all azimuths in a narrow band just after the
    // first point's: ring tags survive the retagging untouched.

    // three ground rings on the floor plane (camera y = -0.8), in the
    // positive quadrant and spread wider than the voxel leaf so the
    // surface target stays above 100 points
    for r in 0..3usize {
        seg.start_ring_index[r] = size - 1 + 5;
        for i in 0..48usize {
            let x_cam = 4.0 - (i % 8) as f32 * 0.5;
            let z_cam = 0.5 + (i / 8) as f32 * 0.5 + r as f32 * 0.23;
            // lidar frame: (x, y, z) = (z_cam, x_cam, y_cam)
            cloud.push(Point::with_intensity(
                z_cam,
                x_cam,
                -0.8,
                r as f32 + i as f32 / 10000.0,
            ));
            seg.push_point(true, i as i32, 5.0);
            size += 1;
        }
        seg.end_ring_index[r] = size - 1 - 5;
    }

    // thirteen corner rings: a gentle range wedge puts one strong corner
    // per ring, and every point sits on the same vertical line in space
    for r in 3..16usize {
        seg.start_ring_index[r] = size - 1 + 5;
        for i in 0..31usize {
            let dist = (i as i32 - 15).unsigned_abs().min(10) as f32;
            let range = 5.0 + 0.05 * dist;
            let y_cam = 0.25 * (r as f32 - 3.0) + 0.005 * i as f32;
            // lidar frame position of camera-frame (1.0, y_cam, ~1.0)
            cloud.push(Point::with_intensity(
                1.0 + 0.001 * i as f32,
                1.0,
                y_cam,
                r as f32 + i as f32 / 10000.0,
            ));
            seg.push_point(false, i as i32, range);
            size += 1;
        }
        seg.end_ring_index[r] = size - 1 - 5;
    }

    let first = cloud[0];
    seg.start_orientation = -f32::atan2(first.y, first.x);
    seg.end_orientation = seg.start_orientation + 2.0 * PI;
    seg.orientation_diff = 2.0 * PI;

    ProjectionOutput {
        segmented_cloud: cloud,
        outlier_cloud: PointCloud::new(),
        seg_info: seg,
    }
}

#[test]
fn collinear_corners_flag_degeneracy() {
    let mut engine = ScanOdometry::new(PipelineConfig::default());
    let imu = empty_imu();

    engine.process(edge_and_ground_projection(0.0), &imu);
    let result = engine.process(edge_and_ground_projection(0.1), &imu);

    assert!(result.odometry.is_some());
    assert!(
        engine.is_degenerate(),
        "a single edge line cannot observe all corner-pass directions"
    );
    // the projected update must not have moved the pose off identity
    for &v in engine.transform_sum() {
        assert!(v.abs() < 0.05, "degenerate solve moved the pose: {}", v);
    }
}

#[test]
fn imu_dropout_still_produces_estimates() {
    let world = BoxWorld::default();
    let config = PipelineConfig::default();
    let mut projector = ScanProjector::new(config.scan.clone());
    let mut engine = ScanOdometry::new(config.clone());

    let mut imu = lidar_odom::ImuBuffer::new(config.imu.queue_length, config.scan.scan_period);
    let stationary = |stamp: f64| ImuSample {
        stamp,
        orientation: [0.0, 0.0, 0.0, 1.0],
        linear_acceleration: [0.0, 0.0, GRAVITY],
        angular_velocity: [0.0, 0.0, 0.0],
    };

    // coverage before and after a dropout spanning scan 3
    let mut t = 99.95;
    while t < 100.25 {
        imu.push(&stationary(t));
        t += 0.005;
    }
    let mut t = 100.45;
    while t < 100.65 {
        imu.push(&stationary(t));
        t += 0.005;
    }

    let cloud = world.scan_static(&config.scan, SensorPose::default());
    for k in 0..6 {
        let projected = projector.process(100.0 + k as f64 * 0.1, &cloud);
        let result = engine.process(projected, &imu);
        if k > 0 {
            let odom = result.odometry.expect("every post-bootstrap scan publishes");
            for v in odom.position {
                assert!(v.is_finite());
                assert!(v.abs() < 0.05, "static pose drifted through dropout: {}", v);
            }
        }
    }
}

#[test]
fn threaded_pipeline_end_to_end() {
    let world = BoxWorld::default();
    let config = PipelineConfig::default();
    let scan_config = config.scan.clone();
    let divider = config.odometry.mapping_frequency_divider;

    let pipeline = OdometryPipeline::spawn(config);
    let cloud = world.scan_static(&scan_config, SensorPose::default());

    let scans = 6usize;
    for k in 0..scans {
        pipeline
            .submit_scan(RawScan {
                stamp: k as f64 * 0.1,
                points: cloud.clone(),
            })
            .expect("pipeline accepts scans");
    }

    // bootstrap scan publishes nothing; every later scan publishes one
    let mut estimates = Vec::new();
    for _ in 0..scans - 1 {
        let odom = pipeline
            .odometry_output()
            .recv_timeout(Duration::from_secs(30))
            .expect("odometry estimate");
        estimates.push(odom);
    }
    for odom in &estimates {
        for v in odom.position {
            assert!(v.abs() < 0.01, "static scene pose moved: {}", v);
        }
    }

    // mapping bundles arrive at the divided rate
    let expected_bundles = (scans - 1) / divider;
    for _ in 0..expected_bundles {
        let bundle = pipeline
            .mapping_output()
            .recv_timeout(Duration::from_secs(30))
            .expect("mapping bundle");
        assert!(!bundle.corner_last.is_empty());
        assert!(!bundle.surf_last.is_empty());
    }

    pipeline.shutdown();
}
