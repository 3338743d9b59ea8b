//! Scan-to-scan feature matching: frame warps, correspondence search and
//! the iterative motion solver.

mod correspondence;
mod rotations;
mod solver;

pub use correspondence::{build_kdtree, FeatureMatcher};
pub use rotations::{
    accumulate_rotation, plugin_imu_rotation, rpy_to_quaternion, transform_to_end,
    transform_to_start,
};
pub use solver::TransformSolver;
