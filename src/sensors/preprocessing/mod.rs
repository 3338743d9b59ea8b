//! Point-cloud filters applied between pipeline stages.

mod voxel_filter;

pub use voxel_filter::VoxelGridFilter;
