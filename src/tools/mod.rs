//! Operators built on [`Tree`](crate::tree::Tree) and [`Grid`](crate::grid::Grid).

pub mod composite;
pub mod dense;
pub mod dense_sparse;
pub mod diagnostics;
pub mod filter;
pub mod interpolation;
pub mod level_set;
pub mod morphology;
pub mod segment;
pub mod statistics;
pub mod values;

pub use composite::{comp_max, comp_min, comp_sum, csg_difference, csg_intersection, csg_union};
pub use dense::{Dense, DenseLayout, LayoutXyz, LayoutZyx, copy_from_dense, copy_to_dense};
pub use dense_sparse::{
    CompositeOp, SparseToDenseCompositor, composite_to_dense, extract_sparse_tree,
    extract_sparse_tree_with_mask, transform_dense,
};
pub use diagnostics::{
    CheckFinite, CheckInf, CheckMax, CheckMin, CheckNan, CheckRange, Diagnose, ValueCheck,
    check_fog_volume, check_level_set, unique_inactive_values,
};
pub use filter::{Filter, FilterConfig};
pub use interpolation::{BoxSampler, GridSampler, PointSampler, QuadraticSampler, Sampler, ValueSource};
pub use level_set::{
    LEVEL_SET_HALF_WIDTH, create_level_set_box, create_level_set_sphere, euler_characteristic,
    extract_enclosed_region, genus, interior_mask, prune_level_set, sdf_interior_mask, sdf_to_fog_volume,
};
pub use morphology::{
    Connectivity, MorphologyConfig, TilePolicy, dilate_active_values, dilate_voxels,
    erode_active_values, erode_voxels,
};
pub use segment::{segment_active_voxels, segment_sdf};
pub use statistics::{Extrema, Stats, extrema, statistics};
pub use values::{activate, change_background, deactivate};
