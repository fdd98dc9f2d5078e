//! Sparse hierarchical volume grids.
//!
//! A [`Tree`] stores a value and an active flag for every integer coordinate, keeping
//! only what differs from the background and collapsing constant regions into tiles.
//! The [`tools`] module holds the operators built on top of it: morphology, sampling,
//! level-set utilities, segmentation, CSG and dense/sparse compositing.

pub mod archive;
pub mod error;
pub mod grid;
pub mod math;
pub mod parallel;
pub mod tools;
pub mod tree;
pub mod value;

pub use error::{Error, Result};
pub use grid::{Grid, GridClass};
pub use math::{Coord, CoordBBox, Transform};
pub use parallel::{CancelToken, Completion};
pub use tree::{LeafNode, Tree, ValueAccessor, ValueAccessorMut, ValueFilter};
pub use value::{GridValue, Interpolant, RealValue};

pub type FloatTree = Tree<f32>;
pub type BoolTree = Tree<bool>;
pub type FloatGrid = Grid<f32>;
pub type Vec3Grid = Grid<glam::Vec3>;
