use std::fmt::Debug;

use super::iter::{ValueFilter, ValueMut};
use super::leaf::LeafNode;
use crate::math::{Coord, CoordBBox};
use crate::value::GridValue;

/// One entry of an internal node or of the root table.
///
/// A slot is either a constant tile covering the whole child region or an owned child.
#[derive(Clone, Debug)]
pub enum Slot<C, T> {
    Tile { value: T, active: bool },
    Child(Box<C>),
}

impl<C, T: Copy> Slot<C, T> {
    pub fn is_child(&self) -> bool {
        matches!(self, Slot::Child(_))
    }
    pub fn tile(&self) -> Option<(T, bool)> {
        match self {
            Slot::Tile { value, active } => Some((*value, *active)),
            Slot::Child(_) => None,
        }
    }
    pub fn child(&self) -> Option<&C> {
        match self {
            Slot::Child(c) => Some(&**c),
            Slot::Tile { .. } => None,
        }
    }
    pub fn child_mut(&mut self) -> Option<&mut C> {
        match self {
            Slot::Child(c) => Some(&mut **c),
            Slot::Tile { .. } => None,
        }
    }
}

impl<C: Node<T>, T: GridValue> Slot<C, T> {
    /// Returns the child, first replacing a tile with a child filled with the tile's value and state.
    pub(crate) fn child_or_split(&mut self, origin: Coord) -> &mut C {
        if let Slot::Tile { value, active } = *self {
            *self = Slot::Child(Box::new(C::new_filled(origin, value, active)));
        }
        match self {
            Slot::Child(c) => &mut **c,
            Slot::Tile { .. } => unreachable!("tile was replaced by a child"),
        }
    }
}

/// Behaviour shared by leaves and internal nodes, used to recurse through the fixed hierarchy.
pub trait Node<T: GridValue>: Clone + Debug + Send + Sync + Sized {
    /// Log2 of the number of slots (or voxels) per axis in this node.
    const LOG2DIM: u32;
    /// Log2 of the number of voxels per axis this node covers.
    const TOTAL: u32;
    /// 0 for leaves, increasing toward the root.
    const LEVEL: usize;
    const DIM: i32 = 1 << Self::TOTAL;

    fn new_filled(origin: Coord, value: T, active: bool) -> Self;
    fn origin(&self) -> Coord;
    fn bbox(&self) -> CoordBBox {
        CoordBBox::create_cube(self.origin(), Self::DIM)
    }

    fn value(&self, xyz: Coord) -> T {
        self.probe_value(xyz).0
    }
    fn probe_value(&self, xyz: Coord) -> (T, bool);
    fn set_value_on(&mut self, xyz: Coord, value: T);
    fn set_value_off(&mut self, xyz: Coord, value: T);
    fn set_value_only(&mut self, xyz: Coord, value: T);
    fn set_active_state(&mut self, xyz: Coord, on: bool);
    fn fill(&mut self, bbox: &CoordBBox, value: T, active: bool);
    fn set_active_state_in(&mut self, bbox: &CoordBBox, on: bool);

    fn touch_leaf(&mut self, xyz: Coord) -> &mut LeafNode<T>;
    fn add_leaf(&mut self, leaf: LeafNode<T>);
    fn probe_leaf(&self, xyz: Coord) -> Option<&LeafNode<T>>;
    fn probe_leaf_mut(&mut self, xyz: Coord) -> Option<&mut LeafNode<T>>;
    /// Value and state shared by every voxel of `bbox`, if they are all the same.
    fn probe_uniform(&self, bbox: &CoordBBox) -> Option<(T, bool)>;
    fn first_value(&self) -> T;

    fn active_voxel_count(&self) -> u64;
    fn leaf_count(&self) -> usize;
    fn non_leaf_count(&self) -> usize;
    fn active_tile_count(&self) -> usize;
    fn has_active(&self) -> bool;
    fn eval_active_bbox(&self, bbox: &mut CoordBBox);

    /// Some((value, state)) when the node could be replaced by a single tile.
    fn constant_state(&self, tolerance: &T) -> Option<(T, bool)>;
    fn prune(&mut self, tolerance: &T);
    /// Replaces children without active values by inactive tiles whose value is
    /// `tile_value(child.first_value())`.
    fn prune_inactive_with(&mut self, tile_value: &dyn Fn(T) -> T);
    fn voxelize_active_tiles(&mut self);

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a LeafNode<T>>);
    fn collect_leaves_mut<'a>(&'a mut self, out: &mut Vec<&'a mut LeafNode<T>>);
    fn visit_values_mut(&mut self, filter: ValueFilter, f: &mut dyn FnMut(&mut ValueMut<T>));
}

/// Aligned blocks of side `1 << log2` overlapping `bbox`, each with its clipped sub-box.
pub(crate) fn aligned_blocks(clip: CoordBBox, log2: u32) -> impl Iterator<Item = (Coord, CoordBBox)> {
    let blocks = if clip.is_empty() {
        CoordBBox::empty()
    } else {
        CoordBBox::new(
            Coord::new(clip.min.x >> log2, clip.min.y >> log2, clip.min.z >> log2),
            Coord::new(clip.max.x >> log2, clip.max.y >> log2, clip.max.z >> log2),
        )
    };
    blocks.iter().map(move |b| {
        let origin = Coord::new(b.x << log2, b.y << log2, b.z << log2);
        (origin, clip.intersection(&CoordBBox::create_cube(origin, 1 << log2)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_blocks_cover_the_box_once() {
        let b = CoordBBox::new(Coord::new(-3, 0, 5), Coord::new(9, 7, 17));
        let blocks: Vec<_> = aligned_blocks(b, 3).collect();
        assert_eq!(blocks.len(), 3 * 3);
        assert_eq!(blocks.iter().map(|(_, s)| s.volume()).sum::<u64>(), b.volume());
        assert_eq!(blocks[0].0, Coord::new(-8, 0, 0));
        assert_eq!(blocks[0].1, CoordBBox::new(Coord::new(-3, 0, 5), Coord::new(-1, 7, 7)));
    }
}
