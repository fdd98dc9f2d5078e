//! The sparse 5-4-3 volume tree.
//!
//! A [`Tree`] maps every integer coordinate to a value and an active state. Untouched
//! coordinates read as the background value, inactive. Storage is a root table of
//! 4096³ regions, two levels of [`InternalNode`]s and 8³ [`LeafNode`]s; any slot of
//! the root or an internal node may instead hold a constant tile.

mod accessor;
mod internal;
mod iter;
mod leaf;
mod leaf_manager;
mod mask;
mod node;
mod root;

use std::sync::OnceLock;

pub use accessor::{ValueAccessor, ValueAccessorMut};
pub use internal::{InternalNode, LowerNode, UpperNode};
pub use iter::{IterLevels, LeafIter, ValueFilter, ValueItem, ValueIter, ValueMut};
pub use leaf::LeafNode;
pub use leaf_manager::LeafManager;
pub use mask::{LeafMask, NodeMask};
pub use node::{Node, Slot};
pub use root::RootNode;

pub(crate) use node::aligned_blocks;

use crate::math::{Coord, CoordBBox};
use crate::value::GridValue;

#[derive(Clone, Copy, Debug)]
struct Summary {
    active_voxel_count: u64,
    active_bbox: CoordBBox,
}

#[derive(Clone, Debug)]
pub struct Tree<T> {
    root: RootNode<T>,
    summary: OnceLock<Summary>,
}

impl<T: GridValue> Default for Tree<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: GridValue> Tree<T> {
    pub fn new(background: T) -> Self {
        Self {
            root: RootNode::new(background),
            summary: OnceLock::new(),
        }
    }
    pub fn background(&self) -> T {
        self.root.background()
    }
    pub fn root(&self) -> &RootNode<T> {
        &self.root
    }
    /// Every structural or value change goes through here so cached counts are dropped.
    pub(crate) fn root_mut(&mut self) -> &mut RootNode<T> {
        self.summary.take();
        &mut self.root
    }
    pub(crate) fn set_background(&mut self, background: T) {
        self.root_mut().set_background(background);
    }

    pub fn clear(&mut self) {
        self.root_mut().clear();
    }
    /// True when no coordinate has been written (only the root exists).
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn value(&self, xyz: Coord) -> T {
        self.root.probe_value(xyz).0
    }
    pub fn is_value_on(&self, xyz: Coord) -> bool {
        self.root.probe_value(xyz).1
    }
    pub fn probe_value(&self, xyz: Coord) -> (T, bool) {
        self.root.probe_value(xyz)
    }
    /// Sets the value and marks the voxel active.
    pub fn set_value(&mut self, xyz: Coord, value: T) {
        self.root_mut().set_value_on(xyz, value);
    }
    pub fn set_value_off(&mut self, xyz: Coord, value: T) {
        self.root_mut().set_value_off(xyz, value);
    }
    /// Sets the value, keeping the active state.
    pub fn set_value_only(&mut self, xyz: Coord, value: T) {
        self.root_mut().set_value_only(xyz, value);
    }
    /// Changes the active state, keeping the value. Activating a voxel inside an
    /// active tile does nothing.
    pub fn set_active_state(&mut self, xyz: Coord, on: bool) {
        self.root_mut().set_active_state(xyz, on);
    }
    /// Overwrites every voxel of `bbox`, using tiles wherever a node region is fully covered.
    pub fn fill(&mut self, bbox: &CoordBBox, value: T, active: bool) {
        if !bbox.is_empty() {
            self.root_mut().fill(bbox, value, active);
        }
    }
    pub fn set_active_state_in(&mut self, bbox: &CoordBBox, on: bool) {
        if !bbox.is_empty() {
            self.root_mut().set_active_state_in(bbox, on);
        }
    }

    /// The leaf containing `xyz`, allocating the path (and splitting tiles) as needed.
    pub fn touch_leaf(&mut self, xyz: Coord) -> &mut LeafNode<T> {
        self.root_mut().touch_leaf(xyz)
    }
    /// Inserts `leaf`, replacing whatever covered its region.
    pub fn add_leaf(&mut self, leaf: LeafNode<T>) {
        self.root_mut().add_leaf(leaf);
    }
    pub fn probe_leaf(&self, xyz: Coord) -> Option<&LeafNode<T>> {
        self.root.probe_leaf(xyz)
    }
    pub fn probe_leaf_mut(&mut self, xyz: Coord) -> Option<&mut LeafNode<T>> {
        self.root_mut().probe_leaf_mut(xyz)
    }
    /// Value and state shared by all of `bbox`, or `None` if they differ anywhere.
    pub fn probe_uniform(&self, bbox: &CoordBBox) -> Option<(T, bool)> {
        self.root.probe_uniform(bbox)
    }

    pub fn leaf_count(&self) -> usize {
        self.root.leaf_count()
    }
    /// The root plus every internal node.
    pub fn non_leaf_count(&self) -> usize {
        self.root.non_leaf_count()
    }
    pub fn active_tile_count(&self) -> usize {
        self.root.active_tile_count()
    }
    pub fn has_active_tiles(&self) -> bool {
        self.active_tile_count() > 0
    }
    pub fn active_voxel_count(&self) -> u64 {
        self.summary().active_voxel_count
    }
    pub fn active_leaf_voxel_count(&self) -> u64 {
        self.leaves().map(|l| l.on_voxel_count()).sum()
    }
    /// Bounding box of all active voxels and tiles; empty when nothing is active.
    pub fn eval_active_voxel_bbox(&self) -> CoordBBox {
        self.summary().active_bbox
    }
    pub fn eval_leaf_bbox(&self) -> CoordBBox {
        let mut bbox = CoordBBox::empty();
        for leaf in self.leaves() {
            bbox.expand_bbox(&leaf.bbox());
        }
        bbox
    }
    fn summary(&self) -> &Summary {
        self.summary.get_or_init(|| Summary {
            active_voxel_count: self.root.active_voxel_count(),
            active_bbox: self.root.eval_active_bbox(),
        })
    }

    /// Collapses nodes whose values are all within `tolerance` of each other and share
    /// one active state, and drops inactive background tiles from the root.
    pub fn prune(&mut self, tolerance: T) {
        let before = self.leaf_count();
        self.root_mut().prune(&tolerance);
        tracing::trace!(before, after = self.leaf_count(), "pruned leaves");
    }
    /// Replaces every node without active values by an inactive background tile.
    pub fn prune_inactive(&mut self) {
        let background = self.background();
        self.root_mut().prune_inactive_with(&|_| background);
    }
    pub(crate) fn prune_inactive_with(&mut self, tile_value: &dyn Fn(T) -> T) {
        self.root_mut().prune_inactive_with(tile_value);
    }
    /// Converts every active tile into explicit leaf voxels.
    pub fn voxelize_active_tiles(&mut self) {
        self.root_mut().voxelize_active_tiles();
    }

    pub fn accessor(&self) -> ValueAccessor<'_, T> {
        ValueAccessor::new(self)
    }
    pub fn accessor_mut(&mut self) -> ValueAccessorMut<'_, T> {
        ValueAccessorMut::new(self)
    }
    pub fn leaf_manager(&mut self) -> LeafManager<'_, T> {
        LeafManager::new(self)
    }
    pub(crate) fn leaves_mut(&mut self) -> Vec<&mut LeafNode<T>> {
        let mut out = Vec::new();
        self.root_mut().collect_leaves_mut(&mut out);
        out
    }

    /// Visits every voxel and tile passing `filter`, writing back whatever the visitor
    /// changes. Tiles are visited as a whole.
    pub fn for_each_value_mut(&mut self, filter: ValueFilter, mut f: impl FnMut(&mut ValueMut<T>)) {
        self.root_mut().visit_values_mut(filter, &mut f);
    }

    /// Activates every voxel that is active in `other`, keeping this tree's values.
    pub fn topology_union<U: GridValue>(&mut self, other: &Tree<U>) {
        for item in other.iter_values_on() {
            if item.is_voxel_value() {
                self.set_active_state(item.coord(), true);
            } else {
                self.set_active_state_in(&item.bounding_box(), true);
            }
        }
    }
    /// Deactivates every voxel that is inactive in `other`.
    pub fn topology_intersection<U: GridValue>(&mut self, other: &Tree<U>) {
        let mut off = Vec::new();
        for item in self.iter_values_on() {
            let bbox = item.bounding_box();
            if item.is_voxel_value() {
                if !other.is_value_on(item.coord()) {
                    off.push(bbox);
                }
                continue;
            }
            match other.probe_uniform(&bbox) {
                Some((_, true)) => {}
                Some((_, false)) => off.push(bbox),
                None => off.extend(
                    bbox.iter()
                        .filter(|xyz| !other.is_value_on(*xyz))
                        .map(CoordBBox::from_coord),
                ),
            }
        }
        for bbox in off {
            self.set_active_state_in(&bbox, false);
        }
    }
    /// Deactivates every voxel that is active in `other`, keeping this tree's values.
    pub fn topology_difference<U: GridValue>(&mut self, other: &Tree<U>) {
        for item in other.iter_values_on() {
            if item.is_voxel_value() {
                self.set_active_state(item.coord(), false);
            } else {
                self.set_active_state_in(&item.bounding_box(), false);
            }
        }
    }
}
