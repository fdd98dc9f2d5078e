use std::collections::BTreeMap;

use super::internal::UpperNode;
use super::iter::{ValueFilter, ValueMut};
use super::leaf::LeafNode;
use super::node::{Node, Slot, aligned_blocks};
use crate::math::{Coord, CoordBBox};
use crate::value::GridValue;

pub(crate) type RootSlot<T> = Slot<UpperNode<T>, T>;

/// Sparse ordered table of 4096³ regions plus the background value.
#[derive(Clone, Debug)]
pub struct RootNode<T> {
    background: T,
    table: BTreeMap<Coord, RootSlot<T>>,
}

impl<T: GridValue> RootNode<T> {
    pub const TILE_LOG2: u32 = <UpperNode<T> as Node<T>>::TOTAL;
    pub const TILE_DIM: i32 = 1 << Self::TILE_LOG2;
    pub const LEVEL: usize = <UpperNode<T> as Node<T>>::LEVEL + 1;

    pub fn new(background: T) -> Self {
        Self {
            background,
            table: BTreeMap::new(),
        }
    }
    #[inline]
    pub fn key(xyz: Coord) -> Coord {
        xyz.aligned(Self::TILE_LOG2)
    }
    pub fn background(&self) -> T {
        self.background
    }
    pub(crate) fn set_background(&mut self, background: T) {
        self.background = background;
    }
    pub fn table(&self) -> &BTreeMap<Coord, RootSlot<T>> {
        &self.table
    }
    pub(crate) fn table_mut(&mut self) -> &mut BTreeMap<Coord, RootSlot<T>> {
        &mut self.table
    }
    pub fn clear(&mut self) {
        self.table.clear();
    }
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn is_background_tile(&self, value: T, active: bool) -> bool {
        !active && value == self.background
    }
    fn child_or_insert(&mut self, key: Coord) -> &mut UpperNode<T> {
        let background = self.background;
        self.table
            .entry(key)
            .or_insert(Slot::Tile {
                value: background,
                active: false,
            })
            .child_or_split(key)
    }
    /// True when writing `(value, active)` at `xyz` would leave the tree unchanged.
    fn write_is_noop(&self, xyz: Coord, value: Option<T>, active: Option<bool>) -> bool {
        let (v, a) = match self.table.get(&Self::key(xyz)) {
            None => (self.background, false),
            Some(Slot::Tile { value, active }) => (*value, *active),
            Some(Slot::Child(_)) => return false,
        };
        value.is_none_or(|value| value == v) && active.is_none_or(|active| active == a)
    }

    pub fn probe_value(&self, xyz: Coord) -> (T, bool) {
        match self.table.get(&Self::key(xyz)) {
            None => (self.background, false),
            Some(Slot::Tile { value, active }) => (*value, *active),
            Some(Slot::Child(c)) => c.probe_value(xyz),
        }
    }
    pub fn set_value_on(&mut self, xyz: Coord, value: T) {
        if !self.write_is_noop(xyz, Some(value), Some(true)) {
            self.child_or_insert(Self::key(xyz)).set_value_on(xyz, value);
        }
    }
    pub fn set_value_off(&mut self, xyz: Coord, value: T) {
        if !self.write_is_noop(xyz, Some(value), Some(false)) {
            self.child_or_insert(Self::key(xyz)).set_value_off(xyz, value);
        }
    }
    pub fn set_value_only(&mut self, xyz: Coord, value: T) {
        if !self.write_is_noop(xyz, Some(value), None) {
            self.child_or_insert(Self::key(xyz)).set_value_only(xyz, value);
        }
    }
    pub fn set_active_state(&mut self, xyz: Coord, on: bool) {
        if !self.write_is_noop(xyz, None, Some(on)) {
            self.child_or_insert(Self::key(xyz)).set_active_state(xyz, on);
        }
    }
    pub fn fill(&mut self, bbox: &CoordBBox, value: T, active: bool) {
        for (key, sub) in aligned_blocks(*bbox, Self::TILE_LOG2) {
            if sub == CoordBBox::create_cube(key, Self::TILE_DIM) {
                if self.is_background_tile(value, active) {
                    self.table.remove(&key);
                } else {
                    self.table.insert(key, Slot::Tile { value, active });
                }
            } else if !self.write_is_noop(key, Some(value), Some(active)) {
                self.child_or_insert(key).fill(&sub, value, active);
            }
        }
    }
    pub fn set_active_state_in(&mut self, bbox: &CoordBBox, on: bool) {
        for (key, sub) in aligned_blocks(*bbox, Self::TILE_LOG2) {
            let full = sub == CoordBBox::create_cube(key, Self::TILE_DIM);
            let background = self.background;
            match self.table.get_mut(&key) {
                Some(Slot::Tile { active, .. }) if full || *active == on => *active = on,
                None if !on => {}
                None if full => {
                    self.table.insert(
                        key,
                        Slot::Tile {
                            value: background,
                            active: true,
                        },
                    );
                }
                _ => self.child_or_insert(key).set_active_state_in(&sub, on),
            }
        }
    }

    pub fn touch_leaf(&mut self, xyz: Coord) -> &mut LeafNode<T> {
        self.child_or_insert(Self::key(xyz)).touch_leaf(xyz)
    }
    pub fn add_leaf(&mut self, leaf: LeafNode<T>) {
        let key = Self::key(leaf.origin());
        self.child_or_insert(key).add_leaf(leaf);
    }
    pub fn probe_leaf(&self, xyz: Coord) -> Option<&LeafNode<T>> {
        self.table.get(&Self::key(xyz))?.child()?.probe_leaf(xyz)
    }
    pub fn probe_leaf_mut(&mut self, xyz: Coord) -> Option<&mut LeafNode<T>> {
        self.table.get_mut(&Self::key(xyz))?.child_mut()?.probe_leaf_mut(xyz)
    }
    pub fn probe_uniform(&self, bbox: &CoordBBox) -> Option<(T, bool)> {
        let mut state = None;
        for (key, sub) in aligned_blocks(*bbox, Self::TILE_LOG2) {
            let s = match self.table.get(&key) {
                None => (self.background, false),
                Some(Slot::Tile { value, active }) => (*value, *active),
                Some(Slot::Child(c)) => c.probe_uniform(&sub)?,
            };
            match state {
                None => state = Some(s),
                Some(first) if first != s => return None,
                Some(_) => {}
            }
        }
        state
    }

    pub fn active_voxel_count(&self) -> u64 {
        let tile_volume = 1u64 << (3 * Self::TILE_LOG2);
        self.table
            .values()
            .map(|s| match s {
                Slot::Tile { active: true, .. } => tile_volume,
                Slot::Tile { .. } => 0,
                Slot::Child(c) => c.active_voxel_count(),
            })
            .sum()
    }
    pub fn leaf_count(&self) -> usize {
        self.table.values().filter_map(|s| s.child()).map(|c| c.leaf_count()).sum()
    }
    pub fn non_leaf_count(&self) -> usize {
        1 + self
            .table
            .values()
            .filter_map(|s| s.child())
            .map(|c| c.non_leaf_count())
            .sum::<usize>()
    }
    pub fn active_tile_count(&self) -> usize {
        self.table
            .values()
            .map(|s| match s {
                Slot::Tile { active, .. } => *active as usize,
                Slot::Child(c) => c.active_tile_count(),
            })
            .sum()
    }
    pub fn eval_active_bbox(&self) -> CoordBBox {
        let mut bbox = CoordBBox::empty();
        for (key, s) in &self.table {
            match s {
                Slot::Tile { active: true, .. } => {
                    bbox.expand_bbox(&CoordBBox::create_cube(*key, Self::TILE_DIM))
                }
                Slot::Tile { .. } => {}
                Slot::Child(c) => c.eval_active_bbox(&mut bbox),
            }
        }
        bbox
    }

    pub fn prune(&mut self, tolerance: &T) {
        for slot in self.table.values_mut() {
            if let Slot::Child(c) = slot {
                c.prune(tolerance);
                if let Some((value, active)) = c.constant_state(tolerance) {
                    *slot = Slot::Tile { value, active };
                }
            }
        }
        self.erase_background_tiles(tolerance);
    }
    pub fn prune_inactive_with(&mut self, tile_value: &dyn Fn(T) -> T) {
        for slot in self.table.values_mut() {
            if let Slot::Child(c) = slot {
                c.prune_inactive_with(tile_value);
                if !c.has_active() {
                    *slot = Slot::Tile {
                        value: tile_value(c.first_value()),
                        active: false,
                    };
                }
            }
        }
        let zero = T::default();
        self.erase_background_tiles(&zero);
    }
    fn erase_background_tiles(&mut self, tolerance: &T) {
        let background = self.background;
        self.table.retain(|_, s| match s {
            Slot::Tile { value, active } => *active || !value.is_approx_equal(&background, tolerance),
            Slot::Child(_) => true,
        });
    }
    pub fn voxelize_active_tiles(&mut self) {
        for (key, slot) in self.table.iter_mut() {
            if matches!(slot, Slot::Tile { active: true, .. }) {
                slot.child_or_split(*key);
            }
            if let Slot::Child(c) = slot {
                c.voxelize_active_tiles();
            }
        }
    }

    pub fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a LeafNode<T>>) {
        for c in self.table.values().filter_map(|s| s.child()) {
            c.collect_leaves(out);
        }
    }
    pub fn collect_leaves_mut<'a>(&'a mut self, out: &mut Vec<&'a mut LeafNode<T>>) {
        for c in self.table.values_mut().filter_map(|s| s.child_mut()) {
            c.collect_leaves_mut(out);
        }
    }
    pub fn visit_values_mut(&mut self, filter: ValueFilter, f: &mut dyn FnMut(&mut ValueMut<T>)) {
        for (key, slot) in self.table.iter_mut() {
            match slot {
                Slot::Tile { value, active } => {
                    if filter.accepts(*active) {
                        let mut item = ValueMut::new(*key, Self::LEVEL, Self::TILE_DIM, *value, *active);
                        f(&mut item);
                        *value = item.value();
                        *active = item.is_active();
                    }
                }
                Slot::Child(c) => c.visit_values_mut(filter, f),
            }
        }
    }
}
