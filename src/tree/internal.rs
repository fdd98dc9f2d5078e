use super::iter::{ValueFilter, ValueMut};
use super::leaf::LeafNode;
use super::node::{Node, Slot, aligned_blocks};
use crate::math::{Coord, CoordBBox};
use crate::value::GridValue;

/// Interior node with `(1 << LOG2DIM)³` slots, each a tile or an owned child of type `C`.
#[derive(Clone, Debug)]
pub struct InternalNode<T, C, const LOG2DIM: u32> {
    origin: Coord,
    slots: Box<[Slot<C, T>]>,
}

/// 16³ slots of leaves, covering 128³ voxels.
pub type LowerNode<T> = InternalNode<T, LeafNode<T>, 4>;
/// 32³ slots of lower nodes, covering 4096³ voxels.
pub type UpperNode<T> = InternalNode<T, LowerNode<T>, 5>;

impl<T: GridValue, C: Node<T>, const LOG2DIM: u32> InternalNode<T, C, LOG2DIM> {
    pub const NUM_SLOTS: usize = 1 << (3 * LOG2DIM);
    pub const CHILD_DIM: i32 = 1 << C::TOTAL;
    const CHILD_VOLUME: u64 = 1 << (3 * C::TOTAL);

    #[inline]
    pub fn slot_index(xyz: Coord) -> usize {
        let m = (1i32 << (LOG2DIM + C::TOTAL)) - 1;
        let c = C::TOTAL;
        ((((xyz.x & m) >> c) as usize) << (2 * LOG2DIM))
            | ((((xyz.y & m) >> c) as usize) << LOG2DIM)
            | (((xyz.z & m) >> c) as usize)
    }
    pub fn slot_origin(&self, i: usize) -> Coord {
        let m = (1usize << LOG2DIM) - 1;
        let c = C::TOTAL;
        self.origin
            + Coord::new(
                (((i >> (2 * LOG2DIM)) & m) as i32) << c,
                (((i >> LOG2DIM) & m) as i32) << c,
                ((i & m) as i32) << c,
            )
    }
    pub fn slot_bbox(&self, i: usize) -> CoordBBox {
        CoordBBox::create_cube(self.slot_origin(i), Self::CHILD_DIM)
    }
    pub fn slots(&self) -> &[Slot<C, T>] {
        &self.slots
    }
    pub fn slot(&self, i: usize) -> &Slot<C, T> {
        &self.slots[i]
    }
    pub(crate) fn slot_mut(&mut self, i: usize) -> &mut Slot<C, T> {
        &mut self.slots[i]
    }
    pub fn child_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_child()).count()
    }

    fn split(&mut self, i: usize) -> &mut C {
        let origin = self.slot_origin(i);
        self.slots[i].child_or_split(origin)
    }
    fn tile_matches(&self, i: usize, value: Option<T>, active: Option<bool>) -> bool {
        match &self.slots[i] {
            Slot::Tile { value: v, active: a } => {
                value.is_none_or(|value| *v == value) && active.is_none_or(|active| *a == active)
            }
            Slot::Child(_) => false,
        }
    }
}

impl<T: GridValue, C: Node<T>, const LOG2DIM: u32> Node<T> for InternalNode<T, C, LOG2DIM> {
    const LOG2DIM: u32 = LOG2DIM;
    const TOTAL: u32 = LOG2DIM + C::TOTAL;
    const LEVEL: usize = C::LEVEL + 1;

    fn new_filled(origin: Coord, value: T, active: bool) -> Self {
        Self {
            origin: origin.aligned(Self::TOTAL),
            slots: (0..Self::NUM_SLOTS)
                .map(|_| Slot::Tile { value, active })
                .collect(),
        }
    }
    fn origin(&self) -> Coord {
        self.origin
    }

    fn probe_value(&self, xyz: Coord) -> (T, bool) {
        match &self.slots[Self::slot_index(xyz)] {
            Slot::Tile { value, active } => (*value, *active),
            Slot::Child(c) => c.probe_value(xyz),
        }
    }
    fn set_value_on(&mut self, xyz: Coord, value: T) {
        let i = Self::slot_index(xyz);
        if !self.tile_matches(i, Some(value), Some(true)) {
            self.split(i).set_value_on(xyz, value);
        }
    }
    fn set_value_off(&mut self, xyz: Coord, value: T) {
        let i = Self::slot_index(xyz);
        if !self.tile_matches(i, Some(value), Some(false)) {
            self.split(i).set_value_off(xyz, value);
        }
    }
    fn set_value_only(&mut self, xyz: Coord, value: T) {
        let i = Self::slot_index(xyz);
        if !self.tile_matches(i, Some(value), None) {
            self.split(i).set_value_only(xyz, value);
        }
    }
    fn set_active_state(&mut self, xyz: Coord, on: bool) {
        let i = Self::slot_index(xyz);
        if !self.tile_matches(i, None, Some(on)) {
            self.split(i).set_active_state(xyz, on);
        }
    }
    fn fill(&mut self, bbox: &CoordBBox, value: T, active: bool) {
        let clip = bbox.intersection(&self.bbox());
        for (origin, sub) in aligned_blocks(clip, C::TOTAL) {
            let i = Self::slot_index(origin);
            if sub == self.slot_bbox(i) {
                self.slots[i] = Slot::Tile { value, active };
            } else if !self.tile_matches(i, Some(value), Some(active)) {
                self.split(i).fill(&sub, value, active);
            }
        }
    }
    fn set_active_state_in(&mut self, bbox: &CoordBBox, on: bool) {
        let clip = bbox.intersection(&self.bbox());
        for (origin, sub) in aligned_blocks(clip, C::TOTAL) {
            let i = Self::slot_index(origin);
            let full = sub == self.slot_bbox(i);
            if let Slot::Tile { active, .. } = &mut self.slots[i] {
                if full || *active == on {
                    *active = on;
                    continue;
                }
            }
            self.split(i).set_active_state_in(&sub, on);
        }
    }

    fn touch_leaf(&mut self, xyz: Coord) -> &mut LeafNode<T> {
        self.split(Self::slot_index(xyz)).touch_leaf(xyz)
    }
    fn add_leaf(&mut self, leaf: LeafNode<T>) {
        let xyz = leaf.origin();
        self.split(Self::slot_index(xyz)).add_leaf(leaf);
    }
    fn probe_leaf(&self, xyz: Coord) -> Option<&LeafNode<T>> {
        self.slots[Self::slot_index(xyz)].child()?.probe_leaf(xyz)
    }
    fn probe_leaf_mut(&mut self, xyz: Coord) -> Option<&mut LeafNode<T>> {
        self.slots[Self::slot_index(xyz)].child_mut()?.probe_leaf_mut(xyz)
    }
    fn probe_uniform(&self, bbox: &CoordBBox) -> Option<(T, bool)> {
        let clip = bbox.intersection(&self.bbox());
        let mut state = None;
        for (origin, sub) in aligned_blocks(clip, C::TOTAL) {
            let s = match &self.slots[Self::slot_index(origin)] {
                Slot::Tile { value, active } => (*value, *active),
                Slot::Child(c) => c.probe_uniform(&sub)?,
            };
            match state {
                None => state = Some(s),
                Some(first) if first != s => return None,
                Some(_) => {}
            }
        }
        state
    }
    fn first_value(&self) -> T {
        match &self.slots[0] {
            Slot::Tile { value, .. } => *value,
            Slot::Child(c) => c.first_value(),
        }
    }

    fn active_voxel_count(&self) -> u64 {
        self.slots
            .iter()
            .map(|s| match s {
                Slot::Tile { active: true, .. } => Self::CHILD_VOLUME,
                Slot::Tile { .. } => 0,
                Slot::Child(c) => c.active_voxel_count(),
            })
            .sum()
    }
    fn leaf_count(&self) -> usize {
        self.slots.iter().filter_map(|s| s.child()).map(|c| c.leaf_count()).sum()
    }
    fn non_leaf_count(&self) -> usize {
        1 + self
            .slots
            .iter()
            .filter_map(|s| s.child())
            .map(|c| c.non_leaf_count())
            .sum::<usize>()
    }
    fn active_tile_count(&self) -> usize {
        self.slots
            .iter()
            .map(|s| match s {
                Slot::Tile { active, .. } => *active as usize,
                Slot::Child(c) => c.active_tile_count(),
            })
            .sum()
    }
    fn has_active(&self) -> bool {
        self.slots.iter().any(|s| match s {
            Slot::Tile { active, .. } => *active,
            Slot::Child(c) => c.has_active(),
        })
    }
    fn eval_active_bbox(&self, bbox: &mut CoordBBox) {
        for (i, s) in self.slots.iter().enumerate() {
            match s {
                Slot::Tile { active: true, .. } => bbox.expand_bbox(&self.slot_bbox(i)),
                Slot::Tile { .. } => {}
                Slot::Child(c) => c.eval_active_bbox(bbox),
            }
        }
    }

    fn constant_state(&self, tolerance: &T) -> Option<(T, bool)> {
        let (first, active) = self.slots[0].tile()?;
        self.slots
            .iter()
            .all(|s| matches!(s.tile(), Some((v, a)) if a == active && v.is_approx_equal(&first, tolerance)))
            .then_some((first, active))
    }
    fn prune(&mut self, tolerance: &T) {
        for slot in self.slots.iter_mut() {
            if let Slot::Child(c) = slot {
                c.prune(tolerance);
                if let Some((value, active)) = c.constant_state(tolerance) {
                    *slot = Slot::Tile { value, active };
                }
            }
        }
    }
    fn prune_inactive_with(&mut self, tile_value: &dyn Fn(T) -> T) {
        for slot in self.slots.iter_mut() {
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
    }
    fn voxelize_active_tiles(&mut self) {
        for i in 0..Self::NUM_SLOTS {
            if self.tile_matches(i, None, Some(true)) {
                self.split(i);
            }
            if let Slot::Child(c) = &mut self.slots[i] {
                c.voxelize_active_tiles();
            }
        }
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a LeafNode<T>>) {
        for c in self.slots.iter().filter_map(|s| s.child()) {
            c.collect_leaves(out);
        }
    }
    fn collect_leaves_mut<'a>(&'a mut self, out: &mut Vec<&'a mut LeafNode<T>>) {
        for c in self.slots.iter_mut().filter_map(|s| s.child_mut()) {
            c.collect_leaves_mut(out);
        }
    }
    fn visit_values_mut(&mut self, filter: ValueFilter, f: &mut dyn FnMut(&mut ValueMut<T>)) {
        for i in 0..Self::NUM_SLOTS {
            let origin = self.slot_origin(i);
            match &mut self.slots[i] {
                Slot::Tile { value, active } => {
                    if filter.accepts(*active) {
                        let mut item = ValueMut::new(origin, Self::LEVEL, Self::CHILD_DIM, *value, *active);
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
