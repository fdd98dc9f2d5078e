//! Position-stack iterators over the values and leaves of a [`Tree`].

use std::collections::btree_map;

use super::Tree;
use super::internal::{InternalNode, LowerNode, UpperNode};
use super::leaf::LeafNode;
use super::node::{Node, Slot};
use super::root::{RootNode, RootSlot};
use crate::math::{Coord, CoordBBox};
use crate::value::GridValue;

/// Which values an iterator or visitor reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ValueFilter {
    #[default]
    On,
    Off,
    All,
}

impl ValueFilter {
    #[inline]
    pub fn accepts(self, active: bool) -> bool {
        match self {
            ValueFilter::On => active,
            ValueFilter::Off => !active,
            ValueFilter::All => true,
        }
    }
}

/// Which tree levels a value iterator visits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IterLevels {
    #[default]
    VoxelsAndTiles,
    VoxelsOnly,
    TilesOnly,
}

/// A single voxel or a whole tile, as reported by [`ValueIter`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueItem<T> {
    coord: Coord,
    level: usize,
    dim: i32,
    value: T,
    active: bool,
}

impl<T: Copy> ValueItem<T> {
    /// The voxel, or the minimum corner of the tile.
    pub fn coord(&self) -> Coord {
        self.coord
    }
    pub fn value(&self) -> T {
        self.value
    }
    pub fn is_active(&self) -> bool {
        self.active
    }
    /// 0 for voxels; the level of the node holding the tile otherwise.
    pub fn level(&self) -> usize {
        self.level
    }
    pub fn is_voxel_value(&self) -> bool {
        self.level == 0
    }
    pub fn voxel_count(&self) -> u64 {
        let d = self.dim as u64;
        d * d * d
    }
    pub fn bounding_box(&self) -> CoordBBox {
        CoordBBox::create_cube(self.coord, self.dim)
    }
}

/// Writable view of one voxel or one tile handed out by [`Tree::for_each_value_mut`].
///
/// Writes apply to exactly the reported granularity: a tile stays a tile.
#[derive(Debug)]
pub struct ValueMut<T> {
    item: ValueItem<T>,
}

impl<T: Copy> ValueMut<T> {
    pub(crate) fn new(coord: Coord, level: usize, dim: i32, value: T, active: bool) -> Self {
        Self {
            item: ValueItem {
                coord,
                level,
                dim,
                value,
                active,
            },
        }
    }
    pub fn coord(&self) -> Coord {
        self.item.coord
    }
    pub fn value(&self) -> T {
        self.item.value
    }
    pub fn is_active(&self) -> bool {
        self.item.active
    }
    pub fn level(&self) -> usize {
        self.item.level
    }
    pub fn is_voxel_value(&self) -> bool {
        self.item.is_voxel_value()
    }
    pub fn voxel_count(&self) -> u64 {
        self.item.voxel_count()
    }
    pub fn bounding_box(&self) -> CoordBBox {
        self.item.bounding_box()
    }
    pub fn set_value(&mut self, value: T) {
        self.item.value = value;
    }
    pub fn set_active(&mut self, on: bool) {
        self.item.active = on;
    }
}

enum Frame<'a, T> {
    Upper(&'a UpperNode<T>, usize),
    Lower(&'a LowerNode<T>, usize),
    Leaf(&'a LeafNode<T>, usize),
}

enum Step<'a, T> {
    Yield(ValueItem<T>),
    Push(Frame<'a, T>),
    Pop,
}

/// Lazy, restartable iterator over the voxels and tiles of a tree.
///
/// Order is root keys ascending, then slot index order at every level.
pub struct ValueIter<'a, T> {
    root: &'a RootNode<T>,
    roots: btree_map::Iter<'a, Coord, RootSlot<T>>,
    stack: Vec<Frame<'a, T>>,
    filter: ValueFilter,
    levels: IterLevels,
}

impl<'a, T: GridValue> ValueIter<'a, T> {
    pub(crate) fn new(root: &'a RootNode<T>, filter: ValueFilter) -> Self {
        Self {
            root,
            roots: root.table().iter(),
            stack: Vec::with_capacity(3),
            filter,
            levels: IterLevels::VoxelsAndTiles,
        }
    }
    pub fn voxels_only(mut self) -> Self {
        self.levels = IterLevels::VoxelsOnly;
        self
    }
    pub fn tiles_only(mut self) -> Self {
        self.levels = IterLevels::TilesOnly;
        self
    }
    pub fn filter(&self) -> ValueFilter {
        self.filter
    }
    /// Rewinds to the first item.
    pub fn restart(&mut self) {
        self.roots = self.root.table().iter();
        self.stack.clear();
    }

    fn wants_tile(&self, active: bool) -> bool {
        self.levels != IterLevels::VoxelsOnly && self.filter.accepts(active)
    }

    fn internal_step<C: Node<T>, const L: u32>(
        &self,
        node: &'a InternalNode<T, C, L>,
        next: &mut usize,
        push: impl Fn(&'a C) -> Frame<'a, T>,
    ) -> Step<'a, T> {
        while *next < node.slots().len() {
            let i = *next;
            *next += 1;
            match node.slot(i) {
                Slot::Child(c) => return Step::Push(push(&**c)),
                Slot::Tile { value, active } if self.wants_tile(*active) => {
                    return Step::Yield(ValueItem {
                        coord: node.slot_origin(i),
                        level: <InternalNode<T, C, L> as Node<T>>::LEVEL,
                        dim: 1 << C::TOTAL,
                        value: *value,
                        active: *active,
                    });
                }
                Slot::Tile { .. } => {}
            }
        }
        Step::Pop
    }

    fn leaf_step(&self, leaf: &'a LeafNode<T>, next: &mut usize) -> Step<'a, T> {
        if self.levels == IterLevels::TilesOnly {
            return Step::Pop;
        }
        let found = match self.filter {
            ValueFilter::On => leaf.mask().find_next_on(*next),
            ValueFilter::Off => leaf.mask().find_next_off(*next),
            ValueFilter::All => (*next < LeafNode::<T>::SIZE).then_some(*next),
        };
        match found {
            Some(n) => {
                *next = n + 1;
                Step::Yield(ValueItem {
                    coord: leaf.offset_to_global_coord(n),
                    level: 0,
                    dim: 1,
                    value: leaf.value_at(n),
                    active: leaf.is_on_at(n),
                })
            }
            None => Step::Pop,
        }
    }
}

impl<'a, T: GridValue> Iterator for ValueIter<'a, T> {
    type Item = ValueItem<T>;

    fn next(&mut self) -> Option<ValueItem<T>> {
        loop {
            let step = match self.stack.last() {
                None => match self.roots.next()? {
                    (_, Slot::Child(upper)) => Step::Push(Frame::Upper(&**upper, 0)),
                    (key, Slot::Tile { value, active }) => {
                        if !self.wants_tile(*active) {
                            continue;
                        }
                        Step::Yield(ValueItem {
                            coord: *key,
                            level: RootNode::<T>::LEVEL,
                            dim: RootNode::<T>::TILE_DIM,
                            value: *value,
                            active: *active,
                        })
                    }
                },
                Some(Frame::Upper(node, next)) => {
                    let (node, mut n) = (*node, *next);
                    let step = self.internal_step(node, &mut n, |c| Frame::Lower(c, 0));
                    if let Some(Frame::Upper(_, next)) = self.stack.last_mut() {
                        *next = n;
                    }
                    step
                }
                Some(Frame::Lower(node, next)) => {
                    let (node, mut n) = (*node, *next);
                    let step = self.internal_step(node, &mut n, |c| Frame::Leaf(c, 0));
                    if let Some(Frame::Lower(_, next)) = self.stack.last_mut() {
                        *next = n;
                    }
                    step
                }
                Some(Frame::Leaf(leaf, next)) => {
                    let (leaf, mut n) = (*leaf, *next);
                    let step = self.leaf_step(leaf, &mut n);
                    if let Some(Frame::Leaf(_, next)) = self.stack.last_mut() {
                        *next = n;
                    }
                    step
                }
            };
            match step {
                Step::Yield(item) => return Some(item),
                Step::Push(frame) => self.stack.push(frame),
                Step::Pop => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// Iterator over the leaves of a tree in traversal order.
pub struct LeafIter<'a, T> {
    roots: btree_map::Values<'a, Coord, RootSlot<T>>,
    uppers: Option<(&'a UpperNode<T>, usize)>,
    lowers: Option<(&'a LowerNode<T>, usize)>,
}

impl<'a, T: GridValue> LeafIter<'a, T> {
    pub(crate) fn new(root: &'a RootNode<T>) -> Self {
        Self {
            roots: root.table().values(),
            uppers: None,
            lowers: None,
        }
    }
}

impl<'a, T: GridValue> Iterator for LeafIter<'a, T> {
    type Item = &'a LeafNode<T>;

    fn next(&mut self) -> Option<&'a LeafNode<T>> {
        loop {
            if let Some((lower, next)) = &mut self.lowers {
                while *next < lower.slots().len() {
                    let i = *next;
                    *next += 1;
                    if let Some(leaf) = lower.slot(i).child() {
                        return Some(leaf);
                    }
                }
                self.lowers = None;
            }
            if let Some((upper, next)) = &mut self.uppers {
                while *next < upper.slots().len() && self.lowers.is_none() {
                    let i = *next;
                    *next += 1;
                    if let Some(lower) = upper.slot(i).child() {
                        self.lowers = Some((lower, 0));
                    }
                }
                if self.lowers.is_some() {
                    continue;
                }
                self.uppers = None;
            }
            let slot = self.roots.next()?;
            if let Some(upper) = slot.child() {
                self.uppers = Some((upper, 0));
            }
        }
    }
}

impl<T: GridValue> Tree<T> {
    /// Values and tiles passing `filter`, in deterministic traversal order.
    pub fn iter_values(&self, filter: ValueFilter) -> ValueIter<'_, T> {
        ValueIter::new(self.root(), filter)
    }
    pub fn iter_values_on(&self) -> ValueIter<'_, T> {
        self.iter_values(ValueFilter::On)
    }
    pub fn leaves(&self) -> LeafIter<'_, T> {
        LeafIter::new(self.root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Tree<f32> {
        let mut tree = Tree::new(0.0);
        tree.set_value(Coord::new(1, 2, 3), 1.0);
        tree.set_value_off(Coord::new(-1, 0, 0), 2.0);
        tree.fill(&CoordBBox::create_cube(Coord::new(16, 0, 0), 8), 3.0, true);
        tree.fill(&CoordBBox::create_cube(Coord::new(0, 128, 0), 128), 4.0, false);
        tree
    }

    #[test]
    fn active_items_with_tiles() {
        let tree = sample_tree();
        let items: Vec<_> = tree.iter_values_on().collect();
        assert_eq!(items.len(), 2);
        let voxel = items.iter().find(|i| i.is_voxel_value()).unwrap();
        assert_eq!(voxel.coord(), Coord::new(1, 2, 3));
        assert_eq!(voxel.voxel_count(), 1);
        let tile = items.iter().find(|i| !i.is_voxel_value()).unwrap();
        assert_eq!(tile.level(), 1);
        assert_eq!(tile.voxel_count(), 512);
        assert_eq!(tile.bounding_box(), CoordBBox::create_cube(Coord::new(16, 0, 0), 8));
        let total: u64 = items.iter().map(|i| i.voxel_count()).sum();
        assert_eq!(total, tree.active_voxel_count());
    }

    #[test]
    fn level_and_state_filters() {
        let tree = sample_tree();
        assert_eq!(tree.iter_values_on().voxels_only().count(), 1);
        assert_eq!(tree.iter_values_on().tiles_only().count(), 1);
        let big = tree
            .iter_values(ValueFilter::Off)
            .tiles_only()
            .find(|i| i.value() == 4.0)
            .unwrap();
        assert_eq!(big.level(), 2);
        assert_eq!(big.voxel_count(), 128 * 128 * 128);
        let inactive_voxels = tree.iter_values(ValueFilter::Off).voxels_only().count();
        assert_eq!(inactive_voxels, 2 * 512 - 1);
        let all = tree.iter_values(ValueFilter::All).voxels_only().count();
        assert_eq!(all, 2 * 512);
    }

    #[test]
    fn restart_replays_the_sequence() {
        let tree = sample_tree();
        let mut it = tree.iter_values(ValueFilter::All);
        let first: Vec<_> = it.by_ref().take(5).collect();
        it.restart();
        let again: Vec<_> = it.take(5).collect();
        assert_eq!(first, again);
    }

    #[test]
    fn leaves_in_traversal_order() {
        let tree = sample_tree();
        let origins: Vec<Coord> = tree.leaves().map(|l| l.origin()).collect();
        assert_eq!(origins, vec![Coord::new(-8, 0, 0), Coord::new(0, 0, 0)]);
        assert_eq!(tree.leaves().count(), tree.leaf_count());
        assert_eq!(Tree::<f32>::new(0.0).leaves().count(), 0);
    }

    #[test]
    fn root_tiles_are_reported() {
        let mut tree = Tree::new(0u8);
        tree.fill(&CoordBBox::create_cube(Coord::splat(-4096), 4096), 1, true);
        let items: Vec<_> = tree.iter_values_on().collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].level(), 3);
        assert_eq!(items[0].coord(), Coord::splat(-4096));
    }
}
