use std::cell::Cell;
use std::ptr::NonNull;

use super::Tree;
use super::internal::{LowerNode, UpperNode};
use super::leaf::LeafNode;
use super::node::{Node, Slot};
use super::root::RootNode;
use crate::math::Coord;
use crate::value::GridValue;

/// Read cache of the root-to-leaf path last visited.
///
/// Lookups that fall in the cached leaf (or lower/upper node) skip the descent from the
/// root. The accessor borrows the tree, so the tree cannot change while it is alive.
/// It is not `Sync`; give each worker its own.
pub struct ValueAccessor<'a, T> {
    tree: &'a Tree<T>,
    leaf: Cell<Option<&'a LeafNode<T>>>,
    lower: Cell<Option<&'a LowerNode<T>>>,
    upper: Cell<Option<&'a UpperNode<T>>>,
}

impl<'a, T: GridValue> ValueAccessor<'a, T> {
    pub fn new(tree: &'a Tree<T>) -> Self {
        Self {
            tree,
            leaf: Cell::new(None),
            lower: Cell::new(None),
            upper: Cell::new(None),
        }
    }
    pub fn tree(&self) -> &'a Tree<T> {
        self.tree
    }
    pub fn clear(&self) {
        self.leaf.set(None);
        self.lower.set(None);
        self.upper.set(None);
    }
    /// True when `xyz` falls in the cached leaf.
    pub fn is_cached(&self, xyz: Coord) -> bool {
        self.leaf.get().is_some_and(|l| l.origin() == xyz.aligned(3))
    }

    pub fn probe_value(&self, xyz: Coord) -> (T, bool) {
        if let Some(leaf) = self.leaf.get() {
            if leaf.origin() == xyz.aligned(<LeafNode<T> as Node<T>>::TOTAL) {
                return leaf.probe_value(xyz);
            }
        }
        if let Some(lower) = self.lower.get() {
            if lower.origin() == xyz.aligned(<LowerNode<T> as Node<T>>::TOTAL) {
                return self.probe_lower(lower, xyz);
            }
        }
        if let Some(upper) = self.upper.get() {
            if upper.origin() == RootNode::<T>::key(xyz) {
                return self.probe_upper(upper, xyz);
            }
        }
        match self.tree.root().table().get(&RootNode::<T>::key(xyz)) {
            None => (self.tree.background(), false),
            Some(Slot::Tile { value, active }) => (*value, *active),
            Some(Slot::Child(upper)) => {
                self.upper.set(Some(&**upper));
                self.probe_upper(upper, xyz)
            }
        }
    }
    fn probe_upper(&self, upper: &'a UpperNode<T>, xyz: Coord) -> (T, bool) {
        match upper.slot(UpperNode::<T>::slot_index(xyz)) {
            Slot::Tile { value, active } => (*value, *active),
            Slot::Child(lower) => {
                self.lower.set(Some(&**lower));
                self.probe_lower(lower, xyz)
            }
        }
    }
    fn probe_lower(&self, lower: &'a LowerNode<T>, xyz: Coord) -> (T, bool) {
        match lower.slot(LowerNode::<T>::slot_index(xyz)) {
            Slot::Tile { value, active } => (*value, *active),
            Slot::Child(leaf) => {
                self.leaf.set(Some(&**leaf));
                leaf.probe_value(xyz)
            }
        }
    }

    pub fn value(&self, xyz: Coord) -> T {
        self.probe_value(xyz).0
    }
    pub fn is_value_on(&self, xyz: Coord) -> bool {
        self.probe_value(xyz).1
    }
    pub fn probe_leaf(&self, xyz: Coord) -> Option<&'a LeafNode<T>> {
        self.probe_value(xyz);
        self.leaf.get().filter(|l| l.origin() == xyz.aligned(3))
    }
}

/// Write accessor. Holds the leaf last visited and serves every access inside it without
/// going back to the tree; a miss descends once and caches the new leaf.
///
/// Reads leave the tree's cached counts alone. The first write drops them.
pub struct ValueAccessorMut<'a, T> {
    tree: &'a mut Tree<T>,
    leaf: Option<NonNull<LeafNode<T>>>,
    written: bool,
}

impl<'a, T: GridValue> ValueAccessorMut<'a, T> {
    pub fn new(tree: &'a mut Tree<T>) -> Self {
        Self {
            tree,
            leaf: None,
            written: false,
        }
    }
    pub fn clear(&mut self) {
        self.leaf = None;
    }
    pub fn is_cached(&self, xyz: Coord) -> bool {
        // SAFETY: see `cached`.
        self.leaf
            .is_some_and(|leaf| unsafe { leaf.as_ref() }.origin() == xyz.aligned(3))
    }

    fn cached(&mut self, xyz: Coord) -> Option<&mut LeafNode<T>> {
        if !self.is_cached(xyz) {
            return None;
        }
        // SAFETY: the pointer was taken from `self.tree`, which stays exclusively borrowed
        // and is not touched again until `self.leaf` is replaced. Leaves are boxed, so the
        // address is stable while the cached leaf is alive.
        self.leaf.map(|mut leaf| unsafe { leaf.as_mut() })
    }
    /// Caches the leaf containing `xyz`, if one exists.
    fn descend(&mut self, xyz: Coord) -> Option<&mut LeafNode<T>> {
        self.leaf = None;
        let leaf = NonNull::from(self.tree.root.probe_leaf_mut(xyz)?);
        self.leaf = Some(leaf);
        self.cached(xyz)
    }
    fn leaf_for_write(&mut self, xyz: Coord) -> Option<&mut LeafNode<T>> {
        if !self.written {
            self.leaf = None;
            self.tree.summary.take();
            self.written = true;
        }
        if self.is_cached(xyz) { self.cached(xyz) } else { self.descend(xyz) }
    }
    /// Applies `op` to the leaf holding `xyz`, or `fallback` to the tree when there is none.
    fn write(
        &mut self,
        xyz: Coord,
        op: impl FnOnce(&mut LeafNode<T>),
        fallback: impl FnOnce(&mut RootNode<T>),
    ) {
        if let Some(leaf) = self.leaf_for_write(xyz) {
            op(leaf);
            return;
        }
        fallback(&mut self.tree.root);
        self.descend(xyz);
    }

    pub fn probe_value(&mut self, xyz: Coord) -> (T, bool) {
        if let Some(leaf) = self.cached(xyz) {
            return leaf.probe_value(xyz);
        }
        match self.descend(xyz) {
            Some(leaf) => leaf.probe_value(xyz),
            None => self.tree.root.probe_value(xyz),
        }
    }
    pub fn value(&mut self, xyz: Coord) -> T {
        self.probe_value(xyz).0
    }
    pub fn is_value_on(&mut self, xyz: Coord) -> bool {
        self.probe_value(xyz).1
    }
    pub fn set_value(&mut self, xyz: Coord, value: T) {
        self.write(xyz, |leaf| leaf.set_value_on(xyz, value), |root| root.set_value_on(xyz, value));
    }
    pub fn set_value_off(&mut self, xyz: Coord, value: T) {
        self.write(xyz, |leaf| leaf.set_value_off(xyz, value), |root| root.set_value_off(xyz, value));
    }
    pub fn set_value_only(&mut self, xyz: Coord, value: T) {
        self.write(xyz, |leaf| leaf.set_value_only(xyz, value), |root| root.set_value_only(xyz, value));
    }
    pub fn set_active_state(&mut self, xyz: Coord, on: bool) {
        self.write(xyz, |leaf| leaf.set_active_state(xyz, on), |root| root.set_active_state(xyz, on));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::CoordBBox;

    #[test]
    fn cached_reads_match_tree_reads() {
        let mut tree = Tree::new(-1i32);
        for (n, xyz) in CoordBBox::new(Coord::splat(-10), Coord::splat(10)).iter().enumerate() {
            if n % 3 == 0 {
                tree.set_value(xyz, n as i32);
            }
        }
        tree.fill(&CoordBBox::create_cube(Coord::new(128, 0, 0), 128), 7, true);
        let acc = tree.accessor();
        for xyz in CoordBBox::new(Coord::splat(-12), Coord::splat(12)).iter().chain([
            Coord::new(130, 5, 5),
            Coord::new(-5000, 0, 0),
            Coord::splat(3),
        ]) {
            assert_eq!(acc.probe_value(xyz), tree.probe_value(xyz));
        }
        assert!(acc.is_cached(Coord::splat(2)));
        assert!(acc.probe_leaf(Coord::new(130, 5, 5)).is_none());
    }

    #[test]
    fn write_accessor_matches_tree_writes() {
        let mut a = Tree::new(0.0f32);
        let mut b = Tree::new(0.0f32);
        {
            let mut acc = a.accessor_mut();
            for xyz in CoordBBox::new(Coord::splat(-9), Coord::splat(9)) {
                acc.set_value(xyz, xyz.x as f32);
                assert!(acc.is_cached(xyz));
            }
            acc.set_active_state(Coord::ZERO, false);
            acc.set_value_off(Coord::splat(20), 4.0);
            assert_eq!(acc.probe_value(Coord::ZERO), (0.0, false));
        }
        for xyz in CoordBBox::new(Coord::splat(-9), Coord::splat(9)) {
            b.set_value(xyz, xyz.x as f32);
        }
        b.set_active_state(Coord::ZERO, false);
        b.set_value_off(Coord::splat(20), 4.0);
        assert_eq!(a.active_voxel_count(), b.active_voxel_count());
        assert_eq!(a.leaf_count(), b.leaf_count());
        assert_eq!(a.value(Coord::splat(20)), 4.0);
    }

    #[test]
    fn write_accessor_invalidates_counts() {
        let mut tree = Tree::new(0u8);
        tree.set_value(Coord::ZERO, 1);
        assert_eq!(tree.active_voxel_count(), 1);
        {
            let mut acc = tree.accessor_mut();
            acc.set_value(Coord::ZERO, 1);
            acc.set_value(Coord::new(0, 0, 1), 1);
        }
        assert_eq!(tree.active_voxel_count(), 2);
    }

    #[test]
    fn write_accessor_reads_keep_counts_cached() {
        let mut tree = Tree::new(0u8);
        tree.fill(&CoordBBox::create_cube(Coord::ZERO, 16), 3, false);
        tree.set_value(Coord::new(1, 2, 3), 9);
        assert_eq!(tree.active_voxel_count(), 1);
        assert!(tree.summary.get().is_some());
        {
            let mut acc = tree.accessor_mut();
            assert_eq!(acc.probe_value(Coord::new(1, 2, 3)), (9, true));
            assert!(acc.is_cached(Coord::new(7, 7, 7)));
            assert_eq!(acc.probe_value(Coord::new(7, 7, 7)), (3, false));
            assert_eq!(acc.value(Coord::new(12, 0, 0)), 3);
            assert_eq!(acc.value(Coord::splat(-50)), 0);
            assert!(!acc.is_cached(Coord::splat(-50)));
        }
        assert!(tree.summary.get().is_some());
        assert_eq!(tree.active_voxel_count(), 1);
    }

    #[test]
    fn write_accessor_serves_one_leaf_from_its_cache() {
        let mut tree = Tree::new(0i32);
        {
            let mut acc = tree.accessor_mut();
            acc.set_value(Coord::ZERO, 1);
            for (n, xyz) in CoordBBox::create_cube(Coord::ZERO, 8).iter().enumerate() {
                assert!(acc.is_cached(xyz));
                acc.set_value(xyz, n as i32);
                acc.set_active_state(xyz, n % 2 == 0);
            }
            assert_eq!(acc.probe_value(Coord::new(0, 0, 1)), (1, false));
            assert_eq!(acc.probe_value(Coord::new(7, 7, 7)), (511, false));
            acc.set_value_only(Coord::new(0, 0, 2), -4);
            assert_eq!(acc.probe_value(Coord::new(0, 0, 2)), (-4, true));
        }
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.active_voxel_count(), 256);
        assert_eq!(tree.value(Coord::new(0, 0, 2)), -4);
    }
}
