use super::iter::{ValueFilter, ValueMut};
use super::mask::LeafMask;
use super::node::Node;
use crate::math::{Coord, CoordBBox};
use crate::value::GridValue;

/// Dense 8³ block of values with a per-voxel active mask.
///
/// Values and active states are independent: an inactive voxel still stores a value.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafNode<T> {
    origin: Coord,
    mask: LeafMask,
    values: Box<[T]>,
}

impl<T: GridValue> LeafNode<T> {
    pub const SIZE: usize = 1 << (3 * 3);

    pub fn new(origin: Coord, background: T) -> Self {
        Self::new_filled(origin, background, false)
    }
    /// Builds a leaf from raw parts. `values` must hold exactly [`LeafNode::SIZE`] entries.
    pub fn from_parts(origin: Coord, mask: LeafMask, values: Vec<T>) -> Option<Self> {
        (values.len() == Self::SIZE).then(|| Self {
            origin: origin.aligned(3),
            mask,
            values: values.into_boxed_slice(),
        })
    }

    #[inline]
    pub fn coord_to_offset(xyz: Coord) -> usize {
        (((xyz.x & 7) as usize) << 6) | (((xyz.y & 7) as usize) << 3) | (xyz.z & 7) as usize
    }
    #[inline]
    pub fn offset_to_local_coord(n: usize) -> Coord {
        Coord::new((n >> 6) as i32, ((n >> 3) & 7) as i32, (n & 7) as i32)
    }
    #[inline]
    pub fn offset_to_global_coord(&self, n: usize) -> Coord {
        self.origin + Self::offset_to_local_coord(n)
    }

    pub fn mask(&self) -> &LeafMask {
        &self.mask
    }
    pub fn mask_mut(&mut self) -> &mut LeafMask {
        &mut self.mask
    }
    pub fn set_mask(&mut self, mask: LeafMask) {
        self.mask = mask;
    }
    pub fn values(&self) -> &[T] {
        &self.values
    }
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }
    pub fn value_at(&self, n: usize) -> T {
        self.values[n]
    }
    pub fn is_on_at(&self, n: usize) -> bool {
        self.mask.is_on(n)
    }
    pub fn set_value_at(&mut self, n: usize, value: T, active: bool) {
        self.values[n] = value;
        self.mask.set(n, active);
    }
    pub fn is_empty(&self) -> bool {
        self.mask.is_off()
    }
    pub fn on_voxel_count(&self) -> u64 {
        self.mask.count_on() as u64
    }
}

impl<T: GridValue> Node<T> for LeafNode<T> {
    const LOG2DIM: u32 = 3;
    const TOTAL: u32 = 3;
    const LEVEL: usize = 0;

    fn new_filled(origin: Coord, value: T, active: bool) -> Self {
        Self {
            origin: origin.aligned(3),
            mask: LeafMask::new(active),
            values: vec![value; Self::SIZE].into_boxed_slice(),
        }
    }
    fn origin(&self) -> Coord {
        self.origin
    }

    fn probe_value(&self, xyz: Coord) -> (T, bool) {
        let n = Self::coord_to_offset(xyz);
        (self.values[n], self.mask.is_on(n))
    }
    fn set_value_on(&mut self, xyz: Coord, value: T) {
        self.set_value_at(Self::coord_to_offset(xyz), value, true);
    }
    fn set_value_off(&mut self, xyz: Coord, value: T) {
        self.set_value_at(Self::coord_to_offset(xyz), value, false);
    }
    fn set_value_only(&mut self, xyz: Coord, value: T) {
        self.values[Self::coord_to_offset(xyz)] = value;
    }
    fn set_active_state(&mut self, xyz: Coord, on: bool) {
        self.mask.set(Self::coord_to_offset(xyz), on);
    }
    fn fill(&mut self, bbox: &CoordBBox, value: T, active: bool) {
        for xyz in bbox.intersection(&self.bbox()) {
            self.set_value_at(Self::coord_to_offset(xyz), value, active);
        }
    }
    fn set_active_state_in(&mut self, bbox: &CoordBBox, on: bool) {
        for xyz in bbox.intersection(&self.bbox()) {
            self.mask.set(Self::coord_to_offset(xyz), on);
        }
    }

    fn touch_leaf(&mut self, _xyz: Coord) -> &mut LeafNode<T> {
        self
    }
    fn add_leaf(&mut self, leaf: LeafNode<T>) {
        *self = leaf;
    }
    fn probe_leaf(&self, _xyz: Coord) -> Option<&LeafNode<T>> {
        Some(self)
    }
    fn probe_leaf_mut(&mut self, _xyz: Coord) -> Option<&mut LeafNode<T>> {
        Some(self)
    }
    fn probe_uniform(&self, bbox: &CoordBBox) -> Option<(T, bool)> {
        let mut voxels = bbox.intersection(&self.bbox()).iter();
        let first = self.probe_value(voxels.next()?);
        voxels.all(|xyz| self.probe_value(xyz) == first).then_some(first)
    }
    fn first_value(&self) -> T {
        self.values[0]
    }

    fn active_voxel_count(&self) -> u64 {
        self.on_voxel_count()
    }
    fn leaf_count(&self) -> usize {
        1
    }
    fn non_leaf_count(&self) -> usize {
        0
    }
    fn active_tile_count(&self) -> usize {
        0
    }
    fn has_active(&self) -> bool {
        !self.mask.is_off()
    }
    fn eval_active_bbox(&self, bbox: &mut CoordBBox) {
        if self.mask.is_full() {
            bbox.expand_bbox(&self.bbox());
        } else {
            for n in self.mask.iter_on() {
                bbox.expand(self.offset_to_global_coord(n));
            }
        }
    }

    fn constant_state(&self, tolerance: &T) -> Option<(T, bool)> {
        let active = if self.mask.is_full() {
            true
        } else if self.mask.is_off() {
            false
        } else {
            return None;
        };
        let first = self.values[0];
        self.values
            .iter()
            .all(|v| v.is_approx_equal(&first, tolerance))
            .then_some((first, active))
    }
    fn prune(&mut self, _tolerance: &T) {}
    fn prune_inactive_with(&mut self, _tile_value: &dyn Fn(T) -> T) {}
    fn voxelize_active_tiles(&mut self) {}

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a LeafNode<T>>) {
        out.push(self);
    }
    fn collect_leaves_mut<'a>(&'a mut self, out: &mut Vec<&'a mut LeafNode<T>>) {
        out.push(self);
    }
    fn visit_values_mut(&mut self, filter: ValueFilter, f: &mut dyn FnMut(&mut ValueMut<T>)) {
        for n in 0..Self::SIZE {
            let active = self.mask.is_on(n);
            if !filter.accepts(active) {
                continue;
            }
            let mut item = ValueMut::new(self.offset_to_global_coord(n), 0, 1, self.values[n], active);
            f(&mut item);
            self.values[n] = item.value();
            self.mask.set(n, item.is_active());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_round_trip() {
        let leaf = LeafNode::new(Coord::new(-8, 0, 16), 0.0f32);
        for n in [0usize, 1, 8, 64, 511] {
            let xyz = leaf.offset_to_global_coord(n);
            assert_eq!(LeafNode::<f32>::coord_to_offset(xyz), n);
            assert!(leaf.bbox().contains(xyz));
        }
        assert_eq!(LeafNode::<f32>::coord_to_offset(Coord::new(-1, -1, -1)), 511);
    }

    #[test]
    fn values_and_states_are_independent() {
        let mut leaf = LeafNode::new(Coord::ZERO, 0.0f32);
        leaf.set_value_off(Coord::new(1, 2, 3), 5.0);
        assert_eq!(leaf.probe_value(Coord::new(1, 2, 3)), (5.0, false));
        leaf.set_active_state(Coord::new(1, 2, 3), true);
        assert_eq!(leaf.probe_value(Coord::new(1, 2, 3)), (5.0, true));
        leaf.set_value_only(Coord::new(1, 2, 3), 6.0);
        assert!(leaf.probe_value(Coord::new(1, 2, 3)).1);
        assert_eq!(leaf.active_voxel_count(), 1);
    }

    #[test]
    fn constant_state_requires_uniform_mask_and_values() {
        let mut leaf = LeafNode::new_filled(Coord::ZERO, 1.0f32, true);
        assert_eq!(leaf.constant_state(&0.0), Some((1.0, true)));
        leaf.set_value_only(Coord::new(7, 7, 7), 1.05);
        assert_eq!(leaf.constant_state(&0.0), None);
        assert_eq!(leaf.constant_state(&0.1), Some((1.0, true)));
        leaf.set_active_state(Coord::ZERO, false);
        assert_eq!(leaf.constant_state(&0.1), None);
    }

    #[test]
    fn fill_clips_to_the_leaf() {
        let mut leaf = LeafNode::new(Coord::ZERO, 0i32);
        leaf.fill(&CoordBBox::new(Coord::splat(6), Coord::splat(20)), 3, true);
        assert_eq!(leaf.active_voxel_count(), 8);
        let mut bbox = CoordBBox::empty();
        leaf.eval_active_bbox(&mut bbox);
        assert_eq!(bbox, CoordBBox::new(Coord::splat(6), Coord::splat(7)));
        assert_eq!(leaf.probe_uniform(&CoordBBox::new(Coord::splat(6), Coord::splat(7))), Some((3, true)));
        assert_eq!(leaf.probe_uniform(&leaf.bbox()), None);
    }
}
