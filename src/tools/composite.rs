//! Voxel-wise combination of two trees: level-set CSG and per-value max/min/sum.
//!
//! Both trees are walked region by region, from whole root tiles down to leaves.
//! Wherever both inputs are uniform over a region the result is written as one tile, so
//! combining tiled inputs yields tiled output. Only regions that are mixed down to leaf
//! size are evaluated per voxel, in parallel.

use std::collections::BTreeSet;

use tracing::{debug, debug_span};

use super::level_set::prune_level_set;
use crate::math::{Coord, CoordBBox};
use crate::parallel::{self, DEFAULT_GRAIN_SIZE};
use crate::tree::{LeafNode, LowerNode, Node, RootNode, Tree, UpperNode};
use crate::value::{GridValue, Interpolant, RealValue};

type State<T> = (T, bool);

/// Replaces `a` with `op(a, b)` evaluated at every coordinate either tree covers.
fn combine<T, F>(a: &mut Tree<T>, b: &Tree<T>, op: F)
where
    T: GridValue,
    F: Fn(State<T>, State<T>) -> State<T> + Sync,
{
    let mut out = Tree::new(a.background());
    {
        let src: &Tree<T> = a;
        let keys: BTreeSet<Coord> = src
            .root()
            .table()
            .keys()
            .chain(b.root().table().keys())
            .copied()
            .collect();
        let mut mixed_leaves = Vec::new();
        for key in keys {
            let region = CoordBBox::create_cube(key, RootNode::<T>::TILE_DIM);
            combine_region(src, b, &mut out, region, RootNode::<T>::TILE_LOG2, &op, &mut mixed_leaves);
        }
        let leaves = parallel::map(&mixed_leaves, DEFAULT_GRAIN_SIZE, |_, origin| {
            combine_leaf(src, b, *origin, &op)
        });
        for leaf in leaves {
            out.add_leaf(leaf);
        }
    }
    *a = out;
}

fn child_log2<T: GridValue>(log2: u32) -> u32 {
    if log2 == <UpperNode<T> as Node<T>>::TOTAL {
        <LowerNode<T> as Node<T>>::TOTAL
    } else {
        <LeafNode<T> as Node<T>>::TOTAL
    }
}

fn combine_region<T, F>(
    a: &Tree<T>,
    b: &Tree<T>,
    out: &mut Tree<T>,
    region: CoordBBox,
    log2: u32,
    op: &F,
    mixed_leaves: &mut Vec<Coord>,
) where
    T: GridValue,
    F: Fn(State<T>, State<T>) -> State<T>,
{
    if let (Some(sa), Some(sb)) = (a.probe_uniform(&region), b.probe_uniform(&region)) {
        let (value, active) = op(sa, sb);
        out.fill(&region, value, active);
        return;
    }
    if log2 == <LeafNode<T> as Node<T>>::TOTAL {
        mixed_leaves.push(region.min);
        return;
    }
    let child = child_log2::<T>(log2);
    for (origin, _) in crate::tree::aligned_blocks(region, child) {
        let sub = CoordBBox::create_cube(origin, 1 << child);
        combine_region(a, b, out, sub, child, op, mixed_leaves);
    }
}

fn combine_leaf<T, F>(a: &Tree<T>, b: &Tree<T>, origin: Coord, op: &F) -> LeafNode<T>
where
    T: GridValue,
    F: Fn(State<T>, State<T>) -> State<T>,
{
    let (acc_a, acc_b) = (a.accessor(), b.accessor());
    let mut leaf = LeafNode::new(origin, a.background());
    for n in 0..LeafNode::<T>::SIZE {
        let xyz = leaf.offset_to_global_coord(n);
        let (value, active) = op(acc_a.probe_value(xyz), acc_b.probe_value(xyz));
        leaf.set_value_at(n, value, active);
    }
    leaf
}

fn min_of<T: PartialOrd>(a: T, b: T) -> T {
    if b < a { b } else { a }
}

fn max_of<T: PartialOrd>(a: T, b: T) -> T {
    if b > a { b } else { a }
}

fn level_set_op<T: RealValue>(
    a: &mut Tree<T>,
    b: &Tree<T>,
    name: &'static str,
    op: impl Fn(T, T) -> T + Sync,
) {
    let _span = debug_span!("csg", op = name).entered();
    let background = a.background();
    combine(a, b, |(va, _), (vb, _)| {
        let v = op(va, vb);
        (v, v.abs() < background)
    });
    prune_level_set(a);
    debug!(active = a.active_voxel_count(), leaves = a.leaf_count(), "csg finished");
}

/// Union of two level sets (pointwise minimum). The result band is the set of voxels
/// closer to the surface than `a`'s background.
pub fn csg_union<T: RealValue>(a: &mut Tree<T>, b: &Tree<T>) {
    level_set_op(a, b, "union", min_of);
}

/// Intersection of two level sets (pointwise maximum).
pub fn csg_intersection<T: RealValue>(a: &mut Tree<T>, b: &Tree<T>) {
    level_set_op(a, b, "intersection", max_of);
}

/// `a` minus `b`: `max(a, -b)`.
pub fn csg_difference<T: RealValue>(a: &mut Tree<T>, b: &Tree<T>) {
    level_set_op(a, b, "difference", |va, vb: T| max_of(va, vb.scaled(-1.0)));
}

/// Per-voxel maximum; a voxel is active if it is active in either input.
#[tracing::instrument(skip_all, level = "debug")]
pub fn comp_max<T: RealValue>(a: &mut Tree<T>, b: &Tree<T>) {
    combine(a, b, |(va, oa), (vb, ob)| (max_of(va, vb), oa || ob));
}

/// Per-voxel minimum; a voxel is active if it is active in either input.
#[tracing::instrument(skip_all, level = "debug")]
pub fn comp_min<T: RealValue>(a: &mut Tree<T>, b: &Tree<T>) {
    combine(a, b, |(va, oa), (vb, ob)| (min_of(va, vb), oa || ob));
}

/// Per-voxel sum; a voxel is active if it is active in either input.
#[tracing::instrument(skip_all, level = "debug")]
pub fn comp_sum<T: Interpolant>(a: &mut Tree<T>, b: &Tree<T>) {
    combine(a, b, |(va, oa), (vb, ob)| (va.plus(vb), oa || ob));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::level_set::create_level_set_sphere;
    use glam::DVec3;

    #[test]
    fn uniform_inputs_stay_tiles() {
        let mut a = Tree::new(0.0f32);
        a.fill(&CoordBBox::create_cube(Coord::ZERO, 128), 1.0, true);
        let mut b = Tree::new(0.0f32);
        b.fill(&CoordBBox::create_cube(Coord::ZERO, 128), 2.0, false);
        b.fill(&CoordBBox::create_cube(Coord::new(128, 0, 0), 8), 4.0, true);
        comp_sum(&mut a, &b);
        assert_eq!(a.leaf_count(), 0);
        assert_eq!(a.probe_value(Coord::splat(5)), (3.0, true));
        assert_eq!(a.probe_value(Coord::new(130, 1, 1)), (4.0, true));
        assert_eq!(a.active_voxel_count(), 128 * 128 * 128 + 512);
    }

    #[test]
    fn mixed_leaves_are_evaluated_per_voxel() {
        let mut a = Tree::new(0.0f32);
        a.set_value(Coord::new(1, 2, 3), 5.0);
        a.set_value(Coord::new(-40, 2, 3), -1.0);
        let mut b = Tree::new(0.0f32);
        b.set_value(Coord::new(1, 2, 3), 7.0);
        b.set_value_off(Coord::new(1, 2, 4), 2.0);
        let mut max = a.clone();
        comp_max(&mut max, &b);
        assert_eq!(max.probe_value(Coord::new(1, 2, 3)), (7.0, true));
        assert_eq!(max.probe_value(Coord::new(1, 2, 4)), (2.0, false));
        assert_eq!(max.probe_value(Coord::new(-40, 2, 3)), (0.0, true));
        let mut min = a;
        comp_min(&mut min, &b);
        assert_eq!(min.probe_value(Coord::new(1, 2, 3)), (5.0, true));
        assert_eq!(min.probe_value(Coord::new(-40, 2, 3)), (-1.0, true));
        assert_eq!(min.active_voxel_count(), 2);
    }

    #[test]
    fn sphere_csg() {
        let a = create_level_set_sphere::<f32>(4.0, DVec3::ZERO, 0.5, 3.0).unwrap();
        let b = create_level_set_sphere::<f32>(4.0, DVec3::new(3.0, 0.0, 0.0), 0.5, 3.0).unwrap();
        let bg = a.background();
        let index = |x: f64| Coord::new((x / 0.5) as i32, 0, 0);

        let mut union = a.tree().clone();
        csg_union(&mut union, b.tree());
        assert!(union.value(index(0.0)) < 0.0);
        assert!(union.value(index(6.5)) < 0.0);
        assert!(union.value(index(-4.5)) > 0.0);
        assert!(union.iter_values_on().all(|v| v.value().abs() < bg));
        assert!(union.active_voxel_count() > a.tree().active_voxel_count());

        let mut both = a.tree().clone();
        csg_intersection(&mut both, b.tree());
        assert!(both.value(index(1.5)) < 0.0);
        assert!(both.value(index(-2.0)) > 0.0);
        assert!(both.value(index(5.0)) > 0.0);

        let mut carved = a.tree().clone();
        csg_difference(&mut carved, b.tree());
        assert!(carved.value(index(-2.0)) < 0.0);
        assert!(carved.value(index(2.0)) > 0.0);
        assert_eq!(carved.value(Coord::new(60, 60, 60)), bg);
    }
}
