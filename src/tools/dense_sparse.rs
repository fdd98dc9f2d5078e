//! Moving data between dense buffers and trees: rule-driven extraction, in-place dense
//! transforms and alpha compositing of a sparse tree onto a dense buffer.

use tracing::{debug, debug_span};

use super::dense::{Dense, DenseLayout, LayoutZyx, offset_to_coord};
use crate::math::{Coord, CoordBBox};
use crate::parallel;
use crate::tree::{LeafNode, Node, Tree, aligned_blocks};
use crate::value::{GridValue, RealValue};

/// Builds a tree from `dense`, activating each cell for which `rule` returns a value.
///
/// Cells are judged independently; leaves are only created where something activates.
pub fn extract_sparse_tree<T, U, L, F>(dense: &Dense<T, L>, rule: F, background: U, grain_size: usize) -> Tree<U>
where
    T: GridValue,
    U: GridValue,
    L: DenseLayout,
    F: Fn(T) -> Option<U> + Sync,
{
    let _span = debug_span!("extract_sparse_tree", voxels = dense.len()).entered();
    let log2 = <LeafNode<U> as Node<U>>::TOTAL;
    let blocks: Vec<(Coord, CoordBBox)> = aligned_blocks(dense.bbox(), log2).collect();
    let leaves = parallel::map(&blocks, grain_size, |_, &(origin, sub)| {
        let mut leaf = LeafNode::new(origin, background);
        for xyz in sub {
            if let Some(v) = rule(dense.value(xyz)) {
                leaf.set_value_at(LeafNode::<U>::coord_to_offset(xyz), v, true);
            }
        }
        (!leaf.is_empty()).then_some(leaf)
    });
    let mut tree = Tree::new(background);
    for leaf in leaves.into_iter().flatten() {
        tree.add_leaf(leaf);
    }
    debug!(active = tree.active_voxel_count(), leaves = tree.leaf_count(), "extracted");
    tree
}

/// Builds a tree holding the dense values wherever `mask` is active. Active mask values
/// outside the dense box are ignored.
pub fn extract_sparse_tree_with_mask<T, M, L>(dense: &Dense<T, L>, mask: &Tree<M>, background: T) -> Tree<T>
where
    T: GridValue,
    M: GridValue,
    L: DenseLayout,
{
    let _span = debug_span!("extract_sparse_tree_with_mask").entered();
    let domain = dense.bbox();
    let mut tree = Tree::new(background);
    {
        let mut acc = tree.accessor_mut();
        for item in mask.iter_values_on() {
            let clipped = item.bounding_box().intersection(&domain);
            for xyz in clipped {
                acc.set_value(xyz, dense.value(xyz));
            }
        }
    }
    debug!(active = tree.active_voxel_count(), "extracted with mask");
    tree
}

/// Applies `op` to every cell of `dense` inside `bbox`.
pub fn transform_dense<T, L, F>(dense: &mut Dense<T, L>, bbox: &CoordBBox, op: F, grain_size: usize)
where
    T: GridValue,
    L: DenseLayout,
    F: Fn(T) -> T + Sync,
{
    let clip = bbox.intersection(&dense.bbox());
    if clip.is_empty() {
        return;
    }
    let mut offsets: Vec<usize> = {
        let view: &Dense<T, L> = dense;
        clip.iter().map(|xyz| view.coord_to_offset(xyz)).collect()
    };
    offsets.sort_unstable();
    let slab = dense.strides()[L::ORDER[0]].max(1);
    let mut slabs = dense.slabs_mut();
    parallel::for_each_mut(&mut slabs, grain_size, |_, (i, values)| {
        let start = *i * slab;
        let lo = offsets.partition_point(|&n| n < start);
        let hi = offsets.partition_point(|&n| n < start + values.len());
        for &n in &offsets[lo..hi] {
            values[n - start] = op(values[n - start]);
        }
    });
}

/// How a source value `v` with weight `alpha` is blended into a dense value `u`.
/// With `w = strength * alpha`:
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompositeOp {
    /// `u + w * (beta * v - u)`
    #[default]
    Over,
    /// `u + w * v`
    Add,
    /// `u - w * v`
    Sub,
    /// `(1 - w) * u + w * min(u, v)`
    Min,
    /// `(1 - w) * u + w * max(u, v)`
    Max,
    /// `(1 - w) * u + w * u * v`
    Mult,
}

impl CompositeOp {
    pub fn apply<T: RealValue>(self, u: T, alpha: T, v: T, strength: T, beta: T) -> T {
        let (u, v) = (u.to_f64(), v.to_f64());
        let w = strength.to_f64() * alpha.to_f64();
        let out = match self {
            CompositeOp::Over => u + w * (beta.to_f64() * v - u),
            CompositeOp::Add => u + w * v,
            CompositeOp::Sub => u - w * v,
            CompositeOp::Min => (1.0 - w) * u + w * u.min(v),
            CompositeOp::Max => (1.0 - w) * u + w * u.max(v),
            CompositeOp::Mult => (1.0 - w) * u + w * u * v,
        };
        T::from_f64(out)
    }
}

/// Composites the active values of a source tree onto a dense buffer, weighting each by
/// the `alpha` tree's value at the same coordinate.
///
/// [`sparse_composite`](Self::sparse_composite) walks the source, which is cheaper for
/// sparse sources; [`dense_composite`](Self::dense_composite) walks the buffer. Both
/// produce identical buffers.
pub struct SparseToDenseCompositor<'a, T, L = LayoutZyx> {
    dense: &'a mut Dense<T, L>,
    source: &'a Tree<T>,
    alpha: &'a Tree<T>,
    beta: T,
    strength: T,
    op: CompositeOp,
}

impl<'a, T: RealValue, L: DenseLayout> SparseToDenseCompositor<'a, T, L> {
    pub fn new(
        dense: &'a mut Dense<T, L>,
        source: &'a Tree<T>,
        alpha: &'a Tree<T>,
        beta: T,
        strength: T,
        op: CompositeOp,
    ) -> Self {
        Self { dense, source, alpha, beta, strength, op }
    }

    fn blend(&self, u: T, alpha: T, v: T) -> T {
        self.op.apply(u, alpha, v, self.strength, self.beta)
    }

    pub fn sparse_composite(&mut self, grain_size: usize) {
        let _span = debug_span!("sparse_composite", op = ?self.op).entered();
        let domain = self.dense.bbox();
        let leaves: Vec<&LeafNode<T>> = self
            .source
            .leaves()
            .filter(|l| CoordBBox::create_cube(l.origin(), 8).has_overlap(&domain))
            .collect();
        let this = &*self;
        let mut updates: Vec<(usize, T)> = parallel::map(&leaves, grain_size, |_, leaf| {
            let alpha = this.alpha.accessor();
            leaf.mask()
                .iter_on()
                .map(|n| (n, leaf.offset_to_global_coord(n)))
                .filter(|(_, xyz)| domain.contains(*xyz))
                .map(|(n, xyz)| {
                    let d = this.dense.coord_to_offset(xyz);
                    (d, this.blend(this.dense.values()[d], alpha.value(xyz), leaf.value_at(n)))
                })
                .collect::<Vec<_>>()
        })
        .into_iter()
        .flatten()
        .collect();

        let alpha = self.alpha.accessor();
        for tile in self.source.iter_values_on().tiles_only() {
            for xyz in tile.bounding_box().intersection(&domain) {
                let n = self.dense.coord_to_offset(xyz);
                updates.push((n, self.blend(self.dense.values()[n], alpha.value(xyz), tile.value())));
            }
        }

        let values = self.dense.values_mut();
        for (n, value) in &updates {
            values[*n] = *value;
        }
        debug!(updated = updates.len(), "composited");
    }

    pub fn dense_composite(&mut self, grain_size: usize) {
        let _span = debug_span!("dense_composite", op = ?self.op).entered();
        let (source, alpha_tree) = (self.source, self.alpha);
        let (op, strength, beta) = (self.op, self.strength, self.beta);
        let (domain, strides) = (self.dense.bbox(), self.dense.strides());
        let slab = strides[L::ORDER[0]].max(1);
        let mut slabs = self.dense.slabs_mut();
        parallel::for_each_mut(&mut slabs, grain_size, |_, (i, values)| {
            let (src, alpha) = (source.accessor(), alpha_tree.accessor());
            for (j, u) in values.iter_mut().enumerate() {
                let xyz = offset_to_coord::<L>(&domain, &strides, *i * slab + j);
                let (v, on) = src.probe_value(xyz);
                if on {
                    *u = op.apply(*u, alpha.value(xyz), v, strength, beta);
                }
            }
        });
        debug!(voxels = domain.volume(), "composited");
    }
}

/// Composites `source` onto `dense` with `op`, walking the source's active values.
pub fn composite_to_dense<T: RealValue, L: DenseLayout>(
    dense: &mut Dense<T, L>,
    source: &Tree<T>,
    alpha: &Tree<T>,
    beta: T,
    strength: T,
    op: CompositeOp,
    grain_size: usize,
) {
    SparseToDenseCompositor::new(dense, source, alpha, beta, strength, op).sparse_composite(grain_size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::dense::LayoutXyz;

    const MIJK: Coord = Coord::new(1, -2, 14);

    fn domain() -> CoordBBox {
        CoordBBox::new(Coord::new(-100, -16, 12), Coord::new(90, 103, 100))
    }

    fn above(cutoff: f32) -> impl Fn(f32) -> Option<f32> + Sync {
        move |v| (v > cutoff).then_some(v)
    }

    #[test]
    fn extract_float_tree() {
        let mut dense = Dense::<f32, LayoutZyx>::new(domain(), 0.0);
        dense.set_value(MIJK, 1.0);
        let result = extract_sparse_tree(&dense, above(0.5), 0.0f32, 1);
        assert_eq!(result.active_voxel_count(), 1);
        assert_eq!(result.leaf_count(), 1);
        assert_eq!(result.background(), 0.0);
        assert_eq!(result.value(MIJK), 1.0);
    }

    #[test]
    fn extract_bool_tree() {
        let mut dense = Dense::<f32, LayoutZyx>::new(domain(), 0.0);
        dense.set_value(MIJK, 1.0);
        let result = extract_sparse_tree(&dense, |v: f32| (v > 0.5).then_some(true), false, 0);
        assert_eq!(result.active_voxel_count(), 1);
        assert_eq!(result.leaf_count(), 1);
        assert!(!result.background());
        assert!(result.value(MIJK));
    }

    #[test]
    fn extract_from_alternate_layout() {
        let mut dense = Dense::<f32, LayoutXyz>::new(domain(), 0.0);
        dense.set_value(MIJK, 1.0);
        let result = extract_sparse_tree(&dense, above(0.5), 0.0f32, 1);
        assert_eq!(result.active_voxel_count(), 1);
        assert_eq!(result.leaf_count(), 1);
        assert_eq!(result.value(MIJK), 1.0);
    }

    #[test]
    fn extract_with_mask_ignores_points_outside_the_box() {
        let mut dense = Dense::<f32, LayoutZyx>::new(domain(), 0.0);
        dense.set_value(MIJK, 1.0);
        let mut mask = Tree::new(0.0f32);
        mask.set_value(MIJK, 5.0);
        mask.set_value(domain().min - Coord::splat(3), 1.0);

        let result = extract_sparse_tree_with_mask(&dense, &mask, 10.0);
        assert_eq!(result.active_voxel_count(), 1);
        assert_eq!(result.leaf_count(), 1);
        assert_eq!(result.background(), 10.0);
        assert_eq!(result.value(MIJK), 1.0);
    }

    #[test]
    fn transform_dense_only_inside_the_box() {
        let domain = CoordBBox::new(Coord::new(-4, -6, 10), Coord::new(1, 2, 15));
        let small = CoordBBox::new(Coord::new(-5, -5, 11), Coord::new(0, 1, 13));
        for grain in [0, 1, 3] {
            let mut dense = Dense::<f32, LayoutZyx>::new(domain, 0.0);
            dense.fill(2.0);
            transform_dense(&mut dense, &small, |v| v * v, grain);
            for ijk in domain {
                let expected = if small.contains(ijk) { 4.0 } else { 2.0 };
                assert_eq!(dense.value(ijk), expected);
            }
        }
    }

    #[test]
    fn over_agrees_across_paths() {
        let domain = CoordBBox::new(Coord::new(-10, 0, 5), Coord::new(10, 5, 10));
        let ijk = domain.min + Coord::splat(1);
        let (value, strength, beta) = (2.0f32, 1.0f32, 1.0f32);
        let mut src = Tree::new(0.0f32);
        src.set_value(ijk, 1.0);
        let mut alpha = Tree::new(0.0f32);
        alpha.set_value(ijk, 1.0);
        let expected = CompositeOp::Over.apply(value, alpha.value(ijk), src.value(ijk), strength, beta);
        assert_eq!(expected, 1.0);

        let mut bulk = Dense::<f32, LayoutZyx>::new(domain, value);
        composite_to_dense(&mut bulk, &src, &alpha, beta, strength, CompositeOp::Over, 1);
        assert_eq!(bulk.value(ijk), expected);
        assert_eq!(bulk.value(ijk + Coord::splat(1)), value);

        let mut sparse = Dense::<f32, LayoutZyx>::new(domain, value);
        SparseToDenseCompositor::new(&mut sparse, &src, &alpha, beta, strength, CompositeOp::Over)
            .sparse_composite(1);
        let mut dense = Dense::<f32, LayoutZyx>::new(domain, value);
        SparseToDenseCompositor::new(&mut dense, &src, &alpha, beta, strength, CompositeOp::Over)
            .dense_composite(1);
        assert_eq!(sparse.values(), bulk.values());
        assert_eq!(dense.values(), bulk.values());
    }

    #[test]
    fn every_op_agrees_across_paths_with_tiles() {
        let domain = CoordBBox::new(Coord::new(-6, -3, 0), Coord::new(20, 9, 12));
        let mut src = Tree::new(0.0f32);
        src.fill(&CoordBBox::create_cube(Coord::new(8, 0, 0), 8), 0.75, true);
        src.set_value(Coord::new(-2, 1, 3), 3.0);
        src.set_value(Coord::new(-40, 1, 3), 9.0);
        let mut alpha = Tree::new(0.5f32);
        alpha.set_value(Coord::new(9, 1, 1), 0.25);
        let ops = [
            CompositeOp::Over,
            CompositeOp::Add,
            CompositeOp::Sub,
            CompositeOp::Min,
            CompositeOp::Max,
            CompositeOp::Mult,
        ];
        for op in ops {
            let mut a = Dense::<f32, LayoutXyz>::new(domain, 1.5);
            let mut b = a.clone();
            SparseToDenseCompositor::new(&mut a, &src, &alpha, 0.8, 0.9, op).sparse_composite(2);
            SparseToDenseCompositor::new(&mut b, &src, &alpha, 0.8, 0.9, op).dense_composite(0);
            assert_eq!(a.values(), b.values(), "{op:?}");
            assert_eq!(a.value(Coord::new(0, 0, 0)), 1.5);
            if op != CompositeOp::Max {
                assert_ne!(a.value(Coord::new(9, 1, 1)), 1.5, "{op:?}");
            }
        }
    }
}
