use super::Tree;
use super::leaf::LeafNode;
use crate::parallel;
use crate::value::GridValue;

/// Snapshot of a tree's leaves, in traversal order, for leaf-parallel work.
///
/// Holding the manager borrows the tree mutably, so the leaf set cannot change under it.
/// Leaf `i` here is the same leaf as the `i`-th item of [`Tree::leaves`].
pub struct LeafManager<'a, T> {
    leaves: Vec<&'a mut LeafNode<T>>,
}

impl<'a, T: GridValue> LeafManager<'a, T> {
    pub fn new(tree: &'a mut Tree<T>) -> Self {
        Self {
            leaves: tree.leaves_mut(),
        }
    }
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }
    pub fn leaf(&self, i: usize) -> &LeafNode<T> {
        &*self.leaves[i]
    }
    pub fn leaf_mut(&mut self, i: usize) -> &mut LeafNode<T> {
        &mut *self.leaves[i]
    }
    pub fn iter(&self) -> impl Iterator<Item = &LeafNode<T>> + '_ {
        self.leaves.iter().map(|l| &**l)
    }

    /// Runs `op(index, leaf)` over every leaf; see [`parallel::for_each_mut`] for `grain_size`.
    pub fn foreach<F>(&mut self, grain_size: usize, op: F)
    where
        F: Fn(usize, &mut LeafNode<T>) + Sync,
    {
        parallel::for_each_mut(&mut self.leaves, grain_size, |i, leaf| op(i, leaf));
    }

    /// Parallel reduction over the leaves with an explicit join step.
    pub fn reduce<A, Id, Fo, Jo>(&self, grain_size: usize, identity: Id, fold: Fo, join: Jo) -> A
    where
        A: Send,
        Id: Fn() -> A + Sync,
        Fo: Fn(&mut A, &LeafNode<T>) + Sync,
        Jo: Fn(&mut A, A),
    {
        parallel::reduce(&self.leaves, grain_size, identity, |a, leaf| fold(a, leaf), join)
    }

    /// Replaces every leaf's values with `buffers[i]` (the auxiliary buffer swap step).
    pub fn swap_buffers(&mut self, buffers: &mut [Vec<T>], grain_size: usize) {
        let mut pairs: Vec<(&mut &'a mut LeafNode<T>, &mut Vec<T>)> =
            self.leaves.iter_mut().zip(buffers.iter_mut()).collect();
        parallel::for_each_mut(&mut pairs, grain_size, |_, (leaf, buffer)| {
            leaf.values_mut().swap_with_slice(buffer.as_mut_slice());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Coord, CoordBBox};

    fn tree() -> Tree<f32> {
        let mut tree = Tree::new(0.0);
        for xyz in CoordBBox::new(Coord::splat(-20), Coord::splat(20)).iter().step_by(5) {
            tree.set_value(xyz, 1.0);
        }
        tree
    }

    #[test]
    fn serial_and_parallel_foreach_agree() {
        let mut a = tree();
        let mut b = tree();
        a.leaf_manager().foreach(0, |i, leaf| leaf.values_mut()[0] = i as f32);
        b.leaf_manager().foreach(2, |i, leaf| leaf.values_mut()[0] = i as f32);
        let va: Vec<f32> = a.leaves().map(|l| l.value_at(0)).collect();
        let vb: Vec<f32> = b.leaves().map(|l| l.value_at(0)).collect();
        assert_eq!(va, vb);
        assert_eq!(va.len(), a.leaf_count());
    }

    #[test]
    fn reduce_counts_active_voxels() {
        let mut t = tree();
        let expected = t.active_voxel_count();
        let manager = t.leaf_manager();
        for grain in [0, 1, 4] {
            let n = manager.reduce(grain, || 0u64, |n, leaf| *n += leaf.on_voxel_count(), |a, b| *a += b);
            assert_eq!(n, expected);
        }
    }

    #[test]
    fn buffer_swap_installs_new_values() {
        let mut t = tree();
        let count = t.leaf_count();
        let mut buffers = vec![vec![7.0f32; LeafNode::<f32>::SIZE]; count];
        t.leaf_manager().swap_buffers(&mut buffers, 1);
        assert!(t.leaves().all(|l| l.values().iter().all(|v| *v == 7.0)));
        assert!(buffers.iter().all(|b| b.len() == LeafNode::<f32>::SIZE));
    }
}
