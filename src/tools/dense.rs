//! Fully materialized boxes of values, and copies between them and trees.

use std::fmt::Debug;
use std::marker::PhantomData;

use bytemuck::Pod;
use tracing::{debug, debug_span};

use crate::error::{Error, Result};
use crate::math::{Coord, CoordBBox};
use crate::parallel;
use crate::tree::{LeafNode, Node, Tree, aligned_blocks};
use crate::value::GridValue;

/// Memory order of a [`Dense`] buffer.
pub trait DenseLayout: Copy + Default + Debug + Send + Sync + 'static {
    /// Axes from slowest to fastest varying.
    const ORDER: [usize; 3];
}

/// `x` slowest, `z` fastest (the order of [`CoordBBox`] iteration).
#[derive(Clone, Copy, Debug, Default)]
pub struct LayoutZyx;

/// `z` slowest, `x` fastest.
#[derive(Clone, Copy, Debug, Default)]
pub struct LayoutXyz;

impl DenseLayout for LayoutZyx {
    const ORDER: [usize; 3] = [0, 1, 2];
}

impl DenseLayout for LayoutXyz {
    const ORDER: [usize; 3] = [2, 1, 0];
}

/// A value for every coordinate of `bbox`, stored contiguously.
#[derive(Clone, Debug)]
pub struct Dense<T, L = LayoutZyx> {
    bbox: CoordBBox,
    strides: [usize; 3],
    data: Vec<T>,
    layout: PhantomData<L>,
}

impl<T: GridValue, L: DenseLayout> Dense<T, L> {
    pub fn new(bbox: CoordBBox, value: T) -> Self {
        Self {
            bbox,
            strides: Self::strides_for(&bbox),
            data: vec![value; bbox.volume() as usize],
            layout: PhantomData,
        }
    }

    fn strides_for(bbox: &CoordBBox) -> [usize; 3] {
        if bbox.is_empty() {
            return [0; 3];
        }
        let dim = bbox.dim();
        let [slow, mid, fast] = L::ORDER;
        let mut strides = [0; 3];
        strides[fast] = 1;
        strides[mid] = dim[fast] as usize;
        strides[slow] = dim[fast] as usize * dim[mid] as usize;
        strides
    }

    pub fn bbox(&self) -> CoordBBox {
        self.bbox
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    /// Element step per unit move along each axis.
    pub fn strides(&self) -> [usize; 3] {
        self.strides
    }
    pub fn values(&self) -> &[T] {
        &self.data
    }
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Offset of `xyz` in the buffer. `xyz` must lie inside the box.
    #[inline]
    pub fn coord_to_offset(&self, xyz: Coord) -> usize {
        let l = xyz - self.bbox.min;
        l.x as usize * self.strides[0] + l.y as usize * self.strides[1] + l.z as usize * self.strides[2]
    }

    pub fn offset_to_coord(&self, n: usize) -> Coord {
        offset_to_coord::<L>(&self.bbox, &self.strides, n)
    }

    pub fn get(&self, xyz: Coord) -> Option<T> {
        self.bbox.contains(xyz).then(|| self.data[self.coord_to_offset(xyz)])
    }

    /// # Panics
    /// If `xyz` is outside the box.
    pub fn value(&self, xyz: Coord) -> T {
        self.data[self.coord_to_offset(xyz)]
    }

    /// # Panics
    /// If `xyz` is outside the box.
    pub fn set_value(&mut self, xyz: Coord, value: T) {
        let n = self.coord_to_offset(xyz);
        self.data[n] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// The buffer split into slabs along the slowest axis, each with its index.
    pub(crate) fn slabs_mut(&mut self) -> Vec<(usize, &mut [T])> {
        let slab = self.strides[L::ORDER[0]].max(1);
        self.data.chunks_mut(slab).enumerate().collect()
    }
}

pub(crate) fn offset_to_coord<L: DenseLayout>(bbox: &CoordBBox, strides: &[usize; 3], mut n: usize) -> Coord {
    let mut local = Coord::ZERO;
    for axis in L::ORDER {
        local[axis] = (n / strides[axis]) as i32;
        n %= strides[axis];
    }
    bbox.min + local
}

impl<T: GridValue + Pod, L: DenseLayout> Dense<T, L> {
    /// The raw buffer, for handing to raster code.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Rebuilds a buffer over `bbox` from raw bytes in this layout.
    pub fn from_bytes(bbox: CoordBBox, bytes: &[u8]) -> Result<Self> {
        let size = std::mem::size_of::<T>();
        let expected = bbox.volume() as usize * size;
        if bytes.len() != expected {
            return Err(Error::value(format!(
                "dense buffer over {bbox:?} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        let data = bytes.chunks_exact(size).map(bytemuck::pod_read_unaligned).collect();
        Ok(Self {
            bbox,
            strides: Self::strides_for(&bbox),
            data,
            layout: PhantomData,
        })
    }
}

/// Writes the value of `tree` at every coordinate of `dense`.
pub fn copy_to_dense<T: GridValue, L: DenseLayout>(tree: &Tree<T>, dense: &mut Dense<T, L>, grain_size: usize) {
    let _span = debug_span!("copy_to_dense", voxels = dense.len()).entered();
    let (bbox, strides) = (dense.bbox(), dense.strides());
    let slab = strides[L::ORDER[0]];
    let mut slabs = dense.slabs_mut();
    parallel::for_each_mut(&mut slabs, grain_size, |_, (i, values)| {
        let acc = tree.accessor();
        for (j, v) in values.iter_mut().enumerate() {
            *v = acc.value(offset_to_coord::<L>(&bbox, &strides, *i * slab + j));
        }
    });
}

/// Overwrites the region of `tree` covered by `dense`. Values within `tolerance` of the
/// background become inactive background; everything else is stored active.
pub fn copy_from_dense<T: GridValue, L: DenseLayout>(
    dense: &Dense<T, L>,
    tree: &mut Tree<T>,
    tolerance: T,
    grain_size: usize,
) {
    let _span = debug_span!("copy_from_dense", voxels = dense.len()).entered();
    let bbox = dense.bbox();
    let background = tree.background();
    let log2 = <LeafNode<T> as Node<T>>::TOTAL;
    let blocks: Vec<(Coord, CoordBBox)> = aligned_blocks(bbox, log2).collect();

    let built = {
        let src: &Tree<T> = tree;
        parallel::map(&blocks, grain_size, |_, &(origin, sub)| {
            let full = sub.volume() == LeafNode::<T>::SIZE as u64;
            let mut leaf = if full {
                LeafNode::new(origin, background)
            } else if let Some(existing) = src.probe_leaf(origin) {
                existing.clone()
            } else {
                let (value, active) = src.probe_value(origin);
                <LeafNode<T> as Node<T>>::new_filled(origin, value, active)
            };
            for xyz in sub {
                let v = dense.value(xyz);
                let n = LeafNode::<T>::coord_to_offset(xyz);
                if v.is_approx_equal(&background, &tolerance) {
                    leaf.set_value_at(n, background, false);
                } else {
                    leaf.set_value_at(n, v, true);
                }
            }
            let empty = leaf.is_empty() && leaf.values().iter().all(|v| *v == background);
            (full && empty, leaf)
        })
    };

    for (clear, leaf) in built {
        if clear {
            let cube = CoordBBox::create_cube(leaf.origin(), 1 << log2);
            tree.fill(&cube, background, false);
        } else {
            tree.add_leaf(leaf);
        }
    }
    debug!(active = tree.active_voxel_count(), leaves = tree.leaf_count(), "copied from dense");
}
