//! Dilation and erosion of a tree's active topology.
//!
//! Both operate one layer per iteration. A layer is computed from a frozen view of the
//! leaves in parallel, then written back leaf by leaf, so the result is the same for
//! every grain size.

use tracing::{debug, debug_span, trace};

use crate::math::{Coord, CoordBBox, neighbor_offsets};
use crate::parallel::{self, CancelToken, Completion, DEFAULT_GRAIN_SIZE, was_cancelled};
use crate::tree::{LeafMask, LeafNode, Node, Tree};
use crate::value::GridValue;

/// Which neighbours of a voxel count as adjacent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Connectivity {
    /// 6 neighbours sharing a face.
    #[default]
    Face,
    /// 18 neighbours sharing a face or an edge.
    FaceEdge,
    /// All 26 neighbours.
    FaceEdgeVertex,
}

impl Connectivity {
    fn max_nonzero_axes(self) -> usize {
        match self {
            Connectivity::Face => 1,
            Connectivity::FaceEdge => 2,
            Connectivity::FaceEdgeVertex => 3,
        }
    }
    pub fn neighbor_count(self) -> usize {
        match self {
            Connectivity::Face => 6,
            Connectivity::FaceEdge => 18,
            Connectivity::FaceEdgeVertex => 26,
        }
    }
    /// Offsets to the neighbours, faces first.
    pub fn offsets(self) -> Vec<Coord> {
        neighbor_offsets(self.max_nonzero_axes())
    }
}

/// How dilation treats active tiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TilePolicy {
    /// Tiles neither grow nor get voxelized; only leaf voxels dilate.
    #[default]
    IgnoreTiles,
    /// Active tiles are voxelized first and then dilate like any other voxels.
    ExpandTiles,
    /// Active tiles stay tiles; the voxels bordering them are activated.
    PreserveTiles,
}

#[derive(Clone, Debug)]
pub struct MorphologyConfig {
    pub iterations: usize,
    pub connectivity: Connectivity,
    pub tile_policy: TilePolicy,
    pub grain_size: usize,
    pub cancel: Option<CancelToken>,
}

impl Default for MorphologyConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            connectivity: Connectivity::Face,
            tile_policy: TilePolicy::IgnoreTiles,
            grain_size: DEFAULT_GRAIN_SIZE,
            cancel: None,
        }
    }
}

impl MorphologyConfig {
    pub fn new(iterations: usize, connectivity: Connectivity) -> Self {
        Self {
            iterations,
            connectivity,
            ..Default::default()
        }
    }
    pub fn with_tile_policy(mut self, tile_policy: TilePolicy) -> Self {
        self.tile_policy = tile_policy;
        self
    }
    pub fn with_grain_size(mut self, grain_size: usize) -> Self {
        self.grain_size = grain_size;
        self
    }
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Grows the active topology by `config.iterations` layers.
///
/// Newly activated voxels keep whatever value they held, so voxels activated in
/// untouched space read as the background.
pub fn dilate_active_values<T: GridValue>(tree: &mut Tree<T>, config: &MorphologyConfig) -> Completion {
    let _span = debug_span!(
        "dilate_active_values",
        iterations = config.iterations,
        connectivity = ?config.connectivity,
        tile_policy = ?config.tile_policy
    )
    .entered();
    let before = tree.active_voxel_count();
    if config.tile_policy == TilePolicy::ExpandTiles {
        tree.voxelize_active_tiles();
    }
    let offsets = config.connectivity.offsets();
    for iteration in 0..config.iterations {
        if was_cancelled(config.cancel.as_ref()) {
            debug!(iteration, "dilation cancelled");
            return Completion::Cancelled;
        }
        // Tile borders only need activating once; later layers grow from those voxels.
        let tiles = if config.tile_policy == TilePolicy::PreserveTiles && iteration == 0 {
            active_tile_boxes(tree)
        } else {
            Vec::new()
        };
        dilate_leaves(tree, &offsets, config.grain_size);
        for bbox in &tiles {
            activate_tile_border(tree, bbox, config.connectivity);
        }
        trace!(iteration, active = tree.active_voxel_count(), "dilated one layer");
    }
    debug!(
        before,
        after = tree.active_voxel_count(),
        leaves = tree.leaf_count(),
        "dilation finished"
    );
    Completion::Finished
}

/// Shrinks the active topology by `config.iterations` layers. A voxel survives a layer
/// only if every neighbour is active; active tiles count as active and are never eroded.
/// Nodes left without active values are pruned to background tiles at the end.
pub fn erode_active_values<T: GridValue>(tree: &mut Tree<T>, config: &MorphologyConfig) -> Completion {
    let _span = debug_span!(
        "erode_active_values",
        iterations = config.iterations,
        connectivity = ?config.connectivity
    )
    .entered();
    let before = tree.active_voxel_count();
    let offsets = config.connectivity.offsets();
    let mut completion = Completion::Finished;
    for iteration in 0..config.iterations {
        if was_cancelled(config.cancel.as_ref()) {
            debug!(iteration, "erosion cancelled");
            completion = Completion::Cancelled;
            break;
        }
        let masks: Vec<LeafMask> = {
            let frozen: &Tree<T> = tree;
            let leaves: Vec<&LeafNode<T>> = frozen.leaves().collect();
            parallel::map(&leaves, config.grain_size, |_, leaf| erode_leaf(frozen, leaf, &offsets))
        };
        tree.leaf_manager()
            .foreach(config.grain_size, |i, leaf| leaf.set_mask(masks[i]));
        trace!(iteration, active = tree.active_voxel_count(), "eroded one layer");
    }
    tree.prune_inactive();
    debug!(
        before,
        after = tree.active_voxel_count(),
        leaves = tree.leaf_count(),
        "erosion finished"
    );
    completion
}

/// Dilation that cannot be cancelled, with the default tile policy.
pub fn dilate_voxels<T: GridValue>(tree: &mut Tree<T>, iterations: usize, connectivity: Connectivity) {
    let completion = dilate_active_values(tree, &MorphologyConfig::new(iterations, connectivity));
    debug_assert!(completion.is_finished());
}

/// Erosion that cannot be cancelled.
pub fn erode_voxels<T: GridValue>(tree: &mut Tree<T>, iterations: usize, connectivity: Connectivity) {
    let completion = erode_active_values(tree, &MorphologyConfig::new(iterations, connectivity));
    debug_assert!(completion.is_finished());
}

#[inline]
fn inside_leaf(local: Coord) -> bool {
    let dim = <LeafNode<f32> as Node<f32>>::DIM;
    (0..dim).contains(&local.x) && (0..dim).contains(&local.y) && (0..dim).contains(&local.z)
}

/// New mask of one leaf after a layer of growth, plus the coordinates that spill into
/// neighbouring leaves.
fn dilate_leaf<T: GridValue>(leaf: &LeafNode<T>, offsets: &[Coord]) -> (LeafMask, Vec<Coord>) {
    let mut mask = *leaf.mask();
    let mut spill = Vec::new();
    for n in leaf.mask().iter_on() {
        let local = LeafNode::<T>::offset_to_local_coord(n);
        for d in offsets {
            let p = local + *d;
            if inside_leaf(p) {
                mask.set_on(LeafNode::<T>::coord_to_offset(p));
            } else {
                spill.push(leaf.origin() + p);
            }
        }
    }
    spill.sort_unstable();
    spill.dedup();
    (mask, spill)
}

fn dilate_leaves<T: GridValue>(tree: &mut Tree<T>, offsets: &[Coord], grain_size: usize) {
    let grown: Vec<(LeafMask, Vec<Coord>)> = {
        let leaves: Vec<&LeafNode<T>> = tree.leaves().collect();
        parallel::map(&leaves, grain_size, |_, leaf| dilate_leaf(leaf, offsets))
    };
    tree.leaf_manager()
        .foreach(grain_size, |i, leaf| leaf.set_mask(grown[i].0));
    let mut acc = tree.accessor_mut();
    for (_, spill) in &grown {
        for xyz in spill {
            acc.set_active_state(*xyz, true);
        }
    }
}

fn erode_leaf<T: GridValue>(tree: &Tree<T>, leaf: &LeafNode<T>, offsets: &[Coord]) -> LeafMask {
    let acc = tree.accessor();
    let mut mask = *leaf.mask();
    for n in leaf.mask().iter_on() {
        let local = LeafNode::<T>::offset_to_local_coord(n);
        let keep = offsets.iter().all(|d| {
            let p = local + *d;
            if inside_leaf(p) {
                leaf.is_on_at(LeafNode::<T>::coord_to_offset(p))
            } else {
                acc.is_value_on(leaf.origin() + p)
            }
        });
        if !keep {
            mask.set_off(n);
        }
    }
    mask
}

fn active_tile_boxes<T: GridValue>(tree: &Tree<T>) -> Vec<CoordBBox> {
    tree.iter_values_on()
        .tiles_only()
        .map(|item| item.bounding_box())
        .collect()
}

/// Activates the one-voxel border of `bbox` reachable under `connectivity`: faces always,
/// edge strips and corners only for the wider connectivities.
fn activate_tile_border<T: GridValue>(tree: &mut Tree<T>, bbox: &CoordBBox, connectivity: Connectivity) {
    for d in connectivity.offsets() {
        let mut border = *bbox;
        for axis in 0..3 {
            match d[axis] {
                -1 => {
                    border.min[axis] = bbox.min[axis] - 1;
                    border.max[axis] = bbox.min[axis] - 1;
                }
                1 => {
                    border.min[axis] = bbox.max[axis] + 1;
                    border.max[axis] = bbox.max[axis] + 1;
                }
                _ => {}
            }
        }
        tree.set_active_state_in(&border, true);
    }
}
