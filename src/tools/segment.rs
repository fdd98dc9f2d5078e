//! Splitting a grid into face-connected components.

use std::collections::HashMap;

use tracing::{debug, debug_span};

use super::level_set::sdf_interior_mask;
use super::morphology::{Connectivity, MorphologyConfig, TilePolicy, dilate_active_values};
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::math::{Coord, CoordBBox};
use crate::parallel::{self, DEFAULT_GRAIN_SIZE};
use crate::tree::{LeafNode, LowerNode, Node, RootNode, Tree, UpperNode, aligned_blocks};
use crate::value::{GridValue, RealValue};

struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), rank: vec![0; n] }
    }
    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }
    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            std::cmp::Ordering::Less => self.parent[a] = b,
            std::cmp::Ordering::Greater => self.parent[b] = a,
            std::cmp::Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] += 1;
            }
        }
    }
}

/// Element ids: active tiles first, then `leaf * SIZE + offset` for leaf voxels.
struct Topology<'a, T> {
    tree: &'a Tree<T>,
    leaves: Vec<&'a LeafNode<T>>,
    leaf_index: HashMap<Coord, usize>,
    tiles: Vec<CoordBBox>,
    tile_index: HashMap<(u32, Coord), usize>,
    tile_levels: Vec<u32>,
}

impl<'a, T: GridValue> Topology<'a, T> {
    fn new(tree: &'a Tree<T>) -> Self {
        let leaves: Vec<_> = tree.leaves().collect();
        let leaf_index = leaves.iter().enumerate().map(|(k, l)| (l.origin(), k)).collect();
        let tiles: Vec<CoordBBox> = tree
            .iter_values_on()
            .tiles_only()
            .map(|t| t.bounding_box())
            .collect();
        let mut tile_levels = Vec::new();
        let mut tile_index = HashMap::new();
        for (i, bbox) in tiles.iter().enumerate() {
            let log2 = bbox.dim().x.trailing_zeros();
            if !tile_levels.contains(&log2) {
                tile_levels.push(log2);
            }
            tile_index.insert((log2, bbox.min), i);
        }
        Self { tree, leaves, leaf_index, tiles, tile_index, tile_levels }
    }

    fn element_count(&self) -> usize {
        self.tiles.len() + self.leaves.len() * LeafNode::<T>::SIZE
    }

    fn voxel_id(&self, leaf: usize, offset: usize) -> usize {
        self.tiles.len() + leaf * LeafNode::<T>::SIZE + offset
    }

    /// The active tile covering the whole `1 << log2` block at `origin`, if any.
    fn tile_at(&self, origin: Coord, log2: u32) -> Option<usize> {
        self.tile_levels
            .iter()
            .filter(|&&level| level >= log2)
            .find_map(|&level| self.tile_index.get(&(level, origin.aligned(level))).copied())
    }

    /// The element holding the active value at `xyz`, if any.
    fn element_at(&self, xyz: Coord) -> Option<usize> {
        match self.leaf_index.get(&xyz.aligned(3)) {
            Some(&k) => {
                let n = LeafNode::<T>::coord_to_offset(xyz);
                self.leaves[k].is_on_at(n).then(|| self.voxel_id(k, n))
            }
            None => self.tile_at(xyz, 0),
        }
    }

    fn voxel_edges(&self, k: usize) -> Vec<(usize, usize)> {
        let leaf = self.leaves[k];
        let mut edges = Vec::new();
        for n in leaf.mask().iter_on() {
            let xyz = leaf.offset_to_global_coord(n);
            for axis in 0..3 {
                let mut next = xyz;
                next[axis] += 1;
                if let Some(other) = self.element_at(next) {
                    edges.push((self.voxel_id(k, n), other));
                }
            }
        }
        edges
    }

    /// Every element face-adjacent to tile `i`.
    fn tile_edges(&self, i: usize) -> Vec<(usize, usize)> {
        let bbox = self.tiles[i];
        let mut hits = Vec::new();
        for axis in 0..3 {
            let mut below = bbox;
            below.min[axis] = bbox.min[axis] - 1;
            below.max[axis] = bbox.min[axis] - 1;
            let mut above = bbox;
            above.min[axis] = bbox.max[axis] + 1;
            above.max[axis] = bbox.max[axis] + 1;
            self.collect_in(below, RootNode::<T>::TILE_LOG2, &mut hits);
            self.collect_in(above, RootNode::<T>::TILE_LOG2, &mut hits);
        }
        hits.into_iter().map(|h| (i, h)).collect()
    }

    fn collect_in(&self, region: CoordBBox, log2: u32, hits: &mut Vec<usize>) {
        let leaf_log2 = <LeafNode<T> as Node<T>>::TOTAL;
        for (origin, sub) in aligned_blocks(region, log2) {
            if let Some(t) = self.tile_at(origin, log2) {
                hits.push(t);
                continue;
            }
            if log2 == leaf_log2 {
                if let Some(&k) = self.leaf_index.get(&origin) {
                    let leaf = self.leaves[k];
                    hits.extend(sub.iter().filter_map(|xyz| {
                        let n = LeafNode::<T>::coord_to_offset(xyz);
                        leaf.is_on_at(n).then(|| self.voxel_id(k, n))
                    }));
                }
                continue;
            }
            let block = CoordBBox::create_cube(origin, 1 << log2);
            if matches!(self.tree.probe_uniform(&block), Some((_, false))) {
                continue;
            }
            let child = if log2 == <UpperNode<T> as Node<T>>::TOTAL {
                <LowerNode<T> as Node<T>>::TOTAL
            } else {
                leaf_log2
            };
            self.collect_in(sub, child, hits);
        }
    }
}

fn label_of(
    sets: &mut DisjointSets,
    labels: &mut HashMap<usize, usize>,
    masks: &mut Vec<Tree<bool>>,
    id: usize,
) -> usize {
    let root = sets.find(id);
    *labels.entry(root).or_insert_with(|| {
        masks.push(Tree::new(false));
        masks.len() - 1
    })
}

/// One mask per face-connected component of the active values of `tree`, largest first.
pub(crate) fn connected_components<T: GridValue>(tree: &Tree<T>, grain_size: usize) -> Vec<Tree<bool>> {
    let topo = Topology::new(tree);
    let leaf_ids: Vec<usize> = (0..topo.leaves.len()).collect();
    let tile_ids: Vec<usize> = (0..topo.tiles.len()).collect();
    let voxel_edges = parallel::map(&leaf_ids, grain_size, |_, &k| topo.voxel_edges(k));
    let tile_edges = parallel::map(&tile_ids, grain_size, |_, &i| topo.tile_edges(i));

    let mut sets = DisjointSets::new(topo.element_count());
    for (a, b) in voxel_edges.into_iter().chain(tile_edges).flatten() {
        sets.union(a, b);
    }

    let mut labels: HashMap<usize, usize> = HashMap::new();
    let mut masks: Vec<Tree<bool>> = Vec::new();
    for (i, bbox) in topo.tiles.iter().enumerate() {
        let c = label_of(&mut sets, &mut labels, &mut masks, i);
        masks[c].fill(bbox, true, true);
    }
    for (k, leaf) in topo.leaves.iter().enumerate() {
        let mut parts: Vec<(usize, LeafNode<bool>)> = Vec::new();
        for n in leaf.mask().iter_on() {
            let c = label_of(&mut sets, &mut labels, &mut masks, topo.voxel_id(k, n));
            let slot = match parts.iter().position(|(pc, _)| *pc == c) {
                Some(p) => p,
                None => {
                    parts.push((c, LeafNode::new(leaf.origin(), false)));
                    parts.len() - 1
                }
            };
            parts[slot].1.set_value_at(n, true, true);
        }
        for (c, part) in parts {
            masks[c].add_leaf(part);
        }
    }

    let sizes: Vec<u64> = masks.iter().map(|m| m.active_voxel_count()).collect();
    let mut order: Vec<usize> = (0..masks.len()).collect();
    order.sort_by(|a, b| sizes[*b].cmp(&sizes[*a]));
    let mut slots: Vec<Option<Tree<bool>>> = masks.into_iter().map(Some).collect();
    order.into_iter().filter_map(|c| slots[c].take()).collect()
}

/// Copies the values and states of `src` under the active region of `mask`.
fn copy_masked<T: GridValue>(src: &Tree<T>, mask: &Tree<bool>) -> Tree<T> {
    let mut out = Tree::new(src.background());
    let acc = src.accessor();
    for item in mask.iter_values_on() {
        if item.is_voxel_value() {
            let (value, on) = acc.probe_value(item.coord());
            write(&mut out, item.coord(), value, on);
            continue;
        }
        let bbox = item.bounding_box();
        match src.probe_uniform(&bbox) {
            Some((value, on)) => out.fill(&bbox, value, on),
            None => {
                for xyz in bbox {
                    let (value, on) = acc.probe_value(xyz);
                    write(&mut out, xyz, value, on);
                }
            }
        }
    }
    out
}

fn write<T: GridValue>(tree: &mut Tree<T>, xyz: Coord, value: T, on: bool) {
    if on {
        tree.set_value(xyz, value);
    } else {
        tree.set_value_off(xyz, value);
    }
}

fn empty_like<T: GridValue>(grid: &Grid<T>) -> Grid<T> {
    Grid::from_tree(Tree::new(grid.background()))
        .with_transform(*grid.transform())
        .with_class(grid.class())
        .with_name(grid.name())
}

fn with_tree<T: GridValue>(grid: &Grid<T>, tree: Tree<T>) -> Grid<T> {
    Grid::from_tree(tree)
        .with_transform(*grid.transform())
        .with_class(grid.class())
        .with_name(grid.name())
}

/// Splits the active topology into face-connected components, one grid per component,
/// largest first. Overlapping narrow bands count as connected. A grid without active
/// values yields a single empty grid with the same background.
pub fn segment_active_voxels<T: GridValue>(grid: &Grid<T>) -> Vec<Grid<T>> {
    let _span = debug_span!("segment_active_voxels", name = grid.name()).entered();
    if grid.tree().active_voxel_count() == 0 {
        return vec![empty_like(grid)];
    }
    let segments: Vec<Grid<T>> = connected_components(grid.tree(), DEFAULT_GRAIN_SIZE)
        .iter()
        .map(|mask| with_tree(grid, copy_masked(grid.tree(), mask)))
        .collect();
    debug!(segments = segments.len(), "segmented");
    segments
}

/// Splits a level set into its separate surfaces, largest first.
///
/// Components are found on the interior, so shapes whose bands overlap but whose
/// interiors do not stay apart. Each segment keeps its interior and the band within
/// reach of it; everything else is background.
pub fn segment_sdf<T: RealValue>(grid: &Grid<T>) -> Result<Vec<Grid<T>>> {
    let _span = debug_span!("segment_sdf", name = grid.name()).entered();
    grid.require_level_set("segment_sdf")?;
    if grid.tree().active_voxel_count() == 0 {
        return Ok(vec![empty_like(grid)]);
    }
    let voxel_size = grid.transform().uniform_voxel_size()?;
    let half_width = grid.background().to_f64() / voxel_size;
    if !(half_width.is_finite() && half_width > 0.0) {
        return Err(Error::value(format!(
            "level set '{}' has a non-positive background",
            grid.name()
        )));
    }
    let reach = MorphologyConfig::new(half_width.ceil() as usize + 1, Connectivity::FaceEdgeVertex)
        .with_tile_policy(TilePolicy::PreserveTiles);

    let interior = sdf_interior_mask(grid, T::zero());
    let mut segments = Vec::new();
    for mut mask in connected_components(&interior, DEFAULT_GRAIN_SIZE) {
        let done = dilate_active_values(&mut mask, &reach);
        debug_assert!(done.is_finished());
        let mut tree = copy_masked(grid.tree(), &mask);
        super::level_set::prune_level_set(&mut tree);
        segments.push(with_tree(grid, tree));
    }
    if segments.is_empty() {
        segments.push(empty_like(grid));
    }
    debug!(segments = segments.len(), "segmented");
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridClass;
    use crate::math::Transform;
    use crate::tools::composite::csg_union;
    use crate::tools::level_set::create_level_set_box;
    use glam::DVec3;

    #[test]
    fn overlapping_bands_are_one_active_segment_but_two_surfaces() {
        let t = Transform::new(0.1).unwrap();
        let mut a = create_level_set_box::<f32>(DVec3::ZERO, DVec3::splat(2.0), &t, 3.0).unwrap();
        let b = create_level_set_box::<f32>(DVec3::new(2.5, 0.0, 0.0), DVec3::new(4.3, 2.0, 2.0), &t, 3.0)
            .unwrap();
        csg_union(a.tree_mut(), b.tree());

        assert_eq!(segment_active_voxels(&a).len(), 1);

        let segments = segment_sdf(&a).unwrap();
        assert_eq!(segments.len(), 2);
        let inside = t.world_to_index_node_centered(DVec3::splat(1.5));
        let other = t.world_to_index_node_centered(DVec3::splat(3.5));
        assert!(segments[0].tree().value(inside) < 0.0);
        assert!(segments[0].tree().value(other) > 0.0);
        assert_eq!(segments[0].class(), GridClass::LevelSet);
        let second = t.world_to_index_node_centered(DVec3::new(3.4, 1.0, 1.0));
        assert!(segments[1].tree().value(second) < 0.0);
        assert!(segments[1].tree().value(inside) > 0.0);
    }

    #[test]
    fn empty_level_set_is_one_empty_segment() {
        let grid = Grid::new(10.2f32).with_class(GridClass::LevelSet);
        let segments = segment_sdf(&grid).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].tree().leaf_count(), 0);
        assert_eq!(segments[0].background(), 10.2);
    }

    #[test]
    fn level_set_without_active_voxels_is_one_empty_segment() {
        let t = Transform::new(0.1).unwrap();
        let mut grid = create_level_set_box::<f32>(DVec3::ZERO, DVec3::ONE, &t, 5.0).unwrap();
        assert!(grid.active_voxel_count() > 0);
        grid.tree_mut().for_each_value_mut(crate::tree::ValueFilter::On, |v| v.set_active(false));
        assert_eq!(grid.active_voxel_count(), 0);
        let segments = segment_sdf(&grid).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].tree().leaf_count(), 0);
        assert_eq!(segments[0].background(), grid.background());
    }

    #[test]
    fn segment_sdf_needs_a_level_set() {
        let grid = Grid::new(1.0f32);
        assert!(matches!(segment_sdf(&grid), Err(Error::Type(_))));
    }

    #[test]
    fn active_tiles_split_into_regions() {
        let mut grid = Grid::new(0.0f32);
        grid.tree_mut().fill(&CoordBBox::new(Coord::ZERO, Coord::splat(50)), 1.0, true);
        grid.tree_mut().fill(&CoordBBox::new(Coord::splat(60), Coord::splat(100)), 1.0, true);
        assert!(grid.tree().has_active_tiles());
        let segments = segment_active_voxels(&grid);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].active_voxel_count(), 51 * 51 * 51);
        assert_eq!(segments[1].active_voxel_count(), 41 * 41 * 41);
        assert_eq!(segments[1].tree().value(Coord::splat(70)), 1.0);
    }

    #[test]
    fn empty_fog_volumes_are_one_empty_segment() {
        let grid = Grid::new(3.1f32);
        let segments = segment_active_voxels(&grid);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].tree().leaf_count(), 0);
        assert_eq!(segments[0].background(), 3.1);

        let mut touched = Grid::new(0.0f32);
        touched.tree_mut().touch_leaf(Coord::ZERO);
        touched.tree_mut().touch_leaf(Coord::splat(100));
        assert_eq!(touched.tree().leaf_count(), 2);
        let segments = segment_active_voxels(&touched);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].tree().leaf_count(), 0);
    }

    #[test]
    fn voxels_touching_tiles_join_them() {
        let mut tree = Tree::new(0u8);
        tree.fill(&CoordBBox::create_cube(Coord::ZERO, 8), 1, true);
        tree.set_value(Coord::new(8, 3, 3), 2);
        tree.set_value(Coord::new(9, 3, 3), 2);
        tree.set_value(Coord::new(-1, -1, 0), 3);
        tree.set_value(Coord::new(30, 30, 30), 4);
        let components = connected_components(&tree, 0);
        let sizes: Vec<u64> = components.iter().map(|c| c.active_voxel_count()).collect();
        assert_eq!(sizes, vec![514, 1, 1]);
        assert_eq!(connected_components(&tree, 1).len(), 3);
    }
}
