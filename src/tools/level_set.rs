//! Narrow-band level sets: builders, pruning, conversion to fog volumes, interior masks
//! and topology.
//!
//! A level set stores signed distances in world units, negative inside. Voxels closer to
//! the surface than the background (the band half-width) are active; the rest of the
//! interior is inactive `-background`, normally collapsed into tiles.

use glam::DVec3;
use tracing::{debug, debug_span};

use super::segment::connected_components;
use crate::error::{Error, Result};
use crate::grid::{Grid, GridClass};
use crate::math::{Coord, CoordBBox, Transform};
use crate::parallel::{self, DEFAULT_GRAIN_SIZE};
use crate::tree::{LeafNode, Node, RootNode, Tree, ValueFilter, aligned_blocks};
use crate::value::{GridValue, RealValue};

/// Default narrow-band half-width, in voxels.
pub const LEVEL_SET_HALF_WIDTH: f64 = 3.0;

/// Replaces every node without active values by an inactive tile of `-background` or
/// `background`, by the sign of its first value. Outside tiles equal to the background
/// are dropped from the root.
pub fn prune_level_set<T: RealValue>(tree: &mut Tree<T>) {
    let outside = tree.background().abs();
    let inside = outside.scaled(-1.0);
    tree.prune_inactive_with(&|v| if v < T::zero() { inside } else { outside });
}

enum Block<T> {
    Outside,
    Inside(Coord),
    Band(LeafNode<T>),
}

/// Samples `sdf` (world space, Lipschitz 1) over `region`, one leaf block per task.
/// Blocks whose centre is farther than the band plus the block's half-diagonal from
/// the surface are classified whole.
fn narrow_band<T, F>(region: CoordBBox, transform: &Transform, band: f64, sdf: F) -> Tree<T>
where
    T: RealValue,
    F: Fn(DVec3) -> f64 + Sync,
{
    let log2 = <LeafNode<T> as Node<T>>::TOTAL;
    let dim = 1 << log2;
    let half = f64::from(dim - 1) * 0.5;
    let reach = transform.voxel_size().max_element() * half * 3f64.sqrt();
    let background = T::from_f64(band);
    let inside = T::from_f64(-band);

    let origins: Vec<Coord> = aligned_blocks(region, log2).map(|(origin, _)| origin).collect();
    let blocks = parallel::map(&origins, DEFAULT_GRAIN_SIZE, |_, &origin| {
        let centre = transform.index_to_world(origin.as_dvec3() + DVec3::splat(half));
        let d = sdf(centre);
        if d - reach >= band {
            return Block::Outside;
        }
        if d + reach <= -band {
            return Block::Inside(origin);
        }
        let mut leaf = LeafNode::new(origin, background);
        for n in 0..LeafNode::<T>::SIZE {
            let d = sdf(transform.coord_to_world(leaf.offset_to_global_coord(n)));
            if d.abs() < band {
                leaf.set_value_at(n, T::from_f64(d), true);
            } else if d < 0.0 {
                leaf.set_value_at(n, inside, false);
            }
        }
        Block::Band(leaf)
    });

    let mut tree = Tree::new(background);
    for block in blocks {
        match block {
            Block::Outside => {}
            Block::Inside(origin) => tree.fill(&CoordBBox::create_cube(origin, dim), inside, false),
            Block::Band(leaf) => tree.add_leaf(leaf),
        }
    }
    prune_level_set(&mut tree);
    tree
}

fn check_half_width(half_width: f64) -> Result<()> {
    if half_width.is_finite() && half_width > 0.0 {
        Ok(())
    } else {
        Err(Error::value(format!("half-width must be positive, got {half_width}")))
    }
}

/// Builds a level-set sphere of `radius` world units around `center`.
pub fn create_level_set_sphere<T: RealValue>(
    radius: f64,
    center: DVec3,
    voxel_size: f64,
    half_width: f64,
) -> Result<Grid<T>> {
    let _span = debug_span!("create_level_set_sphere", radius, voxel_size).entered();
    if !(radius.is_finite() && radius > 0.0) {
        return Err(Error::value(format!("sphere radius must be positive, got {radius}")));
    }
    check_half_width(half_width)?;
    let transform = Transform::new(voxel_size)?;
    let band = half_width * voxel_size;

    let c = transform.world_to_index(center);
    let extent = DVec3::splat(radius / voxel_size + half_width + 1.0);
    let region = CoordBBox::new(Coord::floor(c - extent), Coord::floor(c + extent).offset_by(1, 1, 1));
    let tree = narrow_band(region, &transform, band, |p| (p - center).length() - radius);
    debug!(active = tree.active_voxel_count(), leaves = tree.leaf_count(), "sphere built");
    Ok(Grid::from_tree(tree)
        .with_transform(transform)
        .with_class(GridClass::LevelSet))
}

fn box_distance(p: DVec3, min: DVec3, max: DVec3) -> f64 {
    let q = (p - (min + max) * 0.5).abs() - (max - min) * 0.5;
    q.max(DVec3::ZERO).length() + q.max_element().min(0.0)
}

/// Builds a level-set box spanning the world-space corners `min` and `max`. The transform
/// must have a uniform voxel size.
pub fn create_level_set_box<T: RealValue>(
    min: DVec3,
    max: DVec3,
    transform: &Transform,
    half_width: f64,
) -> Result<Grid<T>> {
    let _span = debug_span!("create_level_set_box").entered();
    if !(min.cmplt(max).all() && min.is_finite() && max.is_finite()) {
        return Err(Error::value(format!("box corners must satisfy min < max, got {min} and {max}")));
    }
    check_half_width(half_width)?;
    let voxel_size = transform.uniform_voxel_size()?;
    let band = half_width * voxel_size;

    let pad = DVec3::splat(half_width + 1.0);
    let lo = transform.world_to_index(min) - pad;
    let hi = transform.world_to_index(max) + pad;
    let region = CoordBBox::new(Coord::floor(lo), Coord::floor(hi).offset_by(1, 1, 1));
    let tree = narrow_band(region, transform, band, |p| box_distance(p, min, max));
    debug!(active = tree.active_voxel_count(), leaves = tree.leaf_count(), "box built");
    Ok(Grid::from_tree(tree)
        .with_transform(*transform)
        .with_class(GridClass::LevelSet))
}

/// Converts a level set into a fog volume in place.
///
/// The interior half of the band becomes a linear ramp from 0 at the surface to 1 at
/// `-background`; the rest of the interior becomes active 1. Everything outside becomes
/// inactive 0, which is also the new background.
pub fn sdf_to_fog_volume<T: RealValue>(grid: &mut Grid<T>) -> Result<()> {
    let _span = debug_span!("sdf_to_fog_volume", name = grid.name()).entered();
    let cutoff = grid.background().to_f64();
    if cutoff.is_nan() || cutoff <= 0.0 {
        return Err(Error::value(format!("level set background must be positive, got {cutoff}")));
    }
    let tree = grid.tree_mut();
    tree.for_each_value_mut(ValueFilter::All, |item| {
        let d = item.value().to_f64();
        if d < 0.0 {
            item.set_value(T::from_f64((-d / cutoff).min(1.0)));
            item.set_active(true);
        } else {
            item.set_value(T::zero());
            item.set_active(false);
        }
    });
    tree.set_background(T::zero());
    tree.prune_inactive();
    tree.prune(T::zero());
    debug!(active = tree.active_voxel_count(), leaves = tree.leaf_count(), "fog volume");
    grid.set_class(GridClass::FogVolume);
    Ok(())
}

/// Boolean mask of every value (voxel or tile, active or not) below `iso`.
pub fn sdf_interior_mask<T: RealValue>(grid: &Grid<T>, iso: T) -> Tree<bool> {
    let mut mask = Tree::new(false);
    let mut tiles = Vec::new();
    {
        let mut acc = mask.accessor_mut();
        for item in grid.tree().iter_values(ValueFilter::All) {
            if item.value() < iso {
                if item.is_voxel_value() {
                    acc.set_value(item.coord(), true);
                } else {
                    tiles.push(item.bounding_box());
                }
            }
        }
    }
    for bbox in tiles {
        mask.fill(&bbox, true, true);
    }
    mask.prune(false);
    mask
}

/// Boolean mask of the active voxels and tiles of `tree`.
pub(crate) fn active_mask<T: GridValue>(tree: &Tree<T>) -> Tree<bool> {
    let mut mask = Tree::new(false);
    for item in tree.iter_values_on() {
        if item.is_voxel_value() {
            mask.set_value(item.coord(), true);
        } else {
            mask.fill(&item.bounding_box(), true, true);
        }
    }
    mask
}

/// Interior of a level set, or the active topology of any other grid.
pub fn interior_mask<T: RealValue>(grid: &Grid<T>, iso: T) -> Tree<bool> {
    match grid.class() {
        GridClass::LevelSet => sdf_interior_mask(grid, iso),
        _ => active_mask(grid.tree()),
    }
}

/// Splits every stored value of `tree` into a mask of values at or below `iso` and a
/// mask of values above it. Tiles stay tiles in both.
fn split_at_iso<T: RealValue>(tree: &Tree<T>, iso: T) -> (Tree<bool>, Tree<bool>) {
    let mut below = Tree::new(false);
    let mut above = Tree::new(false);
    let (mut below_tiles, mut above_tiles) = (Vec::new(), Vec::new());
    {
        let mut lo = below.accessor_mut();
        let mut hi = above.accessor_mut();
        for item in tree.iter_values(ValueFilter::All) {
            let is_above = item.value() > iso;
            match (item.is_voxel_value(), is_above) {
                (true, true) => hi.set_value(item.coord(), true),
                (true, false) => lo.set_value(item.coord(), true),
                (false, true) => above_tiles.push(item.bounding_box()),
                (false, false) => below_tiles.push(item.bounding_box()),
            }
        }
    }
    for bbox in below_tiles {
        below.fill(&bbox, true, true);
    }
    for bbox in above_tiles {
        above.fill(&bbox, true, true);
    }
    (below, above)
}

/// True when some value of `component` is face-adjacent to a root region `tree` never
/// stored anything in.
fn reaches_untouched_space<T: GridValue>(tree: &Tree<T>, component: &Tree<bool>) -> bool {
    let table = tree.root().table();
    component.iter_values_on().any(|item| {
        let bbox = item.bounding_box();
        (0..3).any(|axis| {
            let mut below = bbox.min;
            below[axis] -= 1;
            let mut above = bbox.max;
            above[axis] += 1;
            [below, above]
                .iter()
                .any(|c| !table.contains_key(&RootNode::<T>::key(*c)))
        })
    })
}

/// Everything not reachable from outside through values above `iso`: the interior plus
/// any cavities sealed off by CSG.
///
/// Untouched space counts as outside. The flood runs over the face-connected components
/// of the stored values above `iso`, so it costs what the tree stores rather than the
/// volume of its bounding box.
pub fn extract_enclosed_region<T: RealValue>(grid: &Grid<T>, iso: T) -> Tree<bool> {
    let _span = debug_span!("extract_enclosed_region", name = grid.name()).entered();
    let (mut mask, open) = split_at_iso(grid.tree(), iso);
    let mut cavities = 0usize;
    for component in connected_components(&open, DEFAULT_GRAIN_SIZE) {
        if reaches_untouched_space(grid.tree(), &component) {
            continue;
        }
        cavities += 1;
        for item in component.iter_values_on() {
            if item.is_voxel_value() {
                mask.set_value(item.coord(), true);
            } else {
                mask.fill(&item.bounding_box(), true, true);
            }
        }
    }
    mask.prune(false);
    debug!(voxels = mask.active_voxel_count(), cavities, "enclosed region");
    mask
}

/// Voxel offsets around a lattice point. Bits 2, 1 and 0 of an index select the x, y
/// and z offset, so the voxel `p - CORNERS[i]` has `p` as a corner.
const CORNERS: [Coord; 8] = [
    Coord::new(0, 0, 0),
    Coord::new(0, 0, 1),
    Coord::new(0, 1, 0),
    Coord::new(0, 1, 1),
    Coord::new(1, 0, 0),
    Coord::new(1, 0, 1),
    Coord::new(1, 1, 0),
    Coord::new(1, 1, 1),
];

/// `V - E + F - C` of the cells anchored at one lattice point, given which of the eight
/// voxels around it are occupied. A cell anchored at `p` is touched by the voxels whose
/// offset is zero on its `fixed` axes.
fn lattice_point_term(occ: &[bool; 8]) -> i64 {
    let touched = |fixed: usize| (0..8).any(|i| i & fixed == 0 && occ[i]);
    let edges = [4, 2, 1].into_iter().filter(|&m| touched(m)).count() as i64;
    let faces = [3, 5, 6].into_iter().filter(|&m| touched(m)).count() as i64;
    i64::from(touched(0)) - edges + faces - i64::from(occ[0])
}

/// Voxels on the outer shell of `bbox`, each once.
fn shell(bbox: &CoordBBox) -> Vec<CoordBBox> {
    let (lo, hi) = (bbox.min, bbox.max);
    let mut slabs = vec![CoordBBox::new(lo, Coord::new(lo.x, hi.y, hi.z))];
    if hi.x > lo.x {
        slabs.push(CoordBBox::new(Coord::new(hi.x, lo.y, lo.z), hi));
    }
    let (x0, x1) = (lo.x + 1, hi.x - 1);
    slabs.push(CoordBBox::new(Coord::new(x0, lo.y, lo.z), Coord::new(x1, lo.y, hi.z)));
    if hi.y > lo.y {
        slabs.push(CoordBBox::new(Coord::new(x0, hi.y, lo.z), Coord::new(x1, hi.y, hi.z)));
    }
    let (y0, y1) = (lo.y + 1, hi.y - 1);
    slabs.push(CoordBBox::new(Coord::new(x0, y0, lo.z), Coord::new(x1, y1, lo.z)));
    if hi.z > lo.z {
        slabs.push(CoordBBox::new(Coord::new(x0, y0, hi.z), Coord::new(x1, y1, hi.z)));
    }
    slabs.retain(|s| !s.is_empty());
    slabs
}

/// Euler characteristic of the surface bounding the interior of a level set.
///
/// The interior is taken as a union of closed unit cubes; its characteristic is
/// `V - E + F - C` over that cubical complex and the surface's is twice that. Lattice
/// points with all eight voxels around them inside add nothing, so only the voxels on
/// the interior's boundary are visited. Each lattice point is counted from the first
/// occupied voxel around it.
pub fn euler_characteristic<T: RealValue>(grid: &Grid<T>) -> Result<i64> {
    grid.require_level_set("euler_characteristic")?;
    let mask = sdf_interior_mask(grid, T::zero());
    if mask.active_voxel_count() == 0 {
        return Err(Error::runtime(format!(
            "level set '{}' has no interior, its Euler characteristic is undefined",
            grid.name()
        )));
    }
    let acc = mask.accessor();
    let mut chi = 0i64;
    let mut visit = |q: Coord| {
        for (i, corner) in CORNERS.iter().enumerate() {
            let p = q + *corner;
            let mut occ = [false; 8];
            for (j, o) in occ.iter_mut().enumerate() {
                *o = j == i || acc.is_value_on(p - CORNERS[j]);
            }
            if occ[..i].iter().any(|&o| o) {
                continue;
            }
            chi += lattice_point_term(&occ);
        }
    };
    for item in mask.iter_values_on() {
        if item.is_voxel_value() {
            visit(item.coord());
        } else {
            for slab in shell(&item.bounding_box()) {
                slab.iter().for_each(&mut visit);
            }
        }
    }
    let chi = 2 * chi;
    debug!(chi, "euler characteristic");
    Ok(chi)
}

/// Genus of a level set's surface, `(2 - χ) / 2`.
pub fn genus<T: RealValue>(grid: &Grid<T>) -> Result<i64> {
    Ok((2 - euler_characteristic(grid)?) / 2)
}
