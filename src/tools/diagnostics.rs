//! Value checks and grid validation.

use tracing::{debug, debug_span};

use crate::error::{Error, Result};
use crate::grid::{Grid, GridClass};
use crate::math::Coord;
use crate::parallel::{self, DEFAULT_GRAIN_SIZE};
use crate::tools::level_set::LEVEL_SET_HALF_WIDTH;
use crate::tree::{LeafNode, Tree, ValueFilter};
use crate::value::{GridValue, Interpolant, RealValue};

/// A per-value predicate. `fails` returns true for values that violate it.
pub trait ValueCheck<T> {
    fn fails(&self, value: T) -> bool;
    /// Completes the sentence "the value ...".
    fn describe(&self) -> String;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CheckNan;

#[derive(Clone, Copy, Debug, Default)]
pub struct CheckInf;

/// Fails NaN and infinite values.
#[derive(Clone, Copy, Debug, Default)]
pub struct CheckFinite;

impl<T: Interpolant> ValueCheck<T> for CheckNan {
    fn fails(&self, value: T) -> bool {
        value.is_nan()
    }
    fn describe(&self) -> String {
        "is NaN".into()
    }
}

impl<T: Interpolant> ValueCheck<T> for CheckInf {
    fn fails(&self, value: T) -> bool {
        value.is_infinite()
    }
    fn describe(&self) -> String {
        "is infinite".into()
    }
}

impl<T: Interpolant> ValueCheck<T> for CheckFinite {
    fn fails(&self, value: T) -> bool {
        !value.is_finite()
    }
    fn describe(&self) -> String {
        "is not finite".into()
    }
}

/// Fails values below `min`.
#[derive(Clone, Copy, Debug)]
pub struct CheckMin<T> {
    pub min: T,
}

impl<T> CheckMin<T> {
    pub fn new(min: T) -> Self {
        Self { min }
    }
}

impl<T: RealValue> ValueCheck<T> for CheckMin<T> {
    fn fails(&self, value: T) -> bool {
        value < self.min
    }
    fn describe(&self) -> String {
        format!("is below {:?}", self.min)
    }
}

/// Fails values above `max`.
#[derive(Clone, Copy, Debug)]
pub struct CheckMax<T> {
    pub max: T,
}

impl<T> CheckMax<T> {
    pub fn new(max: T) -> Self {
        Self { max }
    }
}

impl<T: RealValue> ValueCheck<T> for CheckMax<T> {
    fn fails(&self, value: T) -> bool {
        value > self.max
    }
    fn describe(&self) -> String {
        format!("is above {:?}", self.max)
    }
}

/// Fails values outside the closed range `[min, max]`.
#[derive(Clone, Copy, Debug)]
pub struct CheckRange<T> {
    min: T,
    max: T,
}

impl<T: RealValue> CheckRange<T> {
    pub fn new(min: T, max: T) -> Result<Self> {
        if !(min < max) {
            return Err(Error::value(format!("invalid range [{min:?}, {max:?}]")));
        }
        Ok(Self { min, max })
    }
    pub fn min(&self) -> T {
        self.min
    }
    pub fn max(&self) -> T {
        self.max
    }
}

impl<T: RealValue> ValueCheck<T> for CheckRange<T> {
    fn fails(&self, value: T) -> bool {
        value < self.min || value > self.max
    }
    fn describe(&self) -> String {
        format!("is outside [{:?}, {:?}]", self.min, self.max)
    }
}

/// Fails anything but the given values.
struct CheckOneOf<T>(Vec<T>);

impl<T: GridValue> ValueCheck<T> for CheckOneOf<T> {
    fn fails(&self, value: T) -> bool {
        !self.0.contains(&value)
    }
    fn describe(&self) -> String {
        format!("is not one of {:?}", self.0)
    }
}

/// Runs value checks over a tree and counts the failures.
///
/// A failing tile counts once per voxel it covers. A failing background counts once.
pub struct Diagnose<'a, T> {
    tree: &'a Tree<T>,
    mask: Option<Tree<bool>>,
    failures: u64,
    grain_size: usize,
}

impl<'a, T: GridValue> Diagnose<'a, T> {
    pub fn new(tree: &'a Tree<T>) -> Self {
        Self {
            tree,
            mask: None,
            failures: 0,
            grain_size: DEFAULT_GRAIN_SIZE,
        }
    }
    pub fn with_grain_size(mut self, grain_size: usize) -> Self {
        self.grain_size = grain_size;
        self
    }

    /// Failures found by the most recent [`Diagnose::check`].
    pub fn failure_count(&self) -> u64 {
        self.failures
    }

    /// Active where any check run with `update_mask` failed.
    pub fn mask(&self) -> Option<&Tree<bool>> {
        self.mask.as_ref()
    }
    pub fn into_mask(self) -> Option<Tree<bool>> {
        self.mask
    }

    /// Applies `check` to the values `filter` selects, and to the background when
    /// `check_background` is set. Returns an empty string if nothing failed.
    pub fn check<C>(&mut self, check: &C, filter: ValueFilter, update_mask: bool, check_background: bool) -> String
    where
        C: ValueCheck<T> + Sync,
    {
        let _span = debug_span!("diagnose", what = %check.describe(), ?filter).entered();
        let leaves: Vec<&LeafNode<T>> = self.tree.leaves().collect();
        let (voxels, coords) = parallel::reduce(
            &leaves,
            self.grain_size,
            || (0u64, Vec::new()),
            |(count, coords), leaf| {
                for (n, v) in leaf.values().iter().enumerate() {
                    if filter.accepts(leaf.is_on_at(n)) && check.fails(*v) {
                        *count += 1;
                        if update_mask {
                            coords.push(leaf.offset_to_global_coord(n));
                        }
                    }
                }
            },
            |(count, coords), (more, mut found): (u64, Vec<Coord>)| {
                *count += more;
                coords.append(&mut found);
            },
        );

        let mut tiles = 0u64;
        let mut tile_voxels = 0u64;
        let mut tile_boxes = Vec::new();
        for tile in self.tree.iter_values(filter).tiles_only() {
            if check.fails(tile.value()) {
                tiles += 1;
                tile_voxels += tile.voxel_count();
                if update_mask {
                    tile_boxes.push(tile.bounding_box());
                }
            }
        }
        let background = self.tree.background();
        let background_fails = check_background && check.fails(background);

        if update_mask {
            let mask = self.mask.get_or_insert_with(|| Tree::new(false));
            for xyz in coords {
                mask.set_value(xyz, true);
            }
            for bbox in &tile_boxes {
                mask.fill(bbox, true, true);
            }
        }

        self.failures = voxels + tile_voxels + u64::from(background_fails);
        debug!(voxels, tiles, background_fails, "diagnosed");

        let what = check.describe();
        let mut parts = Vec::new();
        if voxels > 0 {
            parts.push(format!("{voxels} voxel value(s) {what}"));
        }
        if tiles > 0 {
            parts.push(format!("{tiles} tile value(s) covering {tile_voxels} voxels {what}"));
        }
        if background_fails {
            parts.push(format!("the background {background:?} {what}"));
        }
        parts.join("; ")
    }
}

fn run<T, C>(tree: &Tree<T>, check: &C, filter: ValueFilter, check_background: bool) -> Option<String>
where
    T: GridValue,
    C: ValueCheck<T> + Sync,
{
    let message = Diagnose::new(tree).check(check, filter, false, check_background);
    (!message.is_empty()).then_some(message)
}

/// The distinct values of inactive voxels and tiles, in the order found, or `None` when
/// there are more than `max_count` of them.
pub fn unique_inactive_values<T: GridValue>(tree: &Tree<T>, max_count: usize, grain_size: usize) -> Option<Vec<T>> {
    let _span = debug_span!("unique_inactive_values", max_count).entered();
    let insert = |values: &mut Vec<T>, v: T| {
        if values.len() <= max_count && !values.contains(&v) {
            values.push(v);
        }
    };
    let leaves: Vec<&LeafNode<T>> = tree.leaves().collect();
    let mut values = parallel::reduce(
        &leaves,
        grain_size,
        Vec::new,
        |values, leaf| {
            for (n, v) in leaf.values().iter().enumerate() {
                if !leaf.is_on_at(n) {
                    insert(values, *v);
                }
            }
        },
        |values, part: Vec<T>| {
            for v in part {
                insert(values, v);
            }
        },
    );
    for tile in tree.iter_values(ValueFilter::Off).tiles_only() {
        insert(&mut values, tile.value());
    }
    debug!(found = values.len(), "inactive values");
    (values.len() <= max_count).then_some(values)
}

/// Validates a narrow-band level set, running the first `checks` of these rules:
///
/// 1. the grid class is [`GridClass::LevelSet`]
/// 2. voxels are uniform
/// 3. the background spans at least [`LEVEL_SET_HALF_WIDTH`] voxels
/// 4. there are no active tiles
/// 5. every value is finite
/// 6. active values lie within `[-background, background]`
/// 7. inactive values are `±background`
///
/// Returns a description of the first violation.
pub fn check_level_set<T: RealValue>(grid: &Grid<T>, checks: usize) -> Option<String> {
    let _span = debug_span!("check_level_set", checks).entered();
    let tree = grid.tree();
    let background = grid.background();
    let inside = background.scaled(-1.0);
    let rules: [&dyn Fn() -> Option<String>; 7] = [
        &|| {
            (grid.class() != GridClass::LevelSet).then(|| format!("grid class is {:?}, not a level set", grid.class()))
        },
        &|| grid.transform().uniform_voxel_size().err().map(|e| e.to_string()),
        &|| {
            let voxel_size = grid.transform().uniform_voxel_size().ok()?;
            let width = background.to_f64() / voxel_size;
            (!(width >= LEVEL_SET_HALF_WIDTH * (1.0 - 1e-6)))
                .then(|| format!("narrow band is {width:.3} voxels wide, at least {LEVEL_SET_HALF_WIDTH} expected"))
        },
        &|| {
            let tiles = tree.active_tile_count();
            (tiles > 0).then(|| format!("level set has {tiles} active tile(s)"))
        },
        &|| run(tree, &CheckFinite, ValueFilter::All, true),
        &|| match CheckRange::new(inside, background) {
            Ok(range) => run(tree, &range, ValueFilter::On, false),
            Err(e) => Some(e.to_string()),
        },
        &|| {
            run(tree, &CheckOneOf(vec![background, inside]), ValueFilter::Off, false)
                .map(|m| format!("inactive values: {m}"))
        },
    ];
    let failure = rules.iter().take(checks).find_map(|rule| rule());
    debug!(ok = failure.is_none(), "level set checked");
    failure
}

/// Validates a fog volume, running the first `checks` of these rules:
///
/// 1. the grid class is [`GridClass::FogVolume`]
/// 2. the background is zero
/// 3. every value is finite
/// 4. inactive values are zero
/// 5. active values lie within `[0, 1]`
///
/// Returns a description of the first violation.
pub fn check_fog_volume<T: RealValue>(grid: &Grid<T>, checks: usize) -> Option<String> {
    let _span = debug_span!("check_fog_volume", checks).entered();
    let tree = grid.tree();
    let rules: [&dyn Fn() -> Option<String>; 5] = [
        &|| {
            (grid.class() != GridClass::FogVolume)
                .then(|| format!("grid class is {:?}, not a fog volume", grid.class()))
        },
        &|| {
            let background = grid.background();
            (background != T::zero()).then(|| format!("background is {background:?}, not zero"))
        },
        &|| run(tree, &CheckFinite, ValueFilter::All, true),
        &|| run(tree, &CheckOneOf(vec![T::zero()]), ValueFilter::Off, false).map(|m| format!("inactive values: {m}")),
        &|| match CheckRange::new(T::zero(), T::one()) {
            Ok(range) => run(tree, &range, ValueFilter::On, false),
            Err(e) => Some(e.to_string()),
        },
    ];
    let failure = rules.iter().take(checks).find_map(|rule| rule());
    debug!(ok = failure.is_none(), "fog volume checked");
    failure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::CoordBBox;
    use crate::tools::level_set::{create_level_set_sphere, sdf_to_fog_volume};
    use glam::{DVec3, Vec3};

    const NAN: f32 = f32::NAN;
    const INF: f32 = f32::INFINITY;

    fn sphere(half_width: f64) -> Grid<f32> {
        create_level_set_sphere::<f32>(4.3, DVec3::new(15.8, 13.2, 16.7), 0.1, half_width).unwrap()
    }

    #[test]
    fn value_predicates() {
        let inf_vec = Vec3::new(1.0, INF, 1.0);
        assert!(!CheckNan.fails(1.0f32) && CheckNan.fails(NAN) && !CheckNan.fails(INF));
        assert!(!ValueCheck::<Vec3>::fails(&CheckNan, inf_vec));
        assert!(!CheckInf.fails(1.0f32) && !CheckInf.fails(NAN) && CheckInf.fails(INF));
        assert!(CheckInf.fails(inf_vec));
        assert!(!CheckFinite.fails(1.0f32) && CheckFinite.fails(NAN) && CheckFinite.fails(INF));
        assert!(CheckFinite.fails(inf_vec));

        let min = CheckMin::new(0.0f32);
        assert!(!min.fails(0.5) && !min.fails(0.0) && !min.fails(1.1) && min.fails(-0.1));
        let max = CheckMax::new(0.0f32);
        assert!(max.fails(0.5) && !max.fails(0.0) && max.fails(1.0) && !max.fails(-0.1));

        assert!(matches!(CheckRange::new(1.0f32, 0.0), Err(Error::Value(_))));
        let range = CheckRange::new(0.0f32, 1.0).unwrap();
        assert!(!range.fails(0.5) && !range.fails(0.0) && !range.fails(1.0));
        assert!(range.fails(1.1) && range.fails(-0.1));
    }

    #[test]
    fn diagnose_counts_voxels_tiles_and_background() {
        let empty = Tree::new(0.0f32);
        let mut d = Diagnose::new(&empty);
        assert_eq!(d.check(&CheckNan, ValueFilter::On, false, true), "");
        assert_eq!(d.failure_count(), 0);

        let mut tree = Tree::new(0.0f32);
        tree.set_value(Coord::new(-1, 3, 6), 1.0);
        let mut d = Diagnose::new(&tree);
        assert!(d.check(&CheckNan, ValueFilter::On, false, true).is_empty());

        tree.set_value(Coord::new(-1, 3, 6), NAN);
        let mut d = Diagnose::new(&tree);
        assert!(!d.check(&CheckNan, ValueFilter::On, false, true).is_empty());
        assert_eq!(d.failure_count(), 1);

        tree.set_value(Coord::new(10, 30, 60), INF);
        let mut d = Diagnose::new(&tree).with_grain_size(0);
        assert!(!d.check(&CheckFinite, ValueFilter::On, false, true).is_empty());
        assert_eq!(d.failure_count(), 2);

        let mut tree = Tree::new(10.0f32);
        tree.set_value(Coord::new(-1, 3, 6), 1.0);
        tree.set_value(Coord::new(10, 30, 60), 1.5);
        tree.fill(&CoordBBox::create_cube(Coord::ZERO, 8), 20.0, true);
        let range = CheckRange::new(0.0f32, 1.0).unwrap();
        let mut d = Diagnose::new(&tree);
        let message = d.check(&range, ValueFilter::On, true, true);
        assert!(message.contains("background"));
        assert_eq!(d.failure_count(), 1 + 512 + 1);
        let mask = d.into_mask().unwrap();
        assert_eq!(mask.active_voxel_count(), 513);
        assert!(mask.is_value_on(Coord::new(10, 30, 60)));
        assert!(!mask.is_value_on(Coord::new(-1, 3, 6)));
    }

    #[test]
    fn diagnose_level_set_ranges() {
        let grid = sphere(2.0);
        let gamma = grid.background();
        let tree = grid.tree();

        let band = CheckRange::new(-gamma, gamma).unwrap();
        for filter in [ValueFilter::All, ValueFilter::On, ValueFilter::Off] {
            let mut d = Diagnose::new(tree);
            assert!(d.check(&band, filter, false, true).is_empty());
            assert_eq!(d.failure_count(), 0);
        }

        let outside = CheckRange::new(0.0, gamma).unwrap();
        let mut d = Diagnose::new(tree);
        assert!(!d.check(&outside, ValueFilter::On, true, false).is_empty());
        assert!(d.failure_count() > 0 && d.failure_count() < grid.active_voxel_count());
        assert_eq!(d.mask().map(|m| m.active_voxel_count()), Some(d.failure_count()));

        let mut d = Diagnose::new(tree);
        assert!(d.check(&CheckMin::new(-gamma), ValueFilter::All, false, true).is_empty());
        assert!(d.check(&CheckMax::new(gamma), ValueFilter::All, false, true).is_empty());
        assert_eq!(d.failure_count(), 0);
    }

    fn sorted(mut values: Vec<f32>) -> Vec<f32> {
        values.sort_by(f32::total_cmp);
        values
    }

    #[test]
    fn unique_inactive_values_of_plain_grid() {
        let mut tree = Tree::new(0.0f32);
        tree.set_value_off(Coord::new(0, 0, 0), 1.0);
        tree.set_value_off(Coord::new(0, 1, 0), 2.0);
        tree.set_value_off(Coord::new(0, 0, 1), 3.0);
        tree.set_value_off(Coord::new(0, 1, 1), 3.0);
        tree.set_value(Coord::new(1, 0, 0), 7.0);
        assert_eq!(unique_inactive_values(&tree, 3, 1), None);
        let values = unique_inactive_values(&tree, 4, 1).unwrap();
        assert_eq!(sorted(values), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(unique_inactive_values(&Tree::new(5.0f32), 0, 1), Some(Vec::new()));
    }

    #[test]
    fn unique_inactive_values_of_level_set_and_fog() {
        let mut grid = sphere(LEVEL_SET_HALF_WIDTH);
        let gamma = grid.background();
        assert_eq!(unique_inactive_values(grid.tree(), 1, 0), None);
        let values = unique_inactive_values(grid.tree(), 2, 0).unwrap();
        assert_eq!(sorted(values), vec![-gamma, gamma]);
        assert_eq!(unique_inactive_values(grid.tree(), 2, 4).map(sorted), Some(vec![-gamma, gamma]));

        sdf_to_fog_volume(&mut grid).unwrap();
        assert_eq!(unique_inactive_values(grid.tree(), 1, 1), Some(vec![0.0]));
    }

    #[test]
    fn level_set_validation() {
        let mut grid = sphere(LEVEL_SET_HALF_WIDTH);
        assert_eq!(check_level_set(&grid, 7), None);
        assert!(check_fog_volume(&grid, 5).is_some());

        grid.tree_mut().set_value(Coord::ZERO, (0.1 * (LEVEL_SET_HALF_WIDTH + 0.5)) as f32);
        assert!(check_level_set(&grid, 7).is_some());
        assert_eq!(check_level_set(&grid, 5), None);

        let narrow = sphere(2.0);
        assert!(check_level_set(&narrow, 7).unwrap().contains("narrow band"));
        assert_eq!(check_level_set(&narrow, 2), None);

        let plain = Grid::new(1.0f32);
        assert!(check_level_set(&plain, 7).unwrap().contains("class"));
    }

    #[test]
    fn fog_volume_validation() {
        let mut grid = sphere(LEVEL_SET_HALF_WIDTH);
        sdf_to_fog_volume(&mut grid).unwrap();
        assert_eq!(check_fog_volume(&grid, 5), None);

        grid.tree_mut().set_value(Coord::ZERO, 1.5);
        assert!(check_fog_volume(&grid, 5).is_some());
        assert_eq!(check_fog_volume(&grid, 4), None);

        grid.tree_mut().set_value_off(Coord::new(1, 0, 0), 0.5);
        assert!(check_fog_volume(&grid, 4).unwrap().starts_with("inactive values"));
    }
}
