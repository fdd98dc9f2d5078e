//! Parallel reductions over tree values.
//!
//! Vector values contribute their length. Tiles count once per voxel they cover.

use tracing::debug_span;

use crate::parallel;
use crate::tree::{LeafNode, Tree, ValueFilter};
use crate::value::Interpolant;

/// Running minimum and maximum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extrema {
    min: f64,
    max: f64,
    size: u64,
}

impl Default for Extrema {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            size: 0,
        }
    }
}

impl Extrema {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, value: f64) {
        self.add_n(value, 1);
    }
    /// Adds `value` as `n` samples.
    pub fn add_n(&mut self, value: f64, n: u64) {
        if n == 0 {
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.size += n;
    }
    pub fn merge(&mut self, other: &Extrema) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.size += other.size;
    }
    pub fn min(&self) -> f64 {
        self.min
    }
    pub fn max(&self) -> f64 {
        self.max
    }
    pub fn range(&self) -> f64 {
        self.max - self.min
    }
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Extrema plus mean and variance, merged with Chan's pairwise update.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stats {
    extrema: Extrema,
    mean: f64,
    m2: f64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, value: f64) {
        self.add_n(value, 1);
    }
    pub fn add_n(&mut self, value: f64, n: u64) {
        if n == 0 {
            return;
        }
        let mut sample = Stats::default();
        sample.extrema.add_n(value, n);
        sample.mean = value;
        self.merge(&sample);
    }
    pub fn merge(&mut self, other: &Stats) {
        let (na, nb) = (self.size() as f64, other.size() as f64);
        if nb == 0.0 {
            return;
        }
        let n = na + nb;
        let delta = other.mean - self.mean;
        self.mean += delta * nb / n;
        self.m2 += other.m2 + delta * delta * na * nb / n;
        self.extrema.merge(&other.extrema);
    }
    pub fn size(&self) -> u64 {
        self.extrema.size()
    }
    pub fn min(&self) -> f64 {
        self.extrema.min()
    }
    pub fn max(&self) -> f64 {
        self.extrema.max()
    }
    pub fn extrema(&self) -> Extrema {
        self.extrema
    }
    pub fn mean(&self) -> f64 {
        self.mean
    }
    /// Population variance; zero for fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.size() < 2 { 0.0 } else { self.m2 / self.size() as f64 }
    }
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Something a value can be accumulated into.
trait Accumulate: Default + Send {
    fn add_n(&mut self, value: f64, n: u64);
    fn merge_from(&mut self, other: Self);
}

impl Accumulate for Extrema {
    fn add_n(&mut self, value: f64, n: u64) {
        Extrema::add_n(self, value, n);
    }
    fn merge_from(&mut self, other: Self) {
        self.merge(&other);
    }
}

impl Accumulate for Stats {
    fn add_n(&mut self, value: f64, n: u64) {
        Stats::add_n(self, value, n);
    }
    fn merge_from(&mut self, other: Self) {
        self.merge(&other);
    }
}

fn accumulate<T: Interpolant, A: Accumulate>(tree: &Tree<T>, filter: ValueFilter, grain_size: usize) -> A {
    let leaves: Vec<&LeafNode<T>> = tree.leaves().collect();
    let mut total = parallel::reduce(
        &leaves,
        grain_size,
        A::default,
        |acc, leaf| {
            for (n, v) in leaf.values().iter().enumerate() {
                if filter.accepts(leaf.is_on_at(n)) {
                    acc.add_n(v.scalar(), 1);
                }
            }
        },
        |acc, part| acc.merge_from(part),
    );
    for tile in tree.iter_values(filter).tiles_only() {
        total.add_n(tile.value().scalar(), tile.voxel_count());
    }
    total
}

/// Minimum and maximum of the values `filter` selects.
pub fn extrema<T: Interpolant>(tree: &Tree<T>, filter: ValueFilter, grain_size: usize) -> Extrema {
    let _span = debug_span!("extrema", ?filter).entered();
    accumulate(tree, filter, grain_size)
}

/// Mean, variance and extrema of the values `filter` selects.
pub fn statistics<T: Interpolant>(tree: &Tree<T>, filter: ValueFilter, grain_size: usize) -> Stats {
    let _span = debug_span!("statistics", ?filter).entered();
    accumulate(tree, filter, grain_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Coord, CoordBBox};
    use crate::tools::level_set::create_level_set_sphere;
    use glam::{DVec3, Vec3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn empty_tree_has_no_samples() {
        let tree = Tree::new(3.0f32);
        let stats = statistics(&tree, ValueFilter::All, 1);
        assert_eq!(stats.size(), 0);
        assert_eq!(stats.mean(), 0.0);
        assert_eq!(stats.variance(), 0.0);
        assert_eq!(extrema(&tree, ValueFilter::On, 0).size(), 0);
    }

    #[test]
    fn voxels_and_tiles_are_weighted_by_volume() {
        let mut tree = Tree::new(0.0f32);
        for (i, x) in [1.0, 2.0, 3.0, 4.0].into_iter().enumerate() {
            tree.set_value(Coord::new(100 + i as i32, 0, 0), x);
        }
        let stats = statistics(&tree, ValueFilter::On, 1);
        assert_eq!(stats.size(), 4);
        assert!((stats.mean() - 2.5).abs() < 1e-12);
        assert!((stats.variance() - 1.25).abs() < 1e-12);
        assert_eq!((stats.min(), stats.max()), (1.0, 4.0));

        tree.fill(&CoordBBox::create_cube(Coord::ZERO, 8), 2.5, true);
        let stats = statistics(&tree, ValueFilter::On, 1);
        assert_eq!(stats.size(), 516);
        assert!((stats.mean() - 2.5).abs() < 1e-12);
        assert!((stats.variance() - 5.0 / 516.0).abs() < 1e-12);

        let off = extrema(&tree, ValueFilter::Off, 1);
        assert!(off.size() > 508);
        assert_eq!((off.min(), off.max()), (0.0, 0.0));
    }

    #[test]
    fn level_set_values_stay_inside_the_band() {
        let grid = create_level_set_sphere::<f32>(4.3, DVec3::new(15.8, 13.2, 16.7), 0.1, 2.0).unwrap();
        let band = 0.1 * 2.0;
        let on = extrema(grid.tree(), ValueFilter::On, 1);
        assert!(on.min() > -band - 1e-6 && on.max() < band + 1e-6);
        let all = extrema(grid.tree(), ValueFilter::All, 1);
        assert!(all.min() >= -band - 1e-6 && all.max() <= band + 1e-6);
        assert!(all.size() > on.size());
    }

    #[test]
    fn serial_and_parallel_reductions_agree() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut tree = Tree::new(0.0f64);
        for _ in 0..5000 {
            let xyz = Coord::new(
                rng.random_range(-100..100),
                rng.random_range(-100..100),
                rng.random_range(-100..100),
            );
            tree.set_value(xyz, rng.random_range(-10.0..10.0));
        }
        tree.fill(&CoordBBox::create_cube(Coord::splat(256), 16), 1.0, true);
        let serial = statistics(&tree, ValueFilter::On, 0);
        let parallel = statistics(&tree, ValueFilter::On, 3);
        assert_eq!(serial.size(), parallel.size());
        assert_eq!(serial.extrema(), parallel.extrema());
        assert!((serial.mean() - parallel.mean()).abs() < 1e-9);
        assert!((serial.variance() - parallel.variance()).abs() < 1e-9);
    }

    #[test]
    fn vectors_contribute_their_length() {
        let mut tree = Tree::new(Vec3::ZERO);
        tree.set_value(Coord::new(0, 0, 0), Vec3::new(3.0, 4.0, 0.0));
        tree.set_value(Coord::new(0, 0, 1), Vec3::new(0.0, 0.0, -1.0));
        let ex = extrema(&tree, ValueFilter::On, 1);
        assert!((ex.max() - 5.0).abs() < 1e-6);
        assert!((ex.min() - 1.0).abs() < 1e-6);
    }
}
