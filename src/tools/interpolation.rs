//! Samplers that reconstruct values between lattice points.
//!
//! The scheme is a type parameter ([`PointSampler`], [`BoxSampler`],
//! [`QuadraticSampler`]), and the values come from any [`ValueSource`]: a tree, a grid
//! or a read accessor. All three sources give bit-identical results.

use std::marker::PhantomData;

use glam::DVec3;

use crate::grid::Grid;
use crate::math::{Coord, Transform};
use crate::tree::{Tree, ValueAccessor};
use crate::value::{GridValue, Interpolant};

/// Something that can be read at integer coordinates.
pub trait ValueSource {
    type Value: GridValue;
    fn probe_source(&self, xyz: Coord) -> (Self::Value, bool);
    fn source_value(&self, xyz: Coord) -> Self::Value {
        self.probe_source(xyz).0
    }
}

impl<T: GridValue> ValueSource for Tree<T> {
    type Value = T;
    fn probe_source(&self, xyz: Coord) -> (T, bool) {
        self.probe_value(xyz)
    }
}

impl<T: GridValue> ValueSource for Grid<T> {
    type Value = T;
    fn probe_source(&self, xyz: Coord) -> (T, bool) {
        self.tree().probe_value(xyz)
    }
}

impl<T: GridValue> ValueSource for ValueAccessor<'_, T> {
    type Value = T;
    fn probe_source(&self, xyz: Coord) -> (T, bool) {
        self.probe_value(xyz)
    }
}

impl<S: ValueSource + ?Sized> ValueSource for &S {
    type Value = S::Value;
    fn probe_source(&self, xyz: Coord) -> (S::Value, bool) {
        (**self).probe_source(xyz)
    }
}

/// An interpolation scheme over index space.
pub trait Sampler {
    /// Voxels read on each side of the sample point.
    const RADIUS: i32;

    /// The interpolated value, and whether any lattice point it used was active.
    fn probe_sample<S>(source: &S, ijk: DVec3) -> (S::Value, bool)
    where
        S: ValueSource,
        S::Value: Interpolant;

    fn sample<S>(source: &S, ijk: DVec3) -> S::Value
    where
        S: ValueSource,
        S::Value: Interpolant,
    {
        Self::probe_sample(source, ijk).0
    }
}

/// Nearest lattice point.
#[derive(Clone, Copy, Debug, Default)]
pub struct PointSampler;

/// Trilinear interpolation of the 8 surrounding lattice points.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoxSampler;

/// Triquadratic interpolation over the 27 lattice points around the floor of the sample.
#[derive(Clone, Copy, Debug, Default)]
pub struct QuadraticSampler;

impl Sampler for PointSampler {
    const RADIUS: i32 = 0;

    fn probe_sample<S>(source: &S, ijk: DVec3) -> (S::Value, bool)
    where
        S: ValueSource,
        S::Value: Interpolant,
    {
        source.probe_source(Coord::round(ijk))
    }
}

#[inline]
fn lerp<T: Interpolant>(a: T, b: T, w: f64) -> T {
    a.plus(b.minus(a).scaled(w))
}

impl Sampler for BoxSampler {
    const RADIUS: i32 = 1;

    fn probe_sample<S>(source: &S, ijk: DVec3) -> (S::Value, bool)
    where
        S: ValueSource,
        S::Value: Interpolant,
    {
        let base = Coord::floor(ijk);
        let w = ijk - base.as_dvec3();
        let mut active = false;
        let mut v = [[[S::Value::default(); 2]; 2]; 2];
        for (dx, plane) in v.iter_mut().enumerate() {
            for (dy, row) in plane.iter_mut().enumerate() {
                for (dz, cell) in row.iter_mut().enumerate() {
                    let (value, on) = source.probe_source(base.offset_by(dx as i32, dy as i32, dz as i32));
                    *cell = value;
                    active |= on;
                }
            }
        }
        let x0 = lerp(lerp(v[0][0][0], v[0][0][1], w.z), lerp(v[0][1][0], v[0][1][1], w.z), w.y);
        let x1 = lerp(lerp(v[1][0][0], v[1][0][1], w.z), lerp(v[1][1][0], v[1][1][1], w.z), w.y);
        (lerp(x0, x1, w.x), active)
    }
}

/// Parabola through `v` at -1, 0, 1, evaluated at `w`.
#[inline]
fn quadratic<T: Interpolant>(v: [T; 3], w: f64) -> T {
    let a = v[0].plus(v[2]).scaled(0.5).minus(v[1]);
    let b = v[2].minus(v[0]).scaled(0.5);
    a.scaled(w).plus(b).scaled(w).plus(v[1])
}

impl Sampler for QuadraticSampler {
    const RADIUS: i32 = 1;

    fn probe_sample<S>(source: &S, ijk: DVec3) -> (S::Value, bool)
    where
        S: ValueSource,
        S::Value: Interpolant,
    {
        let base = Coord::floor(ijk);
        let w = ijk - base.as_dvec3();
        let mut active = false;
        let mut vx = [S::Value::default(); 3];
        for (dx, x) in vx.iter_mut().enumerate() {
            let mut vy = [S::Value::default(); 3];
            for (dy, y) in vy.iter_mut().enumerate() {
                let mut vz = [S::Value::default(); 3];
                for (dz, z) in vz.iter_mut().enumerate() {
                    let (value, on) =
                        source.probe_source(base.offset_by(dx as i32 - 1, dy as i32 - 1, dz as i32 - 1));
                    *z = value;
                    active |= on;
                }
                *y = quadratic(vz, w.z);
            }
            *x = quadratic(vy, w.y);
        }
        (quadratic(vx, w.x), active)
    }
}

/// Binds a value source and a transform to a sampling scheme `M`.
pub struct GridSampler<S, M> {
    source: S,
    transform: Transform,
    scheme: PhantomData<M>,
}

impl<S: ValueSource, M: Sampler> GridSampler<S, M>
where
    S::Value: Interpolant,
{
    /// Samples in index space only (identity transform).
    pub fn new(source: S) -> Self {
        Self::with_transform(source, Transform::default())
    }
    pub fn with_transform(source: S, transform: Transform) -> Self {
        Self {
            source,
            transform,
            scheme: PhantomData,
        }
    }
    pub fn source(&self) -> &S {
        &self.source
    }
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn sample_voxel(&self, x: f64, y: f64, z: f64) -> S::Value {
        self.is_sample(DVec3::new(x, y, z))
    }
    /// Sample at an index-space position.
    pub fn is_sample(&self, ijk: DVec3) -> S::Value {
        M::sample(&self.source, ijk)
    }
    /// Sample at a world-space position.
    pub fn ws_sample(&self, xyz: DVec3) -> S::Value {
        self.is_sample(self.transform.world_to_index(xyz))
    }
    /// Index-space sample plus whether the stencil touched an active value.
    pub fn probe(&self, ijk: DVec3) -> (S::Value, bool) {
        M::probe_sample(&self.source, ijk)
    }
}

impl<'a, T: Interpolant, M: Sampler> GridSampler<&'a Tree<T>, M> {
    /// Samples a grid's tree through the grid's transform.
    pub fn from_grid(grid: &'a Grid<T>) -> Self {
        Self::with_transform(grid.tree(), *grid.transform())
    }
}
