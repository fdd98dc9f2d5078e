mod bbox;
mod coord;
mod transform;

pub use bbox::{CoordBBox, CoordIter};
pub use coord::Coord;
pub use transform::Transform;

/// Unit offsets of the 26 neighbours of a voxel, faces first, then edges, then corners.
pub(crate) fn neighbor_offsets(max_nonzero_axes: usize) -> Vec<Coord> {
    let mut out = Vec::with_capacity(26);
    for axes in 1..=max_nonzero_axes.min(3) {
        for x in -1..=1 {
            for y in -1..=1 {
                for z in -1..=1 {
                    let nonzero = [x, y, z].iter().filter(|v| **v != 0).count();
                    if nonzero == axes {
                        out.push(Coord::new(x, y, z));
                    }
                }
            }
        }
    }
    out
}

/// Cubic smoothstep on `[0, 1]`, clamped outside.
pub fn smooth_unit_step(x: f64) -> f64 {
    if x <= 0.0 {
        0.0
    } else if x >= 1.0 {
        1.0
    } else {
        x * x * (3.0 - 2.0 * x)
    }
}
