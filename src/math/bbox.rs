use super::Coord;

/// Inclusive axis-aligned box of voxel coordinates.
///
/// An empty box has `min > max` on at least one axis; [`CoordBBox::empty`] is the
/// identity for [`CoordBBox::expand`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, bincode::Encode, bincode::Decode)]
pub struct CoordBBox {
    pub min: Coord,
    pub max: Coord,
}

impl Default for CoordBBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl CoordBBox {
    pub const fn new(min: Coord, max: Coord) -> Self {
        Self { min, max }
    }
    pub const fn empty() -> Self {
        Self::new(Coord::splat(i32::MAX), Coord::splat(i32::MIN))
    }
    /// Cube with corner `min` and side length `dim`.
    pub const fn create_cube(min: Coord, dim: i32) -> Self {
        Self::new(min, min.offset_by(dim - 1, dim - 1, dim - 1))
    }
    pub fn from_coord(xyz: Coord) -> Self {
        Self::new(xyz, xyz)
    }
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }
    /// Side lengths; zero on every axis for an empty box.
    pub fn dim(&self) -> Coord {
        if self.is_empty() {
            Coord::ZERO
        } else {
            self.max - self.min + Coord::splat(1)
        }
    }
    pub fn volume(&self) -> u64 {
        let d = self.dim();
        d.x as u64 * d.y as u64 * d.z as u64
    }
    pub fn contains(&self, xyz: Coord) -> bool {
        xyz.x >= self.min.x
            && xyz.y >= self.min.y
            && xyz.z >= self.min.z
            && xyz.x <= self.max.x
            && xyz.y <= self.max.y
            && xyz.z <= self.max.z
    }
    pub fn contains_bbox(&self, other: &CoordBBox) -> bool {
        !other.is_empty() && self.contains(other.min) && self.contains(other.max)
    }
    pub fn has_overlap(&self, other: &CoordBBox) -> bool {
        !self.intersection(other).is_empty()
    }
    pub fn intersection(&self, other: &CoordBBox) -> CoordBBox {
        CoordBBox::new(self.min.max(other.min), self.max.min(other.max))
    }
    pub fn expand(&mut self, xyz: Coord) {
        self.min = self.min.min(xyz);
        self.max = self.max.max(xyz);
    }
    pub fn expand_bbox(&mut self, other: &CoordBBox) {
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }
    /// Grows (or shrinks, for negative `n`) every face by `n` voxels.
    pub fn expanded_by(&self, n: i32) -> CoordBBox {
        CoordBBox::new(self.min - Coord::splat(n), self.max + Coord::splat(n))
    }
    pub fn translated(&self, t: Coord) -> CoordBBox {
        CoordBBox::new(self.min + t, self.max + t)
    }
    /// Coordinates in x-major order (z varies fastest).
    pub fn iter(&self) -> CoordIter {
        CoordIter {
            bbox: *self,
            next: if self.is_empty() { None } else { Some(self.min) },
        }
    }
}

impl IntoIterator for CoordBBox {
    type Item = Coord;
    type IntoIter = CoordIter;
    fn into_iter(self) -> CoordIter {
        self.iter()
    }
}

pub struct CoordIter {
    bbox: CoordBBox,
    next: Option<Coord>,
}

impl Iterator for CoordIter {
    type Item = Coord;
    fn next(&mut self) -> Option<Coord> {
        let current = self.next?;
        let mut n = current;
        n.z += 1;
        if n.z > self.bbox.max.z {
            n.z = self.bbox.min.z;
            n.y += 1;
            if n.y > self.bbox.max.y {
                n.y = self.bbox.min.y;
                n.x += 1;
            }
        }
        self.next = (n.x <= self.bbox.max.x).then_some(n);
        Some(current)
    }
}
