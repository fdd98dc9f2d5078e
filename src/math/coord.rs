use std::ops::{Add, AddAssign, Index, IndexMut, Neg, Sub, SubAssign};

use glam::{DVec3, IVec3};

/// Signed integer voxel address.
///
/// Ordering is lexicographic on `(x, y, z)`, which is the traversal order of the root map.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, bincode::Encode, bincode::Decode,
)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coord {
    pub const ZERO: Coord = Coord::new(0, 0, 0);

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
    pub const fn splat(v: i32) -> Self {
        Self::new(v, v, v)
    }
    pub const fn offset_by(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
    /// Clears the low `log2` bits of every component, giving the origin of the
    /// enclosing aligned block of side `1 << log2`. Works for negative values.
    pub const fn aligned(self, log2: u32) -> Self {
        let mask = !((1i32 << log2) - 1);
        Self::new(self.x & mask, self.y & mask, self.z & mask)
    }
    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }
    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }
    pub fn min_component(self) -> i32 {
        self.x.min(self.y).min(self.z)
    }
    pub fn max_component(self) -> i32 {
        self.x.max(self.y).max(self.z)
    }
    /// Floor of a fractional position, identical for positive and negative inputs.
    pub fn floor(p: DVec3) -> Self {
        let f = p.floor();
        Self::new(f.x as i32, f.y as i32, f.z as i32)
    }
    /// Nearest lattice point, rounding halves toward positive infinity.
    pub fn round(p: DVec3) -> Self {
        Self::floor(p + DVec3::splat(0.5))
    }
    pub fn as_dvec3(self) -> DVec3 {
        DVec3::new(self.x as f64, self.y as f64, self.z as f64)
    }
    pub fn to_array(self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<IVec3> for Coord {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}
impl From<Coord> for IVec3 {
    fn from(c: Coord) -> Self {
        IVec3::new(c.x, c.y, c.z)
    }
}
impl From<[i32; 3]> for Coord {
    fn from(v: [i32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl Add for Coord {
    type Output = Coord;
    fn add(self, rhs: Coord) -> Coord {
        Coord::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}
impl Sub for Coord {
    type Output = Coord;
    fn sub(self, rhs: Coord) -> Coord {
        Coord::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}
impl Neg for Coord {
    type Output = Coord;
    fn neg(self) -> Coord {
        Coord::new(-self.x, -self.y, -self.z)
    }
}
impl AddAssign for Coord {
    fn add_assign(&mut self, rhs: Coord) {
        *self = *self + rhs;
    }
}
impl SubAssign for Coord {
    fn sub_assign(&mut self, rhs: Coord) {
        *self = *self - rhs;
    }
}

impl Index<usize> for Coord {
    type Output = i32;
    fn index(&self, axis: usize) -> &i32 {
        match axis {
            0 => &self.x,
            1 => &self.y,
            _ => &self.z,
        }
    }
}
impl IndexMut<usize> for Coord {
    fn index_mut(&mut self, axis: usize) -> &mut i32 {
        match axis {
            0 => &mut self.x,
            1 => &mut self.y,
            _ => &mut self.z,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_handles_negative_coordinates() {
        assert_eq!(Coord::new(9, 15, 16).aligned(3), Coord::new(8, 8, 16));
        assert_eq!(Coord::new(-1, -8, -9).aligned(3), Coord::new(-8, -8, -16));
        assert_eq!(Coord::new(-1, 0, 4095).aligned(12), Coord::new(-4096, 0, 0));
    }

    #[test]
    fn floor_and_round_are_sign_symmetric() {
        assert_eq!(Coord::floor(DVec3::new(-0.5, 0.5, -10.1)), Coord::new(-1, 0, -11));
        assert_eq!(Coord::round(DVec3::new(-0.4, 0.5, 10.6)), Coord::new(0, 1, 11));
        assert_eq!(Coord::round(DVec3::new(-1.6, -2.5, 2.5)), Coord::new(-2, -2, 3));
    }

    #[test]
    fn arithmetic_and_ordering() {
        let a = Coord::new(1, 2, 3);
        let b = Coord::splat(1);
        assert_eq!(a + b, Coord::new(2, 3, 4));
        assert_eq!(a - b, Coord::new(0, 1, 2));
        assert_eq!(-a, Coord::new(-1, -2, -3));
        assert_eq!(a[2], 3);
        assert!(Coord::new(0, 9, 9) < Coord::new(1, 0, 0));
        assert_eq!(a.min(Coord::new(0, 5, 3)), Coord::new(0, 2, 3));
        assert_eq!(a.max_component(), 3);
    }
}
