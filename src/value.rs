//! Traits describing what a grid can store.

use std::fmt::Debug;

use glam::{DVec3, Vec3};

/// Anything a tree can hold per voxel or per tile.
pub trait GridValue: Copy + PartialEq + Default + Debug + Send + Sync + 'static {
    /// Tolerance comparison used by pruning and value matching.
    fn is_approx_equal(&self, other: &Self, tolerance: &Self) -> bool;
}

/// Values that can be blended, which is what the samplers and compositors need.
pub trait Interpolant: GridValue {
    fn plus(self, rhs: Self) -> Self;
    fn minus(self, rhs: Self) -> Self;
    fn scaled(self, w: f64) -> Self;
    /// The value itself for scalars, the length for vectors.
    fn scalar(self) -> f64;
    fn is_nan(self) -> bool;
    fn is_infinite(self) -> bool;
    fn is_finite(self) -> bool;
}

/// Ordered scalar values (level sets, fog volumes, filters).
pub trait RealValue: Interpolant + PartialOrd {
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
    fn zero() -> Self {
        Self::from_f64(0.0)
    }
    fn one() -> Self {
        Self::from_f64(1.0)
    }
    fn abs(self) -> Self {
        if self < Self::zero() { self.scaled(-1.0) } else { self }
    }
}

macro_rules! exact_value {
    ($($t:ty),*) => {$(
        impl GridValue for $t {
            fn is_approx_equal(&self, other: &Self, tolerance: &Self) -> bool {
                self.abs_diff(*other) <= (*tolerance as i128).unsigned_abs() as _
            }
        }
    )*};
}
exact_value!(u8, u32, i32, i64);

impl GridValue for bool {
    fn is_approx_equal(&self, other: &Self, _tolerance: &Self) -> bool {
        self == other
    }
}

macro_rules! float_value {
    ($($t:ty),*) => {$(
        impl GridValue for $t {
            fn is_approx_equal(&self, other: &Self, tolerance: &Self) -> bool {
                (self - other).abs() <= *tolerance
            }
        }
        impl Interpolant for $t {
            fn plus(self, rhs: Self) -> Self {
                self + rhs
            }
            fn minus(self, rhs: Self) -> Self {
                self - rhs
            }
            fn scaled(self, w: f64) -> Self {
                (self as f64 * w) as $t
            }
            fn scalar(self) -> f64 {
                self as f64
            }
            fn is_nan(self) -> bool {
                <$t>::is_nan(self)
            }
            fn is_infinite(self) -> bool {
                <$t>::is_infinite(self)
            }
            fn is_finite(self) -> bool {
                <$t>::is_finite(self)
            }
        }
        impl RealValue for $t {
            fn from_f64(v: f64) -> Self {
                v as $t
            }
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    )*};
}
float_value!(f32, f64);

impl GridValue for Vec3 {
    fn is_approx_equal(&self, other: &Self, tolerance: &Self) -> bool {
        (*self - *other).abs().cmple(*tolerance).all()
    }
}
impl Interpolant for Vec3 {
    fn plus(self, rhs: Self) -> Self {
        self + rhs
    }
    fn minus(self, rhs: Self) -> Self {
        self - rhs
    }
    fn scaled(self, w: f64) -> Self {
        (self.as_dvec3() * w).as_vec3()
    }
    fn scalar(self) -> f64 {
        self.length() as f64
    }
    fn is_nan(self) -> bool {
        self.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.to_array().iter().any(|c| c.is_infinite())
    }
    fn is_finite(self) -> bool {
        self.is_finite()
    }
}

impl GridValue for DVec3 {
    fn is_approx_equal(&self, other: &Self, tolerance: &Self) -> bool {
        (*self - *other).abs().cmple(*tolerance).all()
    }
}
impl Interpolant for DVec3 {
    fn plus(self, rhs: Self) -> Self {
        self + rhs
    }
    fn minus(self, rhs: Self) -> Self {
        self - rhs
    }
    fn scaled(self, w: f64) -> Self {
        self * w
    }
    fn scalar(self) -> f64 {
        self.length()
    }
    fn is_nan(self) -> bool {
        self.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.to_array().iter().any(|c| c.is_infinite())
    }
    fn is_finite(self) -> bool {
        self.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_comparisons() {
        assert!(1.0f32.is_approx_equal(&1.05, &0.1));
        assert!(!1.0f32.is_approx_equal(&1.2, &0.1));
        assert!(5i32.is_approx_equal(&3, &2));
        assert!(!5i32.is_approx_equal(&2, &2));
        assert!(true.is_approx_equal(&true, &false));
        assert!(Vec3::ONE.is_approx_equal(&Vec3::new(1.0, 1.01, 0.99), &Vec3::splat(0.02)));
    }

    #[test]
    fn blending_and_classification() {
        assert_eq!(2.0f32.plus(1.0).scaled(0.5), 1.5);
        assert_eq!(Vec3::new(3.0, 4.0, 0.0).scalar(), 5.0);
        assert!(Interpolant::is_infinite(f32::INFINITY));
        assert!(!Interpolant::is_finite(f64::NAN));
        assert!(Interpolant::is_infinite(Vec3::new(0.0, f32::NEG_INFINITY, 0.0)));
        assert!(!Interpolant::is_infinite(Vec3::new(0.0, f32::NAN, 0.0)));
        assert_eq!(RealValue::abs(-2.5f64), 2.5);
    }
}
