//! Math types for the kernel.
//!
//! Vectors and affine transforms come from `glam`; this module adds the
//! axis-aligned bounding box and the handful of transform helpers the
//! builder and traversal need on top of [`Affine3A`].

pub use glam::{Affine3A, Mat3A, Vec2, Vec3, Vec3A, Vec4};

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Axis-aligned bounding box, single precision.
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Empty box (inverted, expands on first point).
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self {
            min: a.min(b).min(c),
            max: a.max(b).max(c),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn expand_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn expand_box(&mut self, other: &Self) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Surface area of the box.
    #[inline]
    pub fn area(&self) -> f32 {
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// True when `other` lies fully inside this box.
    #[inline]
    pub fn contains_box(&self, other: &Self) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    /// Index of the longest axis (0 = x, 1 = y, 2 = z).
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let d = self.max - self.min;
        let m = d.x.max(d.y).max(d.z);
        if d.x == m {
            0
        } else if d.y == m {
            1
        } else {
            2
        }
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Aabb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aabb({:?} - {:?})", self.min, self.max)
    }
}

#[inline]
pub(crate) fn is_identity(m: &Affine3A) -> bool {
    *m == Affine3A::IDENTITY
}

/// Transform a normal: multiply by the transpose of the linear part.
///
/// Pass the *inverse* of the forward transform to get the usual
/// inverse-transpose normal transform.
#[inline]
pub(crate) fn transform_normal(m: &Affine3A, n: Vec3) -> Vec3 {
    m.matrix3.transpose().mul_vec3a(n.into()).into()
}

/// Multiply a direction by the componentwise absolute value of the linear
/// part. `inf * 0` would produce NaN; every term is clamped to zero first
/// so infinite extents survive the transform as infinities.
#[inline]
pub(crate) fn transform_dir_abs(m: &Affine3A, v: Vec3) -> Vec3 {
    let zero = Vec3A::ZERO;
    let r = (m.matrix3.x_axis.abs() * v.x).max(zero)
        + (m.matrix3.y_axis.abs() * v.y).max(zero)
        + (m.matrix3.z_axis.abs() * v.z).max(zero);
    r.into()
}

#[inline]
fn flush_non_finite(v: Vec3) -> Vec3 {
    Vec3::new(
        if v.x.is_finite() { v.x } else { 0.0 },
        if v.y.is_finite() { v.y } else { 0.0 },
        if v.z.is_finite() { v.z } else { 0.0 },
    )
}

/// Transform a bounding box as center + half-extent. The center is flushed
/// to zero on non-finite components and the extent goes through
/// [`transform_dir_abs`], so boxes with infinite extents stay valid.
pub(crate) fn transform_aabb(bounds: &Aabb, m: &Affine3A) -> Aabb {
    let center = flush_non_finite((bounds.min + bounds.max) * 0.5);
    let extent = (bounds.max - bounds.min) * 0.5;

    let center = m.transform_point3(center);
    let extent = transform_dir_abs(m, extent);

    Aabb {
        min: center - extent,
        max: center + extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_area_and_union() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(a.area(), 6.0);

        let b = Aabb::new(Vec3::splat(2.0), Vec3::splat(3.0));
        let u = a.union(&b);
        assert_eq!(u.min, Vec3::ZERO);
        assert_eq!(u.max, Vec3::splat(3.0));
        assert!(u.contains_box(&a));
        assert!(u.contains_box(&b));
    }

    #[test]
    fn empty_aabb_expands() {
        let mut a = Aabb::EMPTY;
        assert!(a.is_empty());
        a.expand_point(Vec3::new(1.0, -2.0, 3.0));
        assert!(!a.is_empty());
        assert_eq!(a.min, a.max);
    }

    #[test]
    fn infinite_extent_survives_transform() {
        // A plane-like box that is infinite in y and z.
        let b = Aabb::new(
            Vec3::new(0.0, f32::NEG_INFINITY, f32::NEG_INFINITY),
            Vec3::new(0.0, f32::INFINITY, f32::INFINITY),
        );
        let m = Affine3A::from_translation(Vec3::new(5.0, 0.0, 0.0));
        let t = transform_aabb(&b, &m);
        assert_eq!(t.min.x, 5.0);
        assert_eq!(t.max.x, 5.0);
        assert_eq!(t.min.y, f32::NEG_INFINITY);
        assert_eq!(t.max.z, f32::INFINITY);
        assert!(!t.min.is_nan() && !t.max.is_nan());
    }

    #[test]
    fn abs_dir_flushes_nan() {
        let m = Affine3A::from_scale(Vec3::new(0.0, 1.0, 1.0));
        let v = Vec3::new(f32::INFINITY, 1.0, 1.0);
        let r = transform_dir_abs(&m, v);
        assert_eq!(r.x, 0.0);
        assert!(!r.y.is_nan() && !r.z.is_nan());
    }

    #[test]
    fn normal_transform_matches_inverse_transpose() {
        let m = Affine3A::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let inv = m.inverse();
        // Plane x + y = k has normal (1, 1, 0); after scaling x by 2 the
        // plane flattens and the normal tilts toward y.
        let n = transform_normal(&inv, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(n, Vec3::new(0.5, 1.0, 0.0));
    }
}
