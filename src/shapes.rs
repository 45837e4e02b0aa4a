//! Built-in primitive shapes and their [`Primitive`] constructors: the
//! unit sphere, the `x = 0` plane and the sub-scene instance.

use crate::math::{Aabb, Affine3A, Vec3};
use crate::scene::Scene;
use crate::types::{Geometry, Hit, Object, Primitive, Ray, Shape};
use std::f32::consts::{PI, TAU};
use std::sync::Arc;

/// Unit sphere at the local origin with spherical UVs: `u` wraps around
/// the z axis, `v` runs from the `-z` pole (`0.5`) toward `+z`.
struct SphereShape;

impl Shape for SphereShape {
    fn intersect(&self, prim: &Primitive, ray: &Ray, hit: &mut Hit) -> bool {
        let a = ray.direction.dot(ray.direction);
        let b = 2.0 * ray.origin.dot(ray.direction);
        let c = ray.origin.dot(ray.origin) - 1.0;
        let disc = b * b - 4.0 * a * c;
        if disc < 0.0 {
            return false;
        }
        let root = disc.sqrt();
        let denom = 0.5 / a;
        let t0 = (-b - root) * denom;
        let t1 = (-b + root) * denom;
        let t = if t0 > ray.min_t { t0 } else { t1 };

        if t > ray.min_t && t < hit.t {
            let n = ray.at(t);
            let phi_radius = (n.x * n.x + n.y * n.y).sqrt();
            let phi = n.y.atan2(n.x);
            let theta = (-n.z).acos();
            let cos_phi = n.x * phi_radius;
            let sin_phi = n.y * phi_radius;
            let sin_theta = (1.0 - n.z * n.z).max(0.0).sqrt();

            hit.t = t;
            hit.geom.u = phi * (0.5 / PI) + 0.5;
            hit.geom.v = theta * (1.0 / PI) + 0.5;
            hit.geom.dp_du = Vec3::new(-n.y * TAU, n.x * TAU, 0.0);
            hit.geom.dp_dv = Vec3::new(-n.z * cos_phi * PI, -n.z * sin_phi * PI, sin_theta * PI);
            hit.geom.normal = n;
            hit.interp = hit.geom;
            hit.user = 0;
            hit.object = prim.object;
            hit.clear_parents();
            hit.geometry = Geometry::Sphere;
            true
        } else {
            false
        }
    }
}

/// The local `x = 0` plane; `y` and `z` serve as UVs.
struct PlaneShape;

impl Shape for PlaneShape {
    fn intersect(&self, prim: &Primitive, ray: &Ray, hit: &mut Hit) -> bool {
        let t = -ray.origin.x / ray.direction.x;
        if t > ray.min_t && t < hit.t {
            hit.t = t;
            hit.geom.u = ray.origin.y + ray.direction.y * t;
            hit.geom.v = ray.origin.z + ray.direction.z * t;
            hit.geom.normal = Vec3::X;
            hit.geom.dp_du = Vec3::Y;
            hit.geom.dp_dv = Vec3::Z;
            hit.interp = hit.geom;
            hit.user = 0;
            hit.object = prim.object;
            hit.clear_parents();
            hit.geometry = Geometry::Plane;
            true
        } else {
            false
        }
    }
}

/// A whole scene nested as a primitive. Hits record the instance object
/// as a parent, so shading can tell nested instances apart.
struct SubSceneShape {
    scene: Arc<Scene>,
}

impl Shape for SubSceneShape {
    fn intersect(&self, prim: &Primitive, ray: &Ray, hit: &mut Hit) -> bool {
        if let Some(mut inner) = self.scene.raytrace(ray, hit.t) {
            inner.push_parent(prim.object);
            *hit = inner;
            true
        } else {
            false
        }
    }
}

impl Primitive {
    /// Instance `scene` as a primitive, optionally transformed.
    pub fn subscene(scene: Arc<Scene>, transform: Option<Affine3A>, object: Object) -> Self {
        Self {
            bounds: scene.bounds(),
            transform: transform.unwrap_or(Affine3A::IDENTITY),
            object,
            shape: Arc::new(SubSceneShape { scene }),
        }
    }

    /// Sphere at `origin` with `radius`, optionally transformed further.
    pub fn sphere(
        origin: Vec3,
        radius: f32,
        transform: Option<Affine3A>,
        object: Object,
    ) -> Self {
        let mut m =
            Affine3A::from_translation(origin) * Affine3A::from_scale(Vec3::splat(radius));
        if let Some(t) = transform {
            m = t * m;
        }
        Self {
            bounds: Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)),
            transform: m,
            object,
            shape: Arc::new(SphereShape),
        }
    }

    /// Infinite plane facing `normal` at offset `d` along it, optionally
    /// transformed further.
    pub fn plane(normal: Vec3, d: f32, transform: Option<Affine3A>, object: Object) -> Self {
        let normal = normal.normalize();
        let right = if normal.x.abs() < 0.5 { Vec3::X } else { Vec3::Y };
        let up = normal.cross(right).normalize();
        let right = normal.cross(up).normalize();

        let mut m = Affine3A::from_cols(
            normal.into(),
            up.into(),
            right.into(),
            (normal * d).into(),
        );
        if let Some(t) = transform {
            m = t * m;
        }
        Self {
            bounds: Aabb::new(
                Vec3::new(0.0, f32::NEG_INFINITY, f32::NEG_INFINITY),
                Vec3::new(0.0, f32::INFINITY, f32::INFINITY),
            ),
            transform: m,
            object,
            shape: Arc::new(PlaneShape),
        }
    }
}
