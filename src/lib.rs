//! # rtk
//!
//! Compact CPU ray-tracing kernel. Feed it a static scene of triangle
//! meshes, standalone triangles and analytic primitives; it builds a
//! 4-wide SAH BVH with per-leaf vertex groups and answers nearest-hit ray
//! queries with interpolated surface attributes.
//!
//! ## Modules
//!
//! - [`math`] - Vectors/affines (re-exported from `glam`) and [`Aabb`]
//! - [`types`] - [`Ray`], [`Hit`], scene description inputs
//! - [`scene`] - The retained [`Scene`] and the BVH inspection interface
//!
//! ## Example
//!
//! ```
//! use rtk::{Mesh, Ray, Scene, SceneDesc};
//! use rtk::math::Vec3;
//!
//! // One triangle in the z = 0 plane.
//! let vertices = [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
//! let indices = [0u32, 1, 2];
//! let meshes = [Mesh {
//!     vertices: &vertices,
//!     indices: &indices,
//!     ..Default::default()
//! }];
//!
//! let scene = Scene::build(&SceneDesc {
//!     meshes: &meshes,
//!     ..Default::default()
//! });
//!
//! let ray = Ray::new(Vec3::new(0.2, 0.2, -1.0), Vec3::Z);
//! let hit = scene.raytrace(&ray, f32::INFINITY).unwrap();
//! assert!((hit.t - 1.0).abs() < 1e-6);
//! ```
//!
//! A built scene is immutable and `Sync`; share it by reference across as
//! many query threads as you like.

pub mod math;
pub mod scene;
pub mod types;

mod build;
mod query;
mod shapes;
mod trace;
mod wide;

// Re-export commonly used types
pub use math::Aabb;
pub use scene::{
    BvhChildren, BvhCursor, BvhRecord, LeafHandle, LeafTriangleView, LeafView, Scene,
};
pub use types::{
    Geometry, Hit, Mesh, Object, Primitive, Ray, SceneDesc, Shape, Surface, Triangle, MAX_PARENTS,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::math::{Aabb, Affine3A, Vec2, Vec3};
    pub use crate::scene::{BvhChildren, BvhCursor, BvhRecord, LeafHandle, LeafView, Scene};
    pub use crate::types::{
        Geometry, Hit, Mesh, Object, Primitive, Ray, SceneDesc, Shape, Surface, Triangle,
    };
}
