//! Public kernel types: rays, hits, scene description inputs.

use crate::math::{Aabb, Affine3A, Vec3};
use std::fmt;
use std::sync::Arc;

/// Maximum number of enclosing sub-scene objects recorded in a hit.
pub const MAX_PARENTS: usize = 4;

/// Ray query input. The direction does not need to be normalized; the
/// maximum distance is passed separately to [`Scene::raytrace`].
///
/// [`Scene::raytrace`]: crate::Scene::raytrace
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    /// Minimum parametric distance; intersections at `t <= min_t` are
    /// rejected.
    pub min_t: f32,
}

impl Ray {
    #[inline]
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            min_t: 0.0,
        }
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Opaque identity of a scene object, carried through to hits untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Object {
    pub user: u64,
    pub index: usize,
}

impl Object {
    #[inline]
    pub fn new(user: u64, index: usize) -> Self {
        Self { user, index }
    }
}

/// Kind of geometry a hit landed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Geometry {
    Triangle,
    Sphere,
    Plane,
    /// Custom primitive; the tag is whatever the shape reports.
    User(i32),
}

/// Local surface frame at a hit point.
#[derive(Clone, Copy, Debug, Default)]
pub struct Surface {
    pub u: f32,
    pub v: f32,
    pub normal: Vec3,
    pub dp_du: Vec3,
    pub dp_dv: Vec3,
}

/// Result of a ray query.
#[derive(Clone, Debug)]
pub struct Hit {
    /// Parametric hit distance along the ray.
    pub t: f32,
    /// Geometric surface frame (flat normal, edge derivatives).
    pub geom: Surface,
    /// Attribute-interpolated surface frame.
    pub interp: Surface,
    /// Opaque pass-through for custom shapes; built-ins leave it zero.
    pub user: u64,
    /// Identity of the object that owns the hit geometry.
    pub object: Object,
    /// Mesh vertex indices of the hit triangle corners.
    pub vertex_index: [u32; 3],
    /// World-space positions of the hit triangle corners.
    pub vertex_pos: [Vec3; 3],
    parent_objects: [Object; MAX_PARENTS],
    num_parents: u32,
    /// Kind of geometry that was hit.
    pub geometry: Geometry,
}

impl Hit {
    pub(crate) fn with_max_t(max_t: f32) -> Self {
        Self {
            t: max_t,
            ..Self::default()
        }
    }

    /// Object identities of enclosing sub-scenes, innermost first.
    #[inline]
    pub fn parents(&self) -> &[Object] {
        &self.parent_objects[..self.num_parents as usize]
    }

    /// Record an enclosing sub-scene object; silently drops past the cap.
    #[inline]
    pub fn push_parent(&mut self, object: Object) {
        if (self.num_parents as usize) < MAX_PARENTS {
            self.parent_objects[self.num_parents as usize] = object;
            self.num_parents += 1;
        }
    }

    #[inline]
    pub(crate) fn clear_parents(&mut self) {
        self.num_parents = 0;
    }
}

impl Default for Hit {
    fn default() -> Self {
        Self {
            t: f32::INFINITY,
            geom: Surface::default(),
            interp: Surface::default(),
            user: 0,
            object: Object::default(),
            vertex_index: [0; 3],
            vertex_pos: [Vec3::ZERO; 3],
            parent_objects: [Object::default(); MAX_PARENTS],
            num_parents: 0,
            geometry: Geometry::Triangle,
        }
    }
}

/// Triangle mesh input. Attribute streams are flat `f32` slices addressed
/// with an element stride, so tightly packed and interleaved layouts both
/// work; a zero stride means the natural packed stride.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mesh<'a> {
    /// Vertex positions, 3 floats per vertex at `vertex_stride` spacing.
    pub vertices: &'a [f32],
    /// Stride between vertices in `f32` elements; 0 means 3.
    pub vertex_stride: usize,
    /// Optional per-vertex normals, 3 floats each.
    pub normals: Option<&'a [f32]>,
    pub normal_stride: usize,
    /// Optional per-vertex UVs, 2 floats each.
    pub uvs: Option<&'a [f32]>,
    pub uv_stride: usize,
    /// Triangle corner indices, three per face.
    pub indices: &'a [u32],
    /// Local-to-scene transform.
    pub transform: Affine3A,
    pub object: Object,
}

impl Mesh<'_> {
    #[inline]
    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Standalone world-space triangle input.
#[derive(Clone, Copy, Debug)]
pub struct Triangle {
    pub v: [Vec3; 3],
    pub object: Object,
}

/// Intersection behavior of an analytic primitive.
///
/// The ray arrives in the primitive's local space. An implementation must
/// only write to `hit` when it returns `true`, must not move `hit.t`
/// forward past its incoming value, and may read `hit.t` to early-out.
pub trait Shape: Send + Sync {
    fn intersect(&self, prim: &Primitive, ray: &Ray, hit: &mut Hit) -> bool;
}

/// Analytic primitive input: a local-space bounding box, a transform into
/// scene space and the shape that does the intersection work.
#[derive(Clone)]
pub struct Primitive {
    /// Bounds in the primitive's local space.
    pub bounds: Aabb,
    /// Local-to-scene transform.
    pub transform: Affine3A,
    pub object: Object,
    pub shape: Arc<dyn Shape>,
}

impl fmt::Debug for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Primitive")
            .field("bounds", &self.bounds)
            .field("transform", &self.transform)
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

/// Flat scene description consumed by [`Scene::build`]. Everything is
/// borrowed; the builder copies what it needs.
///
/// [`Scene::build`]: crate::Scene::build
#[derive(Clone, Copy, Debug, Default)]
pub struct SceneDesc<'a> {
    pub meshes: &'a [Mesh<'a>],
    pub triangles: &'a [Triangle],
    pub primitives: &'a [Primitive],
}
