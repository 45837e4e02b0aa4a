//! Retained scene: the packed wide-BVH node/leaf records and the arenas
//! that own every post-build structure.
//!
//! All cross-references inside the scene are indices. [`ChildRef`] tags the
//! arena in its low bit (node or leaf) instead of tagging a machine
//! pointer, and a [`Leaf`] addresses its triangle records, primitive
//! records, object table and vertex group as ranges of the shared arenas.

use crate::math::{Aabb, Affine3A, Vec2, Vec3};
use crate::types::{Mesh, Object, Primitive, Ray, SceneDesc, Triangle};

/// Deepest binary tree the builder will produce.
pub(crate) const MAX_DEPTH: usize = 32;
/// Number of SAH candidate buckets per axis.
pub(crate) const SAH_BUCKETS: usize = 32;
/// Node ranges at or below this size become leaves outright.
pub(crate) const LEAF_MIN_ITEMS: usize = 4;
/// Hard cap on items in one leaf.
pub(crate) const LEAF_MAX_ITEMS: usize = 64;
/// Hard cap on unique vertices referenced by one vertex group.
pub(crate) const GROUP_MAX_VERTICES: usize = 256;
pub(crate) const SAH_NODE_COST: f32 = 1.0;
pub(crate) const SAH_ITEM_COST: f32 = 1.0;

#[inline]
pub(crate) fn align_up4(v: usize) -> usize {
    (v + 3) & !3
}

/// Tagged reference to either a wide node (low bit 0) or a leaf (low bit
/// 1), indexing the scene's node or leaf arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub(crate) struct ChildRef(u32);

impl ChildRef {
    /// The shared sentinel empty leaf sits at leaf index 0.
    pub const EMPTY_LEAF: Self = Self::leaf(0);

    #[inline]
    pub const fn node(index: u32) -> Self {
        Self(index << 1)
    }

    #[inline]
    pub const fn leaf(index: u32) -> Self {
        Self(index << 1 | 1)
    }

    #[inline]
    pub fn is_node(self) -> bool {
        self.0 & 1 == 0
    }

    #[inline]
    pub fn index(self) -> usize {
        (self.0 >> 1) as usize
    }
}

/// 4-wide BVH node, one cache line pair.
///
/// Bounds are stored per axis as two rows of four lanes (row 0 = min,
/// row 1 = max) so a ray direction sign bit selects the near plane row
/// directly.
#[derive(Clone, Copy, Debug)]
#[repr(C, align(128))]
pub(crate) struct WideNode {
    pub bounds_x: [[f32; 4]; 2],
    pub bounds_y: [[f32; 4]; 2],
    pub bounds_z: [[f32; 4]; 2],
    pub child: [ChildRef; 4],
}

const _: () = assert!(std::mem::size_of::<WideNode>() == 128);
const _: () = assert!(std::mem::align_of::<WideNode>() == 128);

impl WideNode {
    pub(crate) fn empty() -> Self {
        Self {
            bounds_x: [[0.0; 4]; 2],
            bounds_y: [[0.0; 4]; 2],
            bounds_z: [[0.0; 4]; 2],
            child: [ChildRef::EMPTY_LEAF; 4],
        }
    }

    #[inline]
    pub(crate) fn set_child_bounds(&mut self, slot: usize, bounds: &Aabb) {
        self.bounds_x[0][slot] = bounds.min.x;
        self.bounds_x[1][slot] = bounds.max.x;
        self.bounds_y[0][slot] = bounds.min.y;
        self.bounds_y[1][slot] = bounds.max.y;
        self.bounds_z[0][slot] = bounds.min.z;
        self.bounds_z[1][slot] = bounds.max.z;
    }

    #[inline]
    pub(crate) fn child_bounds(&self, slot: usize) -> Aabb {
        Aabb::new(
            Vec3::new(
                self.bounds_x[0][slot],
                self.bounds_y[0][slot],
                self.bounds_z[0][slot],
            ),
            Vec3::new(
                self.bounds_x[1][slot],
                self.bounds_y[1][slot],
                self.bounds_z[1][slot],
            ),
        )
    }
}

/// Leaf header; the payload lives in the scene arenas at these ranges.
/// Triangle records are padded to a multiple of four (duplicating the
/// first record) so the batched intersector never reads garbage lanes.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub(crate) struct Leaf {
    pub vert_start: u32,
    pub vert_len: u32,
    pub tri_start: u32,
    pub num_tris: u32,
    pub prim_start: u32,
    pub num_prims: u32,
    pub obj_start: u32,
    pub num_objs: u32,
}

/// Triangle record inside a leaf: three vertex-group indices and an index
/// into the leaf's object table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub(crate) struct LeafTri {
    pub v: [u8; 3],
    pub obj: u8,
}

/// Primitive record inside a leaf; the inverse transform is cached at
/// build time (primitives never mutate after build).
#[derive(Clone)]
pub(crate) struct LeafPrim {
    pub prim: Primitive,
    pub inv_transform: Affine3A,
}

/// One vertex of a leaf vertex group: world-space position plus the
/// original mesh vertex index for attribute lookups at shading time.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C, align(16))]
pub(crate) struct GroupVertex {
    pub pos: Vec3,
    pub index: u32,
}

const _: () = assert!(std::mem::size_of::<GroupVertex>() == 16);

/// Per-mesh shading data. Attribute offsets index the packed UV / normal
/// arenas; meshes that shared a source buffer share the offset.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MeshData {
    pub object: Object,
    pub uv_offset: Option<u32>,
    pub normal_offset: Option<u32>,
}

/// Sentinel mesh index meaning "not a mesh triangle" (primitive hit).
pub(crate) const MESH_NONE: u32 = u32::MAX;

/// Immutable retained scene. Built once from a [`SceneDesc`], then queried
/// from any number of threads; see [`Scene::raytrace`].
pub struct Scene {
    pub(crate) root: WideNode,
    pub(crate) bounds: Aabb,
    pub(crate) nodes: Box<[WideNode]>,
    pub(crate) leaves: Box<[Leaf]>,
    pub(crate) tris: Box<[LeafTri]>,
    pub(crate) prims: Box<[LeafPrim]>,
    /// Mesh index per unique owning mesh, concatenated per leaf.
    pub(crate) tri_objs: Box<[u32]>,
    pub(crate) verts: Box<[GroupVertex]>,
    pub(crate) meshes: Box<[MeshData]>,
    pub(crate) uv_data: Box<[Vec2]>,
    pub(crate) normal_data: Box<[Vec3]>,
    pub(crate) memory_size: usize,
}

impl Scene {
    /// Build a scene from a description. Infallible: a description with no
    /// geometry still produces a valid (always-missing) scene.
    pub fn build(desc: &SceneDesc<'_>) -> Self {
        crate::build::build(desc)
    }

    /// Convenience build from plain slices.
    pub fn from_parts(meshes: &[Mesh<'_>], triangles: &[Triangle], primitives: &[Primitive]) -> Self {
        Self::build(&SceneDesc {
            meshes,
            triangles,
            primitives,
        })
    }

    /// Bounding box of everything in the scene.
    #[inline]
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Total retained memory of the scene in bytes.
    #[inline]
    pub fn used_memory(&self) -> usize {
        self.memory_size
    }

    #[inline]
    pub(crate) fn node(&self, index: usize) -> &WideNode {
        &self.nodes[index]
    }

    #[inline]
    pub(crate) fn leaf(&self, index: usize) -> &Leaf {
        &self.leaves[index]
    }

    /// Padded triangle records of a leaf (length is a multiple of 4).
    #[inline]
    pub(crate) fn leaf_tris_padded(&self, leaf: &Leaf) -> &[LeafTri] {
        let start = leaf.tri_start as usize;
        &self.tris[start..start + align_up4(leaf.num_tris as usize)]
    }

    #[inline]
    pub(crate) fn leaf_prims(&self, leaf: &Leaf) -> &[LeafPrim] {
        let start = leaf.prim_start as usize;
        &self.prims[start..start + leaf.num_prims as usize]
    }

    #[inline]
    pub(crate) fn leaf_objs(&self, leaf: &Leaf) -> &[u32] {
        let start = leaf.obj_start as usize;
        &self.tri_objs[start..start + leaf.num_objs as usize]
    }

    #[inline]
    pub(crate) fn leaf_group(&self, leaf: &Leaf) -> &[GroupVertex] {
        let start = leaf.vert_start as usize;
        &self.verts[start..start + leaf.vert_len as usize]
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("bounds", &self.bounds)
            .field("nodes", &self.nodes.len())
            .field("leaves", &self.leaves.len())
            .field("verts", &self.verts.len())
            .field("memory_size", &self.memory_size)
            .finish()
    }
}

// -- Inspection interface (for visualization / validation)

/// Opaque cursor into the wide BVH; the root record is [`BvhCursor::ROOT`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BvhCursor(usize);

impl BvhCursor {
    pub const ROOT: Self = Self(0);

    // Cursors other than the root encode (raw node id, slot); raw id 0 is
    // the inlined root node, id k+1 is arena node k.
    #[inline]
    fn pack(raw_node: usize, slot: usize) -> Self {
        Self(4 + (raw_node << 2) + slot)
    }
}

/// Opaque handle to a BVH leaf, obtained from [`Scene::get_bvh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LeafHandle(pub(crate) usize);

/// One record of the wide BVH as seen through the inspection interface.
#[derive(Clone, Copy, Debug)]
pub struct BvhRecord {
    pub bounds: Aabb,
    pub children: BvhChildren,
}

/// Children of a BVH record: four inner cursors or a leaf handle.
#[derive(Clone, Copy, Debug)]
pub enum BvhChildren {
    Inner([BvhCursor; 4]),
    Leaf(LeafHandle),
}

/// Decoded view of a leaf: world-space triangles and primitives.
#[derive(Clone, Debug, Default)]
pub struct LeafView {
    pub triangles: Vec<LeafTriangleView>,
    pub primitives: Vec<Primitive>,
}

/// One decoded leaf triangle.
#[derive(Clone, Copy, Debug)]
pub struct LeafTriangleView {
    pub v: [Vec3; 3],
    pub index: [u32; 3],
    pub object: Object,
}

impl Scene {
    /// Read one BVH record. Start from [`BvhCursor::ROOT`] and expand the
    /// returned child cursors; a [`BvhChildren::Leaf`] handle feeds
    /// [`Scene::get_leaf`].
    pub fn get_bvh(&self, cursor: BvhCursor) -> BvhRecord {
        if cursor == BvhCursor::ROOT {
            return BvhRecord {
                bounds: self.bounds,
                children: BvhChildren::Inner(std::array::from_fn(|s| BvhCursor::pack(0, s))),
            };
        }

        let raw = cursor.0 - 4;
        let slot = raw & 3;
        let raw_node = raw >> 2;
        let node = if raw_node == 0 {
            &self.root
        } else {
            self.node(raw_node - 1)
        };

        let bounds = node.child_bounds(slot);
        let child = node.child[slot];
        let children = if child.is_node() {
            BvhChildren::Inner(std::array::from_fn(|s| BvhCursor::pack(child.index() + 1, s)))
        } else {
            BvhChildren::Leaf(LeafHandle(child.index()))
        };
        BvhRecord { bounds, children }
    }

    /// Decode a leaf into world-space triangles and primitives.
    pub fn get_leaf(&self, handle: LeafHandle) -> LeafView {
        let leaf = self.leaf(handle.0);
        let group = self.leaf_group(leaf);
        let objs = self.leaf_objs(leaf);

        let mut view = LeafView {
            triangles: Vec::with_capacity(leaf.num_tris as usize),
            primitives: Vec::with_capacity(leaf.num_prims as usize),
        };

        let start = leaf.tri_start as usize;
        for tri in &self.tris[start..start + leaf.num_tris as usize] {
            let [a, b, c] = tri.v.map(|ix| group[ix as usize]);
            view.triangles.push(LeafTriangleView {
                v: [a.pos, b.pos, c.pos],
                index: [a.index, b.index, c.index],
                object: self.meshes[objs[tri.obj as usize] as usize].object,
            });
        }
        for prim in self.leaf_prims(leaf) {
            view.primitives.push(prim.prim.clone());
        }
        view
    }
}

/// Intersect a ray against an AABB; returns the entry `t` or `+inf` on a
/// miss. Uses a true reciprocal per component.
#[inline]
pub(crate) fn intersect_aabb_ray(bounds: &Aabb, ray: &Ray) -> f32 {
    let rcp = Vec3::new(
        1.0 / ray.direction.x,
        1.0 / ray.direction.y,
        1.0 / ray.direction.z,
    );
    let t_lo = (bounds.min - ray.origin) * rcp;
    let t_hi = (bounds.max - ray.origin) * rcp;

    let t_min3 = t_lo.min(t_hi);
    let t_max3 = t_lo.max(t_hi);

    let t_min = t_min3.x.max(t_min3.y).max(t_min3.z);
    let t_max = t_max3.x.min(t_max3.y).min(t_max3.z);

    if t_min <= t_max && t_max >= ray.min_t {
        t_min
    } else {
        f32::INFINITY
    }
}
