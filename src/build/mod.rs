//! Top-down BVH builder.
//!
//! The build runs in four passes over transient state:
//! item extraction ([`item`]), recursive SAH partitioning ([`split`]),
//! vertex-group closure ([`group`]) and final linearization into the packed
//! wide tree ([`emit`]).

mod emit;
mod group;
mod item;
mod split;

use crate::math::Aabb;
use crate::scene::{GroupVertex, Scene, MAX_DEPTH};
use crate::types::SceneDesc;
use tracing::debug;

/// Sentinel mesh slot for standalone triangles.
pub(crate) const MESH_IX_TRI: u32 = u32::MAX - 1;
/// Sentinel mesh slot for primitives.
pub(crate) const MESH_IX_PRIM: u32 = u32::MAX;

pub(crate) const NONE: u32 = u32::MAX;

/// Uniform build item: one triangle or one primitive.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BuildItem {
    pub bounds: Aabb,
    /// Mesh slot, or one of the `MESH_IX_*` sentinels.
    pub mesh: u32,
    /// Triangle vertex indices (into the source mesh before group closure,
    /// into the leaf vertex group after), or `[prim_ix, 0, 0]` for
    /// primitives.
    pub data: [u32; 3],
}

impl BuildItem {
    /// Twice the centroid along `axis`; cheap sort/bucket key.
    #[inline]
    pub fn centroid2(&self, axis: usize) -> f32 {
        self.bounds.min[axis] + self.bounds.max[axis]
    }
}

/// Transient binary tree node. Children are stored as an adjacent pair in
/// `Builder::nodes` at `child_ix`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BuildNode {
    pub bounds: Aabb,
    /// Range in `Builder::items`.
    pub begin: u32,
    pub num: u32,
    /// Index of the child pair, `NONE` for leaves.
    pub child_ix: u32,
    /// Assigned vertex group offset, `NONE` until closure.
    pub vertex_offset: u32,
    /// Assigned vertex group length.
    pub vertex_len: u32,
    /// Triangle count when the node is a leaf.
    pub num_tris: u32,
}

impl BuildNode {
    pub(crate) fn new(begin: u32, num: u32) -> Self {
        Self {
            bounds: Aabb::EMPTY,
            begin,
            num,
            child_ix: NONE,
            vertex_offset: NONE,
            vertex_len: 0,
            num_tris: 0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum AttribKind {
    Uv,
    Normal,
}

/// One mesh attribute stream seen during extraction; deduplicated by
/// source address before the copy into the scene arenas.
pub(crate) struct BuildAttrib<'a> {
    pub data: &'a [f32],
    /// Element stride in floats (already resolved, never zero).
    pub stride: usize,
    /// Number of vertices the mesh actually indexes.
    pub num_vertices: u32,
    pub mesh_ix: u32,
    pub kind: AttribKind,
    /// Offset into the typed attribute arena, filled by dedup.
    pub offset: u32,
    /// True for the copy that owns the arena range.
    pub primary: bool,
}

/// Transient build state shared by all passes.
pub(crate) struct Builder<'a> {
    pub desc: &'a SceneDesc<'a>,

    pub items: Vec<BuildItem>,
    pub nodes: Vec<BuildNode>,
    pub verts: Vec<GroupVertex>,
    pub attribs: Vec<BuildAttrib<'a>>,

    /// Wide-node pairs created per binary depth; determines the per-depth
    /// regions of the final node array.
    pub depth_num_nodes: [u32; MAX_DEPTH],

    // Aggregate leaf sizes, for exact arena preallocation.
    pub total_tris_padded: usize,
    pub total_prims: usize,
    pub total_objs: usize,
    pub num_leaves: usize,
}

#[tracing::instrument(skip_all, fields(
    num_meshes = desc.meshes.len(),
    num_triangles = desc.triangles.len(),
    num_primitives = desc.primitives.len(),
))]
pub(crate) fn build(desc: &SceneDesc<'_>) -> Scene {
    let mut b = Builder {
        desc,
        items: Vec::new(),
        nodes: Vec::new(),
        verts: Vec::new(),
        attribs: Vec::new(),
        depth_num_nodes: [0; MAX_DEPTH],
        total_tris_padded: 0,
        total_prims: 0,
        total_objs: 0,
        num_leaves: 0,
    };

    // Pass 1: flatten every mesh triangle, standalone triangle and
    // primitive into uniform items.
    let mut root = BuildNode::new(0, 0);
    item::collect_items(&mut b, &mut root.bounds);
    root.num = b.items.len() as u32;

    // Pass 2: recursive partitioning.
    split::build_rec(&mut b, &mut root, 0);

    // The root wide node is inlined in the scene, not part of any region.
    b.depth_num_nodes[0] = 0;

    // An all-leaf root still needs one wide node: pair it with an empty
    // virtual right child.
    if root.child_ix == NONE {
        let mut right = BuildNode::new(0, 0);
        right.bounds = Aabb::new(root.bounds.min, root.bounds.min);
        let child_ix = b.nodes.len() as u32;
        b.nodes.push(root);
        b.nodes.push(right);
        root.child_ix = child_ix;
        root.vertex_offset = NONE;
    }

    let root_ix = b.nodes.len();
    b.nodes.push(root);

    // Pass 3: close vertex groups bottom-up and rewrite triangle items to
    // group-local indices.
    group::close_groups(&mut b, root_ix);

    // Pass 4: pack the wide tree, leaves and attributes into the scene.
    let scene = emit::emit_scene(&mut b, root_ix);

    debug!(
        items = b.items.len(),
        nodes = scene.nodes.len(),
        leaves = scene.leaves.len(),
        group_verts = scene.verts.len(),
        bytes = scene.memory_size,
        "built scene"
    );

    scene
}

#[cfg(test)]
mod tests {
    use crate::math::{Aabb, Vec3};
    use crate::scene::{align_up4, ChildRef, Scene, WideNode, GROUP_MAX_VERTICES};
    use crate::types::{Mesh, Object, Primitive, SceneDesc, Triangle};

    fn grid(n: usize) -> (Vec<f32>, Vec<u32>) {
        let mut vertices = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                vertices.extend_from_slice(&[x as f32, y as f32, (x * y % 7) as f32 * 0.1]);
            }
        }
        let mut indices = Vec::new();
        let at = |x: usize, y: usize| (y * (n + 1) + x) as u32;
        for y in 0..n {
            for x in 0..n {
                indices.extend_from_slice(&[at(x, y), at(x + 1, y), at(x + 1, y + 1)]);
                indices.extend_from_slice(&[at(x, y), at(x + 1, y + 1), at(x, y + 1)]);
            }
        }
        (vertices, indices)
    }

    fn mixed_scene() -> Scene {
        let (vertices, indices) = grid(32);
        let meshes = [Mesh {
            vertices: &vertices,
            indices: &indices,
            object: Object::new(1, 0),
            ..Default::default()
        }];
        let triangles: Vec<Triangle> = (0..10)
            .map(|i| Triangle {
                v: [
                    Vec3::new(i as f32, -2.0, 0.0),
                    Vec3::new(i as f32 + 1.0, -2.0, 0.0),
                    Vec3::new(i as f32, -1.0, 0.0),
                ],
                object: Object::new(2, i),
            })
            .collect();
        let primitives = [
            Primitive::sphere(Vec3::new(16.0, 16.0, 5.0), 2.0, None, Object::new(3, 0)),
            Primitive::plane(Vec3::Z, -3.0, None, Object::new(3, 1)),
        ];
        Scene::build(&SceneDesc {
            meshes: &meshes,
            triangles: &triangles,
            primitives: &primitives,
        })
    }

    #[test]
    fn leaf_records_are_well_formed() {
        let scene = mixed_scene();
        assert_eq!(scene.leaves[0].num_tris, 0);
        assert_eq!(scene.leaves[0].num_prims, 0);

        for leaf in scene.leaves.iter().skip(1) {
            assert!(leaf.num_tris <= 64);
            assert!(leaf.num_prims <= 64);
            assert!(leaf.num_tris + leaf.num_prims > 0);
            assert!((leaf.vert_len as usize) <= GROUP_MAX_VERTICES);

            let tris = scene.leaf_tris_padded(leaf);
            assert_eq!(tris.len(), align_up4(leaf.num_tris as usize));
            for (i, tri) in tris.iter().enumerate() {
                if i >= leaf.num_tris as usize {
                    assert_eq!(*tri, tris[0], "padding must duplicate the first record");
                }
                for v in tri.v {
                    assert!((v as u32) < leaf.vert_len);
                }
                assert!((tri.obj as u32) < leaf.num_objs);
            }
            for &mesh_ix in scene.leaf_objs(leaf) {
                assert!((mesh_ix as usize) < scene.meshes.len());
            }
        }
    }

    fn walk(scene: &Scene, node: &WideNode, parent: Option<Aabb>) {
        for slot in 0..4 {
            let child = node.child[slot];
            if child == ChildRef::EMPTY_LEAF {
                continue;
            }
            let bounds = node.child_bounds(slot);
            if let Some(parent) = parent {
                assert!(parent.contains_box(&bounds));
            }
            if child.is_node() {
                walk(scene, scene.node(child.index()), Some(bounds));
            }
        }
    }

    #[test]
    fn child_bounds_nest() {
        let scene = mixed_scene();
        walk(&scene, &scene.root, None);
    }

    #[test]
    fn empty_description_builds_sentinel_only_tree() {
        let scene = Scene::build(&SceneDesc::default());
        assert_eq!(scene.leaves.len(), 1);
        assert!(scene.bounds.is_empty());
        for slot in 0..4 {
            assert_eq!(scene.root.child[slot], ChildRef::EMPTY_LEAF);
        }
    }

    #[test]
    fn group_vertices_stay_in_range() {
        let scene = mixed_scene();
        for leaf in scene.leaves.iter().skip(1) {
            let end = leaf.vert_start as usize + leaf.vert_len as usize;
            assert!(end <= scene.verts.len());
        }
    }
}
