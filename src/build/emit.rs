//! Final packing: pair the binary tree into 4-wide nodes, emit leaves into
//! the shared arenas, deduplicate attribute streams and assemble the scene.

use super::{AttribKind, BuildAttrib, Builder, MESH_IX_PRIM, MESH_IX_TRI, NONE};
use crate::math::{Vec2, Vec3};
use crate::scene::{
    ChildRef, Leaf, LeafPrim, LeafTri, MeshData, Scene, WideNode, MAX_DEPTH,
};
use smallvec::SmallVec;
use std::cmp::Reverse;

struct Emitter {
    nodes: Vec<WideNode>,
    /// Next free node slot per binary depth; nodes allocated while
    /// linearizing at depth `d` fill the regions for depths `d` and `d+1`.
    depth_node_offset: [u32; MAX_DEPTH],
    leaves: Vec<Leaf>,
    tris: Vec<LeafTri>,
    prims: Vec<LeafPrim>,
    objs: Vec<u32>,
}

/// Sort attribute records by source address (largest instance first) and
/// hand out arena offsets; duplicate references share the primary's range.
/// Returns the UV / normal arena lengths in elements.
fn dedup_attribs(attribs: &mut [BuildAttrib<'_>]) -> (usize, usize) {
    attribs.sort_unstable_by_key(|a| {
        (
            a.kind as u8,
            a.data.as_ptr() as usize,
            Reverse(a.num_vertices),
        )
    });

    let mut lens = [0usize; 2];
    let mut prev: Option<(AttribKind, *const f32)> = None;
    let mut prev_offset = 0u32;
    for a in attribs.iter_mut() {
        let key = (a.kind, a.data.as_ptr());
        if prev == Some(key) {
            a.offset = prev_offset;
            a.primary = false;
        } else {
            a.offset = lens[a.kind as usize] as u32;
            a.primary = true;
            lens[a.kind as usize] += a.num_vertices as usize;
            prev = Some(key);
            prev_offset = a.offset;
        }
    }
    (lens[AttribKind::Uv as usize], lens[AttribKind::Normal as usize])
}

fn linearize_leaf(b: &Builder<'_>, e: &mut Emitter, src_ix: usize) -> u32 {
    let src = b.nodes[src_ix];
    let tri_start = e.tris.len() as u32;
    let prim_start = e.prims.len() as u32;
    let obj_start = e.objs.len() as u32;

    // Object table entries contributed by mesh triangles, for dedup within
    // the leaf. Standalone triangles always get a fresh entry.
    let mut mesh_objs: SmallVec<[(u32, u8); 16]> = SmallVec::new();

    let range = src.begin as usize..(src.begin + src.num) as usize;
    for item in &b.items[range] {
        if item.mesh == MESH_IX_PRIM {
            let prim = &b.desc.primitives[item.data[0] as usize];
            e.prims.push(LeafPrim {
                prim: prim.clone(),
                inv_transform: prim.transform.inverse(),
            });
            continue;
        }

        let obj_ix = if item.mesh == MESH_IX_TRI {
            // Group closure rewrote the item to group-local indices; the
            // group entry still knows the synthetic stream index, which
            // encodes the standalone triangle's own mesh slot.
            let orig = b.verts[(src.vertex_offset + item.data[0]) as usize].index;
            let obj_ix = (e.objs.len() as u32 - obj_start) as u8;
            e.objs.push(b.desc.meshes.len() as u32 + orig / 3);
            obj_ix
        } else if let Some(&(_, obj_ix)) = mesh_objs.iter().find(|&&(m, _)| m == item.mesh) {
            obj_ix
        } else {
            let obj_ix = (e.objs.len() as u32 - obj_start) as u8;
            e.objs.push(item.mesh);
            mesh_objs.push((item.mesh, obj_ix));
            obj_ix
        };

        e.tris.push(LeafTri {
            v: [
                item.data[0] as u8,
                item.data[1] as u8,
                item.data[2] as u8,
            ],
            obj: obj_ix,
        });
    }

    // Pad triangle records to a multiple of four with copies of the first
    // record; duplicating the last one instead could report a nearer
    // duplicate hit from a padding lane before the real lane is seen.
    if src.num_tris > 0 {
        let first = e.tris[tri_start as usize];
        while (e.tris.len() - tri_start as usize) % 4 != 0 {
            e.tris.push(first);
        }
    }

    e.leaves.push(Leaf {
        vert_start: if src.vertex_offset == NONE {
            0
        } else {
            src.vertex_offset
        },
        vert_len: src.vertex_len,
        tri_start,
        num_tris: src.num_tris,
        prim_start,
        num_prims: src.num - src.num_tris,
        obj_start,
        num_objs: e.objs.len() as u32 - obj_start,
    });
    (e.leaves.len() - 1) as u32
}

/// Pack two adjacent binary levels below `src_ix` into one wide node: each
/// grandchild takes a slot, a childless side folds its child into the top
/// slot, and whatever remains points at the sentinel empty leaf.
fn linearize_node(b: &Builder<'_>, e: &mut Emitter, src_ix: usize, depth: usize) -> WideNode {
    let src = b.nodes[src_ix];
    debug_assert!(src.child_ix != NONE);
    let mut dst = WideNode::empty();

    for i in 0..4 {
        let mid_ix = src.child_ix as usize + (i >> 1);
        let child_i = i & 1;
        let mid = &b.nodes[mid_ix];

        let child_ix = if mid.child_ix != NONE {
            Some(mid.child_ix as usize + child_i)
        } else if child_i == 0 {
            Some(mid_ix)
        } else {
            None
        };
        // Nodes with nothing in them collapse to the sentinel.
        let child_ix = child_ix.filter(|&c| b.nodes[c].num > 0);

        let Some(child_ix) = child_ix else {
            continue;
        };
        let child = &b.nodes[child_ix];
        dst.set_child_bounds(i, &child.bounds);

        if child.child_ix != NONE {
            let ofs = e.depth_node_offset[depth] as usize;
            e.depth_node_offset[depth] += 1;
            let wide = linearize_node(b, e, child_ix, depth + 2);
            e.nodes[ofs] = wide;
            dst.child[i] = ChildRef::node(ofs as u32);
        } else {
            dst.child[i] = ChildRef::leaf(linearize_leaf(b, e, child_ix));
        }
    }
    dst
}

pub(crate) fn emit_scene(b: &mut Builder<'_>, root_ix: usize) -> Scene {
    let (uv_len, normal_len) = dedup_attribs(&mut b.attribs);
    let b = &*b;
    let desc = b.desc;

    // Prefix sums turn per-depth pair counts into node regions, so a
    // node's depth determines where it lives in the array.
    let mut num_nodes = 0u32;
    let mut depth_node_offset = [0u32; MAX_DEPTH];
    for d in 0..MAX_DEPTH {
        depth_node_offset[d] = num_nodes;
        num_nodes += b.depth_num_nodes[d];
    }

    let mut e = Emitter {
        nodes: vec![WideNode::empty(); num_nodes as usize],
        depth_node_offset,
        leaves: Vec::with_capacity(b.num_leaves + 1),
        tris: Vec::with_capacity(b.total_tris_padded),
        prims: Vec::with_capacity(b.total_prims),
        objs: Vec::with_capacity(b.total_objs),
    };

    // Leaf 0 is the shared sentinel empty leaf.
    e.leaves.push(Leaf::default());

    let root = linearize_node(b, &mut e, root_ix, 1);

    debug_assert_eq!(e.tris.len(), b.total_tris_padded);
    debug_assert_eq!(e.prims.len(), b.total_prims);
    debug_assert_eq!(e.objs.len(), b.total_objs);
    debug_assert!(e.leaves.len() <= b.num_leaves + 1);
    // Only even-depth pairs materialize as wide nodes (odd-depth pairs
    // dissolve into their parent's four slots), so each odd linearization
    // depth d consumes exactly the next even depth's pair count.
    #[cfg(debug_assertions)]
    for d in (1..MAX_DEPTH).step_by(2) {
        let consumed = e.depth_node_offset[d] - depth_node_offset[d];
        let expect = if d + 1 < MAX_DEPTH {
            b.depth_num_nodes[d + 1]
        } else {
            0
        };
        debug_assert_eq!(consumed, expect);
    }

    // De-stride primary attribute copies into the packed arenas.
    let mut uv_data = vec![Vec2::ZERO; uv_len];
    let mut normal_data = vec![Vec3::ZERO; normal_len];
    for a in &b.attribs {
        if !a.primary {
            continue;
        }
        match a.kind {
            AttribKind::Uv => {
                for i in 0..a.num_vertices as usize {
                    let base = i * a.stride;
                    uv_data[a.offset as usize + i] = Vec2::new(a.data[base], a.data[base + 1]);
                }
            }
            AttribKind::Normal => {
                for i in 0..a.num_vertices as usize {
                    let base = i * a.stride;
                    normal_data[a.offset as usize + i] =
                        Vec3::new(a.data[base], a.data[base + 1], a.data[base + 2]);
                }
            }
        }
    }

    // Shading data: one entry per mesh, then one per standalone triangle.
    let mut meshes: Vec<MeshData> = desc
        .meshes
        .iter()
        .map(|m| m.object)
        .chain(desc.triangles.iter().map(|t| t.object))
        .map(|object| MeshData {
            object,
            uv_offset: None,
            normal_offset: None,
        })
        .collect();
    for a in &b.attribs {
        let slot = &mut meshes[a.mesh_ix as usize];
        match a.kind {
            AttribKind::Uv => slot.uv_offset = Some(a.offset),
            AttribKind::Normal => slot.normal_offset = Some(a.offset),
        }
    }

    let bounds = b.nodes[root_ix].bounds;

    let nodes = e.nodes.into_boxed_slice();
    let leaves = e.leaves.into_boxed_slice();
    let tris = e.tris.into_boxed_slice();
    let prims = e.prims.into_boxed_slice();
    let tri_objs = e.objs.into_boxed_slice();
    let verts = b.verts.clone().into_boxed_slice();
    let meshes = meshes.into_boxed_slice();
    let uv_data = uv_data.into_boxed_slice();
    let normal_data = normal_data.into_boxed_slice();

    use std::mem::size_of;
    let memory_size = size_of::<Scene>()
        + nodes.len() * size_of::<WideNode>()
        + leaves.len() * size_of::<Leaf>()
        + tris.len() * size_of::<LeafTri>()
        + prims.len() * size_of::<LeafPrim>()
        + tri_objs.len() * size_of::<u32>()
        + verts.len() * size_of::<crate::scene::GroupVertex>()
        + meshes.len() * size_of::<MeshData>()
        + uv_data.len() * size_of::<Vec2>()
        + normal_data.len() * size_of::<Vec3>();

    Scene {
        root,
        bounds,
        nodes,
        leaves,
        tris,
        prims,
        tri_objs,
        verts,
        meshes,
        uv_data,
        normal_data,
        memory_size,
    }
}
