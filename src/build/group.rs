//! Vertex-group closure.
//!
//! After partitioning, every leaf triangle must address its vertices with
//! 8-bit indices into a compact per-group array. Groups are grown bottom-up:
//! each subtree carries an open sorted set of `(mesh, vertex)` ids, sibling
//! sets merge while the union stays under the cap, and when a merge would
//! overflow the larger child's set is closed (committed to the vertex
//! arena) while the smaller continues upward.

use super::item::read_vec3;
use super::{Builder, MESH_IX_PRIM, MESH_IX_TRI, NONE};
use crate::scene::{GroupVertex, GROUP_MAX_VERTICES};

/// Packed `(mesh, vertex)` pair, ordered mesh-major.
type VertexId = u64;

#[inline]
fn vid(mesh: u32, vertex: u32) -> VertexId {
    (mesh as u64) << 32 | vertex as u64
}

#[inline]
fn vid_mesh(id: VertexId) -> u32 {
    (id >> 32) as u32
}

#[inline]
fn vid_vertex(id: VertexId) -> u32 {
    id as u32
}

/// Sorted set of unique vertex ids, capped at [`GROUP_MAX_VERTICES`].
pub(crate) struct VertexSet {
    entries: Vec<VertexId>,
}

impl VertexSet {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::with_capacity(GROUP_MAX_VERTICES),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn insert(&mut self, id: VertexId) {
        if let Err(pos) = self.entries.binary_search(&id) {
            debug_assert!(self.entries.len() < GROUP_MAX_VERTICES);
            self.entries.insert(pos, id);
        }
    }

    /// Merge two sets; `None` when the union would exceed the cap.
    pub(crate) fn merge(a: &Self, b: &Self) -> Option<Self> {
        let mut out = Vec::with_capacity(GROUP_MAX_VERTICES);
        let (mut ai, mut bi) = (0, 0);
        while ai < a.entries.len() || bi < b.entries.len() {
            if out.len() == GROUP_MAX_VERTICES {
                return None;
            }
            let next = match (a.entries.get(ai), b.entries.get(bi)) {
                (Some(&av), Some(&bv)) => {
                    if av <= bv {
                        ai += 1;
                        if av == bv {
                            bi += 1;
                        }
                        av
                    } else {
                        bi += 1;
                        bv
                    }
                }
                (Some(&av), None) => {
                    ai += 1;
                    av
                }
                (None, Some(&bv)) => {
                    bi += 1;
                    bv
                }
                (None, None) => unreachable!(),
            };
            out.push(next);
        }
        Some(Self { entries: out })
    }

    #[inline]
    pub(crate) fn find(&self, id: VertexId) -> Option<u32> {
        self.entries.binary_search(&id).ok().map(|ix| ix as u32)
    }
}

/// Run the closure walk from the root; any set still open at the top is
/// closed there.
pub(crate) fn close_groups(b: &mut Builder<'_>, root_ix: usize) {
    let mut root_set = VertexSet::new();
    if gather(b, root_ix, &mut root_set) {
        close(b, root_ix, &root_set);
    }
}

/// Collect the subtree's open vertex set into `parent_set`. Returns false
/// when every group below is already closed.
fn gather(b: &mut Builder<'_>, node_ix: usize, parent_set: &mut VertexSet) -> bool {
    let node = b.nodes[node_ix];
    if node.child_ix != NONE {
        let c0 = node.child_ix as usize;
        let c1 = c0 + 1;

        let mut s0 = VertexSet::new();
        let mut s1 = VertexSet::new();
        let o0 = gather(b, c0, &mut s0);
        let o1 = gather(b, c1, &mut s1);

        if !o0 && !o1 {
            return false;
        }

        if o0 && o1 {
            if let Some(merged) = VertexSet::merge(&s0, &s1) {
                *parent_set = merged;
                return true;
            }
            // Merge overflows: commit the larger child, keep the smaller
            // set open for the levels above.
            let (close_ix, close_set, keep_set) = if s1.len() > s0.len() {
                (c1, s1, s0)
            } else {
                (c0, s0, s1)
            };
            close(b, close_ix, &close_set);
            *parent_set = keep_set;
            return true;
        }

        *parent_set = if o1 { s1 } else { s0 };
        true
    } else {
        let range = node.begin as usize..(node.begin + node.num) as usize;
        for item in &b.items[range] {
            if item.mesh == MESH_IX_PRIM {
                continue;
            }
            for &v in &item.data {
                parent_set.insert(vid(item.mesh, v));
            }
        }
        true
    }
}

/// Commit `set` as a vertex group: write world-space vertices into the
/// group arena and rewrite the subtree's triangles to group-local indices.
fn close(b: &mut Builder<'_>, node_ix: usize, set: &VertexSet) {
    let vertex_offset = b.verts.len() as u32;
    for &id in &set.entries {
        let mesh_ix = vid_mesh(id);
        let vert_ix = vid_vertex(id);
        let pos = if mesh_ix == MESH_IX_TRI {
            let tri = (vert_ix / 3) as usize;
            let corner = (vert_ix % 3) as usize;
            b.desc.triangles[tri].v[corner]
        } else {
            let mesh = &b.desc.meshes[mesh_ix as usize];
            let stride = if mesh.vertex_stride != 0 {
                mesh.vertex_stride
            } else {
                3
            };
            let p = read_vec3(mesh.vertices, stride, vert_ix as usize);
            mesh.transform.transform_point3(p)
        };
        b.verts.push(GroupVertex {
            pos,
            index: vert_ix,
        });
    }

    assign(b, node_ix, set, vertex_offset);
}

/// Point every unassigned node of the subtree at the group and rewrite
/// leaf triangle indices into it.
fn assign(b: &mut Builder<'_>, node_ix: usize, set: &VertexSet, vertex_offset: u32) {
    let node = b.nodes[node_ix];
    if node.vertex_offset != NONE {
        return;
    }
    b.nodes[node_ix].vertex_offset = vertex_offset;
    b.nodes[node_ix].vertex_len = set.len() as u32;

    if node.child_ix != NONE {
        assign(b, node.child_ix as usize, set, vertex_offset);
        assign(b, node.child_ix as usize + 1, set, vertex_offset);
    } else {
        let range = node.begin as usize..(node.begin + node.num) as usize;
        for item in &mut b.items[range] {
            if item.mesh == MESH_IX_PRIM {
                continue;
            }
            for v in &mut item.data {
                let local = set
                    .find(vid(item.mesh, *v))
                    .expect("closed group covers every triangle vertex in its subtree");
                *v = local;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_sorted_unique() {
        let mut set = VertexSet::new();
        for id in [vid(1, 5), vid(0, 9), vid(1, 5), vid(0, 2)] {
            set.insert(id);
        }
        assert_eq!(set.len(), 3);
        assert_eq!(set.entries, vec![vid(0, 2), vid(0, 9), vid(1, 5)]);
        assert_eq!(set.find(vid(0, 9)), Some(1));
        assert_eq!(set.find(vid(2, 0)), None);
    }

    #[test]
    fn merge_dedups() {
        let mut a = VertexSet::new();
        let mut b = VertexSet::new();
        for v in 0..10 {
            a.insert(vid(0, v));
            b.insert(vid(0, v * 2));
        }
        let m = VertexSet::merge(&a, &b).unwrap();
        assert_eq!(m.len(), 15); // 0..10 plus even values 10..20
        for w in m.entries.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn merge_overflow_returns_none() {
        let mut a = VertexSet::new();
        let mut b = VertexSet::new();
        for v in 0..GROUP_MAX_VERTICES as u32 {
            a.insert(vid(0, v));
            b.insert(vid(1, v));
        }
        assert!(VertexSet::merge(&a, &b).is_none());
    }
}
