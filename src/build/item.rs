//! Item extraction: flattens the scene description into uniform build
//! items and records mesh attribute streams for later deduplication.

use super::{AttribKind, BuildAttrib, BuildItem, Builder, MESH_IX_PRIM, MESH_IX_TRI};
use crate::math::{self, Aabb, Vec3};

/// Read a strided 3-float element. `stride` is already resolved.
#[inline]
pub(crate) fn read_vec3(data: &[f32], stride: usize, ix: usize) -> Vec3 {
    let base = ix * stride;
    Vec3::new(data[base], data[base + 1], data[base + 2])
}

pub(crate) fn collect_items(b: &mut Builder<'_>, root_bounds: &mut Aabb) {
    let desc = b.desc;

    let num_items = desc.primitives.len()
        + desc.triangles.len()
        + desc.meshes.iter().map(|m| m.num_triangles()).sum::<usize>();
    b.items.reserve_exact(num_items);

    // Mesh triangles. Vertices are pre-transformed to world space when the
    // mesh carries a non-identity transform.
    for (mesh_ix, mesh) in desc.meshes.iter().enumerate() {
        let stride = if mesh.vertex_stride != 0 {
            mesh.vertex_stride
        } else {
            3
        };
        let has_mat = !math::is_identity(&mesh.transform);
        let mut max_ix = 0u32;

        for ix in mesh.indices.chunks_exact(3) {
            let mut v = [
                read_vec3(mesh.vertices, stride, ix[0] as usize),
                read_vec3(mesh.vertices, stride, ix[1] as usize),
                read_vec3(mesh.vertices, stride, ix[2] as usize),
            ];
            max_ix = max_ix.max(ix[0]).max(ix[1]).max(ix[2]);
            if has_mat {
                for p in &mut v {
                    *p = mesh.transform.transform_point3(*p);
                }
            }

            let bounds = Aabb::from_points(v[0], v[1], v[2]);
            root_bounds.expand_box(&bounds);
            b.items.push(BuildItem {
                bounds,
                mesh: mesh_ix as u32,
                data: [ix[0], ix[1], ix[2]],
            });
        }

        // Attribute streams are sized by the highest vertex the index
        // stream actually reaches.
        if mesh.num_triangles() > 0 {
            let num_vertices = max_ix + 1;
            if let Some(uvs) = mesh.uvs {
                b.attribs.push(BuildAttrib {
                    data: uvs,
                    stride: if mesh.uv_stride != 0 { mesh.uv_stride } else { 2 },
                    num_vertices,
                    mesh_ix: mesh_ix as u32,
                    kind: AttribKind::Uv,
                    offset: 0,
                    primary: false,
                });
            }
            if let Some(normals) = mesh.normals {
                b.attribs.push(BuildAttrib {
                    data: normals,
                    stride: if mesh.normal_stride != 0 {
                        mesh.normal_stride
                    } else {
                        3
                    },
                    num_vertices,
                    mesh_ix: mesh_ix as u32,
                    kind: AttribKind::Normal,
                    offset: 0,
                    primary: false,
                });
            }
        }
    }

    // Standalone triangles index a synthetic vertex stream, three entries
    // per triangle.
    let mut tri_vert_ix = 0u32;
    for tri in desc.triangles {
        let bounds = Aabb::from_points(tri.v[0], tri.v[1], tri.v[2]);
        root_bounds.expand_box(&bounds);
        b.items.push(BuildItem {
            bounds,
            mesh: MESH_IX_TRI,
            data: [tri_vert_ix, tri_vert_ix + 1, tri_vert_ix + 2],
        });
        tri_vert_ix += 3;
    }

    // Primitives: local bounds to scene space via the abs-linear transform
    // of the half extents (NaN-flushing, see `transform_aabb`).
    for (prim_ix, prim) in desc.primitives.iter().enumerate() {
        let bounds = math::transform_aabb(&prim.bounds, &prim.transform);
        root_bounds.expand_box(&bounds);
        b.items.push(BuildItem {
            bounds,
            mesh: MESH_IX_PRIM,
            data: [prim_ix as u32, 0, 0],
        });
    }

    debug_assert_eq!(b.items.len(), num_items);
}
