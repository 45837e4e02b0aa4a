//! Ray queries and post-hit attribute interpolation.

use crate::scene::{Scene, MESH_NONE};
use crate::trace::{traverse, TraceCtx};
use crate::types::{Hit, Ray};

impl Scene {
    /// Fire a ray and return the nearest hit strictly closer than `max_t`,
    /// with interpolated surface attributes. Use `f32::INFINITY` for an
    /// unbounded query.
    pub fn raytrace(&self, ray: &Ray, max_t: f32) -> Option<Hit> {
        let mut ctx = TraceCtx::new(self, *ray, max_t);
        traverse(&mut ctx);

        if ctx.hit.t < max_t {
            finish_hit(self, &mut ctx);
            Some(ctx.hit)
        } else {
            None
        }
    }

    /// Fire a batch of rays with a shared `max_t`. Exactly equivalent to
    /// calling [`Scene::raytrace`] on each ray in order; the batch form is
    /// the forward-compatible surface for future parallel traversal.
    pub fn raytrace_many(&self, rays: &[Ray], max_t: f32) -> Vec<Option<Hit>> {
        rays.iter().map(|ray| self.raytrace(ray, max_t)).collect()
    }
}

/// Normalize the geometric frame and interpolate mesh attributes into the
/// hit's interpolated surface.
fn finish_hit(scene: &Scene, ctx: &mut TraceCtx<'_>) {
    let hit = &mut ctx.hit;
    hit.geom.normal = hit.geom.normal.normalize();

    if ctx.mesh_ix == MESH_NONE {
        // Primitive hit: the shape filled the interpolated surface, only
        // the normal still needs unit length.
        hit.interp.normal = hit.interp.normal.normalize();
        return;
    }

    let mesh = &scene.meshes[ctx.mesh_ix as usize];
    hit.object = mesh.object;

    let [i0, i1, i2] = hit.vertex_index.map(|i| i as usize);
    let u = hit.geom.u;
    let v = hit.geom.v;
    let w = 1.0 - u - v;

    if let Some(offset) = mesh.uv_offset {
        let uvs = &scene.uv_data[offset as usize..];
        let t0 = uvs[i0];
        let t1 = uvs[i1];
        let t2 = uvs[i2];
        let e0 = hit.geom.dp_du;
        let e1 = hit.geom.dp_dv;

        // Invert the 2x2 UV edge matrix to turn the position edges into
        // UV-aligned tangents.
        let e0u = t1.x - t0.x;
        let e0v = t1.y - t0.y;
        let e1u = t2.x - t0.x;
        let e1v = t2.y - t0.y;
        let rcp_det = 1.0 / (e0u * e1v - e0v * e1u);

        let abs_rcp_det = rcp_det.abs();
        if abs_rcp_det > 1e-18 && abs_rcp_det < f32::INFINITY {
            let m00 = e1v * rcp_det;
            let m01 = -e0v * rcp_det;
            let m10 = -e1u * rcp_det;
            let m11 = e0u * rcp_det;
            hit.interp.u = u * t0.x + v * t1.x + w * t2.x;
            hit.interp.v = u * t0.y + v * t1.y + w * t2.y;
            hit.interp.dp_du = e0 * m00 + e1 * m01;
            hit.interp.dp_dv = e0 * m10 + e1 * m11;
        } else {
            // Degenerate UV mapping, keep the geometric frame.
            hit.interp.u = hit.geom.u;
            hit.interp.v = hit.geom.v;
            hit.interp.dp_du = hit.geom.dp_du;
            hit.interp.dp_dv = hit.geom.dp_dv;
        }
    } else {
        hit.interp.u = hit.geom.u;
        hit.interp.v = hit.geom.v;
        hit.interp.dp_du = hit.geom.dp_du;
        hit.interp.dp_dv = hit.geom.dp_dv;
    }

    if let Some(offset) = mesh.normal_offset {
        let normals = &scene.normal_data[offset as usize..];
        let n = normals[i0] * u + normals[i1] * v + normals[i2] * w;
        hit.interp.normal = n.normalize();
    } else {
        hit.interp.normal = hit.geom.normal;
    }
}
