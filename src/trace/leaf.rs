//! Leaf intersection: the batched watertight triangle test and analytic
//! primitive dispatch.

use super::TraceCtx;
use crate::math::{self, Vec3};
use crate::scene::{intersect_aabb_ray, Leaf, MESH_NONE};
use crate::types::{Geometry, Ray};
use crate::wide::F4;

pub(crate) fn intersect_leaf(ctx: &mut TraceCtx<'_>, leaf: &Leaf) {
    let scene = ctx.scene;
    let tris = scene.leaf_tris_padded(leaf);
    let group = scene.leaf_group(leaf);
    let objs = scene.leaf_objs(leaf);

    let [ax, ay, az] = ctx.shear_axis;
    let shear = ctx.shear;
    let shear_origin = ctx.shear_origin;
    let min_t4 = F4::splat(ctx.ray.min_t);
    let zero4 = F4::splat(0.0);

    for batch in tris.chunks_exact(4) {
        // Gather the four triangles into shear space, one corner at a time.
        let mut xs = [[0.0f32; 4]; 3];
        let mut ys = [[0.0f32; 4]; 3];
        let mut zs = [[0.0f32; 4]; 3];
        for (lane, tri) in batch.iter().enumerate() {
            for corner in 0..3 {
                let p = group[tri.v[corner] as usize].pos;
                let v = Vec3::new(p[ax], p[ay], p[az]) - shear_origin;
                xs[corner][lane] = v.x + shear.x * v.z;
                ys[corner][lane] = v.y + shear.y * v.z;
                zs[corner][lane] = shear.z * v.z;
            }
        }

        let x0 = F4::from_array(xs[0]);
        let y0 = F4::from_array(ys[0]);
        let z0 = F4::from_array(zs[0]);
        let x1 = F4::from_array(xs[1]);
        let y1 = F4::from_array(ys[1]);
        let z1 = F4::from_array(zs[1]);
        let x2 = F4::from_array(xs[2]);
        let y2 = F4::from_array(ys[2]);
        let z2 = F4::from_array(zs[2]);

        // Edge functions in the sheared frame.
        let mut u = x1 * y2 - y1 * x2;
        let mut v = x2 * y0 - y2 * x0;
        let mut w = x0 * y1 - y0 * x1;

        // An exactly-zero edge function means the ray grazes an edge;
        // recompute that lane's three edge functions in double precision
        // so the sign classification stays watertight.
        let any_zero = u.eq_zero_mask() | v.eq_zero_mask() | w.eq_zero_mask();
        if any_zero != 0 {
            let mut ua = u.to_array();
            let mut va = v.to_array();
            let mut wa = w.to_array();
            for lane in 0..4 {
                if any_zero & (1 << lane) == 0 {
                    continue;
                }
                let (x0d, y0d) = (xs[0][lane] as f64, ys[0][lane] as f64);
                let (x1d, y1d) = (xs[1][lane] as f64, ys[1][lane] as f64);
                let (x2d, y2d) = (xs[2][lane] as f64, ys[2][lane] as f64);
                ua[lane] = (x1d * y2d - y1d * x2d) as f32;
                va[lane] = (x2d * y0d - y2d * x0d) as f32;
                wa[lane] = (x0d * y1d - y0d * x1d) as f32;
            }
            u = F4::from_array(ua);
            v = F4::from_array(va);
            w = F4::from_array(wa);
        }

        // Reject lanes with strictly mixed edge-function signs.
        let neg = u.min(v).min(w).lt_mask(zero4);
        let pos = u.max(v).max(w).gt_mask(zero4);
        let bad_sign = neg & pos;
        if bad_sign == 0xf {
            continue;
        }

        let det = u + v + w;
        let rcp_det = F4::splat(1.0) / det;
        let z = u * z0 + v * z1 + w * z2;
        let t = z * rcp_det;

        let good = t.gt_mask(min_t4) & t.lt_mask(F4::splat(ctx.hit.t)) & !bad_sign & 0xf;
        if good == 0 {
            continue;
        }

        let ts = t.to_array();
        let us = (u * rcp_det).to_array();
        let vs = (v * rcp_det).to_array();

        let mut lanes = good;
        while lanes != 0 {
            let lane = lanes.trailing_zeros() as usize;
            lanes &= lanes - 1;

            let lane_t = ts[lane];
            if lane_t >= ctx.hit.t {
                continue;
            }

            let tri = &batch[lane];
            let p0 = group[tri.v[0] as usize];
            let p1 = group[tri.v[1] as usize];
            let p2 = group[tri.v[2] as usize];
            let e0 = p1.pos - p0.pos;
            let e1 = p2.pos - p0.pos;

            ctx.mesh_ix = objs[tri.obj as usize];
            let hit = &mut ctx.hit;
            hit.t = lane_t;
            hit.geom.u = us[lane];
            hit.geom.v = vs[lane];
            hit.geom.normal = e0.cross(e1);
            hit.geom.dp_du = e0;
            hit.geom.dp_dv = e1;
            hit.user = 0;
            hit.vertex_index = [p0.index, p1.index, p2.index];
            hit.vertex_pos = [p0.pos, p1.pos, p2.pos];
            hit.clear_parents();
            hit.geometry = Geometry::Triangle;
        }
    }

    // Primitives: move the ray to local space through the cached inverse,
    // pre-reject against the local bounds, then hand over to the shape.
    for lp in scene.leaf_prims(leaf) {
        let local_ray = Ray {
            origin: lp.inv_transform.transform_point3(ctx.ray.origin),
            direction: lp.inv_transform.transform_vector3(ctx.ray.direction),
            min_t: ctx.ray.min_t,
        };

        let enter_t = intersect_aabb_ray(&lp.prim.bounds, &local_ray);
        if enter_t >= ctx.hit.t {
            continue;
        }

        let prev = ctx.hit.clone();
        if lp.prim.shape.intersect(&lp.prim, &local_ray, &mut ctx.hit) {
            // A write that does not improve the hit (or lands before the
            // ray start) is discarded, whatever the shape claimed.
            if ctx.hit.t >= prev.t || ctx.hit.t < ctx.ray.min_t {
                ctx.hit = prev;
                continue;
            }
            if !math::is_identity(&lp.prim.transform) {
                let hit = &mut ctx.hit;
                hit.geom.normal = math::transform_normal(&lp.inv_transform, hit.geom.normal);
                hit.interp.normal = math::transform_normal(&lp.inv_transform, hit.interp.normal);
                hit.geom.dp_du = lp.prim.transform.transform_vector3(hit.geom.dp_du);
                hit.geom.dp_dv = lp.prim.transform.transform_vector3(hit.geom.dp_dv);
                hit.interp.dp_du = lp.prim.transform.transform_vector3(hit.interp.dp_du);
                hit.interp.dp_dv = lp.prim.transform.transform_vector3(hit.interp.dp_dv);
            }
            ctx.mesh_ix = MESH_NONE;
        }
    }
}
