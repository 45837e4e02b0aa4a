//! Wide-BVH traversal.
//!
//! The traversal walks the 4-wide tree with a LIFO stack of
//! `(enter_t, child)` frames, always descending into the nearest hit child
//! first and pruning everything whose entry distance is already past the
//! best hit.

pub(crate) mod leaf;

use crate::math::Vec3;
use crate::scene::{ChildRef, Scene, MAX_DEPTH, MESH_NONE};
use crate::types::{Hit, Ray};
use crate::wide::{sort4, tag_lane, untag_lane, F4, LANE_TABLE};

/// Worst case: three pushed frames per wide level on a root-to-leaf path.
const STACK_SIZE: usize = 3 * (MAX_DEPTH / 2) + 2;

/// Per-query state: the ray, its precomputed traversal data and the
/// working hit (whose `t` is the live pruning bound).
pub(crate) struct TraceCtx<'a> {
    pub scene: &'a Scene,
    pub ray: Ray,
    pub hit: Hit,
    /// Mesh-data slot of the current best triangle hit, `MESH_NONE` when
    /// the best hit is a primitive (or nothing).
    pub mesh_ix: u32,
    pub rcp_dir: Vec3,
    /// Axis permutation for the shear-space triangle test; `[2]` is the
    /// dominant direction axis.
    pub shear_axis: [usize; 3],
    pub shear: Vec3,
    pub shear_origin: Vec3,
    /// Per-axis direction sign bits (bit 0 = x).
    pub sign_mask: u32,
}

impl<'a> TraceCtx<'a> {
    pub(crate) fn new(scene: &'a Scene, ray: Ray, max_t: f32) -> Self {
        let d = ray.direction;
        let abs = d.abs();
        let max_comp = abs.x.max(abs.y).max(abs.z);
        let shear_z = if abs.x == max_comp {
            0
        } else if abs.y == max_comp {
            1
        } else {
            2
        };
        let shear_x = (shear_z + 1) % 3;
        let shear_y = (shear_z + 2) % 3;

        let mut sign_mask = 0;
        sign_mask |= (d.x < 0.0) as u32;
        sign_mask |= ((d.y < 0.0) as u32) << 1;
        sign_mask |= ((d.z < 0.0) as u32) << 2;

        Self {
            scene,
            ray,
            hit: Hit::with_max_t(max_t),
            mesh_ix: MESH_NONE,
            rcp_dir: Vec3::new(1.0 / d.x, 1.0 / d.y, 1.0 / d.z),
            shear_axis: [shear_x, shear_y, shear_z],
            shear: Vec3::new(
                -d[shear_x] / d[shear_z],
                -d[shear_y] / d[shear_z],
                1.0 / d[shear_z],
            ),
            shear_origin: Vec3::new(ray.origin[shear_x], ray.origin[shear_y], ray.origin[shear_z]),
            sign_mask,
        }
    }
}

/// Either the inlined root node or an arena reference.
#[derive(Clone, Copy)]
enum Top {
    Root,
    Child(ChildRef),
}

pub(crate) fn traverse(ctx: &mut TraceCtx<'_>) {
    let scene = ctx.scene;

    let mut t_stack = [f32::INFINITY; STACK_SIZE];
    let mut node_stack = [ChildRef::EMPTY_LEAF; STACK_SIZE];
    let mut depth: usize = 0;
    let mut top = Top::Root;
    let mut top_t = f32::NEG_INFINITY;

    let origin_x = F4::splat(ctx.ray.origin.x);
    let origin_y = F4::splat(ctx.ray.origin.y);
    let origin_z = F4::splat(ctx.ray.origin.z);
    let rcp_x = F4::splat(ctx.rcp_dir.x);
    let rcp_y = F4::splat(ctx.rcp_dir.y);
    let rcp_z = F4::splat(ctx.rcp_dir.z);
    let min_t4 = F4::splat(ctx.ray.min_t);

    let sign = ctx.sign_mask as usize;
    let sx = sign & 1;
    let sy = (sign >> 1) & 1;
    let sz = sign >> 2;

    loop {
        let hit_t = ctx.hit.t;

        // Drop frames that are no longer closer than the best hit.
        while top_t >= hit_t {
            if depth == 0 {
                return;
            }
            top_t = t_stack[depth];
            top = Top::Child(node_stack[depth]);
            depth -= 1;
        }

        let node = match top {
            Top::Root => &scene.root,
            Top::Child(r) if r.is_node() => scene.node(r.index()),
            Top::Child(r) => {
                leaf::intersect_leaf(ctx, scene.leaf(r.index()));
                if depth == 0 {
                    return;
                }
                top_t = t_stack[depth];
                top = Top::Child(node_stack[depth]);
                depth -= 1;
                continue;
            }
        };

        // Slab test against all four children at once. The sign bit per
        // axis picks which bounds row is the near plane.
        let lo_x = F4::from_array(node.bounds_x[sx]);
        let hi_x = F4::from_array(node.bounds_x[sx ^ 1]);
        let lo_y = F4::from_array(node.bounds_y[sy]);
        let hi_y = F4::from_array(node.bounds_y[sy ^ 1]);
        let lo_z = F4::from_array(node.bounds_z[sz]);
        let hi_z = F4::from_array(node.bounds_z[sz ^ 1]);

        let min_x = (lo_x - origin_x) * rcp_x;
        let max_x = (hi_x - origin_x) * rcp_x;
        let min_y = (lo_y - origin_y) * rcp_y;
        let max_y = (hi_y - origin_y) * rcp_y;
        let min_z = (lo_z - origin_z) * rcp_z;
        let max_z = (hi_z - origin_z) * rcp_z;

        let t_min = min_x.max(min_y).max(min_z.max(min_t4));
        let t_max = max_x.min(max_y).min(max_z.min(F4::splat(hit_t)));

        let mask = t_min.le_mask(t_max);
        let info = LANE_TABLE[mask as usize];

        match info.count {
            0 => {
                if depth == 0 {
                    return;
                }
                top_t = t_stack[depth];
                top = Top::Child(node_stack[depth]);
                depth -= 1;
            }
            1 => {
                let lane = info.lane[0] as usize;
                top = Top::Child(node.child[lane]);
                top_t = t_min.to_array()[lane];
            }
            n => {
                // Sort enter distances ascending, carrying each lane in the
                // low mantissa bits, then push the far frames so the
                // nearest child continues as the new top.
                let ts = t_min.to_array();
                let mut tagged: [f32; 4] = std::array::from_fn(|l| {
                    let t = if mask & (1 << l) != 0 {
                        ts[l]
                    } else {
                        f32::INFINITY
                    };
                    tag_lane(t, l as u32)
                });
                sort4(&mut tagged);

                for j in (1..n as usize).rev() {
                    let (t, lane) = untag_lane(tagged[j]);
                    depth += 1;
                    t_stack[depth] = t;
                    node_stack[depth] = node.child[lane];
                }
                let (t, lane) = untag_lane(tagged[0]);
                top = Top::Child(node.child[lane]);
                top_t = t;
            }
        }
    }
}
