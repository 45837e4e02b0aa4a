//! Recursive partitioning: SAH bucket splits with an equal-count fallback
//! that keeps the tree inside the depth budget.

use super::{BuildItem, BuildNode, Builder, MESH_IX_PRIM, MESH_IX_TRI, NONE};
use crate::math::Aabb;
use crate::scene::{
    align_up4, LEAF_MAX_ITEMS, LEAF_MIN_ITEMS, MAX_DEPTH, SAH_BUCKETS, SAH_ITEM_COST,
    SAH_NODE_COST,
};
use smallvec::SmallVec;

fn sort_by_centroid(items: &mut [BuildItem], axis: usize) {
    items.sort_unstable_by(|a, b| a.centroid2(axis).total_cmp(&b.centroid2(axis)));
}

/// Finish `node` as a leaf: order its items along the longest axis and
/// account for the records the leaf will emit.
fn build_leaf(b: &mut Builder<'_>, node: &mut BuildNode) {
    debug_assert!(node.num as usize <= LEAF_MAX_ITEMS);

    let axis = node.bounds.longest_axis();
    let range = node.begin as usize..(node.begin + node.num) as usize;
    sort_by_centroid(&mut b.items[range.clone()], axis);

    let mut unique_meshes: SmallVec<[u32; 16]> = SmallVec::new();
    let mut num_tris = 0u32;
    let mut num_objs = 0usize;
    for item in &b.items[range] {
        if item.mesh == MESH_IX_PRIM {
            continue;
        }
        num_tris += 1;
        if item.mesh == MESH_IX_TRI {
            // Every standalone triangle owns a mesh slot of its own.
            num_objs += 1;
        } else if !unique_meshes.contains(&item.mesh) {
            unique_meshes.push(item.mesh);
            num_objs += 1;
        }
    }

    node.num_tris = num_tris;
    node.child_ix = NONE;
    node.vertex_offset = NONE;

    b.total_tris_padded += align_up4(num_tris as usize);
    b.total_prims += (node.num - num_tris) as usize;
    b.total_objs += num_objs;
    b.num_leaves += 1;
}

struct Bucket {
    bounds: Aabb,
    /// Cumulative bounds of this bucket and everything to its right.
    bounds_right: Aabb,
    num: u32,
}

#[inline]
fn bucket_of(item: &BuildItem, axis: usize, min_2x: f32, rcp_scale_2x: f32) -> usize {
    let mid_2x = item.centroid2(axis);
    let bucket = ((mid_2x - min_2x) * rcp_scale_2x) as i32;
    bucket.clamp(0, SAH_BUCKETS as i32 - 1) as usize
}

/// Split `node` with the surface-area heuristic, or finish it as a leaf
/// when no split beats the leaf cost.
fn build_sah(b: &mut Builder<'_>, node: &mut BuildNode, depth: usize) {
    let mut best_cost = f32::INFINITY;
    let mut best_axis = usize::MAX;
    let mut best_bucket = 0usize;
    let mut best_bounds = (Aabb::EMPTY, Aabb::EMPTY);
    let rcp_parent_area = 1.0 / node.bounds.area();

    let range = node.begin as usize..(node.begin + node.num) as usize;

    for axis in 0..3 {
        let mut buckets: [Bucket; SAH_BUCKETS] = std::array::from_fn(|_| Bucket {
            bounds: Aabb::EMPTY,
            bounds_right: Aabb::EMPTY,
            num: 0,
        });

        let min = node.bounds.min[axis];
        let max = node.bounds.max[axis];
        let min_2x = 2.0 * min;
        let rcp_scale_2x = (0.5 * SAH_BUCKETS as f32) / (max - min);

        for item in &b.items[range.clone()] {
            let bucket = &mut buckets[bucket_of(item, axis, min_2x, rcp_scale_2x)];
            bucket.bounds.expand_box(&item.bounds);
            bucket.num += 1;
        }

        // Sweep right-to-left for cumulative right-side bounds.
        buckets[SAH_BUCKETS - 1].bounds_right = buckets[SAH_BUCKETS - 1].bounds;
        for i in (0..SAH_BUCKETS - 1).rev() {
            buckets[i].bounds_right = buckets[i].bounds.union(&buckets[i + 1].bounds_right);
        }

        // Sweep left-to-right scoring the 31 interior split positions.
        // Item cost is rounded up to groups of four: leaves intersect
        // triangles four at a time.
        let mut bounds_left = Aabb::EMPTY;
        let mut num_left = 0u32;
        for i in 0..SAH_BUCKETS - 1 {
            bounds_left.expand_box(&buckets[i].bounds);
            num_left += buckets[i].num;
            let num_right = node.num - num_left;
            if num_left == 0 || num_right == 0 {
                continue;
            }

            let area_left = bounds_left.area();
            let area_right = buckets[i + 1].bounds_right.area();
            let cost_left = ((num_left + 3) / 4) as f32 * SAH_ITEM_COST;
            let cost_right = ((num_right + 3) / 4) as f32 * SAH_ITEM_COST;
            let split_cost =
                SAH_NODE_COST + (area_left * cost_left + area_right * cost_right) * rcp_parent_area;

            if split_cost < best_cost {
                best_bounds = (bounds_left, buckets[i + 1].bounds_right);
                best_cost = split_cost;
                best_axis = axis;
                best_bucket = i;
            }
        }
    }

    // Degenerate distributions (all centroids in one bucket) yield no
    // candidate split; halve by count if the node must still shrink.
    if best_axis == usize::MAX {
        if node.num as usize > LEAF_MAX_ITEMS {
            build_equal(b, node, depth);
        } else {
            build_leaf(b, node);
        }
        return;
    }

    let leaf_cost = node.num as f32 * SAH_ITEM_COST;
    if best_cost < leaf_cost || node.num as usize > LEAF_MAX_ITEMS {
        // Partition with the exact bucket predicate used while scoring;
        // anything else would make the recorded child bounds a lie.
        let min_2x = 2.0 * node.bounds.min[best_axis];
        let rcp_scale_2x =
            (0.5 * SAH_BUCKETS as f32) / (node.bounds.max[best_axis] - node.bounds.min[best_axis]);

        let items = &mut b.items[range];
        let mut first = 0usize;
        let mut last = items.len();
        while first != last {
            if bucket_of(&items[first], best_axis, min_2x, rcp_scale_2x) <= best_bucket {
                first += 1;
            } else {
                last -= 1;
                items.swap(first, last);
            }
        }

        let num_left = first as u32;
        let num_right = node.num - num_left;
        debug_assert!(num_left > 0 && num_right > 0);

        let mut left = BuildNode::new(node.begin, num_left);
        let mut right = BuildNode::new(node.begin + num_left, num_right);
        left.bounds = best_bounds.0;
        right.bounds = best_bounds.1;

        build_rec(b, &mut left, depth + 1);
        build_rec(b, &mut right, depth + 1);

        let child_ix = b.nodes.len() as u32;
        b.nodes.push(left);
        b.nodes.push(right);
        node.child_ix = child_ix;
        node.vertex_offset = NONE;
        b.depth_num_nodes[depth] += 1;
    } else {
        build_leaf(b, node);
    }
}

/// Split `node` in half by item count along its longest axis. Used when
/// only balanced splits can keep every descendant inside the leaf budget.
fn build_equal(b: &mut Builder<'_>, node: &mut BuildNode, depth: usize) {
    let axis = node.bounds.longest_axis();
    let range = node.begin as usize..(node.begin + node.num) as usize;
    sort_by_centroid(&mut b.items[range.clone()], axis);

    let num_left = node.num / 2;
    let mut left = BuildNode::new(node.begin, num_left);
    let mut right = BuildNode::new(node.begin + num_left, node.num - num_left);

    for item in &b.items[range.start..range.start + num_left as usize] {
        left.bounds.expand_box(&item.bounds);
    }
    for item in &b.items[range.start + num_left as usize..range.end] {
        right.bounds.expand_box(&item.bounds);
    }

    build_rec(b, &mut left, depth + 1);
    build_rec(b, &mut right, depth + 1);

    let child_ix = b.nodes.len() as u32;
    b.nodes.push(left);
    b.nodes.push(right);
    node.child_ix = child_ix;
    node.vertex_offset = NONE;
    b.depth_num_nodes[depth] += 1;
}

/// Recursive build entry: picks leaf / equal split / SAH for `node`.
pub(crate) fn build_rec(b: &mut Builder<'_>, node: &mut BuildNode, depth: usize) {
    #[cfg(debug_assertions)]
    {
        let range = node.begin as usize..(node.begin + node.num) as usize;
        let mut check = Aabb::EMPTY;
        for item in &b.items[range] {
            debug_assert!(node.bounds.contains_box(&item.bounds));
            check.expand_box(&item.bounds);
        }
        if node.num > 0 {
            debug_assert_eq!(check.min, node.bounds.min);
            debug_assert_eq!(check.max, node.bounds.max);
        }
    }

    // Out of depth, this has to be a leaf.
    if depth == MAX_DEPTH {
        build_leaf(b, node);
        return;
    }

    // If even perfectly balanced splits from here down would overflow the
    // leaf budget, force an equal split now; this keeps the depth bound.
    let splits_left = (MAX_DEPTH - depth - 1).min(31);
    if (node.num as usize) >> splits_left > LEAF_MAX_ITEMS {
        build_equal(b, node, depth);
        return;
    }

    if node.num as usize <= LEAF_MIN_ITEMS {
        build_leaf(b, node);
        return;
    }

    build_sah(b, node, depth);
}
