//! SAH-based BVH builder.
//!
//! Constructs a flat BVH array from a list of primitive bounds.
//! Uses Surface Area Heuristic for split decisions and
//! produces a compact node array for device upload.

use bytemuck::Zeroable;

use super::bvh::{Bvh, BvhNode};
use crate::util::{BoundingBox, Vec3};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

/// Cost ratio: traversal vs intersection.
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Maximum primitives per leaf before forcing a split.
const MAX_LEAF_SIZE: usize = 4;

/// SAH bin for evaluating split candidates.
#[derive(Clone, Copy)]
struct Bin {
    bounds: BoundingBox,
    count: usize,
}

impl Bin {
    const EMPTY: Self = Self {
        bounds: BoundingBox::EMPTY,
        count: 0,
    };
}

/// Temporary memory [`build_bvh`] needs for `n` primitives: per-primitive
/// bounds, centroids and the working index array.
pub fn scratch_size(n: usize) -> u64 {
    (n * (std::mem::size_of::<BoundingBox>()
        + std::mem::size_of::<Vec3>()
        + std::mem::size_of::<u32>())) as u64
}

/// Build BVH from primitive bounds using SAH.
///
/// Returns a flat node array + reordered primitive index list.
/// Bounds are NOT modified, indices map into the original slice.
#[tracing::instrument(skip_all, fields(prim_count = bounds.len()))]
pub fn build_bvh(bounds: &[BoundingBox]) -> Bvh {
    let n = bounds.len();
    if n == 0 {
        return Bvh {
            nodes: vec![BvhNode::leaf(&BoundingBox::EMPTY, 0, 0)],
            prim_indices: vec![],
        };
    }

    let centroids: Vec<Vec3> = bounds.iter().map(|b| b.center()).collect();

    // Working index array (will be reordered by partitioning)
    let mut indices: Vec<u32> = (0..n as u32).collect();
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(Bvh::node_capacity(n));
    nodes.push(BvhNode::zeroed());

    struct Task {
        node_idx: usize,
        start: usize,
        end: usize, // exclusive
    }

    let mut stack = vec![Task {
        node_idx: 0,
        start: 0,
        end: n,
    }];

    while let Some(task) = stack.pop() {
        let (start, end) = (task.start, task.end);
        let count = end - start;

        let mut node_bounds = BoundingBox::EMPTY;
        for &idx in &indices[start..end] {
            node_bounds.expand_by_box(&bounds[idx as usize]);
        }

        if count <= MAX_LEAF_SIZE {
            nodes[task.node_idx] = BvhNode::leaf(&node_bounds, start as u32, count as u32);
            continue;
        }

        let mut centroid_bounds = BoundingBox::EMPTY;
        for &idx in &indices[start..end] {
            centroid_bounds.expand_by_point(centroids[idx as usize]);
        }

        let split = find_best_split(&indices[start..end], bounds, &centroids, &centroid_bounds);

        let leaf_cost = count as f32 * INTERSECT_COST * node_bounds.area();
        let mid = match split {
            Some((axis, pos, cost)) if cost < leaf_cost => {
                let mid = partition(&mut indices[start..end], |&idx| {
                    centroids[idx as usize][axis] < pos
                }) + start;
                if mid == start || mid == end {
                    (start + end) / 2
                } else {
                    mid
                }
            }
            // Every centroid coincides: split in the middle so leaves stay small.
            None if count > MAX_LEAF_SIZE * 2 => (start + end) / 2,
            _ => {
                nodes[task.node_idx] = BvhNode::leaf(&node_bounds, start as u32, count as u32);
                continue;
            }
        };

        let left_idx = nodes.len();
        nodes.push(BvhNode::zeroed());
        nodes.push(BvhNode::zeroed());
        nodes[task.node_idx] = BvhNode::internal(&node_bounds, left_idx as u32);

        // Right first so left is processed first (depth-first order)
        stack.push(Task {
            node_idx: left_idx + 1,
            start: mid,
            end,
        });
        stack.push(Task {
            node_idx: left_idx,
            start,
            end: mid,
        });
    }

    Bvh {
        nodes,
        prim_indices: indices,
    }
}

/// SAH binned split search across all 3 axes.
/// Returns (axis, split_position, cost), or `None` if no axis has extent.
fn find_best_split(
    indices: &[u32],
    bounds: &[BoundingBox],
    centroids: &[Vec3],
    centroid_bounds: &BoundingBox,
) -> Option<(usize, f32, f32)> {
    let mut best: Option<(usize, f32, f32)> = None;

    for axis in 0..3 {
        let lo = centroid_bounds.min[axis];
        let extent = centroid_bounds.max[axis] - lo;
        if extent < 1e-8 {
            continue;
        }

        let mut bins = [Bin::EMPTY; NUM_BINS];
        let inv_extent = NUM_BINS as f32 / extent;

        for &idx in indices {
            let bin_id = ((centroids[idx as usize][axis] - lo) * inv_extent) as usize;
            let bin = &mut bins[bin_id.min(NUM_BINS - 1)];
            bin.bounds.expand_by_box(&bounds[idx as usize]);
            bin.count += 1;
        }

        // Sweep from left: prefix areas and counts
        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = BoundingBox::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = sweep.area();
            left_count[i] = sweep_count;
        }

        // Sweep from right and evaluate SAH cost
        sweep = BoundingBox::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            if left_count[i - 1] == 0 || sweep_count == 0 {
                continue;
            }
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1]
                        + sweep_count as f32 * sweep.area());

            if best.map_or(true, |(_, _, c)| cost < c) {
                best = Some((axis, lo + (i as f32 / NUM_BINS as f32) * extent, cost));
            }
        }
    }

    best
}

/// Partition slice in-place. Returns count of elements where predicate is true.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(cx: f32, cy: f32, cz: f32) -> BoundingBox {
        BoundingBox::from_sphere(Vec3::new(cx, cy, cz), 0.5)
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = build_bvh(&[]);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.prim_indices.len(), 0);
        assert!(bvh.bounds().is_empty());
    }

    #[test]
    fn test_single_primitive() {
        let bvh = build_bvh(&[make_box(0.0, 0.0, 0.0)]);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 1);
        assert_eq!(bvh.prim_indices, vec![0]);
    }

    #[test]
    fn test_many_primitives_builds_tree() {
        let boxes: Vec<BoundingBox> = (0..100).map(|i| make_box(i as f32 * 2.0, 0.0, 0.0)).collect();
        let bvh = build_bvh(&boxes);

        assert!(bvh.nodes.len() > 1, "BVH should have internal nodes");
        assert!(bvh.nodes.len() <= Bvh::node_capacity(100));

        let mut sorted = bvh.prim_indices.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());

        let root = &bvh.nodes[0];
        assert!(root.aabb_min[0] < 0.0);
        assert!(root.aabb_max[0] > 198.0);

        // Leaves cover every primitive exactly once
        let covered: u32 = bvh.nodes.iter().filter(|n| n.is_leaf()).map(|n| n.count).sum();
        assert_eq!(covered, 100);
    }

    #[test]
    fn test_coincident_centroids_still_split() {
        let boxes = vec![make_box(1.0, 1.0, 1.0); 20];
        let bvh = build_bvh(&boxes);
        assert!(bvh.nodes.iter().filter(|n| n.is_leaf()).all(|n| n.count as usize <= MAX_LEAF_SIZE * 2));
        let covered: u32 = bvh.nodes.iter().filter(|n| n.is_leaf()).map(|n| n.count).sum();
        assert_eq!(covered, 20);
    }

    #[test]
    fn test_leaf_count_correct() {
        let boxes = vec![make_box(0.0, 0.0, 0.0), make_box(1.0, 0.0, 0.0), make_box(2.0, 0.0, 0.0)];
        let bvh = build_bvh(&boxes);
        assert_eq!(bvh.nodes[0].count, 3);
    }
}
