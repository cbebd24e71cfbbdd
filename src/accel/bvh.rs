//! BVH node type shared by bottom- and top-level structures.
//!
//! Flat array layout optimized for traversal:
//! - 32-byte nodes (cache-line friendly)
//! - Leaves reference a contiguous run of primitive records

use bytemuck::{Pod, Zeroable};

use crate::util::BoundingBox;

/// BVH node (32 bytes).
///
/// Internal node: left_or_first = left child index, count = 0.
/// Right child is always `left_or_first + 1`.
/// Leaf node: left_or_first = first primitive record, count > 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    /// Leaf covering `count` records starting at `first`.
    pub fn leaf(bounds: &BoundingBox, first: u32, count: u32) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first: first,
            aabb_max: bounds.max.to_array(),
            count,
        }
    }

    /// Internal node whose children start at `left`.
    pub fn internal(bounds: &BoundingBox, left: u32) -> Self {
        Self {
            aabb_min: bounds.min.to_array(),
            left_or_first: left,
            aabb_max: bounds.max.to_array(),
            count: 0,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    #[inline]
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::new(self.aabb_min.into(), self.aabb_max.into())
    }
}

/// Built BVH result.
#[derive(Debug, Clone)]
pub struct Bvh {
    /// Flat node array (index 0 = root).
    pub nodes: Vec<BvhNode>,
    /// Reordered primitive indices (leaves reference into this).
    pub prim_indices: Vec<u32>,
}

impl Bvh {
    /// Bounds of the whole hierarchy.
    pub fn bounds(&self) -> BoundingBox {
        self.nodes.first().map_or(BoundingBox::EMPTY, BvhNode::bounds)
    }

    /// Worst-case node count for `n` primitives (full binary tree).
    pub fn node_capacity(n: usize) -> usize {
        if n == 0 {
            1
        } else {
            2 * n - 1
        }
    }
}
