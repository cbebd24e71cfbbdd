//! Math type re-exports and ray tracing specific math utilities.
//!
//! This module re-exports types from `glam` and provides the bounding box
//! and ray types shared by geometry, acceleration structures and queries.

// Re-export glam types
pub use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Axis-aligned bounding box, one per custom primitive.
///
/// Layout matches two packed float3 values (24 bytes), which is what the
/// bounding-box geometry path of an acceleration structure build consumes.
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    /// Empty bounding box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new bounding box from min and max points.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Bounds of a sphere.
    #[inline]
    pub fn from_sphere(origin: Vec3, radius: f32) -> Self {
        let r = Vec3::splat(radius);
        Self {
            min: origin - r,
            max: origin + r,
        }
    }

    /// Check if this box is empty (has no volume).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Expand this box to include a point.
    #[inline]
    pub fn expand_by_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Expand this box to include another box.
    #[inline]
    pub fn expand_by_box(&mut self, other: &Self) {
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    /// Surface area (for SAH cost). Zero for empty boxes.
    #[inline]
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Get the center of the box.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Bounds of this box after an affine transform (all 8 corners).
    pub fn transformed(&self, m: &Mat4) -> Self {
        if self.is_empty() {
            return Self::EMPTY;
        }
        let mut out = Self::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.expand_by_point(m.transform_point3(corner));
        }
        out
    }

    /// Slab test. Returns the entry distance if the ray overlaps the box
    /// within `[ray.min_distance, max_distance]`.
    #[inline]
    pub fn intersect(&self, ray: &Ray, inv_dir: Vec3, max_distance: f32) -> Option<f32> {
        let t0 = (self.min - ray.origin) * inv_dir;
        let t1 = (self.max - ray.origin) * inv_dir;
        // 0 * inf: the ray runs inside a slab plane, which bounds nothing on that axis.
        let in_plane = t0.is_nan_mask() | t1.is_nan_mask();
        let near = Vec3::select(in_plane, Vec3::NEG_INFINITY, t0.min(t1));
        let far = Vec3::select(in_plane, Vec3::INFINITY, t0.max(t1));
        let t_near = near.max_element().max(ray.min_distance);
        let t_far = far.min_element().min(max_distance);
        (t_near <= t_far).then_some(t_near)
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundingBox({:?} - {:?})", self.min, self.max)
    }
}

/// A ray with a valid distance interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub min_distance: f32,
    pub max_distance: f32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
        }
    }

    /// Restrict the distance interval.
    pub fn with_range(mut self, min_distance: f32, max_distance: f32) -> Self {
        self.min_distance = min_distance;
        self.max_distance = max_distance;
        self
    }

    /// Ray in the space described by `m`. The direction is not normalized,
    /// so distances stay comparable across spaces.
    #[inline]
    pub fn transformed(&self, m: &Mat4) -> Self {
        Self {
            origin: m.transform_point3(self.origin),
            direction: m.transform_vector3(self.direction),
            ..*self
        }
    }

    /// Component-wise reciprocal of the direction for slab tests.
    #[inline]
    pub fn inv_direction(&self) -> Vec3 {
        Vec3::ONE / self.direction
    }
}

/// Pack the upper 4x3 of an affine matrix into column-major float3 columns.
pub fn pack_affine(m: &Mat4) -> [[f32; 3]; 4] {
    [
        m.x_axis.truncate().to_array(),
        m.y_axis.truncate().to_array(),
        m.z_axis.truncate().to_array(),
        m.w_axis.truncate().to_array(),
    ]
}

/// Inverse of [`pack_affine`].
pub fn unpack_affine(cols: &[[f32; 3]; 4]) -> Mat4 {
    Mat4::from_cols(
        Vec3::from(cols[0]).extend(0.0),
        Vec3::from(cols[1]).extend(0.0),
        Vec3::from(cols[2]).extend(0.0),
        Vec3::from(cols[3]).extend(1.0),
    )
}
