//! Geometry and ray-type mask bits.
//!
//! An instance is eligible for intersection with a ray only when
//! `instance_mask & ray_mask != 0`.

/// Instances of triangle geometry.
pub const GEOMETRY_MASK_TRIANGLE: u32 = 1;
/// Instances of sphere geometry.
pub const GEOMETRY_MASK_SPHERE: u32 = 2;
/// Instances of light source geometry.
pub const GEOMETRY_MASK_LIGHT: u32 = 4;

/// Any non-light geometry.
pub const GEOMETRY_MASK_GEOMETRY: u32 = GEOMETRY_MASK_TRIANGLE | GEOMETRY_MASK_SPHERE;

/// Camera rays see geometry and lights.
pub const RAY_MASK_PRIMARY: u32 = GEOMETRY_MASK_GEOMETRY | GEOMETRY_MASK_LIGHT;
/// Shadow rays ignore light geometry so they are not occluded by the light itself.
pub const RAY_MASK_SHADOW: u32 = GEOMETRY_MASK_GEOMETRY;
/// Bounce rays.
pub const RAY_MASK_SECONDARY: u32 = GEOMETRY_MASK_GEOMETRY;

/// True if an instance with `instance_mask` may be hit by a ray with `ray_mask`.
#[inline]
pub fn accepts(instance_mask: u32, ray_mask: u32) -> bool {
    instance_mask & ray_mask != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_rays_skip_lights() {
        assert!(accepts(GEOMETRY_MASK_LIGHT, RAY_MASK_PRIMARY));
        assert!(!accepts(GEOMETRY_MASK_LIGHT, RAY_MASK_SHADOW));
        assert!(accepts(GEOMETRY_MASK_SPHERE, RAY_MASK_SECONDARY));
    }
}
