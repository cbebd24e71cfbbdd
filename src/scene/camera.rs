//! Look-at camera.

use bytemuck::{Pod, Zeroable};

use crate::util::{Ray, Vec2, Vec3};

/// Camera defined by position, target and up hint.
/// The orthonormal basis is recomputed whenever one of them is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    position: Vec3,
    target: Vec3,
    up_hint: Vec3,
    forward: Vec3,
    right: Vec3,
    up: Vec3,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 1.0, 10.0), Vec3::new(0.0, 1.0, 0.0), Vec3::Y)
    }
}

/// Packed camera basis for device consumption (64 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub position: [f32; 3],
    _pad0: f32,
    pub right: [f32; 3],
    _pad1: f32,
    pub up: [f32; 3],
    _pad2: f32,
    pub forward: [f32; 3],
    _pad3: f32,
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let mut camera = Self {
            position,
            target,
            up_hint: up,
            forward: Vec3::Z,
            right: Vec3::X,
            up: Vec3::Y,
        };
        camera.update_basis();
        camera
    }

    fn update_basis(&mut self) {
        self.forward = (self.target - self.position).normalize_or(Vec3::Z);
        self.right = self.forward.cross(self.up_hint).normalize_or(Vec3::X);
        self.up = self.right.cross(self.forward).normalize_or(Vec3::Y);
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.update_basis();
    }

    pub fn set_target(&mut self, target: Vec3) {
        self.target = target;
        self.update_basis();
    }

    pub fn set_up(&mut self, up: Vec3) {
        self.up_hint = up;
        self.update_basis();
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    pub fn right(&self) -> Vec3 {
        self.right
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn uniform(&self) -> CameraUniform {
        CameraUniform {
            position: self.position.to_array(),
            _pad0: 0.0,
            right: self.right.to_array(),
            _pad1: 0.0,
            up: self.up.to_array(),
            _pad2: 0.0,
            forward: self.forward.to_array(),
            _pad3: 0.0,
        }
    }

    /// Ray through image-plane coordinate `uv` in `[-1, 1]^2` (+y up).
    /// `fov_y` is the vertical field of view in radians.
    pub fn primary_ray(&self, uv: Vec2, aspect: f32, fov_y: f32) -> Ray {
        let height = (fov_y * 0.5).tan();
        let width = aspect * height;
        let direction =
            (uv.x * width * self.right + uv.y * height * self.up + self.forward).normalize();
        Ray::new(self.position, direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_basis_is_orthonormal() {
        let cam = Camera::new(Vec3::new(1.0, 2.0, -6.0), Vec3::new(0.0, 1.0, 0.0), Vec3::Y);
        assert_relative_eq!(cam.forward().length(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(cam.forward().dot(cam.right()), 0.0, epsilon = 1e-6);
        assert_relative_eq!(cam.up().dot(cam.right()), 0.0, epsilon = 1e-6);
        assert!(cam.up().y > 0.0);
    }

    #[test]
    fn test_setters_recompute_basis() {
        let mut cam = Camera::default();
        assert_relative_eq!(cam.forward().z, -1.0);
        cam.set_target(Vec3::new(0.0, 1.0, 20.0));
        assert_relative_eq!(cam.forward().z, 1.0);
        cam.set_position(Vec3::new(0.0, 1.0, 30.0));
        assert_relative_eq!(cam.forward().z, -1.0);
    }

    #[test]
    fn test_center_ray_is_forward() {
        let cam = Camera::default();
        let ray = cam.primary_ray(Vec2::ZERO, 1.0, 45f32.to_radians());
        assert_relative_eq!(ray.direction.z, -1.0, epsilon = 1e-6);
        assert_eq!(std::mem::size_of::<CameraUniform>(), 64);
    }
}
