//! Instanced Cornell box demonstration scene.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{AreaLight, Camera, Scene};
use crate::device::Device;
use crate::geometry::{FaceMask, GeometryInstance, SphereGeometry, TriangleGeometry};
use crate::util::{mask, Mat4, Result, Vec3};

/// Spacing between neighbouring boxes of the instance grid.
const GRID_SPACING: f32 = 2.5;

const WHITE: Vec3 = Vec3::new(0.725, 0.71, 0.68);
const RED: Vec3 = Vec3::new(0.63, 0.065, 0.05);
const GREEN: Vec3 = Vec3::new(0.14, 0.45, 0.091);

/// Parameters of [`Scene::instanced_cornell_box`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornellBoxOptions {
    /// Replace the short box with a sphere tested by an intersection function.
    pub use_intersection_functions: bool,
    /// Grid covers `-radius..=radius` in x and y.
    pub grid_radius: u32,
    /// Seed of the light colour generator.
    pub light_seed: u64,
}

impl Default for CornellBoxOptions {
    fn default() -> Self {
        Self {
            use_intersection_functions: true,
            grid_radius: 1,
            light_seed: 0,
        }
    }
}

impl<D: Device> Scene<D> {
    /// Grid of Cornell boxes, each with its own area light. The light quad,
    /// the room and the optional sphere set are shared geometries placed by
    /// one instance each per cell.
    pub fn instanced_cornell_box(device: D, options: &CornellBoxOptions) -> Result<Self> {
        let mut scene = Scene::new(device);

        let mut light_mesh = TriangleGeometry::new();
        let transform = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0))
            * Mat4::from_scale(Vec3::new(0.5, 1.98, 0.5));
        light_mesh.add_cube(FaceMask::POSITIVE_Y, Vec3::ONE, transform, true);
        let light_id = scene.add_geometry(light_mesh);

        let mut room = TriangleGeometry::new();
        let transform = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0));
        room.add_cube(
            FaceMask::NEGATIVE_Y | FaceMask::POSITIVE_Y | FaceMask::NEGATIVE_Z,
            WHITE,
            transform,
            true,
        );
        room.add_cube(FaceMask::NEGATIVE_X, RED, transform, true);
        room.add_cube(FaceMask::POSITIVE_X, GREEN, transform, true);

        let transform = Mat4::from_translation(Vec3::new(-0.335, 0.6, -0.29))
            * Mat4::from_rotation_y(0.3)
            * Mat4::from_scale(Vec3::new(0.6, 1.2, 0.6));
        room.add_cube(FaceMask::ALL, WHITE, transform, false);

        if !options.use_intersection_functions {
            let transform = Mat4::from_translation(Vec3::new(0.3275, 0.3, 0.3725))
                * Mat4::from_rotation_y(-0.3)
                * Mat4::from_scale(Vec3::splat(0.6));
            room.add_cube(FaceMask::ALL, WHITE, transform, false);
        }
        let room_id = scene.add_geometry(room);

        let sphere_id = if options.use_intersection_functions {
            let mut spheres = SphereGeometry::new();
            spheres.add_sphere(Vec3::new(0.3275, 0.3, 0.3725), 0.3, WHITE);
            Some(scene.add_geometry(spheres))
        } else {
            None
        };

        let mut rng = StdRng::seed_from_u64(options.light_seed);
        let r = options.grid_radius as i32;
        for y in -r..=r {
            for x in -r..=r {
                let offset = Vec3::new(x as f32 * GRID_SPACING, y as f32 * GRID_SPACING, 0.0);
                let transform = Mat4::from_translation(offset);

                scene.add_instance(GeometryInstance::new(light_id, transform, mask::GEOMETRY_MASK_LIGHT))?;
                scene.add_instance(GeometryInstance::new(room_id, transform, mask::GEOMETRY_MASK_TRIANGLE))?;
                if let Some(sphere_id) = sphere_id {
                    scene.add_instance(GeometryInstance::new(sphere_id, transform, mask::GEOMETRY_MASK_SPHERE))?;
                }

                let color = Vec3::new(rng.gen(), rng.gen(), rng.gen()) * 4.0;
                scene.add_light(AreaLight {
                    position: offset + Vec3::new(0.0, 1.98, 0.0),
                    forward: Vec3::NEG_Y,
                    right: Vec3::new(0.25, 0.0, 0.0),
                    up: Vec3::new(0.0, 0.0, 0.25),
                    color,
                });
            }
        }

        *scene.camera_mut() = Camera::new(Vec3::new(0.0, 1.0, 10.0), Vec3::new(0.0, 1.0, 0.0), Vec3::Y);
        tracing::debug!(
            geometries = scene.geometries().len(),
            instances = scene.instances().len(),
            lights = scene.lights().len(),
            "cornell box scene created"
        );
        Ok(scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;

    #[test]
    fn test_default_grid_counts() {
        let scene = Scene::instanced_cornell_box(SoftwareDevice::new(), &CornellBoxOptions::default()).unwrap();
        assert_eq!(scene.geometries().len(), 3);
        assert_eq!(scene.instances().len(), 27);
        assert_eq!(scene.lights().len(), 9);
    }

    #[test]
    fn test_without_intersection_functions() {
        let options = CornellBoxOptions {
            use_intersection_functions: false,
            grid_radius: 0,
            ..Default::default()
        };
        let scene = Scene::instanced_cornell_box(SoftwareDevice::new(), &options).unwrap();
        assert_eq!(scene.geometries().len(), 2);
        assert_eq!(scene.instances().len(), 2);
        // 3 + 1 + 1 room faces, tall box and short box
        assert_eq!(scene.geometries()[1].primitive_count(), (5 + 6 + 6) * 2);
    }

    #[test]
    fn test_light_colors_are_seeded() {
        let options = CornellBoxOptions::default();
        let a = Scene::instanced_cornell_box(SoftwareDevice::new(), &options).unwrap();
        let b = Scene::instanced_cornell_box(SoftwareDevice::new(), &options).unwrap();
        assert_eq!(a.lights(), b.lights());
        assert!(a.lights().iter().all(|l| l.color.max_element() <= 4.0));
    }
}
