//! Scene aggregate.
//!
//! Owns geometry stores, instances, lights and the camera, and turns them
//! into device state in [`Scene::upload_to_buffers`]:
//!
//! ```text
//! add_geometry / add_instance / add_light / clear   (manager -> Empty)
//!                     |
//!             upload_to_buffers
//!   geometry buffers -> light buffer -> BLAS per geometry -> TLAS  (Ready)
//! ```

mod camera;
mod cornell;
mod light;

pub use camera::{Camera, CameraUniform};
pub use cornell::CornellBoxOptions;
pub use light::{AreaLight, GpuAreaLight, AREA_LIGHT_SIZE};

use crate::accel::{AccelerationStructureManager, BuildReport, BuildState};
use crate::device::{Device, StorageMode};
use crate::geometry::{Geometry, GeometryId, GeometryInstance};
use crate::util::{Error, Result};

/// Geometry, instances, lights and camera of one ray-traced scene.
pub struct Scene<D: Device> {
    device: D,
    geometries: Vec<Geometry<D>>,
    instances: Vec<GeometryInstance>,
    lights: Vec<AreaLight>,
    light_buffer: Option<D::Buffer>,
    light_count: usize,
    camera: Camera,
    manager: AccelerationStructureManager<D>,
    generation: u32,
}

impl<D: Device> Scene<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            geometries: Vec::new(),
            instances: Vec::new(),
            lights: Vec::new(),
            light_buffer: None,
            light_count: 0,
            camera: Camera::default(),
            manager: AccelerationStructureManager::new(),
            generation: 0,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Take ownership of `geometry`. The returned id is valid until [`clear`](Self::clear).
    pub fn add_geometry(&mut self, geometry: impl Into<Geometry<D>>) -> GeometryId {
        self.manager.reset();
        self.geometries.push(geometry.into());
        GeometryId {
            index: (self.geometries.len() - 1) as u32,
            generation: self.generation,
        }
    }

    fn check_id(&self, id: GeometryId) -> Result<usize> {
        let index = id.index as usize;
        if id.generation != self.generation || index >= self.geometries.len() {
            return Err(Error::InvalidReference {
                index: id.index,
                generation: id.generation,
            });
        }
        Ok(index)
    }

    pub fn geometry(&self, id: GeometryId) -> Result<&Geometry<D>> {
        let index = self.check_id(id)?;
        Ok(&self.geometries[index])
    }

    /// Mutable access to an owned geometry. Invalidates built structures.
    pub fn geometry_mut(&mut self, id: GeometryId) -> Result<&mut Geometry<D>> {
        let index = self.check_id(id)?;
        self.manager.reset();
        Ok(&mut self.geometries[index])
    }

    /// Append an instance. Rejects geometry ids this scene did not hand out
    /// (or handed out before the last clear) and zero masks.
    pub fn add_instance(&mut self, instance: GeometryInstance) -> Result<()> {
        self.check_id(instance.geometry())?;
        if instance.mask() == 0 {
            return Err(Error::invalid_state("instance mask must be non-zero"));
        }
        self.manager.reset();
        self.instances.push(instance);
        Ok(())
    }

    pub fn add_light(&mut self, light: AreaLight) {
        self.manager.reset();
        self.lights.push(light);
        self.light_buffer = None;
        self.light_count = 0;
    }

    /// Drop everything and invalidate every previously issued [`GeometryId`].
    pub fn clear(&mut self) {
        self.manager.reset();
        self.geometries.clear();
        self.instances.clear();
        self.lights.clear();
        self.light_buffer = None;
        self.light_count = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Upload geometry and lights, then rebuild every acceleration structure.
    ///
    /// On error the manager is left [`BuildState::Empty`].
    #[tracing::instrument(skip_all, fields(
        geometries = self.geometries.len(),
        instances = self.instances.len(),
        lights = self.lights.len()
    ))]
    pub fn upload_to_buffers(&mut self) -> Result<()> {
        self.manager.reset();

        for geometry in &mut self.geometries {
            geometry.upload_to_buffers(&self.device)?;
        }

        if self.light_buffer.is_none() {
            let packed: Vec<GpuAreaLight> = self.lights.iter().map(AreaLight::to_gpu).collect();
            let mode = StorageMode::for_device(&self.device);
            let buffer = self.device.create_buffer_from(&packed, mode, "lights")?;
            self.light_buffer = Some(buffer);
            self.light_count = packed.len();
        }

        self.manager.rebuild(&self.device, &self.geometries, &self.instances)?;

        let report = self.manager.report();
        tracing::debug!(
            build_size = report.total_build_size(),
            compacted_size = report.total_compacted_size(),
            "scene ready"
        );
        Ok(())
    }

    pub fn geometries(&self) -> &[Geometry<D>] {
        &self.geometries
    }

    pub fn instances(&self) -> &[GeometryInstance] {
        &self.instances
    }

    pub fn lights(&self) -> &[AreaLight] {
        &self.lights
    }

    /// Packed [`GpuAreaLight`]s from the last upload.
    pub fn light_buffer(&self) -> Option<&D::Buffer> {
        self.light_buffer.as_ref()
    }

    /// Number of lights in [`light_buffer`](Self::light_buffer).
    pub fn light_count(&self) -> usize {
        self.light_count
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn manager(&self) -> &AccelerationStructureManager<D> {
        &self.manager
    }

    pub fn state(&self) -> BuildState {
        self.manager.state()
    }

    pub fn build_report(&self) -> &BuildReport {
        self.manager.report()
    }

    /// Compacted top-level structure. Fails unless the scene is ready.
    pub fn instance_structure(&self) -> Result<&D::AccelerationStructure> {
        self.manager
            .instance_structure()
            .ok_or_else(|| Error::invalid_state("scene is not uploaded"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;
    use crate::device::DeviceBuffer;
    use crate::geometry::FaceMask;
    use crate::util::{mask, Mat4, Vec3};

    fn light() -> AreaLight {
        AreaLight {
            position: Vec3::Y,
            forward: Vec3::NEG_Y,
            right: Vec3::X,
            up: Vec3::Z,
            color: Vec3::ONE,
        }
    }

    #[test]
    fn test_mutation_resets_state() {
        let mut scene = Scene::new(SoftwareDevice::new());
        let mut g = Geometry::triangles();
        if let Some(t) = g.as_triangles_mut() {
            t.add_cube(FaceMask::ALL, Vec3::ONE, Mat4::IDENTITY, false);
        }
        let id = scene.add_geometry(g);
        scene
            .add_instance(GeometryInstance::new(id, Mat4::IDENTITY, mask::GEOMETRY_MASK_TRIANGLE))
            .unwrap();
        scene.upload_to_buffers().unwrap();
        assert_eq!(scene.state(), BuildState::Ready);

        scene.add_light(light());
        assert_eq!(scene.state(), BuildState::Empty);
        assert!(scene.instance_structure().is_err());
        scene.upload_to_buffers().unwrap();
        assert_eq!(scene.light_count(), 1);
    }

    #[test]
    fn test_stale_ids_rejected_after_clear() {
        let mut scene = Scene::new(SoftwareDevice::new());
        let id = scene.add_geometry(Geometry::spheres());
        scene.clear();
        let err = scene
            .add_instance(GeometryInstance::new(id, Mat4::IDENTITY, 1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidReference { index: 0, generation: 0 }));

        let id = scene.add_geometry(Geometry::spheres());
        assert_eq!(id.generation, 1);
        assert!(scene.add_instance(GeometryInstance::new(id, Mat4::IDENTITY, 1)).is_ok());
    }

    #[test]
    fn test_zero_mask_rejected() {
        let mut scene = Scene::new(SoftwareDevice::new());
        let id = scene.add_geometry(Geometry::triangles());
        let err = scene.add_instance(GeometryInstance::new(id, Mat4::IDENTITY, 0)).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(scene.instances().is_empty());
    }

    #[test]
    fn test_light_buffer_matches_count() {
        let mut scene = Scene::new(SoftwareDevice::new());
        scene.upload_to_buffers().unwrap();
        assert_eq!(scene.light_buffer().unwrap().len(), 0);
        for n in 1..4 {
            scene.add_light(light());
            scene.upload_to_buffers().unwrap();
            assert_eq!(scene.light_count(), n);
            assert_eq!(scene.light_buffer().unwrap().len(), n * AREA_LIGHT_SIZE);
        }
    }

    #[test]
    fn test_failed_light_upload_reports_no_lights() {
        let device = SoftwareDevice::with_budget(Some(4096));
        let mut scene = Scene::new(device.clone());
        scene.add_light(light());
        scene.upload_to_buffers().unwrap();
        assert_eq!(scene.light_count(), 1);

        scene.add_light(light());
        assert_eq!(scene.light_count(), 0);
        assert!(scene.light_buffer().is_none());

        // Less than two lights' worth of budget left.
        let free = 4096 - device.memory_stats().allocated;
        let _filler = device
            .create_empty_buffer((free - 100) as usize, StorageMode::Private, "filler")
            .unwrap();
        let err = scene.upload_to_buffers().unwrap_err();
        assert!(err.is_allocation_failure());
        assert_eq!(scene.light_count(), 0);
        assert!(scene.light_buffer().is_none());
        assert_eq!(scene.state(), BuildState::Empty);
    }

    #[test]
    fn test_storage_mode_follows_device_memory() {
        for (unified, expected) in [(true, StorageMode::Shared), (false, StorageMode::Private)] {
            let mut scene = Scene::new(SoftwareDevice::new().with_unified_memory(unified));

            let mut cube = Geometry::triangles();
            if let Some(t) = cube.as_triangles_mut() {
                t.add_cube(FaceMask::ALL, Vec3::ONE, Mat4::IDENTITY, false);
            }
            let cube_id = scene.add_geometry(cube);
            let mut spheres = Geometry::spheres();
            if let Some(s) = spheres.as_spheres_mut() {
                s.add_sphere(Vec3::X * 3.0, 1.0, Vec3::ONE);
            }
            scene.add_geometry(spheres);
            scene
                .add_instance(GeometryInstance::new(cube_id, Mat4::IDENTITY, mask::GEOMETRY_MASK_TRIANGLE))
                .unwrap();
            scene.add_light(light());
            scene.upload_to_buffers().unwrap();

            assert_eq!(scene.light_buffer().unwrap().storage_mode(), expected);
            for geometry in scene.geometries() {
                for buffer in geometry.resources().unwrap() {
                    assert_eq!(buffer.storage_mode(), expected, "{}", buffer.label());
                }
            }
            assert_eq!(scene.manager().instance_buffer().unwrap().storage_mode(), expected);
        }
    }
}
