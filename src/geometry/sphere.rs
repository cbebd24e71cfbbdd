//! Analytic sphere geometry, intersected through a named intersection function.

use bytemuck::{Pod, Zeroable};

use crate::device::{BoundingBoxDescriptor, Device, GeometryDescriptor, StorageMode};
use crate::util::{BoundingBox, Error, Result, Vec3};

/// Name of the intersection function that tests rays against [`GpuSphere`]s.
pub const SPHERE_INTERSECTION_FUNCTION: &str = "sphereIntersectionFunction";

/// User-facing sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub origin: Vec3,
    pub radius: f32,
    pub color: Vec3,
}

/// Device sphere record (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuSphere {
    pub origin: [f32; 3],
    pub radius_squared: f32,
    pub color: [f32; 3],
    pub radius: f32,
}

impl From<&Sphere> for GpuSphere {
    fn from(s: &Sphere) -> Self {
        Self {
            origin: s.origin.to_array(),
            radius_squared: s.radius * s.radius,
            color: s.color.to_array(),
            radius: s.radius,
        }
    }
}

struct SphereBuffers<B> {
    spheres: B,
    bounding_boxes: B,
    count: usize,
}

/// Geometry made of spheres. Each sphere contributes one bounding box to the
/// acceleration structure.
pub struct SphereGeometry<D: Device> {
    spheres: Vec<Sphere>,
    buffers: Option<SphereBuffers<D::Buffer>>,
    dirty: bool,
}

impl<D: Device> Default for SphereGeometry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> SphereGeometry<D> {
    pub fn new() -> Self {
        Self {
            spheres: Vec::new(),
            buffers: None,
            dirty: false,
        }
    }

    pub fn add_sphere(&mut self, origin: Vec3, radius: f32, color: Vec3) {
        self.spheres.push(Sphere { origin, radius, color });
        self.dirty = true;
    }

    pub fn spheres(&self) -> &[Sphere] {
        &self.spheres
    }

    pub fn sphere_count(&self) -> usize {
        self.spheres.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear(&mut self) {
        self.spheres.clear();
        self.buffers = None;
        self.dirty = false;
    }

    #[tracing::instrument(skip_all, fields(spheres = self.spheres.len()))]
    pub fn upload_to_buffers(&mut self, device: &D) -> Result<()> {
        if !self.dirty && self.buffers.is_some() {
            return Ok(());
        }

        let records: Vec<GpuSphere> = self.spheres.iter().map(GpuSphere::from).collect();
        let boxes: Vec<BoundingBox> = self
            .spheres
            .iter()
            .map(|s| BoundingBox::from_sphere(s.origin, s.radius))
            .collect();

        let mode = StorageMode::for_device(device);
        let buffers = SphereBuffers {
            spheres: device.create_buffer_from(&records, mode, "spheres")?,
            bounding_boxes: device.create_buffer_from(&boxes, mode, "sphere_bounding_boxes")?,
            count: records.len(),
        };
        self.buffers = Some(buffers);
        self.dirty = false;
        Ok(())
    }

    pub fn geometry_descriptor(&self) -> Result<GeometryDescriptor<'_, D::Buffer>> {
        if self.dirty {
            return Err(Error::invalid_state("sphere geometry has primitives that were not uploaded"));
        }
        let buffers = self.buffers.as_ref();
        Ok(GeometryDescriptor::BoundingBoxes(BoundingBoxDescriptor {
            bounding_box_buffer: buffers.map(|b| &b.bounding_boxes),
            bounding_box_stride: std::mem::size_of::<BoundingBox>(),
            bounding_box_count: buffers.map_or(0, |b| b.count),
            intersection_function_name: SPHERE_INTERSECTION_FUNCTION,
        }))
    }

    /// `[spheres]`, read by the intersection function.
    pub fn resources(&self) -> Result<Vec<&D::Buffer>> {
        match (&self.buffers, self.dirty) {
            (Some(b), false) => Ok(vec![&b.spheres]),
            _ => Err(Error::invalid_state("sphere geometry is not uploaded")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;
    use crate::device::DeviceBuffer;

    #[test]
    fn test_gpu_sphere_layout() {
        assert_eq!(std::mem::size_of::<GpuSphere>(), 32);
        let s = GpuSphere::from(&Sphere {
            origin: Vec3::new(1.0, 2.0, 3.0),
            radius: 0.5,
            color: Vec3::ONE,
        });
        assert_eq!(s.radius_squared, 0.25);
        assert_eq!(s.radius, 0.5);
    }

    #[test]
    fn test_sphere_upload_and_descriptor() {
        let device = SoftwareDevice::new();
        let mut g = SphereGeometry::<SoftwareDevice>::new();
        g.add_sphere(Vec3::ZERO, 1.0, Vec3::ONE);
        g.add_sphere(Vec3::X * 3.0, 0.5, Vec3::ONE);
        assert!(g.geometry_descriptor().is_err());

        g.upload_to_buffers(&device).unwrap();
        let desc = g.geometry_descriptor().unwrap();
        assert_eq!(desc.primitive_count(), 2);
        assert_eq!(desc.intersection_function_name(), Some(SPHERE_INTERSECTION_FUNCTION));

        let res = g.resources().unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].len(), 64);

        let boxes = match desc {
            GeometryDescriptor::BoundingBoxes(b) => b.bounding_box_buffer.unwrap().as_slice::<BoundingBox>().unwrap().to_vec(),
            _ => unreachable!(),
        };
        assert_eq!(boxes[1].min, Vec3::new(2.5, -0.5, -0.5));
    }

    #[test]
    fn test_empty_sphere_geometry_uploads() {
        let device = SoftwareDevice::new();
        let mut g = SphereGeometry::<SoftwareDevice>::new();
        g.upload_to_buffers(&device).unwrap();
        assert_eq!(g.geometry_descriptor().unwrap().primitive_count(), 0);
        assert_eq!(g.resources().unwrap()[0].len(), 0);
    }
}
