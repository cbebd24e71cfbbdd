//! Triangle mesh geometry.

use bitflags::bitflags;

use crate::device::{
    Device, GeometryDescriptor, IndexType, StorageMode, TriangleDescriptor,
};
use crate::util::{Error, Mat4, Result, Vec3};

bitflags! {
    /// Faces of a unit cube to emit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaceMask: u32 {
        const NEGATIVE_X = 1 << 0;
        const POSITIVE_X = 1 << 1;
        const NEGATIVE_Y = 1 << 2;
        const POSITIVE_Y = 1 << 3;
        const NEGATIVE_Z = 1 << 4;
        const POSITIVE_Z = 1 << 5;
        const ALL = (1 << 6) - 1;
    }
}

/// Unit cube corners, centered on the origin.
const CUBE_VERTICES: [Vec3; 8] = [
    Vec3::new(-0.5, -0.5, -0.5),
    Vec3::new(0.5, -0.5, -0.5),
    Vec3::new(-0.5, 0.5, -0.5),
    Vec3::new(0.5, 0.5, -0.5),
    Vec3::new(-0.5, -0.5, 0.5),
    Vec3::new(0.5, -0.5, 0.5),
    Vec3::new(-0.5, 0.5, 0.5),
    Vec3::new(0.5, 0.5, 0.5),
];

/// Corner indices of each face, in [`FaceMask`] bit order.
const CUBE_FACES: [[usize; 4]; 6] = [
    [0, 4, 6, 2],
    [1, 3, 7, 5],
    [0, 1, 5, 4],
    [2, 6, 7, 3],
    [0, 2, 3, 1],
    [4, 5, 7, 6],
];

/// Device copies of the vertex streams.
struct TriangleBuffers<B> {
    indices: B,
    positions: B,
    normals: B,
    colors: B,
    triangle_count: usize,
}

/// Geometry made of triangles, intersected by the built-in triangle test.
pub struct TriangleGeometry<D: Device> {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    colors: Vec<Vec3>,
    indices: Vec<u32>,
    buffers: Option<TriangleBuffers<D::Buffer>>,
    dirty: bool,
}

impl<D: Device> Default for TriangleGeometry<D> {
    fn default() -> Self {
        Self::new()
    }
}

fn triangle_normal(v0: Vec3, v1: Vec3, v2: Vec3) -> Vec3 {
    (v1 - v0).cross(v2 - v0).normalize_or_zero()
}

impl<D: Device> TriangleGeometry<D> {
    pub fn new() -> Self {
        Self {
            positions: Vec::new(),
            normals: Vec::new(),
            colors: Vec::new(),
            indices: Vec::new(),
            buffers: None,
            dirty: false,
        }
    }

    /// CPU-side triangle count.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn colors(&self) -> &[Vec3] {
        &self.colors
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// True if primitives were added since the last upload.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Append the faces of a transformed unit cube selected by `faces`.
    /// Each face becomes one quad (two triangles).
    pub fn add_cube(&mut self, faces: FaceMask, color: Vec3, transform: Mat4, inward_normals: bool) {
        let corners = CUBE_VERTICES.map(|v| transform.transform_point3(v));

        for (bit, face) in CUBE_FACES.iter().enumerate() {
            if faces.bits() & (1 << bit) != 0 {
                self.add_cube_face(&corners, color, face, inward_normals);
            }
        }
    }

    fn add_cube_face(&mut self, corners: &[Vec3; 8], color: Vec3, face: &[usize; 4], inward_normals: bool) {
        let [v0, v1, v2, v3] = face.map(|i| corners[i]);

        let mut n0 = triangle_normal(v0, v1, v2);
        let mut n1 = triangle_normal(v0, v2, v3);
        if inward_normals {
            n0 = -n0;
            n1 = -n1;
        }

        let base = self.positions.len() as u32;
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        self.positions.extend_from_slice(&[v0, v1, v2, v3]);
        // The diagonal vertices are shared by both triangles.
        self.normals.extend_from_slice(&[
            (n0 + n1).normalize_or_zero(),
            n0,
            (n0 + n1).normalize_or_zero(),
            n1,
        ]);
        self.colors.extend_from_slice(&[color; 4]);
        self.dirty = true;
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.normals.clear();
        self.colors.clear();
        self.indices.clear();
        self.buffers = None;
        self.dirty = false;
    }

    #[tracing::instrument(skip_all, fields(triangles = self.triangle_count()))]
    pub fn upload_to_buffers(&mut self, device: &D) -> Result<()> {
        if !self.dirty && self.buffers.is_some() {
            tracing::trace!("triangle buffers up to date");
            return Ok(());
        }

        let mode = StorageMode::for_device(device);
        let buffers = TriangleBuffers {
            indices: device.create_buffer_from(&self.indices, mode, "triangle_indices")?,
            positions: device.create_buffer_from(&self.positions, mode, "triangle_positions")?,
            normals: device.create_buffer_from(&self.normals, mode, "triangle_normals")?,
            colors: device.create_buffer_from(&self.colors, mode, "triangle_colors")?,
            triangle_count: self.triangle_count(),
        };
        self.buffers = Some(buffers);
        self.dirty = false;
        Ok(())
    }

    pub fn geometry_descriptor(&self) -> Result<GeometryDescriptor<'_, D::Buffer>> {
        if self.dirty {
            return Err(Error::invalid_state("triangle geometry has primitives that were not uploaded"));
        }
        let buffers = self.buffers.as_ref();
        Ok(GeometryDescriptor::Triangles(TriangleDescriptor {
            vertex_buffer: buffers.map(|b| &b.positions),
            vertex_stride: std::mem::size_of::<Vec3>(),
            index_buffer: buffers.map(|b| &b.indices),
            index_type: IndexType::U32,
            triangle_count: buffers.map_or(0, |b| b.triangle_count),
        }))
    }

    /// `[indices, normals, colors]`, the order the shading code binds them in.
    pub fn resources(&self) -> Result<Vec<&D::Buffer>> {
        match (&self.buffers, self.dirty) {
            (Some(b), false) => Ok(vec![&b.indices, &b.normals, &b.colors]),
            _ => Err(Error::invalid_state("triangle geometry is not uploaded")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;
    use crate::device::DeviceBuffer;
    use approx::assert_relative_eq;

    type Tris = TriangleGeometry<SoftwareDevice>;

    #[test]
    fn test_cube_face_selection() {
        let mut g = Tris::new();
        g.add_cube(FaceMask::ALL, Vec3::ONE, Mat4::IDENTITY, false);
        assert_eq!(g.triangle_count(), 12);
        assert_eq!(g.positions().len(), 24);

        let mut g = Tris::new();
        g.add_cube(FaceMask::NEGATIVE_Y | FaceMask::POSITIVE_Y | FaceMask::NEGATIVE_Z, Vec3::ONE, Mat4::IDENTITY, true);
        assert_eq!(g.triangle_count(), 6);
        assert_eq!(g.colors().len(), 12);
    }

    #[test]
    fn test_cube_normals_point_outward() {
        let mut g = Tris::new();
        g.add_cube(FaceMask::POSITIVE_X, Vec3::ONE, Mat4::IDENTITY, false);
        for n in g.normals() {
            assert_relative_eq!(n.x, 1.0, epsilon = 1e-6);
        }

        let mut g = Tris::new();
        g.add_cube(FaceMask::POSITIVE_X, Vec3::ONE, Mat4::IDENTITY, true);
        for n in g.normals() {
            assert_relative_eq!(n.x, -1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_cube_transform_applied() {
        let mut g = Tris::new();
        let m = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0));
        g.add_cube(FaceMask::ALL, Vec3::ONE, m, false);
        let max_y = g.positions().iter().map(|p| p.y).fold(f32::MIN, f32::max);
        let min_y = g.positions().iter().map(|p| p.y).fold(f32::MAX, f32::min);
        assert_relative_eq!(max_y, 2.0);
        assert_relative_eq!(min_y, 0.0);
    }

    #[test]
    fn test_descriptor_requires_upload() {
        let device = SoftwareDevice::new();
        let mut g = Tris::new();
        g.add_cube(FaceMask::ALL, Vec3::ONE, Mat4::IDENTITY, false);
        assert!(matches!(g.geometry_descriptor(), Err(Error::InvalidState(_))));
        assert!(g.resources().is_err());

        g.upload_to_buffers(&device).unwrap();
        let desc = g.geometry_descriptor().unwrap();
        assert_eq!(desc.primitive_count(), 12);
        assert!(desc.intersection_function_name().is_none());

        let res = g.resources().unwrap();
        assert_eq!(res.len(), 3);
        assert_eq!(res[0].len(), 36 * 4);
        assert_eq!(res[1].label(), "triangle_normals");
    }

    #[test]
    fn test_upload_is_idempotent_and_regrows() {
        let device = SoftwareDevice::new();
        let mut g = Tris::new();
        g.add_cube(FaceMask::ALL, Vec3::ONE, Mat4::IDENTITY, false);
        g.upload_to_buffers(&device).unwrap();
        let allocations = device.memory_stats().allocations;

        g.upload_to_buffers(&device).unwrap();
        assert_eq!(device.memory_stats().allocations, allocations);

        g.add_cube(FaceMask::POSITIVE_Y, Vec3::ONE, Mat4::IDENTITY, false);
        g.upload_to_buffers(&device).unwrap();
        assert_eq!(g.geometry_descriptor().unwrap().primitive_count(), 14);
    }

    #[test]
    fn test_clear_reports_zero_primitives() {
        let device = SoftwareDevice::new();
        let mut g = Tris::new();
        g.add_cube(FaceMask::ALL, Vec3::ONE, Mat4::IDENTITY, false);
        g.upload_to_buffers(&device).unwrap();
        g.clear();
        assert_eq!(g.geometry_descriptor().unwrap().primitive_count(), 0);
        assert_eq!(device.memory_stats().allocated, 0);
    }
}
