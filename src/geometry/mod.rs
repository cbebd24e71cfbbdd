//! Renderable geometry stores.
//!
//! A [`Geometry`] keeps its primitives on the CPU until
//! [`upload_to_buffers`](Geometry::upload_to_buffers) copies them into device
//! buffers. After upload it yields the build input for its bottom-level
//! structure and the buffers its hit shading reads.

mod instance;
mod sphere;
mod triangle;

pub use instance::{GeometryId, GeometryInstance};
pub use sphere::{GpuSphere, Sphere, SphereGeometry, SPHERE_INTERSECTION_FUNCTION};
pub use triangle::{FaceMask, TriangleGeometry};

use std::fmt;

use crate::device::{Device, GeometryDescriptor};
use crate::util::Result;

/// One geometry store: a triangle mesh or a set of spheres.
pub enum Geometry<D: Device> {
    Triangle(TriangleGeometry<D>),
    Sphere(SphereGeometry<D>),
}

impl<D: Device> Geometry<D> {
    /// Empty triangle geometry.
    pub fn triangles() -> Self {
        Geometry::Triangle(TriangleGeometry::new())
    }

    /// Empty sphere geometry.
    pub fn spheres() -> Self {
        Geometry::Sphere(SphereGeometry::new())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Geometry::Triangle(_) => "triangle",
            Geometry::Sphere(_) => "sphere",
        }
    }

    /// CPU-side primitive count (triangles or spheres).
    pub fn primitive_count(&self) -> usize {
        match self {
            Geometry::Triangle(g) => g.triangle_count(),
            Geometry::Sphere(g) => g.sphere_count(),
        }
    }

    /// True if primitives were added since the last upload.
    pub fn is_dirty(&self) -> bool {
        match self {
            Geometry::Triangle(g) => g.is_dirty(),
            Geometry::Sphere(g) => g.is_dirty(),
        }
    }

    /// Name of the custom intersection function, `None` for triangles.
    pub fn intersection_function_name(&self) -> Option<&'static str> {
        match self {
            Geometry::Triangle(_) => None,
            Geometry::Sphere(_) => Some(SPHERE_INTERSECTION_FUNCTION),
        }
    }

    /// Drop all primitives and device buffers.
    pub fn clear(&mut self) {
        match self {
            Geometry::Triangle(g) => g.clear(),
            Geometry::Sphere(g) => g.clear(),
        }
    }

    /// Copy primitives into device buffers. No-op when nothing changed.
    pub fn upload_to_buffers(&mut self, device: &D) -> Result<()> {
        match self {
            Geometry::Triangle(g) => g.upload_to_buffers(device),
            Geometry::Sphere(g) => g.upload_to_buffers(device),
        }
    }

    /// Bottom-level build input. Fails with `InvalidState` while primitives
    /// are pending upload.
    pub fn geometry_descriptor(&self) -> Result<GeometryDescriptor<'_, D::Buffer>> {
        match self {
            Geometry::Triangle(g) => g.geometry_descriptor(),
            Geometry::Sphere(g) => g.geometry_descriptor(),
        }
    }

    /// Buffers bound for hit shading, in binding order.
    pub fn resources(&self) -> Result<Vec<&D::Buffer>> {
        match self {
            Geometry::Triangle(g) => g.resources(),
            Geometry::Sphere(g) => g.resources(),
        }
    }

    pub fn as_triangles_mut(&mut self) -> Option<&mut TriangleGeometry<D>> {
        match self {
            Geometry::Triangle(g) => Some(g),
            Geometry::Sphere(_) => None,
        }
    }

    pub fn as_spheres_mut(&mut self) -> Option<&mut SphereGeometry<D>> {
        match self {
            Geometry::Sphere(g) => Some(g),
            Geometry::Triangle(_) => None,
        }
    }
}

impl<D: Device> From<TriangleGeometry<D>> for Geometry<D> {
    fn from(g: TriangleGeometry<D>) -> Self {
        Geometry::Triangle(g)
    }
}

impl<D: Device> From<SphereGeometry<D>> for Geometry<D> {
    fn from(g: SphereGeometry<D>) -> Self {
        Geometry::Sphere(g)
    }
}

impl<D: Device> fmt::Debug for Geometry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Geometry")
            .field("kind", &self.kind_name())
            .field("primitives", &self.primitive_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
