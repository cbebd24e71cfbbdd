//! Acceleration structure build inputs.
//!
//! Descriptors borrow device buffers owned elsewhere (geometry stores, the
//! structure manager); they live only for the duration of one build call.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

/// Element type of a triangle index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U32,
}

/// Triangle geometry input: built-in triangle intersection.
#[derive(Debug)]
pub struct TriangleDescriptor<'a, B> {
    /// Packed float3 positions. `None` when the geometry holds no triangles.
    pub vertex_buffer: Option<&'a B>,
    pub vertex_stride: usize,
    pub index_buffer: Option<&'a B>,
    pub index_type: IndexType,
    pub triangle_count: usize,
}

/// Custom primitive input: one bounding box per primitive plus the name of
/// the intersection function that performs the real hit test.
#[derive(Debug)]
pub struct BoundingBoxDescriptor<'a, B> {
    pub bounding_box_buffer: Option<&'a B>,
    pub bounding_box_stride: usize,
    pub bounding_box_count: usize,
    pub intersection_function_name: &'a str,
}

/// Input for one bottom-level acceleration structure.
#[derive(Debug)]
pub enum GeometryDescriptor<'a, B> {
    Triangles(TriangleDescriptor<'a, B>),
    BoundingBoxes(BoundingBoxDescriptor<'a, B>),
}

impl<'a, B> GeometryDescriptor<'a, B> {
    /// Number of primitives (triangles or boxes) the descriptor covers.
    pub fn primitive_count(&self) -> usize {
        match self {
            GeometryDescriptor::Triangles(t) => t.triangle_count,
            GeometryDescriptor::BoundingBoxes(b) => b.bounding_box_count,
        }
    }

    /// Intersection function to resolve at pipeline build time, `None` for triangles.
    pub fn intersection_function_name(&self) -> Option<&'a str> {
        match self {
            GeometryDescriptor::Triangles(_) => None,
            GeometryDescriptor::BoundingBoxes(b) => Some(b.intersection_function_name),
        }
    }
}

bitflags! {
    /// Per-instance build options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InstanceOptions: u32 {
        /// Geometry has no intersection function; hits are always accepted.
        const OPAQUE = 1 << 0;
    }
}

/// One top-level entry (64 bytes, matches the device instance record).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceDescriptor {
    /// Object-to-world transform, column-major packed 4x3.
    pub transform: [[f32; 3]; 4],
    /// [`InstanceOptions`] bits.
    pub options: u32,
    pub mask: u32,
    pub intersection_function_table_offset: u32,
    /// Index into the instanced structure list (bottom-level index).
    pub acceleration_structure_index: u32,
}

impl InstanceDescriptor {
    pub fn options(&self) -> InstanceOptions {
        InstanceOptions::from_bits_truncate(self.options)
    }
}

/// Input for the top-level (instance) acceleration structure.
#[derive(Debug)]
pub struct InstanceStructureDescriptor<'a, B, A> {
    /// Bottom-level structures, indexed by `acceleration_structure_index`.
    pub instanced_structures: &'a [A],
    /// Buffer of [`InstanceDescriptor`] records.
    pub instance_buffer: &'a B,
    pub instance_count: usize,
}

/// Everything a device needs to build one acceleration structure.
#[derive(Debug)]
pub enum AccelerationStructureDescriptor<'a, B, A> {
    Primitive(GeometryDescriptor<'a, B>),
    Instance(InstanceStructureDescriptor<'a, B, A>),
}

/// Sizes reported for a built structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccelerationStructureSizes {
    /// Bytes currently occupied by the structure.
    pub acceleration_structure_size: u64,
    /// Temporary memory the build needed.
    pub build_scratch_size: u64,
    /// Bytes needed after compaction.
    pub compacted_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_descriptor_layout() {
        assert_eq!(std::mem::size_of::<InstanceDescriptor>(), 64);
    }

    #[test]
    fn test_descriptor_function_name() {
        let tri: GeometryDescriptor<'_, ()> = GeometryDescriptor::Triangles(TriangleDescriptor {
            vertex_buffer: None,
            vertex_stride: 12,
            index_buffer: None,
            index_type: IndexType::U32,
            triangle_count: 0,
        });
        assert_eq!(tri.intersection_function_name(), None);
        assert_eq!(tri.primitive_count(), 0);
    }
}
