//! Area lights and their device packing.

use bytemuck::{Pod, Zeroable};

use crate::util::Vec3;

/// Rectangular light: centered at `position`, emitting along `forward`,
/// spanning `right` and `up` (half extents).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaLight {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub color: Vec3,
}

impl AreaLight {
    pub fn to_gpu(&self) -> GpuAreaLight {
        GpuAreaLight {
            position: self.position.to_array(),
            _pad0: 0.0,
            forward: self.forward.to_array(),
            _pad1: 0.0,
            right: self.right.to_array(),
            _pad2: 0.0,
            up: self.up.to_array(),
            _pad3: 0.0,
            color: self.color.to_array(),
            _pad4: 0.0,
        }
    }
}

/// Device light record (80 bytes, float3 fields padded to 16).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuAreaLight {
    pub position: [f32; 3],
    _pad0: f32,
    pub forward: [f32; 3],
    _pad1: f32,
    pub right: [f32; 3],
    _pad2: f32,
    pub up: [f32; 3],
    _pad3: f32,
    pub color: [f32; 3],
    _pad4: f32,
}

/// Bytes one light occupies in the light buffer.
pub const AREA_LIGHT_SIZE: usize = std::mem::size_of::<GpuAreaLight>();
