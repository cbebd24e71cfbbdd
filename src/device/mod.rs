//! Device and resource layer.
//!
//! The scene core talks to memory and acceleration structure builds only
//! through the [`Device`] trait:
//!
//! ```text
//! create_buffer / create_empty_buffer   -> Buffer
//! build_acceleration_structure(desc)    -> AccelerationStructure
//! query_sizes(structure)                -> {size, scratch, compacted}
//! compact(structure, tight_buffer)      -> AccelerationStructure
//! ```
//!
//! [`software::SoftwareDevice`] is a complete CPU implementation used by the
//! CLI and the tests. With the `gpu` feature, `gpu::WgpuDevice` mirrors
//! every buffer and structure into wgpu storage buffers.

mod descriptor;
pub mod software;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use descriptor::*;

use crate::util::Result;

/// Storage class of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageMode {
    /// CPU-writable, GPU-readable.
    Shared,
    /// GPU-private; filled through a staging copy.
    Private,
}

impl StorageMode {
    /// Storage class for buffers the CPU fills once per upload.
    ///
    /// Unified-memory devices read shared memory directly, discrete devices
    /// need the data in private memory.
    pub fn for_device<D: Device>(device: &D) -> Self {
        if device.has_unified_memory() {
            StorageMode::Shared
        } else {
            StorageMode::Private
        }
    }
}

/// A device-resident buffer.
pub trait DeviceBuffer {
    /// Length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn storage_mode(&self) -> StorageMode;

    fn label(&self) -> &str;
}

/// Buffer allocation and acceleration structure build primitives.
pub trait Device {
    type Buffer: DeviceBuffer;
    type AccelerationStructure: Clone;

    /// Human readable device name.
    fn name(&self) -> &str;

    /// Whether CPU and GPU share one memory pool.
    fn has_unified_memory(&self) -> bool;

    /// Allocate a buffer initialized with `contents`.
    fn create_buffer(&self, contents: &[u8], mode: StorageMode, label: &str) -> Result<Self::Buffer>;

    /// Allocate a zero-filled buffer of `len` bytes.
    fn create_empty_buffer(&self, len: usize, mode: StorageMode, label: &str) -> Result<Self::Buffer>;

    /// Build a (non-compacted) acceleration structure.
    fn build_acceleration_structure(
        &self,
        descriptor: &AccelerationStructureDescriptor<'_, Self::Buffer, Self::AccelerationStructure>,
        label: &str,
    ) -> Result<Self::AccelerationStructure>;

    fn query_sizes(&self, structure: &Self::AccelerationStructure) -> AccelerationStructureSizes;

    /// Copy `structure` into `target`, which must hold at least the
    /// compacted size. The returned structure owns `target`.
    fn compact(
        &self,
        structure: &Self::AccelerationStructure,
        target: Self::Buffer,
    ) -> Result<Self::AccelerationStructure>;

    /// Allocate a buffer from a slice of plain-old-data records.
    fn create_buffer_from<T: bytemuck::Pod>(
        &self,
        data: &[T],
        mode: StorageMode,
        label: &str,
    ) -> Result<Self::Buffer>
    where
        Self: Sized,
    {
        self.create_buffer(bytemuck::cast_slice(data), mode, label)
    }
}
