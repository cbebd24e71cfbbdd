//! wgpu-backed device.
//!
//! Every buffer is a wgpu storage buffer plus a host shadow copy. Structures
//! are built on the host in the software layout and uploaded; compaction
//! copies the used nodes and the records into the tight target with GPU
//! buffer copies.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::software::{SoftwareAccelerationStructure, SoftwareBuffer, SoftwareDevice};
use super::{
    AccelerationStructureDescriptor, AccelerationStructureSizes, BoundingBoxDescriptor, Device,
    DeviceBuffer, GeometryDescriptor, InstanceStructureDescriptor, StorageMode, TriangleDescriptor,
};
use crate::accel::bvh::BvhNode;
use crate::accel::layout::StructureHeader;
use crate::util::{Error, Result};

const HEADER_SIZE: usize = std::mem::size_of::<StructureHeader>();
const NODE_SIZE: usize = std::mem::size_of::<BvhNode>();

const BUFFER_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// wgpu storage buffer with its host shadow.
#[derive(Debug)]
pub struct WgpuBuffer {
    shadow: SoftwareBuffer,
    buffer: wgpu::Buffer,
}

impl WgpuBuffer {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn shadow(&self) -> &SoftwareBuffer {
        &self.shadow
    }
}

impl DeviceBuffer for WgpuBuffer {
    fn len(&self) -> usize {
        self.shadow.len()
    }

    fn storage_mode(&self) -> StorageMode {
        self.shadow.storage_mode()
    }

    fn label(&self) -> &str {
        self.shadow.label()
    }
}

/// Structure resident in a wgpu buffer, with the host copy used to build it.
#[derive(Debug, Clone)]
pub struct WgpuAccelerationStructure {
    host: SoftwareAccelerationStructure,
    buffer: Arc<wgpu::Buffer>,
}

impl WgpuAccelerationStructure {
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Host copy, usable with [`crate::accel::trace`].
    pub fn host(&self) -> &SoftwareAccelerationStructure {
        &self.host
    }
}

/// [`Device`] on top of a wgpu device and queue.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    name: String,
    unified_memory: bool,
    max_buffer_size: u64,
    host: SoftwareDevice,
}

impl WgpuDevice {
    /// Integrated and CPU adapters are treated as unified memory.
    pub fn new(adapter: &wgpu::Adapter, device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let info = adapter.get_info();
        let unified_memory = matches!(info.device_type, wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::Cpu);
        let max_buffer_size = device.limits().max_buffer_size;
        tracing::debug!(name = %info.name, backend = ?info.backend, unified_memory, max_buffer_size, "wgpu device");
        Self {
            device,
            queue,
            name: info.name,
            unified_memory,
            max_buffer_size,
            host: SoftwareDevice::new().with_unified_memory(unified_memory),
        }
    }

    /// Charge host shadows against `budget` bytes.
    pub fn with_budget(mut self, budget: Option<u64>) -> Self {
        self.host = SoftwareDevice::with_budget(budget).with_unified_memory(self.unified_memory);
        self
    }

    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn check_size(&self, len: usize, label: &str) -> Result<()> {
        if len as u64 > self.max_buffer_size {
            tracing::warn!(label, len, max = self.max_buffer_size, "buffer exceeds device limit");
            return Err(Error::AllocationFailure {
                label: label.to_string(),
                requested: len as u64,
                available: self.max_buffer_size,
            });
        }
        Ok(())
    }

    fn upload(&self, contents: &[u8], label: &str) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: BUFFER_USAGE,
        })
    }

    fn wrap(&self, host: SoftwareAccelerationStructure) -> Result<WgpuAccelerationStructure> {
        self.check_size(host.size(), host.label())?;
        let buffer = self.upload(host.contents(), host.label());
        Ok(WgpuAccelerationStructure {
            host,
            buffer: Arc::new(buffer),
        })
    }
}

/// Same descriptor, pointing at the host shadows.
fn host_geometry<'a>(desc: &GeometryDescriptor<'a, WgpuBuffer>) -> GeometryDescriptor<'a, SoftwareBuffer> {
    match desc {
        GeometryDescriptor::Triangles(t) => GeometryDescriptor::Triangles(TriangleDescriptor {
            vertex_buffer: t.vertex_buffer.map(WgpuBuffer::shadow),
            vertex_stride: t.vertex_stride,
            index_buffer: t.index_buffer.map(WgpuBuffer::shadow),
            index_type: t.index_type,
            triangle_count: t.triangle_count,
        }),
        GeometryDescriptor::BoundingBoxes(b) => GeometryDescriptor::BoundingBoxes(BoundingBoxDescriptor {
            bounding_box_buffer: b.bounding_box_buffer.map(WgpuBuffer::shadow),
            bounding_box_stride: b.bounding_box_stride,
            bounding_box_count: b.bounding_box_count,
            intersection_function_name: b.intersection_function_name,
        }),
    }
}

impl Device for WgpuDevice {
    type Buffer = WgpuBuffer;
    type AccelerationStructure = WgpuAccelerationStructure;

    fn name(&self) -> &str {
        &self.name
    }

    fn has_unified_memory(&self) -> bool {
        self.unified_memory
    }

    fn create_buffer(&self, contents: &[u8], mode: StorageMode, label: &str) -> Result<WgpuBuffer> {
        self.check_size(contents.len(), label)?;
        let shadow = self.host.create_buffer(contents, mode, label)?;
        let buffer = self.upload(contents, label);
        Ok(WgpuBuffer { shadow, buffer })
    }

    fn create_empty_buffer(&self, len: usize, mode: StorageMode, label: &str) -> Result<WgpuBuffer> {
        self.check_size(len, label)?;
        let shadow = self.host.create_empty_buffer(len, mode, label)?;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (len as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: BUFFER_USAGE,
            mapped_at_creation: false,
        });
        Ok(WgpuBuffer { shadow, buffer })
    }

    #[tracing::instrument(skip_all, fields(label = %label))]
    fn build_acceleration_structure(
        &self,
        descriptor: &AccelerationStructureDescriptor<'_, WgpuBuffer, WgpuAccelerationStructure>,
        label: &str,
    ) -> Result<WgpuAccelerationStructure> {
        let host = match descriptor {
            AccelerationStructureDescriptor::Primitive(g) => {
                let desc = AccelerationStructureDescriptor::Primitive(host_geometry(g));
                self.host.build_acceleration_structure(&desc, label)?
            }
            AccelerationStructureDescriptor::Instance(i) => {
                let instanced: Vec<SoftwareAccelerationStructure> =
                    i.instanced_structures.iter().map(|s| s.host.clone()).collect();
                let desc = AccelerationStructureDescriptor::Instance(InstanceStructureDescriptor {
                    instanced_structures: &instanced,
                    instance_buffer: &i.instance_buffer.shadow,
                    instance_count: i.instance_count,
                });
                self.host.build_acceleration_structure(&desc, label)?
            }
        };
        self.wrap(host)
    }

    fn query_sizes(&self, structure: &WgpuAccelerationStructure) -> AccelerationStructureSizes {
        self.host.query_sizes(&structure.host)
    }

    fn compact(
        &self,
        structure: &WgpuAccelerationStructure,
        target: WgpuBuffer,
    ) -> Result<WgpuAccelerationStructure> {
        let WgpuBuffer { shadow, buffer } = target;
        let view = structure.host.view()?;
        let header = HEADER_SIZE as u64;
        let nodes = (view.nodes().len() * NODE_SIZE) as u64;
        let records = (view.primitive_count() * view.kind.record_size()) as u64;
        let records_src = header + view.header.node_capacity as u64 * NODE_SIZE as u64;

        let host = self.host.compact(&structure.host, shadow)?;

        // Header goes through the queue, nodes and records through the encoder;
        // the ranges do not overlap.
        self.queue.write_buffer(&buffer, 0, &host.contents()[..HEADER_SIZE]);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("compact_acceleration_structure"),
        });
        if nodes > 0 {
            encoder.copy_buffer_to_buffer(&structure.buffer, header, &buffer, header, nodes);
        }
        if records > 0 {
            encoder.copy_buffer_to_buffer(&structure.buffer, records_src, &buffer, header + nodes, records);
        }
        self.queue.submit(Some(encoder.finish()));

        Ok(WgpuAccelerationStructure {
            host,
            buffer: Arc::new(buffer),
        })
    }
}
