//! CPU reference device.
//!
//! Buffers are word-aligned host allocations charged against an optional
//! memory budget. Acceleration structures are SAH BVHs serialized in the
//! [`layout`](crate::accel::layout) format, so size queries and compaction
//! behave like they do on hardware: a fresh build reserves worst-case node
//! storage, compaction copies the used part into a tight buffer.

use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::Mutex;

use super::{
    AccelerationStructureDescriptor, AccelerationStructureSizes, BoundingBoxDescriptor, Device,
    DeviceBuffer, GeometryDescriptor, InstanceDescriptor, InstanceStructureDescriptor, StorageMode,
    TriangleDescriptor,
};
use crate::accel::build::{build_bvh, scratch_size};
use crate::accel::bvh::Bvh;
use crate::accel::layout::{
    self, BoxRecord, InstanceRecord, StructureKind, StructureView, TriangleRecord,
};
use crate::util::{pack_affine, unpack_affine, BoundingBox, Error, Result, Vec3};

/// Allocation statistics of a [`SoftwareDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes currently allocated.
    pub allocated: u64,
    /// High-water mark.
    pub peak: u64,
    /// Number of successful allocations.
    pub allocations: u64,
    /// Number of rejected allocations.
    pub failures: u64,
}

#[derive(Debug)]
struct MemoryTracker {
    budget: Option<u64>,
    stats: Mutex<MemoryStats>,
}

impl MemoryTracker {
    fn reserve(self: &Arc<Self>, bytes: u64, label: &str) -> Result<Lease> {
        let mut stats = self.stats.lock();
        if let Some(budget) = self.budget {
            let available = budget.saturating_sub(stats.allocated);
            if bytes > available {
                stats.failures += 1;
                tracing::warn!(label, requested = bytes, available, "device allocation failed");
                return Err(Error::AllocationFailure {
                    label: label.to_string(),
                    requested: bytes,
                    available,
                });
            }
        }
        stats.allocated += bytes;
        stats.peak = stats.peak.max(stats.allocated);
        stats.allocations += 1;
        Ok(Lease {
            tracker: Arc::clone(self),
            bytes,
        })
    }
}

/// Memory charged to the budget until dropped.
#[derive(Debug)]
struct Lease {
    tracker: Arc<MemoryTracker>,
    bytes: u64,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut stats = self.tracker.stats.lock();
        stats.allocated = stats.allocated.saturating_sub(self.bytes);
    }
}

/// Host-memory device buffer.
#[derive(Debug)]
pub struct SoftwareBuffer {
    words: Vec<u32>,
    len: usize,
    mode: StorageMode,
    label: String,
    _lease: Lease,
}

impl SoftwareBuffer {
    /// Raw contents.
    pub fn contents(&self) -> &[u8] {
        &bytemuck::cast_slice::<u32, u8>(&self.words)[..self.len]
    }

    fn contents_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u32, u8>(&mut self.words)[..self.len]
    }

    /// Contents as a slice of records.
    pub fn as_slice<T: Pod>(&self) -> Result<&[T]> {
        bytemuck::try_cast_slice(self.contents()).map_err(|e| {
            Error::invalid_state(format!("buffer '{}' is not a {} array: {e}", self.label, std::any::type_name::<T>()))
        })
    }
}

impl DeviceBuffer for SoftwareBuffer {
    fn len(&self) -> usize {
        self.len
    }

    fn storage_mode(&self) -> StorageMode {
        self.mode
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug)]
struct StructureStorage {
    buffer: SoftwareBuffer,
    kind: StructureKind,
    compacted: bool,
    scratch_size: u64,
    /// Bottom-level structures referenced by an instance structure.
    instanced: Vec<SoftwareAccelerationStructure>,
}

/// Built acceleration structure. Cloning shares the same storage, which is
/// how an instance structure keeps its bottom-level structures alive.
#[derive(Debug, Clone)]
pub struct SoftwareAccelerationStructure {
    storage: Arc<StructureStorage>,
}

impl SoftwareAccelerationStructure {
    pub fn view(&self) -> Result<StructureView<'_>> {
        StructureView::parse(self.storage.buffer.contents())
    }

    pub fn kind(&self) -> StructureKind {
        self.storage.kind
    }

    pub fn is_compacted(&self) -> bool {
        self.storage.compacted
    }

    /// Serialized structure bytes.
    pub fn contents(&self) -> &[u8] {
        self.storage.buffer.contents()
    }

    /// Bytes occupied by the structure.
    pub fn size(&self) -> usize {
        self.storage.buffer.len()
    }

    pub fn label(&self) -> &str {
        self.storage.buffer.label()
    }

    /// Primitive (or instance) count.
    pub fn primitive_count(&self) -> usize {
        self.view().map_or(0, |v| v.primitive_count())
    }

    /// Bottom-level structures an instance structure references.
    pub fn instanced_structures(&self) -> &[SoftwareAccelerationStructure] {
        &self.storage.instanced
    }

    /// Bounds of all primitives in structure space.
    pub fn bounds(&self) -> BoundingBox {
        match self.view() {
            Ok(view) if view.primitive_count() > 0 => {
                view.nodes().first().map_or(BoundingBox::EMPTY, |n| n.bounds())
            }
            _ => BoundingBox::EMPTY,
        }
    }
}

/// CPU implementation of [`Device`].
#[derive(Debug, Clone)]
pub struct SoftwareDevice {
    name: String,
    unified_memory: bool,
    tracker: Arc<MemoryTracker>,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    /// Unified-memory device without a memory budget.
    pub fn new() -> Self {
        Self::with_budget(None)
    }

    /// Device that fails allocations once `budget` bytes are in use.
    pub fn with_budget(budget: Option<u64>) -> Self {
        Self {
            name: "software".to_string(),
            unified_memory: true,
            tracker: Arc::new(MemoryTracker {
                budget,
                stats: Mutex::new(MemoryStats::default()),
            }),
        }
    }

    /// Report a discrete memory configuration (buffers default to private storage).
    pub fn with_unified_memory(mut self, unified: bool) -> Self {
        self.unified_memory = unified;
        self
    }

    pub fn memory_stats(&self) -> MemoryStats {
        *self.tracker.stats.lock()
    }

    pub fn memory_budget(&self) -> Option<u64> {
        self.tracker.budget
    }

    fn allocate(&self, words: Vec<u32>, len: usize, mode: StorageMode, label: &str) -> Result<SoftwareBuffer> {
        let lease = self.tracker.reserve(len as u64, label)?;
        Ok(SoftwareBuffer {
            words,
            len,
            mode,
            label: label.to_string(),
            _lease: lease,
        })
    }

    fn store(
        &self,
        words: Vec<u32>,
        kind: StructureKind,
        scratch_size: u64,
        instanced: Vec<SoftwareAccelerationStructure>,
        label: &str,
    ) -> Result<SoftwareAccelerationStructure> {
        let len = words.len() * 4;
        let buffer = self.allocate(words, len, StorageMode::Private, label)?;
        Ok(SoftwareAccelerationStructure {
            storage: Arc::new(StructureStorage {
                buffer,
                kind,
                compacted: false,
                scratch_size,
                instanced,
            }),
        })
    }

    fn build_triangles(
        &self,
        desc: &TriangleDescriptor<'_, SoftwareBuffer>,
        label: &str,
    ) -> Result<SoftwareAccelerationStructure> {
        let count = desc.triangle_count;
        let mut triangles = Vec::with_capacity(count);
        if count > 0 {
            let (vertices, indices) = match (desc.vertex_buffer, desc.index_buffer) {
                (Some(v), Some(i)) => (v, i.as_slice::<u32>()?),
                _ => return Err(Error::build_failure(format!("'{label}': triangle buffers missing"))),
            };
            if desc.vertex_stride < 12 {
                return Err(Error::build_failure(format!("'{label}': vertex stride {} too small", desc.vertex_stride)));
            }
            if indices.len() < count * 3 {
                return Err(Error::build_failure(format!(
                    "'{label}': {} indices for {count} triangles",
                    indices.len()
                )));
            }
            let bytes = vertices.contents();
            let vertex_count = bytes.len() / desc.vertex_stride;
            let position = |i: u32| -> Result<[f32; 3]> {
                let i = i as usize;
                if i >= vertex_count {
                    return Err(Error::build_failure(format!("'{label}': index {i} out of {vertex_count} vertices")));
                }
                let start = i * desc.vertex_stride;
                Ok(bytemuck::pod_read_unaligned(&bytes[start..start + 12]))
            };
            for tri in indices[..count * 3].chunks_exact(3) {
                triangles.push([position(tri[0])?, position(tri[1])?, position(tri[2])?]);
            }
        }

        let bounds: Vec<BoundingBox> = triangles
            .iter()
            .map(|t| {
                let mut b = BoundingBox::EMPTY;
                for v in t {
                    b.expand_by_point(Vec3::from(*v));
                }
                b
            })
            .collect();

        let scratch = scratch_size(count);
        let _scratch = self.tracker.reserve(scratch, "bvh_scratch")?;
        let bvh = build_bvh(&bounds);
        let records: Vec<TriangleRecord> = bvh
            .prim_indices
            .iter()
            .map(|&i| {
                let [v0, v1, v2] = triangles[i as usize];
                TriangleRecord {
                    v0,
                    primitive_id: i,
                    v1,
                    _pad0: 0,
                    v2,
                    _pad1: 0,
                }
            })
            .collect();

        let words = layout::serialize(StructureKind::Triangles, &bvh.nodes, Bvh::node_capacity(count), &records);
        self.store(words, StructureKind::Triangles, scratch, Vec::new(), label)
    }

    fn build_boxes(
        &self,
        desc: &BoundingBoxDescriptor<'_, SoftwareBuffer>,
        label: &str,
    ) -> Result<SoftwareAccelerationStructure> {
        let count = desc.bounding_box_count;
        let mut bounds = Vec::with_capacity(count);
        if count > 0 {
            let buffer = desc
                .bounding_box_buffer
                .ok_or_else(|| Error::build_failure(format!("'{label}': bounding box buffer missing")))?;
            let stride = desc.bounding_box_stride;
            let bytes = buffer.contents();
            if stride < std::mem::size_of::<BoundingBox>() || bytes.len() < (count - 1) * stride + 24 {
                return Err(Error::build_failure(format!(
                    "'{label}': {} bytes cannot hold {count} boxes at stride {stride}",
                    bytes.len()
                )));
            }
            for i in 0..count {
                let start = i * stride;
                bounds.push(bytemuck::pod_read_unaligned::<BoundingBox>(&bytes[start..start + 24]));
            }
        }

        let scratch = scratch_size(count);
        let _scratch = self.tracker.reserve(scratch, "bvh_scratch")?;
        let bvh = build_bvh(&bounds);
        let records: Vec<BoxRecord> = bvh
            .prim_indices
            .iter()
            .map(|&i| {
                let b = bounds[i as usize];
                BoxRecord {
                    min: b.min.to_array(),
                    primitive_id: i,
                    max: b.max.to_array(),
                    _pad: 0,
                }
            })
            .collect();

        let words = layout::serialize(StructureKind::BoundingBoxes, &bvh.nodes, Bvh::node_capacity(count), &records);
        self.store(words, StructureKind::BoundingBoxes, scratch, Vec::new(), label)
    }

    fn build_instances(
        &self,
        desc: &InstanceStructureDescriptor<'_, SoftwareBuffer, SoftwareAccelerationStructure>,
        label: &str,
    ) -> Result<SoftwareAccelerationStructure> {
        let all = desc.instance_buffer.as_slice::<InstanceDescriptor>()?;
        if all.len() < desc.instance_count {
            return Err(Error::build_failure(format!(
                "'{label}': instance buffer holds {} of {} instances",
                all.len(),
                desc.instance_count
            )));
        }
        let instances = &all[..desc.instance_count];

        let mut bounds = Vec::with_capacity(instances.len());
        let mut transforms = Vec::with_capacity(instances.len());
        for (i, inst) in instances.iter().enumerate() {
            let blas = desc
                .instanced_structures
                .get(inst.acceleration_structure_index as usize)
                .ok_or_else(|| {
                    Error::build_failure(format!(
                        "'{label}': instance {i} references structure {} of {}",
                        inst.acceleration_structure_index,
                        desc.instanced_structures.len()
                    ))
                })?;
            let object_to_world = unpack_affine(&inst.transform);
            bounds.push(blas.bounds().transformed(&object_to_world));
            transforms.push(object_to_world);
        }

        let scratch = scratch_size(instances.len());
        let _scratch = self.tracker.reserve(scratch, "bvh_scratch")?;
        let bvh = build_bvh(&bounds);
        let records: Vec<InstanceRecord> = bvh
            .prim_indices
            .iter()
            .map(|&i| {
                let inst = &instances[i as usize];
                let object_to_world = transforms[i as usize];
                InstanceRecord {
                    world_to_object: pack_affine(&object_to_world.inverse()),
                    object_to_world: pack_affine(&object_to_world),
                    mask: inst.mask,
                    instance_id: i,
                    structure_index: inst.acceleration_structure_index,
                    function_table_offset: inst.intersection_function_table_offset,
                    options: inst.options,
                    _pad: [0; 3],
                }
            })
            .collect();

        let words = layout::serialize(StructureKind::Instances, &bvh.nodes, Bvh::node_capacity(instances.len()), &records);
        self.store(
            words,
            StructureKind::Instances,
            scratch,
            desc.instanced_structures.to_vec(),
            label,
        )
    }
}

impl Device for SoftwareDevice {
    type Buffer = SoftwareBuffer;
    type AccelerationStructure = SoftwareAccelerationStructure;

    fn name(&self) -> &str {
        &self.name
    }

    fn has_unified_memory(&self) -> bool {
        self.unified_memory
    }

    fn create_buffer(&self, contents: &[u8], mode: StorageMode, label: &str) -> Result<SoftwareBuffer> {
        // Zero-pads the tail word.
        let words: Vec<u32> = bytemuck::allocation::pod_collect_to_vec(contents);
        self.allocate(words, contents.len(), mode, label)
    }

    fn create_empty_buffer(&self, len: usize, mode: StorageMode, label: &str) -> Result<SoftwareBuffer> {
        self.allocate(vec![0u32; len.div_ceil(4)], len, mode, label)
    }

    #[tracing::instrument(skip_all, fields(label = %label))]
    fn build_acceleration_structure(
        &self,
        descriptor: &AccelerationStructureDescriptor<'_, SoftwareBuffer, SoftwareAccelerationStructure>,
        label: &str,
    ) -> Result<SoftwareAccelerationStructure> {
        match descriptor {
            AccelerationStructureDescriptor::Primitive(GeometryDescriptor::Triangles(t)) => {
                self.build_triangles(t, label)
            }
            AccelerationStructureDescriptor::Primitive(GeometryDescriptor::BoundingBoxes(b)) => {
                self.build_boxes(b, label)
            }
            AccelerationStructureDescriptor::Instance(i) => self.build_instances(i, label),
        }
    }

    fn query_sizes(&self, structure: &SoftwareAccelerationStructure) -> AccelerationStructureSizes {
        let compacted_size = structure
            .view()
            .map_or(structure.size(), |v| v.compacted_size());
        AccelerationStructureSizes {
            acceleration_structure_size: structure.size() as u64,
            build_scratch_size: structure.storage.scratch_size,
            compacted_size: compacted_size as u64,
        }
    }

    fn compact(
        &self,
        structure: &SoftwareAccelerationStructure,
        mut target: SoftwareBuffer,
    ) -> Result<SoftwareAccelerationStructure> {
        let view = structure.view()?;
        view.compact_into(target.contents_mut())?;
        Ok(SoftwareAccelerationStructure {
            storage: Arc::new(StructureStorage {
                buffer: target,
                kind: structure.kind(),
                compacted: true,
                scratch_size: structure.storage.scratch_size,
                instanced: structure.storage.instanced.clone(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::IndexType;

    fn box_buffer(device: &SoftwareDevice, boxes: &[BoundingBox]) -> SoftwareBuffer {
        device
            .create_buffer_from(boxes, StorageMode::Shared, "boxes")
            .unwrap()
    }

    #[test]
    fn test_buffer_contents_and_padding() {
        let device = SoftwareDevice::new();
        let buf = device.create_buffer(&[1, 2, 3, 4, 5], StorageMode::Shared, "bytes").unwrap();
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.contents(), &[1, 2, 3, 4, 5]);
        assert_eq!(device.memory_stats().allocated, 5);
        drop(buf);
        assert_eq!(device.memory_stats().allocated, 0);
        assert_eq!(device.memory_stats().peak, 5);
    }

    #[test]
    fn test_budget_exhaustion() {
        let device = SoftwareDevice::with_budget(Some(64));
        let _a = device.create_empty_buffer(48, StorageMode::Private, "a").unwrap();
        let err = device.create_empty_buffer(32, StorageMode::Private, "b").unwrap_err();
        assert!(matches!(err, Error::AllocationFailure { requested: 32, available: 16, .. }));
        assert_eq!(device.memory_stats().failures, 1);
    }

    #[test]
    fn test_box_structure_build_and_compact() {
        let device = SoftwareDevice::new();
        let boxes: Vec<BoundingBox> = (0..10)
            .map(|i| BoundingBox::from_sphere(Vec3::new(i as f32 * 3.0, 0.0, 0.0), 1.0))
            .collect();
        let buf = box_buffer(&device, &boxes);
        let desc = AccelerationStructureDescriptor::Primitive(GeometryDescriptor::BoundingBoxes(BoundingBoxDescriptor {
            bounding_box_buffer: Some(&buf),
            bounding_box_stride: 24,
            bounding_box_count: boxes.len(),
            intersection_function_name: "sphereIntersectionFunction",
        }));
        let built = device.build_acceleration_structure(&desc, "spheres").unwrap();
        assert_eq!(built.primitive_count(), 10);
        assert!(!built.is_compacted());

        let sizes = device.query_sizes(&built);
        assert!(sizes.compacted_size < sizes.acceleration_structure_size);
        assert_eq!(sizes.build_scratch_size, scratch_size(10));

        let target = device
            .create_empty_buffer(sizes.compacted_size as usize, StorageMode::Private, "compacted")
            .unwrap();
        let compacted = device.compact(&built, target).unwrap();
        assert!(compacted.is_compacted());
        assert_eq!(compacted.size() as u64, sizes.compacted_size);
        assert_eq!(compacted.bounds(), built.bounds());
        assert_eq!(device.query_sizes(&compacted).compacted_size, sizes.compacted_size);
    }

    #[test]
    fn test_triangle_index_out_of_range() {
        let device = SoftwareDevice::new();
        let verts = device
            .create_buffer_from(&[[0.0f32; 3]; 3], StorageMode::Shared, "verts")
            .unwrap();
        let idx = device.create_buffer_from(&[0u32, 1, 7], StorageMode::Shared, "idx").unwrap();
        let desc = AccelerationStructureDescriptor::Primitive(GeometryDescriptor::Triangles(TriangleDescriptor {
            vertex_buffer: Some(&verts),
            vertex_stride: 12,
            index_buffer: Some(&idx),
            index_type: IndexType::U32,
            triangle_count: 1,
        }));
        let err = device.build_acceleration_structure(&desc, "bad").unwrap_err();
        assert!(matches!(err, Error::BuildFailure(_)));
    }

    #[test]
    fn test_compact_into_small_target_fails() {
        let device = SoftwareDevice::new();
        let desc = AccelerationStructureDescriptor::Primitive(GeometryDescriptor::BoundingBoxes(BoundingBoxDescriptor {
            bounding_box_buffer: None,
            bounding_box_stride: 24,
            bounding_box_count: 0,
            intersection_function_name: "f",
        }));
        let built = device.build_acceleration_structure(&desc, "empty").unwrap();
        let target = device.create_empty_buffer(4, StorageMode::Private, "tiny").unwrap();
        assert!(device.compact(&built, target).is_err());
    }
}
