//! Serialized acceleration structure format.
//!
//! ```text
//! +----------------+------------------------------+----------------------+
//! | header (16 B)  | nodes (node_capacity x 32 B) | records (count x R)  |
//! +----------------+------------------------------+----------------------+
//! ```
//!
//! A fresh build reserves the worst-case node count; compaction rewrites the
//! structure with `node_capacity == node_count`. Records are stored in BVH
//! leaf order so every structure is self-contained.

use bytemuck::{Pod, Zeroable};

use super::bvh::BvhNode;
use crate::util::{Error, Result};

/// What the records of a structure describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureKind {
    Triangles,
    BoundingBoxes,
    Instances,
}

impl StructureKind {
    fn to_raw(self) -> u32 {
        match self {
            StructureKind::Triangles => 0,
            StructureKind::BoundingBoxes => 1,
            StructureKind::Instances => 2,
        }
    }

    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(StructureKind::Triangles),
            1 => Some(StructureKind::BoundingBoxes),
            2 => Some(StructureKind::Instances),
            _ => None,
        }
    }

    /// Size in bytes of one record of this kind.
    pub fn record_size(self) -> usize {
        match self {
            StructureKind::Triangles => std::mem::size_of::<TriangleRecord>(),
            StructureKind::BoundingBoxes => std::mem::size_of::<BoxRecord>(),
            StructureKind::Instances => std::mem::size_of::<InstanceRecord>(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct StructureHeader {
    pub kind: u32,
    pub node_count: u32,
    pub node_capacity: u32,
    pub primitive_count: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<StructureHeader>();
const NODE_SIZE: usize = std::mem::size_of::<BvhNode>();

/// Triangle in object space (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TriangleRecord {
    pub v0: [f32; 3],
    pub primitive_id: u32,
    pub v1: [f32; 3],
    pub _pad0: u32,
    pub v2: [f32; 3],
    pub _pad1: u32,
}

/// Custom primitive bounds (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BoxRecord {
    pub min: [f32; 3],
    pub primitive_id: u32,
    pub max: [f32; 3],
    pub _pad: u32,
}

/// Placed bottom-level structure (128 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    pub world_to_object: [[f32; 3]; 4],
    pub object_to_world: [[f32; 3]; 4],
    pub mask: u32,
    /// Position of the instance in the build input.
    pub instance_id: u32,
    pub structure_index: u32,
    pub function_table_offset: u32,
    pub options: u32,
    pub _pad: [u32; 3],
}

/// Byte size of a structure with the given counts.
pub fn structure_size(kind: StructureKind, node_capacity: usize, primitive_count: usize) -> usize {
    HEADER_SIZE + node_capacity * NODE_SIZE + primitive_count * kind.record_size()
}

/// Serialize nodes and leaf-ordered records into a word buffer.
pub fn serialize<R: Pod>(
    kind: StructureKind,
    nodes: &[BvhNode],
    node_capacity: usize,
    records: &[R],
) -> Vec<u32> {
    debug_assert_eq!(std::mem::size_of::<R>(), kind.record_size());
    debug_assert!(nodes.len() <= node_capacity);

    let size = structure_size(kind, node_capacity, records.len());
    let mut words = vec![0u32; size / 4];
    let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut words);

    let header = StructureHeader {
        kind: kind.to_raw(),
        node_count: nodes.len() as u32,
        node_capacity: node_capacity as u32,
        primitive_count: records.len() as u32,
    };
    bytes[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));

    let nodes_end = HEADER_SIZE + nodes.len() * NODE_SIZE;
    bytes[HEADER_SIZE..nodes_end].copy_from_slice(bytemuck::cast_slice(nodes));

    let records_start = HEADER_SIZE + node_capacity * NODE_SIZE;
    bytes[records_start..].copy_from_slice(bytemuck::cast_slice(records));

    words
}

/// Borrowed, validated view of a serialized structure.
#[derive(Debug, Clone, Copy)]
pub struct StructureView<'a> {
    pub header: StructureHeader,
    pub kind: StructureKind,
    nodes: &'a [BvhNode],
    records: &'a [u8],
}

impl<'a> StructureView<'a> {
    /// Parse `bytes`. The slice must be 4-byte aligned (device buffers are).
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::invalid_state("acceleration structure buffer too small"));
        }
        let header: StructureHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
        let kind = StructureKind::from_raw(header.kind)
            .ok_or_else(|| Error::invalid_state(format!("unknown structure kind {}", header.kind)))?;

        let capacity = header.node_capacity as usize;
        let count = header.node_count as usize;
        let needed = structure_size(kind, capacity, header.primitive_count as usize);
        if count > capacity || bytes.len() < needed {
            return Err(Error::invalid_state("acceleration structure buffer truncated"));
        }

        let nodes_start = HEADER_SIZE;
        let records_start = HEADER_SIZE + capacity * NODE_SIZE;
        let nodes = bytemuck::try_cast_slice(&bytes[nodes_start..nodes_start + count * NODE_SIZE])
            .map_err(|e| Error::invalid_state(format!("misaligned node data: {e}")))?;

        Ok(Self {
            header,
            kind,
            nodes,
            records: &bytes[records_start..needed],
        })
    }

    pub fn nodes(&self) -> &'a [BvhNode] {
        self.nodes
    }

    pub fn primitive_count(&self) -> usize {
        self.header.primitive_count as usize
    }

    /// Records as `R`. Fails if `R` does not match the structure kind.
    pub fn records<R: Pod>(&self) -> Result<&'a [R]> {
        if std::mem::size_of::<R>() != self.kind.record_size() {
            return Err(Error::invalid_state(format!(
                "record type does not match {:?} structure",
                self.kind
            )));
        }
        bytemuck::try_cast_slice(self.records)
            .map_err(|e| Error::invalid_state(format!("misaligned record data: {e}")))
    }

    /// Size after dropping unused node capacity.
    pub fn compacted_size(&self) -> usize {
        structure_size(self.kind, self.nodes.len(), self.primitive_count())
    }

    /// Write the compacted form into `dst` (at least `compacted_size` bytes).
    pub fn compact_into(&self, dst: &mut [u8]) -> Result<()> {
        let size = self.compacted_size();
        if dst.len() < size {
            return Err(Error::build_failure(format!(
                "compaction target holds {} bytes, {} required",
                dst.len(),
                size
            )));
        }
        let header = StructureHeader {
            node_capacity: self.header.node_count,
            ..self.header
        };
        dst[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        let nodes_end = HEADER_SIZE + self.nodes.len() * NODE_SIZE;
        dst[HEADER_SIZE..nodes_end].copy_from_slice(bytemuck::cast_slice(self.nodes));
        dst[nodes_end..size].copy_from_slice(self.records);
        dst[size..].fill(0);
        Ok(())
    }
}
