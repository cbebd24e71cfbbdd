//! Two-level acceleration structure manager.
//!
//! One bottom-level structure per geometry store (indexed by the geometry's
//! position in the scene) and one instance structure over all instances.
//! Every structure is compacted before the manager reports [`BuildState::Ready`].

use crate::device::{
    AccelerationStructureDescriptor, Device, InstanceDescriptor, InstanceOptions,
    InstanceStructureDescriptor, StorageMode,
};
use crate::geometry::{Geometry, GeometryInstance};
use crate::util::{pack_affine, Error, Result};

/// Build progress of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// Nothing usable; initial state and state after any mutation or failure.
    Empty,
    /// Bottom-level structures exist, instance structure pending.
    BottomBuilt,
    /// Every structure is built and compacted.
    Ready,
}

/// Sizes of one built structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureReport {
    pub label: String,
    pub primitive_count: usize,
    pub build_size: u64,
    pub scratch_size: u64,
    pub compacted_size: u64,
}

/// Sizes of the last successful rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub primitive_structures: Vec<StructureReport>,
    pub instance_structure: Option<StructureReport>,
}

impl BuildReport {
    fn all(&self) -> impl Iterator<Item = &StructureReport> {
        self.primitive_structures.iter().chain(self.instance_structure.iter())
    }

    /// Bytes the structures would occupy without compaction.
    pub fn total_build_size(&self) -> u64 {
        self.all().map(|s| s.build_size).sum()
    }

    /// Bytes actually occupied after compaction.
    pub fn total_compacted_size(&self) -> u64 {
        self.all().map(|s| s.compacted_size).sum()
    }

    /// Largest scratch requirement of any single build.
    pub fn peak_scratch_size(&self) -> u64 {
        self.all().map(|s| s.scratch_size).max().unwrap_or(0)
    }
}

/// Owns the acceleration structures of one scene.
pub struct AccelerationStructureManager<D: Device> {
    state: BuildState,
    primitive_structures: Vec<D::AccelerationStructure>,
    instance_structure: Option<D::AccelerationStructure>,
    instance_buffer: Option<D::Buffer>,
    instance_descriptors: Vec<InstanceDescriptor>,
    report: BuildReport,
}

impl<D: Device> Default for AccelerationStructureManager<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> AccelerationStructureManager<D> {
    pub fn new() -> Self {
        Self {
            state: BuildState::Empty,
            primitive_structures: Vec::new(),
            instance_structure: None,
            instance_buffer: None,
            instance_descriptors: Vec::new(),
            report: BuildReport::default(),
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == BuildState::Ready
    }

    /// Compacted bottom-level structures, indexed like the scene's geometries.
    pub fn primitive_structures(&self) -> &[D::AccelerationStructure] {
        &self.primitive_structures
    }

    /// Compacted instance structure, present only when ready.
    pub fn instance_structure(&self) -> Option<&D::AccelerationStructure> {
        match self.state {
            BuildState::Ready => self.instance_structure.as_ref(),
            _ => None,
        }
    }

    /// Device buffer of [`InstanceDescriptor`]s the instance structure was built from.
    pub fn instance_buffer(&self) -> Option<&D::Buffer> {
        self.instance_buffer.as_ref()
    }

    /// Host copy of the instance descriptors, in instance order.
    pub fn instance_descriptors(&self) -> &[InstanceDescriptor] {
        &self.instance_descriptors
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    /// Release every structure and return to [`BuildState::Empty`].
    pub fn reset(&mut self) {
        self.state = BuildState::Empty;
        self.instance_structure = None;
        self.instance_buffer = None;
        self.primitive_structures.clear();
        self.instance_descriptors.clear();
        self.report = BuildReport::default();
    }

    /// Full rebuild of every structure from uploaded geometry.
    ///
    /// On failure nothing is kept and the manager stays [`BuildState::Empty`].
    #[tracing::instrument(skip_all, fields(geometries = geometries.len(), instances = instances.len()))]
    pub fn rebuild(
        &mut self,
        device: &D,
        geometries: &[Geometry<D>],
        instances: &[GeometryInstance],
    ) -> Result<()> {
        self.reset();
        let result = self
            .build_primitive_structures(device, geometries)
            .and_then(|()| self.build_instance_structure(device, geometries, instances));
        if let Err(e) = &result {
            tracing::warn!(error = %e, "acceleration structure rebuild failed");
            self.reset();
        }
        result
    }

    fn build_primitive_structures(&mut self, device: &D, geometries: &[Geometry<D>]) -> Result<()> {
        for (index, geometry) in geometries.iter().enumerate() {
            let descriptor = AccelerationStructureDescriptor::Primitive(geometry.geometry_descriptor()?);
            let label = format!("geometry_{index}_{}", geometry.kind_name());
            let primitive_count = geometry.primitive_count();
            let (structure, report) = build_compacted(device, &descriptor, &label, primitive_count)?;
            self.primitive_structures.push(structure);
            self.report.primitive_structures.push(report);
        }
        self.state = BuildState::BottomBuilt;
        Ok(())
    }

    fn build_instance_structure(
        &mut self,
        device: &D,
        geometries: &[Geometry<D>],
        instances: &[GeometryInstance],
    ) -> Result<()> {
        let mut descriptors = Vec::with_capacity(instances.len());
        for instance in instances {
            let id = instance.geometry();
            let geometry = geometries.get(id.index as usize).ok_or(Error::InvalidReference {
                index: id.index,
                generation: id.generation,
            })?;
            let options = if geometry.intersection_function_name().is_none() {
                InstanceOptions::OPAQUE
            } else {
                InstanceOptions::empty()
            };
            descriptors.push(InstanceDescriptor {
                transform: pack_affine(&instance.transform()),
                options: options.bits(),
                mask: instance.mask(),
                // One table entry per geometry, in geometry order.
                intersection_function_table_offset: id.index,
                acceleration_structure_index: id.index,
            });
        }

        let buffer = device.create_buffer_from(&descriptors, StorageMode::for_device(device), "instance_descriptors")?;
        let descriptor = AccelerationStructureDescriptor::Instance(InstanceStructureDescriptor {
            instanced_structures: &self.primitive_structures,
            instance_buffer: &buffer,
            instance_count: descriptors.len(),
        });
        let (structure, report) = build_compacted(device, &descriptor, "instances", descriptors.len())?;

        self.instance_structure = Some(structure);
        self.instance_buffer = Some(buffer);
        self.instance_descriptors = descriptors;
        self.report.instance_structure = Some(report);
        self.state = BuildState::Ready;
        Ok(())
    }
}

/// Build one structure, then copy it into a buffer of exactly its compacted size.
/// The uncompacted build is released before returning.
fn build_compacted<D: Device>(
    device: &D,
    descriptor: &AccelerationStructureDescriptor<'_, D::Buffer, D::AccelerationStructure>,
    label: &str,
    primitive_count: usize,
) -> Result<(D::AccelerationStructure, StructureReport)> {
    let built = device.build_acceleration_structure(descriptor, label)?;
    let sizes = device.query_sizes(&built);
    let target = device.create_empty_buffer(sizes.compacted_size as usize, StorageMode::Private, label)?;
    let compacted = device.compact(&built, target)?;
    drop(built);

    tracing::debug!(
        label,
        primitive_count,
        build_size = sizes.acceleration_structure_size,
        scratch_size = sizes.build_scratch_size,
        compacted_size = sizes.compacted_size,
        "structure compacted"
    );

    Ok((
        compacted,
        StructureReport {
            label: label.to_string(),
            primitive_count,
            build_size: sizes.acceleration_structure_size,
            scratch_size: sizes.build_scratch_size,
            compacted_size: sizes.compacted_size,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;
    use crate::geometry::{FaceMask, GeometryId};
    use crate::util::{Mat4, Vec3};

    fn cube_geometry(device: &SoftwareDevice) -> Geometry<SoftwareDevice> {
        let mut g = Geometry::triangles();
        if let Some(t) = g.as_triangles_mut() {
            t.add_cube(FaceMask::ALL, Vec3::ONE, Mat4::IDENTITY, false);
        }
        g.upload_to_buffers(device).unwrap();
        g
    }

    fn id(index: u32) -> GeometryId {
        GeometryId { index, generation: 0 }
    }

    #[test]
    fn test_rebuild_reaches_ready() {
        let device = SoftwareDevice::new();
        let geometries = vec![cube_geometry(&device)];
        let instances = vec![
            GeometryInstance::new(id(0), Mat4::IDENTITY, 1),
            GeometryInstance::new(id(0), Mat4::from_translation(Vec3::X * 4.0), 1),
        ];
        let mut manager = AccelerationStructureManager::new();
        manager.rebuild(&device, &geometries, &instances).unwrap();

        assert_eq!(manager.state(), BuildState::Ready);
        let tlas = manager.instance_structure().unwrap();
        assert!(tlas.is_compacted());
        assert_eq!(tlas.primitive_count(), 2);
        assert_eq!(manager.primitive_structures().len(), 1);
        assert_eq!(manager.instance_descriptors()[1].acceleration_structure_index, 0);
        assert!(manager.instance_descriptors()[0].options().contains(InstanceOptions::OPAQUE));

        let report = manager.report();
        assert_eq!(report.primitive_structures[0].primitive_count, 12);
        assert!(report.total_compacted_size() < report.total_build_size());
    }

    #[test]
    fn test_out_of_range_reference_leaves_empty() {
        let device = SoftwareDevice::new();
        let geometries = vec![cube_geometry(&device)];
        let instances = vec![GeometryInstance::new(id(3), Mat4::IDENTITY, 1)];
        let mut manager = AccelerationStructureManager::new();
        let err = manager.rebuild(&device, &geometries, &instances).unwrap_err();
        assert!(matches!(err, Error::InvalidReference { index: 3, .. }));
        assert_eq!(manager.state(), BuildState::Empty);
        assert!(manager.primitive_structures().is_empty());
    }

    #[test]
    fn test_stale_geometry_fails_build() {
        let device = SoftwareDevice::new();
        let mut g = cube_geometry(&device);
        if let Some(t) = g.as_triangles_mut() {
            t.add_cube(FaceMask::POSITIVE_X, Vec3::ONE, Mat4::IDENTITY, false);
        }
        let mut manager = AccelerationStructureManager::new();
        let err = manager.rebuild(&device, &[g], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(manager.state(), BuildState::Empty);
    }

    #[test]
    fn test_empty_scene_is_ready() {
        let device = SoftwareDevice::new();
        let mut manager = AccelerationStructureManager::<SoftwareDevice>::new();
        manager.rebuild(&device, &[], &[]).unwrap();
        assert!(manager.is_ready());
        assert_eq!(manager.instance_structure().unwrap().primitive_count(), 0);
    }

    #[test]
    fn test_allocation_failure_releases_everything() {
        let device = SoftwareDevice::with_budget(Some(4096));
        let geometries = vec![cube_geometry(&device)];
        let used = device.memory_stats().allocated;
        let instances: Vec<_> = (0..64)
            .map(|i| GeometryInstance::new(id(0), Mat4::from_translation(Vec3::X * i as f32), 1))
            .collect();
        let mut manager = AccelerationStructureManager::new();
        let err = manager.rebuild(&device, &geometries, &instances).unwrap_err();
        assert!(err.is_allocation_failure());
        assert_eq!(manager.state(), BuildState::Empty);
        assert_eq!(device.memory_stats().allocated, used);
    }
}
