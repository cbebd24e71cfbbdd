//! Acceleration structures.
//!
//! - [`bvh`] / [`build`] - SAH BVH used as the structure format of the software device
//! - [`layout`] - serialized structure layout, size queries and compaction
//! - [`AccelerationStructureManager`] - bottom-level + instance structure lifecycle
//! - [`trace`] - CPU ray queries over built structures

pub mod build;
pub mod bvh;
pub mod layout;
mod manager;
pub mod trace;

pub use manager::{AccelerationStructureManager, BuildReport, BuildState, StructureReport};
pub use trace::{Hit, HitKind, IntersectionFunctionLibrary, IntersectionFunctionTable, SceneQuery};
