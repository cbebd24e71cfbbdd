//! # rtscene
//!
//! Scene, geometry and two-level acceleration structure management for
//! hardware-style ray tracing.
//!
//! A [`Scene`](scene::Scene) owns geometry stores (triangle meshes or sphere
//! sets), immutable instances placing them, area lights and a camera.
//! [`Scene::upload_to_buffers`](scene::Scene::upload_to_buffers) copies
//! everything into device buffers and rebuilds one compacted bottom-level
//! structure per geometry plus one instance structure over all instances.
//!
//! ## Modules
//!
//! - [`util`] - Errors, math types, mask bits
//! - [`device`] - Device trait, descriptors, software and wgpu devices
//! - [`accel`] - BVH builder, structure layout, manager, CPU ray queries
//! - [`geometry`] - Triangle and sphere geometry, instances
//! - [`scene`] - Scene aggregate, lights, camera, Cornell box factory
//! - [`config`] - Tool settings
//!
//! ## Example
//!
//! ```ignore
//! use rtscene::prelude::*;
//!
//! let device = SoftwareDevice::new();
//! let mut scene = Scene::instanced_cornell_box(device, &CornellBoxOptions::default())?;
//! scene.upload_to_buffers()?;
//! assert_eq!(scene.state(), BuildState::Ready);
//! ```

pub mod util;
pub mod device;
pub mod accel;
pub mod geometry;
pub mod scene;
pub mod config;

pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{mask, BoundingBox, Error, Mat4, Ray, Result, Vec2, Vec3};
    pub use crate::device::software::SoftwareDevice;
    pub use crate::device::{Device, DeviceBuffer, StorageMode};
    pub use crate::accel::{BuildState, IntersectionFunctionLibrary, IntersectionFunctionTable, SceneQuery};
    pub use crate::geometry::{FaceMask, Geometry, GeometryId, GeometryInstance, SphereGeometry, TriangleGeometry};
    pub use crate::scene::{AreaLight, Camera, CornellBoxOptions, Scene};
}
