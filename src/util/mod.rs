//! Utility types and functions.
//!
//! This module contains fundamental types used throughout the library:
//! - [`Error`] / [`Result`] - Error handling
//! - [`BoundingBox`], [`Ray`] - Math types, plus re-exports from glam
//! - [`mask`] - Geometry and ray-type mask bits

mod error;
mod math;
pub mod mask;

pub use error::*;
pub use math::*;
