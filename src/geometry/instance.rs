use crate::util::Mat4;

/// Handle to a geometry owned by a [`Scene`](crate::scene::Scene).
///
/// `index` is the position in the scene's geometry list and doubles as the
/// bottom-level structure index. `generation` changes on every scene clear,
/// so handles from before a clear are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryId {
    pub index: u32,
    pub generation: u32,
}

/// Immutable placement of a geometry in a scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryInstance {
    geometry: GeometryId,
    transform: Mat4,
    mask: u32,
}

impl GeometryInstance {
    pub fn new(geometry: GeometryId, transform: Mat4, mask: u32) -> Self {
        Self {
            geometry,
            transform,
            mask,
        }
    }

    pub fn geometry(&self) -> GeometryId {
        self.geometry
    }

    /// Object-to-world transform.
    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    /// Ray-type mask bits this instance participates in.
    pub fn mask(&self) -> u32 {
        self.mask
    }
}
