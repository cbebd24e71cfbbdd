//! CPU ray queries over software acceleration structures.
//!
//! Mirrors what a ray-tracing pipeline does on the device: walk the instance
//! structure, filter instances by ray-type mask, move the ray into object
//! space and test the bottom-level primitives. Triangles use the built-in
//! test; bounding-box geometry calls the intersection function registered
//! under its name.

use std::collections::HashMap;

use rayon::prelude::*;
use smallvec::{smallvec, SmallVec};

use super::bvh::BvhNode;
use super::layout::{BoxRecord, InstanceRecord, StructureKind, TriangleRecord};
use crate::device::software::{SoftwareAccelerationStructure, SoftwareBuffer, SoftwareDevice};
use crate::geometry::{GpuSphere, SPHERE_INTERSECTION_FUNCTION};
use crate::scene::Scene;
use crate::util::{mask, unpack_affine, BoundingBox, Error, Ray, Result, Vec2, Vec3};

/// Custom primitive test. Receives the object-space ray, the primitive index
/// and the geometry's resources; returns the hit distance along the ray.
pub type IntersectionFn = fn(ray: &Ray, primitive_id: u32, resources: &[&SoftwareBuffer]) -> Option<f32>;

/// Intersection functions by name.
#[derive(Debug, Clone, Default)]
pub struct IntersectionFunctionLibrary {
    functions: HashMap<String, IntersectionFn>,
}

impl IntersectionFunctionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library holding the built-in sphere function.
    pub fn with_builtins() -> Self {
        let mut lib = Self::new();
        lib.register(SPHERE_INTERSECTION_FUNCTION, sphere_intersection);
        lib
    }

    pub fn register(&mut self, name: impl Into<String>, function: IntersectionFn) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Result<IntersectionFn> {
        self.functions
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnresolvedFunction(name.to_string()))
    }
}

/// Near-root sphere test against the `[GpuSphere]` resource.
fn sphere_intersection(ray: &Ray, primitive_id: u32, resources: &[&SoftwareBuffer]) -> Option<f32> {
    let spheres = resources.first()?.as_slice::<GpuSphere>().ok()?;
    let sphere = spheres.get(primitive_id as usize)?;

    let oc = ray.origin - Vec3::from(sphere.origin);
    let a = ray.direction.length_squared();
    let b = 2.0 * oc.dot(ray.direction);
    let c = oc.length_squared() - sphere.radius_squared;
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    Some((-b - disc.sqrt()) / (2.0 * a))
}

#[derive(Clone, Copy)]
struct TableEntry<'a> {
    function: IntersectionFn,
    resources: &'a [&'a SoftwareBuffer],
}

/// Intersection functions resolved per bottom-level index.
#[derive(Default)]
pub struct IntersectionFunctionTable<'a> {
    entries: Vec<Option<(IntersectionFn, Vec<&'a SoftwareBuffer>)>>,
}

impl<'a> IntersectionFunctionTable<'a> {
    /// Resolve the function of every geometry in `scene` against `library`.
    pub fn for_scene(scene: &'a Scene<SoftwareDevice>, library: &IntersectionFunctionLibrary) -> Result<Self> {
        let mut entries = Vec::with_capacity(scene.geometries().len());
        for geometry in scene.geometries() {
            let entry = match geometry.intersection_function_name() {
                Some(name) => Some((library.get(name)?, geometry.resources()?)),
                None => None,
            };
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, offset: u32) -> Option<TableEntry<'_>> {
        self.entries
            .get(offset as usize)?
            .as_ref()
            .map(|(function, resources)| TableEntry {
                function: *function,
                resources,
            })
    }
}

/// What was hit inside the bottom-level structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HitKind {
    Triangle { barycentrics: Vec2 },
    BoundingBox,
}

/// Closest intersection of a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub distance: f32,
    /// Position of the instance in the scene's instance list.
    pub instance_id: u32,
    /// Bottom-level structure index (geometry index).
    pub geometry_index: u32,
    pub primitive_id: u32,
    pub kind: HitKind,
}

enum Primitives<'a> {
    Triangles(&'a [TriangleRecord]),
    Boxes(&'a [BoxRecord]),
}

struct Bottom<'a> {
    nodes: &'a [BvhNode],
    primitives: Primitives<'a>,
}

/// Closest-hit queries against one built instance structure.
pub struct SceneQuery<'a> {
    nodes: &'a [BvhNode],
    instances: &'a [InstanceRecord],
    bottoms: Vec<Bottom<'a>>,
    table: &'a IntersectionFunctionTable<'a>,
}

impl<'a> SceneQuery<'a> {
    /// Validate the structures and function table once for many queries.
    pub fn new(tlas: &'a SoftwareAccelerationStructure, table: &'a IntersectionFunctionTable<'a>) -> Result<Self> {
        let view = tlas.view()?;
        if view.kind != StructureKind::Instances {
            return Err(Error::invalid_state(format!("'{}' is not an instance structure", tlas.label())));
        }
        let instances = view.records::<InstanceRecord>()?;

        let mut bottoms = Vec::with_capacity(tlas.instanced_structures().len());
        for (index, blas) in tlas.instanced_structures().iter().enumerate() {
            let view = blas.view()?;
            let primitives = match view.kind {
                StructureKind::Triangles => Primitives::Triangles(view.records()?),
                StructureKind::BoundingBoxes => {
                    if view.primitive_count() > 0 && table.entry(index as u32).is_none() {
                        return Err(Error::UnresolvedFunction(format!(
                            "no intersection function bound for geometry {index}"
                        )));
                    }
                    Primitives::Boxes(view.records()?)
                }
                StructureKind::Instances => {
                    return Err(Error::invalid_state("instance structures cannot be nested"));
                }
            };
            let nodes = if view.primitive_count() == 0 { &[][..] } else { view.nodes() };
            bottoms.push(Bottom { nodes, primitives });
        }

        let nodes = if view.primitive_count() == 0 { &[][..] } else { view.nodes() };
        Ok(Self {
            nodes,
            instances,
            bottoms,
            table,
        })
    }

    /// Closest hit among instances accepted by `ray_mask`.
    pub fn closest_hit(&self, ray: &Ray, ray_mask: u32) -> Option<Hit> {
        let mut best: Option<Hit> = None;
        traverse(self.nodes, ray, ray.max_distance, |range, closest| {
            let mut closest = closest;
            let mut improved = None;
            for record in &self.instances[range] {
                if !mask::accepts(record.mask, ray_mask) {
                    continue;
                }
                let object_ray = ray.transformed(&unpack_affine(&record.world_to_object));
                if let Some(hit) = self.intersect_instance(record, &object_ray, closest) {
                    closest = hit.distance;
                    improved = Some(closest);
                    best = Some(hit);
                }
            }
            improved
        });
        best
    }

    /// True if anything accepted by `ray_mask` lies within the ray interval.
    pub fn occluded(&self, ray: &Ray, ray_mask: u32) -> bool {
        self.closest_hit(ray, ray_mask).is_some()
    }

    /// [`closest_hit`](Self::closest_hit) for many rays in parallel.
    pub fn closest_hits(&self, rays: &[Ray], ray_mask: u32) -> Vec<Option<Hit>> {
        rays.par_iter().map(|ray| self.closest_hit(ray, ray_mask)).collect()
    }

    fn intersect_instance(&self, record: &InstanceRecord, ray: &Ray, max_distance: f32) -> Option<Hit> {
        let bottom = self.bottoms.get(record.structure_index as usize)?;
        let mut best: Option<Hit> = None;
        let make_hit = |distance, primitive_id, kind| Hit {
            distance,
            instance_id: record.instance_id,
            geometry_index: record.structure_index,
            primitive_id,
            kind,
        };

        match bottom.primitives {
            Primitives::Triangles(triangles) => {
                traverse(bottom.nodes, ray, max_distance, |range, closest| {
                    let mut closest = closest;
                    let mut improved = None;
                    for tri in &triangles[range] {
                        if let Some((t, bary)) = intersect_triangle(ray, tri, closest) {
                            closest = t;
                            improved = Some(t);
                            best = Some(make_hit(t, tri.primitive_id, HitKind::Triangle { barycentrics: bary }));
                        }
                    }
                    improved
                });
            }
            Primitives::Boxes(boxes) => {
                let entry = self.table.entry(record.function_table_offset)?;
                let inv_dir = ray.inv_direction();
                traverse(bottom.nodes, ray, max_distance, |range, closest| {
                    let mut closest = closest;
                    let mut improved = None;
                    for prim in &boxes[range] {
                        let bounds = BoundingBox::new(prim.min.into(), prim.max.into());
                        if bounds.intersect(ray, inv_dir, closest).is_none() {
                            continue;
                        }
                        match (entry.function)(ray, prim.primitive_id, entry.resources) {
                            Some(t) if t >= ray.min_distance && t < closest => {
                                closest = t;
                                improved = Some(t);
                                best = Some(make_hit(t, prim.primitive_id, HitKind::BoundingBox));
                            }
                            _ => {}
                        }
                    }
                    improved
                });
            }
        }
        best
    }
}

/// One-off closest-hit query. Prefer [`SceneQuery`] for many rays.
pub fn intersect(
    tlas: &SoftwareAccelerationStructure,
    ray: &Ray,
    ray_mask: u32,
    table: &IntersectionFunctionTable<'_>,
) -> Result<Option<Hit>> {
    let query = SceneQuery::new(tlas, table)?;
    Ok(query.closest_hit(ray, ray_mask))
}

/// Depth-first BVH walk. `leaf` gets the record range of each reached leaf
/// and the current closest distance, and returns a closer distance if it
/// found one. An empty `nodes` slice visits nothing.
fn traverse<F>(nodes: &[BvhNode], ray: &Ray, max_distance: f32, mut leaf: F) -> f32
where
    F: FnMut(std::ops::Range<usize>, f32) -> Option<f32>,
{
    let mut closest = max_distance;
    if nodes.is_empty() {
        return closest;
    }
    let inv_dir = ray.inv_direction();
    let mut stack: SmallVec<[u32; 64]> = smallvec![0];

    while let Some(index) = stack.pop() {
        let Some(node) = nodes.get(index as usize) else {
            continue;
        };
        if node.bounds().intersect(ray, inv_dir, closest).is_none() {
            continue;
        }
        if node.is_leaf() {
            let first = node.left_or_first as usize;
            if let Some(t) = leaf(first..first + node.count as usize, closest) {
                closest = t;
            }
        } else {
            stack.push(node.left_or_first + 1);
            stack.push(node.left_or_first);
        }
    }
    closest
}

/// Möller-Trumbore, double sided.
fn intersect_triangle(ray: &Ray, tri: &TriangleRecord, max_distance: f32) -> Option<(f32, Vec2)> {
    const EPSILON: f32 = 1e-8;
    let v0 = Vec3::from(tri.v0);
    let e1 = Vec3::from(tri.v1) - v0;
    let e2 = Vec3::from(tri.v2) - v0;

    let p = ray.direction.cross(e2);
    let det = e1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = ray.direction.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (t >= ray.min_distance && t < max_distance).then_some((t, Vec2::new(u, v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, StorageMode};
    use approx::assert_relative_eq;

    #[test]
    fn test_triangle_hit_and_miss() {
        let tri = TriangleRecord {
            v0: [-1.0, -1.0, 0.0],
            primitive_id: 0,
            v1: [1.0, -1.0, 0.0],
            _pad0: 0,
            v2: [0.0, 1.0, 0.0],
            _pad1: 0,
        };
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let (t, _) = intersect_triangle(&ray, &tri, f32::INFINITY).unwrap();
        assert_relative_eq!(t, 5.0);
        assert!(intersect_triangle(&ray, &tri, 4.0).is_none());

        let miss = Ray::new(Vec3::new(3.0, 0.0, -5.0), Vec3::Z);
        assert!(intersect_triangle(&miss, &tri, f32::INFINITY).is_none());
    }

    #[test]
    fn test_sphere_function_near_root() {
        let device = SoftwareDevice::new();
        let spheres = [GpuSphere {
            origin: [0.0, 0.0, 0.0],
            radius_squared: 1.0,
            color: [1.0; 3],
            radius: 1.0,
        }];
        let buf = device.create_buffer_from(&spheres, StorageMode::Shared, "spheres").unwrap();
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let t = sphere_intersection(&ray, 0, &[&buf]).unwrap();
        assert_relative_eq!(t, 4.0);
        assert!(sphere_intersection(&Ray::new(Vec3::new(0.0, 3.0, -5.0), Vec3::Z), 0, &[&buf]).is_none());
        assert!(sphere_intersection(&ray, 7, &[&buf]).is_none());
    }

    #[test]
    fn test_library_resolution() {
        let lib = IntersectionFunctionLibrary::with_builtins();
        assert!(lib.get(SPHERE_INTERSECTION_FUNCTION).is_ok());
        assert!(matches!(lib.get("torus"), Err(Error::UnresolvedFunction(_))));
    }
}
