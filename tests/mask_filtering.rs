//! Ray-type mask filtering over instanced geometry.

use proptest::prelude::*;

use rtscene::accel::{IntersectionFunctionLibrary, IntersectionFunctionTable, SceneQuery};
use rtscene::device::software::SoftwareDevice;
use rtscene::geometry::{FaceMask, GeometryInstance, SphereGeometry, TriangleGeometry};
use rtscene::scene::Scene;
use rtscene::util::{Mat4, Ray, Vec3};
use rtscene::Error;

/// Cube at the origin and a sphere at x = 4, both with `instance_mask`.
fn masked_scene(instance_mask: u32) -> Scene<SoftwareDevice> {
    let mut scene = Scene::new(SoftwareDevice::new());

    let mut cube = TriangleGeometry::new();
    cube.add_cube(FaceMask::ALL, Vec3::ONE, Mat4::IDENTITY, false);
    let cube_id = scene.add_geometry(cube);

    let mut spheres = SphereGeometry::new();
    spheres.add_sphere(Vec3::ZERO, 0.5, Vec3::ONE);
    let sphere_id = scene.add_geometry(spheres);

    scene
        .add_instance(GeometryInstance::new(cube_id, Mat4::IDENTITY, instance_mask))
        .expect("cube instance");
    scene
        .add_instance(GeometryInstance::new(
            sphere_id,
            Mat4::from_translation(Vec3::new(4.0, 0.0, 0.0)),
            instance_mask,
        ))
        .expect("sphere instance");
    scene.upload_to_buffers().expect("upload");
    scene
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn hit_iff_masks_overlap(instance_mask in 1u32.., ray_mask in any::<u32>()) {
        let scene = masked_scene(instance_mask);
        let library = IntersectionFunctionLibrary::with_builtins();
        let table = IntersectionFunctionTable::for_scene(&scene, &library).expect("table");
        let query = SceneQuery::new(scene.instance_structure().expect("tlas"), &table).expect("query");

        let expected = instance_mask & ray_mask != 0;
        let through_cube = Ray::new(Vec3::new(0.1, 0.2, -5.0), Vec3::Z);
        let through_sphere = Ray::new(Vec3::new(4.05, 0.1, -5.0), Vec3::Z);
        prop_assert_eq!(query.closest_hit(&through_cube, ray_mask).is_some(), expected);
        prop_assert_eq!(query.closest_hit(&through_sphere, ray_mask).is_some(), expected);
    }
}

#[test]
fn test_zero_instance_mask_rejected() {
    let mut scene = Scene::new(SoftwareDevice::new());
    let mut cube = TriangleGeometry::new();
    cube.add_cube(FaceMask::ALL, Vec3::ONE, Mat4::IDENTITY, false);
    let id = scene.add_geometry(cube);
    let err = scene.add_instance(GeometryInstance::new(id, Mat4::IDENTITY, 0)).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert!(scene.instances().is_empty());
}

#[test]
fn test_stale_geometry_id_rejected() {
    let mut scene = Scene::new(SoftwareDevice::new());
    let id = scene.add_geometry(TriangleGeometry::new());
    scene.clear();
    scene.add_geometry(TriangleGeometry::new());
    let err = scene.add_instance(GeometryInstance::new(id, Mat4::IDENTITY, 1)).unwrap_err();
    assert!(matches!(err, Error::InvalidReference { .. }));
}
