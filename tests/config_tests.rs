//! Settings persistence.

use rtscene::config::Settings;
use rtscene::Error;
use tempfile::TempDir;

#[test]
fn test_save_load_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");

    let settings = Settings {
        memory_budget: Some(1 << 20),
        grid_radius: 2,
        use_intersection_functions: false,
        ..Default::default()
    };
    settings.save(&path).unwrap();

    let loaded = Settings::load(&path).unwrap();
    assert_eq!(loaded, settings);
    assert_eq!(loaded.cornell_box_options().grid_radius, 2);
    assert!(!loaded.cornell_box_options().use_intersection_functions);
}

#[test]
fn test_invalid_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ grid_radius: ").unwrap();
    assert!(matches!(Settings::load(&path), Err(Error::Json(_))));
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.json");
    assert!(matches!(Settings::load(&path), Err(Error::Io(_))));
    assert_eq!(Settings::load_or_default(&path), Settings::default());
}

#[test]
fn test_out_of_range_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fov.json");
    std::fs::write(&path, r#"{"field_of_view": 200.0}"#).unwrap();
    assert!(matches!(Settings::load(&path), Err(Error::Config(_))));
    assert_eq!(Settings::load_or_default(&path), Settings::default());
}
