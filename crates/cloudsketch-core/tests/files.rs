use std::fs;

use cloudsketch_core::{read_settings_from, GeneratorSettings, Sketch, SketchError};
use pretty_assertions::assert_eq;

#[test]
fn missing_settings_file_means_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = read_settings_from(&dir.path().join("settings.json"));
    assert_eq!(settings, GeneratorSettings::default());
}

#[test]
fn settings_file_overrides_individual_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(
        &path,
        r#"{ "region": "ap-southeast-2", "defaultTags": { "Owner": "platform" } }"#,
    )
    .unwrap();

    let settings = read_settings_from(&path);
    assert_eq!(settings.region, "ap-southeast-2");
    assert_eq!(settings.provider_version, "~> 5.0");
    assert_eq!(settings.default_tags["Owner"], "platform");
}

#[test]
fn broken_settings_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, "{ region: ").unwrap();
    assert_eq!(read_settings_from(&path), GeneratorSettings::default());
}

#[test]
fn sketch_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sketch.json");
    fs::write(
        &path,
        r#"{"components":[{"id":"v","type":"vpc"}],"connections":[]}"#,
    )
    .unwrap();

    let sketch = Sketch::load(&path).unwrap();
    assert_eq!(sketch.components.len(), 1);
    assert_eq!(sketch.component("v").map(|c| c.node_type.as_str()), Some("vpc"));
}

#[test]
fn sketch_load_reports_path_and_parse_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    match Sketch::load(&missing) {
        Err(SketchError::Io { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected io error, got {other:?}"),
    }

    let garbage = dir.path().join("garbage.json");
    fs::write(&garbage, "not json").unwrap();
    assert!(matches!(Sketch::load(&garbage), Err(SketchError::Parse(_))));
}
