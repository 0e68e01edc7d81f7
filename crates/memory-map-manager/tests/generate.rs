//! End-to-end generation from configuration files on disk.

use std::path::{Path, PathBuf};

use memory_map_manager::export::INPUT_CFG_FILE;
use memory_map_manager::{
    generate, load, ConflictPolicy, Error, GenerateOptions, GeneratorConfig, Importer,
};
use serde_json::Value;
use tempfile::TempDir;

const SENSORS: &str = "\
metadata:
  app_name: sensors
  version: 1.0.0
  permission_users: [user, admin]
defines:
  CHANNELS: 2
typedefs:
  channel:
    elements:
      - {name: raw, type: uint16_t, default: 10, read_permission: user}
      - {name: gain, type: float, default: 1.0, read_permission: [user, admin], write_permission: admin}
  sensor:
    elements:
      - {name: id, type: uint8_t, read_permission: admin}
      - {name: channels, type: channel, array_size: CHANNELS}
generated_maps:
  sensor_map:
    type: sensor
";

const PATCH: &str = "\
metadata:
  version: 1.1.0
overrides:
  r\"channels\\[\\d\\]\\.raw\":
    default: 20
    scaling_factor: 0.5
";

fn demo_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/minimal")
}

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn sensors_config(dir: &Path, extra: &str) -> GeneratorConfig {
    write(dir, "sensors.yaml", SENSORS);
    write(dir, "patch.yaml", PATCH);
    let main = write(
        dir,
        "main.yaml",
        &format!("files: [sensors.yaml, patch.yaml]\nc_dir: c\ncsv_dir: csv\ncfg_dir: cfg\n{extra}"),
    );
    GeneratorConfig::load_from(main).unwrap()
}

fn run(config: &GeneratorConfig, clean: bool) -> memory_map_manager::GenerateReport {
    let mut importer = Importer::new(config.conflict_policy());
    let options = GenerateOptions {
        clean,
        hide_version: false,
    };
    generate(config, &mut importer, options).unwrap()
}

#[test]
fn test_minimal_demo_matches_reference_headers() {
    let tmp = TempDir::new().unwrap();
    let description = demo_dir().join("minimal.yaml");
    let main = write(
        tmp.path(),
        "main.yaml",
        &format!("files: ['{}']\nc_dir: out\n", description.display()),
    );
    let config = GeneratorConfig::load_from(main).unwrap();
    let report = run(&config, false);
    assert!(report.has_outputs);

    let out = tmp.path().join("out");
    assert_eq!(
        std::fs::read_to_string(out.join("mm_typedefs_type_1.h")).unwrap(),
        include_str!("data/minimal/mm_typedefs_type_1.h")
    );
    assert_eq!(
        std::fs::read_to_string(out.join("mm_typedefs_map_1.h")).unwrap(),
        include_str!("data/minimal/mm_typedefs_map_1.h")
    );
}

#[test]
fn test_demo_configuration_loads() {
    let config = GeneratorConfig::load_from(demo_dir().join("main.yaml")).unwrap();
    assert_eq!(config.files.len(), 1);
    assert!(config.files[0].ends_with("minimal.yaml"));
    assert!(config.c_dir.as_deref().is_some_and(|d| d.ends_with("c_files")));
}

#[test]
fn test_conflicts_fail_without_policy() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "sensors.yaml", SENSORS);
    write(tmp.path(), "patch.yaml", PATCH);
    let main = write(tmp.path(), "main.yaml", "files: [sensors.yaml, patch.yaml]\n");
    let config = GeneratorConfig::load_from(main).unwrap();

    let mut importer = Importer::new(config.conflict_policy());
    let err = load(&config, &mut importer).unwrap_err();
    assert!(err.is_conflict());
    assert!(err.to_string().contains("metadata.version"));
}

#[test]
fn test_merged_description_with_overrides() {
    let tmp = TempDir::new().unwrap();
    let config = sensors_config(tmp.path(), "overwrite_conflicts: true\n");
    let report = run(&config, false);

    assert_eq!(report.summary.version, "1.1.0");
    assert_eq!(report.summary.maps[0].size, 13);

    let cfg_path = tmp
        .path()
        .join(format!("cfg/mm_{}_cfg.json", report.summary.full_hash));
    let cfg: Value = serde_json::from_str(&std::fs::read_to_string(cfg_path).unwrap()).unwrap();
    let records = cfg["maps"]["sensor_map"]["records"].as_array().unwrap();
    let raw = records
        .iter()
        .find(|r| r["name"] == "channels[1].raw")
        .unwrap();
    assert_eq!(raw["resolved_default"], 20);
    assert_eq!(raw["resolved_scaled_default"], 40);
    assert_eq!(raw["default_changed"], true);
    assert_eq!(raw["map_offset"], 7);

    let defaults = std::fs::read_to_string(tmp.path().join("c/mm_default_sensor_map.c")).unwrap();
    assert!(defaults.contains("    map->channels[1].raw = 40;\n"));
    assert!(defaults.contains("    map->channels[0].gain = 1.0;\n"));

    let typedef = std::fs::read_to_string(tmp.path().join("c/mm_typedefs_sensor.h")).unwrap();
    assert!(typedef.contains("        channel channels[CHANNELS];\n"));

    let user_csv = tmp.path().join(format!(
        "csv/mm_sensors_sensor_map_user_{}.csv",
        report.summary.full_hash
    ));
    let user_csv = std::fs::read_to_string(user_csv).unwrap();
    assert!(user_csv.contains("channels[n].raw"));
    assert!(user_csv.contains("channels[n].gain"));
    // header plus the two channel records; `id` is admin only
    assert_eq!(user_csv.lines().count(), 3);

    let input = std::fs::read_to_string(tmp.path().join("cfg").join(INPUT_CFG_FILE)).unwrap();
    assert!(input.starts_with("defines:\n"));
    assert!(input.contains("1.1.0"));
}

#[test]
fn test_access_table_written() {
    let tmp = TempDir::new().unwrap();
    let config = sensors_config(tmp.path(), "overwrite_conflicts: true\n");
    run(&config, false);

    let table = std::fs::read_to_string(tmp.path().join("c/mm_access_sensor_map.c")).unwrap();
    assert!(table.contains("const uint8_t mm_access_sensor_map[13] = {\n"));
    assert!(table.contains("    0x20, 0x10, 0x10, 0x32, 0x32, 0x32, 0x32, 0x10,\n"));
    assert!(table.contains("    0x10, 0x32, 0x32, 0x32, 0x32,\n};\n"));
}

#[test]
fn test_clean_removes_stale_outputs() {
    let tmp = TempDir::new().unwrap();
    let config = sensors_config(tmp.path(), "overwrite_conflicts: true\n");
    std::fs::create_dir_all(tmp.path().join("c")).unwrap();
    write(&tmp.path().join("c"), "mm_stale.h", "stale");
    write(&tmp.path().join("c"), "handwritten.h", "keep");

    run(&config, false);
    assert!(tmp.path().join("c/mm_stale.h").exists());

    let report = run(&config, true);
    assert!(!tmp.path().join("c/mm_stale.h").exists());
    assert!(tmp.path().join("c/handwritten.h").exists());
    assert!(report
        .written
        .iter()
        .any(|p| p.ends_with("mm_typedefs_sensor_map.h")));
}

#[test]
fn test_invalid_description_is_reported() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "bad.yaml", "metadata:\n  app_name: bad\ngenerated_maps:\n  m:\n    type: missing\n");
    let main = write(tmp.path(), "main.yaml", "files: [bad.yaml]\nc_dir: c\n");
    let config = GeneratorConfig::load_from(main).unwrap();

    let mut importer = Importer::new(ConflictPolicy::default());
    let err = generate(&config, &mut importer, GenerateOptions::default()).unwrap_err();
    assert!(matches!(err, Error::UnknownType { .. }));
    assert!(!tmp.path().join("c").exists());
}
