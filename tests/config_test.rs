//! Figment loading: defaults, TOML files, `VISCO_` environment overrides.

use std::io::Write;
use std::time::Duration;

use proxy_viscometer::config::Settings;
use serial_test::serial;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
#[serial]
fn test_shipped_config_matches_defaults() {
    let settings = Settings::load_from("config/viscometer.toml").expect("shipped config loads");
    assert_eq!(settings, Settings::default());
}

#[test]
#[serial]
fn test_partial_file_keeps_defaults() {
    let file = write_config(
        r#"
[run]
flow_rates = [80.0, 60.0, 40.0]
sample_count = 2
aspirate_settle = "45s"

[run.geometry]
height_mm = 12.0

[technique]
blowout_count = 4

[deck.plate]
slot = 4
"#,
    );

    let settings = Settings::load_from(file.path()).expect("config loads");
    assert_eq!(settings.run.flow_rates, vec![80.0, 60.0, 40.0]);
    assert_eq!(settings.run.sample_count, 2);
    assert_eq!(settings.run.aspirate_settle, Duration::from_secs(45));
    assert_eq!(settings.run.dispense_settle, Duration::from_secs(30));
    assert_eq!(settings.technique.blowout_count, 4);
    assert_eq!(settings.technique.purge_volume_ul, 1000.0);
    assert_eq!(settings.deck.tip_rack.slot, 3);
    assert_eq!(settings.run.geometry.height_mm, 12.0);
    assert_eq!(settings.run.geometry.reference_volume_ml, 5.0);
    assert_eq!(settings.deck.plate.slot, 4);
    assert_eq!(settings.deck.plate.kind, "amdm_6_15g_plasticjars");
}

#[test]
#[serial]
fn test_env_overrides_file() {
    let file = write_config("[run]\nsample_count = 1\n");
    std::env::set_var("VISCO_RUN__SAMPLE_COUNT", "2");
    std::env::set_var("VISCO_APPLICATION__LOG_LEVEL", "debug");

    let result = Settings::load_from(file.path());

    std::env::remove_var("VISCO_RUN__SAMPLE_COUNT");
    std::env::remove_var("VISCO_APPLICATION__LOG_LEVEL");

    let settings = result.expect("config loads");
    assert_eq!(settings.run.sample_count, 2);
    assert_eq!(settings.application.log_level, "debug");
}

#[test]
#[serial]
fn test_invalid_file_rejected() {
    let file = write_config("[run]\naspiration_duration = \"10s\"\ndispense_duration = \"12s\"\n");
    let err = Settings::load_from(file.path()).expect_err("mismatched durations");
    assert!(err.is_configuration());
    assert!(err.to_string().contains("must match"));

    let file = write_config("[application]\nlog_level = \"loud\"\n");
    assert!(Settings::load_from(file.path()).is_err());

    let file = write_config("[run]\nflow_rates = \"fast\"\n");
    assert!(Settings::load_from(file.path()).is_err());
}

#[test]
#[serial]
fn test_missing_file_rejected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = Settings::load_from(dir.path().join("absent.toml")).expect_err("missing file");
    assert!(err.to_string().contains("not found"));
}

#[test]
#[serial]
fn test_default_config_round_trips_through_toml() {
    let text = Settings::default().to_toml().expect("renders");
    let file = write_config(&text);
    assert_eq!(
        Settings::load_from(file.path()).expect("reloads"),
        Settings::default()
    );
}
