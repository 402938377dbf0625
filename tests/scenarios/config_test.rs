//! Configuration loading and validation tests.

use lockstep_common::config::{ConfigError, SimConfig};
use lockstep_common::error::LockstepError;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
horizon = "500ms"

[[tasks]]
id = "slow"
frequency_hz = 50

[[tasks]]
id = "fast"
frequency_hz = 200

[pacing]
idle = "spin"
"#
    )
    .unwrap();

    let config = SimConfig::from_file(file.path()).unwrap();
    assert_eq!(config.horizon, Duration::from_millis(500));
    assert_eq!(config.tasks.len(), 2);
    assert_eq!(config.tasks[1].id, "fast");

    let rates = config.validate().unwrap();
    assert_eq!(rates.fastest_hz, 200);
    assert_eq!(rates.rate_master, 1);
}

#[test]
fn test_missing_file_is_io_error() {
    let err = SimConfig::from_file(std::path::Path::new("/nonexistent/lockstep.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let err = SimConfig::from_toml("horizon = [not toml").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_roundtrip_through_toml() {
    let config = SimConfig::default();
    let rendered = config.to_toml().unwrap();
    let parsed = SimConfig::from_toml(&rendered).unwrap();

    assert_eq!(parsed.horizon, config.horizon);
    assert_eq!(parsed.tasks, config.tasks);
    assert_eq!(parsed.pacing, config.pacing);
}

#[test]
fn test_duplicate_id_fails_validation() {
    let mut config = SimConfig::default();
    config.tasks[0].id = config.tasks[1].id.clone();

    let err = config.validate().unwrap_err();
    assert!(matches!(err, LockstepError::Config(_)));
}

#[test]
fn test_non_harmonic_config_fails_validation() {
    let mut config = SimConfig::default();
    config.tasks[1].frequency_hz = 150;

    let err = config.validate().unwrap_err();
    assert!(matches!(err, LockstepError::NonHarmonicRate { .. }));
}
