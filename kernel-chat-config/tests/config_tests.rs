use std::fs;

use kernel_chat_config::{ClientConfig, ConfigError, LogLevel};
use tempfile::tempdir;

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let config = ClientConfig::load_from(&dir.path().join("config.yaml")).unwrap();
    assert_eq!(config, ClientConfig::default());
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        "wizard_mode: true\nrestrict: [newton]\ndefault_instance:\n  name: lab\nlog_level: debug\n",
    )
    .unwrap();

    let config = ClientConfig::load_from(&path).unwrap();
    assert!(config.wizard_mode);
    assert_eq!(config.restrict, vec!["newton".to_string()]);
    assert_eq!(config.default_instance.name, "lab");
    assert_eq!(config.default_instance.mode, "newton");
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.comm_target, "newton.comm");
}

#[test]
fn test_empty_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, "\n").unwrap();
    assert_eq!(ClientConfig::load_from(&path).unwrap(), ClientConfig::default());
}

#[test]
fn test_invalid_yaml_is_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, "wizard_mode: [not a bool\n").unwrap();
    let err = ClientConfig::load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_reserved_default_instance_fails_validation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, "default_instance:\n  name: \"<meta>\"\n").unwrap();
    let err = ClientConfig::load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn test_save_then_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.yaml");
    let config = ClientConfig {
        load_instances: true,
        instances_path: Some("/data/instances.json".to_string()),
        export_dir: Some(dir.path().join("exports")),
        ..Default::default()
    };

    config.save_to(&path).unwrap();
    assert!(!path.with_extension("yaml.tmp").exists());

    let loaded = ClientConfig::load_from(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(loaded.effective_export_dir(), dir.path().join("exports"));
}
