//! Integration tests for configuration files
//!
//! Covers loading from disk, saving, defaults for missing sections and
//! rejection of invalid values.

use bridge::config::{BridgeConfig, Overrides};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

const FULL_CONFIG: &str = r#"
[server]
listen = "127.0.0.1:6000"
log_level = "debug"
read_timeout_secs = 30

[usb]
serial = "0123456789ABCDEF"
check_device = true
transfer_timeout_ms = 2000
response_capacity = 512
acquire_retry_delay_ms = 250
"#;

#[test]
fn test_load_full_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bridge.toml");
    fs::write(&path, FULL_CONFIG).unwrap();

    let config = BridgeConfig::load(Some(path)).unwrap();
    assert_eq!(config.listen_addr(), "127.0.0.1:6000");
    assert_eq!(config.server.log_level, "debug");
    assert_eq!(config.read_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.usb.serial.as_deref(), Some("0123456789ABCDEF"));
    assert!(config.usb.check_device);
    assert_eq!(config.usb.transfer_timeout(), Duration::from_secs(2));
    assert_eq!(config.usb.response_capacity, 512);
    assert_eq!(config.usb.acquire_retry_delay(), Duration::from_millis(250));
}

#[test]
fn test_load_empty_file_gives_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bridge.toml");
    fs::write(&path, "").unwrap();

    let config = BridgeConfig::load(Some(path)).unwrap();
    assert_eq!(config, BridgeConfig::default());
    assert_eq!(config.listen_addr(), "0.0.0.0:5554");
}

#[test]
fn test_save_then_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("bridge.toml");

    let mut config = BridgeConfig::default();
    config.usb.serial = Some("ABC".to_string());
    config.server.read_timeout_secs = Some(10);
    config.save(&path).unwrap();

    let loaded = BridgeConfig::load(Some(path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let err = BridgeConfig::load(Some(dir.path().join("absent.toml"))).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read config file"));
}

#[test]
fn test_invalid_values_rejected() {
    let cases = [
        "[server]\nlog_level = \"loud\"\n",
        "[server]\nlisten = \"nonsense\"\n",
        "[usb]\ntransfer_timeout_ms = 0\n",
        "[usb]\nresponse_capacity = 0\n",
        "[usb]\nserial = \"\"\n",
        "[usb]\nresponse_capacity = \"big\"\n",
    ];

    let dir = tempdir().unwrap();
    for (i, case) in cases.iter().enumerate() {
        let path = dir.path().join(format!("case{}.toml", i));
        fs::write(&path, case).unwrap();
        assert!(
            BridgeConfig::load(Some(path)).is_err(),
            "accepted invalid config: {}",
            case
        );
    }
}

#[test]
fn test_cli_overrides_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bridge.toml");
    fs::write(&path, FULL_CONFIG).unwrap();

    let mut config = BridgeConfig::load(Some(path)).unwrap();
    config.apply(Overrides {
        listen: Some(":7000".to_string()),
        serial: None,
        check: false,
        log_level: None,
    });

    assert_eq!(config.listen_addr(), "0.0.0.0:7000");
    // Untouched values keep the file's settings
    assert_eq!(config.usb.serial.as_deref(), Some("0123456789ABCDEF"));
    assert!(config.usb.check_device);
    assert!(config.validate().is_ok());
}

#[test]
fn test_malformed_search_path_file_is_an_error() {
    let dir = tempdir().unwrap();
    let user = dir.path().join("user.toml");
    let system = dir.path().join("system.toml");
    // Unquoted listen address is not valid TOML
    fs::write(
        &user,
        "[server]\nlisten = 127.0.0.1:6000\n[usb]\nserial = \"ONLYTHISONE\"\n",
    )
    .unwrap();
    fs::write(&system, FULL_CONFIG).unwrap();

    let err = BridgeConfig::load_first_existing(&[user, system]).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn test_invalid_search_path_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bridge.toml");
    fs::write(&path, "[server]\nlog_level = \"loud\"\n").unwrap();

    assert!(BridgeConfig::load_first_existing(&[path]).is_err());
}

#[test]
fn test_no_search_path_file_gives_defaults() {
    let dir = tempdir().unwrap();
    let candidates = [dir.path().join("user.toml"), dir.path().join("system.toml")];

    let config = BridgeConfig::load_first_existing(&candidates).unwrap();
    assert_eq!(config, BridgeConfig::default());
}

#[test]
fn test_first_existing_search_path_wins() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("user.toml");
    let system = dir.path().join("system.toml");
    fs::write(&system, FULL_CONFIG).unwrap();

    let config = BridgeConfig::load_first_existing(&[missing, system]).unwrap();
    assert_eq!(config.usb.serial.as_deref(), Some("0123456789ABCDEF"));
    assert_eq!(config.listen_addr(), "127.0.0.1:6000");
}
