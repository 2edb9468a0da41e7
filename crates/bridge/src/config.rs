//! Bridge configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// `host:port` to listen on; a bare `:port` means all interfaces
    #[serde(default = "ServerSettings::default_listen")]
    pub listen: String,
    #[serde(default = "ServerSettings::default_log_level")]
    pub log_level: String,
    /// Per-read network timeout; unset means wait forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_secs: Option<u64>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
            log_level: Self::default_log_level(),
            read_timeout_secs: None,
        }
    }
}

impl ServerSettings {
    fn default_listen() -> String {
        ":5554".to_string()
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Only accept the device with this serial number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Open and claim the device once before serving
    #[serde(default)]
    pub check_device: bool,
    #[serde(default = "UsbSettings::default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,
    /// Size of the buffer for the single bulk read per request
    #[serde(default = "UsbSettings::default_response_capacity")]
    pub response_capacity: usize,
    /// Pause after a failed device acquisition before dropping the client
    #[serde(default = "UsbSettings::default_acquire_retry_delay_ms")]
    pub acquire_retry_delay_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            serial: None,
            check_device: false,
            transfer_timeout_ms: Self::default_transfer_timeout_ms(),
            response_capacity: Self::default_response_capacity(),
            acquire_retry_delay_ms: Self::default_acquire_retry_delay_ms(),
        }
    }
}

impl UsbSettings {
    fn default_transfer_timeout_ms() -> u64 {
        5000
    }

    fn default_response_capacity() -> usize {
        256
    }

    fn default_acquire_retry_delay_ms() -> u64 {
        1000
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn acquire_retry_delay(&self) -> Duration {
        Duration::from_millis(self.acquire_retry_delay_ms)
    }
}

/// Values given on the command line
///
/// Anything set here wins over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub serial: Option<String>,
    pub check: bool,
    pub log_level: Option<String>,
}

impl BridgeConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path, the standard locations are tried in order and the
    /// first existing file wins; finding none is an error.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            Self::search_paths()
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        Self::load_from(&config_path)
    }

    /// Load and validate one configuration file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: BridgeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load the first existing file among `candidates`
    ///
    /// Defaults are used only when none of them exists. A file that exists
    /// but cannot be read, parsed or validated is an error, so a broken
    /// file never silently drops settings such as the serial filter.
    pub fn load_first_existing(candidates: &[PathBuf]) -> Result<Self> {
        match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from the standard locations, or defaults if none exist
    pub fn load_or_default() -> Result<Self> {
        Self::load_first_existing(&Self::search_paths())
    }

    /// Standard configuration locations, in lookup order
    pub fn search_paths() -> Vec<PathBuf> {
        vec![
            Self::default_path(),
            PathBuf::from("/etc/fastboot-bridge/bridge.toml"),
        ]
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("fastboot-bridge").join("bridge.toml")
        } else {
            PathBuf::from(".config/fastboot-bridge/bridge.toml")
        }
    }

    /// Apply command line values on top of the loaded configuration
    ///
    /// An empty serial means "any device", same as not passing one.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(listen) = overrides.listen {
            self.server.listen = listen;
        }
        if let Some(serial) = overrides.serial {
            self.usb.serial = Some(serial).filter(|s| !s.is_empty());
        }
        if overrides.check {
            self.usb.check_device = true;
        }
        if let Some(level) = overrides.log_level {
            self.server.log_level = level;
        }
    }

    /// Listen address with a bare `:port` expanded to all interfaces
    pub fn listen_addr(&self) -> String {
        normalize_listen(&self.server.listen)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.server.read_timeout_secs.map(Duration::from_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        validate_listen(&self.server.listen)?;

        if self.server.read_timeout_secs == Some(0) {
            return Err(anyhow!("read_timeout_secs must be greater than zero"));
        }

        if self.usb.transfer_timeout_ms == 0 {
            return Err(anyhow!("transfer_timeout_ms must be greater than zero"));
        }

        if self.usb.response_capacity == 0 {
            return Err(anyhow!("response_capacity must be greater than zero"));
        }

        if self.usb.serial.as_deref() == Some("") {
            return Err(anyhow!("Empty serial number, omit it to accept any device"));
        }

        Ok(())
    }
}

/// Expand `:port` to `0.0.0.0:port`
pub fn normalize_listen(listen: &str) -> String {
    if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    }
}

/// Check that a listen address has the `host:port` shape
fn validate_listen(listen: &str) -> Result<()> {
    let (_, port) = listen
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Invalid listen address '{}', expected host:port", listen))?;

    port.parse::<u16>()
        .map_err(|_| anyhow!("Invalid port in listen address '{}'", listen))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.server.listen, ":5554");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.server.read_timeout_secs, None);
        assert_eq!(config.usb.serial, None);
        assert!(!config.usb.check_device);
        assert_eq!(config.usb.transfer_timeout(), Duration::from_secs(5));
        assert_eq!(config.usb.response_capacity, 256);
        assert_eq!(config.usb.acquire_retry_delay(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_normalize_listen() {
        assert_eq!(normalize_listen(":5554"), "0.0.0.0:5554");
        assert_eq!(normalize_listen("127.0.0.1:9000"), "127.0.0.1:9000");
        assert_eq!(normalize_listen("[::1]:5554"), "[::1]:5554");
    }

    #[test]
    fn test_validate_listen() {
        assert!(validate_listen(":5554").is_ok());
        assert!(validate_listen("localhost:5554").is_ok());
        assert!(validate_listen("[::1]:5554").is_ok());
        assert!(validate_listen("5554").is_err());
        assert!(validate_listen("host:").is_err());
        assert!(validate_listen("host:99999").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = BridgeConfig::default();
        config.usb.transfer_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.usb.response_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.server.read_timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = BridgeConfig::default();
        config.server.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.server.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_win() {
        let mut config = BridgeConfig::default();
        config.usb.serial = Some("FROMFILE".to_string());

        config.apply(Overrides {
            listen: Some("127.0.0.1:7000".to_string()),
            serial: Some("CLI123".to_string()),
            check: true,
            log_level: Some("debug".to_string()),
        });

        assert_eq!(config.listen_addr(), "127.0.0.1:7000");
        assert_eq!(config.usb.serial.as_deref(), Some("CLI123"));
        assert!(config.usb.check_device);
        assert_eq!(config.server.log_level, "debug");
    }

    #[test]
    fn test_empty_serial_override_means_any_device() {
        let mut config = BridgeConfig::default();
        config.apply(Overrides {
            serial: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(config.usb.serial, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [usb]
            serial = "0123456789"
            "#,
        )
        .unwrap();

        assert_eq!(config.server, ServerSettings::default());
        assert_eq!(config.usb.serial.as_deref(), Some("0123456789"));
        assert_eq!(config.usb.response_capacity, 256);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = BridgeConfig::default();
        config.server.read_timeout_secs = Some(30);
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: BridgeConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
    }
}
