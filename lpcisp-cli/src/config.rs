//! Configuration file support for lpcisp.
//!
//! Values are resolved with the following priority (highest first):
//! 1. Command-line arguments and environment variables (LPCISP_*)
//! 2. Local config file (./lpcisp.toml)
//! 3. Global config file (e.g. ~/.config/lpcisp/config.toml)
//! 4. Built-in defaults
//!
//! `--config <PATH>` replaces both files.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = "lpcisp.toml";

/// Serial connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial device (e.g., "/dev/ttyUSB0" or "COM3").
    pub device: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Read timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Boot loader handshake settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IspConfig {
    /// Crystal frequency reported to the boot ROM, in kHz.
    pub crystal_khz: Option<u32>,
    /// Number of synchronisation attempts.
    pub retries: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Handshake settings.
    #[serde(default)]
    pub isp: IspConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "lpcisp").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; values set in `other` win.
    fn merge(&mut self, other: Self) {
        let Self { connection, isp } = other;

        if connection.device.is_some() {
            self.connection.device = connection.device;
        }
        if connection.baud.is_some() {
            self.connection.baud = connection.baud;
        }
        if connection.timeout_ms.is_some() {
            self.connection.timeout_ms = connection.timeout_ms;
        }
        if isp.crystal_khz.is_some() {
            self.isp.crystal_khz = isp.crystal_khz;
        }
        if isp.retries.is_some() {
            self.isp.retries = isp.retries;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.device.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.connection.timeout_ms.is_none());
        assert!(config.isp.crystal_khz.is_none());
        assert!(config.isp.retries.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
device = "/dev/ttyUSB1"
baud = 57600
timeout_ms = 800

[isp]
crystal_khz = 24000
retries = 3
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.device.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.connection.baud, Some(57600));
        assert_eq!(config.connection.timeout_ms, Some(800));
        assert_eq!(config.isp.crystal_khz, Some(24000));
        assert_eq!(config.isp.retries, Some(3));
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: Config = toml::from_str("[isp]\nretries = 20\n").unwrap();
        assert!(config.connection.device.is_none());
        assert_eq!(config.isp.retries, Some(20));
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        assert!(toml::from_str::<Config>("[flash]\nverify = true\n").is_err());
    }

    #[test]
    fn test_merge_overrides_only_set_values() {
        let mut base = Config::default();
        base.connection.device = Some("/dev/ttyUSB0".to_string());
        base.connection.baud = Some(115_200);

        let mut other = Config::default();
        other.connection.baud = Some(9600);
        other.isp.crystal_khz = Some(12_000);

        base.merge(other);
        assert_eq!(base.connection.device.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.connection.baud, Some(9600));
        assert_eq!(base.isp.crystal_khz, Some(12_000));
    }

    #[test]
    fn test_merge_with_empty_keeps_values() {
        let mut base = Config::default();
        base.isp.retries = Some(5);
        base.merge(Config::default());
        assert_eq!(base.isp.retries, Some(5));
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lpcisp.toml");
        fs::write(&path, "[connection]\ndevice = \"COM3\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.device.as_deref(), Some("COM3"));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[connection\ndevice = ").unwrap();

        assert_eq!(Config::load_from_path(&path), Config::default());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_global_config_path_names_lpcisp() {
        if let Some(p) = Config::global_config_path() {
            let p = p.to_string_lossy();
            assert!(p.contains("lpcisp"));
            assert!(p.ends_with("config.toml"));
        }
    }
}
