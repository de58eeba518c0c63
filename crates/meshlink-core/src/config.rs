//! Stack configuration
//!
//! Configuration lives in a directory (by default `~/.meshlink`) holding a
//! `config.toml` and a `storage/` subdirectory. Values are layered with
//! figment: built-in defaults, then the TOML file, then `MESHLINK_`
//! environment variables (nested keys separated by `__`, for example
//! `MESHLINK_LINK__STALE_TIMEOUT_SECS=300`).
//!
//! If the directory has no `config.toml` yet, a default one is written so it
//! can be edited for the next run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::interface::InterfaceConfig;
use crate::{MeshError, Result};

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Name of the default config directory under the home directory
pub const DEFAULT_CONFIG_DIR_NAME: &str = ".meshlink";

const KNOWN_DESTINATIONS_FILE: &str = "known_destinations";
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ----------------------------------------------------------------------------
// Configuration Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Log level used when neither `RUST_LOG` nor `--verbose` is given
    pub log_level: String,

    /// Directory for persisted state; unset means nothing is persisted
    pub storage_dir: Option<PathBuf>,

    /// How often a client re-sends an unanswered path request
    pub path_request_interval_secs: u64,

    /// How long a packet receipt waits for a delivery proof
    pub receipt_timeout_secs: u64,

    pub link: LinkConfig,

    pub interfaces: Vec<InterfaceConfig>,

    /// Directory this configuration was loaded from
    #[serde(skip)]
    pub config_dir: Option<PathBuf>,
}

/// Link lifecycle timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// A link request without a proof after this long is abandoned
    pub establishment_timeout_secs: u64,
    /// Idle links send a keep-alive this often
    pub keepalive_interval_secs: u64,
    /// A link that hears nothing for this long is closed
    pub stale_timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            establishment_timeout_secs: 10,
            keepalive_interval_secs: 60,
            stale_timeout_secs: 180,
        }
    }
}

impl LinkConfig {
    pub fn establishment_timeout(&self) -> Duration {
        Duration::from_secs(self.establishment_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            storage_dir: None,
            path_request_interval_secs: 5,
            receipt_timeout_secs: 10,
            link: LinkConfig::default(),
            interfaces: vec![InterfaceConfig::default()],
            config_dir: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading
// ----------------------------------------------------------------------------

impl StackConfig {
    /// Configuration with the given interfaces and nothing persisted
    pub fn with_interfaces(interfaces: Vec<InterfaceConfig>) -> Self {
        Self {
            interfaces,
            ..Self::default()
        }
    }

    /// `~/.meshlink`
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(DEFAULT_CONFIG_DIR_NAME))
            .ok_or_else(|| MeshError::config("Could not determine the home directory"))
    }

    /// Load from `config_dir`, or the default directory when `None`
    pub fn load(config_dir: Option<&Path>) -> Result<Self> {
        let dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => Self::default_config_dir()?,
        };
        std::fs::create_dir_all(&dir)?;

        let file = dir.join(CONFIG_FILE_NAME);
        if !file.exists() {
            info!("Creating default configuration at {}", file.display());
            Self::default().save_to_file(&file)?;
        }

        let mut config = Self::load_from_file(&file)?;
        if config.storage_dir.is_none() {
            config.storage_dir = Some(dir.join("storage"));
        }
        config.config_dir = Some(dir);
        Ok(config)
    }

    /// Load a specific file layered over defaults and environment
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: StackConfig = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MESHLINK_").split("__"))
            .extract()
            .map_err(|e| {
                MeshError::config(format!(
                    "Failed to load {}: {}",
                    path.as_ref().display(),
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| MeshError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(MeshError::config(format!(
                "Unknown log level {:?}, expected one of {:?}",
                self.log_level, LOG_LEVELS
            )));
        }
        if self.interfaces.is_empty() {
            return Err(MeshError::config("At least one interface must be configured"));
        }
        if self.path_request_interval_secs == 0 || self.receipt_timeout_secs == 0 {
            return Err(MeshError::config("Intervals and timeouts must be greater than 0"));
        }
        let link = &self.link;
        if link.establishment_timeout_secs == 0
            || link.keepalive_interval_secs == 0
            || link.stale_timeout_secs == 0
        {
            return Err(MeshError::config("Link timeouts must be greater than 0"));
        }
        if link.stale_timeout_secs <= link.keepalive_interval_secs {
            return Err(MeshError::config(
                "Link stale timeout must be longer than the keep-alive interval",
            ));
        }
        Ok(())
    }

    pub fn path_request_interval(&self) -> Duration {
        Duration::from_secs(self.path_request_interval_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    /// Where known destinations are persisted, if storage is enabled
    pub fn known_destinations_path(&self) -> Option<PathBuf> {
        self.storage_dir
            .as_ref()
            .map(|dir| dir.join(KNOWN_DESTINATIONS_FILE))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn test_default_config_is_valid() {
        let config = StackConfig::default();
        config.validate().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.interfaces.len(), 1);
        assert!(config.known_destinations_path().is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = StackConfig::default();
        config.interfaces.clear();
        assert!(config.validate().is_err());

        let mut config = StackConfig::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = StackConfig::default();
        config.link.establishment_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = StackConfig::default();
        config.link.stale_timeout_secs = config.link.keepalive_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_creates_default_file_and_storage_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("alt");

        let config = StackConfig::load(Some(&config_dir)).unwrap();

        assert!(config_dir.join(CONFIG_FILE_NAME).exists());
        assert_eq!(config.config_dir.as_deref(), Some(config_dir.as_path()));
        assert_eq!(
            config.known_destinations_path(),
            Some(config_dir.join("storage").join("known_destinations"))
        );
    }

    #[test]
    fn test_load_reads_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &file,
            r#"
log_level = "debug"
path_request_interval_secs = 2

[link]
stale_timeout_secs = 90

[[interfaces]]
name = "lan"
listen = "127.0.0.1:4243"
forward = ["127.0.0.1:4242"]
"#,
        )
        .unwrap();

        let config = StackConfig::load(Some(dir.path())).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.path_request_interval_secs, 2);
        assert_eq!(config.link.stale_timeout_secs, 90);
        assert_eq!(config.link.keepalive_interval_secs, 60);
        assert_eq!(config.interfaces.len(), 1);
        assert_eq!(config.interfaces[0].name, "lan");
        assert_eq!(
            config.interfaces[0].forward,
            vec!["127.0.0.1:4242".parse::<SocketAddr>().unwrap()]
        );
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&file, "interfaces = []\n").unwrap();
        assert!(StackConfig::load_from_file(&file).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("saved.toml");

        let mut config = StackConfig::with_interfaces(vec![InterfaceConfig::new(
            "loop",
            "127.0.0.1:5000".parse().unwrap(),
            vec!["127.0.0.1:5001".parse().unwrap()],
        )]);
        config.receipt_timeout_secs = 3;
        config.save_to_file(&file).unwrap();

        let loaded = StackConfig::load_from_file(&file).unwrap();
        assert_eq!(loaded.receipt_timeout_secs, 3);
        assert_eq!(loaded.interfaces, config.interfaces);
    }
}
