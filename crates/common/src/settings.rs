//! Configuration loading and validation.
//!
//! Settings come from a TOML document with environment overrides applied on top
//! (`SIGNET__SECTION__FIELD`), then checked with [`validator`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::constants::{
    DEFAULT_LOG_LEVEL, DEFAULT_ROTATION_PERIOD_SECS, DEFAULT_TRANSIT_MOUNT,
    DEFAULT_TRANSIT_TIMEOUT_MS, DEFAULT_VERIFICATION_KEY_TTL_SECS, ENV_PREFIX, ENV_SEPARATOR,
};
use crate::error::SignerError;
use crate::rotation::DEFAULT_ROTATION_INTERVAL;
use crate::signer::{KeyFamily, LocalConfig, RotationStrategy, Signer, TransitConfig};
use crate::storage::MemoryKeyStore;

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Logging {
    #[serde(default = "default_log_level")]
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Logging {
    /// Configured level, falling back to `info` for an unparseable value.
    #[must_use]
    pub fn level_filter(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::Info)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Rotation {
    /// Seconds between rotation attempts.
    #[serde(default = "default_rotation_interval_secs")]
    #[validate(range(min = 1, max = 86400))]
    pub interval_secs: u64,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            interval_secs: default_rotation_interval_secs(),
        }
    }
}

impl Rotation {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LocalSettings {
    #[serde(default)]
    pub storage: StorageKind,
    #[serde(default = "default_key_type")]
    pub key_type: KeyFamily,
    #[serde(default = "default_rotation_period_secs")]
    #[validate(range(min = 1, max = 31_536_000))]
    pub rotation_period_secs: u64,
    #[serde(default = "default_verification_key_ttl_secs")]
    #[validate(range(min = 1, max = 31_536_000))]
    pub verification_key_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TransitSettings {
    #[validate(url)]
    pub address: String,
    #[serde(default = "default_transit_mount")]
    #[validate(length(min = 1))]
    pub mount: String,
    #[validate(length(min = 1))]
    pub key: String,
    /// Sent as `X-Vault-Token`. Leave unset when a local agent authenticates requests.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_transit_timeout_ms")]
    #[validate(range(min = 1, max = 300_000))]
    pub timeout_ms: u64,
}

/// Which signer backend to run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignerSettings {
    Local(LocalSettings),
    Transit(TransitSettings),
}

impl Validate for SignerSettings {
    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            Self::Local(local) => local.validate(),
            Self::Transit(transit) => transit.validate(),
        }
    }
}

impl SignerSettings {
    /// Opens the configured signer.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Configuration`] for out of range durations, or the
    /// backend's error if a transit signer cannot connect.
    pub async fn open_signer(&self) -> Result<Arc<dyn Signer>, Report<SignerError>> {
        let signer = match self {
            Self::Local(local) => {
                let store = match local.storage {
                    StorageKind::Memory => Arc::new(MemoryKeyStore::new()),
                };
                log::info!("opening local signer ({} keys)", local.key_type);
                let mut config = LocalConfig::new(store);
                config.strategy = RotationStrategy {
                    family: local.key_type,
                    rotation_period: seconds(local.rotation_period_secs)?,
                    verification_key_ttl: seconds(local.verification_key_ttl_secs)?,
                };
                config.open()
            }
            Self::Transit(transit) => {
                log::info!("opening transit signer at {}", transit.address);
                TransitConfig {
                    address: transit.address.clone(),
                    mount: transit.mount.clone(),
                    key: transit.key.clone(),
                    token: transit.token.clone(),
                    timeout: Duration::from_millis(transit.timeout_ms),
                }
                .open()
                .await?
            }
        };

        Ok(Arc::from(signer))
    }
}

fn seconds(secs: u64) -> Result<chrono::Duration, Report<SignerError>> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| {
            Report::new(SignerError::Configuration {
                message: format!("duration out of range: {}s", secs),
            })
        })
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Settings {
    #[serde(default)]
    #[validate(nested)]
    pub logging: Logging,
    #[serde(default)]
    #[validate(nested)]
    pub rotation: Rotation,
    #[validate(nested)]
    pub signer: SignerSettings,
}

impl Settings {
    /// Parses settings from TOML, applying environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Configuration`] if the document cannot be parsed or does not
    /// match the settings schema.
    pub fn from_toml(toml_str: &str) -> Result<Self, Report<SignerError>> {
        let environment = Environment::default()
            .prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR);

        let toml = File::from_str(toml_str, FileFormat::Toml);
        let config = Config::builder()
            .add_source(toml)
            .add_source(environment)
            .build()
            .change_context(SignerError::Configuration {
                message: "Failed to build configuration".to_string(),
            })?;

        config
            .try_deserialize()
            .change_context(SignerError::Configuration {
                message: "Failed to deserialize configuration".to_string(),
            })
    }

    /// Reads, parses and validates the settings file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Configuration`] if the file cannot be read, parsed or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self, Report<SignerError>> {
        let toml_str = std::fs::read_to_string(path).change_context(SignerError::Configuration {
            message: format!("Failed to read settings file {}", path.display()),
        })?;

        let settings = Self::from_toml(&toml_str)?;
        settings
            .validate()
            .change_context(SignerError::Configuration {
                message: "Settings validation failed".to_string(),
            })?;

        Ok(settings)
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_rotation_interval_secs() -> u64 {
    DEFAULT_ROTATION_INTERVAL.as_secs()
}

fn default_key_type() -> KeyFamily {
    KeyFamily::Rsa2048
}

fn default_rotation_period_secs() -> u64 {
    DEFAULT_ROTATION_PERIOD_SECS
}

fn default_verification_key_ttl_secs() -> u64 {
    DEFAULT_VERIFICATION_KEY_TTL_SECS
}

fn default_transit_mount() -> String {
    DEFAULT_TRANSIT_MOUNT.to_string()
}

fn default_transit_timeout_ms() -> u64 {
    DEFAULT_TRANSIT_TIMEOUT_MS
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    level
        .parse::<LevelFilter>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_log_level"))
}
