//! Configuration module for the AiSHA voice core
//!
//! This module handles configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use aisha_voice::config::VoiceConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = VoiceConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config = VoiceConfig::from_file(Path::new("aisha-voice.yaml"))?;
//!
//! println!("Token endpoint: {}", config.realtime.token_url);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub mod env;
mod yaml;

pub use yaml::{
    RealtimeYaml, SecurityYaml, TelemetryYaml, TenantYaml, VoiceYaml, WakeWordYaml, YamlConfig,
};

use crate::core::realtime::{
    NoTenant, RealtimeConfig, StaticTenant, StoredTenantResolver, TenantResolver,
};
use crate::core::telemetry::TelemetryConfig;
use crate::core::voice::CoordinatorConfig;
use crate::core::wake_word::WakeWordConfig;
use crate::utils::url_validation::{UrlValidationError, validate_endpoint_url};

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid endpoint {key}: {source}")]
    InvalidEndpoint {
        key: &'static str,
        #[source]
        source: UrlValidationError,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Voice core configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VoiceConfig {
    pub realtime: RealtimeConfig,
    pub wake_word: WakeWordConfig,
    pub voice: CoordinatorConfig,
    pub telemetry: TelemetryConfig,

    /// Fixed tenant for token requests; wins over `tenant_file`
    pub tenant_id: Option<String>,
    /// File holding the persisted tenant selection
    pub tenant_file: Option<PathBuf>,
    /// User identifier attached to telemetry context
    pub user_id: Option<String>,

    /// Accept plain HTTP endpoints on loopback hosts (local development)
    pub allow_insecure_endpoints: bool,
}

impl VoiceConfig {
    /// Load configuration from the process environment
    ///
    /// Note: the .env file is loaded in main.rs at application startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from a custom variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        env::apply_env(&mut config, &lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_file_with_lookup(path, |key| std::env::var(key).ok())
    }

    /// Same as [`VoiceConfig::from_file`] with a custom variable lookup
    pub fn from_file_with_lookup<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let yaml = YamlConfig::from_file(path)?;
        let mut config = Self::default();
        env::apply_env(&mut config, &lookup)?;
        config.apply_yaml(yaml);
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(realtime) = yaml.realtime {
            let target = &mut self.realtime;
            if let Some(v) = realtime.token_url {
                target.token_url = v;
            }
            if let Some(v) = realtime.call_url {
                target.call_url = v;
            }
            if let Some(v) = realtime.model {
                target.model = v;
            }
            if let Some(v) = realtime.tenant_query_param {
                target.tenant_query_param = v;
            }
            if let Some(v) = realtime.data_channel_label {
                target.data_channel_label = v;
            }
            if let Some(v) = realtime.request_timeout_ms {
                target.request_timeout_ms = v;
            }
        }

        if let Some(wake) = yaml.wake_word {
            let target = &mut self.wake_word;
            if let Some(v) = wake.wake_phrases {
                target.wake_phrases = v;
            }
            if let Some(v) = wake.end_phrases {
                target.end_phrases = v;
            }
            if let Some(v) = wake.language {
                target.language = v;
            }
            if let Some(v) = wake.max_alternatives {
                target.max_alternatives = v;
            }
            if let Some(ms) = wake.cooldown_ms {
                target.cooldown = Duration::from_millis(ms);
            }
            if let Some(ms) = wake.end_settle_ms {
                target.end_settle = Duration::from_millis(ms);
            }
            if let Some(ms) = wake.auto_sleep_ms {
                target.auto_sleep = Duration::from_millis(ms);
            }
            if let Some(ms) = wake.restart_delay_ms {
                target.restart_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = wake.network_retry_delay_ms {
                target.network_retry_delay = Duration::from_millis(ms);
            }
        }

        if let Some(ms) = yaml.voice.and_then(|v| v.turn_taking_delay_ms) {
            self.voice.turn_taking_delay = Duration::from_millis(ms);
        }

        if let Some(telemetry) = yaml.telemetry {
            if let Some(v) = telemetry.capacity {
                self.telemetry.capacity = v;
            }
            if let Some(v) = telemetry.max_string_len {
                self.telemetry.max_string_len = v;
            }
            if let Some(v) = telemetry.debug {
                self.telemetry.debug = v;
            }
        }

        if let Some(tenant) = yaml.tenant {
            if tenant.id.is_some() {
                self.tenant_id = tenant.id;
            }
            if tenant.file.is_some() {
                self.tenant_file = tenant.file;
            }
            if tenant.user_id.is_some() {
                self.user_id = tenant.user_id;
            }
        }

        if let Some(v) = yaml.security.and_then(|s| s.allow_insecure_endpoints) {
            self.allow_insecure_endpoints = v;
        }
    }

    /// Validate the merged configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint_url(&self.realtime.token_url, self.allow_insecure_endpoints).map_err(
            |source| ConfigError::InvalidEndpoint {
                key: "realtime.token_url",
                source,
            },
        )?;
        validate_endpoint_url(&self.realtime.call_url, self.allow_insecure_endpoints).map_err(
            |source| ConfigError::InvalidEndpoint {
                key: "realtime.call_url",
                source,
            },
        )?;

        if self.realtime.model.trim().is_empty() {
            return Err(ConfigError::Invalid("realtime.model must not be empty".into()));
        }
        if self.realtime.data_channel_label.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "realtime.data_channel_label must not be empty".into(),
            ));
        }
        if self.realtime.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "realtime.request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.telemetry.capacity == 0 {
            return Err(ConfigError::Invalid(
                "telemetry.capacity must be greater than zero".into(),
            ));
        }
        if self.wake_word.wake_phrases.iter().all(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "wake_word.wake_phrases must contain at least one phrase".into(),
            ));
        }
        Ok(())
    }

    /// Tenant resolver for token requests
    ///
    /// A fixed `tenant_id` wins, then the persisted selection in `tenant_file`.
    pub fn tenant_resolver(&self) -> Arc<dyn TenantResolver> {
        if let Some(tenant) = &self.tenant_id {
            return Arc::new(StaticTenant(tenant.clone()));
        }
        match &self.tenant_file {
            Some(path) => Arc::new(StoredTenantResolver::new(path)),
            None => Arc::new(NoTenant),
        }
    }
}
