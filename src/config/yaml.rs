use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// realtime:
///   token_url: "https://crm.example.com/api/ai/realtime-token"
///   call_url: "https://api.openai.com/v1/realtime/calls"
///   model: "gpt-4o-realtime-preview"
///   tenant_query_param: "tenant_id"
///   data_channel_label: "oai-events"
///   request_timeout_ms: 15000
///
/// wake_word:
///   wake_phrases: ["hey aisha", "ok aisha"]
///   end_phrases: ["thanks aisha"]
///   language: "en-US"
///   cooldown_ms: 2000
///   auto_sleep_ms: 30000
///
/// voice:
///   turn_taking_delay_ms: 400
///
/// telemetry:
///   capacity: 60
///   max_string_len: 256
///   debug: false
///
/// tenant:
///   id: "tenant-a"
///   file: "/var/lib/aisha/selected-tenant"
///   user_id: "user-42"
///
/// security:
///   allow_insecure_endpoints: false
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub realtime: Option<RealtimeYaml>,
    pub wake_word: Option<WakeWordYaml>,
    pub voice: Option<VoiceYaml>,
    pub telemetry: Option<TelemetryYaml>,
    pub tenant: Option<TenantYaml>,
    pub security: Option<SecurityYaml>,
}

/// Realtime endpoint configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub token_url: Option<String>,
    pub call_url: Option<String>,
    pub model: Option<String>,
    pub tenant_query_param: Option<String>,
    pub data_channel_label: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

/// Wake word configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WakeWordYaml {
    pub wake_phrases: Option<Vec<String>>,
    pub end_phrases: Option<Vec<String>>,
    pub language: Option<String>,
    pub max_alternatives: Option<u32>,
    pub cooldown_ms: Option<u64>,
    pub end_settle_ms: Option<u64>,
    pub auto_sleep_ms: Option<u64>,
    pub restart_delay_ms: Option<u64>,
    pub network_retry_delay_ms: Option<u64>,
}

/// Voice coordinator configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VoiceYaml {
    pub turn_taking_delay_ms: Option<u64>,
}

/// Telemetry configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelemetryYaml {
    pub capacity: Option<usize>,
    pub max_string_len: Option<usize>,
    pub debug: Option<bool>,
}

/// Tenant and user identity from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TenantYaml {
    pub id: Option<String>,
    pub file: Option<PathBuf>,
    pub user_id: Option<String>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub allow_insecure_endpoints: Option<bool>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}
