//! Environment variable overrides.
//!
//! Variables are read through a lookup function so callers (and tests) can
//! supply a map instead of the process environment.

use std::path::PathBuf;
use std::str::FromStr;

use super::{ConfigError, VoiceConfig};
use crate::core::telemetry::is_truthy;

pub const TOKEN_URL: &str = "AISHA_TOKEN_URL";
pub const CALL_URL: &str = "AISHA_CALL_URL";
pub const REALTIME_MODEL: &str = "AISHA_REALTIME_MODEL";
pub const TENANT_ID: &str = "AISHA_TENANT_ID";
pub const TENANT_FILE: &str = "AISHA_TENANT_FILE";
pub const USER_ID: &str = "AISHA_USER_ID";
pub const TELEMETRY_DEBUG: &str = "AISHA_TELEMETRY_DEBUG";
pub const TELEMETRY_CAPACITY: &str = "AISHA_TELEMETRY_CAPACITY";
pub const ALLOW_INSECURE_ENDPOINTS: &str = "AISHA_ALLOW_INSECURE_ENDPOINTS";

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        None => Ok(None),
    }
}

/// Apply every recognised variable on top of `config`.
pub(super) fn apply_env<F>(config: &mut VoiceConfig, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = non_empty(lookup, TOKEN_URL) {
        config.realtime.token_url = url;
    }
    if let Some(url) = non_empty(lookup, CALL_URL) {
        config.realtime.call_url = url;
    }
    if let Some(model) = non_empty(lookup, REALTIME_MODEL) {
        config.realtime.model = model;
    }
    if let Some(tenant) = non_empty(lookup, TENANT_ID) {
        config.tenant_id = Some(tenant);
    }
    if let Some(path) = non_empty(lookup, TENANT_FILE) {
        config.tenant_file = Some(PathBuf::from(path));
    }
    if let Some(user) = non_empty(lookup, USER_ID) {
        config.user_id = Some(user);
    }
    if let Some(debug) = non_empty(lookup, TELEMETRY_DEBUG) {
        config.telemetry.debug = is_truthy(&debug);
    }
    if let Some(capacity) = parse::<usize, F>(lookup, TELEMETRY_CAPACITY)? {
        config.telemetry.capacity = capacity;
    }
    if let Some(allow) = non_empty(lookup, ALLOW_INSECURE_ENDPOINTS) {
        config.allow_insecure_endpoints = is_truthy(&allow);
    }
    Ok(())
}
