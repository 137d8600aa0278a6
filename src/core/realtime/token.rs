//! Ephemeral token acquisition and tenant resolution.
//!
//! The backend mints a short-lived client secret for the realtime API. The
//! secret is accepted from any of the response shapes the backend has used:
//! a top-level `value`, a nested `client_secret.value`, or a bare `token`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::ACCEPT;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::base::RealtimeConfig;

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Errors from the token endpoint.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The configured endpoint could not be parsed
    #[error("Invalid token endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request did not complete
    #[error("Token request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("Token endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response carried no client secret
    #[error("Token response did not contain a client secret")]
    Missing,
}

/// Result type for token operations.
pub type TokenResult<T> = Result<T, TokenError>;

/// Short-lived client secret for the realtime API.
#[derive(Clone, PartialEq, Eq)]
pub struct EphemeralToken {
    value: String,
    expires_at: Option<i64>,
}

impl EphemeralToken {
    pub fn new(value: impl Into<String>, expires_at: Option<i64>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Extract the secret from a token endpoint response body.
    pub fn from_response(body: &Value) -> Option<Self> {
        let value = [
            body.get("value"),
            body.pointer("/client_secret/value"),
            body.get("token"),
        ]
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|v| !v.is_empty())?;

        let expires_at = body
            .get("expires_at")
            .or_else(|| body.pointer("/client_secret/expires_at"))
            .and_then(Value::as_i64);

        Some(Self::new(value, expires_at))
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Unix timestamp (seconds) at which the secret expires, when known.
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// Printable form that hides the middle of the secret.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.value.chars().collect();
        if chars.len() <= 8 {
            return "****".to_string();
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}…{tail}")
    }
}

impl fmt::Debug for EphemeralToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralToken")
            .field("value", &self.masked())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// HTTP client for the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    token_url: Url,
    tenant_param: String,
    timeout: Duration,
}

impl TokenClient {
    pub fn new(http: reqwest::Client, config: &RealtimeConfig) -> TokenResult<Self> {
        Ok(Self {
            http,
            token_url: Url::parse(&config.token_url)?,
            tenant_param: config.tenant_query_param.clone(),
            timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Request a fresh ephemeral token, scoped to `tenant` when given.
    pub async fn fetch(&self, tenant: Option<&str>) -> TokenResult<EphemeralToken> {
        let mut url = self.token_url.clone();
        if let Some(tenant) = tenant.map(str::trim).filter(|t| !t.is_empty()) {
            url.query_pairs_mut().append_pair(&self.tenant_param, tenant);
        }

        debug!(url = %self.token_url, tenant = ?tenant, "Requesting ephemeral realtime token");

        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Token endpoint returned an error");
            return Err(TokenError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let json: Value = serde_json::from_str(&body).map_err(|_| TokenError::Missing)?;
        EphemeralToken::from_response(&json).ok_or(TokenError::Missing)
    }
}

// =============================================================================
// Tenant resolution
// =============================================================================

/// Best-effort lookup of the active tenant.
pub trait TenantResolver: Send + Sync {
    fn active_tenant(&self) -> Option<String>;
}

/// Resolver that never yields a tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTenant;

impl TenantResolver for NoTenant {
    fn active_tenant(&self) -> Option<String> {
        None
    }
}

/// Resolver returning a fixed tenant.
#[derive(Debug, Clone)]
pub struct StaticTenant(pub String);

impl TenantResolver for StaticTenant {
    fn active_tenant(&self) -> Option<String> {
        let tenant = self.0.trim();
        (!tenant.is_empty()).then(|| tenant.to_string())
    }
}

/// Resolver reading the persisted tenant selection from a file.
///
/// The file may hold the bare id, a JSON string, or a JSON object with a
/// `tenant_id` (or `id`) field. Read failures yield `None`.
#[derive(Debug, Clone)]
pub struct StoredTenantResolver {
    path: PathBuf,
}

impl StoredTenantResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TenantResolver for StoredTenantResolver {
    fn active_tenant(&self) -> Option<String> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "No stored tenant");
                return None;
            }
        };
        parse_stored_tenant(&raw)
    }
}

fn parse_stored_tenant(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let tenant = match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(s)) => s,
        Ok(Value::Object(map)) => map
            .get("tenant_id")
            .or_else(|| map.get("id"))
            .and_then(Value::as_str)?
            .to_string(),
        Ok(Value::Null) => return None,
        _ => raw.to_string(),
    };
    let tenant = tenant.trim();
    (!tenant.is_empty()).then(|| tenant.to_string())
}
