//! Endpoint URL validation
//!
//! The token and signaling endpoints carry bearer credentials, so they must be
//! HTTPS. Plain HTTP is accepted only for loopback hosts and only when the caller
//! explicitly allows insecure local endpoints (local development against a
//! backend on `localhost`).

use std::net::IpAddr;
use thiserror::Error;
use tracing::warn;
use url::{Host, Url};

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be HTTPS, got: {0}")]
    HttpsRequired(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("Plain HTTP is only allowed for loopback hosts, got: {0}")]
    InsecureRemoteHost(String),
}

/// Checks whether a URL host is a loopback address or `localhost`.
pub fn is_loopback_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Host::Ipv4(ip) => IpAddr::V4(*ip).is_loopback(),
        Host::Ipv6(ip) => IpAddr::V6(*ip).is_loopback(),
    }
}

/// Validates an endpoint URL and returns it parsed.
///
/// # Arguments
/// * `raw` - The URL to validate
/// * `allow_insecure_local` - Accept `http://` for loopback hosts
///
/// # Returns
/// * `Ok(Url)` - URL is usable
/// * `Err(UrlValidationError)` - URL failed validation
pub fn validate_endpoint_url(
    raw: &str,
    allow_insecure_local: bool,
) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw.trim())?;
    let host = url.host().ok_or(UrlValidationError::MissingHost)?;

    match url.scheme() {
        "https" => Ok(url),
        "http" if allow_insecure_local => {
            if is_loopback_host(&host) {
                warn!(url = %url, "Using insecure HTTP endpoint on loopback host");
                Ok(url)
            } else {
                Err(UrlValidationError::InsecureRemoteHost(host.to_string()))
            }
        }
        other => Err(UrlValidationError::HttpsRequired(other.to_string())),
    }
}
