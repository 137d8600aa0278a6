//! SDP offer/answer exchange with the realtime API.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};
use url::Url;

use super::base::{RealtimeConfig, TransportError};
use super::token::EphemeralToken;
use crate::core::errors::{SessionError, SessionResult};

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Posts SDP offers to the signaling endpoint.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    http: reqwest::Client,
    call_url: Url,
    timeout: Duration,
}

impl SignalingClient {
    pub fn new(http: reqwest::Client, config: &RealtimeConfig) -> Result<Self, url::ParseError> {
        let mut call_url = Url::parse(&config.call_url)?;
        call_url.query_pairs_mut().append_pair("model", &config.model);
        Ok(Self {
            http,
            call_url,
            timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    /// Full signaling URL including the `model` query parameter.
    pub fn call_url(&self) -> &Url {
        &self.call_url
    }

    /// Send `offer_sdp` and return the SDP answer.
    pub async fn exchange(&self, offer_sdp: &str, token: &EphemeralToken) -> SessionResult<String> {
        debug!(url = %self.call_url, offer_len = offer_sdp.len(), "Posting SDP offer");

        let response = self
            .http
            .post(self.call_url.clone())
            .header(AUTHORIZATION, format!("Bearer {}", token.value()))
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string())
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Signaling endpoint rejected the offer");
            return Err(SessionError::Signaling {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        if body.trim().is_empty() {
            return Err(TransportError::Negotiation("empty SDP answer".to_string()).into());
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_url_carries_model() {
        let config = RealtimeConfig {
            call_url: "https://api.example.com/v1/realtime/calls".into(),
            model: "gpt-realtime".into(),
            ..Default::default()
        };
        let client = SignalingClient::new(reqwest::Client::new(), &config).unwrap();
        assert_eq!(
            client.call_url().as_str(),
            "https://api.example.com/v1/realtime/calls?model=gpt-realtime"
        );
    }
}
