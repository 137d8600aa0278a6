//! Error taxonomy for the realtime voice layer.
//!
//! Low-level failures (token endpoint problems, media permission errors,
//! transport and data channel failures) are mapped onto a small, stable set of
//! user-facing [`ErrorCode`]s. Each code carries a fixed message, a remediation
//! hint and optional suggestions so the host UI never has to interpret raw
//! errors.
//!
//! Classification is idempotent: [`SessionError::into_classified`] stamps the
//! details onto the error value, and classifying a stamped error returns the very
//! same `Arc<ErrorDetails>`.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::core::realtime::{ConnectionState, TokenError, TransportError};

/// DOM-style error names reported by media capture when permission is refused.
pub const PERMISSION_DENIED_NAMES: &[&str] =
    &["NotAllowedError", "SecurityError", "PermissionDeniedError"];

/// DOM-style error names reported when no usable capture device exists.
pub const DEVICE_MISSING_NAMES: &[&str] =
    &["NotFoundError", "DevicesNotFoundError", "OverconstrainedError"];

// =============================================================================
// Codes and details
// =============================================================================

/// Stable, user-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MicDenied,
    MicNotFound,
    TokenRequestFailed,
    TokenMissing,
    ConnectionFailed,
    DatachannelError,
    ChannelNotReady,
    General,
}

struct TaxonomyEntry {
    message: &'static str,
    hint: &'static str,
    suggestions: &'static [&'static str],
}

impl ErrorCode {
    /// Every known code, in table order.
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::MicDenied,
        ErrorCode::MicNotFound,
        ErrorCode::TokenRequestFailed,
        ErrorCode::TokenMissing,
        ErrorCode::ConnectionFailed,
        ErrorCode::DatachannelError,
        ErrorCode::ChannelNotReady,
        ErrorCode::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MicDenied => "mic_denied",
            ErrorCode::MicNotFound => "mic_not_found",
            ErrorCode::TokenRequestFailed => "token_request_failed",
            ErrorCode::TokenMissing => "token_missing",
            ErrorCode::ConnectionFailed => "connection_failed",
            ErrorCode::DatachannelError => "datachannel_error",
            ErrorCode::ChannelNotReady => "channel_not_ready",
            ErrorCode::General => "general",
        }
    }

    fn entry(&self) -> TaxonomyEntry {
        match self {
            ErrorCode::MicDenied => TaxonomyEntry {
                message: "Microphone access was denied.",
                hint: "Allow microphone access for this site, then try again.",
                suggestions: &[
                    "Click the camera/microphone icon in the address bar and choose Allow.",
                    "Check your operating system privacy settings for microphone access.",
                ],
            },
            ErrorCode::MicNotFound => TaxonomyEntry {
                message: "No microphone was found.",
                hint: "Connect a microphone or select a different input device.",
                suggestions: &[
                    "Make sure your headset or microphone is plugged in.",
                    "Pick a different input device in your system sound settings.",
                ],
            },
            ErrorCode::TokenRequestFailed => TaxonomyEntry {
                message: "Could not start a realtime voice session.",
                hint: "The voice service did not issue a session token. Try again in a moment.",
                suggestions: &["Check your network connection.", "Reload the page and retry."],
            },
            ErrorCode::TokenMissing => TaxonomyEntry {
                message: "The voice service returned an incomplete session.",
                hint: "The session token was missing from the response. Try again shortly.",
                suggestions: &["Contact your administrator if this keeps happening."],
            },
            ErrorCode::ConnectionFailed => TaxonomyEntry {
                message: "The realtime voice connection failed.",
                hint: "The connection to the voice service could not be established or was lost.",
                suggestions: &[
                    "Check your network connection or VPN.",
                    "Firewalls that block WebRTC traffic can cause this.",
                ],
            },
            ErrorCode::DatachannelError => TaxonomyEntry {
                message: "The voice control channel reported an error.",
                hint: "Disconnect and reconnect the voice session.",
                suggestions: &[],
            },
            ErrorCode::ChannelNotReady => TaxonomyEntry {
                message: "The voice session is not ready yet.",
                hint: "Wait for the session to finish connecting, then send your message again.",
                suggestions: &[],
            },
            ErrorCode::General => TaxonomyEntry {
                message: "Something went wrong with realtime voice.",
                hint: "Try again. If the problem persists, reload the page.",
                suggestions: &[],
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured, user-facing error description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    pub hint: String,
    pub suggestions: Vec<String>,
}

impl ErrorDetails {
    /// Build the details for `code` straight from the static table.
    pub fn from_code(code: ErrorCode) -> Self {
        let entry = code.entry();
        Self {
            code,
            message: entry.message.to_string(),
            hint: entry.hint.to_string(),
            suggestions: entry.suggestions.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Same as [`ErrorDetails::from_code`] but keeps a caller-provided message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut details = Self::from_code(code);
        if !message.trim().is_empty() {
            details.message = message;
        }
        details
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Where in the session lifecycle a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    Token,
    TokenMissing,
    Datachannel,
    ConnectionFailed,
    ChannelNotReady,
    Mic,
    General,
}

impl ErrorStage {
    /// The code a stage maps to when the error name did not decide it.
    ///
    /// `Mic` has no code of its own: a capture failure that is neither a
    /// permission denial nor a missing device falls through to `general`.
    fn code(&self) -> Option<ErrorCode> {
        match self {
            ErrorStage::Token => Some(ErrorCode::TokenRequestFailed),
            ErrorStage::TokenMissing => Some(ErrorCode::TokenMissing),
            ErrorStage::Datachannel => Some(ErrorCode::DatachannelError),
            ErrorStage::ConnectionFailed => Some(ErrorCode::ConnectionFailed),
            ErrorStage::ChannelNotReady => Some(ErrorCode::ChannelNotReady),
            ErrorStage::Mic | ErrorStage::General => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Token => "token",
            ErrorStage::TokenMissing => "token_missing",
            ErrorStage::Datachannel => "datachannel",
            ErrorStage::ConnectionFailed => "connection_failed",
            ErrorStage::ChannelNotReady => "channel_not_ready",
            ErrorStage::Mic => "mic",
            ErrorStage::General => "general",
        }
    }
}

// =============================================================================
// Raw errors
// =============================================================================

/// Media capture failure, named the way browsers name `getUserMedia` errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct MediaError {
    pub name: String,
    pub message: String,
}

impl MediaError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        Self::new("NotAllowedError", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NotFoundError", message)
    }
}

/// Errors surfaced by the realtime session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The runtime lacks peer-connection or media-capture support
    #[error("Realtime voice is not supported: {0}")]
    Unsupported(String),

    /// Ephemeral token could not be obtained
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Microphone acquisition failed
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Signaling endpoint answered with a non-success status
    #[error("Signaling failed with status {status}: {body}")]
    Signaling { status: u16, body: String },

    /// Signaling request did not complete
    #[error("Signaling request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Peer connection or channel operation failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Data channel reported an error event
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Data channel missing or not open
    #[error("Data channel is not open")]
    ChannelNotReady,

    /// A connect was requested while a session is initializing or connected
    #[error("A realtime session is already {0}")]
    AlreadyActive(ConnectionState),

    /// The attempt was torn down by a disconnect or transport failure mid-way
    #[error("Connection attempt was cancelled")]
    Cancelled,

    /// Envelope could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Free-form failure
    #[error("{0}")]
    Other(String),

    /// Already mapped onto the taxonomy; carries the original error
    #[error("{details}")]
    Classified {
        details: Arc<ErrorDetails>,
        #[source]
        source: Option<Box<SessionError>>,
    },
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    /// DOM-style name of the failure, used by the name-based mapping rules.
    pub fn name(&self) -> &str {
        match self {
            SessionError::Media(err) => &err.name,
            SessionError::Unsupported(_) => "NotSupportedError",
            SessionError::Token(_) => "TokenError",
            SessionError::Signaling { .. } | SessionError::Http(_) => "SignalingError",
            SessionError::Transport(_) => "TransportError",
            SessionError::DataChannel(_) => "DataChannelError",
            SessionError::ChannelNotReady => "InvalidStateError",
            SessionError::AlreadyActive(_) => "InvalidStateError",
            SessionError::Cancelled => "AbortError",
            SessionError::Serialization(_) => "SyntaxError",
            SessionError::Other(_) => "Error",
            SessionError::Classified { source, .. } => {
                source.as_deref().map(SessionError::name).unwrap_or("Error")
            }
        }
    }

    /// Stage implied by the variant, used when the caller does not name one.
    fn implied_stage(&self) -> ErrorStage {
        match self {
            SessionError::Token(TokenError::Missing) => ErrorStage::TokenMissing,
            SessionError::Token(_) => ErrorStage::Token,
            SessionError::Media(_) => ErrorStage::Mic,
            SessionError::Signaling { .. } | SessionError::Http(_) => {
                ErrorStage::ConnectionFailed
            }
            SessionError::DataChannel(_) => ErrorStage::Datachannel,
            SessionError::ChannelNotReady => ErrorStage::ChannelNotReady,
            _ => ErrorStage::General,
        }
    }

    /// Classification stamped on this error, if any.
    pub fn details(&self) -> Option<&Arc<ErrorDetails>> {
        match self {
            SessionError::Classified { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Shortcut for the stamped code.
    pub fn code(&self) -> Option<ErrorCode> {
        self.details().map(|d| d.code)
    }

    /// Classify and stamp. Already classified errors are returned untouched.
    pub fn into_classified(self, stage: Option<ErrorStage>) -> SessionError {
        if matches!(self, SessionError::Classified { .. }) {
            return self;
        }
        let details = classify(&self, stage);
        SessionError::Classified {
            details,
            source: Some(Box::new(self)),
        }
    }

    /// A classified error without an underlying source.
    pub fn from_details(details: Arc<ErrorDetails>) -> SessionError {
        SessionError::Classified {
            details,
            source: None,
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Map a raw error onto the taxonomy.
///
/// Rules, first match wins:
/// 1. already classified errors return their existing details;
/// 2. permission-denial names map to `mic_denied`;
/// 3. missing or overconstrained device names map to `mic_not_found`;
/// 4. the stage (given, or implied by the error variant) picks the code;
/// 5. everything else is `general`, keeping the original message.
pub fn classify(error: &SessionError, stage: Option<ErrorStage>) -> Arc<ErrorDetails> {
    if let SessionError::Classified { details, .. } = error {
        return Arc::clone(details);
    }

    let name = error.name();
    if PERMISSION_DENIED_NAMES.contains(&name) {
        return Arc::new(ErrorDetails::from_code(ErrorCode::MicDenied));
    }
    if DEVICE_MISSING_NAMES.contains(&name) {
        return Arc::new(ErrorDetails::from_code(ErrorCode::MicNotFound));
    }

    let stage = stage.unwrap_or_else(|| error.implied_stage());
    if let Some(code) = stage.code() {
        return Arc::new(ErrorDetails::from_code(code));
    }

    Arc::new(ErrorDetails::with_message(
        ErrorCode::General,
        error.to_string(),
    ))
}
