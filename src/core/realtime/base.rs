//! Base traits and types for the realtime voice session.
//!
//! The session manager never touches a concrete WebRTC stack. Peer connections,
//! data channels, microphone capture and remote audio playback are reached
//! through the traits in this module, so hosts plug in their own binding and
//! tests plug in fakes.
//!
//! # Event delivery
//!
//! Peer connections report connection-state changes, remote tracks, remote data
//! channels and channel activity through a single [`PeerEventHandler`] supplied
//! when the connection is created.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::core::errors::{ErrorDetails, MediaError};

// =============================================================================
// Error Types
// =============================================================================

/// Errors reported by a transport binding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The runtime cannot create peer connections
    #[error("Peer connections are not supported")]
    Unsupported,

    /// Peer connection operation failed
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// Offer/answer negotiation failed
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Data channel operation failed
    #[error("Data channel error: {0}")]
    Channel(String),

    /// The object was already closed
    #[error("Already closed")]
    Closed,
}

// =============================================================================
// Configuration Types
// =============================================================================

/// Default ephemeral token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://localhost:4001/api/ai/realtime-token";

/// Default SDP signaling endpoint.
pub const DEFAULT_CALL_URL: &str = "https://api.openai.com/v1/realtime/calls";

/// Default realtime model.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

/// Label of the control data channel.
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "oai-events";

/// Endpoint and negotiation settings for a realtime session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Backend endpoint that mints ephemeral client secrets (GET)
    pub token_url: String,

    /// Signaling endpoint receiving the SDP offer (POST)
    pub call_url: String,

    /// Model passed as the `model` query parameter on signaling
    pub model: String,

    /// Query parameter carrying the active tenant on the token request.
    /// Default: "tenant_id"
    pub tenant_query_param: String,

    /// Label of the control data channel.
    /// Default: "oai-events"
    pub data_channel_label: String,

    /// Timeout applied to the token and signaling requests (milliseconds).
    /// Default: 15000ms
    pub request_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            call_url: DEFAULT_CALL_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            tenant_query_param: "tenant_id".to_string(),
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            request_timeout_ms: 15_000,
        }
    }
}

// =============================================================================
// State Types
// =============================================================================

/// Lifecycle state of the realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Never connected, or reset
    #[default]
    Idle,
    /// Connect in progress
    Initializing,
    /// Peer connection established
    Connected,
    /// Torn down by the user or the remote side
    Disconnected,
    /// Last attempt failed; see the session error
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }

    /// Whether a session is in flight or established.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Initializing | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Ready state of a data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

// =============================================================================
// Media Traits
// =============================================================================

/// A single local or remote media track.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Stop the track and release the underlying device. Idempotent.
    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// Captured local media.
pub trait MediaStream: Send + Sync {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>>;
}

/// Output element that plays remote audio.
pub trait AudioSink: Send + Sync {
    fn attach(&self, track: Arc<dyn MediaTrack>);

    /// Start playback. May fail when autoplay is blocked.
    fn play(&self) -> Result<(), MediaError>;

    /// Detach the current source.
    fn detach(&self);
}

// =============================================================================
// Peer Traits
// =============================================================================

/// Bidirectional text channel negotiated over the peer connection.
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn ready_state(&self) -> ChannelState;

    fn send(&self, text: &str) -> Result<(), TransportError>;

    fn close(&self) -> Result<(), TransportError>;
}

/// Events raised by a peer connection and its channels.
#[derive(Clone)]
pub enum PeerEvent {
    ConnectionStateChanged(PeerConnectionState),
    /// Remote media track arrived
    Track(Arc<dyn MediaTrack>),
    /// Remote side opened a data channel
    DataChannel(Arc<dyn DataChannel>),
    /// Channel activity, matched against the adopted channel by identity
    ChannelOpen {
        channel: Arc<dyn DataChannel>,
    },
    ChannelMessage {
        channel: Arc<dyn DataChannel>,
        data: String,
    },
    ChannelError {
        channel: Arc<dyn DataChannel>,
        message: String,
    },
    ChannelClosed {
        channel: Arc<dyn DataChannel>,
    },
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::ConnectionStateChanged(state) => {
                f.debug_tuple("ConnectionStateChanged").field(state).finish()
            }
            PeerEvent::Track(track) => f.debug_tuple("Track").field(&track.id()).finish(),
            PeerEvent::DataChannel(channel) => {
                f.debug_tuple("DataChannel").field(&channel.label()).finish()
            }
            PeerEvent::ChannelOpen { channel } => f
                .debug_struct("ChannelOpen")
                .field("label", &channel.label())
                .finish(),
            PeerEvent::ChannelMessage { channel, data } => f
                .debug_struct("ChannelMessage")
                .field("label", &channel.label())
                .field("len", &data.len())
                .finish(),
            PeerEvent::ChannelError { channel, message } => f
                .debug_struct("ChannelError")
                .field("label", &channel.label())
                .field("message", message)
                .finish(),
            PeerEvent::ChannelClosed { channel } => f
                .debug_struct("ChannelClosed")
                .field("label", &channel.label())
                .finish(),
        }
    }
}

/// Callback receiving every [`PeerEvent`] of one peer connection.
pub type PeerEventHandler = Arc<dyn Fn(PeerEvent) + Send + Sync>;

/// An RTC peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create an SDP offer.
    async fn create_offer(&self) -> Result<String, TransportError>;

    async fn set_local_description(&self, sdp: &str) -> Result<(), TransportError>;

    async fn set_remote_description(&self, sdp: &str) -> Result<(), TransportError>;

    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), TransportError>;

    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, TransportError>;

    fn close(&self) -> Result<(), TransportError>;
}

/// Entry point of a transport binding.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Whether peer connections and media capture are available.
    fn is_supported(&self) -> bool;

    fn create_peer_connection(
        &self,
        handler: PeerEventHandler,
    ) -> Result<Arc<dyn PeerConnection>, TransportError>;

    /// Request microphone access.
    async fn get_user_audio(&self) -> Result<Arc<dyn MediaStream>, MediaError>;

    fn create_audio_sink(&self) -> Arc<dyn AudioSink>;
}

// =============================================================================
// Status
// =============================================================================

/// Narrow read-only view of a realtime session.
pub trait RealtimeStatus: Send + Sync {
    fn is_listening(&self) -> bool;

    fn error(&self) -> Option<Arc<ErrorDetails>>;
}
