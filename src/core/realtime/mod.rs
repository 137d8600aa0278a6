//! Realtime voice session module.
//!
//! This module negotiates an ephemeral-token-authenticated peer connection to a
//! realtime speech API and owns everything attached to it: the peer
//! connection, local microphone capture, the control data channel and remote
//! audio playback.
//!
//! # Architecture
//!
//! - [`RealtimeTransport`] and friends abstract the peer connection stack
//! - [`TokenClient`] fetches the ephemeral client secret (tenant-scoped)
//! - [`SignalingClient`] exchanges the SDP offer for an answer
//! - [`RealtimeSession`] drives the lifecycle and reports status
//!
//! # Example
//!
//! ```rust,ignore
//! use aisha_voice::core::realtime::{RealtimeConfig, RealtimeSession};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = Arc::new(MyWebRtcBinding::new());
//!     let session = RealtimeSession::builder(RealtimeConfig::default(), transport)
//!         .user_id("user-42")
//!         .build()
//!         .unwrap();
//!
//!     session.on_event(Arc::new(|msg| println!("{msg:?}")));
//!     session.connect().await.unwrap();
//!     session.send_user_message("What's on my calendar today?").unwrap();
//! }
//! ```

mod base;
pub mod messages;
mod session;
mod signaling;
mod token;

pub use base::{
    AudioSink, ChannelState, ConnectionState, DEFAULT_CALL_URL, DEFAULT_DATA_CHANNEL_LABEL,
    DEFAULT_REALTIME_MODEL, DEFAULT_TOKEN_URL, DataChannel, MediaStream, MediaTrack,
    PeerConnection, PeerConnectionState, PeerEvent, PeerEventHandler, RealtimeConfig,
    RealtimeStatus, RealtimeTransport, TrackKind, TransportError,
};
pub use messages::{ClientEvent, InboundMessage};
pub use session::{RealtimeEventHandler, RealtimeSession, RealtimeSessionBuilder, SessionStatus};
pub use signaling::SignalingClient;
pub use token::{
    EphemeralToken, NoTenant, StaticTenant, StoredTenantResolver, TenantResolver, TokenClient,
    TokenError, TokenResult,
};
