//! Realtime session manager.
//!
//! Owns one realtime voice session at a time: the peer connection, the local
//! microphone stream, the control data channel and the remote audio sink.
//!
//! # Lifecycle
//!
//! `idle → initializing → connected → {disconnected | error}`. Every transition is
//! recorded on the telemetry sink with a reason. Handles are created during
//! [`RealtimeSession::connect`] and all released together by
//! [`RealtimeSession::cleanup`]; a failed attempt never leaves any behind.
//!
//! Each connect bumps an attempt counter. Peer events carry the attempt they
//! were registered for, so events from a previous peer are dropped, and an
//! in-flight connect that was torn down by `disconnect()` notices at its next
//! suspension point and releases what it acquired.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::base::{
    AudioSink, ChannelState, ConnectionState, DataChannel, MediaStream, MediaTrack,
    PeerConnection, PeerConnectionState, PeerEvent, PeerEventHandler, RealtimeConfig,
    RealtimeStatus, RealtimeTransport,
};
use super::messages::{ClientEvent, InboundMessage};
use super::signaling::SignalingClient;
use super::token::{NoTenant, TenantResolver, TokenClient, TokenError};
use crate::core::errors::{
    ErrorCode, ErrorDetails, ErrorStage, SessionError, SessionResult, classify,
};
use crate::core::telemetry::{self, Severity, TelemetrySink};

/// Callback receiving every inbound data channel message.
pub type RealtimeEventHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Point-in-time view of the session.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub is_listening: bool,
    pub error: Option<Arc<ErrorDetails>>,
    pub has_peer_connection: bool,
    pub has_data_channel: bool,
    pub has_local_stream: bool,
    /// Time since the peer connection reached `connected`
    pub connected_for: Option<Duration>,
}

#[derive(Default)]
struct SessionHandles {
    peer: Option<Arc<dyn PeerConnection>>,
    stream: Option<Arc<dyn MediaStream>>,
    channel: Option<Arc<dyn DataChannel>>,
}

#[derive(Default)]
struct SessionState {
    connection: ConnectionState,
    attempt: u64,
    handles: SessionHandles,
    audio_sink: Option<Arc<dyn AudioSink>>,
    listening: bool,
    error: Option<Arc<ErrorDetails>>,
    connect_started: Option<Instant>,
    handshake_recorded: bool,
    session_started: Option<Instant>,
    pending_response: Option<Instant>,
    tenant: Option<String>,
}

struct SessionInner {
    config: RealtimeConfig,
    transport: Arc<dyn RealtimeTransport>,
    tokens: TokenClient,
    signaling: SignalingClient,
    tenant: Arc<dyn TenantResolver>,
    user_id: Option<String>,
    telemetry: Arc<TelemetrySink>,
    handler: Mutex<Option<RealtimeEventHandler>>,
    state: Mutex<SessionState>,
}

/// Handle to a realtime voice session. Cheap to clone.
#[derive(Clone)]
pub struct RealtimeSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for RealtimeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RealtimeSession")
            .field("state", &state.connection)
            .field("attempt", &state.attempt)
            .field("listening", &state.listening)
            .finish()
    }
}

/// Builder for [`RealtimeSession`].
pub struct RealtimeSessionBuilder {
    config: RealtimeConfig,
    transport: Arc<dyn RealtimeTransport>,
    telemetry: Option<Arc<TelemetrySink>>,
    tenant: Arc<dyn TenantResolver>,
    user_id: Option<String>,
    http: Option<reqwest::Client>,
}

impl RealtimeSessionBuilder {
    /// Telemetry sink to record on. Defaults to [`telemetry::global`].
    pub fn telemetry(mut self, sink: Arc<TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn tenant_resolver(mut self, resolver: Arc<dyn TenantResolver>) -> Self {
        self.tenant = resolver;
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn build(self) -> SessionResult<RealtimeSession> {
        let http = self.http.unwrap_or_default();
        let tokens = TokenClient::new(http.clone(), &self.config)?;
        let signaling = SignalingClient::new(http, &self.config)
            .map_err(|e| SessionError::Other(format!("Invalid signaling endpoint: {e}")))?;

        Ok(RealtimeSession {
            inner: Arc::new(SessionInner {
                config: self.config,
                transport: self.transport,
                tokens,
                signaling,
                tenant: self.tenant,
                user_id: self.user_id,
                telemetry: self.telemetry.unwrap_or_else(telemetry::global),
                handler: Mutex::new(None),
                state: Mutex::new(SessionState::default()),
            }),
        })
    }
}

impl RealtimeSession {
    pub fn builder(
        config: RealtimeConfig,
        transport: Arc<dyn RealtimeTransport>,
    ) -> RealtimeSessionBuilder {
        RealtimeSessionBuilder {
            config,
            transport,
            telemetry: None,
            tenant: Arc::new(NoTenant),
            user_id: None,
            http: None,
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Register the handler for inbound data channel messages.
    pub fn on_event(&self, handler: RealtimeEventHandler) {
        *self.inner.handler.lock() = Some(handler);
    }

    pub fn clear_event_handler(&self) {
        *self.inner.handler.lock() = None;
    }

    /// Establish the session.
    ///
    /// Resolves once the SDP answer has been applied; the state moves to
    /// `connected` when the peer connection reports it. On failure the session
    /// is cleaned up, the classified error is stored and returned, and the state
    /// is `error`.
    pub async fn connect(&self) -> SessionResult<()> {
        let attempt = self.inner.begin_attempt()?;
        info!(attempt, "Starting realtime session");

        let mut stage = ErrorStage::General;
        match self.inner.connect_steps(attempt, &mut stage).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.inner.fail_connect(attempt, e, stage)),
        }
    }

    /// Tear the session down at the user's request.
    pub fn disconnect(&self) {
        self.inner.state.lock().error = None;
        self.inner
            .set_state(ConnectionState::Disconnected, "user_disconnect");
        self.inner.cleanup("user_disconnect");
    }

    /// Release every handle. Safe to call at any time, any number of times.
    pub fn cleanup(&self, reason: &str) {
        self.inner.cleanup(reason);
    }

    /// Send a user text message. Blank input is a no-op.
    pub fn send_user_message(&self, text: &str) -> SessionResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        self.inner.send(&ClientEvent::user_message(text))?;
        self.inner.state.lock().pending_response = Some(Instant::now());
        self.inner.emit(
            "realtime.message_sent",
            json!({ "chars": text.chars().count() }),
            Severity::Info,
        );
        Ok(())
    }

    /// Send an arbitrary client event, e.g. `response.create`.
    pub fn send_event(&self, event: &ClientEvent) -> SessionResult<()> {
        self.inner.send(event)
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.inner.state.lock();
        SessionStatus {
            state: state.connection,
            is_listening: state.listening,
            error: state.error.clone(),
            has_peer_connection: state.handles.peer.is_some(),
            has_data_channel: state.handles.channel.is_some(),
            has_local_stream: state.handles.stream.is_some(),
            connected_for: state.session_started.map(|t| t.elapsed()),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    pub fn is_listening(&self) -> bool {
        self.inner.state.lock().listening
    }

    pub fn error(&self) -> Option<Arc<ErrorDetails>> {
        self.inner.state.lock().error.clone()
    }
}

impl RealtimeStatus for RealtimeSession {
    fn is_listening(&self) -> bool {
        RealtimeSession::is_listening(self)
    }

    fn error(&self) -> Option<Arc<ErrorDetails>> {
        RealtimeSession::error(self)
    }
}

// =============================================================================
// Internals
// =============================================================================

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn same_channel(a: &Arc<dyn DataChannel>, b: &Arc<dyn DataChannel>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl SessionInner {
    fn context(&self) -> Value {
        let tenant = self.state.lock().tenant.clone();
        json!({
            "tenant_id": tenant,
            "user_id": self.user_id,
            "surface": "realtime",
        })
    }

    fn emit(&self, event: &str, payload: Value, severity: Severity) {
        self.telemetry
            .record(event, payload, severity, &self.context());
    }

    fn set_state(&self, to: ConnectionState, reason: &str) {
        let from = {
            let mut state = self.state.lock();
            let from = state.connection;
            if from == to {
                return;
            }
            state.connection = to;
            from
        };
        info!(from = %from, to = %to, reason, "Realtime connection state changed");
        self.telemetry
            .record_state_transition(from, to, reason, &self.context());
    }

    fn begin_attempt(&self) -> SessionResult<u64> {
        let (from, attempt) = {
            let mut state = self.state.lock();
            if state.connection.is_active() {
                warn!(state = %state.connection, "Rejecting connect while a session is active");
                return Err(SessionError::AlreadyActive(state.connection)
                    .into_classified(Some(ErrorStage::General)));
            }
            state.attempt += 1;
            state.error = None;
            state.connect_started = Some(Instant::now());
            state.handshake_recorded = false;
            state.session_started = None;
            state.pending_response = None;
            let from = state.connection;
            state.connection = ConnectionState::Initializing;
            (from, state.attempt)
        };

        info!(from = %from, to = %ConnectionState::Initializing, reason = "connect", "Realtime connection state changed");
        self.telemetry.record_state_transition(
            from,
            ConnectionState::Initializing,
            "connect",
            &self.context(),
        );
        self.emit(
            "realtime.connect_start",
            json!({ "attempt": attempt }),
            Severity::Info,
        );
        Ok(attempt)
    }

    fn is_current(&self, attempt: u64) -> bool {
        let state = self.state.lock();
        state.attempt == attempt && state.connection.is_active()
    }

    fn ensure_current(&self, attempt: u64) -> SessionResult<()> {
        if self.is_current(attempt) {
            Ok(())
        } else {
            Err(SessionError::Cancelled)
        }
    }

    /// Like [`Self::ensure_current`], but also fails once a cleanup has taken
    /// the peer connection away from this attempt.
    fn ensure_peer(&self, attempt: u64) -> SessionResult<()> {
        let state = self.state.lock();
        if state.attempt == attempt
            && state.connection.is_active()
            && state.handles.peer.is_some()
        {
            Ok(())
        } else {
            Err(SessionError::Cancelled)
        }
    }

    async fn connect_steps(
        self: &Arc<Self>,
        attempt: u64,
        stage: &mut ErrorStage,
    ) -> SessionResult<()> {
        if !self.transport.is_supported() {
            return Err(SessionError::Unsupported(
                "peer connections or media capture are unavailable".to_string(),
            ));
        }

        *stage = ErrorStage::Token;
        let tenant = self.tenant.active_tenant();
        self.state.lock().tenant = tenant.clone();
        let token = match self.tokens.fetch(tenant.as_deref()).await {
            Ok(token) => token,
            Err(TokenError::Missing) => {
                *stage = ErrorStage::TokenMissing;
                return Err(TokenError::Missing.into());
            }
            Err(e) => return Err(e.into()),
        };
        debug!(attempt, token = %token.masked(), "Ephemeral token acquired");
        self.ensure_current(attempt)?;

        *stage = ErrorStage::ConnectionFailed;
        let peer = self
            .transport
            .create_peer_connection(self.peer_event_handler(attempt))?;
        if !self.install_peer(attempt, &peer) {
            if let Err(e) = peer.close() {
                debug!(error = %e, "Failed to close superseded peer connection");
            }
            return Err(SessionError::Cancelled);
        }

        *stage = ErrorStage::Mic;
        let stream = self.transport.get_user_audio().await?;
        if !self.install_stream(attempt, &stream) {
            stop_tracks(&stream.tracks());
            return Err(SessionError::Cancelled);
        }

        *stage = ErrorStage::ConnectionFailed;
        for track in stream.tracks() {
            peer.add_track(track)?;
        }

        *stage = ErrorStage::Datachannel;
        let channel = peer.create_data_channel(&self.config.data_channel_label)?;
        self.adopt_channel(attempt, channel);

        *stage = ErrorStage::ConnectionFailed;
        let offer = peer.create_offer().await?;
        peer.set_local_description(&offer).await?;
        self.ensure_peer(attempt)?;

        let answer = self.signaling.exchange(&offer, &token).await?;
        self.ensure_peer(attempt)?;

        peer.set_remote_description(&answer).await?;
        self.ensure_peer(attempt)?;

        info!(attempt, "Realtime session negotiated");
        Ok(())
    }

    fn fail_connect(&self, attempt: u64, err: SessionError, stage: ErrorStage) -> SessionError {
        if matches!(err, SessionError::Cancelled) || !self.is_current(attempt) {
            // Torn down underneath us; whoever did it already released the handles.
            let (existing, stranded) = {
                let state = self.state.lock();
                let ours = state.attempt == attempt;
                (
                    ours.then(|| state.error.clone()).flatten(),
                    ours && state.connection.is_active(),
                )
            };
            warn!(attempt, error = %err, "Realtime connect attempt was superseded");
            let err = match existing {
                Some(details) => SessionError::from_details(details),
                None => SessionError::Cancelled.into_classified(Some(ErrorStage::General)),
            };
            if stranded {
                // A bare cleanup leaves the state alone; settle it so a later
                // connect is accepted.
                self.cleanup("connect_cancelled");
                self.state.lock().error = Some(classify(&err, None));
                self.set_state(ConnectionState::Error, "connect_cancelled");
            }
            return err;
        }

        self.cleanup("connect_error");

        let err = err.into_classified(Some(stage));
        let details = classify(&err, None);
        self.state.lock().error = Some(Arc::clone(&details));

        error!(
            attempt,
            code = %details.code,
            stage = stage.as_str(),
            error = %err,
            "Realtime connect failed"
        );
        self.emit(
            "realtime.connect_failed",
            json!({
                "code": details.code.as_str(),
                "stage": stage.as_str(),
                "message": details.message,
            }),
            Severity::Error,
        );
        self.set_state(ConnectionState::Error, "connect_error");
        err
    }

    fn install_peer(&self, attempt: u64, peer: &Arc<dyn PeerConnection>) -> bool {
        let mut state = self.state.lock();
        if state.attempt != attempt || !state.connection.is_active() {
            return false;
        }
        state.handles.peer = Some(Arc::clone(peer));
        true
    }

    fn install_stream(&self, attempt: u64, stream: &Arc<dyn MediaStream>) -> bool {
        let mut state = self.state.lock();
        if state.attempt != attempt
            || !state.connection.is_active()
            || state.handles.peer.is_none()
        {
            return false;
        }
        state.handles.stream = Some(Arc::clone(stream));
        true
    }

    /// First channel wins; later ones are closed and ignored.
    fn adopt_channel(&self, attempt: u64, channel: Arc<dyn DataChannel>) -> bool {
        let adopted = {
            let mut state = self.state.lock();
            if let Some(existing) = state.handles.channel.as_ref() {
                if same_channel(existing, &channel) {
                    return true;
                }
                false
            } else if state.attempt != attempt || state.handles.peer.is_none() {
                false
            } else {
                state.handles.channel = Some(Arc::clone(&channel));
                true
            }
        };
        if adopted {
            debug!(label = channel.label(), "Data channel adopted");
        } else {
            debug!(label = channel.label(), "Ignoring additional data channel");
            if let Err(e) = channel.close() {
                debug!(error = %e, "Failed to close ignored data channel");
            }
        }
        adopted
    }

    fn peer_event_handler(self: &Arc<Self>, attempt: u64) -> PeerEventHandler {
        let weak = Arc::downgrade(self);
        Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_peer_event(attempt, event);
            }
        })
    }

    fn handle_peer_event(&self, attempt: u64, event: PeerEvent) {
        if self.state.lock().attempt != attempt {
            debug!(attempt, ?event, "Ignoring event from a previous attempt");
            return;
        }

        match event {
            PeerEvent::ConnectionStateChanged(peer_state) => self.on_peer_state(peer_state),
            PeerEvent::Track(track) => self.on_remote_track(track),
            PeerEvent::DataChannel(channel) => {
                self.adopt_channel(attempt, channel);
            }
            PeerEvent::ChannelOpen { channel } => self.on_channel_open(&channel),
            PeerEvent::ChannelMessage { channel, data } => {
                self.on_channel_message(&channel, &data)
            }
            PeerEvent::ChannelError { channel, message } => {
                self.on_channel_error(&channel, message)
            }
            PeerEvent::ChannelClosed { channel } => self.on_channel_closed(&channel),
        }
    }

    fn on_peer_state(&self, peer_state: PeerConnectionState) {
        match peer_state {
            PeerConnectionState::Connected => {
                let (transition, latency) = {
                    let mut state = self.state.lock();
                    if state.handles.peer.is_none() {
                        return;
                    }
                    let transition = state.connection == ConnectionState::Initializing;
                    if transition {
                        state.session_started = Some(Instant::now());
                    }
                    let latency = if state.handshake_recorded {
                        None
                    } else {
                        state.handshake_recorded = true;
                        state.connect_started.map(|t| t.elapsed())
                    };
                    (transition, latency)
                };
                if let Some(latency) = latency {
                    self.emit(
                        "realtime.handshake_latency",
                        json!({ "ms": millis(latency) }),
                        Severity::Info,
                    );
                }
                if transition {
                    self.set_state(ConnectionState::Connected, "peer_connected");
                }
            }
            PeerConnectionState::Failed => {
                if self.state.lock().handles.peer.is_none() {
                    return;
                }
                warn!("Realtime peer connection failed");
                self.cleanup("peer_failed");
                let details = Arc::new(ErrorDetails::from_code(ErrorCode::ConnectionFailed));
                self.state.lock().error = Some(details);
                self.emit(
                    "realtime.connection_failed",
                    json!({ "code": ErrorCode::ConnectionFailed.as_str() }),
                    Severity::Error,
                );
                self.set_state(ConnectionState::Error, "peer_failed");
            }
            PeerConnectionState::Disconnected | PeerConnectionState::Closed => {
                let was = {
                    let state = self.state.lock();
                    if state.handles.peer.is_none() {
                        return;
                    }
                    state.connection
                };
                self.cleanup("peer_disconnected");
                if was.is_active() {
                    self.set_state(ConnectionState::Disconnected, "peer_disconnected");
                }
            }
            PeerConnectionState::New | PeerConnectionState::Connecting => {
                debug!(state = ?peer_state, "Peer connection progressing");
            }
        }
    }

    fn on_remote_track(&self, track: Arc<dyn MediaTrack>) {
        let existing = {
            let state = self.state.lock();
            if state.handles.peer.is_none() {
                return;
            }
            state.audio_sink.clone()
        };
        let sink = match existing {
            Some(sink) => sink,
            None => {
                let created = self.transport.create_audio_sink();
                Arc::clone(self.state.lock().audio_sink.get_or_insert(created))
            }
        };

        debug!(track = track.id(), "Binding remote track to audio sink");
        sink.attach(track);
        if let Err(e) = sink.play() {
            debug!(error = %e, "Remote audio playback did not start");
        }
    }

    fn is_current_channel(&self, channel: &Arc<dyn DataChannel>) -> bool {
        self.state
            .lock()
            .handles
            .channel
            .as_ref()
            .is_some_and(|adopted| same_channel(adopted, channel))
    }

    fn on_channel_open(&self, channel: &Arc<dyn DataChannel>) {
        let since_connect = {
            let mut state = self.state.lock();
            if !state
                .handles
                .channel
                .as_ref()
                .is_some_and(|adopted| same_channel(adopted, channel))
            {
                return;
            }
            state.listening = true;
            state.connect_started.map(|t| t.elapsed())
        };
        info!(label = channel.label(), "Realtime data channel open");
        self.emit(
            "realtime.datachannel_open",
            json!({ "ms": since_connect.map(millis) }),
            Severity::Info,
        );
    }

    fn on_channel_message(&self, channel: &Arc<dyn DataChannel>, data: &str) {
        if !self.is_current_channel(channel) {
            return;
        }

        let message = InboundMessage::decode(data);
        let latency = if message.is_assistant_response() {
            self.state
                .lock()
                .pending_response
                .take()
                .map(|t| t.elapsed())
        } else {
            None
        };
        if let Some(latency) = latency {
            self.emit(
                "realtime.response_latency",
                json!({ "ms": millis(latency) }),
                Severity::Info,
            );
        }

        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(message);
        }
    }

    fn on_channel_error(&self, channel: &Arc<dyn DataChannel>, message: String) {
        if !self.is_current_channel(channel) {
            return;
        }
        warn!(label = channel.label(), error = %message, "Realtime data channel error");
        let err = SessionError::DataChannel(message.clone())
            .into_classified(Some(ErrorStage::Datachannel));
        self.state.lock().error = Some(classify(&err, None));
        self.emit(
            "realtime.datachannel_error",
            json!({ "message": message }),
            Severity::Warn,
        );
    }

    fn on_channel_closed(&self, channel: &Arc<dyn DataChannel>) {
        {
            let mut state = self.state.lock();
            if !state
                .handles
                .channel
                .as_ref()
                .is_some_and(|adopted| same_channel(adopted, channel))
            {
                return;
            }
            state.listening = false;
        }
        debug!(label = channel.label(), "Realtime data channel closed");
    }

    fn open_channel(&self) -> SessionResult<Arc<dyn DataChannel>> {
        self.state
            .lock()
            .handles
            .channel
            .as_ref()
            .filter(|channel| channel.ready_state() == ChannelState::Open)
            .cloned()
            .ok_or_else(|| {
                SessionError::ChannelNotReady.into_classified(Some(ErrorStage::ChannelNotReady))
            })
    }

    fn send(&self, event: &ClientEvent) -> SessionResult<()> {
        let channel = self.open_channel()?;
        let payload = serde_json::to_string(event)
            .map_err(|e| SessionError::from(e).into_classified(Some(ErrorStage::General)))?;
        channel
            .send(&payload)
            .map_err(|e| SessionError::from(e).into_classified(Some(ErrorStage::Datachannel)))?;
        debug!(event_type = event.event_type(), "Sent data channel event");
        Ok(())
    }

    fn cleanup(&self, reason: &str) {
        let (handles, sink, session_started) = {
            let mut state = self.state.lock();
            state.listening = false;
            state.pending_response = None;
            (
                std::mem::take(&mut state.handles),
                state.audio_sink.clone(),
                state.session_started.take(),
            )
        };

        if let Some(started) = session_started {
            self.emit(
                "realtime.session_duration",
                json!({ "ms": millis(started.elapsed()), "reason": reason }),
                Severity::Info,
            );
        }

        let had_handles =
            handles.channel.is_some() || handles.peer.is_some() || handles.stream.is_some();

        if let Some(channel) = handles.channel {
            if let Err(e) = channel.close() {
                debug!(error = %e, "Ignoring data channel close error");
            }
        }
        if let Some(peer) = handles.peer {
            if let Err(e) = peer.close() {
                debug!(error = %e, "Ignoring peer connection close error");
            }
        }
        if let Some(stream) = handles.stream {
            stop_tracks(&stream.tracks());
        }
        if let Some(sink) = sink {
            sink.detach();
        }

        if had_handles {
            debug!(reason, "Realtime session cleaned up");
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cleanup("dropped");
    }
}

fn stop_tracks(tracks: &[Arc<dyn MediaTrack>]) {
    for track in tracks {
        track.stop();
    }
}
