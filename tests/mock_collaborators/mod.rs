//! In-memory collaborators for integration tests.
//!
//! Every fake records what was asked of it so tests can assert on side
//! effects (tracks stopped, channels closed, recognizers restarted) without a
//! real WebRTC stack, microphone or speech engine.

// Allow dead code in test infrastructure - not every test file uses every fake
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use aisha_voice::core::errors::{ErrorDetails, MediaError};
use aisha_voice::core::realtime::{
    AudioSink, ChannelState, DataChannel, MediaStream, MediaTrack, PeerConnection,
    PeerEvent, PeerEventHandler, RealtimeStatus, RealtimeTransport, TrackKind, TransportError,
};
use aisha_voice::core::voice::{
    CollaboratorError, CollaboratorResult, PlaybackEndedCallback, SpeechToText, TextToSpeech,
    TranscriptCallback,
};
use aisha_voice::core::wake_word::{
    RecognitionEvent, RecognitionHandler, RecognitionResult, RecognizerError, RecognizerFactory,
    RecognizerOptions, SpeechRecognizer,
};

pub const FAKE_OFFER: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n";
pub const FAKE_ANSWER: &str = "v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\ns=answer\r\n";

// =============================================================================
// Media
// =============================================================================

pub struct FakeTrack {
    id: String,
    live: AtomicBool,
}

impl FakeTrack {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            live: AtomicBool::new(true),
        })
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

pub struct FakeStream {
    pub tracks: Vec<Arc<FakeTrack>>,
}

impl FakeStream {
    pub fn all_stopped(&self) -> bool {
        self.tracks.iter().all(|t| !t.is_live())
    }
}

impl MediaStream for FakeStream {
    fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks
            .iter()
            .map(|t| Arc::clone(t) as Arc<dyn MediaTrack>)
            .collect()
    }
}

#[derive(Default)]
pub struct FakeSink {
    pub attached: Mutex<Vec<String>>,
    pub plays: AtomicUsize,
    pub detached: AtomicBool,
    pub block_autoplay: AtomicBool,
}

impl AudioSink for FakeSink {
    fn attach(&self, track: Arc<dyn MediaTrack>) {
        self.attached.lock().push(track.id().to_string());
        self.detached.store(false, Ordering::SeqCst);
    }

    fn play(&self) -> Result<(), MediaError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        if self.block_autoplay.load(Ordering::SeqCst) {
            return Err(MediaError::new("NotAllowedError", "autoplay blocked"));
        }
        Ok(())
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Peer
// =============================================================================

pub struct FakeChannel {
    label: String,
    state: Mutex<ChannelState>,
    pub sent: Mutex<Vec<String>>,
    pub closed: AtomicBool,
}

impl FakeChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            state: Mutex::new(ChannelState::Connecting),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }
}

impl DataChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn send(&self, text: &str) -> Result<(), TransportError> {
        if *self.state.lock() != ChannelState::Open {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock() = ChannelState::Closed;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePeer {
    pub calls: Mutex<Vec<&'static str>>,
    pub local_sdp: Mutex<Option<String>>,
    pub remote_sdp: Mutex<Option<String>>,
    pub tracks: Mutex<Vec<String>>,
    pub channels: Mutex<Vec<Arc<FakeChannel>>>,
    pub closed: AtomicBool,
}

impl FakePeer {
    pub fn channel(&self) -> Arc<FakeChannel> {
        Arc::clone(&self.channels.lock()[0])
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<String, TransportError> {
        self.calls.lock().push("create_offer");
        Ok(FAKE_OFFER.to_string())
    }

    async fn set_local_description(&self, sdp: &str) -> Result<(), TransportError> {
        self.calls.lock().push("set_local_description");
        *self.local_sdp.lock() = Some(sdp.to_string());
        Ok(())
    }

    async fn set_remote_description(&self, sdp: &str) -> Result<(), TransportError> {
        self.calls.lock().push("set_remote_description");
        *self.remote_sdp.lock() = Some(sdp.to_string());
        Ok(())
    }

    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), TransportError> {
        self.calls.lock().push("add_track");
        self.tracks.lock().push(track.id().to_string());
        Ok(())
    }

    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, TransportError> {
        self.calls.lock().push("create_data_channel");
        let channel = FakeChannel::new(label);
        self.channels.lock().push(Arc::clone(&channel));
        Ok(channel)
    }

    fn close(&self) -> Result<(), TransportError> {
        self.calls.lock().push("close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Transport
// =============================================================================

pub struct FakeTransport {
    supported: AtomicBool,
    mic_error: Mutex<Option<MediaError>>,
    pub audio_requests: AtomicUsize,
    handlers: Mutex<Vec<PeerEventHandler>>,
    pub peers: Mutex<Vec<Arc<FakePeer>>>,
    pub streams: Mutex<Vec<Arc<FakeStream>>>,
    pub sinks: Mutex<Vec<Arc<FakeSink>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            supported: AtomicBool::new(true),
            mic_error: Mutex::new(None),
            audio_requests: AtomicUsize::new(0),
            handlers: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
        })
    }

    pub fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::SeqCst);
    }

    pub fn fail_mic(&self, error: MediaError) {
        *self.mic_error.lock() = Some(error);
    }

    pub fn audio_requests(&self) -> usize {
        self.audio_requests.load(Ordering::SeqCst)
    }

    /// Deliver an event through the most recent peer's handler.
    pub fn emit(&self, event: PeerEvent) {
        let handler = self.handlers.lock().last().cloned();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Deliver an event through the handler of the `index`th peer.
    pub fn emit_to(&self, index: usize, event: PeerEvent) {
        let handler = self.handlers.lock().get(index).cloned();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn last_peer(&self) -> Arc<FakePeer> {
        Arc::clone(self.peers.lock().last().unwrap())
    }

    pub fn last_stream(&self) -> Arc<FakeStream> {
        Arc::clone(self.streams.lock().last().unwrap())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn any_live_tracks(&self) -> bool {
        self.streams
            .lock()
            .iter()
            .any(|stream| !stream.all_stopped())
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    fn is_supported(&self) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    fn create_peer_connection(
        &self,
        handler: PeerEventHandler,
    ) -> Result<Arc<dyn PeerConnection>, TransportError> {
        let peer = Arc::new(FakePeer::default());
        self.handlers.lock().push(handler);
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }

    async fn get_user_audio(&self) -> Result<Arc<dyn MediaStream>, MediaError> {
        self.audio_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.mic_error.lock().clone() {
            return Err(error);
        }
        let index = self.streams.lock().len();
        let stream = Arc::new(FakeStream {
            tracks: vec![FakeTrack::new(&format!("mic-{index}"))],
        });
        self.streams.lock().push(Arc::clone(&stream));
        Ok(stream)
    }

    fn create_audio_sink(&self) -> Arc<dyn AudioSink> {
        let sink = Arc::new(FakeSink::default());
        self.sinks.lock().push(Arc::clone(&sink));
        sink
    }
}

// =============================================================================
// Speech recognition
// =============================================================================

#[derive(Default)]
pub struct FakeRecognizer {
    handler: Mutex<Option<RecognitionHandler>>,
    running: AtomicBool,
    pub starts: AtomicUsize,
    pub aborts: AtomicUsize,
    pub fail_start: Mutex<Option<RecognizerError>>,
}

impl FakeRecognizer {
    pub fn emit(&self, event: RecognitionEvent) {
        if matches!(event, RecognitionEvent::End) {
            self.running.store(false, Ordering::SeqCst);
        }
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    pub fn say(&self, transcript: &str) {
        self.emit(RecognitionEvent::Result(vec![RecognitionResult::final_text(
            transcript,
        )]));
    }

    pub fn say_interim(&self, transcript: &str) {
        self.emit(RecognitionEvent::Result(vec![RecognitionResult::interim(
            transcript,
        )]));
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().is_some()
    }
}

impl SpeechRecognizer for FakeRecognizer {
    fn set_handler(&self, handler: Option<RecognitionHandler>) {
        *self.handler.lock() = handler;
    }

    fn start(&self) -> Result<(), RecognizerError> {
        if let Some(error) = self.fail_start.lock().clone() {
            return Err(error);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RecognizerError::AlreadyStarted);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct FakeRecognizerFactory {
    pub supported: AtomicBool,
    pub created: Mutex<Vec<Arc<FakeRecognizer>>>,
    pub options: Mutex<Option<RecognizerOptions>>,
}

impl FakeRecognizerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            supported: AtomicBool::new(true),
            created: Mutex::new(Vec::new()),
            options: Mutex::new(None),
        })
    }

    pub fn last(&self) -> Arc<FakeRecognizer> {
        Arc::clone(self.created.lock().last().unwrap())
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

impl RecognizerFactory for FakeRecognizerFactory {
    fn is_supported(&self) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    fn create(
        &self,
        options: &RecognizerOptions,
    ) -> Result<Arc<dyn SpeechRecognizer>, RecognizerError> {
        if !self.is_supported() {
            return Err(RecognizerError::Unsupported);
        }
        *self.options.lock() = Some(options.clone());
        let recognizer = Arc::new(FakeRecognizer::default());
        self.created.lock().push(Arc::clone(&recognizer));
        Ok(recognizer)
    }
}

// =============================================================================
// Speech-to-text / text-to-speech
// =============================================================================

#[derive(Default)]
pub struct FakeStt {
    recording: AtomicBool,
    transcribing: AtomicBool,
    pub error: Mutex<Option<String>>,
    pub fail_start: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    on_final: Mutex<Option<TranscriptCallback>>,
}

impl FakeStt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_recording_now(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn set_transcribing(&self, value: bool) {
        self.transcribing.store(value, Ordering::SeqCst);
    }

    pub fn finish_transcript(&self, text: &str) {
        let callback = self.on_final.lock().clone();
        if let Some(callback) = callback {
            callback(text.to_string());
        }
    }

    pub fn has_callback(&self) -> bool {
        self.on_final.lock().is_some()
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn is_transcribing(&self) -> bool {
        self.transcribing.load(Ordering::SeqCst)
    }

    fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    async fn start_recording(&self) -> CollaboratorResult<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Stt("microphone busy".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_recording(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.recording.store(false, Ordering::SeqCst);
    }

    fn set_on_final_transcript(&self, callback: Option<TranscriptCallback>) {
        *self.on_final.lock() = callback;
    }
}

#[derive(Default)]
pub struct FakeTts {
    playing: AtomicBool,
    loading: AtomicBool,
    pub error: Mutex<Option<String>>,
    pub spoken: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
    on_ended: Mutex<Option<PlaybackEndedCallback>>,
}

impl FakeTts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Put the fake into the playing state without going through the trait.
    pub fn play_text_now(&self, text: &str) {
        self.spoken.lock().push(text.to_string());
        self.playing.store(true, Ordering::SeqCst);
    }

    /// Simulate playback running to completion.
    pub fn finish_playback(&self) {
        self.playing.store(false, Ordering::SeqCst);
        let callback = self.on_ended.lock().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn has_callback(&self) -> bool {
        self.on_ended.lock().is_some()
    }
}

#[async_trait]
impl TextToSpeech for FakeTts {
    async fn play_text(&self, text: &str) -> CollaboratorResult<()> {
        self.spoken.lock().push(text.to_string());
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_playback(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        self.loading.store(false, Ordering::SeqCst);
    }

    fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    fn set_on_ended(&self, callback: Option<PlaybackEndedCallback>) {
        *self.on_ended.lock() = callback;
    }
}

// =============================================================================
// Realtime status
// =============================================================================

#[derive(Default)]
pub struct FakeRealtime {
    pub listening: AtomicBool,
    pub error: Mutex<Option<Arc<ErrorDetails>>>,
}

impl RealtimeStatus for FakeRealtime {
    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn error(&self) -> Option<Arc<ErrorDetails>> {
        self.error.lock().clone()
    }
}
