//! Voice interaction coordinator.
//!
//! Composes speech-to-text, text-to-speech and (optionally) a realtime session
//! behind a mode API. Mode transitions are serialized: each one stops whatever
//! the previous mode had running before the next mode takes effect.
//!
//! In continuous mode the coordinator resumes recording after each assistant
//! reply, following a short turn-taking pause. The resume is tied to the mode
//! generation that scheduled it and is dropped if the mode changed meanwhile.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::base::{
    CollaboratorResult, SpeechToText, TextToSpeech, TranscriptCallback, VoiceMode,
};
use crate::core::errors::ErrorDetails;
use crate::core::realtime::RealtimeStatus;

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Pause between the end of playback and resumed recording in continuous mode.
    /// Default: 400ms
    pub turn_taking_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            turn_taking_delay: Duration::from_millis(400),
        }
    }
}

/// The first error reported by a collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceError {
    Stt(String),
    Tts(String),
    Realtime(Arc<ErrorDetails>),
}

impl VoiceError {
    pub fn message(&self) -> &str {
        match self {
            VoiceError::Stt(message) | VoiceError::Tts(message) => message,
            VoiceError::Realtime(details) => &details.message,
        }
    }
}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Derived status for the host UI.
#[derive(Debug, Clone)]
pub struct VoiceStatus {
    pub mode: VoiceMode,
    pub is_listening: bool,
    pub is_speaking: bool,
    pub is_transcribing: bool,
    pub is_voice_mode_active: bool,
    pub is_continuous_mode: bool,
    pub is_push_to_talk_mode: bool,
    pub error: Option<VoiceError>,
    pub transcript: Option<String>,
}

struct CoordinatorInner {
    config: CoordinatorConfig,
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    realtime: Option<Arc<dyn RealtimeStatus>>,
    mode: Mutex<VoiceMode>,
    generation: AtomicU64,
    transition: tokio::sync::Mutex<()>,
    transcript: Mutex<Option<String>>,
    on_transcript: Mutex<Option<TranscriptCallback>>,
    resume_timer: Mutex<Option<JoinHandle<()>>>,
}

/// Voice mode coordinator. Cheap to clone.
#[derive(Clone)]
pub struct VoiceCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl fmt::Debug for VoiceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceCoordinator")
            .field("mode", &self.inner.mode())
            .field("generation", &self.inner.generation.load(Ordering::SeqCst))
            .finish()
    }
}

impl VoiceCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        realtime: Option<Arc<dyn RealtimeStatus>>,
    ) -> Self {
        let inner = Arc::new(CoordinatorInner {
            config,
            stt,
            tts,
            realtime,
            mode: Mutex::new(VoiceMode::Idle),
            generation: AtomicU64::new(0),
            transition: tokio::sync::Mutex::new(()),
            transcript: Mutex::new(None),
            on_transcript: Mutex::new(None),
            resume_timer: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        inner
            .stt
            .set_on_final_transcript(Some(Arc::new(move |text: String| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_final_transcript(text);
                }
            })));

        let weak = Arc::downgrade(&inner);
        inner.tts.set_on_ended(Some(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_playback_ended();
            }
        })));

        Self { inner }
    }

    /// Forward each final transcript to the host.
    pub fn on_transcript(&self, callback: TranscriptCallback) {
        *self.inner.on_transcript.lock() = Some(callback);
    }

    pub fn mode(&self) -> VoiceMode {
        self.inner.mode()
    }

    /// Switch modes. Recording and playback of the previous mode are stopped
    /// first; entering `continuous` starts recording.
    pub async fn set_mode(&self, next: VoiceMode) {
        let _guard = self.inner.transition.lock().await;
        self.inner.switch_mode_locked(next).await;
    }

    /// Switch modes by name. Unknown names are logged and ignored.
    pub async fn set_mode_by_name(&self, name: &str) -> bool {
        match name.parse::<VoiceMode>() {
            Ok(mode) => {
                self.set_mode(mode).await;
                true
            }
            Err(e) => {
                warn!(mode = name, error = %e, "Ignoring unknown voice mode");
                false
            }
        }
    }

    pub async fn start_continuous(&self) {
        self.set_mode(VoiceMode::Continuous).await;
    }

    pub async fn stop_continuous(&self) {
        let _guard = self.inner.transition.lock().await;
        if self.inner.mode() == VoiceMode::Continuous {
            self.inner.switch_mode_locked(VoiceMode::Idle).await;
        }
    }

    /// Push-to-talk press: enter the mode if needed, interrupt playback and
    /// begin recording.
    pub async fn press(&self) -> CollaboratorResult<()> {
        let _guard = self.inner.transition.lock().await;
        self.inner.switch_mode_locked(VoiceMode::PushToTalk).await;

        let tts = &self.inner.tts;
        if tts.is_playing() || tts.is_loading() {
            tts.stop_playback();
        }
        if !self.inner.stt.is_recording() {
            self.inner.stt.start_recording().await?;
        }
        debug!("Push-to-talk pressed");
        Ok(())
    }

    /// Push-to-talk release: stop recording, stay in the mode.
    pub async fn release(&self) {
        let _guard = self.inner.transition.lock().await;
        if self.inner.mode() != VoiceMode::PushToTalk {
            return;
        }
        if self.inner.stt.is_recording() {
            self.inner.stt.stop_recording().await;
        }
        debug!("Push-to-talk released");
    }

    /// Speak `text`. In continuous mode recording is paused first so the
    /// reply is not transcribed; it resumes when playback ends.
    pub async fn speak(&self, text: &str) -> CollaboratorResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        {
            let _guard = self.inner.transition.lock().await;
            self.inner.cancel_resume();
            if self.inner.mode() == VoiceMode::Continuous && self.inner.stt.is_recording() {
                self.inner.stt.stop_recording().await;
            }
        }
        self.inner.tts.play_text(text).await
    }

    /// Stop everything, forget the transcript and return to `idle`.
    pub async fn reset(&self) {
        let _guard = self.inner.transition.lock().await;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel_resume();
        if self.inner.stt.is_recording() {
            self.inner.stt.stop_recording().await;
        }
        self.inner.tts.stop_playback();
        *self.inner.transcript.lock() = None;
        *self.inner.mode.lock() = VoiceMode::Idle;
        info!("Voice coordinator reset");
    }

    pub fn transcript(&self) -> Option<String> {
        self.inner.transcript.lock().clone()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.stt.is_recording()
            || self
                .inner
                .realtime
                .as_ref()
                .is_some_and(|realtime| realtime.is_listening())
    }

    pub fn is_speaking(&self) -> bool {
        self.inner.tts.is_loading() || self.inner.tts.is_playing()
    }

    /// First error among speech-to-text, text-to-speech and realtime.
    pub fn error(&self) -> Option<VoiceError> {
        self.inner
            .stt
            .error()
            .map(VoiceError::Stt)
            .or_else(|| self.inner.tts.error().map(VoiceError::Tts))
            .or_else(|| {
                self.inner
                    .realtime
                    .as_ref()
                    .and_then(|realtime| realtime.error())
                    .map(VoiceError::Realtime)
            })
    }

    pub fn status(&self) -> VoiceStatus {
        let mode = self.mode();
        VoiceStatus {
            mode,
            is_listening: self.is_listening(),
            is_speaking: self.is_speaking(),
            is_transcribing: self.inner.stt.is_transcribing(),
            is_voice_mode_active: mode != VoiceMode::Idle,
            is_continuous_mode: mode == VoiceMode::Continuous,
            is_push_to_talk_mode: mode == VoiceMode::PushToTalk,
            error: self.error(),
            transcript: self.transcript(),
        }
    }
}

impl CoordinatorInner {
    fn mode(&self) -> VoiceMode {
        *self.mode.lock()
    }

    fn cancel_resume(&self) {
        if let Some(timer) = self.resume_timer.lock().take() {
            timer.abort();
        }
    }

    /// Caller holds the transition lock.
    async fn switch_mode_locked(&self, next: VoiceMode) {
        let previous = self.mode();
        if previous == next {
            debug!(mode = %next, "Voice mode unchanged");
            return;
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel_resume();
        if self.stt.is_recording() {
            self.stt.stop_recording().await;
        }
        if self.tts.is_playing() || self.tts.is_loading() {
            self.tts.stop_playback();
        }

        *self.mode.lock() = next;
        info!(from = %previous, to = %next, "Voice mode changed");

        if next == VoiceMode::Continuous {
            if let Err(e) = self.stt.start_recording().await {
                warn!(error = %e, "Could not start recording for continuous mode");
            }
        }
    }

    fn on_final_transcript(&self, text: String) {
        debug!(chars = text.chars().count(), "Final transcript received");
        *self.transcript.lock() = Some(text.clone());
        let callback = self.on_transcript.lock().clone();
        if let Some(callback) = callback {
            callback(text);
        }
    }

    fn on_playback_ended(self: &Arc<Self>) {
        if self.mode() != VoiceMode::Continuous {
            return;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let delay = self.config.turn_taking_delay;
        let weak = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.resume_listening(generation).await;
            }
        });
        if let Some(previous) = self.resume_timer.lock().replace(timer) {
            previous.abort();
        }
    }

    async fn resume_listening(&self, generation: u64) {
        let _guard = self.transition.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation
            || self.mode() != VoiceMode::Continuous
        {
            debug!("Skipping stale resume");
            return;
        }
        if self.stt.is_recording() || self.tts.is_playing() || self.tts.is_loading() {
            return;
        }
        debug!("Resuming recording after playback");
        if let Err(e) = self.stt.start_recording().await {
            warn!(error = %e, "Could not resume recording");
        }
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if let Some(timer) = self.resume_timer.get_mut().take() {
            timer.abort();
        }
        self.stt.set_on_final_transcript(None);
        self.tts.set_on_ended(None);
    }
}
