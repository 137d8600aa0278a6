//! Wake-word detector state machine.
//!
//! ```text
//! idle ──enable──▶ listening ──wake phrase──▶ awake ──end phrase──▶ ending
//!                      ▲                        │                     │
//!                      └────── auto-sleep ──────┘◀──── settle delay ──┘
//! ```
//!
//! Matching is a case-insensitive substring test against every recognition
//! alternative. Wake phrases are only honoured while not awake. End phrases are
//! only honoured on final results, while awake and outside the post-wake
//! cooldown. Every final transcript while awake re-arms the inactivity timer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::recognizer::{
    RecognitionErrorKind, RecognitionEvent, RecognitionHandler, RecognitionResult,
    RecognizerError, RecognizerFactory, RecognizerOptions, SpeechRecognizer,
};
use crate::core::telemetry::{self, Severity, TelemetrySink};

pub const DEFAULT_WAKE_PHRASES: &[&str] =
    &["hey aisha", "hi aisha", "hello aisha", "okay aisha", "ok aisha"];

pub const DEFAULT_END_PHRASES: &[&str] = &[
    "thanks aisha",
    "thank you aisha",
    "goodbye aisha",
    "bye aisha",
    "that's all",
    "stop listening",
];

const MIC_DENIED_MESSAGE: &str = "Microphone access was denied. Allow microphone access in your browser settings to use the wake word.";
const NO_MIC_MESSAGE: &str =
    "No microphone was found. Connect a microphone to use the wake word.";
const NETWORK_MESSAGE: &str = "Speech recognition lost its network connection. Retrying.";
const UNSUPPORTED_MESSAGE: &str = "Speech recognition is not supported in this environment.";

/// Detector settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WakeWordConfig {
    pub wake_phrases: Vec<String>,
    pub end_phrases: Vec<String>,
    pub language: String,
    pub max_alternatives: u32,
    /// End phrases are ignored for this long after waking
    pub cooldown: Duration,
    /// Delay between `ending` and `listening`
    pub end_settle: Duration,
    /// Inactivity timeout while awake
    pub auto_sleep: Duration,
    /// Delay before restarting the recognizer after it ends
    pub restart_delay: Duration,
    /// Delay before restarting after a network error
    pub network_retry_delay: Duration,
}

impl Default for WakeWordConfig {
    fn default() -> Self {
        Self {
            wake_phrases: DEFAULT_WAKE_PHRASES.iter().map(|s| s.to_string()).collect(),
            end_phrases: DEFAULT_END_PHRASES.iter().map(|s| s.to_string()).collect(),
            language: "en-US".to_string(),
            max_alternatives: 3,
            cooldown: Duration::from_secs(2),
            end_settle: Duration::from_millis(500),
            auto_sleep: Duration::from_secs(30),
            restart_delay: Duration::from_millis(300),
            network_retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WakeWordState {
    #[default]
    Idle,
    Listening,
    Awake,
    Ending,
}

impl WakeWordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WakeWordState::Idle => "idle",
            WakeWordState::Listening => "listening",
            WakeWordState::Awake => "awake",
            WakeWordState::Ending => "ending",
        }
    }
}

impl fmt::Display for WakeWordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What woke the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeTrigger {
    Phrase { phrase: String, transcript: String },
    Manual,
}

/// Why the awake period ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Phrase { phrase: String, transcript: String },
    Timeout,
    Manual,
}

pub type WakeCallback = Arc<dyn Fn(WakeTrigger) + Send + Sync>;
pub type EndCallback = Arc<dyn Fn(EndReason) + Send + Sync>;

#[derive(Default)]
struct DetectorState {
    enabled: bool,
    state: WakeWordState,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    /// Bumped per enable cycle; stale recognizer events are dropped
    instance: u64,
    /// Bumped per wake/sleep; stale settle timers are dropped
    awake_epoch: u64,
    /// Bumped per auto-sleep arm
    sleep_seq: u64,
    cooldown_until: Option<Instant>,
    last_transcript: Option<String>,
    error: Option<String>,
    sleep_timer: Option<JoinHandle<()>>,
    settle_timer: Option<JoinHandle<()>>,
    restart_timer: Option<JoinHandle<()>>,
}

impl DetectorState {
    /// Where the detector rests when not awake.
    fn resting(&self) -> WakeWordState {
        if self.enabled {
            WakeWordState::Listening
        } else {
            WakeWordState::Idle
        }
    }

    fn set_state(&mut self, to: WakeWordState) -> Option<(WakeWordState, WakeWordState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some((from, to))
    }

    fn take_timers(&mut self) -> Vec<JoinHandle<()>> {
        [
            self.sleep_timer.take(),
            self.settle_timer.take(),
            self.restart_timer.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

struct DetectorInner {
    config: WakeWordConfig,
    options: RecognizerOptions,
    factory: Arc<dyn RecognizerFactory>,
    telemetry: Arc<TelemetrySink>,
    on_wake: Mutex<Option<WakeCallback>>,
    on_end: Mutex<Option<EndCallback>>,
    state: Mutex<DetectorState>,
}

/// Wake-word detector. Cheap to clone.
///
/// Timers run on the ambient tokio runtime, so the detector must be driven
/// from within one.
#[derive(Clone)]
pub struct WakeWordDetector {
    inner: Arc<DetectorInner>,
}

impl fmt::Debug for WakeWordDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WakeWordDetector")
            .field("enabled", &state.enabled)
            .field("state", &state.state)
            .finish()
    }
}

enum Outcome {
    Woke(WakeTrigger),
    Ended(EndReason),
    None,
}

fn find_phrase(alternatives: &[String], phrases: &[String]) -> Option<String> {
    phrases
        .iter()
        .find(|phrase| alternatives.iter().any(|alt| alt.contains(phrase.as_str())))
        .cloned()
}

fn normalize_phrases(phrases: &[String]) -> Vec<String> {
    phrases
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

impl WakeWordDetector {
    pub fn new(config: WakeWordConfig, factory: Arc<dyn RecognizerFactory>) -> Self {
        Self::with_telemetry(config, factory, telemetry::global())
    }

    pub fn with_telemetry(
        config: WakeWordConfig,
        factory: Arc<dyn RecognizerFactory>,
        telemetry: Arc<TelemetrySink>,
    ) -> Self {
        let config = WakeWordConfig {
            wake_phrases: normalize_phrases(&config.wake_phrases),
            end_phrases: normalize_phrases(&config.end_phrases),
            ..config
        };
        let options = RecognizerOptions {
            language: config.language.clone(),
            continuous: true,
            interim_results: true,
            max_alternatives: config.max_alternatives,
        };
        Self {
            inner: Arc::new(DetectorInner {
                config,
                options,
                factory,
                telemetry,
                on_wake: Mutex::new(None),
                on_end: Mutex::new(None),
                state: Mutex::new(DetectorState::default()),
            }),
        }
    }

    pub fn config(&self) -> &WakeWordConfig {
        &self.inner.config
    }

    pub fn on_wake(&self, callback: WakeCallback) {
        *self.inner.on_wake.lock() = Some(callback);
    }

    pub fn on_end(&self, callback: EndCallback) {
        *self.inner.on_end.lock() = Some(callback);
    }

    /// Start or stop wake-word detection.
    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.inner.enable();
        } else {
            self.inner.disable();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    pub fn is_supported(&self) -> bool {
        self.inner.factory.is_supported()
    }

    pub fn state(&self) -> WakeWordState {
        self.inner.state.lock().state
    }

    pub fn is_awake(&self) -> bool {
        self.state() == WakeWordState::Awake
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }

    pub fn last_transcript(&self) -> Option<String> {
        self.inner.state.lock().last_transcript.clone()
    }

    /// Enter `awake` without a spoken wake phrase.
    pub fn force_wake(&self) {
        self.inner.force_wake();
    }

    /// Leave `awake`/`ending` immediately.
    pub fn force_sleep(&self) {
        self.inner.force_sleep();
    }
}

impl DetectorInner {
    fn record_transition(&self, transition: Option<(WakeWordState, WakeWordState)>, reason: &str) {
        let Some((from, to)) = transition else {
            return;
        };
        info!(from = %from, to = %to, reason, "Wake word state changed");
        self.telemetry.record(
            "wake_word.state",
            json!({ "from": from.as_str(), "to": to.as_str(), "reason": reason }),
            Severity::Debug,
            &json!({ "surface": "wake_word" }),
        );
    }

    fn fire(&self, outcome: Outcome) {
        match outcome {
            Outcome::Woke(trigger) => {
                let callback = self.on_wake.lock().clone();
                if let Some(callback) = callback {
                    callback(trigger);
                }
            }
            Outcome::Ended(reason) => {
                let callback = self.on_end.lock().clone();
                if let Some(callback) = callback {
                    callback(reason);
                }
            }
            Outcome::None => {}
        }
    }

    fn enable(self: &Arc<Self>) {
        let instance = {
            let mut state = self.state.lock();
            if state.enabled {
                return;
            }
            state.enabled = true;
            state.instance += 1;
            state.error = None;
            state.instance
        };

        if !self.factory.is_supported() {
            self.fail_enable(instance, UNSUPPORTED_MESSAGE.to_string(), "unsupported");
            return;
        }

        let recognizer = match self.factory.create(&self.options) {
            Ok(recognizer) => recognizer,
            Err(e) => {
                self.fail_enable(instance, e.to_string(), "start_failed");
                return;
            }
        };

        {
            let mut state = self.state.lock();
            if state.instance != instance {
                return;
            }
            state.recognizer = Some(Arc::clone(&recognizer));
        }
        recognizer.set_handler(Some(self.recognition_handler(instance)));

        match recognizer.start() {
            Ok(()) => {
                let transition = {
                    let mut state = self.state.lock();
                    if state.instance != instance || !state.enabled {
                        return;
                    }
                    let resting = state.resting();
                    state.set_state(resting)
                };
                self.record_transition(transition, "enabled");
            }
            Err(e) => {
                recognizer.set_handler(None);
                self.fail_enable(instance, e.to_string(), "start_failed");
            }
        }
    }

    fn fail_enable(&self, instance: u64, message: String, reason: &str) {
        warn!(error = %message, "Wake word detection could not start");
        let transition = {
            let mut state = self.state.lock();
            if state.instance != instance {
                return;
            }
            state.enabled = false;
            state.recognizer = None;
            state.error = Some(message);
            state.set_state(WakeWordState::Idle)
        };
        self.record_transition(transition, reason);
    }

    fn disable(&self) {
        let (recognizer, timers, transition) = {
            let mut state = self.state.lock();
            state.enabled = false;
            state.instance += 1;
            state.awake_epoch += 1;
            state.sleep_seq += 1;
            state.cooldown_until = None;
            let timers = state.take_timers();
            let recognizer = state.recognizer.take();
            let transition = state.set_state(WakeWordState::Idle);
            (recognizer, timers, transition)
        };

        for timer in timers {
            timer.abort();
        }
        if let Some(recognizer) = recognizer {
            recognizer.set_handler(None);
            recognizer.abort();
            debug!("Wake word recognizer released");
        }
        self.record_transition(transition, "disabled");
    }

    fn recognition_handler(self: &Arc<Self>, instance: u64) -> RecognitionHandler {
        let weak = Arc::downgrade(self);
        Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_recognition(instance, event);
            }
        })
    }

    fn is_live(&self, instance: u64) -> bool {
        let state = self.state.lock();
        state.enabled && state.instance == instance
    }

    fn on_recognition(self: &Arc<Self>, instance: u64, event: RecognitionEvent) {
        if !self.is_live(instance) {
            debug!(?event, "Ignoring event from a released recognizer");
            return;
        }

        match event {
            RecognitionEvent::Start => {
                let transition = {
                    let mut state = self.state.lock();
                    state.error = None;
                    if state.state == WakeWordState::Idle {
                        state.set_state(WakeWordState::Listening)
                    } else {
                        None
                    }
                };
                debug!("Wake word recognizer started");
                self.record_transition(transition, "recognizer_start");
            }
            RecognitionEvent::Result(results) => {
                for result in &results {
                    self.on_result(instance, result);
                }
            }
            RecognitionEvent::Error { kind, message } => self.on_error(instance, kind, message),
            RecognitionEvent::End => {
                self.schedule_restart(instance, self.config.restart_delay, "end");
            }
        }
    }

    fn on_result(self: &Arc<Self>, instance: u64, result: &RecognitionResult) {
        let alternatives: Vec<String> = result
            .alternatives
            .iter()
            .map(|a| a.transcript.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if alternatives.is_empty() {
            return;
        }
        let transcript = result.transcript().unwrap_or_default().trim().to_string();

        let (outcome, transition, reason) = {
            let mut state = self.state.lock();
            if !state.enabled || state.instance != instance {
                return;
            }
            state.last_transcript = Some(transcript.clone());

            let current = state.state;
            match current {
                WakeWordState::Listening | WakeWordState::Ending => {
                    match find_phrase(&alternatives, &self.config.wake_phrases) {
                        Some(phrase) => {
                            let transition = self.wake_locked(&mut state);
                            (
                                Outcome::Woke(WakeTrigger::Phrase { phrase, transcript }),
                                transition,
                                "wake_phrase",
                            )
                        }
                        None => (Outcome::None, None, ""),
                    }
                }
                WakeWordState::Awake if result.is_final => {
                    let cooling = state
                        .cooldown_until
                        .is_some_and(|until| Instant::now() < until);
                    let end_phrase = if cooling {
                        None
                    } else {
                        find_phrase(&alternatives, &self.config.end_phrases)
                    };
                    match end_phrase {
                        Some(phrase) => {
                            let transition = self.end_locked(&mut state);
                            (
                                Outcome::Ended(EndReason::Phrase { phrase, transcript }),
                                transition,
                                "end_phrase",
                            )
                        }
                        None => {
                            self.arm_sleep_timer(&mut state);
                            (Outcome::None, None, "")
                        }
                    }
                }
                WakeWordState::Awake | WakeWordState::Idle => (Outcome::None, None, ""),
            }
        };

        self.record_transition(transition, reason);
        self.fire(outcome);
    }

    fn wake_locked(
        self: &Arc<Self>,
        state: &mut DetectorState,
    ) -> Option<(WakeWordState, WakeWordState)> {
        state.awake_epoch += 1;
        state.cooldown_until = Some(Instant::now() + self.config.cooldown);
        if let Some(timer) = state.settle_timer.take() {
            timer.abort();
        }
        self.arm_sleep_timer(state);
        state.set_state(WakeWordState::Awake)
    }

    fn end_locked(
        self: &Arc<Self>,
        state: &mut DetectorState,
    ) -> Option<(WakeWordState, WakeWordState)> {
        state.sleep_seq += 1;
        if let Some(timer) = state.sleep_timer.take() {
            timer.abort();
        }
        state.cooldown_until = None;

        let epoch = state.awake_epoch;
        let delay = self.config.end_settle;
        let weak = Arc::downgrade(self);
        if let Some(timer) = state.settle_timer.take() {
            timer.abort();
        }
        state.settle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_settled(epoch);
            }
        }));

        state.set_state(WakeWordState::Ending)
    }

    fn on_settled(&self, epoch: u64) {
        let transition = {
            let mut state = self.state.lock();
            if state.awake_epoch != epoch || state.state != WakeWordState::Ending {
                return;
            }
            state.settle_timer = None;
            let resting = state.resting();
            state.set_state(resting)
        };
        self.record_transition(transition, "settled");
    }

    fn arm_sleep_timer(self: &Arc<Self>, state: &mut DetectorState) {
        if let Some(timer) = state.sleep_timer.take() {
            timer.abort();
        }
        state.sleep_seq += 1;
        let seq = state.sleep_seq;
        let delay = self.config.auto_sleep;
        let weak = Arc::downgrade(self);
        state.sleep_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_sleep_timeout(seq);
            }
        }));
    }

    fn on_sleep_timeout(&self, seq: u64) {
        let transition = {
            let mut state = self.state.lock();
            if state.sleep_seq != seq || state.state != WakeWordState::Awake {
                return;
            }
            state.sleep_timer = None;
            state.cooldown_until = None;
            state.awake_epoch += 1;
            let resting = state.resting();
            state.set_state(resting)
        };
        debug!("Wake word auto-sleep after inactivity");
        self.record_transition(transition, "auto_sleep");
        self.fire(Outcome::Ended(EndReason::Timeout));
    }

    fn on_error(self: &Arc<Self>, instance: u64, kind: RecognitionErrorKind, message: Option<String>) {
        match kind {
            RecognitionErrorKind::NoSpeech | RecognitionErrorKind::Aborted => {
                debug!(kind = kind.as_str(), "Ignoring recognition error");
            }
            RecognitionErrorKind::NotAllowed | RecognitionErrorKind::ServiceNotAllowed => {
                self.fail_terminal(instance, MIC_DENIED_MESSAGE, "permission_denied");
            }
            RecognitionErrorKind::AudioCapture => {
                self.fail_terminal(instance, NO_MIC_MESSAGE, "audio_capture");
            }
            RecognitionErrorKind::Network => {
                warn!("Wake word recognizer network error");
                self.state.lock().error = Some(NETWORK_MESSAGE.to_string());
                self.schedule_restart(instance, self.config.network_retry_delay, "network");
            }
            RecognitionErrorKind::LanguageNotSupported | RecognitionErrorKind::Other => {
                let detail = message.unwrap_or_else(|| kind.as_str().to_string());
                warn!(kind = kind.as_str(), error = %detail, "Wake word recognizer error");
                self.state.lock().error = Some(format!("Speech recognition error: {detail}"));
            }
        }
    }

    fn fail_terminal(&self, instance: u64, message: &str, reason: &str) {
        let (recognizer, timers, transition) = {
            let mut state = self.state.lock();
            if state.instance != instance {
                return;
            }
            state.enabled = false;
            state.instance += 1;
            state.awake_epoch += 1;
            state.sleep_seq += 1;
            state.cooldown_until = None;
            state.error = Some(message.to_string());
            let timers = state.take_timers();
            let recognizer = state.recognizer.take();
            (recognizer, timers, state.set_state(WakeWordState::Idle))
        };

        warn!(reason, "Wake word detection stopped");
        for timer in timers {
            timer.abort();
        }
        if let Some(recognizer) = recognizer {
            recognizer.set_handler(None);
            recognizer.abort();
        }
        self.record_transition(transition, reason);
    }

    fn schedule_restart(self: &Arc<Self>, instance: u64, delay: Duration, reason: &str) {
        let mut state = self.state.lock();
        if !state.enabled || state.instance != instance {
            return;
        }
        if state
            .restart_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
        {
            return;
        }

        debug!(
            reason,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling recognizer restart"
        );
        let weak = Arc::downgrade(self);
        state.restart_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.restart(instance);
            }
        }));
    }

    fn restart(&self, instance: u64) {
        let recognizer = {
            let mut state = self.state.lock();
            state.restart_timer = None;
            if !state.enabled || state.instance != instance {
                return;
            }
            state.recognizer.clone()
        };
        let Some(recognizer) = recognizer else {
            return;
        };

        match recognizer.start() {
            Ok(()) => debug!("Wake word recognizer restarted"),
            Err(RecognizerError::AlreadyStarted) => {
                debug!("Wake word recognizer already running")
            }
            Err(e) => {
                warn!(error = %e, "Wake word recognizer restart failed");
                self.state.lock().error = Some(e.to_string());
            }
        }
    }

    fn force_wake(self: &Arc<Self>) {
        let transition = {
            let mut state = self.state.lock();
            if state.state == WakeWordState::Awake {
                self.arm_sleep_timer(&mut state);
                return;
            }
            self.wake_locked(&mut state)
        };
        self.record_transition(transition, "force_wake");
        self.fire(Outcome::Woke(WakeTrigger::Manual));
    }

    fn force_sleep(&self) {
        let (was_awake, timers, transition) = {
            let mut state = self.state.lock();
            if !matches!(state.state, WakeWordState::Awake | WakeWordState::Ending) {
                return;
            }
            let was_awake = state.state == WakeWordState::Awake;
            state.awake_epoch += 1;
            state.sleep_seq += 1;
            state.cooldown_until = None;
            let timers: Vec<JoinHandle<()>> = [state.sleep_timer.take(), state.settle_timer.take()]
                .into_iter()
                .flatten()
                .collect();
            let resting = state.resting();
            (was_awake, timers, state.set_state(resting))
        };

        for timer in timers {
            timer.abort();
        }
        self.record_transition(transition, "force_sleep");
        if was_awake {
            self.fire(Outcome::Ended(EndReason::Manual));
        }
    }
}

impl Drop for DetectorInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for timer in state.take_timers() {
            timer.abort();
        }
        if let Some(recognizer) = state.recognizer.take() {
            recognizer.set_handler(None);
            recognizer.abort();
        }
    }
}
