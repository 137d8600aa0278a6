//! Wake word detector integration tests
//!
//! Time is paused so cooldown, settle, auto-sleep and restart timers can be
//! stepped through deterministically.

mod mock_collaborators;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use aisha_voice::core::telemetry::{TelemetryConfig, TelemetrySink};
use aisha_voice::core::wake_word::{
    EndReason, RecognitionErrorKind, RecognitionEvent, WakeTrigger, WakeWordConfig,
    WakeWordDetector, WakeWordState,
};

use mock_collaborators::{FakeRecognizer, FakeRecognizerFactory};

struct Harness {
    detector: WakeWordDetector,
    factory: Arc<FakeRecognizerFactory>,
    telemetry: Arc<TelemetrySink>,
    wakes: Arc<Mutex<Vec<WakeTrigger>>>,
    ends: Arc<Mutex<Vec<EndReason>>>,
}

impl Harness {
    fn new() -> Self {
        let factory = FakeRecognizerFactory::new();
        let telemetry = TelemetrySink::new(TelemetryConfig::default());
        let detector = WakeWordDetector::with_telemetry(
            WakeWordConfig::default(),
            factory.clone(),
            telemetry.clone(),
        );

        let wakes = Arc::new(Mutex::new(Vec::new()));
        let sink = wakes.clone();
        detector.on_wake(Arc::new(move |trigger: WakeTrigger| sink.lock().push(trigger)));

        let ends = Arc::new(Mutex::new(Vec::new()));
        let sink = ends.clone();
        detector.on_end(Arc::new(move |reason: EndReason| sink.lock().push(reason)));

        Self {
            detector,
            factory,
            telemetry,
            wakes,
            ends,
        }
    }

    fn enabled() -> (Self, Arc<FakeRecognizer>) {
        let h = Self::new();
        h.detector.set_enabled(true);
        let recognizer = h.factory.last();
        (h, recognizer)
    }
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// =============================================================================
// Enable / disable
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_enable_starts_listening() {
    let (h, recognizer) = Harness::enabled();

    assert!(h.detector.is_enabled());
    assert!(h.detector.is_supported());
    assert_eq!(h.detector.state(), WakeWordState::Listening);
    assert_eq!(recognizer.starts(), 1);
    assert!(recognizer.has_handler());

    let options = h.factory.options.lock().clone().unwrap();
    assert_eq!(options.language, "en-US");
    assert!(options.continuous);
    assert!(options.interim_results);
    assert_eq!(options.max_alternatives, 3);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_recognizer_stays_idle() {
    let h = Harness::new();
    h.factory
        .supported
        .store(false, std::sync::atomic::Ordering::SeqCst);

    h.detector.set_enabled(true);

    assert!(!h.detector.is_supported());
    assert!(!h.detector.is_enabled());
    assert_eq!(h.detector.state(), WakeWordState::Idle);
    assert!(h.detector.error().is_some());
    assert_eq!(h.factory.created_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disable_releases_recognizer_and_timers() {
    let (h, recognizer) = Harness::enabled();
    recognizer.say("hey aisha");
    assert!(h.detector.is_awake());

    h.detector.set_enabled(false);
    assert_eq!(h.detector.state(), WakeWordState::Idle);
    assert!(!recognizer.has_handler());
    assert_eq!(recognizer.aborts.load(std::sync::atomic::Ordering::SeqCst), 1);

    advance(31_000).await;
    assert!(h.ends.lock().is_empty());
    assert_eq!(h.detector.state(), WakeWordState::Idle);
}

// =============================================================================
// Wake and end phrases
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_wake_phrase_wakes() {
    let (h, recognizer) = Harness::enabled();

    recognizer.say("Hey Aisha how are you");

    assert_eq!(h.detector.state(), WakeWordState::Awake);
    assert_eq!(
        *h.wakes.lock(),
        vec![WakeTrigger::Phrase {
            phrase: "hey aisha".to_string(),
            transcript: "Hey Aisha how are you".to_string(),
        }]
    );
    assert_eq!(
        h.detector.last_transcript().as_deref(),
        Some("Hey Aisha how are you")
    );
    assert!(
        h.telemetry
            .snapshot()
            .iter()
            .any(|e| e.event == "wake_word.state" && e.payload["to"] == "awake")
    );
}

#[tokio::test(start_paused = true)]
async fn test_interim_results_can_wake() {
    let (h, recognizer) = Harness::enabled();
    recognizer.say_interim("ok aisha");
    assert!(h.detector.is_awake());
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_speech_does_not_wake() {
    let (h, recognizer) = Harness::enabled();
    recognizer.say("thanks aisha");
    recognizer.say("what's the weather");
    assert_eq!(h.detector.state(), WakeWordState::Listening);
    assert!(h.wakes.lock().is_empty());
    assert!(h.ends.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_wake_phrase_fires_once() {
    let (h, recognizer) = Harness::enabled();
    recognizer.say("hey aisha");
    recognizer.say("hey aisha");
    advance(2_500).await;
    recognizer.say_interim("hey aisha");
    assert_eq!(h.wakes.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_end_phrase_after_cooldown() {
    let (h, recognizer) = Harness::enabled();
    recognizer.say("hey aisha");
    advance(2_100).await;

    recognizer.say("ok thanks aisha");
    assert_eq!(h.detector.state(), WakeWordState::Ending);
    assert_eq!(
        *h.ends.lock(),
        vec![EndReason::Phrase {
            phrase: "thanks aisha".to_string(),
            transcript: "ok thanks aisha".to_string(),
        }]
    );

    advance(501).await;
    assert_eq!(h.detector.state(), WakeWordState::Listening);
    assert_eq!(h.ends.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_end_phrase_ignored_during_cooldown() {
    let (h, recognizer) = Harness::enabled();
    recognizer.say("hey aisha");
    advance(1_000).await;

    recognizer.say("thanks aisha");
    assert!(h.detector.is_awake());
    assert!(h.ends.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_interim_end_phrase_ignored() {
    let (h, recognizer) = Harness::enabled();
    recognizer.say("hey aisha");
    advance(2_100).await;

    recognizer.say_interim("goodbye aisha");
    assert!(h.detector.is_awake());
    assert!(h.ends.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wake_during_ending_cancels_settle() {
    let (h, recognizer) = Harness::enabled();
    recognizer.say("hey aisha");
    advance(2_100).await;
    recognizer.say("bye aisha");
    assert_eq!(h.detector.state(), WakeWordState::Ending);

    recognizer.say("hey aisha");
    assert!(h.detector.is_awake());

    advance(600).await;
    assert!(h.detector.is_awake());
    assert_eq!(h.wakes.lock().len(), 2);
}

// =============================================================================
// Auto-sleep
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_auto_sleep_after_inactivity() {
    let (h, recognizer) = Harness::enabled();
    recognizer.say("hey aisha");

    advance(29_000).await;
    assert!(h.detector.is_awake());

    advance(1_100).await;
    assert_eq!(h.detector.state(), WakeWordState::Listening);
    assert_eq!(*h.ends.lock(), vec![EndReason::Timeout]);
}

#[tokio::test(start_paused = true)]
async fn test_final_transcript_rearms_auto_sleep() {
    let (h, recognizer) = Harness::enabled();
    recognizer.say("hey aisha");

    advance(20_000).await;
    recognizer.say("open the acme account");
    advance(20_000).await;
    assert!(h.detector.is_awake());

    advance(10_100).await;
    assert_eq!(h.detector.state(), WakeWordState::Listening);
}

// =============================================================================
// Recognizer lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_recognizer_restarts_after_end() {
    let (h, recognizer) = Harness::enabled();

    recognizer.emit(RecognitionEvent::End);
    advance(200).await;
    assert_eq!(recognizer.starts(), 1);

    advance(150).await;
    assert_eq!(recognizer.starts(), 2);
    assert_eq!(h.detector.state(), WakeWordState::Listening);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_is_terminal() {
    let (h, recognizer) = Harness::enabled();

    recognizer.emit(RecognitionEvent::Error {
        kind: RecognitionErrorKind::NotAllowed,
        message: None,
    });

    assert!(!h.detector.is_enabled());
    assert_eq!(h.detector.state(), WakeWordState::Idle);
    assert!(h.detector.error().unwrap().contains("denied"));
    assert!(!recognizer.has_handler());

    advance(5_000).await;
    assert_eq!(recognizer.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_audio_capture_error_is_terminal() {
    let (h, recognizer) = Harness::enabled();
    recognizer.emit(RecognitionEvent::Error {
        kind: RecognitionErrorKind::AudioCapture,
        message: None,
    });
    assert!(!h.detector.is_enabled());
    assert!(h.detector.error().unwrap().contains("microphone"));
}

#[tokio::test(start_paused = true)]
async fn test_network_error_retries_after_delay() {
    let (h, recognizer) = Harness::enabled();

    recognizer.emit(RecognitionEvent::Error {
        kind: RecognitionErrorKind::Network,
        message: None,
    });
    recognizer.emit(RecognitionEvent::End);
    assert!(h.detector.error().is_some());

    advance(400).await;
    assert_eq!(recognizer.starts(), 1);

    advance(700).await;
    assert_eq!(recognizer.starts(), 2);

    recognizer.emit(RecognitionEvent::Start);
    assert!(h.detector.error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_no_speech_is_ignored() {
    let (h, recognizer) = Harness::enabled();
    recognizer.emit(RecognitionEvent::Error {
        kind: RecognitionErrorKind::NoSpeech,
        message: None,
    });
    assert!(h.detector.is_enabled());
    assert_eq!(h.detector.state(), WakeWordState::Listening);
    assert!(h.detector.error().is_none());
}

// =============================================================================
// Manual control
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_force_wake_and_sleep() {
    let (h, _recognizer) = Harness::enabled();

    h.detector.force_sleep();
    assert!(h.ends.lock().is_empty());

    h.detector.force_wake();
    assert!(h.detector.is_awake());
    assert_eq!(*h.wakes.lock(), vec![WakeTrigger::Manual]);

    h.detector.force_sleep();
    assert_eq!(h.detector.state(), WakeWordState::Listening);
    assert_eq!(*h.ends.lock(), vec![EndReason::Manual]);

    advance(31_000).await;
    assert_eq!(h.ends.lock().len(), 1);
}
