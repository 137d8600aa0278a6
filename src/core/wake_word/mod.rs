//! Wake-word detection.
//!
//! A small state machine layered over a continuous speech recognizer. It wakes
//! on phrases like "hey aisha", goes back to listening on phrases like "thanks
//! aisha" or after a period of silence, and keeps the recognizer alive for as
//! long as detection is enabled.

mod detector;
mod recognizer;

pub use detector::{
    DEFAULT_END_PHRASES, DEFAULT_WAKE_PHRASES, EndCallback, EndReason, WakeCallback, WakeTrigger,
    WakeWordConfig, WakeWordDetector, WakeWordState,
};
pub use recognizer::{
    RecognitionAlternative, RecognitionErrorKind, RecognitionEvent, RecognitionHandler,
    RecognitionResult, RecognizerError, RecognizerFactory, RecognizerOptions, SpeechRecognizer,
};
