//! Continuous speech recognition seam used by the wake-word detector.
//!
//! A [`RecognizerFactory`] creates one [`SpeechRecognizer`] per enable cycle.
//! The recognizer reports start, results, errors and end through a single
//! [`RecognitionHandler`].

use std::sync::Arc;

use thiserror::Error;

/// One transcription hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionAlternative {
    pub transcript: String,
    pub confidence: f32,
}

/// A recognition result with its alternatives.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub alternatives: Vec<RecognitionAlternative>,
    pub is_final: bool,
}

impl RecognitionResult {
    pub fn new(transcripts: &[&str], is_final: bool) -> Self {
        Self {
            alternatives: transcripts
                .iter()
                .map(|t| RecognitionAlternative {
                    transcript: t.to_string(),
                    confidence: 1.0,
                })
                .collect(),
            is_final,
        }
    }

    pub fn final_text(transcript: &str) -> Self {
        Self::new(&[transcript], true)
    }

    pub fn interim(transcript: &str) -> Self {
        Self::new(&[transcript], false)
    }

    /// Transcript of the top alternative.
    pub fn transcript(&self) -> Option<&str> {
        self.alternatives.first().map(|a| a.transcript.as_str())
    }
}

/// Error codes reported by the recognition engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    NotAllowed,
    ServiceNotAllowed,
    AudioCapture,
    NoSpeech,
    Network,
    Aborted,
    LanguageNotSupported,
    Other,
}

impl RecognitionErrorKind {
    /// Parse an engine error code such as `not-allowed` or `no-speech`.
    pub fn parse(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "not-allowed" => RecognitionErrorKind::NotAllowed,
            "service-not-allowed" => RecognitionErrorKind::ServiceNotAllowed,
            "audio-capture" => RecognitionErrorKind::AudioCapture,
            "no-speech" => RecognitionErrorKind::NoSpeech,
            "network" => RecognitionErrorKind::Network,
            "aborted" => RecognitionErrorKind::Aborted,
            "language-not-supported" => RecognitionErrorKind::LanguageNotSupported,
            _ => RecognitionErrorKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionErrorKind::NotAllowed => "not-allowed",
            RecognitionErrorKind::ServiceNotAllowed => "service-not-allowed",
            RecognitionErrorKind::AudioCapture => "audio-capture",
            RecognitionErrorKind::NoSpeech => "no-speech",
            RecognitionErrorKind::Network => "network",
            RecognitionErrorKind::Aborted => "aborted",
            RecognitionErrorKind::LanguageNotSupported => "language-not-supported",
            RecognitionErrorKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Start,
    Result(Vec<RecognitionResult>),
    Error {
        kind: RecognitionErrorKind,
        message: Option<String>,
    },
    End,
}

pub type RecognitionHandler = Arc<dyn Fn(RecognitionEvent) + Send + Sync>;

/// Recognizer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizerOptions {
    pub language: String,
    pub continuous: bool,
    pub interim_results: bool,
    pub max_alternatives: u32,
}

impl Default for RecognizerOptions {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            continuous: true,
            interim_results: true,
            max_alternatives: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognizerError {
    #[error("Speech recognition is not supported")]
    Unsupported,

    #[error("Recognizer is already started")]
    AlreadyStarted,

    #[error("Recognizer error: {0}")]
    Engine(String),
}

/// A running recognition session.
pub trait SpeechRecognizer: Send + Sync {
    fn set_handler(&self, handler: Option<RecognitionHandler>);

    fn start(&self) -> Result<(), RecognizerError>;

    /// Stop and deliver pending results.
    fn stop(&self);

    /// Stop immediately, discarding pending results.
    fn abort(&self);
}

/// Creates recognizers.
pub trait RecognizerFactory: Send + Sync {
    fn is_supported(&self) -> bool;

    fn create(
        &self,
        options: &RecognizerOptions,
    ) -> Result<Arc<dyn SpeechRecognizer>, RecognizerError>;
}
