//! Speech collaborator traits driven by the voice coordinator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors reported by speech collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// Speech-to-text failure
    #[error("Speech-to-text error: {0}")]
    Stt(String),

    /// Text-to-speech failure
    #[error("Text-to-speech error: {0}")]
    Tts(String),
}

/// Result type for collaborator operations.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Returned when a mode name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown voice mode: {0}")]
pub struct UnknownVoiceMode(pub String);

// =============================================================================
// Modes
// =============================================================================

/// Interaction mode of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceMode {
    /// Nothing is recorded or played automatically
    #[default]
    Idle,
    /// Hands-free: recording restarts after each assistant reply
    Continuous,
    /// Recording only while the talk control is held
    PushToTalk,
}

impl VoiceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceMode::Idle => "idle",
            VoiceMode::Continuous => "continuous",
            VoiceMode::PushToTalk => "push_to_talk",
        }
    }
}

impl fmt::Display for VoiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoiceMode {
    type Err = UnknownVoiceMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "idle" => Ok(VoiceMode::Idle),
            "continuous" => Ok(VoiceMode::Continuous),
            "push_to_talk" => Ok(VoiceMode::PushToTalk),
            other => Err(UnknownVoiceMode(other.to_string())),
        }
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Final transcript produced by speech-to-text.
pub type TranscriptCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Fired when text-to-speech playback finishes.
pub type PlaybackEndedCallback = Arc<dyn Fn() + Send + Sync>;

// =============================================================================
// Collaborator Traits
// =============================================================================

/// Microphone recording plus transcription.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn is_recording(&self) -> bool;

    fn is_transcribing(&self) -> bool;

    /// Last error, if any.
    fn error(&self) -> Option<String>;

    async fn start_recording(&self) -> CollaboratorResult<()>;

    /// Stop recording; the captured audio is transcribed.
    async fn stop_recording(&self);

    fn set_on_final_transcript(&self, callback: Option<TranscriptCallback>);
}

/// Speech synthesis and playback.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize and start playing `text`.
    async fn play_text(&self, text: &str) -> CollaboratorResult<()>;

    fn stop_playback(&self);

    fn is_loading(&self) -> bool;

    fn is_playing(&self) -> bool;

    fn error(&self) -> Option<String>;

    fn set_on_ended(&self, callback: Option<PlaybackEndedCallback>);
}
