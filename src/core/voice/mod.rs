//! Voice interaction coordination.
//!
//! The coordinator sits between the host UI and the speech collaborators:
//!
//! - `idle`: nothing runs on its own
//! - `continuous`: recording starts on entry and resumes after every reply
//! - `push_to_talk`: recording follows [`VoiceCoordinator::press`] and
//!   [`VoiceCoordinator::release`]
//!
//! # Example
//!
//! ```rust,ignore
//! use aisha_voice::core::voice::{CoordinatorConfig, VoiceCoordinator, VoiceMode};
//!
//! let coordinator = VoiceCoordinator::new(CoordinatorConfig::default(), stt, tts, Some(session));
//! coordinator.set_mode(VoiceMode::Continuous).await;
//! assert!(coordinator.status().is_voice_mode_active);
//! ```

mod base;
mod coordinator;

pub use base::{
    CollaboratorError, CollaboratorResult, PlaybackEndedCallback, SpeechToText, TextToSpeech,
    TranscriptCallback, UnknownVoiceMode, VoiceMode,
};
pub use coordinator::{CoordinatorConfig, VoiceCoordinator, VoiceError, VoiceStatus};
