pub mod errors;
pub mod realtime;
pub mod telemetry;
pub mod voice;
pub mod wake_word;

// Re-export commonly used types for convenience
pub use errors::{
    ErrorCode, ErrorDetails, ErrorStage, MediaError, SessionError, SessionResult, classify,
};

pub use telemetry::{Severity, Subscription, TelemetryConfig, TelemetryEntry, TelemetrySink};

pub use realtime::{
    ConnectionState, RealtimeConfig, RealtimeSession, RealtimeStatus, RealtimeTransport,
    SessionStatus,
};

pub use wake_word::{WakeWordConfig, WakeWordDetector, WakeWordState};

pub use voice::{CoordinatorConfig, VoiceCoordinator, VoiceMode, VoiceStatus};
