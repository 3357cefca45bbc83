//! Voice capture and read-aloud capabilities supplied by the host.

use crate::error::ChatError;
use tokio::sync::mpsc;

/// Default recognition and synthesis language.
pub const DEFAULT_SPEECH_LANGUAGE: &str = "ja-JP";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// One finished utterance. Some recognizers report the language they heard.
    Result {
        transcript: String,
        language_hint: Option<String>,
    },
    Error(String),
}

/// Where a capture implementation reports what it heard.
pub type CaptureEvents = mpsc::UnboundedSender<CaptureEvent>;

/// Speech recognizer. Results arrive on the [`CaptureEvents`] channel the
/// implementation was built with.
pub trait SpeechCapture: Send + Sync {
    /// Begin listening for one utterance.
    fn start(&self) -> Result<(), ChatError>;
    /// Switch the recognition language for the next `start`.
    fn set_language(&self, code: &str);
}

/// Fire-and-forget text to speech.
pub trait SpeechSynthesis: Send + Sync {
    fn speak(&self, text: &str, language_tag: &str);
}
