use chatlink::error::ChatError;
use chatlink::speech::{CaptureEvent, CaptureEvents, SpeechCapture, SpeechSynthesis};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Stands in for a microphone: while listening, the next stdin line is
/// treated as the spoken utterance.
pub struct ConsoleCapture {
    events: CaptureEvents,
    listening: AtomicBool,
    language: Mutex<String>,
}

impl ConsoleCapture {
    pub fn new(events: CaptureEvents, language: &str) -> Self {
        Self {
            events,
            listening: AtomicBool::new(false),
            language: Mutex::new(language.to_string()),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn hear(&self, line: &str) {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return;
        }
        let event = if line.trim().is_empty() {
            CaptureEvent::Error("no speech detected".into())
        } else {
            CaptureEvent::Result {
                transcript: line.trim().to_string(),
                language_hint: None,
            }
        };
        let _ = self.events.send(event);
    }
}

impl SpeechCapture for ConsoleCapture {
    fn start(&self) -> Result<(), ChatError> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(ChatError::Speech("already listening".into()));
        }
        let language = self
            .language
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default();
        info!("[capture] listening ({})", language);
        Ok(())
    }

    fn set_language(&self, code: &str) {
        if let Ok(mut language) = self.language.lock() {
            *language = code.to_string();
        }
    }
}

/// Prints what would be spoken.
pub struct ConsoleSynthesis;

impl SpeechSynthesis for ConsoleSynthesis {
    fn speak(&self, text: &str, language_tag: &str) {
        info!("[speech] speaking {} chars in {}", text.chars().count(), language_tag);
        println!("  (speaking, {}) {}", language_tag, text);
    }
}
