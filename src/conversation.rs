//! UI model for the chat widget.
//!
//! Owns the transcript and the error line, turns supervisor events into
//! transcript entries and decides when replies are read aloud. Rendering
//! is left to the host, which polls the getters after each event.

use crate::error::ChatError;
use crate::language::{detect_or_fallback, LanguageDetector, FALLBACK_LANGUAGE};
use crate::message::{Message, RequestId};
use crate::speech::{CaptureEvent, SpeechCapture, SpeechSynthesis, DEFAULT_SPEECH_LANGUAGE};
use crate::state::{ChatEvent, LinkStatus};
use crate::supervisor::Supervisor;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const DEFAULT_GREETING: &str = "こんばんは！！ご用件は何でしょうか？";
/// Shown when a blank question is submitted.
pub const EMPTY_QUESTION_PROMPT: &str = "質問を入力してください。";

#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub greeting: String,
    /// Language tag used when reading replies aloud.
    pub speech_language: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            greeting: DEFAULT_GREETING.to_string(),
            speech_language: DEFAULT_SPEECH_LANGUAGE.to_string(),
        }
    }
}

/// Host-supplied capabilities.
pub struct Collaborators {
    pub synthesis: Arc<dyn SpeechSynthesis>,
    pub capture: Option<Arc<dyn SpeechCapture>>,
    pub detector: Option<Arc<dyn LanguageDetector>>,
}

pub struct Conversation {
    supervisor: Supervisor,
    events: mpsc::UnboundedReceiver<ChatEvent>,
    config: ConversationConfig,
    collaborators: Collaborators,
    transcript: Vec<Message>,
    error: Option<String>,
    status: Option<String>,
    outstanding: usize,
    voice_requests: HashSet<RequestId>,
    /// Whether the most recently answered question was spoken.
    reply_by_voice: bool,
    last_answer: Option<String>,
    listening: bool,
    language: String,
}

impl Conversation {
    pub fn new(
        supervisor: Supervisor,
        events: mpsc::UnboundedReceiver<ChatEvent>,
        config: ConversationConfig,
        collaborators: Collaborators,
    ) -> Self {
        let transcript = vec![Message::bot(config.greeting.clone())];
        let language = config.speech_language.clone();
        Self {
            supervisor,
            events,
            config,
            collaborators,
            transcript,
            error: None,
            status: None,
            outstanding: 0,
            voice_requests: HashSet::new(),
            reply_by_voice: false,
            last_answer: None,
            listening: false,
            language,
        }
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Latest connection status line.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.outstanding > 0
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Current recognition language.
    pub fn language(&self) -> &str {
        &self.language
    }

    /// A typed question has an answer that can be read aloud on request.
    pub fn answer_ready(&self) -> bool {
        !self.reply_by_voice && self.last_answer.is_some()
    }

    pub async fn submit_typed(&mut self, text: &str) -> Result<RequestId, ChatError> {
        self.submit(text, false).await
    }

    async fn submit(&mut self, text: &str, by_voice: bool) -> Result<RequestId, ChatError> {
        self.error = None;
        match self.supervisor.submit(text).await {
            Ok(submitted) => {
                self.transcript.push(Message::user(text));
                self.outstanding += 1;
                if by_voice {
                    self.voice_requests.insert(submitted.id);
                }
                Ok(submitted.id)
            }
            Err(ChatError::EmptyQuestion) => {
                self.error = Some(EMPTY_QUESTION_PROMPT.to_string());
                Err(ChatError::EmptyQuestion)
            }
            Err(e) => {
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn start_listening(&mut self) -> Result<(), ChatError> {
        let Some(capture) = &self.collaborators.capture else {
            return Err(ChatError::Speech("speech capture is not available".into()));
        };
        capture.start()?;
        self.listening = true;
        Ok(())
    }

    /// Handle what the recognizer heard. A transcript is submitted as a
    /// voice question once its language is known.
    pub async fn on_capture_event(
        &mut self,
        event: CaptureEvent,
    ) -> Result<Option<RequestId>, ChatError> {
        self.listening = false;
        let (transcript, hint) = match event {
            CaptureEvent::Result {
                transcript,
                language_hint,
            } => (transcript, language_hint),
            CaptureEvent::Error(reason) => {
                warn!("[conversation] speech capture error: {}", reason);
                return Ok(None);
            }
        };

        let language = match &self.collaborators.detector {
            Some(detector) => detect_or_fallback(detector.as_ref(), &transcript).await,
            None => hint.unwrap_or_else(|| FALLBACK_LANGUAGE.to_string()),
        };
        if language != self.language {
            info!("[conversation] recognition language {} -> {}", self.language, language);
        }
        if let Some(capture) = &self.collaborators.capture {
            capture.set_language(&language);
        }
        self.language = language;

        self.submit(&transcript, true).await.map(Some)
    }

    pub fn apply(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::Status { status, message } => {
                self.status = Some(message.clone());
                if *status == LinkStatus::ShutDown {
                    // Teardown discards pending and queued requests without a Failed event.
                    self.outstanding = 0;
                    self.voice_requests.clear();
                }
            }
            ChatEvent::Retrying {
                request, attempt, ..
            } => {
                debug!("[conversation] request {} retry {}", request, attempt);
            }
            ChatEvent::Reply { request, message } => {
                if let Some(id) = request {
                    self.outstanding = self.outstanding.saturating_sub(1);
                    self.reply_by_voice = self.voice_requests.remove(id);
                }
                self.transcript.push(message.clone());
                self.last_answer = Some(message.text.clone());
                if self.reply_by_voice {
                    self.collaborators
                        .synthesis
                        .speak(&message.text, &self.config.speech_language);
                }
            }
            ChatEvent::Failed { request, error } => {
                self.outstanding = self.outstanding.saturating_sub(1);
                self.voice_requests.remove(request);
                self.error = Some(error.to_string());
            }
        }
    }

    /// Read the latest answer to a typed question aloud.
    pub fn read_aloud(&self) -> bool {
        match (&self.last_answer, self.answer_ready()) {
            (Some(text), true) => {
                self.collaborators
                    .synthesis
                    .speak(text, &self.config.speech_language);
                true
            }
            _ => false,
        }
    }

    /// Wait for the next supervisor event and apply it. `None` once the
    /// supervisor is gone.
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        let event = self.events.recv().await?;
        self.apply(&event);
        Some(event)
    }

    pub async fn shutdown(self) {
        self.supervisor.shutdown().await;
    }
}
