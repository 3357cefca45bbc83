//! One physical connection attempt to the chat backend.
//!
//! A session never decides anything about retries. It turns transport
//! activity into [`SessionEvent`]s tagged with its [`SessionId`] and sends
//! them to whoever owns it; the owner feeds each event back through
//! [`ConnectionSession::observe`] so the session's own state follows along.

pub mod request;
pub mod stream;

pub use request::RequestResponseSession;
pub use stream::StreamingSession;

use crate::backoff::BackoffPolicy;
use crate::error::ChatError;
use crate::transport::{RequestClient, StreamConnector, ABNORMAL_CLOSURE};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed { code: u16, reason: String },
}

impl ConnectionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed { .. })
    }
}

/// Who ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// The client asked for it; never retried.
    Deliberate,
    /// Peer close, network drop or failed write.
    Abnormal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened,
    MessageReceived(String),
    Closed {
        code: u16,
        reason: String,
        kind: CloseKind,
    },
    Failed(ChatError),
}

pub type SessionEvents = mpsc::UnboundedSender<(SessionId, SessionEvent)>;

/// Tags every event with the emitting session's id.
#[derive(Clone)]
pub(crate) struct EventSink {
    id: SessionId,
    tx: SessionEvents,
}

impl EventSink {
    pub(crate) fn new(id: SessionId, tx: SessionEvents) -> Self {
        Self { id, tx }
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send((self.id, event));
    }
}

pub(crate) fn invalid_state(operation: &'static str, state: &ConnectionState) -> ChatError {
    ChatError::InvalidState {
        operation,
        state: format!("{:?}", state),
    }
}

/// State transition driven by an event the session itself emitted.
fn advance(state: &ConnectionState, event: &SessionEvent) -> Option<ConnectionState> {
    match (state, event) {
        (ConnectionState::Connecting, SessionEvent::Opened) => Some(ConnectionState::Open),
        (s, _) if s.is_closed() => None,
        (_, SessionEvent::Closed { code, reason, .. }) => Some(ConnectionState::Closed {
            code: *code,
            reason: reason.clone(),
        }),
        (_, SessionEvent::Failed(err)) => Some(ConnectionState::Closed {
            code: ABNORMAL_CLOSURE,
            reason: err.to_string(),
        }),
        _ => None,
    }
}

/// How new sessions reach the backend.
#[derive(Clone)]
pub enum Transport {
    Streaming(Arc<dyn StreamConnector>),
    RequestResponse {
        client: Arc<dyn RequestClient>,
        /// Transport-level retry loop applied inside each `send`.
        policy: BackoffPolicy,
    },
}

impl Transport {
    pub fn name(&self) -> &str {
        match self {
            Transport::Streaming(connector) => connector.name(),
            Transport::RequestResponse { client, .. } => client.name(),
        }
    }

    pub fn create_session(&self, id: SessionId, events: SessionEvents) -> ConnectionSession {
        match self {
            Transport::Streaming(connector) => ConnectionSession::Streaming(
                StreamingSession::new(id, connector.clone(), events),
            ),
            Transport::RequestResponse { client, policy } => ConnectionSession::RequestResponse(
                RequestResponseSession::new(id, client.clone(), *policy, events),
            ),
        }
    }
}

pub enum ConnectionSession {
    Streaming(StreamingSession),
    RequestResponse(RequestResponseSession),
}

impl ConnectionSession {
    pub fn id(&self) -> SessionId {
        match self {
            ConnectionSession::Streaming(s) => s.id(),
            ConnectionSession::RequestResponse(s) => s.id(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        match self {
            ConnectionSession::Streaming(s) => s.state(),
            ConnectionSession::RequestResponse(s) => s.state(),
        }
    }

    pub fn open(&mut self) -> Result<(), ChatError> {
        match self {
            ConnectionSession::Streaming(s) => s.open(),
            ConnectionSession::RequestResponse(s) => s.open(),
        }
    }

    pub fn send(&mut self, question: &str) -> Result<(), ChatError> {
        match self {
            ConnectionSession::Streaming(s) => s.send(question),
            ConnectionSession::RequestResponse(s) => s.send(question),
        }
    }

    pub fn close(&mut self) {
        match self {
            ConnectionSession::Streaming(s) => s.close(),
            ConnectionSession::RequestResponse(s) => s.close(),
        }
    }

    pub fn observe(&mut self, event: &SessionEvent) {
        match self {
            ConnectionSession::Streaming(s) => s.observe(event),
            ConnectionSession::RequestResponse(s) => s.observe(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opened_only_moves_connecting_forward() {
        assert_eq!(
            advance(&ConnectionState::Connecting, &SessionEvent::Opened),
            Some(ConnectionState::Open)
        );
        assert_eq!(advance(&ConnectionState::Open, &SessionEvent::Opened), None);
    }

    #[test]
    fn closed_state_is_final() {
        let closed = ConnectionState::Closed {
            code: 1000,
            reason: "closed by client".into(),
        };
        let late = SessionEvent::Closed {
            code: 1006,
            reason: "reset".into(),
            kind: CloseKind::Abnormal,
        };
        assert_eq!(advance(&closed, &late), None);
        assert_eq!(
            advance(&closed, &SessionEvent::Failed(ChatError::TransportOpen("x".into()))),
            None
        );
    }

    #[test]
    fn failure_closes_with_abnormal_code() {
        let next = advance(
            &ConnectionState::Connecting,
            &SessionEvent::Failed(ChatError::TransportOpen("refused".into())),
        );
        assert_eq!(
            next,
            Some(ConnectionState::Closed {
                code: ABNORMAL_CLOSURE,
                reason: "connection could not be established: refused".into(),
            })
        );
    }
}
