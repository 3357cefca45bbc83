use super::{
    advance, invalid_state, ConnectionState, EventSink, SessionEvent, SessionEvents, SessionId,
};
use crate::backoff::BackoffPolicy;
use crate::error::ChatError;
use crate::transport::{RequestClient, NORMAL_CLOSURE};
use log::{info, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Session over single-shot requests.
///
/// There is nothing to connect, so `open` reports `Opened` straight away.
/// Each `send` runs its own bounded retry loop and ends in exactly one
/// `MessageReceived` or `Failed`. The session stays open afterwards and
/// can carry the next question.
pub struct RequestResponseSession {
    id: SessionId,
    state: ConnectionState,
    client: Arc<dyn RequestClient>,
    policy: BackoffPolicy,
    sink: EventSink,
    in_flight: Option<JoinHandle<()>>,
}

impl RequestResponseSession {
    pub fn new(
        id: SessionId,
        client: Arc<dyn RequestClient>,
        policy: BackoffPolicy,
        events: SessionEvents,
    ) -> Self {
        Self {
            id,
            state: ConnectionState::Idle,
            client,
            policy,
            sink: EventSink::new(id, events),
            in_flight: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn open(&mut self) -> Result<(), ChatError> {
        if self.state != ConnectionState::Idle {
            return Err(invalid_state("open", &self.state));
        }
        self.state = ConnectionState::Connecting;
        self.sink.emit(SessionEvent::Opened);
        Ok(())
    }

    pub fn send(&mut self, question: &str) -> Result<(), ChatError> {
        if self.state != ConnectionState::Open {
            return Err(invalid_state("send", &self.state));
        }
        if self.in_flight.is_some() {
            return Err(ChatError::InvalidState {
                operation: "send",
                state: "awaiting a reply".into(),
            });
        }
        self.in_flight = Some(tokio::spawn(exchange(
            self.id,
            self.client.clone(),
            self.policy,
            self.sink.clone(),
            question.to_string(),
        )));
        Ok(())
    }

    pub fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.state = ConnectionState::Closing;
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
        self.state = ConnectionState::Closed {
            code: NORMAL_CLOSURE,
            reason: "closed by client".into(),
        };
    }

    pub fn observe(&mut self, event: &SessionEvent) {
        if matches!(
            event,
            SessionEvent::MessageReceived(_) | SessionEvent::Failed(_)
        ) {
            self.in_flight = None;
        }
        if let Some(next) = advance(&self.state, event) {
            self.state = next;
        }
    }
}

impl Drop for RequestResponseSession {
    fn drop(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
    }
}

async fn exchange(
    id: SessionId,
    client: Arc<dyn RequestClient>,
    policy: BackoffPolicy,
    sink: EventSink,
    question: String,
) {
    let name = client.name().to_string();
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match client.ask(&question).await {
            Ok(reply) => {
                info!("[{}] {} answered after {} attempt(s)", name, id, attempts);
                sink.emit(SessionEvent::MessageReceived(reply));
                return;
            }
            Err(e) if !e.is_retryable() => {
                sink.emit(SessionEvent::Failed(e));
                return;
            }
            Err(e) => {
                if !policy.allows(attempts) {
                    warn!("[{}] {} giving up after {} attempts: {}", name, id, attempts, e);
                    sink.emit(SessionEvent::Failed(ChatError::RetriesExhausted {
                        attempts,
                        last_error: e.to_string(),
                    }));
                    return;
                }
                let delay = policy.compute_delay(attempts - 1);
                warn!(
                    "[{}] {} request failed (retry {} in {}ms): {}",
                    name,
                    id,
                    attempts,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
