//! Keeps a question moving towards the backend across transport churn.
//!
//! The supervisor runs as one actor task. It owns the delivery queue, the
//! retry context and at most one live [`ConnectionSession`]; commands from
//! the handle, session events and the retry timer are all handled inside a
//! single `select!`, so none of that state needs a lock.
//!
//! Every session gets a fresh [`SessionId`]. Events carrying any other id
//! come from a session that has already been replaced and are dropped.

use crate::backoff::BackoffPolicy;
use crate::error::ChatError;
use crate::message::{Message, RequestId};
use crate::queue::{DeliveryQueue, Enqueued, QueuePolicy};
use crate::session::{
    CloseKind, ConnectionSession, ConnectionState, SessionEvent, SessionEvents, SessionId,
    Transport,
};
use crate::state::{ChatEvent, LinkStatus, Phase, RetryContext, RetryDecision, SupervisorStatus};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default)]
pub struct SupervisorConfig {
    pub policy: BackoffPolicy,
    pub queue: QueuePolicy,
}

/// Accepted submission. `position` is 0 when delivery started immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submitted {
    pub id: RequestId,
    pub position: usize,
}

enum Command {
    Submit {
        text: String,
        reply: oneshot::Sender<Result<Submitted, ChatError>>,
    },
    Status {
        reply: oneshot::Sender<SupervisorStatus>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to the supervisor actor. Dropping it tears the actor down.
pub struct Supervisor {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl Supervisor {
    pub fn spawn(
        transport: Transport,
        config: SupervisorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(32);
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        info!(
            "[supervisor] starting on {} transport (max attempts {}, base delay {}ms)",
            transport.name(),
            config.policy.max_attempts,
            config.policy.base.as_millis()
        );
        let core = SupervisorCore::new(transport, config, event_tx, session_tx);
        let task = tokio::spawn(run(core, command_rx, session_rx));
        (
            Self {
                commands: command_tx,
                task,
            },
            event_rx,
        )
    }

    pub async fn submit(&self, text: impl Into<String>) -> Result<Submitted, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| ChatError::ShutDown)?;
        rx.await.map_err(|_| ChatError::ShutDown)?
    }

    pub async fn status(&self) -> Result<SupervisorStatus, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Status { reply })
            .await
            .map_err(|_| ChatError::ShutDown)?;
        rx.await.map_err(|_| ChatError::ShutDown)
    }

    /// Cancel any retry, close the session, discard pending work.
    pub async fn shutdown(self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut core: SupervisorCore,
    mut commands: mpsc::Receiver<Command>,
    mut session_events: mpsc::UnboundedReceiver<(SessionId, SessionEvent)>,
) {
    loop {
        let retry_at = core.retry_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Submit { text, reply }) => {
                    let _ = reply.send(core.submit(text));
                }
                Some(Command::Status { reply }) => {
                    let _ = reply.send(core.status());
                }
                Some(Command::Shutdown { done }) => {
                    core.teardown();
                    let _ = done.send(());
                    return;
                }
                None => {
                    core.teardown();
                    return;
                }
            },
            Some((id, event)) = session_events.recv() => core.on_session_event(id, event),
            _ = wait_until(retry_at) => core.on_retry_timer(),
        }
    }
}

/// The supervisor's state machine, free of any task plumbing.
pub(crate) struct SupervisorCore {
    transport: Transport,
    queue: DeliveryQueue,
    retry: RetryContext,
    session: Option<ConnectionSession>,
    next_session: u64,
    retry_at: Option<Instant>,
    phase: Phase,
    events: mpsc::UnboundedSender<ChatEvent>,
    session_tx: SessionEvents,
}

impl SupervisorCore {
    pub(crate) fn new(
        transport: Transport,
        config: SupervisorConfig,
        events: mpsc::UnboundedSender<ChatEvent>,
        session_tx: SessionEvents,
    ) -> Self {
        Self {
            transport,
            queue: DeliveryQueue::new(config.queue),
            retry: RetryContext::new(config.policy),
            session: None,
            next_session: 0,
            retry_at: None,
            phase: Phase::NoPending,
            events,
            session_tx,
        }
    }

    pub(crate) fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    pub(crate) fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            phase: self.phase,
            attempt: self.retry.attempt(),
            pending: self.queue.in_flight().map(|p| p.id),
            waiting: self.queue.waiting(),
            session: self.session.as_ref().map(|s| s.id()),
        }
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    fn emit_status(&self, status: LinkStatus, message: impl Into<String>) {
        self.emit(ChatEvent::Status {
            status,
            message: message.into(),
        });
    }

    pub(crate) fn submit(&mut self, text: String) -> Result<Submitted, ChatError> {
        if self.phase == Phase::Terminal {
            return Err(ChatError::ShutDown);
        }
        if text.trim().is_empty() {
            return Err(ChatError::EmptyQuestion);
        }
        match self.queue.enqueue(text)? {
            Enqueued::Dispatch(id) => {
                info!("[supervisor] request {} accepted", id);
                self.begin_delivery();
                Ok(Submitted { id, position: 0 })
            }
            Enqueued::Waiting { id, position } => {
                info!("[supervisor] request {} queued at position {}", id, position);
                Ok(Submitted { id, position })
            }
        }
    }

    fn begin_delivery(&mut self) {
        self.retry.reset();
        let reusable = self
            .session
            .as_ref()
            .is_some_and(|s| *s.state() == ConnectionState::Open);
        if reusable {
            self.phase = Phase::Open;
            self.deliver_pending();
        } else {
            self.open_session();
        }
    }

    fn open_session(&mut self) {
        if let Some(mut old) = self.session.take() {
            debug!("[supervisor] retiring session {}", old.id());
            old.close();
        }
        self.next_session += 1;
        let id = SessionId(self.next_session);
        let mut session = self.transport.create_session(id, self.session_tx.clone());
        self.phase = Phase::Connecting;
        self.emit_status(LinkStatus::Connecting, "Connecting...");
        if let Err(e) = session.open() {
            error!("[supervisor] fresh session {} refused to open: {}", id, e);
            self.fail_pending(e);
            return;
        }
        self.session = Some(session);
    }

    fn deliver_pending(&mut self) {
        let Some(pending) = self.queue.in_flight() else {
            return;
        };
        let (id, payload) = (pending.id, pending.payload.clone());
        let result = match self.session.as_mut() {
            Some(session) => session.send(&payload),
            None => return,
        };
        match result {
            Ok(()) => {
                self.phase = Phase::AwaitingReply;
                debug!("[supervisor] request {} sent", id);
            }
            Err(e) if e.is_retryable() => {
                self.session = None;
                self.on_delivery_failure(e);
            }
            Err(e) => {
                error!("[supervisor] request {} could not be sent: {}", id, e);
                self.fail_pending(e);
            }
        }
    }

    pub(crate) fn on_session_event(&mut self, id: SessionId, event: SessionEvent) {
        let Some(session) = self.session.as_mut().filter(|s| s.id() == id) else {
            debug!("[supervisor] ignoring {:?} from superseded session {}", event, id);
            return;
        };
        session.observe(&event);

        match event {
            SessionEvent::Opened => {
                self.emit_status(LinkStatus::Connected, "Connected");
                if self.phase == Phase::Connecting {
                    self.phase = Phase::Open;
                    self.deliver_pending();
                }
            }
            SessionEvent::MessageReceived(text) => self.on_reply(text),
            SessionEvent::Closed { code, reason, kind } => {
                self.session = None;
                if kind == CloseKind::Deliberate {
                    return;
                }
                if self.queue.has_in_flight() {
                    self.on_delivery_failure(ChatError::AbnormalClosure { code, reason });
                } else {
                    info!("[supervisor] idle session {} closed: {} {}", id, code, reason);
                    self.emit_status(LinkStatus::Idle, "Disconnected");
                }
            }
            SessionEvent::Failed(err) => {
                self.session = None;
                if !self.queue.has_in_flight() {
                    self.emit_status(LinkStatus::Idle, "Disconnected");
                } else if err.is_retryable() {
                    self.on_delivery_failure(err);
                } else {
                    self.fail_pending(err);
                }
            }
        }
    }

    fn on_reply(&mut self, text: String) {
        let request = if self.phase == Phase::AwaitingReply {
            self.queue.complete().map(|p| p.id)
        } else {
            None
        };
        self.emit(ChatEvent::Reply {
            request,
            message: Message::bot(text),
        });
        if let Some(id) = request {
            info!("[supervisor] request {} answered", id);
            self.retry.reset();
            self.phase = Phase::NoPending;
            self.dispatch_next();
        }
    }

    fn on_delivery_failure(&mut self, err: ChatError) {
        let Some(id) = self.queue.in_flight().map(|p| p.id) else {
            return;
        };
        match self.retry.record_failure() {
            RetryDecision::Retry { attempt, delay } => {
                if let Some(pending) = self.queue.in_flight_mut() {
                    pending.attempt = attempt;
                }
                warn!(
                    "[supervisor] request {} failed ({}); retry {} in {}ms",
                    id,
                    err,
                    attempt,
                    delay.as_millis()
                );
                self.retry_at = Some(Instant::now() + delay);
                self.phase = Phase::Backoff;
                self.emit(ChatEvent::Retrying {
                    request: id,
                    attempt,
                    delay,
                });
                self.emit_status(
                    LinkStatus::Retrying,
                    format!("Retrying in {} seconds...", delay.as_secs_f32()),
                );
            }
            RetryDecision::Exhausted { attempts } => {
                self.fail_pending(ChatError::RetriesExhausted {
                    attempts,
                    last_error: err.to_string(),
                });
            }
        }
    }

    pub(crate) fn on_retry_timer(&mut self) {
        self.retry_at = None;
        if self.phase == Phase::Backoff && self.queue.has_in_flight() {
            self.open_session();
        }
    }

    fn fail_pending(&mut self, error: ChatError) {
        self.retry_at = None;
        if let Some(pending) = self.queue.complete() {
            error!("[supervisor] request {} failed: {}", pending.id, error);
            self.emit(ChatEvent::Failed {
                request: pending.id,
                error: error.clone(),
            });
        }
        self.phase = Phase::NoPending;
        self.emit_status(LinkStatus::Failed, error.to_string());
        self.dispatch_next();
    }

    fn dispatch_next(&mut self) {
        if let Some(next) = self.queue.in_flight() {
            info!("[supervisor] dispatching queued request {}", next.id);
            self.begin_delivery();
        }
    }

    pub(crate) fn teardown(&mut self) {
        self.retry_at = None;
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        let dropped = self.queue.clear();
        if dropped > 0 {
            info!("[supervisor] shutting down, discarding {} request(s)", dropped);
        }
        self.phase = Phase::Terminal;
        self.emit_status(LinkStatus::ShutDown, "Shut down");
    }
}
