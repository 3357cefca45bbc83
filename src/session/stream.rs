use super::{
    advance, invalid_state, CloseKind, ConnectionState, EventSink, SessionEvent, SessionEvents,
    SessionId,
};
use crate::error::ChatError;
use crate::transport::{Frame, StreamConnector, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use crate::wire;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Session over a persistent duplex stream.
///
/// A background task owns the link. Dropping the session drops the
/// shutdown sender, which makes the task close the link and exit.
pub struct StreamingSession {
    id: SessionId,
    state: ConnectionState,
    connector: Arc<dyn StreamConnector>,
    sink: EventSink,
    outbound: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl StreamingSession {
    pub fn new(id: SessionId, connector: Arc<dyn StreamConnector>, events: SessionEvents) -> Self {
        Self {
            id,
            state: ConnectionState::Idle,
            connector,
            sink: EventSink::new(id, events),
            outbound: None,
            shutdown: None,
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

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        self.outbound = Some(out_tx);
        self.shutdown = Some(stop_tx);

        tokio::spawn(drive(
            self.id,
            self.connector.clone(),
            self.sink.clone(),
            out_rx,
            stop_rx,
        ));
        Ok(())
    }

    pub fn send(&mut self, question: &str) -> Result<(), ChatError> {
        if self.state != ConnectionState::Open {
            return Err(invalid_state("send", &self.state));
        }
        let Some(outbound) = &self.outbound else {
            return Err(invalid_state("send", &self.state));
        };
        outbound
            .send(wire::encode_question(question))
            .map_err(|_| ChatError::AbnormalClosure {
                code: ABNORMAL_CLOSURE,
                reason: "stream task ended".into(),
            })
    }

    pub fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.state = ConnectionState::Closing;
        if let Some(stop) = self.shutdown.take() {
            let _ = stop.send(());
        }
        self.state = ConnectionState::Closed {
            code: NORMAL_CLOSURE,
            reason: "closed by client".into(),
        };
    }

    pub fn observe(&mut self, event: &SessionEvent) {
        if let Some(next) = advance(&self.state, event) {
            self.state = next;
        }
    }
}

async fn drive(
    id: SessionId,
    connector: Arc<dyn StreamConnector>,
    sink: EventSink,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let name = connector.name().to_string();
    info!("[{}] {} connecting", name, id);

    let connected = tokio::select! {
        _ = &mut shutdown => {
            debug!("[{}] {} closed before connecting", name, id);
            return;
        }
        result = connector.connect() => result,
    };

    let mut link = match connected {
        Ok(link) => link,
        Err(e) => {
            warn!("[{}] {} connection failed: {}", name, id, e);
            sink.emit(SessionEvent::Failed(e));
            return;
        }
    };
    info!("[{}] {} connected", name, id);
    sink.emit(SessionEvent::Opened);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("[{}] {} closing", name, id);
                link.close().await;
                sink.emit(SessionEvent::Closed {
                    code: NORMAL_CLOSURE,
                    reason: "closed by client".into(),
                    kind: CloseKind::Deliberate,
                });
                return;
            }
            payload = outbound.recv() => {
                let Some(payload) = payload else {
                    // Session dropped without an explicit close.
                    link.close().await;
                    sink.emit(SessionEvent::Closed {
                        code: NORMAL_CLOSURE,
                        reason: "closed by client".into(),
                        kind: CloseKind::Deliberate,
                    });
                    return;
                };
                if let Err(e) = link.send_text(payload).await {
                    warn!("[{}] {} {}", name, id, e);
                    let reason = match e {
                        ChatError::AbnormalClosure { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    sink.emit(SessionEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason,
                        kind: CloseKind::Abnormal,
                    });
                    return;
                }
                debug!("[{}] {} question sent", name, id);
            }
            frame = link.recv() => match frame {
                Frame::Text(text) => match wire::parse_stream_reply(&text) {
                    Some(reply) => sink.emit(SessionEvent::MessageReceived(reply)),
                    None => debug!("[{}] {} ignoring frame without reply text: {}", name, id, text),
                },
                Frame::Close { code, reason } => {
                    info!("[{}] {} closed by peer: {} {}", name, id, code, reason);
                    sink.emit(SessionEvent::Closed {
                        code,
                        reason,
                        kind: CloseKind::Abnormal,
                    });
                    return;
                }
                Frame::Lost(reason) => {
                    warn!("[{}] {} connection lost: {}", name, id, reason);
                    sink.emit(SessionEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason,
                        kind: CloseKind::Abnormal,
                    });
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Script, ScriptedConnector};

    async fn next(
        rx: &mut mpsc::UnboundedReceiver<(SessionId, SessionEvent)>,
    ) -> (SessionId, SessionEvent) {
        rx.recv().await.expect("session event")
    }

    #[tokio::test]
    async fn opens_sends_and_receives_in_order() {
        let connector = ScriptedConnector::new(vec![Script::Reply(vec![r#"{"text":"world"}"#])]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = StreamingSession::new(SessionId(7), connector.clone(), tx);

        assert!(matches!(
            session.send("early"),
            Err(ChatError::InvalidState { operation: "send", .. })
        ));

        session.open().unwrap();
        assert_eq!(session.state(), &ConnectionState::Connecting);
        assert!(session.send("still early").is_err());

        let (id, opened) = next(&mut rx).await;
        assert_eq!(id, SessionId(7));
        assert_eq!(opened, SessionEvent::Opened);
        session.observe(&opened);
        assert_eq!(session.state(), &ConnectionState::Open);

        session.send("hello").unwrap();
        let (_, reply) = next(&mut rx).await;
        assert_eq!(reply, SessionEvent::MessageReceived("world".into()));
        assert_eq!(
            connector.sent(),
            vec![(1, r#"{"question":"hello"}"#.to_string())]
        );
    }

    #[tokio::test]
    async fn refused_connect_reports_failure() {
        let connector = ScriptedConnector::new(vec![Script::Refuse("refused")]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = StreamingSession::new(SessionId(1), connector, tx);
        session.open().unwrap();

        let (_, event) = next(&mut rx).await;
        assert_eq!(
            event,
            SessionEvent::Failed(ChatError::TransportOpen("refused".into()))
        );
        session.observe(&event);
        assert!(session.state().is_closed());
    }

    #[tokio::test]
    async fn dropped_link_is_abnormal_1006() {
        let connector = ScriptedConnector::new(vec![Script::DropOnOpen]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = StreamingSession::new(SessionId(1), connector, tx);
        session.open().unwrap();

        assert_eq!(next(&mut rx).await.1, SessionEvent::Opened);
        match next(&mut rx).await.1 {
            SessionEvent::Closed { code, kind, .. } => {
                assert_eq!(code, ABNORMAL_CLOSURE);
                assert_eq!(kind, CloseKind::Abnormal);
            }
            other => panic!("expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn close_is_idempotent_and_deliberate() {
        let connector = ScriptedConnector::new(vec![Script::Silent]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = StreamingSession::new(SessionId(3), connector, tx);
        session.open().unwrap();
        let (_, opened) = next(&mut rx).await;
        session.observe(&opened);

        session.close();
        session.close();
        assert_eq!(
            session.state(),
            &ConnectionState::Closed {
                code: NORMAL_CLOSURE,
                reason: "closed by client".into()
            }
        );
        match next(&mut rx).await.1 {
            SessionEvent::Closed { kind, .. } => assert_eq!(kind, CloseKind::Deliberate),
            other => panic!("expected deliberate close, got {:?}", other),
        }
        assert!(session.open().is_err());
    }
}
