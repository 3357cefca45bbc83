//! Scripted transports for unit tests.

use crate::error::ChatError;
use crate::transport::{Frame, RequestClient, StreamConnector, StreamLink};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What one connection does, in connect order.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Connect fails.
    Refuse(&'static str),
    /// Connects, then the transport vanishes before anything is read.
    DropOnOpen,
    /// Connects, then the peer drops as soon as a question arrives.
    DropOnSend,
    /// Connects and answers every question with these frames.
    Reply(Vec<&'static str>),
    /// Connects and never says anything.
    Silent,
}

pub(crate) struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    connects: AtomicUsize,
    sent: Arc<Mutex<Vec<(usize, String)>>>,
}

impl ScriptedConnector {
    pub(crate) fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            connects: AtomicUsize::new(0),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Everything written so far as `(connection number, frame)`.
    pub(crate) fn sent(&self) -> Vec<(usize, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<Box<dyn StreamLink>, ChatError> {
        let index = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Refuse("script exhausted"));
        match script {
            Script::Refuse(reason) => Err(ChatError::TransportOpen(reason.into())),
            script => Ok(Box::new(ScriptedLink {
                index,
                script,
                sent: self.sent.clone(),
                inbox: VecDeque::new(),
            })),
        }
    }
}

struct ScriptedLink {
    index: usize,
    script: Script,
    sent: Arc<Mutex<Vec<(usize, String)>>>,
    inbox: VecDeque<Frame>,
}

#[async_trait]
impl StreamLink for ScriptedLink {
    async fn send_text(&mut self, text: String) -> Result<(), ChatError> {
        self.sent.lock().unwrap().push((self.index, text));
        match &self.script {
            Script::DropOnSend => self.inbox.push_back(Frame::Lost("peer dropped".into())),
            Script::Reply(frames) => self
                .inbox
                .extend(frames.iter().map(|f| Frame::Text(f.to_string()))),
            _ => {}
        }
        Ok(())
    }

    async fn recv(&mut self) -> Frame {
        if let Some(frame) = self.inbox.pop_front() {
            return frame;
        }
        if let Script::DropOnOpen = self.script {
            self.script = Script::Silent;
            return Frame::Lost("connection reset".into());
        }
        std::future::pending().await
    }

    async fn close(&mut self) {}
}

pub(crate) struct ScriptedClient {
    outcomes: Mutex<VecDeque<Result<String, ChatError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    /// Once `outcomes` runs dry every call fails with a retryable error.
    pub(crate) fn new(outcomes: Vec<Result<String, ChatError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn ask(&self, question: &str) -> Result<String, ChatError> {
        self.calls.lock().unwrap().push(question.to_string());
        self.outcomes.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(ChatError::Request(
                "No response from server. Check your network connection.".into(),
            ))
        })
    }
}
