pub mod http;
pub mod websocket;

use crate::error::ChatError;
use async_trait::async_trait;

pub const NORMAL_CLOSURE: u16 = 1000;
/// Close frame arrived without a status code.
pub const NO_STATUS: u16 = 1005;
/// Transport vanished without any close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// One inbound unit read from a stream transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text payload, still JSON-encoded.
    Text(String),
    /// The peer closed the stream with a close frame.
    Close { code: u16, reason: String },
    /// The stream ended or errored without a close frame.
    Lost(String),
}

/// Opens duplex stream connections to the backend.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    fn name(&self) -> &str;
    async fn connect(&self) -> Result<Box<dyn StreamLink>, ChatError>;
}

/// One established stream connection.
///
/// After `recv` yields `Close` or `Lost` the link is finished and must not
/// be polled again.
#[async_trait]
pub trait StreamLink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ChatError>;
    async fn recv(&mut self) -> Frame;
    async fn close(&mut self);
}

/// Single-shot question/answer exchange with the backend.
///
/// Returns the reply text ready for display. One call is one attempt;
/// retrying is the caller's business.
#[async_trait]
pub trait RequestClient: Send + Sync {
    fn name(&self) -> &str;
    async fn ask(&self, question: &str) -> Result<String, ChatError>;
}
