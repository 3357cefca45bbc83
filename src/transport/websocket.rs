use super::{Frame, StreamConnector, StreamLink, ABNORMAL_CLOSURE, NO_STATUS};
use crate::error::ChatError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects to a `ws://` / `wss://` chat endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

fn build_ws_request(
    connector: &WsConnector,
) -> Result<tungstenite::http::Request<()>, ChatError> {
    let host = tungstenite::http::Uri::try_from(connector.url.as_str())
        .map_err(|e| ChatError::Config(format!("invalid stream url {}: {}", connector.url, e)))?
        .authority()
        .map(|a| a.to_string())
        .ok_or_else(|| ChatError::Config(format!("stream url has no host: {}", connector.url)))?;

    let mut request = tungstenite::http::Request::builder()
        .uri(&connector.url)
        .header("Host", host)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        );

    for (name, value) in &connector.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    request
        .body(())
        .map_err(|e| ChatError::Config(format!("Failed to build request: {}", e)))
}

#[async_trait]
impl StreamConnector for WsConnector {
    fn name(&self) -> &str {
        "stream"
    }

    async fn connect(&self) -> Result<Box<dyn StreamLink>, ChatError> {
        let request = build_ws_request(self)?;
        match connect_async(request).await {
            Ok((stream, _)) => Ok(Box::new(WsLink { stream })),
            Err(e) => Err(ChatError::TransportOpen(e.to_string())),
        }
    }
}

pub struct WsLink {
    stream: WsStream,
}

#[async_trait]
impl StreamLink for WsLink {
    async fn send_text(&mut self, text: String) -> Result<(), ChatError> {
        self.stream
            .send(tungstenite::Message::Text(text.into()))
            .await
            .map_err(|e| ChatError::AbnormalClosure {
                code: ABNORMAL_CLOSURE,
                reason: format!("send failed: {}", e),
            })
    }

    async fn recv(&mut self) -> Frame {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(m)) => m,
                Some(Err(e)) => return Frame::Lost(e.to_string()),
                None => return Frame::Lost("connection ended".into()),
            };
            match msg {
                tungstenite::Message::Text(t) => return Frame::Text(t.to_string()),
                tungstenite::Message::Close(Some(frame)) => {
                    return Frame::Close {
                        code: u16::from(frame.code),
                        reason: frame.reason.to_string(),
                    }
                }
                tungstenite::Message::Close(None) => {
                    return Frame::Close {
                        code: NO_STATUS,
                        reason: String::new(),
                    }
                }
                // Ping/pong are answered by tungstenite; binary frames carry no reply.
                _ => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_upgrade_and_custom_headers() {
        let connector =
            WsConnector::new("wss://chat.example.com/production").with_header("x-api-key", "k1");
        let request = build_ws_request(&connector).unwrap();
        let headers = request.headers();
        assert_eq!(headers["Host"], "chat.example.com");
        assert_eq!(headers["Upgrade"], "websocket");
        assert_eq!(headers["x-api-key"], "k1");
        assert!(headers.contains_key("Sec-WebSocket-Key"));
    }

    #[test]
    fn hostless_url_is_a_config_error() {
        let connector = WsConnector::new("/relative/path");
        assert!(matches!(
            build_ws_request(&connector),
            Err(ChatError::Config(_))
        ));
    }
}
