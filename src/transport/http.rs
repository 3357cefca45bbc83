use super::RequestClient;
use crate::error::ChatError;
use crate::wire::{QuestionEnvelope, ResponseBody};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 100;

/// POSTs `{"question": ...}` to an HTTP chat endpoint.
pub struct HttpClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpClient {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        api_key: Option<String>,
    ) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("http client error: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

/// Describe a failed exchange the way the chat widget shows it to users.
fn describe_failure(err: &reqwest::Error) -> String {
    if let Some(status) = err.status() {
        format!("Request failed: {}", status.as_u16())
    } else if err.is_timeout() || err.is_connect() || err.is_request() {
        "No response from server. Check your network connection.".to_string()
    } else {
        format!("Error: {err}")
    }
}

#[async_trait]
impl RequestClient for HttpClient {
    fn name(&self) -> &str {
        "request"
    }

    async fn ask(&self, question: &str) -> Result<String, ChatError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&QuestionEnvelope { question });
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChatError::Request(describe_failure(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Request(format!(
                "Request failed: {} - {}",
                status.as_u16(),
                body
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ChatError::Request(describe_failure(&e)))?;
        // A 2xx body without a usable `response` list still counts as answered.
        let body: ResponseBody = serde_json::from_str(&text).unwrap_or_else(|e| {
            debug!("[request] unreadable response body ({}): {}", e, text);
            ResponseBody::default()
        });
        Ok(body.joined_text())
    }
}
