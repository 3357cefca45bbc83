use crate::error::ChatError;
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Language assumed whenever detection cannot produce an answer.
pub const FALLBACK_LANGUAGE: &str = "en";
pub const DETECT_LANGUAGE_URL: &str = "https://ws.detectlanguage.com/0.2/detect";
const DETECT_TIMEOUT_SECS: u64 = 10;

#[async_trait]
pub trait LanguageDetector: Send + Sync {
    /// Language code for `text`, e.g. `"ja"`.
    async fn detect(&self, text: &str) -> Result<String, ChatError>;
}

/// Detect the language of `text`, falling back to [`FALLBACK_LANGUAGE`] on
/// any failure.
pub async fn detect_or_fallback(detector: &dyn LanguageDetector, text: &str) -> String {
    match detector.detect(text).await {
        Ok(code) if !code.trim().is_empty() => code,
        Ok(_) => {
            warn!("[language] detector returned no language, using {}", FALLBACK_LANGUAGE);
            FALLBACK_LANGUAGE.to_string()
        }
        Err(e) => {
            warn!("[language] detection failed ({}), using {}", e, FALLBACK_LANGUAGE);
            FALLBACK_LANGUAGE.to_string()
        }
    }
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    q: &'a str,
    key: &'a str,
}

#[derive(Deserialize)]
struct DetectResponse {
    data: DetectData,
}

#[derive(Deserialize)]
struct DetectData {
    #[serde(default)]
    detections: Vec<Detection>,
}

#[derive(Deserialize)]
struct Detection {
    language: String,
}

/// Client for the detectlanguage.com API.
pub struct DetectLanguageClient {
    client: reqwest::Client,
    url: String,
    key: String,
}

impl DetectLanguageClient {
    pub fn new(key: impl Into<String>) -> Result<Self, ChatError> {
        Self::with_url(DETECT_LANGUAGE_URL, key)
    }

    pub fn with_url(url: impl Into<String>, key: impl Into<String>) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DETECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ChatError::Config(format!("http client error: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            key: key.into(),
        })
    }
}

#[async_trait]
impl LanguageDetector for DetectLanguageClient {
    async fn detect(&self, text: &str) -> Result<String, ChatError> {
        let response = self
            .client
            .post(&self.url)
            .json(&DetectRequest {
                q: text,
                key: &self.key,
            })
            .send()
            .await
            .map_err(|e| ChatError::Request(format!("Error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Request(format!(
                "Request failed: {} - {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Request(format!("Error: invalid detection body: {e}")))?;
        parsed
            .data
            .detections
            .into_iter()
            .next()
            .map(|d| d.language)
            .ok_or_else(|| ChatError::Request("no detections".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn reads_first_detection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({"q": "こんにちは", "key": "k1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"detections": [
                    {"language": "ja", "isReliable": true, "confidence": 9.5},
                    {"language": "zh", "isReliable": false, "confidence": 1.0}
                ]}
            })))
            .mount(&server)
            .await;

        let client = DetectLanguageClient::with_url(server.uri(), "k1").unwrap();
        assert_eq!(client.detect("こんにちは").await.unwrap(), "ja");
        assert_eq!(detect_or_fallback(&client, "こんにちは").await, "ja");
    }

    #[tokio::test]
    async fn server_error_falls_back_to_english() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let client = DetectLanguageClient::with_url(server.uri(), "bad").unwrap();
        let err = client.detect("hola").await.unwrap_err();
        assert_eq!(err, ChatError::Request("Request failed: 401 - invalid key".into()));
        assert_eq!(detect_or_fallback(&client, "hola").await, FALLBACK_LANGUAGE);
    }

    #[tokio::test]
    async fn empty_detections_fall_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"detections": []}})),
            )
            .mount(&server)
            .await;

        let client = DetectLanguageClient::with_url(server.uri(), "k").unwrap();
        assert_eq!(detect_or_fallback(&client, "???").await, "en");
    }
}
