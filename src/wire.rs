//! JSON envelopes exchanged with the chat backend.
//!
//! Outbound is always `{"question": "..."}`. Inbound differs by transport:
//! stream frames carry one reply each, the request/response body carries
//! a list of fragments that are joined with a space.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shown when the backend answered but produced no text.
pub const NO_ANSWER: &str = "No answer found.";

#[derive(Debug, Serialize)]
pub struct QuestionEnvelope<'a> {
    pub question: &'a str,
}

pub fn encode_question(question: &str) -> String {
    serde_json::json!({ "question": question }).to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplyFragment {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseBody {
    #[serde(default)]
    pub response: Option<Vec<ReplyFragment>>,
}

impl ResponseBody {
    pub fn joined_text(&self) -> String {
        let joined = self
            .response
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|fragment| fragment.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            NO_ANSWER.to_string()
        } else {
            joined
        }
    }
}

/// Pull the reply text out of one stream frame.
///
/// Accepts `text` and falls back to `message`. Anything else (non-JSON,
/// acknowledgements without text) yields `None` and is ignored upstream.
pub fn parse_stream_reply(frame: &str) -> Option<String> {
    let event: Value = serde_json::from_str(frame).ok()?;
    event
        .get("text")
        .or_else(|| event.get("message"))
        .and_then(|t| t.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_envelope_shape() {
        let encoded = encode_question("hello");
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, serde_json::json!({ "question": "hello" }));
    }

    #[test]
    fn fragments_join_with_space() {
        let body: ResponseBody =
            serde_json::from_str(r#"{"response":[{"text":"A"},{"text":"B"}]}"#).unwrap();
        assert_eq!(body.joined_text(), "A B");
    }

    #[test]
    fn missing_or_empty_response_falls_back() {
        let missing: ResponseBody = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.joined_text(), NO_ANSWER);
        let empty: ResponseBody = serde_json::from_str(r#"{"response":[]}"#).unwrap();
        assert_eq!(empty.joined_text(), NO_ANSWER);
    }

    #[test]
    fn stream_reply_prefers_text_then_message() {
        assert_eq!(
            parse_stream_reply(r#"{"text":"hi","message":"ignored"}"#).as_deref(),
            Some("hi")
        );
        assert_eq!(
            parse_stream_reply(r#"{"message":"Received your question: hi"}"#).as_deref(),
            Some("Received your question: hi")
        );
        assert_eq!(parse_stream_reply(r#"{"status":"ok"}"#), None);
        assert_eq!(parse_stream_reply("not json"), None);
    }
}
