use crate::backoff::{BackoffPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS};
use crate::conversation::{ConversationConfig, DEFAULT_GREETING};
use crate::error::ChatError;
use crate::language::{DetectLanguageClient, LanguageDetector};
use crate::queue::{QueuePolicy, DEFAULT_FIFO_CAPACITY};
use crate::session::Transport;
use crate::speech::DEFAULT_SPEECH_LANGUAGE;
use crate::supervisor::SupervisorConfig;
use crate::transport::http::{HttpClient, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::transport::websocket::WsConnector;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Delay before the second try of the request transport.
const REQUEST_BASE_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stream,
    Request,
}

impl FromStr for TransportKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" | "websocket" | "ws" => Ok(TransportKind::Stream),
            "request" | "http" => Ok(TransportKind::Request),
            other => Err(ChatError::Config(format!("unknown transport '{other}'"))),
        }
    }
}

/// Runtime configuration, read from `CHATLINK_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub endpoint: String,
    pub transport: TransportKind,
    pub api_key: Option<String>,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: Option<u64>,
    pub request_retries: u32,
    pub request_timeout_secs: u64,
    pub queue: QueuePolicy,
    pub speech_language: String,
    pub greeting: String,
    pub language_detection_key: Option<String>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_request_retries() -> u32 {
    3
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_speech_language() -> String {
    DEFAULT_SPEECH_LANGUAGE.into()
}
fn default_greeting() -> String {
    DEFAULT_GREETING.into()
}

/// `ws://` and `wss://` endpoints stream; everything else is request/response.
fn infer_transport(endpoint: &str) -> TransportKind {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("ws://") || lower.starts_with("wss://") {
        TransportKind::Stream
    } else {
        TransportKind::Request
    }
}

/// `reject`, `fifo` or `fifo:N`.
pub fn parse_queue_policy(value: &str) -> Result<QueuePolicy, ChatError> {
    let value = value.trim().to_ascii_lowercase();
    match value.split_once(':') {
        None if value == "reject" => Ok(QueuePolicy::Reject),
        None if value == "fifo" => Ok(QueuePolicy::Fifo {
            capacity: DEFAULT_FIFO_CAPACITY,
        }),
        Some(("fifo", n)) => match n.parse::<usize>() {
            Ok(capacity) if capacity > 0 => Ok(QueuePolicy::Fifo { capacity }),
            _ => Err(ChatError::Config(format!("bad fifo capacity '{n}'"))),
        },
        _ => Err(ChatError::Config(format!("unknown queue policy '{value}'"))),
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, ChatError> {
    value
        .trim()
        .parse()
        .map_err(|_| ChatError::Config(format!("{name} must be a number, got '{value}'")))
}

impl Settings {
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ChatError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        let get = |name: &str| vars.get(name).map(String::as_str);

        let endpoint = get("CHATLINK_ENDPOINT")
            .ok_or_else(|| ChatError::Config("CHATLINK_ENDPOINT is not set".into()))?
            .trim()
            .to_string();
        let transport = match get("CHATLINK_TRANSPORT") {
            Some(kind) => kind.parse()?,
            None => infer_transport(&endpoint),
        };

        let max_attempts = match get("CHATLINK_MAX_ATTEMPTS") {
            Some(v) => parse_number("CHATLINK_MAX_ATTEMPTS", v)?,
            None => default_max_attempts(),
        };
        if max_attempts == 0 {
            return Err(ChatError::Config("CHATLINK_MAX_ATTEMPTS must be at least 1".into()));
        }
        let request_retries = match get("CHATLINK_REQUEST_RETRIES") {
            Some(v) => parse_number("CHATLINK_REQUEST_RETRIES", v)?,
            None => default_request_retries(),
        };
        if request_retries == 0 {
            return Err(ChatError::Config(
                "CHATLINK_REQUEST_RETRIES must be at least 1".into(),
            ));
        }

        Ok(Self {
            endpoint,
            transport,
            api_key: get("CHATLINK_API_KEY").map(str::to_string),
            max_attempts,
            base_delay_ms: match get("CHATLINK_BASE_DELAY_MS") {
                Some(v) => parse_number("CHATLINK_BASE_DELAY_MS", v)?,
                None => default_base_delay_ms(),
            },
            max_delay_ms: get("CHATLINK_MAX_DELAY_MS")
                .map(|v| parse_number("CHATLINK_MAX_DELAY_MS", v))
                .transpose()?,
            request_retries,
            request_timeout_secs: match get("CHATLINK_REQUEST_TIMEOUT_SECS") {
                Some(v) => parse_number("CHATLINK_REQUEST_TIMEOUT_SECS", v)?,
                None => default_request_timeout_secs(),
            },
            queue: match get("CHATLINK_QUEUE") {
                Some(v) => parse_queue_policy(v)?,
                None => QueuePolicy::default(),
            },
            speech_language: get("CHATLINK_SPEECH_LANG")
                .map(str::to_string)
                .unwrap_or_else(default_speech_language),
            greeting: get("CHATLINK_GREETING")
                .map(str::to_string)
                .unwrap_or_else(default_greeting),
            language_detection_key: get("LANGUAGE_DETECTION_KEY").map(str::to_string),
        })
    }

    pub fn backoff(&self) -> BackoffPolicy {
        let policy = BackoffPolicy::new(Duration::from_millis(self.base_delay_ms), self.max_attempts);
        match self.max_delay_ms {
            Some(cap) => policy.with_max_delay(Duration::from_millis(cap)),
            None => policy,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            policy: self.backoff(),
            queue: self.queue,
        }
    }

    pub fn conversation_config(&self) -> ConversationConfig {
        ConversationConfig {
            greeting: self.greeting.clone(),
            speech_language: self.speech_language.clone(),
        }
    }

    pub fn transport(&self) -> Result<Transport, ChatError> {
        match self.transport {
            TransportKind::Stream => {
                let mut connector = WsConnector::new(&self.endpoint);
                if let Some(key) = &self.api_key {
                    connector = connector.with_header("x-api-key", key);
                }
                Ok(Transport::Streaming(Arc::new(connector)))
            }
            TransportKind::Request => {
                let client = HttpClient::new(
                    &self.endpoint,
                    Duration::from_secs(self.request_timeout_secs),
                    self.api_key.clone(),
                )?;
                Ok(Transport::RequestResponse {
                    client: Arc::new(client),
                    policy: BackoffPolicy::new(
                        Duration::from_millis(REQUEST_BASE_DELAY_MS),
                        self.request_retries,
                    ),
                })
            }
        }
    }

    /// `None` when no detection key is configured.
    pub fn language_detector(&self) -> Result<Option<Arc<dyn LanguageDetector>>, ChatError> {
        match &self.language_detection_key {
            Some(key) => Ok(Some(Arc::new(DetectLanguageClient::new(key.clone())?))),
            None => Ok(None),
        }
    }
}
