use thiserror::Error;

/// Everything that can go wrong between a submitted question and its reply.
///
/// Transport-level variants (`TransportOpen`, `AbnormalClosure`, `Request`)
/// are retried internally and never reach the user directly. Only
/// `RetriesExhausted` and `InvalidState` are surfaced as failure events;
/// `Busy`, `EmptyQuestion` and `ShutDown` come back from `submit` itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("a question is already waiting for its answer")]
    Busy,

    #[error("please enter a question")]
    EmptyQuestion,

    #[error("connection could not be established: {0}")]
    TransportOpen(String),

    #[error("connection closed abnormally (code {code}): {reason}")]
    AbnormalClosure { code: u16, reason: String },

    #[error("{0}")]
    Request(String),

    #[error("giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("chat supervisor has shut down")]
    ShutDown,

    #[error("speech capture failed: {0}")]
    Speech(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChatError {
    /// Whether the supervisor should spend a retry attempt on this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::TransportOpen(_) | ChatError::AbnormalClosure { .. } | ChatError::Request(_)
        )
    }

    /// Failures that end a pending request and must be shown to the user.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            ChatError::RetriesExhausted { .. } | ChatError::InvalidState { .. }
        )
    }
}
