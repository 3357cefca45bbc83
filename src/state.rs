use crate::backoff::BackoffPolicy;
use crate::error::ChatError;
use crate::message::{Message, RequestId};
use crate::session::SessionId;
use std::time::Duration;

/// Events sent from the supervisor to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Status { status: LinkStatus, message: String },
    /// Bot text. `request` is set when this reply resolved a pending question.
    Reply {
        request: Option<RequestId>,
        message: Message,
    },
    Retrying {
        request: RequestId,
        attempt: u32,
        delay: Duration,
    },
    /// Terminal failure of a pending question.
    Failed { request: RequestId, error: ChatError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    Retrying,
    Idle,
    Failed,
    ShutDown,
}

/// Where the supervisor is in its delivery cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoPending,
    Connecting,
    Open,
    AwaitingReply,
    /// Waiting out a retry delay before reconnecting.
    Backoff,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Failure count for the request currently being delivered.
#[derive(Debug, Clone)]
pub struct RetryContext {
    attempt: u32,
    policy: BackoffPolicy,
}

impl RetryContext {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { attempt: 0, policy }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.policy.base
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Count one abnormal closure and decide what happens next.
    ///
    /// The n-th failure waits `compute_delay(n - 1)`, so the first retry
    /// waits exactly the base delay.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.attempt = self.attempt.saturating_add(1);
        if self.policy.allows(self.attempt) {
            RetryDecision::Retry {
                attempt: self.attempt,
                delay: self.policy.compute_delay(self.attempt - 1),
            }
        } else {
            RetryDecision::Exhausted {
                attempts: self.attempt,
            }
        }
    }
}

/// Point-in-time view of the supervisor, mostly for hosts and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub phase: Phase,
    pub attempt: u32,
    pub pending: Option<RequestId>,
    pub waiting: usize,
    pub session: Option<SessionId>,
}
