use crate::error::ChatError;
use crate::message::{PendingRequest, RequestId};
use std::collections::VecDeque;

pub const DEFAULT_FIFO_CAPACITY: usize = 8;

/// What happens to a submission while another one is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Refuse with `Busy`.
    Reject,
    /// Hold up to `capacity` submissions and send them one at a time.
    Fifo { capacity: usize },
}

impl Default for QueuePolicy {
    fn default() -> Self {
        QueuePolicy::Reject
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Became the in-flight request; deliver it now.
    Dispatch(RequestId),
    /// Parked behind the in-flight request. `position` starts at 1.
    Waiting { id: RequestId, position: usize },
}

/// Single-flight gate in front of the backend.
///
/// The backend has no correlation id, so at most one request is ever in
/// flight whatever the policy.
#[derive(Debug)]
pub struct DeliveryQueue {
    policy: QueuePolicy,
    in_flight: Option<PendingRequest>,
    waiting: VecDeque<PendingRequest>,
    next_id: u64,
}

impl DeliveryQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            policy,
            in_flight: None,
            waiting: VecDeque::new(),
            next_id: 0,
        }
    }

    pub fn enqueue(&mut self, text: impl Into<String>) -> Result<Enqueued, ChatError> {
        if self.in_flight.is_some() {
            let capacity = match self.policy {
                QueuePolicy::Reject => 0,
                QueuePolicy::Fifo { capacity } => capacity,
            };
            if self.waiting.len() >= capacity {
                return Err(ChatError::Busy);
            }
        }

        self.next_id += 1;
        let request = PendingRequest::new(RequestId(self.next_id), text.into());
        let id = request.id;
        if self.in_flight.is_none() {
            self.in_flight = Some(request);
            Ok(Enqueued::Dispatch(id))
        } else {
            self.waiting.push_back(request);
            Ok(Enqueued::Waiting {
                id,
                position: self.waiting.len(),
            })
        }
    }

    pub fn in_flight(&self) -> Option<&PendingRequest> {
        self.in_flight.as_ref()
    }

    pub fn in_flight_mut(&mut self) -> Option<&mut PendingRequest> {
        self.in_flight.as_mut()
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    /// Retire the in-flight request and promote the next waiting one.
    pub fn complete(&mut self) -> Option<PendingRequest> {
        let done = self.in_flight.take();
        self.in_flight = self.waiting.pop_front();
        done
    }

    /// Drop everything; returns how many requests were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = usize::from(self.in_flight.is_some()) + self.waiting.len();
        self.in_flight = None;
        self.waiting.clear();
        dropped
    }
}
