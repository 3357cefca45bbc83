//! Resilient link between a chat widget and its question-answering backend.

pub mod backoff;
pub mod conversation;
pub mod error;
pub mod language;
pub mod message;
pub mod queue;
pub mod session;
pub mod settings;
pub mod speech;
pub mod state;
pub mod supervisor;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod testing;

pub use error::ChatError;
