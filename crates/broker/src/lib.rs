#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! The broker abstraction: a topic-addressed message queue with pull,
//! publish, ack, lease-renewal and dead-letter, plus two backends: an
//! in-memory one used as a test double, and a cloud-broker one that stands
//! in for a concrete pub/sub SDK — the interface shape only, not a working
//! client for any real provider.

mod cloud;
mod error;
mod memory;

pub use cloud::CloudBroker;
pub use error::BrokerError;
pub use memory::InMemoryBroker;

use async_trait::async_trait;
use spawnerd_core::Message;

/// The capability set shared by both daemons.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a message on a topic. Topic auto-creation semantics are
    /// backend-specific; the in-memory backend creates on first publish.
    async fn publish(&self, topic: &str, message: Message) -> Result<(), BrokerError>;

    /// Non-blocking pull of up to `max_count` messages. Returns an empty
    /// vec when nothing is immediately available — a deadline-exceeded
    /// condition from the backend is mapped to empty here, never
    /// propagated as an error.
    async fn pull(&self, topic: &str, max_count: usize) -> Result<Vec<Message>, BrokerError>;

    /// Permanently remove a leased message from its topic. Idempotent on
    /// already-acked messages.
    async fn ack(&self, message: &Message) -> Result<(), BrokerError>;

    /// Extend a message's lease by the backend's default lease duration.
    /// Safe to call repeatedly; a no-op for messages that are not
    /// currently leased (already acked, failed, or never pulled).
    async fn keep_alive(&self, message: &Message) -> Result<(), BrokerError>;

    /// Republish `message` on `dead_letter_topic` with an added
    /// `error_<timestamp>` attribute describing `reason`. Does not ack the
    /// original; callers ack it separately once this returns.
    async fn log_failed(
        &self,
        dead_letter_topic: &str,
        message: &Message,
        reason: &str,
    ) -> Result<(), BrokerError>;
}
