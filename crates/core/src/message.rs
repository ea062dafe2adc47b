//! The `Message` data model: an immutable body and attribute map, plus the
//! broker-assigned lease metadata threaded through a message's lifecycle.

use std::collections::HashMap;

/// String-to-string attribute map carried alongside a message body.
pub type Attributes = HashMap<String, String>;

/// Opaque, broker-assigned lease handle. Invisible to `WorkModule` authors;
/// only the broker that issued it can interpret the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// Construct a lease token from a broker-specific handle (an ack id, a
    /// slot index, ...). Only brokers should call this.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a pulled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Pulled and currently hidden from other consumers.
    Leased,
    /// Durably removed from its topic.
    Acked,
    /// Routed to the dead-letter topic; awaiting ack of the original.
    Failed,
}

/// An immutable message body plus attributes, with broker-assigned lease
/// metadata threaded through. `body` may be empty; `attributes` is always
/// present (possibly empty).
#[derive(Debug, Clone)]
pub struct Message {
    body: Vec<u8>,
    attributes: Attributes,
    lease: Option<LeaseToken>,
    state: MessageState,
}

impl Message {
    /// Construct a freshly-authored message, not yet leased by any broker.
    pub fn new(body: impl Into<Vec<u8>>, attributes: Attributes) -> Self {
        Self {
            body: body.into(),
            attributes,
            lease: None,
            state: MessageState::Leased,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Remove and return an attribute, used by the Spawner to strip
    /// `docker_id` before handing the message to a child process.
    pub fn take_attribute(&mut self, key: &str) -> Option<String> {
        self.attributes.remove(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn lease(&self) -> Option<&LeaseToken> {
        self.lease.as_ref()
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    /// Broker-internal: attach the lease issued for a pull.
    pub fn with_lease(mut self, lease: LeaseToken) -> Self {
        self.lease = Some(lease);
        self.state = MessageState::Leased;
        self
    }

    /// Broker-internal: mark as durably acked.
    pub fn mark_acked(&mut self) {
        self.state = MessageState::Acked;
    }

    /// Broker-internal: mark as routed to dead-letter, pending ack of the
    /// original.
    pub fn mark_failed(&mut self) {
        self.state = MessageState::Failed;
    }
}
