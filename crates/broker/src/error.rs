use thiserror::Error;

/// Broker failure modes. `pull` failures are meant to be absorbed
/// by the backend itself (mapped to an empty result) before they ever reach
/// this type; the daemon loop additionally treats any `Err` from `pull` the
/// same way as a defense in depth.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("transient broker error on topic {topic}: {detail}")]
    Transient { topic: String, detail: String },

    #[error("publish to topic {topic} failed: {detail}")]
    Publish { topic: String, detail: String },

    #[error("ack failed: {detail}")]
    Ack { detail: String },

    #[error("dead-letter publish failed: {detail}")]
    DeadLetter { detail: String },
}
