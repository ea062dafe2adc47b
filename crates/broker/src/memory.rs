//! In-memory broker backend: an ordered sequence per topic, used as a test
//! double in place of a real pub/sub cluster.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use spawnerd_core::{Attributes, LeaseToken, Message};

use crate::error::BrokerError;
use crate::Broker;

/// Default lease duration for the in-memory backend.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);

struct Entry {
    id: u64,
    body: Vec<u8>,
    attributes: Attributes,
    lease: Option<Lease>,
}

struct Lease {
    token: LeaseToken,
    expires_at: Instant,
}

struct State {
    topics: HashMap<String, Vec<Entry>>,
    index: HashMap<LeaseToken, (String, u64)>,
    next_id: u64,
    next_lease_seq: u64,
}

/// In-memory `Broker` implementation. Thread-safe, cloneable handle; every
/// clone shares the same underlying queues.
pub struct InMemoryBroker {
    state: Mutex<State>,
    lease_duration: Duration,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_lease_duration(DEFAULT_LEASE_DURATION)
    }

    pub fn with_lease_duration(lease_duration: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                topics: HashMap::new(),
                index: HashMap::new(),
                next_id: 0,
                next_lease_seq: 0,
            }),
            lease_duration,
        }
    }

    /// Number of messages currently visible (available or leased) on
    /// `topic`. Test helper.
    pub fn len(&self, topic: &str) -> usize {
        let state = self.state.lock().expect("lock poisoned");
        state.topics.get(topic).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, message: Message) -> Result<(), BrokerError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let id = state.next_id;
        state.next_id += 1;
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(Entry {
                id,
                body: message.body().to_vec(),
                attributes: message.attributes().clone(),
                lease: None,
            });
        Ok(())
    }

    async fn pull(&self, topic: &str, max_count: usize) -> Result<Vec<Message>, BrokerError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let mut state = self.state.lock().expect("lock poisoned");
        let now = Instant::now();
        let lease_duration = self.lease_duration;
        let Some(entries) = state.topics.get_mut(topic) else {
            return Ok(Vec::new());
        };

        let mut leased = Vec::new();
        let mut seq = state.next_lease_seq;
        for entry in entries.iter_mut() {
            if leased.len() >= max_count {
                break;
            }
            let available = match &entry.lease {
                None => true,
                Some(lease) => lease.expires_at <= now,
            };
            if !available {
                continue;
            }
            let token = LeaseToken::new(format!("{topic}:{}:{}", entry.id, seq));
            seq += 1;
            entry.lease = Some(Lease {
                token: token.clone(),
                expires_at: now + lease_duration,
            });
            leased.push((token, entry.id, entry.body.clone(), entry.attributes.clone()));
        }
        state.next_lease_seq = seq;

        let out = leased;
        for (token, id, ..) in &out {
            state.index.insert(token.clone(), (topic.to_string(), *id));
        }

        Ok(out
            .into_iter()
            .map(|(token, _id, body, attrs)| Message::new(body, attrs).with_lease(token))
            .collect())
    }

    async fn ack(&self, message: &Message) -> Result<(), BrokerError> {
        let Some(token) = message.lease() else {
            return Ok(());
        };
        let mut state = self.state.lock().expect("lock poisoned");
        let Some((topic, id)) = state.index.remove(token) else {
            return Ok(()); // already acked/failed/expired: idempotent no-op
        };
        if let Some(entries) = state.topics.get_mut(&topic) {
            entries.retain(|e| e.id != id);
        }
        Ok(())
    }

    async fn keep_alive(&self, message: &Message) -> Result<(), BrokerError> {
        let Some(token) = message.lease() else {
            return Ok(());
        };
        let mut state = self.state.lock().expect("lock poisoned");
        let Some((topic, id)) = state.index.get(token).cloned() else {
            return Ok(()); // not currently leased: no-op
        };
        let lease_duration = self.lease_duration;
        if let Some(entries) = state.topics.get_mut(&topic) {
            if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
                if let Some(lease) = &mut entry.lease {
                    if &lease.token == token {
                        lease.expires_at = Instant::now() + lease_duration;
                    }
                }
            }
        }
        Ok(())
    }

    async fn log_failed(
        &self,
        dead_letter_topic: &str,
        message: &Message,
        reason: &str,
    ) -> Result<(), BrokerError> {
        let mut attributes = message.attributes().clone();
        attributes.insert(format!("error_{}", Utc::now().timestamp_millis()), reason.to_string());
        self.publish(dead_letter_topic, Message::new(message.body().to_vec(), attributes))
            .await
    }
}
