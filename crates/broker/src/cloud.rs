//! Cloud-broker backend: the interface shape a real pub/sub client would
//! expose to the rest of the system (POST a JSON body, map non-2xx to a
//! typed error, treat the backend's deadline-exceeded as empty rather than
//! an error). It is not wired to any concrete provider.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use spawnerd_core::{Attributes, LeaseToken, Message};

use crate::error::BrokerError;
use crate::Broker;

/// How long a `pull` is allowed to block before being treated as
/// deadline-exceeded: mapped to empty, never propagated as an error.
const PULL_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    data_b64: String,
    attributes: &'a Attributes,
}

#[derive(Debug, Deserialize)]
struct PulledMessageDto {
    ack_id: String,
    data_b64: String,
    #[serde(default)]
    attributes: Attributes,
}

#[derive(Debug, Deserialize, Default)]
struct PullResponseDto {
    #[serde(default)]
    messages: Vec<PulledMessageDto>,
}

#[derive(Debug, Serialize)]
struct AckRequest<'a> {
    ack_ids: &'a [String],
}

/// A generic REST-shaped pub/sub client. Subscription paths are cached per
/// topic on first use and live for the process lifetime.
pub struct CloudBroker {
    http: reqwest::Client,
    base_url: Url,
    project_id: String,
    subscriptions: Mutex<HashMap<String, String>>,
}

impl CloudBroker {
    pub fn new(base_url: Url, project_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            project_id: project_id.into(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn subscription_for(&self, topic: &str) -> String {
        let mut subs = self.subscriptions.lock().expect("lock poisoned");
        subs.entry(topic.to_string())
            .or_insert_with(|| format!("projects/{}/subscriptions/{topic}", self.project_id))
            .clone()
    }

    fn topic_path(&self, topic: &str) -> String {
        format!("projects/{}/topics/{topic}", self.project_id)
    }
}

#[async_trait]
impl Broker for CloudBroker {
    async fn publish(&self, topic: &str, message: Message) -> Result<(), BrokerError> {
        let url = self
            .base_url
            .join(&format!("v1/{}:publish", self.topic_path(topic)))
            .map_err(|err| BrokerError::Publish {
                topic: topic.to_string(),
                detail: err.to_string(),
            })?;

        let body = PublishRequest {
            data_b64: B64.encode(message.body()),
            attributes: message.attributes(),
        };

        let res = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| BrokerError::Publish {
                topic: topic.to_string(),
                detail: err.to_string(),
            })?;

        if !res.status().is_success() {
            let status = res.status();
            let detail = res.text().await.unwrap_or_default();
            return Err(BrokerError::Publish {
                topic: topic.to_string(),
                detail: format!("http {status}: {detail}"),
            });
        }
        Ok(())
    }

    async fn pull(&self, topic: &str, max_count: usize) -> Result<Vec<Message>, BrokerError> {
        let subscription = self.subscription_for(topic);
        let url = match self.base_url.join(&format!("v1/{subscription}:pull")) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(topic, error = %err, "failed to build pull url, treating as empty");
                return Ok(Vec::new());
            }
        };

        let res = self
            .http
            .post(url)
            .json(&serde_json::json!({ "maxMessages": max_count }))
            .timeout(PULL_DEADLINE)
            .send()
            .await;

        let res = match res {
            Ok(res) => res,
            Err(err) if err.is_timeout() => {
                tracing::debug!(topic, "pull deadline exceeded, treating as empty");
                return Ok(Vec::new());
            }
            Err(err) => {
                tracing::warn!(topic, error = %err, "transient pull error, treating as empty");
                return Ok(Vec::new());
            }
        };

        if !res.status().is_success() {
            tracing::warn!(topic, status = %res.status(), "pull returned non-success, treating as empty");
            return Ok(Vec::new());
        }

        let parsed: PullResponseDto = match res.json().await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(topic, error = %err, "pull response undecodable, treating as empty");
                return Ok(Vec::new());
            }
        };

        let out = parsed
            .messages
            .into_iter()
            .take(max_count)
            .filter_map(|dto| {
                let body = B64.decode(&dto.data_b64).ok()?;
                Some(Message::new(body, dto.attributes).with_lease(LeaseToken::new(dto.ack_id)))
            })
            .collect();
        Ok(out)
    }

    async fn ack(&self, message: &Message) -> Result<(), BrokerError> {
        let Some(lease) = message.lease() else {
            return Ok(());
        };
        let ack_ids = [lease.as_str().to_string()];
        let url = self
            .base_url
            .join("v1/ack")
            .map_err(|err| BrokerError::Ack {
                detail: err.to_string(),
            })?;
        let res = self
            .http
            .post(url)
            .json(&AckRequest { ack_ids: &ack_ids })
            .send()
            .await;
        // Ack failures are logged, not propagated: the lease expiry takes
        // care of redelivery.
        if let Err(err) = res {
            tracing::warn!(error = %err, "ack failed, relying on lease expiry for redelivery");
        }
        Ok(())
    }

    async fn keep_alive(&self, message: &Message) -> Result<(), BrokerError> {
        let Some(lease) = message.lease() else {
            return Ok(());
        };
        let url = self
            .base_url
            .join("v1/modifyAckDeadline")
            .map_err(|err| BrokerError::Ack {
                detail: err.to_string(),
            })?;
        let res = self
            .http
            .post(url)
            .json(&serde_json::json!({ "ackIds": [lease.as_str()] }))
            .send()
            .await;
        if let Err(err) = res {
            tracing::warn!(error = %err, "keep_alive failed");
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
        attributes.insert(
            format!("error_{}", Utc::now().timestamp_millis()),
            reason.to_string(),
        );
        self.publish(dead_letter_topic, Message::new(message.body().to_vec(), attributes))
            .await
    }
}
