//! The Prioritizer daemon: score intake messages and route them to their
//! tier topic, or dead-letter them if scoring fails.

use std::sync::Arc;

use spawnerd_broker::Broker;
use spawnerd_core::{Message, TopicTable, WorkModule};

use crate::shutdown::ShutdownHandle;

/// How long the loop sleeps after finding the intake topic empty.
const EMPTY_INTAKE_SLEEP: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum PrioritizerOutcome {
    /// The intake topic had nothing to pull.
    NoWork,
    /// The message was scored and republished to the named tier topic.
    Routed { topic: String, score: f64 },
    /// Scoring failed; the message was dead-lettered.
    DeadLettered { reason: String },
}

pub struct Prioritizer {
    broker: Arc<dyn Broker>,
    topics: Arc<TopicTable>,
    work_module: Arc<dyn WorkModule>,
    empty_intake_sleep: std::time::Duration,
}

impl Prioritizer {
    pub fn new(broker: Arc<dyn Broker>, topics: Arc<TopicTable>, work_module: Arc<dyn WorkModule>) -> Self {
        Self {
            broker,
            topics,
            work_module,
            empty_intake_sleep: EMPTY_INTAKE_SLEEP,
        }
    }

    /// Test-only constructor that shortens the empty-intake backoff.
    #[cfg(test)]
    pub fn with_empty_intake_sleep(mut self, sleep: std::time::Duration) -> Self {
        self.empty_intake_sleep = sleep;
        self
    }

    /// Run until `shutdown` is requested.
    pub async fn run(&self, mut shutdown: ShutdownHandle) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("prioritizer shutting down");
                    return Ok(());
                }
                result = self.step() => {
                    result?;
                }
            }
        }
    }

    /// One pass: pull, score, route or dead-letter, ack the original.
    pub async fn step(&self) -> anyhow::Result<PrioritizerOutcome> {
        let intake = self.topics.intake_topic();
        let pulled = match self.broker.pull(intake, 1).await {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!(error = %err, "intake pull failed, treating as empty");
                Vec::new()
            }
        };

        let Some(message) = pulled.into_iter().next() else {
            tokio::time::sleep(self.empty_intake_sleep).await;
            return Ok(PrioritizerOutcome::NoWork);
        };

        self.route_or_dead_letter(message).await
    }

    async fn route_or_dead_letter(&self, message: Message) -> anyhow::Result<PrioritizerOutcome> {
        let outcome = match self.work_module.prioritize(&message).await {
            Ok(score) => match self.topics.tier_for(score) {
                Some(topic) => {
                    let topic = topic.to_string();
                    if let Err(err) = self
                        .broker
                        .publish(&topic, Message::new(message.body().to_vec(), message.attributes().clone()))
                        .await
                    {
                        tracing::error!(topic, error = %err, "failed to route scored message");
                        PrioritizerOutcome::DeadLettered {
                            reason: format!("publish to {topic} failed: {err}"),
                        }
                    } else {
                        PrioritizerOutcome::Routed { topic, score }
                    }
                }
                None => PrioritizerOutcome::DeadLettered {
                    reason: "no tier matched the computed score".to_string(),
                },
            },
            Err(err) => PrioritizerOutcome::DeadLettered {
                reason: format!("prioritize error: {err:#}"),
            },
        };

        if let PrioritizerOutcome::DeadLettered { reason } = &outcome {
            if let Err(err) = self
                .broker
                .log_failed(self.topics.dead_letter_topic(), &message, reason)
                .await
            {
                tracing::error!(error = %err, "dead-letter publish failed");
            }
        }

        if let Err(err) = self.broker.ack(&message).await {
            tracing::warn!(error = %err, "ack of intake message failed, relying on lease expiry");
        }
        Ok(outcome)
    }
}
