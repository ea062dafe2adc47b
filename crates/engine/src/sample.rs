//! A default, always-available `WorkModule`: a pass-through module that logs
//! each stage, runs the message body as a shell command, and chains new work
//! back onto the intake topic from `post_process` when the message carries a
//! `chain_to` attribute. Useful as the `--test` default and as a template
//! for real `WorkModule` implementations.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use spawnerd_broker::Broker;
use spawnerd_core::{attribute_priority, Attributes, Message, WorkCommand, WorkModule};

/// Score used when a message has no `priority` attribute: a fixed "normal"
/// score rather than a randomized one.
const DEFAULT_SCORE: f64 = 5.0;

pub struct DefaultWorkModule {
    broker: Arc<dyn Broker>,
    intake_topic: String,
}

impl DefaultWorkModule {
    pub fn new(broker: Arc<dyn Broker>, intake_topic: impl Into<String>) -> Self {
        Self {
            broker,
            intake_topic: intake_topic.into(),
        }
    }
}

#[async_trait]
impl WorkModule for DefaultWorkModule {
    async fn pre_process(&self, message: &Message) -> anyhow::Result<bool> {
        tracing::debug!(body_len = message.body().len(), "pre_process: nothing to stage");
        Ok(true)
    }

    async fn get_command(&self, message: &Message) -> anyhow::Result<WorkCommand> {
        let body = String::from_utf8_lossy(message.body()).into_owned();
        Ok(WorkCommand {
            argv: vec!["sh".to_string(), "-c".to_string(), body],
            working_directory: PathBuf::from("."),
            is_container: false,
            container_image: None,
        })
    }

    async fn post_process(&self, message: &Message) -> anyhow::Result<bool> {
        if let Some(next_body) = message.attribute("chain_to") {
            tracing::debug!(next_body, "post_process: chaining follow-up work onto intake");
            self.broker
                .publish(
                    &self.intake_topic,
                    Message::new(next_body.as_bytes().to_vec(), Attributes::new()),
                )
                .await?;
        }
        Ok(true)
    }

    async fn prioritize(&self, message: &Message) -> anyhow::Result<f64> {
        Ok(attribute_priority(message).unwrap_or(DEFAULT_SCORE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spawnerd_broker::InMemoryBroker;

    #[tokio::test]
    async fn get_command_runs_the_message_body_as_a_shell_command() {
        let broker = Arc::new(InMemoryBroker::new());
        let module = DefaultWorkModule::new(broker, "work-to-prioritize");
        let message = Message::new(b"echo hi".to_vec(), Attributes::new());
        let command = module.get_command(&message).await.unwrap();
        assert_eq!(command.argv, vec!["sh", "-c", "echo hi"]);
        assert!(!command.is_container);
    }

    #[tokio::test]
    async fn prioritize_falls_back_to_default_score_without_a_priority_attribute() {
        let broker = Arc::new(InMemoryBroker::new());
        let module = DefaultWorkModule::new(broker, "work-to-prioritize");
        let message = Message::new(Vec::new(), Attributes::new());
        assert_eq!(module.prioritize(&message).await.unwrap(), DEFAULT_SCORE);
    }

    #[tokio::test]
    async fn prioritize_prefers_explicit_priority_attribute() {
        let broker = Arc::new(InMemoryBroker::new());
        let module = DefaultWorkModule::new(broker, "work-to-prioritize");
        let mut attrs = Attributes::new();
        attrs.insert("priority".to_string(), "9".to_string());
        let message = Message::new(Vec::new(), attrs);
        assert_eq!(module.prioritize(&message).await.unwrap(), 9.0);
    }

    #[tokio::test]
    async fn post_process_chains_work_when_chain_to_is_present() {
        let broker = Arc::new(InMemoryBroker::new());
        let module = DefaultWorkModule::new(broker.clone(), "work-to-prioritize");
        let mut attrs = Attributes::new();
        attrs.insert("chain_to".to_string(), "echo follow-up".to_string());
        let message = Message::new(Vec::new(), attrs);
        assert!(module.post_process(&message).await.unwrap());
        assert_eq!(broker.len("work-to-prioritize"), 1);
    }

    #[tokio::test]
    async fn post_process_is_a_no_op_without_chain_to() {
        let broker = Arc::new(InMemoryBroker::new());
        let module = DefaultWorkModule::new(broker.clone(), "work-to-prioritize");
        let message = Message::new(Vec::new(), Attributes::new());
        assert!(module.post_process(&message).await.unwrap());
        assert!(broker.is_empty("work-to-prioritize"));
    }
}
