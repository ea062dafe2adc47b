//! The Spawner daemon: priority-drain outer loop, per-message state machine,
//! and the ack-or-dead-letter decision.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spawnerd_broker::Broker;
use spawnerd_core::{AppConfig, Message, TopicTable, WorkCommand, WorkModule};

use crate::shutdown::ShutdownHandle;
use crate::supervise::{self, ChildOutcome};

/// How long the outer loop sleeps after a full pass over every tier found
/// nothing.
const EMPTY_PASS_SLEEP: Duration = Duration::from_secs(10);

/// How often child liveness is polled and the lease kept alive.
const CHILD_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Attribute that marks a message for container dispatch.
const DOCKER_ID_ATTR: &str = "docker_id";

#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// pre_process, child, and post_process all succeeded; the original
    /// message was acked.
    Done,
    /// Some stage failed; the message was copied to dead-letter and the
    /// original was acked.
    DeadLettered { reason: String },
    /// Shutdown was requested while the child was running. The message was
    /// left leased, untouched: no ack, no dead-letter. It is redelivered
    /// once the lease expires.
    Interrupted,
}

/// Result of a single outer-loop pass.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Every tier was empty; the loop slept and reset to tier 0.
    NoWorkAnyTier,
    /// The probed tier had nothing; the tier index advanced.
    EmptyTier,
    /// A message was pulled and fully processed.
    Processed(MessageOutcome),
}

pub struct Spawner {
    broker: Arc<dyn Broker>,
    topics: Arc<TopicTable>,
    work_module: Arc<dyn WorkModule>,
    config: Arc<AppConfig>,
    tier_index: AtomicUsize,
    child_poll_interval: Duration,
}

impl Spawner {
    pub fn new(
        broker: Arc<dyn Broker>,
        topics: Arc<TopicTable>,
        work_module: Arc<dyn WorkModule>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            broker,
            topics,
            work_module,
            config,
            tier_index: AtomicUsize::new(0),
            child_poll_interval: CHILD_POLL_INTERVAL,
        }
    }

    /// Test-only constructor that shortens the child-supervision poll
    /// cadence so timeout/keep-alive scenarios don't need real wall-clock
    /// minutes.
    #[cfg(test)]
    pub fn with_child_poll_interval(mut self, interval: Duration) -> Self {
        self.child_poll_interval = interval;
        self
    }

    /// Run until `shutdown` is requested. In-flight messages are not acked
    /// on shutdown; their leases expire and they're redelivered. A message
    /// in the middle of child supervision is given a grace period to exit
    /// on its own before being killed — see `process_message` and
    /// `supervise::run_and_supervise` — so shutdown is never implemented as
    /// a bare cancellation race against an in-flight step.
    pub async fn run(&self, mut shutdown: ShutdownHandle) -> anyhow::Result<()> {
        loop {
            if shutdown.is_requested() {
                tracing::info!("spawner shutting down");
                return Ok(());
            }
            self.step(&shutdown).await?;
        }
    }

    /// One pass of the outer loop. Exposed for tests that want to drive the
    /// loop deterministically, scenario by scenario.
    pub async fn step(&self, shutdown: &ShutdownHandle) -> anyhow::Result<StepOutcome> {
        let tiers = self.topics.tier_topics();
        let i = self.tier_index.load(Ordering::SeqCst);

        if i >= tiers.len() {
            tracing::info!("no work found across any tier, sleeping");
            let mut idle_shutdown = shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(EMPTY_PASS_SLEEP) => {}
                _ = idle_shutdown.cancelled() => {}
            }
            self.tier_index.store(0, Ordering::SeqCst);
            return Ok(StepOutcome::NoWorkAnyTier);
        }

        let topic = tiers[i];
        let pulled = match self.broker.pull(topic, 1).await {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!(topic, tier = i, error = %err, "pull failed, treating as empty");
                Vec::new()
            }
        };

        let Some(message) = pulled.into_iter().next() else {
            self.tier_index.store(i + 1, Ordering::SeqCst);
            return Ok(StepOutcome::EmptyTier);
        };

        tracing::info!(topic, tier = i, "pulled message for processing");
        let outcome = self.process_message(topic, message, shutdown).await?;
        // Strict preemptive priority: always probe the highest tier next,
        // regardless of whether this message succeeded or was dead-lettered.
        self.tier_index.store(0, Ordering::SeqCst);
        Ok(StepOutcome::Processed(outcome))
    }

    async fn process_message(
        &self,
        topic: &str,
        mut message: Message,
        shutdown: &ShutdownHandle,
    ) -> anyhow::Result<MessageOutcome> {
        self.keep_alive_best_effort(&message).await;

        match self.work_module.pre_process(&message).await {
            Ok(true) => {}
            Ok(false) => return self.dead_letter(message, "pre_process returned false".to_string()).await,
            Err(err) => {
                return self
                    .dead_letter(message, format!("pre_process error: {err:#}"))
                    .await
            }
        }

        self.keep_alive_best_effort(&message).await;

        // A container command is attribute-driven: a docker_id attribute
        // bypasses get_command entirely and the attribute is stripped
        // before anything downstream (including a child process
        // environment) can see it.
        let docker_image = message.take_attribute(DOCKER_ID_ATTR);
        let command = match docker_image {
            Some(image) => WorkCommand {
                argv: Vec::new(),
                working_directory: PathBuf::from("."),
                is_container: true,
                container_image: Some(image),
            },
            None => match self.work_module.get_command(&message).await {
                Ok(cmd) => cmd,
                Err(err) => {
                    return self
                        .dead_letter(message, format!("get_command error: {err:#}"))
                        .await
                }
            },
        };

        let supervised = supervise::run_and_supervise(
            &command,
            &message,
            self.broker.as_ref(),
            self.config.wait_timeout,
            self.child_poll_interval,
            shutdown.clone(),
        )
        .await;

        match supervised {
            Ok(ChildOutcome::Success) => {}
            Ok(ChildOutcome::NonZeroExit(code)) => {
                return self
                    .dead_letter(message, format!("child exited with status {code}"))
                    .await
            }
            Ok(ChildOutcome::TimedOut) => {
                return self
                    .dead_letter(message, format!("child timed out after {:?}", self.config.wait_timeout))
                    .await
            }
            Ok(ChildOutcome::Interrupted) => {
                tracing::info!(topic, "shutdown requested during supervision, leaving message leased");
                return Ok(MessageOutcome::Interrupted);
            }
            Err(err) => {
                return self
                    .dead_letter(message, format!("failed to spawn child: {err:#}"))
                    .await
            }
        }

        self.keep_alive_best_effort(&message).await;

        match self.work_module.post_process(&message).await {
            Ok(true) => {}
            Ok(false) => return self.dead_letter(message, "post_process returned false".to_string()).await,
            Err(err) => {
                return self
                    .dead_letter(message, format!("post_process error: {err:#}"))
                    .await
            }
        }

        if let Err(err) = self.broker.ack(&message).await {
            tracing::warn!(topic, error = %err, "ack failed, relying on lease expiry for redelivery");
        }
        Ok(MessageOutcome::Done)
    }

    async fn dead_letter(&self, message: Message, reason: String) -> anyhow::Result<MessageOutcome> {
        tracing::error!(reason = %reason, "dead-lettering message");
        if let Err(err) = self
            .broker
            .log_failed(self.topics.dead_letter_topic(), &message, &reason)
            .await
        {
            tracing::error!(error = %err, "dead-letter publish failed");
        }
        if let Err(err) = self.broker.ack(&message).await {
            tracing::warn!(error = %err, "ack after dead-letter failed, relying on lease expiry");
        }
        Ok(MessageOutcome::DeadLettered { reason })
    }

    async fn keep_alive_best_effort(&self, message: &Message) {
        if let Err(err) = self.broker.keep_alive(message).await {
            tracing::warn!(error = %err, "keep_alive failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use crate::testutil::ScriptedWorkModule;
    use spawnerd_broker::InMemoryBroker;
    use spawnerd_core::{Attributes, PriorityTier};

    fn never_shuts_down() -> ShutdownHandle {
        Shutdown::new().1
    }

    fn table_with_two_tiers() -> Arc<TopicTable> {
        Arc::new(TopicTable::from_tiers(
            vec![
                PriorityTier {
                    tier_id: 1,
                    low_score: 8.0,
                    high_score: 10.0,
                    topic_root: String::new(),
                    topic_name: "tier-high".to_string(),
                },
                PriorityTier {
                    tier_id: 2,
                    low_score: 0.0,
                    high_score: 8.0,
                    topic_root: String::new(),
                    topic_name: "tier-low".to_string(),
                },
            ],
            "work-to-prioritize",
            "failed-work",
        ))
    }

    fn config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            wait_timeout: Duration::from_secs(5),
            ..AppConfig::default()
        })
    }

    #[tokio::test]
    async fn happy_path_acks_and_does_not_dead_letter() {
        let broker = Arc::new(InMemoryBroker::new());
        broker
            .publish("tier-low", Message::new(b"job-A".to_vec(), Attributes::new()))
            .await
            .unwrap();

        let module = Arc::new(ScriptedWorkModule::succeeding());
        let spawner = Spawner::new(broker.clone(), table_with_two_tiers(), module.clone(), config())
            .with_child_poll_interval(Duration::from_millis(10));

        let outcome = spawner.step(&never_shuts_down()).await.unwrap();
        assert_eq!(outcome, StepOutcome::Processed(MessageOutcome::Done));
        assert!(broker.is_empty("tier-low"));
        assert!(broker.is_empty("failed-work"));
        assert!(module.pre_process_called());
        assert!(module.post_process_called());
    }

    #[tokio::test]
    async fn priority_preemption_drains_high_tier_before_low_tier() {
        let broker = Arc::new(InMemoryBroker::new());
        broker
            .publish("tier-high", Message::new(b"high".to_vec(), Attributes::new()))
            .await
            .unwrap();
        broker
            .publish("tier-low", Message::new(b"low".to_vec(), Attributes::new()))
            .await
            .unwrap();

        let module = Arc::new(ScriptedWorkModule::succeeding());
        let spawner = Spawner::new(broker.clone(), table_with_two_tiers(), module, config())
            .with_child_poll_interval(Duration::from_millis(10));

        let first = spawner.step(&never_shuts_down()).await.unwrap();
        assert_eq!(first, StepOutcome::Processed(MessageOutcome::Done));
        assert!(broker.is_empty("tier-high"));
        assert!(!broker.is_empty("tier-low"));

        // Tier index reset to 0: the next step re-probes tier-high (now
        // empty) before reaching tier-low.
        let second = spawner.step(&never_shuts_down()).await.unwrap();
        assert_eq!(second, StepOutcome::EmptyTier);
        let third = spawner.step(&never_shuts_down()).await.unwrap();
        assert_eq!(third, StepOutcome::Processed(MessageOutcome::Done));
        assert!(broker.is_empty("tier-low"));
    }

    #[tokio::test]
    async fn pre_process_failure_dead_letters_without_spawning() {
        let broker = Arc::new(InMemoryBroker::new());
        broker
            .publish("tier-low", Message::new(b"job".to_vec(), Attributes::new()))
            .await
            .unwrap();

        let module = Arc::new(ScriptedWorkModule::failing_pre_process());
        let spawner = Spawner::new(broker.clone(), table_with_two_tiers(), module.clone(), config())
            .with_child_poll_interval(Duration::from_millis(10));

        let outcome = spawner.step(&never_shuts_down()).await.unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Processed(MessageOutcome::DeadLettered { .. })
        ));
        assert!(broker.is_empty("tier-low"));
        assert_eq!(broker.len("failed-work"), 1);
        assert!(!module.get_command_called());
    }

    #[tokio::test]
    async fn child_timeout_dead_letters_with_keep_alive_observed() {
        let broker = Arc::new(InMemoryBroker::new());
        broker
            .publish("tier-low", Message::new(b"job".to_vec(), Attributes::new()))
            .await
            .unwrap();

        let module = Arc::new(ScriptedWorkModule::running_command(vec![
            "sh".to_string(),
            "-c".to_string(),
            "sleep 5".to_string(),
        ]));
        let mut cfg = AppConfig::default();
        cfg.wait_timeout = Duration::from_millis(60);
        let spawner = Spawner::new(broker.clone(), table_with_two_tiers(), module, Arc::new(cfg))
            .with_child_poll_interval(Duration::from_millis(20));

        let outcome = spawner.step(&never_shuts_down()).await.unwrap();
        match outcome {
            StepOutcome::Processed(MessageOutcome::DeadLettered { reason }) => {
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected dead-lettered timeout, got {other:?}"),
        }
        assert_eq!(broker.len("failed-work"), 1);
    }

    #[tokio::test]
    async fn docker_id_attribute_strips_before_get_command_and_skips_it() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut attrs = Attributes::new();
        attrs.insert("docker_id".to_string(), "does-not-exist:latest".to_string());
        broker
            .publish("tier-low", Message::new(b"job".to_vec(), attrs))
            .await
            .unwrap();

        let module = Arc::new(ScriptedWorkModule::succeeding());
        let spawner = Spawner::new(broker.clone(), table_with_two_tiers(), module.clone(), config())
            .with_child_poll_interval(Duration::from_millis(10));

        // The container image won't exist, so the child spawn itself will
        // fail; what matters here is that get_command was never called.
        let _ = spawner.step(&never_shuts_down()).await;
        assert!(!module.get_command_called());
    }
}
