//! The `WorkModule` external contract: the pluggable pre/get-command/post/
//! prioritize functions a user supplies for a concrete workload.
//!
//! The daemons never introspect a `WorkModule` beyond these four calls; the
//! concrete implementation is a pluggable, user-supplied strategy selected
//! at construction, not something the engine or broker crates know about.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::message::Message;

/// Descriptor of the child process to spawn for a message.
///
/// A container command is recognized by the presence of a `docker_id`
/// attribute on the pulled message; callers are expected to strip that
/// attribute before handing the message to `get_command` (see
/// `spawnerd-engine`'s child-dispatch code, which owns that rule).
#[derive(Debug, Clone)]
pub struct WorkCommand {
    pub argv: Vec<String>,
    pub working_directory: PathBuf,
    pub is_container: bool,
    pub container_image: Option<String>,
}

/// The user-supplied "work module": pre-process, get-command, post-process
/// and prioritize. Implementations are free to talk to object storage, shell
/// out, or do nothing; the engine only cares about the boolean/score/command
/// results.
#[async_trait]
pub trait WorkModule: Send + Sync {
    /// Stage inputs before the child is spawned. Called once per message,
    /// after the initial lease but before `get_command`.
    async fn pre_process(&self, message: &Message) -> anyhow::Result<bool>;

    /// Deterministically derive the command to run from the message
    /// contents. Called once pre_process has succeeded.
    async fn get_command(&self, message: &Message) -> anyhow::Result<WorkCommand>;

    /// Publish outputs (and optionally chain new work onto the intake
    /// topic). Called once the child has exited 0.
    async fn post_process(&self, message: &Message) -> anyhow::Result<bool>;

    /// Score a message for routing. Implementations should prefer
    /// `attribute_priority` when the caller set a `priority` attribute; this
    /// is not enforced by the trait so modules retain full control.
    async fn prioritize(&self, message: &Message) -> anyhow::Result<f64>;
}

/// `message.attributes["priority"]`, parsed as an integer, if present.
/// Shared by every `WorkModule::prioritize` implementation so the override
/// rule isn't reimplemented per module.
pub fn attribute_priority(message: &Message) -> Option<f64> {
    message
        .attribute("priority")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|v| v as f64)
}
