//! Child process supervision: spawn a container or shell command, poll its
//! liveness, keep the triggering message's broker lease alive while it
//! runs, and enforce the end-to-end wait timeout.
//!
//! The lease is refreshed *before* the timeout is checked each tick, so a
//! run that times out on its very first tick has still issued one
//! `keep_alive` call.

use std::time::{Duration, Instant};

use anyhow::Context;
use spawnerd_broker::Broker;
use spawnerd_core::{Message, WorkCommand};

use crate::shutdown::ShutdownHandle;

/// The container runtime binary invoked for `docker_id`-bearing messages.
/// Named `docker` to match the attribute; swap for `podman` etc. by
/// building a different `WorkCommand` if ever needed.
const CONTAINER_RUNTIME: &str = "docker";

/// How long a child is given to exit on its own once shutdown has been
/// requested, before it is killed outright. Distinct from the ordinary
/// wait-timeout path, which kills immediately with no grace period.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildOutcome {
    Success,
    NonZeroExit(i32),
    TimedOut,
    /// Shutdown was requested while the child was running; it was given a
    /// grace period and then terminated (or exited on its own within it).
    /// Either way, the caller must not treat this as a normal completion:
    /// no post_process, no ack.
    Interrupted,
}

fn build_command(command: &WorkCommand) -> anyhow::Result<tokio::process::Command> {
    if command.is_container {
        let image = command
            .container_image
            .as_deref()
            .context("container command is missing an image")?;
        let mut cmd = tokio::process::Command::new(CONTAINER_RUNTIME);
        cmd.args(["run", "--rm", image]);
        Ok(cmd)
    } else {
        let (program, rest) = command
            .argv
            .split_first()
            .context("shell command has an empty argv")?;
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(rest);
        cmd.current_dir(&command.working_directory);
        Ok(cmd)
    }
}

/// Spawn `command`, keeping `message`'s broker lease alive every
/// `poll_interval` until the child exits or `timeout` elapses end-to-end.
///
/// If `shutdown` fires first, the child is given `SHUTDOWN_GRACE_PERIOD` to
/// exit on its own before being killed; this path always reports
/// `Interrupted` regardless of how the child ultimately exited, since a
/// message in flight during shutdown must not be acked or dead-lettered.
pub(crate) async fn run_and_supervise(
    command: &WorkCommand,
    message: &Message,
    broker: &dyn Broker,
    timeout: Duration,
    poll_interval: Duration,
    mut shutdown: ShutdownHandle,
) -> anyhow::Result<ChildOutcome> {
    let mut cmd = build_command(command)?;
    cmd.kill_on_drop(true);
    let mut child = cmd.spawn().context("failed to spawn child process")?;

    let start = Instant::now();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // interval's first tick fires immediately; consume it

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.context("failed waiting on child process")?;
                return Ok(match status.code() {
                    Some(0) => ChildOutcome::Success,
                    Some(code) => ChildOutcome::NonZeroExit(code),
                    None => ChildOutcome::NonZeroExit(-1), // killed by signal
                });
            }
            _ = ticker.tick() => {
                if let Err(err) = broker.keep_alive(message).await {
                    tracing::warn!(error = %err, "keep_alive during child supervision failed");
                }
                if start.elapsed() >= timeout {
                    tracing::warn!(?timeout, "child exceeded wait timeout, terminating");
                    let _ = child.kill().await;
                    return Ok(ChildOutcome::TimedOut);
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!(grace_period = ?SHUTDOWN_GRACE_PERIOD, "shutdown requested, giving child a grace period to exit");
                if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, child.wait()).await.is_err() {
                    tracing::warn!("child did not exit within the shutdown grace period, killing");
                    let _ = child.kill().await;
                }
                return Ok(ChildOutcome::Interrupted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::Shutdown;
    use spawnerd_broker::InMemoryBroker;
    use spawnerd_core::Attributes;
    use std::path::PathBuf;

    fn shell(argv: &[&str]) -> WorkCommand {
        WorkCommand {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            working_directory: PathBuf::from("."),
            is_container: false,
            container_image: None,
        }
    }

    fn never_shuts_down() -> ShutdownHandle {
        Shutdown::new().1
    }

    #[tokio::test]
    async fn successful_exit_reports_success() {
        let broker = InMemoryBroker::new();
        let message = Message::new(Vec::new(), Attributes::new());
        let cmd = shell(&["true"]);
        let outcome = run_and_supervise(
            &cmd,
            &message,
            &broker,
            Duration::from_secs(5),
            Duration::from_millis(20),
            never_shuts_down(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ChildOutcome::Success);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let broker = InMemoryBroker::new();
        let message = Message::new(Vec::new(), Attributes::new());
        let cmd = shell(&["false"]);
        let outcome = run_and_supervise(
            &cmd,
            &message,
            &broker,
            Duration::from_secs(5),
            Duration::from_millis(20),
            never_shuts_down(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ChildOutcome::NonZeroExit(1));
    }

    #[tokio::test]
    async fn long_running_child_is_killed_on_timeout() {
        let broker = InMemoryBroker::new();
        let message = Message::new(Vec::new(), Attributes::new());
        let cmd = shell(&["sleep", "5"]);
        let start = Instant::now();
        let outcome = run_and_supervise(
            &cmd,
            &message,
            &broker,
            Duration::from_millis(60),
            Duration::from_millis(20),
            never_shuts_down(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ChildOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn shutdown_during_supervision_is_reported_as_interrupted() {
        let broker = InMemoryBroker::new();
        let message = Message::new(Vec::new(), Attributes::new());
        let cmd = shell(&["sleep", "5"]);
        let (shutdown, handle) = Shutdown::new();
        shutdown.request();
        let outcome = run_and_supervise(
            &cmd,
            &message,
            &broker,
            Duration::from_secs(60),
            Duration::from_millis(20),
            handle,
        )
        .await
        .unwrap();
        assert_eq!(outcome, ChildOutcome::Interrupted);
    }

    #[tokio::test]
    async fn shutdown_after_child_exits_still_reports_interrupted() {
        let broker = InMemoryBroker::new();
        let message = Message::new(Vec::new(), Attributes::new());
        let cmd = shell(&["true"]);
        let (shutdown, handle) = Shutdown::new();
        shutdown.request();
        // The child outcome is irrelevant once shutdown has fired: this
        // path must never feed post_process or ack.
        let outcome = run_and_supervise(
            &cmd,
            &message,
            &broker,
            Duration::from_secs(60),
            Duration::from_millis(20),
            handle,
        )
        .await
        .unwrap();
        assert_eq!(outcome, ChildOutcome::Interrupted);
    }

    #[test]
    fn container_dispatch_requires_an_image() {
        let cmd = WorkCommand {
            argv: Vec::new(),
            working_directory: PathBuf::from("."),
            is_container: true,
            container_image: None,
        };
        assert!(build_command(&cmd).is_err());
    }

    #[test]
    fn shell_dispatch_requires_nonempty_argv() {
        let cmd = WorkCommand {
            argv: Vec::new(),
            working_directory: PathBuf::from("."),
            is_container: false,
            container_image: None,
        };
        assert!(build_command(&cmd).is_err());
    }
}
