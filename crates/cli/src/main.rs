mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use spawnerd_broker::{Broker, CloudBroker, InMemoryBroker};
use spawnerd_core::TopicTable;
use spawnerd_engine::{DefaultWorkModule, Prioritizer, Shutdown, ShutdownHandle, Spawner};

use crate::cli::Cli;

fn init_logging(test_mode: bool) {
    let default_directive = if test_mode { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_broker(cli: &Cli) -> Arc<dyn Broker> {
    if cli.test {
        Arc::new(InMemoryBroker::new())
    } else {
        Arc::new(CloudBroker::new(cli.broker_url.clone(), cli.project_id.clone()))
    }
}

/// Waits for whichever arrives first: Ctrl-C or, on Unix, SIGTERM. Returns
/// once either fires so the caller can request shutdown; in-flight work is
/// never acked on shutdown, redelivery relies on lease expiry instead.
#[cfg(unix)]
async fn wait_for_termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler, falling back to SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Requests shutdown on the first SIGINT or SIGTERM and returns a handle the
/// daemon loops race against.
fn spawn_signal_handler() -> ShutdownHandle {
    let (shutdown, handle) = Shutdown::new();
    tokio::spawn(async move {
        wait_for_termination_signal().await;
        tracing::info!("received termination signal, requesting shutdown");
        shutdown.request();
    });
    handle
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.test);

    if !cli.spawner && !cli.prioritizer {
        anyhow::bail!("must specify --spawner or --prioritizer");
    }

    let config = Arc::new(cli.to_app_config());
    let topics = Arc::new(
        TopicTable::load(
            &config.topic_table_path,
            config.intake_topic_name.clone(),
            config.dead_letter_topic_name.clone(),
        )
        .map_err(|err| anyhow::anyhow!("failed to load topic table: {err}"))?,
    );
    let broker = build_broker(&cli);
    let work_module = Arc::new(DefaultWorkModule::new(broker.clone(), config.intake_topic_name.clone()));
    let shutdown = spawn_signal_handler();

    let spawner_task = cli.spawner.then(|| {
        let spawner = Spawner::new(broker.clone(), topics.clone(), work_module.clone(), config.clone());
        let handle = shutdown.clone();
        tokio::spawn(async move { spawner.run(handle).await })
    });

    let prioritizer_task = cli.prioritizer.then(|| {
        let prioritizer = Prioritizer::new(broker.clone(), topics.clone(), work_module.clone());
        let handle = shutdown.clone();
        tokio::spawn(async move { prioritizer.run(handle).await })
    });

    if let Some(task) = spawner_task {
        task.await??;
    }
    if let Some(task) = prioritizer_task {
        task.await??;
    }

    Ok(())
}
