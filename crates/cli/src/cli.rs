//! Command-line surface: flags mirrored by `SPAWNERD_*` environment
//! variables, built into the immutable `AppConfig` the daemon loop is
//! handed.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;

use spawnerd_core::config::DEFAULT_WAIT_TIMEOUT_SECONDS;
use spawnerd_core::AppConfig;

fn default_broker_url() -> Url {
    Url::parse("http://127.0.0.1:8085").expect("default broker url must be valid")
}

/// One binary, two daemons. Neither `--spawner` nor `--prioritizer` given is
/// a configuration error — see `main`'s handling.
#[derive(Debug, Clone, Parser)]
#[command(name = "spawnerd", version, about = "Priority work dispatch daemons")]
pub struct Cli {
    /// Run the Spawner daemon.
    #[arg(long)]
    pub spawner: bool,

    /// Run the Prioritizer daemon.
    #[arg(long)]
    pub prioritizer: bool,

    /// Enable verbose logging and use the in-memory broker instead of the
    /// cloud backend.
    #[arg(long)]
    pub test: bool,

    /// Base URL of the cloud broker backend. Ignored under `--test`.
    #[arg(long, env = "SPAWNERD_BROKER_URL", default_value_t = default_broker_url())]
    pub broker_url: Url,

    #[arg(long, env = "SPAWNERD_INTAKE_TOPIC", default_value = "work-to-prioritize")]
    pub intake_topic: String,

    #[arg(long, env = "SPAWNERD_DEAD_LETTER_TOPIC", default_value = "failed-work")]
    pub dead_letter_topic: String,

    #[arg(long, env = "SPAWNERD_TOPIC_TABLE", default_value = "PubSubTopics.csv")]
    pub topic_table: PathBuf,

    #[arg(long, env = "SPAWNERD_WAIT_TIMEOUT_SECONDS", default_value_t = DEFAULT_WAIT_TIMEOUT_SECONDS)]
    pub wait_timeout_seconds: u64,

    #[arg(long, env = "SPAWNERD_PROJECT_ID", default_value = "")]
    pub project_id: String,
}

impl Cli {
    /// Build the immutable `AppConfig` the daemon loop is handed.
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            intake_topic_name: self.intake_topic.clone(),
            dead_letter_topic_name: self.dead_letter_topic.clone(),
            topic_table_path: self.topic_table.clone(),
            wait_timeout: Duration::from_secs(self.wait_timeout_seconds),
            test_mode: self.test,
            project_id: self.project_id.clone(),
        }
    }
}
