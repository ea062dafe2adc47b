//! Process-wide, init-only configuration.
//!
//! Built once at startup and shared by reference; daemon instances never
//! mutate it.

use std::path::PathBuf;
use std::time::Duration;

/// Default wait timeout for the Spawner's child-supervision phase.
pub const DEFAULT_WAIT_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub intake_topic_name: String,
    pub dead_letter_topic_name: String,
    pub topic_table_path: PathBuf,
    pub wait_timeout: Duration,
    pub test_mode: bool,
    pub project_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            intake_topic_name: "work-to-prioritize".to_string(),
            dead_letter_topic_name: "failed-work".to_string(),
            topic_table_path: PathBuf::from("PubSubTopics.csv"),
            wait_timeout: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECONDS),
            test_mode: false,
            project_id: String::new(),
        }
    }
}
