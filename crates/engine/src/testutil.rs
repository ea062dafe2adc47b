//! A scripted `WorkModule` test double, reshaped as a builder so each test
//! only states the stage it cares about.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use spawnerd_core::{Message, WorkCommand, WorkModule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    AllSucceed,
    FailPreProcess,
    FailPostProcess,
    RunCommand,
}

pub struct ScriptedWorkModule {
    script: Script,
    argv: Vec<String>,
    pre_process_called: AtomicBool,
    get_command_called: AtomicBool,
    post_process_called: AtomicBool,
}

impl ScriptedWorkModule {
    fn new(script: Script, argv: Vec<String>) -> Self {
        Self {
            script,
            argv,
            pre_process_called: AtomicBool::new(false),
            get_command_called: AtomicBool::new(false),
            post_process_called: AtomicBool::new(false),
        }
    }

    /// pre_process, get_command (`true`), and post_process all succeed.
    pub fn succeeding() -> Self {
        Self::new(Script::AllSucceed, vec!["true".to_string()])
    }

    /// `pre_process` returns `Ok(false)`; nothing downstream is reached.
    pub fn failing_pre_process() -> Self {
        Self::new(Script::FailPreProcess, Vec::new())
    }

    /// `post_process` returns `Ok(false)` after a successful child run.
    pub fn failing_post_process() -> Self {
        Self::new(Script::FailPostProcess, vec!["true".to_string()])
    }

    /// `pre_process`/`post_process` succeed; `get_command` runs `argv`.
    pub fn running_command(argv: Vec<String>) -> Self {
        Self::new(Script::RunCommand, argv)
    }

    pub fn pre_process_called(&self) -> bool {
        self.pre_process_called.load(Ordering::SeqCst)
    }

    pub fn get_command_called(&self) -> bool {
        self.get_command_called.load(Ordering::SeqCst)
    }

    pub fn post_process_called(&self) -> bool {
        self.post_process_called.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkModule for ScriptedWorkModule {
    async fn pre_process(&self, _message: &Message) -> anyhow::Result<bool> {
        self.pre_process_called.store(true, Ordering::SeqCst);
        Ok(!matches!(self.script, Script::FailPreProcess))
    }

    async fn get_command(&self, _message: &Message) -> anyhow::Result<WorkCommand> {
        self.get_command_called.store(true, Ordering::SeqCst);
        Ok(WorkCommand {
            argv: self.argv.clone(),
            working_directory: PathBuf::from("."),
            is_container: false,
            container_image: None,
        })
    }

    async fn post_process(&self, _message: &Message) -> anyhow::Result<bool> {
        self.post_process_called.store(true, Ordering::SeqCst);
        Ok(!matches!(self.script, Script::FailPostProcess))
    }

    async fn prioritize(&self, message: &Message) -> anyhow::Result<f64> {
        Ok(spawnerd_core::attribute_priority(message).unwrap_or(0.0))
    }
}
