#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Leaf types shared by the broker, engine and CLI crates: the `Message` and
//! `WorkCommand` data model, the `WorkModule` external contract, the
//! priority-tier routing table, and process-wide configuration.
//!
//! Kept dependency-free of the broker and engine crates on purpose, so that
//! `spawnerd-broker` and `spawnerd-engine` can both depend on it without a
//! cycle.

pub mod config;
pub mod message;
pub mod topic;
pub mod work_module;

pub use config::AppConfig;
pub use message::{Attributes, LeaseToken, Message, MessageState};
pub use topic::{PriorityTier, TopicTable, TopicTableError};
pub use work_module::{attribute_priority, WorkCommand, WorkModule};
