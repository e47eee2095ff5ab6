//! Agent registry and task dispatch.
//!
//! The scheduler knows every configured agent (name, queue, executable,
//! system prompt, avatar), tracks a lightweight idle/busy state per agent,
//! and emits [`parley_core::TaskMessage`]s onto the per-agent job streams.
//!
//! # Main types
//!
//! - [`ParleyConfig`] — The YAML configuration file.
//! - [`Scheduler`] — Agent registry + task emission.

/// YAML configuration schema.
pub mod config;
/// The scheduler proper.
pub mod scheduler;

pub use config::{AgentConfig, ParleyConfig, RedisSettings, UserSettings};
pub use scheduler::{AgentState, AgentStatus, Scheduler};
