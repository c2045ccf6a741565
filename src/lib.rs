//! Toolsmith - dynamic tool creation and sandboxed execution for LLM agents
//!
//! Tools are generated on demand from a task description, statically
//! validated, persisted to a workspace directory, and executed in an
//! isolated interpreter process or container.

pub mod config;
pub mod core;
pub mod manager;
pub mod tools;
pub mod utils;

pub mod cli;

pub use config::Settings;
pub use manager::{batch, Manager, TaskOutcome};
pub use tools::{
    Acquisition, ExecutionResult, Executor, ExecutorConfig, ToolError, ToolLanguage,
    ToolLifecycle, ToolRegistry, ToolStore,
};
