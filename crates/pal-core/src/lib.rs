//! # pal-core
//!
//! The agent decision loop for the pal agent runtime.
//!
//! This crate provides:
//! - The collaborator traits (`LanguageModel`, `WorldStateProvider`,
//!   `ToolExecutor`, `MessageStore`, `DecisionRecorder`, ...)
//! - The `ModelInvoker` that wraps a model call in timeout, retry and fallback
//! - The `AgentLoop` that drives one agent through observe → generate → act
//!   → persist
//! - An optional per-agent JSON-lines generation log
//! - An in-memory `MessageStore` and a detached-task helper
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pal_core::{AgentLoop, AgentProfile, ModelInvoker, InMemoryMessageStore};
//! ```

pub mod agent_loop;
pub mod generation_log;
pub mod invoker;
pub mod store;
pub mod task;
pub mod traits;

pub use agent_loop::{AgentLoop, AgentProfile};
pub use generation_log::{GenerationLog, GenerationRecord};
pub use invoker::{ModelInvoker, RetryPolicy, SKIP_TURN_MESSAGE};
pub use store::InMemoryMessageStore;
pub use task::spawn_detached;
