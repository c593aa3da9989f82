//! # pal-storage
//!
//! Durable decision logging for pal agents.
//!
//! - `StorageManager` buffers one agent's decision-log entries and flushes
//!   them through a `LogUploader` at a threshold and on stop.
//! - `InMemoryContentStorage` is a SHA-256 content-addressed `ContentStorage`
//!   used by the simulator and in tests.

pub mod content;
pub mod manager;

pub use content::{content_hash, InMemoryContentStorage};
pub use manager::{StorageManager, StorageStatus};
