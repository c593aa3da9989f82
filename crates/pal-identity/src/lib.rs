//! # pal-identity
//!
//! External identity registration for pal agents.
//!
//! `IdentityRegistry` guarantees at most one in-flight registration per
//! agent, keeps the per-agent storage-reference trail, and is the upload path
//! for decision-log batches (it implements `pal_core::traits::LogUploader`).

pub mod registry;

pub use registry::{IdentityRegistry, RegistryStatus};
