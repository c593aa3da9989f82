//! Runtime error types for the pal agent runtime.
//!
//! All fallible operations outside the model call return `PalResult<T>`.
//! Model-call failures use `ModelError` instead and never escape the invoker.

use thiserror::Error;

/// The unified error type for the pal agent runtime.
///
/// `Clone` because one in-flight registration outcome is handed to every
/// concurrent caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum PalError {
    /// The world-state provider could not produce an observation.
    #[error("observation failed: {reason}")]
    Observation { reason: String },

    /// A tool's side effect (transaction submission) failed.
    #[error("tool '{tool}' failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// The model supplied arguments that do not satisfy the tool's schema.
    #[error("invalid parameters for tool '{tool}': {reason}")]
    InvalidToolParams { tool: String, reason: String },

    /// The model called a tool that is not in the agent's tool set.
    #[error("unknown tool '{tool}'")]
    UnknownTool { tool: String },

    /// Identity registration failed before anything was created remotely.
    #[error("identity registration failed: {reason}")]
    Registration { reason: String },

    /// The remote identity was created but the follow-up metadata update
    /// failed. `external_id` is orphaned and needs manual reconciliation.
    #[error("identity registration partially failed, external id {external_id} is orphaned: {reason}")]
    RegistrationPartial { external_id: String, reason: String },

    /// Writing metadata to the remote identity record failed.
    #[error("metadata update failed: {reason}")]
    MetadataUpdate { reason: String },

    /// A decision-log batch could not be uploaded.
    #[error("storage upload failed: {reason}")]
    StorageUpload { reason: String },

    /// Stored content could not be fetched or parsed.
    #[error("storage download failed: {reason}")]
    StorageDownload { reason: String },

    /// A signing credential could not be created or loaded.
    #[error("credential unavailable: {reason}")]
    Credential { reason: String },

    /// A required collaborator is not configured.
    #[error("service unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl From<serde_json::Error> for PalError {
    fn from(e: serde_json::Error) -> Self {
        PalError::Serialization { reason: e.to_string() }
    }
}

/// Convenience alias used throughout the pal crates.
pub type PalResult<T> = Result<T, PalError>;
