//! Language-model request, response and failure types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ConversationMessage, GeneratedMessage};

/// Declaration of a tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Name the model uses in its tool calls (e.g. "move").
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema document describing the tool's parameters.
    pub input_schema: Value,
}

/// Everything a single model call needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system: String,
    pub tools: Vec<ToolSpec>,
    pub messages: Vec<ConversationMessage>,
}

/// A successful model response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Generated messages in the order the model produced them.
    pub messages: Vec<GeneratedMessage>,
    /// Separate reasoning trace, when the provider returns one.
    pub reasoning: Option<String>,
}

/// Coarse classification of a model-call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelErrorKind {
    /// The call was cancelled before it settled.
    Aborted,
    /// The per-attempt timeout elapsed first.
    Timeout,
    /// The provider answered with a non-success HTTP status.
    Http,
    /// The request never produced a response (DNS, TLS, connection reset).
    Network,
    /// The provider answered but the body could not be understood.
    InvalidResponse,
}

/// A failed model call.
///
/// `status` is the HTTP status when one was received. Its absence is what
/// marks a failure as a network error for retry classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ModelError {
    pub fn aborted(message: impl Into<String>) -> Self {
        Self { kind: ModelErrorKind::Aborted, status: None, message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self { kind: ModelErrorKind::Timeout, status: None, message: message.into() }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self { kind: ModelErrorKind::Http, status: Some(status), message: message.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self { kind: ModelErrorKind::Network, status: None, message: message.into() }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::InvalidResponse,
            status: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{:?} (status {}): {}", self.kind, status, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ModelError {}
