//! Collaborator trait definitions for the pal agent runtime.
//!
//! The agent loop only ever talks to the outside world through these
//! seams:
//!
//! - `LanguageModel`: one model call, no retries
//! - `WorldStateProvider`: read-only observation of the game world
//! - `ToolExecutor`: state-changing actions the model may request
//! - `MessageStore`: per-agent conversation history
//! - `DecisionRecorder`: buffered decision log (flushed elsewhere)
//! - `IdentityRelease`: drops an agent's active identity on stop
//!
//! and, one level further out, the identity and storage backends that the
//! registry and storage manager consume.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use pal_contracts::{
    agent::{AgentId, StopReason},
    decision::DecisionLogEntry,
    error::PalResult,
    identity::{IdentityMetadata, ReputationStats, SessionConfig},
    message::ConversationMessage,
    model::{GenerationRequest, GenerationResponse, ModelError, ToolSpec},
};

/// A language model that turns a request into generated messages.
///
/// Implementations perform exactly one attempt. Timeouts, retries and
/// fallback are the `ModelInvoker`'s job.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ModelError>;
}

/// Source of world-state snapshots for an agent.
///
/// Must not have side effects. An empty snapshot means "nothing new" and
/// produces no observation message.
#[async_trait]
pub trait WorldStateProvider: Send + Sync {
    async fn observe(&self, agent_id: AgentId) -> PalResult<String>;
}

/// A named set of actions the model may invoke.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Declarations handed to the model with every request.
    fn specs(&self) -> Vec<ToolSpec>;

    /// Validate `args` and perform the named action for `agent_id`.
    ///
    /// Returns a short success/failure text for the model. Validation
    /// problems are reported as `InvalidToolParams` / `UnknownTool`; any
    /// other error means the side effect itself failed.
    async fn execute(&self, agent_id: AgentId, tool_name: &str, args: &Value) -> PalResult<String>;
}

/// Append-only per-agent conversation history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Return the agent's history in insertion order.
    ///
    /// With `limit = Some(n)` (n > 0) only the newest `n` messages are
    /// returned. `None` or `Some(0)` returns everything.
    async fn get_messages(
        &self,
        agent_id: AgentId,
        limit: Option<usize>,
    ) -> PalResult<Vec<ConversationMessage>>;

    async fn insert_message(&self, agent_id: AgentId, message: ConversationMessage) -> PalResult<()>;

    /// Append `messages` preserving their order.
    async fn insert_messages(
        &self,
        agent_id: AgentId,
        messages: Vec<ConversationMessage>,
    ) -> PalResult<()>;
}

/// Sink for per-step decision records.
#[async_trait]
pub trait DecisionRecorder: Send + Sync {
    /// Buffer one entry. Never blocks on I/O and never fails.
    fn record(&self, entry: DecisionLogEntry);

    /// Flush whatever is still buffered. Awaited by `AgentLoop::stop`.
    async fn on_stop(&self, reason: StopReason);
}

/// Releases an agent's active identity registration.
pub trait IdentityRelease: Send + Sync {
    fn release(&self, agent_id: AgentId);
}

/// Uploads decision-log batches on behalf of an agent.
#[async_trait]
pub trait LogUploader: Send + Sync {
    /// Upload `entries` as one batch.
    ///
    /// Returns `Ok(Some(content_hash))` on success and `Ok(None)` when no
    /// storage backend is configured.
    async fn upload_logs(
        &self,
        agent_id: AgentId,
        entries: Vec<DecisionLogEntry>,
    ) -> PalResult<Option<String>>;
}

/// A remote identity/reputation service session scoped to one agent.
#[async_trait]
pub trait RemoteIdentityService: Send + Sync {
    /// Create the external identity; returns the assigned external id.
    async fn register_identity(&self) -> PalResult<String>;

    async fn update_metadata(&self, external_id: &str, metadata: &IdentityMetadata) -> PalResult<()>;

    async fn get_stats(&self, external_id: &str) -> PalResult<ReputationStats>;
}

/// Opens `RemoteIdentityService` sessions.
#[async_trait]
pub trait IdentityServiceFactory: Send + Sync {
    async fn connect(&self, session: &SessionConfig) -> PalResult<Arc<dyn RemoteIdentityService>>;
}

/// Durable content-addressed storage.
#[async_trait]
pub trait ContentStorage: Send + Sync {
    /// Store a JSON payload; returns its content hash.
    async fn upload(&self, payload: &Value) -> PalResult<String>;

    /// Fetch and parse the payload stored under `content_hash`.
    async fn download(&self, content_hash: &str) -> PalResult<Value>;
}
