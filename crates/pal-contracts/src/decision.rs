//! Decision-log records and the batches they are uploaded in.
//!
//! The JSON field names here are a persisted format: previously uploaded
//! batches are read back by external tooling, so renames are breaking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::AgentId;

/// Placeholder external id used when a batch is uploaded before the agent's
/// identity registration has completed.
pub const UNREGISTERED_EXTERNAL_ID: &str = "unregistered";

/// One completed agent step, as recorded in the decision log.
///
/// Created once per step and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionLogEntry {
    /// Step counter value of the step that produced this entry.
    pub step: u64,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    /// What the agent observed.
    pub observation: String,
    /// The model's first assistant text for the step.
    pub reasoning: String,
    /// Name of the first tool the model called, if any.
    pub tool_called: Option<String>,
    /// Arguments of that tool call.
    pub tool_params: Option<Map<String, Value>>,
    /// First tool result text, if any.
    pub result: Option<String>,
}

impl DecisionLogEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        step: u64,
        observation: impl Into<String>,
        reasoning: impl Into<String>,
        tool_called: Option<String>,
        tool_params: Option<Map<String, Value>>,
        result: Option<String>,
    ) -> Self {
        Self {
            step,
            timestamp: Utc::now().timestamp_millis(),
            observation: observation.into(),
            reasoning: reasoning.into(),
            tool_called,
            tool_params,
            result,
        }
    }
}

/// Discriminant written into every uploaded batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchType {
    #[serde(rename = "agent_logs")]
    AgentLogs,
}

/// A group of decision-log entries uploaded as one content-addressed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    #[serde(rename = "type")]
    pub batch_type: BatchType,
    /// Local agent (game token) id.
    pub agent_id: AgentId,
    /// External identity id, or `"unregistered"`.
    pub chaos_agent_id: String,
    pub start_step: u64,
    pub end_step: u64,
    /// Unix timestamp in milliseconds.
    pub created_at: i64,
    pub entries: Vec<DecisionLogEntry>,
}

impl LogBatch {
    /// Build a batch from a buffer snapshot.
    ///
    /// The step range covers the minimum and maximum step present in
    /// `entries`. An empty snapshot yields a `0..=0` range.
    pub fn new(agent_id: AgentId, external_id: impl Into<String>, entries: Vec<DecisionLogEntry>) -> Self {
        let start_step = entries.iter().map(|e| e.step).min().unwrap_or(0);
        let end_step = entries.iter().map(|e| e.step).max().unwrap_or(0);
        Self {
            batch_type: BatchType::AgentLogs,
            agent_id,
            chaos_agent_id: external_id.into(),
            start_step,
            end_step,
            created_at: Utc::now().timestamp_millis(),
            entries,
        }
    }
}

/// Inclusive range of steps covered by a stored batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRange {
    pub start: u64,
    pub end: u64,
}

/// Audit-trail pointer to one uploaded batch.
///
/// Append-only per agent; references survive identity unregistration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageReference {
    /// Content hash returned by the storage backend.
    pub content_hash: String,
    /// Kind of data stored (always `agent_logs` today).
    pub data_type: BatchType,
    pub stored_at: DateTime<Utc>,
    pub step_range: StepRange,
}
