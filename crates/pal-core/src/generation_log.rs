//! Durable per-agent generation log.
//!
//! Every model call appends JSON lines to `<dir>/agent_<id>.jsonl`: one
//! `attempt_failed` line per failed attempt and one `generation` line per
//! successful call. Write failures are logged and swallowed; the log never
//! affects the step.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tracing::warn;

use pal_contracts::{agent::AgentId, message::GeneratedMessage};

/// One line of an agent's generation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GenerationRecord {
    #[serde(rename_all = "camelCase")]
    Generation {
        timestamp: DateTime<Utc>,
        agent_id: AgentId,
        duration_ms: u64,
        attempts: u32,
        reasoning: Option<String>,
        tool_calls: usize,
        observation_chars: usize,
        input_chars: usize,
        messages: Vec<GeneratedMessage>,
    },
    #[serde(rename_all = "camelCase")]
    AttemptFailed {
        timestamp: DateTime<Utc>,
        agent_id: AgentId,
        attempt: u32,
        status: Option<u16>,
        error: String,
        will_retry: bool,
    },
}

/// Appends generation records under a directory, one file per agent.
#[derive(Debug, Clone)]
pub struct GenerationLog {
    dir: PathBuf,
}

impl GenerationLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, agent_id: AgentId) -> PathBuf {
        self.dir.join(format!("agent_{}.jsonl", agent_id.0))
    }

    /// Append `record` to the agent's file, creating the directory if needed.
    pub async fn append(&self, agent_id: AgentId, record: &GenerationRecord) {
        if let Err(e) = self.try_append(agent_id, record).await {
            warn!(
                agent_id = %agent_id,
                path = %self.path_for(agent_id).display(),
                error = %e,
                "failed to write generation log"
            );
        }
    }

    async fn try_append(&self, agent_id: AgentId, record: &GenerationRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(agent_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(attempt: u32) -> GenerationRecord {
        GenerationRecord::AttemptFailed {
            timestamp: Utc::now(),
            agent_id: AgentId(7),
            attempt,
            status: Some(503),
            error: "unavailable".to_string(),
            will_retry: true,
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = GenerationLog::new(dir.path().join("logs"));

        log.append(AgentId(7), &failed(1)).await;
        log.append(AgentId(7), &failed(2)).await;

        let contents = std::fs::read_to_string(log.path_for(AgentId(7))).unwrap();
        let lines: Vec<serde_json::Value> =
            contents.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "attempt_failed");
        assert_eq!(lines[1]["attempt"], 2);
        assert_eq!(lines[1]["willRetry"], true);
        assert!(log.path_for(AgentId(7)).ends_with("agent_7.jsonl"));
    }

    #[tokio::test]
    async fn unwritable_directory_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        // A regular file where the directory should be.
        GenerationLog::new(&blocker).append(AgentId(1), &failed(1)).await;
        assert_eq!(std::fs::read_to_string(&blocker).unwrap(), "x");
    }
}
