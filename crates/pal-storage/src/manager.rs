//! Per-agent buffered decision log.
//!
//! `StorageManager` buffers `DecisionLogEntry` values and uploads them as
//! one batch once the buffer reaches the flush threshold, and once more when
//! the agent stops.
//!
//! Flushing takes the buffer contents and clears the buffer under the same
//! lock, before the upload starts. A concurrent `log` therefore never sees a
//! half-flushed buffer, and no entry is uploaded twice. If the upload fails
//! the batch is dropped or put back, depending on `FlushFailurePolicy`.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use pal_contracts::{
    agent::{AgentId, StopReason},
    config::FlushFailurePolicy,
    decision::DecisionLogEntry,
    error::PalResult,
};
use pal_core::{
    spawn_detached,
    traits::{DecisionRecorder, LogUploader},
};

// ── Internal mutable state ───────────────────────────────────────────────────

#[derive(Default)]
struct ManagerState {
    buffer: Vec<DecisionLogEntry>,
    total_logs_buffered: u64,
    total_flushes: u64,
    total_logs_stored: u64,
}

struct ManagerInner {
    agent_id: AgentId,
    flush_threshold: usize,
    failure_policy: FlushFailurePolicy,
    uploader: Arc<dyn LogUploader>,
    state: Mutex<ManagerState>,
}

/// Buffer and session statistics for one agent's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStatus {
    pub buffer_size: usize,
    pub flush_threshold: usize,
    pub total_logs_buffered: u64,
    pub total_flushes: u64,
    pub total_logs_stored: u64,
}

// ── Public manager ───────────────────────────────────────────────────────────

/// Buffered decision log for one agent.
///
/// Cheap to clone; clones share the buffer.
#[derive(Clone)]
pub struct StorageManager {
    inner: Arc<ManagerInner>,
}

impl StorageManager {
    /// Create a manager that flushes every `flush_threshold` entries.
    ///
    /// A threshold of 0 is treated as 1.
    pub fn new(agent_id: AgentId, flush_threshold: usize, uploader: Arc<dyn LogUploader>) -> Self {
        let flush_threshold = flush_threshold.max(1);
        info!(agent_id = %agent_id, flush_threshold, "storage manager initialized");
        Self {
            inner: Arc::new(ManagerInner {
                agent_id,
                flush_threshold,
                failure_policy: FlushFailurePolicy::default(),
                uploader,
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    /// Choose what happens to a batch whose upload fails.
    ///
    /// Must be called before the manager is cloned or shared.
    pub fn with_failure_policy(mut self, policy: FlushFailurePolicy) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.failure_policy = policy,
            None => warn!(
                agent_id = %self.inner.agent_id,
                "storage manager already shared, failure policy unchanged"
            ),
        }
        self
    }

    pub fn agent_id(&self) -> AgentId {
        self.inner.agent_id
    }

    /// Append `entry` to the buffer.
    ///
    /// When the buffer reaches the threshold its contents are taken
    /// immediately and uploaded on a detached task; upload errors are logged
    /// and never reach the caller.
    pub fn log(&self, entry: DecisionLogEntry) {
        let step = entry.step;
        let batch = {
            let mut state = self.inner.state.lock();
            state.buffer.push(entry);
            state.total_logs_buffered += 1;
            debug!(
                agent_id = %self.inner.agent_id,
                step,
                buffer_size = state.buffer.len(),
                flush_threshold = self.inner.flush_threshold,
                "logged decision"
            );
            if state.buffer.len() >= self.inner.flush_threshold {
                Some(std::mem::take(&mut state.buffer))
            } else {
                None
            }
        };

        if let Some(batch) = batch {
            info!(
                agent_id = %self.inner.agent_id,
                entries = batch.len(),
                "buffer full, triggering flush"
            );
            let inner = Arc::clone(&self.inner);
            spawn_detached("decision-log-flush", async move {
                inner.upload(batch).await.map(|_| ())
            });
        }
    }

    /// Upload everything currently buffered.
    ///
    /// Returns `Ok(None)` if the buffer was empty or no storage backend is
    /// configured, and the content hash otherwise. The buffer is empty when
    /// this returns, unless the upload failed under the requeue policy.
    pub async fn flush(&self) -> PalResult<Option<String>> {
        let batch = std::mem::take(&mut self.inner.state.lock().buffer);
        if batch.is_empty() {
            debug!(agent_id = %self.inner.agent_id, "flush called with empty buffer");
            return Ok(None);
        }
        self.inner.upload(batch).await
    }

    /// Final flush before the agent is considered stopped.
    pub async fn on_stop(&self, reason: StopReason) {
        let status = self.status();
        info!(
            agent_id = %self.inner.agent_id,
            reason = %reason,
            buffered = status.buffer_size,
            total_logs_buffered = status.total_logs_buffered,
            "agent stopping, flushing decision log"
        );

        if status.buffer_size > 0 {
            match self.flush().await {
                Ok(Some(_)) => info!(agent_id = %self.inner.agent_id, "final flush successful"),
                Ok(None) => {}
                Err(e) => error!(agent_id = %self.inner.agent_id, error = %e, "final flush failed"),
            }
        }

        let status = self.status();
        info!(
            agent_id = %self.inner.agent_id,
            total_flushes = status.total_flushes,
            total_logs_stored = status.total_logs_stored,
            "storage session complete"
        );
    }

    pub fn status(&self) -> StorageStatus {
        let state = self.inner.state.lock();
        StorageStatus {
            buffer_size: state.buffer.len(),
            flush_threshold: self.inner.flush_threshold,
            total_logs_buffered: state.total_logs_buffered,
            total_flushes: state.total_flushes,
            total_logs_stored: state.total_logs_stored,
        }
    }
}

impl ManagerInner {
    async fn upload(&self, batch: Vec<DecisionLogEntry>) -> PalResult<Option<String>> {
        let count = batch.len() as u64;
        let retained = match self.failure_policy {
            FlushFailurePolicy::Requeue => Some(batch.clone()),
            FlushFailurePolicy::Drop => None,
        };
        info!(agent_id = %self.agent_id, entries = count, "flushing decision log");

        let started = Instant::now();
        match self.uploader.upload_logs(self.agent_id, batch).await {
            Ok(Some(content_hash)) => {
                let (total_flushes, total_logs_stored) = {
                    let mut state = self.state.lock();
                    state.total_flushes += 1;
                    state.total_logs_stored += count;
                    (state.total_flushes, state.total_logs_stored)
                };
                info!(
                    agent_id = %self.agent_id,
                    content_hash = %content_hash,
                    duration_ms = started.elapsed().as_millis() as u64,
                    total_flushes,
                    total_logs_stored,
                    "flush successful"
                );
                Ok(Some(content_hash))
            }
            Ok(None) => {
                warn!(
                    agent_id = %self.agent_id,
                    entries = count,
                    "flush returned no content hash, storage may not be configured"
                );
                Ok(None)
            }
            Err(e) => {
                match retained {
                    Some(batch) => {
                        // Concurrent flushes may fail out of order; keep the
                        // buffer in step order regardless.
                        let mut state = self.state.lock();
                        state.buffer.extend(batch);
                        state.buffer.sort_by_key(|e| e.step);
                        warn!(
                            agent_id = %self.agent_id,
                            error = %e,
                            buffer_size = state.buffer.len(),
                            "flush failed, batch requeued"
                        );
                    }
                    None => error!(
                        agent_id = %self.agent_id,
                        error = %e,
                        lost_entries = count,
                        "flush failed, batch dropped"
                    ),
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl DecisionRecorder for StorageManager {
    fn record(&self, entry: DecisionLogEntry) {
        self.log(entry);
    }

    async fn on_stop(&self, reason: StopReason) {
        StorageManager::on_stop(self, reason).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
