//! The agent decision loop.
//!
//! One `AgentLoop` drives one game entity:
//!
//!   history → observe → generate → execute tools → persist → record
//!
//! repeated every `STEP_PACING` while the agent is running. Steps for one
//! agent never overlap. A failing step is logged and skipped; it never stops
//! the loop.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::FutureExt;
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use pal_contracts::{
    agent::{AgentId, AgentStatus, StopReason},
    config::STEP_PACING,
    decision::DecisionLogEntry,
    error::{PalError, PalResult},
    message::{ConversationMessage, GeneratedMessage},
};

use crate::{
    invoker::ModelInvoker,
    traits::{DecisionRecorder, IdentityRelease, MessageStore, ToolExecutor, WorldStateProvider},
};

/// What makes an agent a particular kind of agent: its prompt, what it sees,
/// and what it can do.
#[derive(Clone)]
pub struct AgentProfile {
    pub system_prompt: String,
    pub world: Arc<dyn WorldStateProvider>,
    /// Tools the model may call. `None` runs the agent without tools; any
    /// tool calls the model emits are then persisted but not executed.
    pub tools: Option<Arc<dyn ToolExecutor>>,
}

/// A single agent's decision loop.
pub struct AgentLoop {
    id: AgentId,
    profile: AgentProfile,
    invoker: Arc<ModelInvoker>,
    store: Arc<dyn MessageStore>,
    recorder: Option<Arc<dyn DecisionRecorder>>,
    identity: Option<Arc<dyn IdentityRelease>>,
    pacing: Duration,
    history_limit: Option<usize>,
    status: watch::Sender<AgentStatus>,
    steps: AtomicU64,
}

impl AgentLoop {
    pub fn new(
        id: AgentId,
        profile: AgentProfile,
        invoker: Arc<ModelInvoker>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let (status, _) = watch::channel(AgentStatus::Stopped);
        Self {
            id,
            profile,
            invoker,
            store,
            recorder: None,
            identity: None,
            pacing: STEP_PACING,
            history_limit: None,
            status,
            steps: AtomicU64::new(0),
        }
    }

    /// Attach a decision recorder (normally the agent's storage manager).
    pub fn with_recorder(mut self, recorder: Arc<dyn DecisionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Release the agent's identity registration through `identity` on stop.
    pub fn with_identity_release(mut self, identity: Arc<dyn IdentityRelease>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Read at most `limit` messages of history per step; 0 reads everything.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = (limit > 0).then_some(limit);
        self
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.borrow()
    }

    /// Number of steps started so far.
    pub fn step_count(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Run the loop until `stop` is called.
    ///
    /// Returns immediately if the agent is already running or still
    /// stopping.
    pub async fn start(&self) {
        if self.begin() {
            self.run().await;
        }
    }

    /// Mark the agent running and drive the loop on a background task.
    ///
    /// The status flips to `Running` before this returns, so a `stop` issued
    /// right after is never lost. Returns `None` if the agent was not
    /// stopped.
    pub fn spawn(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.begin() {
            return None;
        }
        let agent = Arc::clone(self);
        Some(tokio::spawn(async move { agent.run().await }))
    }

    /// Stop the agent.
    ///
    /// Moves a running agent to `Stopping`, waits for the in-flight step (if
    /// any) to finish, then performs the final decision-log flush and
    /// releases the identity registration. An agent that is not running is
    /// still flushed and released.
    pub async fn stop(&self, reason: StopReason) {
        let was_running = self.status.send_if_modified(|status| {
            if *status == AgentStatus::Running {
                *status = AgentStatus::Stopping;
                true
            } else {
                false
            }
        });
        info!(agent_id = %self.id, reason = %reason, was_running, "stopping agent");

        self.wait_until_stopped().await;

        if let Some(recorder) = &self.recorder {
            recorder.on_stop(reason).await;
        }
        if let Some(identity) = &self.identity {
            identity.release(self.id);
        }
        info!(agent_id = %self.id, steps = self.step_count(), "agent stopped");
    }

    fn begin(&self) -> bool {
        let started = self.status.send_if_modified(|status| {
            if *status == AgentStatus::Stopped {
                *status = AgentStatus::Running;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(agent_id = %self.id, status = %self.status(), "start ignored, agent not stopped");
        }
        started
    }

    async fn wait_until_stopped(&self) {
        let mut rx = self.status.subscribe();
        while *rx.borrow_and_update() != AgentStatus::Stopped {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    async fn run(&self) {
        info!(agent_id = %self.id, "agent loop started");
        let mut rx = self.status.subscribe();

        while self.status() == AgentStatus::Running {
            match AssertUnwindSafe(self.step()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(agent_id = %self.id, error = %e, "step failed, skipping"),
                Err(_) => error!(agent_id = %self.id, "step panicked, skipping"),
            }

            tokio::select! {
                _ = sleep(self.pacing) => {}
                _ = rx.changed() => {}
            }
        }

        self.status.send_if_modified(|status| {
            if *status == AgentStatus::Stopping {
                *status = AgentStatus::Stopped;
                true
            } else {
                false
            }
        });
        info!(agent_id = %self.id, "agent loop exited");
    }

    // ── Step ─────────────────────────────────────────────────────────────────

    /// Perform one observe → generate → act → persist cycle.
    ///
    /// Observation and transaction failures propagate and leave the message
    /// store untouched for this step.
    pub async fn step(&self) -> PalResult<()> {
        let step = self.steps.fetch_add(1, Ordering::SeqCst) + 1;

        let history = self.store.get_messages(self.id, self.history_limit).await?;
        debug!(agent_id = %self.id, step, history_len = history.len(), "step starting");

        let snapshot = self.profile.world.observe(self.id).await?;
        let observed: Vec<ConversationMessage> = if snapshot.trim().is_empty() {
            Vec::new()
        } else {
            vec![ConversationMessage::user(snapshot)]
        };

        let tool_specs = self
            .profile
            .tools
            .as_ref()
            .map(|t| t.specs())
            .unwrap_or_default();

        // Only the fresh observation goes to the model; the full history is
        // persisted but not replayed.
        let generated = self
            .invoker
            .generate(self.id, &self.profile.system_prompt, tool_specs, observed.clone())
            .await;

        let generated = match &self.profile.tools {
            Some(tools) => self.execute_tool_calls(tools.as_ref(), generated).await?,
            None => generated,
        };

        let decision = extract_decision(step, &observed, &generated);

        let mut persisted = observed;
        persisted.extend(generated.into_iter().map(ConversationMessage::from));
        self.store.insert_messages(self.id, persisted).await?;

        if let Some(recorder) = &self.recorder {
            recorder.record(decision);
        }
        Ok(())
    }

    /// Execute every tool call that does not already carry a result,
    /// inserting each result right after its call.
    async fn execute_tool_calls(
        &self,
        tools: &dyn ToolExecutor,
        generated: Vec<GeneratedMessage>,
    ) -> PalResult<Vec<GeneratedMessage>> {
        let answered: Vec<String> = generated
            .iter()
            .filter_map(|m| match m {
                GeneratedMessage::ToolResult { call_id, .. } => Some(call_id.clone()),
                _ => None,
            })
            .collect();

        let mut out = Vec::with_capacity(generated.len() * 2);
        for message in generated {
            let pending = match &message {
                GeneratedMessage::ToolCall { call_id, tool_name, args }
                    if !answered.contains(call_id) =>
                {
                    Some((call_id.clone(), tool_name.clone(), args.clone()))
                }
                _ => None,
            };
            out.push(message);

            let Some((call_id, tool_name, args)) = pending else {
                continue;
            };
            let output = match tools.execute(self.id, &tool_name, &args).await {
                Ok(output) => output,
                Err(e @ (PalError::InvalidToolParams { .. } | PalError::UnknownTool { .. })) => {
                    warn!(agent_id = %self.id, tool = %tool_name, error = %e, "rejected tool call");
                    format!("error: {e}")
                }
                Err(e) => return Err(e),
            };
            info!(agent_id = %self.id, tool = %tool_name, output = %output, "tool executed");
            out.push(GeneratedMessage::ToolResult { call_id, tool_name, output });
        }
        Ok(out)
    }
}

/// Reduce one step's messages to a decision-log entry.
///
/// Takes the first observation, the first assistant text as reasoning, the
/// first tool call and the first tool result.
pub fn extract_decision(
    step: u64,
    observed: &[ConversationMessage],
    generated: &[GeneratedMessage],
) -> DecisionLogEntry {
    let observation = observed
        .first()
        .map(ConversationMessage::content_text)
        .unwrap_or_default();

    let mut reasoning = None;
    let mut tool_call = None;
    let mut result = None;
    for message in generated {
        match message {
            GeneratedMessage::AssistantText { text } if reasoning.is_none() => {
                reasoning = Some(text.clone());
            }
            GeneratedMessage::ToolCall { tool_name, args, .. } if tool_call.is_none() => {
                tool_call = Some((tool_name.clone(), args));
            }
            GeneratedMessage::ToolResult { output, .. } if result.is_none() => {
                result = Some(output.clone());
            }
            _ => {}
        }
    }

    let (tool_called, tool_params) = match tool_call {
        Some((name, Value::Object(map))) => (Some(name), Some(map.clone())),
        Some((name, _)) => (Some(name), None),
        None => (None, None),
    };

    DecisionLogEntry::new(
        step,
        observation,
        reasoning.unwrap_or_default(),
        tool_called,
        tool_params,
        result,
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────
