//! Agent lifecycle supervision.
//!
//! `AgentSupervisor` turns entity lifecycle events into agent starts and
//! stops. It owns every per-agent registry of the process: running loops,
//! credentials and storage managers. One supervisor is constructed per
//! process and passed to whatever needs it; there is no global state.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use pal_contracts::{
    agent::{AgentCredential, AgentId, AgentType, StopReason},
    config::{FlushFailurePolicy, RuntimeConfig, STEP_PACING},
    error::{PalError, PalResult},
    identity::RegistrationConfig,
};
use pal_core::{
    spawn_detached,
    traits::{IdentityRelease, LanguageModel, MessageStore, WorldStateProvider},
    AgentLoop, GenerationLog, ModelInvoker, RetryPolicy,
};
use pal_identity::IdentityRegistry;
use pal_storage::{StorageManager, StorageStatus};
use pal_tools::{game_tools, TransactionLayer};

use crate::{credentials::CredentialProvider, profile::pal_profile};

/// A change to a game entity, as reported by the world-state sync layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityEvent {
    /// The entity entered the world or one of its fields changed.
    Upserted { token_id: u64, health: u64, agent_type: AgentType },
    /// The entity left the world.
    Exited { token_id: u64 },
}

/// What a lifecycle event means for the supervised agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Start(AgentId),
    Stop(AgentId, StopReason),
    Ignore,
}

/// Per-agent settings the supervisor applies to every agent it starts.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Only entities of this type get an agent.
    pub agent_type: AgentType,
    pub game_contract: String,
    pub network: String,
    pub flush_threshold: usize,
    pub flush_failure: FlushFailurePolicy,
    pub history_limit: usize,
    pub pacing: Duration,
    pub retry: RetryPolicy,
    /// Per-agent generation logs are written here when set.
    pub generation_log_dir: Option<PathBuf>,
}

impl SupervisorConfig {
    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            agent_type: AgentType::Pal,
            game_contract: config.identity.game_contract_address.clone(),
            network: config.identity.network.clone(),
            flush_threshold: config.flush_threshold,
            flush_failure: config.flush_failure,
            history_limit: config.history_limit,
            pacing: STEP_PACING,
            retry: RetryPolicy::default(),
            generation_log_dir: config.generation_log_dir.clone(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_runtime(&RuntimeConfig::default())
    }
}

/// The collaborators every supervised agent shares.
#[derive(Clone)]
pub struct Collaborators {
    pub model: Arc<dyn LanguageModel>,
    pub world: Arc<dyn WorldStateProvider>,
    pub transactions: Arc<dyn TransactionLayer>,
    pub store: Arc<dyn MessageStore>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub registry: IdentityRegistry,
}

struct RunningAgent {
    agent: Arc<AgentLoop>,
    handle: JoinHandle<()>,
}

impl RunningAgent {
    /// Stop the loop, wait for its final flush, then join its task.
    async fn shutdown(self, reason: StopReason) {
        let agent_id = self.agent.id();
        self.agent.stop(reason).await;
        if let Err(e) = self.handle.await {
            error!(agent_id = %agent_id, error = %e, "agent task ended abnormally");
        }
    }
}

/// Which agent instance currently owns each id's identity.
///
/// Every start takes a fresh generation. A loop releases the identity on
/// stop only if no newer instance for the same id has started since, so a
/// slow shutdown of a dead agent cannot unregister its revived successor.
#[derive(Clone)]
struct IdentityLeases {
    registry: IdentityRegistry,
    owners: Arc<Mutex<HashMap<AgentId, u64>>>,
}

impl IdentityLeases {
    fn new(registry: IdentityRegistry) -> Self {
        Self { registry, owners: Arc::new(Mutex::new(HashMap::new())) }
    }

    fn acquire(&self, agent_id: AgentId, generation: u64) -> IdentityLease {
        self.owners.lock().insert(agent_id, generation);
        IdentityLease { leases: self.clone(), generation }
    }
}

struct IdentityLease {
    leases: IdentityLeases,
    generation: u64,
}

impl IdentityRelease for IdentityLease {
    fn release(&self, agent_id: AgentId) {
        let owned = {
            let mut owners = self.leases.owners.lock();
            let owned = owners.get(&agent_id) == Some(&self.generation);
            if owned {
                owners.remove(&agent_id);
            }
            owned
        };
        if owned {
            self.leases.registry.unregister(agent_id);
        } else {
            debug!(
                agent_id = %agent_id,
                generation = self.generation,
                "newer agent owns the identity, keeping it"
            );
        }
    }
}

#[derive(Default)]
struct SupervisorState {
    agents: HashMap<AgentId, RunningAgent>,
    /// Kept across stop/start so a returning entity reuses its credential.
    credentials: HashMap<AgentId, AgentCredential>,
    storage: HashMap<AgentId, StorageManager>,
    /// Incremented on every start.
    generation: u64,
}

struct SupervisorInner {
    config: SupervisorConfig,
    collaborators: Collaborators,
    invoker: Arc<ModelInvoker>,
    leases: IdentityLeases,
    state: Mutex<SupervisorState>,
}

/// Maps entity lifecycle events to agent loops.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AgentSupervisor {
    inner: Arc<SupervisorInner>,
}

impl AgentSupervisor {
    pub fn new(config: SupervisorConfig, collaborators: Collaborators) -> Self {
        let mut invoker =
            ModelInvoker::new(collaborators.model.clone()).with_policy(config.retry.clone());
        if let Some(dir) = &config.generation_log_dir {
            invoker = invoker.with_generation_log(GenerationLog::new(dir));
        }
        info!(
            agent_type = %config.agent_type,
            flush_threshold = config.flush_threshold,
            generation_log_dir = ?config.generation_log_dir,
            "agent supervisor initialized"
        );
        let leases = IdentityLeases::new(collaborators.registry.clone());
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                collaborators,
                invoker: Arc::new(invoker),
                leases,
                state: Mutex::new(SupervisorState::default()),
            }),
        }
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.inner.collaborators.registry
    }

    // ── Event handling ───────────────────────────────────────────────────────

    /// Apply one lifecycle event and wait for any resulting stop to finish.
    ///
    /// Live entities of the supervised type get an agent if they have none.
    /// Health zero stops the agent with `Death` and an exit stops it with
    /// `Exit`. A failure to start is returned; it affects only that agent.
    pub async fn handle_event(&self, event: EntityEvent) -> PalResult<()> {
        match self.classify(&event) {
            Action::Start(agent_id) => self.start_agent(agent_id).map(|_| ()),
            Action::Stop(agent_id, reason) => {
                self.stop_agent(agent_id, reason).await;
                Ok(())
            }
            Action::Ignore => Ok(()),
        }
    }

    /// Consume lifecycle events until the channel closes.
    ///
    /// Starts happen inline. Stops are detached so a slow final step never
    /// holds up the events behind it.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<EntityEvent>) {
        info!("listening for entity lifecycle events");
        while let Some(event) = events.recv().await {
            match self.classify(&event) {
                Action::Start(agent_id) => {
                    if let Err(e) = self.start_agent(agent_id) {
                        error!(agent_id = %agent_id, error = %e, "failed to start agent");
                    }
                }
                Action::Stop(agent_id, reason) => {
                    if let Some(running) = self.detach(agent_id) {
                        spawn_detached("agent-stop", async move {
                            running.shutdown(reason).await;
                            Ok(())
                        });
                    }
                }
                Action::Ignore => {}
            }
        }
        info!("lifecycle event stream closed");
    }

    fn classify(&self, event: &EntityEvent) -> Action {
        match *event {
            EntityEvent::Exited { token_id } => Action::Stop(AgentId(token_id), StopReason::Exit),
            EntityEvent::Upserted { agent_type, .. } if agent_type != self.inner.config.agent_type => {
                Action::Ignore
            }
            EntityEvent::Upserted { token_id, health: 0, .. } => {
                Action::Stop(AgentId(token_id), StopReason::Death)
            }
            EntityEvent::Upserted { token_id, .. } => Action::Start(AgentId(token_id)),
        }
    }

    // ── Start / stop ─────────────────────────────────────────────────────────

    /// Start an agent for `agent_id` unless one is already running.
    ///
    /// Returns `Ok(false)` when the agent already existed. Identity
    /// registration is kicked off in the background and never delays the
    /// start; if it fails the agent keeps running without identity features.
    ///
    /// # Errors
    ///
    /// `Credential` if no credential could be obtained, or any error from
    /// building the agent's tools. Nothing is started in that case.
    pub fn start_agent(&self, agent_id: AgentId) -> PalResult<bool> {
        let inner = &self.inner;
        let collab = &inner.collaborators;

        let credential = {
            let mut state = inner.state.lock();
            if state.agents.contains_key(&agent_id) {
                debug!(agent_id = %agent_id, "agent already running");
                return Ok(false);
            }

            let credential = match state.credentials.get(&agent_id) {
                Some(existing) => existing.clone(),
                None => {
                    let created = collab.credentials.credential_for(agent_id)?;
                    info!(agent_id = %agent_id, address = %created.address, "credential created");
                    state.credentials.insert(agent_id, created.clone());
                    created
                }
            };

            let storage = StorageManager::new(
                agent_id,
                inner.config.flush_threshold,
                Arc::new(collab.registry.clone()),
            )
            .with_failure_policy(inner.config.flush_failure);

            let tools = game_tools(credential.clone(), collab.transactions.clone())?;
            let profile = pal_profile(&inner.config.game_contract, collab.world.clone(), Arc::new(tools));

            state.generation += 1;
            let lease = inner.leases.acquire(agent_id, state.generation);
            let agent = Arc::new(
                AgentLoop::new(agent_id, profile, inner.invoker.clone(), collab.store.clone())
                    .with_recorder(Arc::new(storage.clone()))
                    .with_identity_release(Arc::new(lease))
                    .with_pacing(inner.config.pacing)
                    .with_history_limit(inner.config.history_limit),
            );
            let handle = agent.spawn().ok_or_else(|| PalError::ServiceUnavailable {
                reason: format!("agent {agent_id} could not be spawned"),
            })?;

            state.storage.insert(agent_id, storage);
            state.agents.insert(agent_id, RunningAgent { agent, handle });
            credential
        };
        info!(agent_id = %agent_id, "agent started");

        let registry = collab.registry.clone();
        let registration = RegistrationConfig {
            agent_id,
            agent_type: inner.config.agent_type,
            credential,
        };
        spawn_detached("identity-registration", async move {
            match registry.register(registration).await {
                Ok(identity) => info!(
                    agent_id = %agent_id,
                    external_id = %identity.external_id,
                    "identity registered"
                ),
                Err(e) => warn!(
                    agent_id = %agent_id,
                    error = %e,
                    "identity registration failed, agent continues without identity features"
                ),
            }
            Ok(())
        });

        Ok(true)
    }

    /// Stop and forget the agent for `agent_id`.
    ///
    /// Waits for the in-flight step and the final flush. The identity is
    /// released by the loop itself unless a newer agent for the same id has
    /// started meanwhile; the credential is kept. Returns `false`
    /// if no agent was running.
    pub async fn stop_agent(&self, agent_id: AgentId, reason: StopReason) -> bool {
        match self.detach(agent_id) {
            Some(running) => {
                running.shutdown(reason).await;
                true
            }
            None => {
                debug!(agent_id = %agent_id, reason = %reason, "stop ignored, no such agent");
                false
            }
        }
    }

    /// Stop every agent and wait for all of them.
    pub async fn stop_all(&self) {
        let running: Vec<RunningAgent> = {
            let mut state = self.inner.state.lock();
            state.storage.clear();
            state.agents.drain().map(|(_, running)| running).collect()
        };
        info!(agents = running.len(), "stopping all agents");
        join_all(running.into_iter().map(|r| r.shutdown(StopReason::Manual))).await;
    }

    fn detach(&self, agent_id: AgentId) -> Option<RunningAgent> {
        let mut state = self.inner.state.lock();
        state.storage.remove(&agent_id);
        state.agents.remove(&agent_id)
    }

    // ── Lookups ──────────────────────────────────────────────────────────────

    /// Ids of the running agents, ascending.
    pub fn agent_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.inner.state.lock().agents.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, agent_id: AgentId) -> bool {
        self.inner.state.lock().agents.contains_key(&agent_id)
    }

    pub fn credential(&self, agent_id: AgentId) -> Option<AgentCredential> {
        self.inner.state.lock().credentials.get(&agent_id).cloned()
    }

    pub fn storage_status(&self, agent_id: AgentId) -> Option<StorageStatus> {
        self.inner.state.lock().storage.get(&agent_id).map(StorageManager::status)
    }

    pub fn step_count(&self, agent_id: AgentId) -> Option<u64> {
        self.inner.state.lock().agents.get(&agent_id).map(|r| r.agent.step_count())
    }
}
