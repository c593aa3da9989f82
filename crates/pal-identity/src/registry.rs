//! The identity registry.
//!
//! `IdentityRegistry` links local agents to external identity records and
//! owns everything scoped to those identities: the per-agent remote
//! sessions, the storage-reference audit trail, and the upload path that
//! decision-log batches take to content storage.
//!
//! Registration is single-flight per agent. Concurrent `register` calls for
//! the same agent share one in-flight future, so the remote service sees
//! exactly one registration no matter how many callers race.

use std::{collections::HashMap, sync::Arc, time::Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use pal_contracts::{
    agent::AgentId,
    config::IdentityConfig,
    decision::{
        BatchType, DecisionLogEntry, LogBatch, StepRange, StorageReference,
        UNREGISTERED_EXTERNAL_ID,
    },
    error::{PalError, PalResult},
    identity::{
        ExternalIdentity, IdentityMetadata, RegistrationConfig, ReputationStats, SessionConfig,
    },
};
use pal_core::traits::{
    ContentStorage, IdentityRelease, IdentityServiceFactory, LogUploader, RemoteIdentityService,
};

type PendingRegistration = Shared<BoxFuture<'static, PalResult<ExternalIdentity>>>;

// ── Internal state ───────────────────────────────────────────────────────────

struct Pending {
    token: u64,
    future: PendingRegistration,
}

#[derive(Default)]
struct RegistryState {
    identities: HashMap<AgentId, ExternalIdentity>,
    sessions: HashMap<AgentId, Arc<dyn RemoteIdentityService>>,
    /// Survives `unregister`.
    storage_refs: HashMap<AgentId, Vec<StorageReference>>,
    pending: HashMap<AgentId, Pending>,
    next_token: u64,
}

struct RegistryInner {
    factory: Arc<dyn IdentityServiceFactory>,
    storage: Option<Arc<dyn ContentStorage>>,
    config: IdentityConfig,
    state: Mutex<RegistryState>,
}

/// Snapshot of the registry for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub storage_configured: bool,
    pub game_contract: String,
    pub registered_agents: usize,
    /// Sorted ascending.
    pub agent_ids: Vec<AgentId>,
}

// ── Public registry ──────────────────────────────────────────────────────────

/// Per-process registry of external identities.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct IdentityRegistry {
    inner: Arc<RegistryInner>,
}

impl IdentityRegistry {
    /// Create a registry that opens sessions through `factory`.
    ///
    /// Without `storage`, log uploads and downloads are skipped.
    pub fn new(
        factory: Arc<dyn IdentityServiceFactory>,
        storage: Option<Arc<dyn ContentStorage>>,
        config: IdentityConfig,
    ) -> Self {
        info!(
            game_contract = %config.game_contract_address,
            network = %config.network,
            storage_configured = storage.is_some(),
            "identity registry initialized"
        );
        Self {
            inner: Arc::new(RegistryInner {
                factory,
                storage,
                config,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Register `config.agent_id` with the remote identity service.
    ///
    /// Returns the existing identity if the agent is already registered, and
    /// joins the in-flight registration if one is running. Otherwise starts a
    /// new registration. The pending entry is removed when it settles,
    /// whether it succeeded or not.
    ///
    /// # Errors
    ///
    /// `Registration` if the session or remote registration failed, and
    /// `RegistrationPartial` if the identity was created but its metadata
    /// could not be written. In the latter case the external id is orphaned
    /// and the agent is left unregistered locally.
    pub async fn register(&self, config: RegistrationConfig) -> PalResult<ExternalIdentity> {
        let agent_id = config.agent_id;

        let future = {
            let mut state = self.inner.state.lock();

            if let Some(existing) = state.identities.get(&agent_id) {
                info!(
                    agent_id = %agent_id,
                    external_id = %existing.external_id,
                    "already registered, skipping registration"
                );
                return Ok(existing.clone());
            }

            if let Some(pending) = state.pending.get(&agent_id) {
                info!(agent_id = %agent_id, "registration already in progress, joining it");
                pending.future.clone()
            } else {
                state.next_token += 1;
                let token = state.next_token;
                let inner = Arc::clone(&self.inner);
                let future = inner.complete_registration(config, token).boxed().shared();
                state.pending.insert(agent_id, Pending { token, future: future.clone() });
                future
            }
        };

        future.await
    }

    /// Drop the agent's active identity and cached session.
    ///
    /// Storage references are kept. An in-flight registration is detached:
    /// it still completes remotely but no longer lands in the active
    /// registry.
    pub fn unregister(&self, agent_id: AgentId) {
        let mut state = self.inner.state.lock();
        let removed = state.identities.remove(&agent_id);
        state.sessions.remove(&agent_id);
        let was_pending = state.pending.remove(&agent_id).is_some();
        info!(
            agent_id = %agent_id,
            external_id = removed.as_ref().map(|i| i.external_id.as_str()).unwrap_or("-"),
            was_pending,
            remaining = state.identities.len(),
            "identity unregistered"
        );
    }

    /// The agent's active identity, if registered.
    pub fn get_identity(&self, agent_id: AgentId) -> Option<ExternalIdentity> {
        self.inner.state.lock().identities.get(&agent_id).cloned()
    }

    /// Every batch uploaded for the agent, oldest first.
    pub fn storage_references(&self, agent_id: AgentId) -> Vec<StorageReference> {
        self.inner
            .state
            .lock()
            .storage_refs
            .get(&agent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Fetch a stored payload by content hash.
    ///
    /// Returns `Ok(None)` when no content storage is configured.
    pub async fn download(&self, agent_id: AgentId, content_hash: &str) -> PalResult<Option<Value>> {
        let Some(storage) = &self.inner.storage else {
            warn!(agent_id = %agent_id, "content storage not configured, cannot download");
            return Ok(None);
        };
        let started = Instant::now();
        let payload = storage.download(content_hash).await?;
        info!(
            agent_id = %agent_id,
            content_hash,
            duration_ms = started.elapsed().as_millis() as u64,
            "download complete"
        );
        Ok(Some(payload))
    }

    /// Reputation stats for the agent's external identity.
    ///
    /// `None` when the agent has no identity or session, or the query fails.
    pub async fn reputation(&self, agent_id: AgentId) -> Option<ReputationStats> {
        let (session, identity) = {
            let state = self.inner.state.lock();
            (
                state.sessions.get(&agent_id).cloned(),
                state.identities.get(&agent_id).cloned(),
            )
        };
        let Some(session) = session else {
            warn!(agent_id = %agent_id, "no identity session, cannot fetch reputation");
            return None;
        };
        let Some(identity) = identity else {
            warn!(agent_id = %agent_id, "no identity, cannot fetch reputation");
            return None;
        };

        match session.get_stats(&identity.external_id).await {
            Ok(stats) => {
                info!(
                    agent_id = %agent_id,
                    total_feedback = stats.total_feedback,
                    average_rating = stats.average_rating,
                    "reputation fetched"
                );
                Some(stats)
            }
            Err(e) => {
                error!(agent_id = %agent_id, error = %e, "failed to fetch reputation");
                None
            }
        }
    }

    pub fn status(&self) -> RegistryStatus {
        let state = self.inner.state.lock();
        let mut agent_ids: Vec<AgentId> = state.identities.keys().copied().collect();
        agent_ids.sort();
        RegistryStatus {
            storage_configured: self.inner.storage.is_some(),
            game_contract: self.inner.config.game_contract_address.clone(),
            registered_agents: agent_ids.len(),
            agent_ids,
        }
    }
}

// ── Registration ─────────────────────────────────────────────────────────────

impl RegistryInner {
    /// Run one registration and settle its pending entry.
    async fn complete_registration(
        self: Arc<Self>,
        config: RegistrationConfig,
        token: u64,
    ) -> PalResult<ExternalIdentity> {
        let agent_id = config.agent_id;
        let outcome = self.perform_registration(config).await;

        let mut state = self.state.lock();
        let still_wanted = state.pending.get(&agent_id).is_some_and(|p| p.token == token);
        if still_wanted {
            state.pending.remove(&agent_id);
        }

        let (identity, session) = outcome?;
        if !still_wanted {
            warn!(
                agent_id = %agent_id,
                external_id = %identity.external_id,
                "agent unregistered during registration, identity not activated"
            );
            return Ok(identity);
        }

        state.identities.insert(agent_id, identity.clone());
        state.sessions.insert(agent_id, session);
        state.storage_refs.entry(agent_id).or_default();
        info!(
            agent_id = %agent_id,
            external_id = %identity.external_id,
            total_registrations = state.identities.len(),
            "registration complete"
        );
        Ok(identity)
    }

    async fn perform_registration(
        &self,
        config: RegistrationConfig,
    ) -> PalResult<(ExternalIdentity, Arc<dyn RemoteIdentityService>)> {
        let agent_id = config.agent_id;
        info!(agent_id = %agent_id, agent_type = %config.agent_type, "starting identity registration");

        let session_config = SessionConfig::for_agent(agent_id, &self.config.network, config.credential);
        debug!(
            agent_id = %agent_id,
            agent_name = %session_config.agent_name,
            agent_domain = %session_config.agent_domain,
            "opening identity session"
        );
        let session = self
            .factory
            .connect(&session_config)
            .await
            .map_err(|e| PalError::Registration { reason: e.to_string() })?;

        let started = Instant::now();
        let external_id = session
            .register_identity()
            .await
            .map_err(|e| PalError::Registration { reason: e.to_string() })?;
        info!(
            agent_id = %agent_id,
            external_id = %external_id,
            duration_ms = started.elapsed().as_millis() as u64,
            "identity registered"
        );

        let metadata = IdentityMetadata::for_agent(
            agent_id,
            config.agent_type,
            &self.config.game_contract_address,
            &self.config.network,
        );
        let started = Instant::now();
        if let Err(e) = session.update_metadata(&external_id, &metadata).await {
            error!(
                agent_id = %agent_id,
                external_id = %external_id,
                error = %e,
                "registration partially failed, external identity may be orphaned and needs manual cleanup"
            );
            return Err(PalError::RegistrationPartial { external_id, reason: e.to_string() });
        }
        info!(
            agent_id = %agent_id,
            duration_ms = started.elapsed().as_millis() as u64,
            "identity metadata updated"
        );

        let identity = ExternalIdentity { external_id, agent_id, registered_at: Utc::now() };
        Ok((identity, session))
    }
}

// ── Collaborator impls ───────────────────────────────────────────────────────

#[async_trait]
impl LogUploader for IdentityRegistry {
    /// Upload `entries` as one `LogBatch` tagged with the agent's external id
    /// (or `"unregistered"`), and append a storage reference on success.
    async fn upload_logs(
        &self,
        agent_id: AgentId,
        entries: Vec<DecisionLogEntry>,
    ) -> PalResult<Option<String>> {
        let Some(storage) = &self.inner.storage else {
            warn!(agent_id = %agent_id, "content storage not configured, skipping upload");
            return Ok(None);
        };
        if entries.is_empty() {
            debug!(agent_id = %agent_id, "no entries to upload");
            return Ok(None);
        }

        let external_id = self
            .get_identity(agent_id)
            .map(|i| i.external_id)
            .unwrap_or_else(|| UNREGISTERED_EXTERNAL_ID.to_string());
        let batch = LogBatch::new(agent_id, external_id, entries);
        let step_range = StepRange { start: batch.start_step, end: batch.end_step };
        debug!(
            agent_id = %agent_id,
            external_id = %batch.chaos_agent_id,
            start_step = step_range.start,
            end_step = step_range.end,
            entries = batch.entries.len(),
            "uploading log batch"
        );

        let payload = serde_json::to_value(&batch)?;
        let started = Instant::now();
        let content_hash = storage.upload(&payload).await?;

        let total_refs = {
            let mut state = self.inner.state.lock();
            let refs = state.storage_refs.entry(agent_id).or_default();
            refs.push(StorageReference {
                content_hash: content_hash.clone(),
                data_type: BatchType::AgentLogs,
                stored_at: Utc::now(),
                step_range,
            });
            refs.len()
        };
        info!(
            agent_id = %agent_id,
            content_hash = %content_hash,
            duration_ms = started.elapsed().as_millis() as u64,
            total_refs,
            "log batch uploaded"
        );
        Ok(Some(content_hash))
    }
}

impl IdentityRelease for IdentityRegistry {
    fn release(&self, agent_id: AgentId) {
        self.unregister(agent_id);
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
