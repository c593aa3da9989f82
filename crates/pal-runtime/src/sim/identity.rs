//! In-process identity service.
//!
//! Hands out sequential external ids, remembers the metadata written to
//! each one and keeps a mutable reputation ledger, so the registry can be
//! exercised end-to-end without a remote service.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use pal_contracts::{
    error::{PalError, PalResult},
    identity::{IdentityMetadata, ReputationStats, SessionConfig},
};
use pal_core::traits::{IdentityServiceFactory, RemoteIdentityService};

#[derive(Default)]
struct Ledger {
    next_id: u64,
    owners: HashMap<String, String>,
    metadata: HashMap<String, IdentityMetadata>,
    ratings: HashMap<String, Vec<u8>>,
}

/// Factory and shared ledger for simulated identity sessions.
#[derive(Clone, Default)]
pub struct SimIdentityService {
    ledger: Arc<Mutex<Ledger>>,
}

impl SimIdentityService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities registered so far.
    pub fn registrations(&self) -> usize {
        self.ledger.lock().owners.len()
    }

    pub fn owner_of(&self, external_id: &str) -> Option<String> {
        self.ledger.lock().owners.get(external_id).cloned()
    }

    pub fn metadata(&self, external_id: &str) -> Option<IdentityMetadata> {
        self.ledger.lock().metadata.get(external_id).cloned()
    }

    /// Record a 0-100 rating for `external_id`.
    pub fn give_feedback(&self, external_id: &str, rating: u8) {
        self.ledger
            .lock()
            .ratings
            .entry(external_id.to_string())
            .or_default()
            .push(rating.min(100));
    }
}

#[async_trait]
impl IdentityServiceFactory for SimIdentityService {
    async fn connect(&self, session: &SessionConfig) -> PalResult<Arc<dyn RemoteIdentityService>> {
        debug!(agent = %session.agent_name, domain = %session.agent_domain, "identity session opened");
        Ok(Arc::new(SimIdentitySession {
            ledger: self.ledger.clone(),
            owner: session.credential.address.clone(),
        }))
    }
}

/// One agent's session, scoped to its credential's address.
struct SimIdentitySession {
    ledger: Arc<Mutex<Ledger>>,
    owner: String,
}

#[async_trait]
impl RemoteIdentityService for SimIdentitySession {
    async fn register_identity(&self) -> PalResult<String> {
        let mut ledger = self.ledger.lock();
        ledger.next_id += 1;
        let external_id = ledger.next_id.to_string();
        ledger.owners.insert(external_id.clone(), self.owner.clone());
        Ok(external_id)
    }

    async fn update_metadata(&self, external_id: &str, metadata: &IdentityMetadata) -> PalResult<()> {
        let mut ledger = self.ledger.lock();
        match ledger.owners.get(external_id) {
            Some(owner) if *owner == self.owner => {
                ledger.metadata.insert(external_id.to_string(), metadata.clone());
                Ok(())
            }
            Some(_) => Err(PalError::MetadataUpdate {
                reason: format!("identity {external_id} is not owned by {}", self.owner),
            }),
            None => Err(PalError::MetadataUpdate {
                reason: format!("identity {external_id} does not exist"),
            }),
        }
    }

    async fn get_stats(&self, external_id: &str) -> PalResult<ReputationStats> {
        let ledger = self.ledger.lock();
        if !ledger.owners.contains_key(external_id) {
            return Err(PalError::ServiceUnavailable {
                reason: format!("identity {external_id} does not exist"),
            });
        }
        let ratings = ledger.ratings.get(external_id).map(Vec::as_slice).unwrap_or_default();
        let average_rating = if ratings.is_empty() {
            0.0
        } else {
            ratings.iter().map(|r| f64::from(*r)).sum::<f64>() / ratings.len() as f64
        };
        Ok(ReputationStats { total_feedback: ratings.len() as u64, average_rating })
    }
}
