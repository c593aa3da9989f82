//! Per-agent signing credentials.
//!
//! Every agent signs its own transactions and owns its own external
//! identity, so each one needs a distinct credential. Credentials are
//! derived deterministically from a process-wide seed: the same seed and
//! agent id always produce the same key and address.

use sha2::{Digest, Sha256};

use pal_contracts::{
    agent::{AgentCredential, AgentId},
    error::{PalError, PalResult},
};

/// Source of agent credentials.
pub trait CredentialProvider: Send + Sync {
    /// Create or load the credential for `agent_id`.
    ///
    /// Failing here is fatal for that agent: it is not started.
    fn credential_for(&self, agent_id: AgentId) -> PalResult<AgentCredential>;
}

/// Derives credentials from `SHA-256("<seed>-<agent_id>")`.
#[derive(Debug, Clone)]
pub struct DeterministicCredentials {
    seed: String,
}

impl DeterministicCredentials {
    pub fn new(seed: impl Into<String>) -> Self {
        Self { seed: seed.into() }
    }
}

impl CredentialProvider for DeterministicCredentials {
    fn credential_for(&self, agent_id: AgentId) -> PalResult<AgentCredential> {
        derive_credential(&self.seed, agent_id)
    }
}

/// Derive the credential for `agent_id` from `seed`.
///
/// The private key is the hex SHA-256 digest of `"<seed>-<agent_id>"`. The
/// address is the last 20 bytes of the SHA-256 digest of the key bytes.
pub fn derive_credential(seed: &str, agent_id: AgentId) -> PalResult<AgentCredential> {
    if seed.trim().is_empty() {
        return Err(PalError::Credential {
            reason: format!("cannot derive credential for agent {agent_id}: seed is empty"),
        });
    }

    let key = Sha256::digest(format!("{seed}-{agent_id}").as_bytes());
    let address_digest = Sha256::digest(key);

    Ok(AgentCredential {
        agent_id,
        address: format!("0x{}", hex::encode(&address_digest[12..])),
        private_key: format!("0x{}", hex::encode(key)),
    })
}
