//! Agent identity and lifecycle types.
//!
//! An agent is bound to exactly one game entity, identified by the entity's
//! numeric token id. These types carry no behaviour beyond formatting and
//! small predicates used by the loop and supervisor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric token id of the game entity an agent drives.
///
/// Used as the key in every per-agent map: message history, storage
/// managers, identity registrations and credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AgentId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Lifecycle status of an agent loop.
///
/// Legal transitions are `Stopped → Running → Stopping → Stopped`. A loop
/// never goes from `Running` straight to `Stopped`: the loop body itself
/// performs the final `Stopping → Stopped` transition once the in-flight
/// step has drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Stopped,
    Running,
    Stopping,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Stopped => "stopped",
            AgentStatus::Running => "running",
            AgentStatus::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Why an agent is being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// The entity's health reached zero.
    Death,
    /// The entity left the synchronized world state.
    Exit,
    /// An operator or shutdown path requested the stop.
    Manual,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Death => "death",
            StopReason::Exit => "exit",
            StopReason::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// The game-side classification of an entity.
///
/// The supervisor only drives entities whose type matches the one it was
/// configured for (pals, in the shipped runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentType {
    Pal,
    Trainer,
}

impl AgentType {
    /// Upper-case tag used in registration metadata (`"PAL"`, `"TRAINER"`).
    pub fn as_tag(&self) -> &'static str {
        match self {
            AgentType::Pal => "PAL",
            AgentType::Trainer => "TRAINER",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// A wallet-like signing credential owned by one agent.
///
/// Transactions the agent submits and its external identity registration are
/// both scoped to this credential. The private key never appears in logs;
/// `Debug` redacts it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCredential {
    /// The agent this credential belongs to.
    pub agent_id: AgentId,
    /// Public address derived from the key, `0x`-prefixed hex.
    pub address: String,
    /// Hex-encoded private key material.
    pub private_key: String,
}

impl fmt::Debug for AgentCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentCredential")
            .field("agent_id", &self.agent_id)
            .field("address", &self.address)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}
