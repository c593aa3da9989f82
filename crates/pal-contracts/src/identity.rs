//! External identity registration types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::{AgentCredential, AgentId, AgentType};

/// Everything needed to register one agent with the remote identity service.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub agent_id: AgentId,
    pub agent_type: AgentType,
    /// The credential that will own the external identity.
    pub credential: AgentCredential,
}

/// Parameters for opening a remote identity session scoped to one agent.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub agent_name: String,
    pub agent_domain: String,
    pub network: String,
    pub credential: AgentCredential,
}

impl SessionConfig {
    /// Session parameters for `agent_id` on `network`.
    pub fn for_agent(agent_id: AgentId, network: &str, credential: AgentCredential) -> Self {
        Self {
            agent_name: format!("OnchainPal #{agent_id}"),
            agent_domain: format!("onchainpal-{agent_id}.agent"),
            network: network.to_string(),
            credential,
        }
    }
}

/// Metadata written to the remote identity record, linking it back to the
/// game entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMetadata {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub supported_trust: Vec<String>,
    pub game_contract: String,
    pub game_token_id: String,
    pub game_agent_type: AgentType,
    pub game_network: String,
}

impl IdentityMetadata {
    pub fn for_agent(
        agent_id: AgentId,
        agent_type: AgentType,
        game_contract: &str,
        network: &str,
    ) -> Self {
        Self {
            name: format!("OnchainPal #{agent_id}"),
            description: format!("OnchainPal game agent - {}", agent_type.as_tag()),
            capabilities: vec![
                "game_agent".to_string(),
                agent_type.as_tag().to_lowercase(),
            ],
            supported_trust: vec!["reputation".to_string()],
            game_contract: game_contract.to_string(),
            game_token_id: agent_id.to_string(),
            game_agent_type: agent_type,
            game_network: network.to_string(),
        }
    }

    /// Metadata as a JSON value, the shape the remote service accepts.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

/// A registered external identity.
///
/// Created at most once per local agent while the agent is known to the
/// registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Id assigned by the remote registration call.
    pub external_id: String,
    pub agent_id: AgentId,
    pub registered_at: DateTime<Utc>,
}

/// Aggregated reputation for an external identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReputationStats {
    pub total_feedback: u64,
    pub average_rating: f64,
}
