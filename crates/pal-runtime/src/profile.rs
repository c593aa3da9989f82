//! The pal agent profile: its system prompt and how it observes the world.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use pal_contracts::{agent::AgentId, error::PalResult};
use pal_core::{
    traits::{ToolExecutor, WorldStateProvider},
    AgentProfile,
};

/// System prompt for a pal in the game at `game_contract`.
///
/// Entities owned by the game contract itself are wild; any other owner
/// is a trainer.
pub fn pal_system_prompt(game_contract: &str) -> String {
    format!(
        "You are a Pal in an on-chain game world (map: 100000x100000 units).

## Status
- **Wild** (owner = {game_contract}): Roam freely, attack frequently, prioritize combat.
- **Owned** (owner ≠ {game_contract}): Stay near trainer, show loyalty, protect them, but still engage in combat.

## Behavior
- **Combat is your primary activity**: Attack entities frequently and playfully. Priority: Attack > Move > Talk.
- **Relationships**: Form friendships through positive interactions; develop hostility when attacked. Use talk tool to communicate.
- **If owned**: Stay near trainer, express loyalty, protect them, but combat remains enjoyable.

## Tools
- **move(x, y, message)**: Move to coordinates (0-100000, 0-100000).
- **talk(toTokenId, message)**: Communicate with other entities.
- **attack(targetTokenId)**: Attack entities - use frequently!

## Decision Making
Attack nearby entities as default. If owned, balance trainer proximity with combat. Observe environment for targets."
    )
}

/// Wraps a world snapshot as `Current state:\n<snapshot>\nTime: <unix seconds>`.
///
/// An empty snapshot stays empty, so the step records no observation.
pub struct TimestampedObservation {
    world: Arc<dyn WorldStateProvider>,
}

impl TimestampedObservation {
    pub fn new(world: Arc<dyn WorldStateProvider>) -> Self {
        Self { world }
    }
}

#[async_trait]
impl WorldStateProvider for TimestampedObservation {
    async fn observe(&self, agent_id: AgentId) -> PalResult<String> {
        let snapshot = self.world.observe(agent_id).await?;
        if snapshot.trim().is_empty() {
            return Ok(String::new());
        }
        Ok(format!(
            "Current state:\n{}\nTime: {}",
            snapshot.trim(),
            Utc::now().timestamp()
        ))
    }
}

/// Profile for a pal agent.
pub fn pal_profile(
    game_contract: &str,
    world: Arc<dyn WorldStateProvider>,
    tools: Arc<dyn ToolExecutor>,
) -> AgentProfile {
    AgentProfile {
        system_prompt: pal_system_prompt(game_contract),
        world: Arc::new(TimestampedObservation::new(world)),
        tools: Some(tools),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedWorld(&'static str);

    #[async_trait]
    impl WorldStateProvider for FixedWorld {
        async fn observe(&self, _agent_id: AgentId) -> PalResult<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn prompt_names_the_game_contract_and_tools() {
        let prompt = pal_system_prompt("0xgame");
        assert!(prompt.contains("owner = 0xgame"));
        assert!(prompt.contains("owner ≠ 0xgame"));
        assert!(prompt.contains("Priority: Attack > Move > Talk"));
        for tool in ["move(x, y, message)", "talk(toTokenId, message)", "attack(targetTokenId)"] {
            assert!(prompt.contains(tool), "missing {tool}");
        }
    }

    #[tokio::test]
    async fn observation_is_wrapped_with_time() {
        let observer = TimestampedObservation::new(Arc::new(FixedWorld("  Your Info: #1  ")));
        let text = observer.observe(AgentId(1)).await.unwrap();

        assert!(text.starts_with("Current state:\nYour Info: #1\nTime: "));
        let time: i64 = text.rsplit("Time: ").next().unwrap().parse().unwrap();
        assert!(time > 0);
    }

    #[tokio::test]
    async fn empty_snapshot_stays_empty() {
        let observer = TimestampedObservation::new(Arc::new(FixedWorld("   ")));
        assert_eq!(observer.observe(AgentId(1)).await.unwrap(), "");
    }
}
