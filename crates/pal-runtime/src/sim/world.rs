//! An in-process game world.
//!
//! `SimWorld` holds a 2-D map of entities with health and owners. It is both
//! the agents' `WorldStateProvider` and their `TransactionLayer`: `move`,
//! `talk` and `attack` mutate the map directly and return a fake
//! transaction hash. Every entity change is announced on the lifecycle
//! channel, the way a synchronized on-chain world would report it.

use std::{collections::BTreeMap, fmt::Write as _, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use pal_contracts::{
    agent::{AgentCredential, AgentId, AgentType},
    error::{PalError, PalResult},
};
use pal_core::traits::WorldStateProvider;
use pal_tools::game::{TransactionLayer, MAP_SIZE};

use crate::supervisor::EntityEvent;

/// Health removed by one attack.
pub const ATTACK_DAMAGE: u64 = 25;

/// Events kept per entity for its observation.
const MAX_EVENTS_PER_ENTITY: usize = 10;

/// One entity on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimEntity {
    pub token_id: u64,
    pub agent_type: AgentType,
    pub owner: String,
    pub health: u64,
    pub x: u64,
    pub y: u64,
}

#[derive(Default)]
struct WorldState {
    entities: BTreeMap<u64, SimEntity>,
    events: BTreeMap<u64, Vec<String>>,
    tx_count: u64,
}

impl WorldState {
    fn push_event(&mut self, token_id: u64, event: String) {
        let log = self.events.entry(token_id).or_default();
        log.push(event);
        if log.len() > MAX_EVENTS_PER_ENTITY {
            log.remove(0);
        }
    }

    fn next_tx_hash(&mut self) -> String {
        self.tx_count += 1;
        format!("0x{:064x}", self.tx_count)
    }

    fn live_entity(&self, tool: &str, token_id: u64) -> PalResult<&SimEntity> {
        match self.entities.get(&token_id) {
            Some(e) if e.health > 0 => Ok(e),
            Some(_) => Err(tx_failed(tool, format!("entity #{token_id} has no health left"))),
            None => Err(tx_failed(tool, format!("entity #{token_id} does not exist"))),
        }
    }
}

fn tx_failed(tool: &str, reason: String) -> PalError {
    PalError::ToolExecution { tool: tool.to_string(), reason }
}

/// Shared handle to the simulated world. Clones share the same map.
#[derive(Clone)]
pub struct SimWorld {
    game_contract: String,
    state: Arc<Mutex<WorldState>>,
    events: mpsc::UnboundedSender<EntityEvent>,
}

impl SimWorld {
    /// Create an empty world owned by `game_contract`.
    ///
    /// The receiver yields every lifecycle event the world emits.
    pub fn new(game_contract: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<EntityEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let world = Self {
            game_contract: game_contract.into(),
            state: Arc::new(Mutex::new(WorldState::default())),
            events,
        };
        (world, rx)
    }

    pub fn game_contract(&self) -> &str {
        &self.game_contract
    }

    /// Place a wild entity (owned by the game contract) on the map.
    pub fn spawn(&self, token_id: u64, agent_type: AgentType, x: u64, y: u64, health: u64) {
        let entity = SimEntity {
            token_id,
            agent_type,
            owner: self.game_contract.clone(),
            health,
            x: x.min(MAP_SIZE),
            y: y.min(MAP_SIZE),
        };
        info!(token_id, agent_type = %agent_type, x, y, health, "entity spawned");
        self.state.lock().entities.insert(token_id, entity);
        self.announce(EntityEvent::Upserted { token_id, health, agent_type });
    }

    /// Remove an entity from the map.
    pub fn despawn(&self, token_id: u64) -> bool {
        let removed = self.state.lock().entities.remove(&token_id).is_some();
        if removed {
            info!(token_id, "entity despawned");
            self.announce(EntityEvent::Exited { token_id });
        }
        removed
    }

    /// Set an entity's health and announce the change.
    pub fn set_health(&self, token_id: u64, health: u64) -> bool {
        let agent_type = {
            let mut state = self.state.lock();
            let Some(entity) = state.entities.get_mut(&token_id) else {
                return false;
            };
            entity.health = health;
            entity.agent_type
        };
        self.announce(EntityEvent::Upserted { token_id, health, agent_type });
        true
    }

    pub fn entity(&self, token_id: u64) -> Option<SimEntity> {
        self.state.lock().entities.get(&token_id).cloned()
    }

    /// All entities, ordered by token id.
    pub fn entities(&self) -> Vec<SimEntity> {
        self.state.lock().entities.values().cloned().collect()
    }

    /// Recent events involving `token_id`, oldest first.
    pub fn events_for(&self, token_id: u64) -> Vec<String> {
        self.state.lock().events.get(&token_id).cloned().unwrap_or_default()
    }

    /// Number of transactions accepted so far.
    pub fn transaction_count(&self) -> u64 {
        self.state.lock().tx_count
    }

    fn announce(&self, event: EntityEvent) {
        if self.events.send(event).is_err() {
            debug!("no lifecycle subscriber, event dropped");
        }
    }
}

// ── Observation ──────────────────────────────────────────────────────────────

fn describe(entity: &SimEntity) -> String {
    format!(
        "tokenId #{} Info:\n Agent Type: {}\n Current Position: Arrived at {}, {}\n Health: {}\n Owner: {}",
        entity.token_id, entity.agent_type, entity.x, entity.y, entity.health, entity.owner
    )
}

fn distance(a: &SimEntity, b: &SimEntity) -> f64 {
    let dx = a.x as f64 - b.x as f64;
    let dy = a.y as f64 - b.y as f64;
    (dx * dx + dy * dy).sqrt()
}

#[async_trait]
impl WorldStateProvider for SimWorld {
    async fn observe(&self, agent_id: AgentId) -> PalResult<String> {
        let state = self.state.lock();
        let me = state.entities.get(&agent_id.0).ok_or_else(|| PalError::Observation {
            reason: format!("entity #{agent_id} is not on the map"),
        })?;

        let mut text = format!("Your Info:\n\n{}\n\nOther Tokens Info:\n\n", describe(me));
        for other in state.entities.values().filter(|e| e.token_id != me.token_id) {
            // Writing to a String cannot fail.
            let _ = write!(
                text,
                "{}\nDistance from tokenId #{} to you (tokenId #{}): {:.1}m\n\n",
                describe(other),
                other.token_id,
                me.token_id,
                distance(me, other)
            );
        }

        let _ = write!(text, "All Events for tokenId #{}:\n\n", me.token_id);
        for event in state.events.get(&me.token_id).into_iter().flatten() {
            let _ = writeln!(text, "Event: {event}");
        }
        Ok(text.trim().to_string())
    }
}

// ── Transactions ─────────────────────────────────────────────────────────────

#[async_trait]
impl TransactionLayer for SimWorld {
    async fn move_to(
        &self,
        credential: &AgentCredential,
        x: u64,
        y: u64,
        message: &str,
    ) -> PalResult<String> {
        let me = credential.agent_id.0;
        let hash = {
            let mut state = self.state.lock();
            state.live_entity("move", me)?;
            if let Some(entity) = state.entities.get_mut(&me) {
                entity.x = x.min(MAP_SIZE);
                entity.y = y.min(MAP_SIZE);
            }
            let event = if message.is_empty() {
                format!("#{me} moved to ({x}, {y})")
            } else {
                format!("#{me} moved to ({x}, {y}): {message}")
            };
            state.push_event(me, event);
            state.next_tx_hash()
        };
        Ok(hash)
    }

    async fn talk(
        &self,
        credential: &AgentCredential,
        to_token_id: u64,
        message: &str,
    ) -> PalResult<String> {
        let me = credential.agent_id.0;
        let mut state = self.state.lock();
        state.live_entity("talk", me)?;
        if !state.entities.contains_key(&to_token_id) {
            return Err(tx_failed("talk", format!("entity #{to_token_id} does not exist")));
        }
        let event = format!("#{me} said to #{to_token_id}: {message}");
        state.push_event(me, event.clone());
        state.push_event(to_token_id, event);
        Ok(state.next_tx_hash())
    }

    async fn attack(&self, credential: &AgentCredential, target_token_id: u64) -> PalResult<String> {
        let me = credential.agent_id.0;
        if me == target_token_id {
            return Err(tx_failed("attack", "an entity cannot attack itself".to_string()));
        }

        let (hash, health, agent_type) = {
            let mut state = self.state.lock();
            state.live_entity("attack", me)?;
            state.live_entity("attack", target_token_id)?;

            let Some(target) = state.entities.get_mut(&target_token_id) else {
                return Err(tx_failed("attack", format!("entity #{target_token_id} does not exist")));
            };
            target.health = target.health.saturating_sub(ATTACK_DAMAGE);
            let (health, agent_type) = (target.health, target.agent_type);

            let event = format!("#{me} attacked #{target_token_id}, health now {health}");
            state.push_event(me, event.clone());
            state.push_event(target_token_id, event);
            (state.next_tx_hash(), health, agent_type)
        };

        info!(attacker = me, target = target_token_id, health, "attack landed");
        self.announce(EntityEvent::Upserted { token_id: target_token_id, health, agent_type });
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(id: u64) -> AgentCredential {
        AgentCredential {
            agent_id: AgentId(id),
            address: format!("0xpal{id}"),
            private_key: "k".to_string(),
        }
    }

    fn world() -> (SimWorld, mpsc::UnboundedReceiver<EntityEvent>) {
        let (world, mut rx) = SimWorld::new("0xgame");
        world.spawn(1, AgentType::Pal, 0, 0, 100);
        world.spawn(2, AgentType::Pal, 300, 400, 30);
        world.spawn(3, AgentType::Trainer, 10, 10, 100);
        while rx.try_recv().is_ok() {}
        (world, rx)
    }

    #[tokio::test]
    async fn observation_describes_self_others_and_events() {
        let (world, _rx) = world();
        world.talk(&cred(2), 1, "hello").await.unwrap();

        let text = world.observe(AgentId(1)).await.unwrap();
        assert!(text.starts_with("Your Info:\n\ntokenId #1 Info:"));
        assert!(text.contains("Owner: 0xgame"));
        assert!(text.contains("Distance from tokenId #2 to you (tokenId #1): 500.0m"));
        assert!(text.contains("tokenId #3 Info:\n Agent Type: TRAINER"));
        assert!(text.contains("Event: #2 said to #1: hello"));
    }

    #[tokio::test]
    async fn observing_a_missing_entity_fails() {
        let (world, _rx) = world();
        let err = world.observe(AgentId(99)).await.unwrap_err();
        assert!(matches!(err, PalError::Observation { .. }));
    }

    #[tokio::test]
    async fn move_updates_position_and_clamps_to_map() {
        let (world, _rx) = world();
        let hash = world.move_to(&cred(1), 10, 20, "exploring").await.unwrap();
        assert!(hash.starts_with("0x"));
        let me = world.entity(1).unwrap();
        assert_eq!((me.x, me.y), (10, 20));

        world.move_to(&cred(1), MAP_SIZE + 5, 0, "").await.unwrap();
        assert_eq!(world.entity(1).unwrap().x, MAP_SIZE);
        assert_eq!(world.transaction_count(), 2);
    }

    #[tokio::test]
    async fn attack_damages_and_announces() {
        let (world, mut rx) = world();

        world.attack(&cred(1), 2).await.unwrap();
        assert_eq!(world.entity(2).unwrap().health, 5);
        assert_eq!(
            rx.try_recv().unwrap(),
            EntityEvent::Upserted { token_id: 2, health: 5, agent_type: AgentType::Pal }
        );

        world.attack(&cred(1), 2).await.unwrap();
        assert_eq!(world.entity(2).unwrap().health, 0);
        assert_eq!(
            rx.try_recv().unwrap(),
            EntityEvent::Upserted { token_id: 2, health: 0, agent_type: AgentType::Pal }
        );
    }

    #[tokio::test]
    async fn invalid_transactions_fail() {
        let (world, _rx) = world();

        let err = world.attack(&cred(1), 1).await.unwrap_err();
        assert!(matches!(err, PalError::ToolExecution { .. }));

        let err = world.attack(&cred(1), 42).await.unwrap_err();
        assert!(err.to_string().contains("#42"));

        world.set_health(1, 0);
        let err = world.move_to(&cred(1), 1, 1, "").await.unwrap_err();
        assert!(err.to_string().contains("no health"));
    }

    #[tokio::test]
    async fn despawn_announces_exit() {
        let (world, mut rx) = world();
        assert!(world.despawn(3));
        assert!(!world.despawn(3));
        assert_eq!(rx.try_recv().unwrap(), EntityEvent::Exited { token_id: 3 });
        assert!(rx.try_recv().is_err());
    }
}
