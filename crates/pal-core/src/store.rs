//! In-process conversation history.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;

use pal_contracts::{agent::AgentId, error::PalResult, message::ConversationMessage};

use crate::traits::MessageStore;

/// A `MessageStore` that keeps every agent's history in memory.
///
/// Cloning shares the underlying storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageStore {
    histories: Arc<Mutex<HashMap<AgentId, Vec<ConversationMessage>>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages stored for `agent_id`.
    pub fn len(&self, agent_id: AgentId) -> usize {
        self.histories.lock().get(&agent_id).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, agent_id: AgentId) -> bool {
        self.len(agent_id) == 0
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn get_messages(
        &self,
        agent_id: AgentId,
        limit: Option<usize>,
    ) -> PalResult<Vec<ConversationMessage>> {
        let histories = self.histories.lock();
        let Some(history) = histories.get(&agent_id) else {
            return Ok(Vec::new());
        };
        let skip = match limit {
            Some(n) if n > 0 => history.len().saturating_sub(n),
            _ => 0,
        };
        Ok(history[skip..].to_vec())
    }

    async fn insert_message(&self, agent_id: AgentId, message: ConversationMessage) -> PalResult<()> {
        self.histories.lock().entry(agent_id).or_default().push(message);
        Ok(())
    }

    async fn insert_messages(
        &self,
        agent_id: AgentId,
        messages: Vec<ConversationMessage>,
    ) -> PalResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        self.histories.lock().entry(agent_id).or_default().extend(messages);
        Ok(())
    }
}
