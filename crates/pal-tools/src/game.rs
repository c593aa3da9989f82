//! The game actions available to a pal: `move`, `talk` and `attack`.
//!
//! Each action submits a transaction through a `TransactionLayer` signed
//! with the agent's own credential. Parameter bounds live in the tool
//! schemas, so handlers only deserialize already-validated arguments.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use pal_contracts::{
    agent::{AgentCredential, AgentId},
    error::{PalError, PalResult},
};

use crate::toolset::{ToolHandler, ToolSet};

/// Side length of the square game map.
pub const MAP_SIZE: u64 = 100_000;

/// Largest token id a tool may target.
pub const MAX_TOKEN_ID: u64 = 100_000;

pub const MAX_MOVE_MESSAGE_CHARS: u64 = 400;
pub const MAX_TALK_MESSAGE_CHARS: u64 = 500;

/// Submits game transactions on behalf of an agent.
///
/// Each method returns the transaction hash once submitted.
#[async_trait]
pub trait TransactionLayer: Send + Sync {
    async fn move_to(
        &self,
        credential: &AgentCredential,
        x: u64,
        y: u64,
        message: &str,
    ) -> PalResult<String>;

    async fn talk(
        &self,
        credential: &AgentCredential,
        to_token_id: u64,
        message: &str,
    ) -> PalResult<String>;

    async fn attack(&self, credential: &AgentCredential, target_token_id: u64) -> PalResult<String>;
}

#[derive(Debug, Deserialize)]
struct MoveParams {
    x: u64,
    y: u64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TalkParams {
    to_token_id: u64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttackParams {
    target_token_id: u64,
}

pub fn move_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "x": {
                "type": "integer", "minimum": 0, "maximum": MAP_SIZE,
                "description": "X coordinate to move to"
            },
            "y": {
                "type": "integer", "minimum": 0, "maximum": MAP_SIZE,
                "description": "Y coordinate to move to"
            },
            "message": {
                "type": "string", "maxLength": MAX_MOVE_MESSAGE_CHARS,
                "description": "Brief reason for this action"
            }
        },
        "required": ["x", "y"]
    })
}

pub fn talk_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "toTokenId": {
                "type": "integer", "minimum": 1, "maximum": MAX_TOKEN_ID,
                "description": "The tokenId of the entity to send the message to"
            },
            "message": {
                "type": "string", "maxLength": MAX_TALK_MESSAGE_CHARS,
                "description": "The message to send to other entities on the map (pals or trainers)"
            }
        },
        "required": ["toTokenId", "message"]
    })
}

pub fn attack_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "targetTokenId": {
                "type": "integer", "minimum": 1, "maximum": MAX_TOKEN_ID,
                "description": "The tokenId of the entity to attack"
            }
        },
        "required": ["targetTokenId"]
    })
}

fn params<T: for<'de> Deserialize<'de>>(tool: &str, args: Value) -> PalResult<T> {
    serde_json::from_value(args).map_err(|e| PalError::InvalidToolParams {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

fn tx_error(tool: &str, e: PalError) -> PalError {
    match e {
        e @ PalError::ToolExecution { .. } => e,
        other => PalError::ToolExecution { tool: tool.to_string(), reason: other.to_string() },
    }
}

/// Build the `move`, `talk` and `attack` tools for one agent.
///
/// Every transaction is signed with `credential`.
pub fn game_tools(credential: AgentCredential, tx: Arc<dyn TransactionLayer>) -> PalResult<ToolSet> {
    let credential = Arc::new(credential);
    let mut tools = ToolSet::new();

    tools.register("move", "Move to (x,y)", move_schema(), {
        let (credential, tx) = (credential.clone(), tx.clone());
        Box::new(move |agent_id: AgentId, args: Value| {
            let (credential, tx) = (credential.clone(), tx.clone());
            async move {
                let p: MoveParams = params("move", args)?;
                let hash = tx
                    .move_to(&credential, p.x, p.y, &p.message)
                    .await
                    .map_err(|e| tx_error("move", e))?;
                info!(agent_id = %agent_id, x = p.x, y = p.y, tx_hash = %hash, "move submitted");
                Ok("success".to_string())
            }
            .boxed()
        }) as ToolHandler
    })?;

    tools.register(
        "talk",
        "Send a message to other pal or trainer. Use this for diplomacy, alliances, \
         non-aggression pacts, or coordinating attacks.",
        talk_schema(),
        {
            let (credential, tx) = (credential.clone(), tx.clone());
            Box::new(move |agent_id: AgentId, args: Value| {
                let (credential, tx) = (credential.clone(), tx.clone());
                async move {
                    let p: TalkParams = params("talk", args)?;
                    let hash = tx
                        .talk(&credential, p.to_token_id, &p.message)
                        .await
                        .map_err(|e| tx_error("talk", e))?;
                    info!(agent_id = %agent_id, to = p.to_token_id, tx_hash = %hash, "talk submitted");
                    Ok(format!("Message sent: {}", p.message))
                }
                .boxed()
            }) as ToolHandler
        },
    )?;

    tools.register("attack", "Attack another entity by its tokenId", attack_schema(), {
        Box::new(move |agent_id: AgentId, args: Value| {
            let (credential, tx) = (credential.clone(), tx.clone());
            async move {
                let p: AttackParams = params("attack", args)?;
                let hash = tx
                    .attack(&credential, p.target_token_id)
                    .await
                    .map_err(|e| tx_error("attack", e))?;
                info!(agent_id = %agent_id, target = p.target_token_id, tx_hash = %hash, "attack submitted");
                Ok(format!("Attacked #{}", p.target_token_id))
            }
            .boxed()
        }) as ToolHandler
    })?;

    Ok(tools)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pal_core::traits::ToolExecutor;

    use super::*;

    #[derive(Default)]
    struct RecordingTx {
        submitted: Arc<Mutex<Vec<(String, String, Value)>>>,
        fail: bool,
    }

    impl RecordingTx {
        fn submit(&self, credential: &AgentCredential, action: &str, args: Value) -> PalResult<String> {
            if self.fail {
                return Err(PalError::ServiceUnavailable { reason: "rpc timeout".to_string() });
            }
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push((credential.address.clone(), action.to_string(), args));
            Ok(format!("0xtx{}", submitted.len()))
        }
    }

    #[async_trait]
    impl TransactionLayer for RecordingTx {
        async fn move_to(&self, c: &AgentCredential, x: u64, y: u64, message: &str) -> PalResult<String> {
            self.submit(c, "move", json!({ "x": x, "y": y, "message": message }))
        }

        async fn talk(&self, c: &AgentCredential, to_token_id: u64, message: &str) -> PalResult<String> {
            self.submit(c, "talk", json!({ "to": to_token_id, "message": message }))
        }

        async fn attack(&self, c: &AgentCredential, target_token_id: u64) -> PalResult<String> {
            self.submit(c, "attack", json!({ "target": target_token_id }))
        }
    }

    fn credential() -> AgentCredential {
        AgentCredential {
            agent_id: AgentId(5),
            address: "0xpal5".to_string(),
            private_key: "k".to_string(),
        }
    }

    fn tools_with(tx: RecordingTx) -> (ToolSet, Arc<Mutex<Vec<(String, String, Value)>>>) {
        let submitted = tx.submitted.clone();
        (game_tools(credential(), Arc::new(tx)).unwrap(), submitted)
    }

    #[test]
    fn exposes_three_game_tools() {
        let (tools, _) = tools_with(RecordingTx::default());
        assert_eq!(tools.names(), vec!["move", "talk", "attack"]);
        let specs = tools.specs();
        assert_eq!(specs[0].input_schema["properties"]["x"]["maximum"], json!(100_000));
    }

    #[tokio::test]
    async fn move_submits_signed_transaction() {
        let (tools, submitted) = tools_with(RecordingTx::default());

        let out = tools
            .execute(AgentId(5), "move", &json!({ "x": 10, "y": 20, "message": "exploring" }))
            .await
            .unwrap();

        assert_eq!(out, "success");
        let submitted = submitted.lock().unwrap();
        assert_eq!(submitted[0].0, "0xpal5");
        assert_eq!(submitted[0].1, "move");
        assert_eq!(submitted[0].2["x"], json!(10));
    }

    #[tokio::test]
    async fn talk_and_attack_report_what_they_did() {
        let (tools, submitted) = tools_with(RecordingTx::default());

        let talk = tools
            .execute(AgentId(5), "talk", &json!({ "toTokenId": 7, "message": "truce?" }))
            .await
            .unwrap();
        assert_eq!(talk, "Message sent: truce?");

        let attack = tools
            .execute(AgentId(5), "attack", &json!({ "targetTokenId": 7 }))
            .await
            .unwrap();
        assert_eq!(attack, "Attacked #7");
        assert_eq!(submitted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn out_of_bounds_params_are_rejected_before_submission() {
        let (tools, submitted) = tools_with(RecordingTx::default());

        let cases = [
            ("move", json!({ "x": 100_001, "y": 0, "message": "" })),
            ("move", json!({ "x": -1, "y": 0, "message": "" })),
            ("move", json!({ "x": 1, "y": 1, "message": "a".repeat(401) })),
            ("talk", json!({ "toTokenId": 0, "message": "hi" })),
            ("talk", json!({ "toTokenId": 3, "message": "a".repeat(501) })),
            ("attack", json!({ "targetTokenId": "seven" })),
            ("attack", json!({})),
        ];
        for (tool, args) in cases {
            let err = tools.execute(AgentId(5), tool, &args).await.unwrap_err();
            assert!(
                matches!(err, PalError::InvalidToolParams { .. }),
                "{tool} {args} should be invalid, got {err:?}"
            );
        }
        assert!(submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transaction_failure_is_a_tool_execution_error() {
        let (tools, _) = tools_with(RecordingTx { fail: true, ..RecordingTx::default() });

        let err = tools
            .execute(AgentId(5), "attack", &json!({ "targetTokenId": 9 }))
            .await
            .unwrap_err();
        match err {
            PalError::ToolExecution { tool, reason } => {
                assert_eq!(tool, "attack");
                assert!(reason.contains("rpc timeout"));
            }
            other => panic!("expected ToolExecution, got {:?}", other),
        }
    }
}
