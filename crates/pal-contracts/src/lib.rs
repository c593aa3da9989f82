//! # pal-contracts
//!
//! Shared types, error definitions, and configuration for the pal agent
//! runtime.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate: only data definitions, errors and config loading.

pub mod agent;
pub mod config;
pub mod decision;
pub mod error;
pub mod identity;
pub mod message;
pub mod model;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use agent::{AgentCredential, AgentId, AgentType};
    use config::{FlushFailurePolicy, RuntimeConfig};
    use decision::{DecisionLogEntry, LogBatch};
    use error::PalError;
    use identity::IdentityMetadata;
    use message::{ConversationMessage, GeneratedMessage, Role};

    fn entry(step: u64) -> DecisionLogEntry {
        DecisionLogEntry::new(step, "obs", "thinking", None, None, None)
    }

    // ── Persisted JSON shapes ────────────────────────────────────────────────

    #[test]
    fn decision_entry_uses_camel_case_field_names() {
        let mut params = serde_json::Map::new();
        params.insert("x".to_string(), json!(10));
        let e = DecisionLogEntry::new(
            7,
            "saw a pal",
            "attack it",
            Some("attack".to_string()),
            Some(params),
            Some("success".to_string()),
        );

        let value = serde_json::to_value(&e).unwrap();
        assert_eq!(value["step"], json!(7));
        assert_eq!(value["observation"], json!("saw a pal"));
        assert_eq!(value["reasoning"], json!("attack it"));
        assert_eq!(value["toolCalled"], json!("attack"));
        assert_eq!(value["toolParams"], json!({ "x": 10 }));
        assert_eq!(value["result"], json!("success"));
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn decision_entry_without_tool_serializes_nulls() {
        let value = serde_json::to_value(entry(1)).unwrap();
        assert!(value["toolCalled"].is_null());
        assert!(value["toolParams"].is_null());
        assert!(value["result"].is_null());
    }

    #[test]
    fn log_batch_shape_and_step_range() {
        let batch = LogBatch::new(AgentId(42), "17", vec![entry(4), entry(2), entry(9)]);
        assert_eq!(batch.start_step, 2);
        assert_eq!(batch.end_step, 9);

        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(value["type"], json!("agent_logs"));
        assert_eq!(value["agentId"], json!(42));
        assert_eq!(value["chaosAgentId"], json!("17"));
        assert_eq!(value["startStep"], json!(2));
        assert_eq!(value["endStep"], json!(9));
        assert_eq!(value["entries"].as_array().unwrap().len(), 3);
        assert!(value["createdAt"].is_i64());
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    #[test]
    fn message_roles() {
        assert_eq!(ConversationMessage::user("hi").role(), Role::User);
        assert_eq!(GeneratedMessage::text("ok").role(), Role::Assistant);
        assert_eq!(
            GeneratedMessage::tool_call("move", json!({})).role(),
            Role::Assistant
        );
        let result = GeneratedMessage::ToolResult {
            call_id: "c1".to_string(),
            tool_name: "move".to_string(),
            output: "success".to_string(),
        };
        assert_eq!(ConversationMessage::from(result).role(), Role::Tool);
    }

    #[test]
    fn tool_call_ids_are_unique() {
        let ids: std::collections::HashSet<String> = (0..50)
            .map(|_| match GeneratedMessage::tool_call("talk", json!({})) {
                GeneratedMessage::ToolCall { call_id, .. } => call_id,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids.len(), 50);
    }

    // ── Identity ─────────────────────────────────────────────────────────────

    #[test]
    fn identity_metadata_links_back_to_game_entity() {
        let meta = IdentityMetadata::for_agent(AgentId(5), AgentType::Pal, "0xabc", "base-sepolia");
        assert_eq!(meta.name, "OnchainPal #5");
        assert_eq!(meta.description, "OnchainPal game agent - PAL");
        assert_eq!(meta.capabilities, vec!["game_agent", "pal"]);
        assert_eq!(meta.game_token_id, "5");

        let value = meta.to_value();
        assert_eq!(value["gameContract"], json!("0xabc"));
        assert_eq!(value["gameAgentType"], json!("PAL"));
        assert_eq!(value["supportedTrust"], json!(["reputation"]));
    }

    #[test]
    fn credential_debug_redacts_private_key() {
        let cred = AgentCredential {
            agent_id: AgentId(1),
            address: "0x1234".to_string(),
            private_key: "deadbeef".to_string(),
        };
        let printed = format!("{:?}", cred);
        assert!(printed.contains("0x1234"));
        assert!(!printed.contains("deadbeef"));
    }

    // ── Configuration ────────────────────────────────────────────────────────

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_defaults() {
        let config = RuntimeConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.flush_threshold, 1);
        assert_eq!(config.flush_failure, FlushFailurePolicy::Drop);
        assert!(!config.debug);
        assert_eq!(config.agent_seed, config::DEFAULT_AGENT_SEED);
        assert!(config.model.base_url.contains("devnet"));
        assert!(config.model.api_key.is_none());
        assert!(config.generation_log_dir.is_none());
    }

    #[test]
    fn config_reads_environment_keys() {
        let config = RuntimeConfig::from_lookup(lookup_from(&[
            ("AGENT_LOG_FLUSH_THRESHOLD", "5"),
            ("AGENT_LOG_FLUSH_FAILURE", "requeue"),
            ("CHAOSCHAIN_DEBUG", "true"),
            ("AGENT_SEED", "seed-x"),
            ("AIMO_USE_PRODUCTION", "true"),
            ("AIMO_API_KEY", "sk-test"),
            ("AGENT_GENERATION_LOG_DIR", "/var/log/pal"),
        ]))
        .unwrap();

        assert_eq!(config.flush_threshold, 5);
        assert_eq!(config.flush_failure, FlushFailurePolicy::Requeue);
        assert!(config.debug);
        assert_eq!(config.agent_seed, "seed-x");
        assert_eq!(config.model.base_url, "https://api.aimo.network/v1");
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.generation_log_dir, Some(std::path::PathBuf::from("/var/log/pal")));
    }

    #[test]
    fn config_rejects_bad_threshold() {
        let err = RuntimeConfig::from_lookup(lookup_from(&[("AGENT_LOG_FLUSH_THRESHOLD", "abc")]))
            .unwrap_err();
        assert!(matches!(err, PalError::Config { .. }));

        let err = RuntimeConfig::from_lookup(lookup_from(&[("AGENT_LOG_FLUSH_THRESHOLD", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("flush_threshold"));
    }

    #[test]
    fn config_from_toml() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            flush_threshold = 3
            flush_failure = "requeue"
            generation_log_dir = "logs"

            [model]
            name = "gpt-test"

            [identity]
            network = "localhost"
            "#,
        )
        .unwrap();

        assert_eq!(config.flush_threshold, 3);
        assert_eq!(config.flush_failure, FlushFailurePolicy::Requeue);
        assert_eq!(config.model.name, "gpt-test");
        assert_eq!(config.generation_log_dir, Some(std::path::PathBuf::from("logs")));
        assert_eq!(config.identity.network, "localhost");
        // Untouched sections keep their defaults.
        assert!(config.storage.indexer_rpc.starts_with("https://"));
    }

    #[test]
    fn config_debug_redacts_api_key() {
        let mut config = RuntimeConfig::default();
        config.model.api_key = Some("sk-secret".to_string());
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }

    // ── PalError display messages ────────────────────────────────────────────

    #[test]
    fn error_registration_partial_names_orphan() {
        let err = PalError::RegistrationPartial {
            external_id: "88".to_string(),
            reason: "metadata rejected".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("88"));
        assert!(msg.contains("orphaned"));
        assert!(msg.contains("metadata rejected"));
    }

    #[test]
    fn error_tool_execution_display() {
        let err = PalError::ToolExecution {
            tool: "move".to_string(),
            reason: "nonce too low".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("move"));
        assert!(msg.contains("nonce too low"));
    }
}
