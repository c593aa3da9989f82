//! Schema-validated tool set.
//!
//! `ToolSet` implements `ToolExecutor`. Each registered tool carries a JSON
//! Schema for its parameters, compiled once at registration with the
//! `jsonschema` crate. `execute` validates the model's arguments against
//! that schema before the handler runs. Every violation is collected, so the
//! model sees the full failure set in one tool result.

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use pal_contracts::{
    agent::AgentId,
    error::{PalError, PalResult},
    model::ToolSpec,
};
use pal_core::traits::ToolExecutor;

/// The action behind a tool.
///
/// Receives already-validated arguments. Returns the short text handed back
/// to the model, or an error when the side effect failed.
pub type ToolHandler = Box<dyn Fn(AgentId, Value) -> BoxFuture<'static, PalResult<String>> + Send + Sync>;

struct RegisteredTool {
    spec: ToolSpec,
    validator: jsonschema::Validator,
    handler: ToolHandler,
}

/// An ordered set of named tools.
#[derive(Default)]
pub struct ToolSet {
    tools: Vec<RegisteredTool>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// Registering an existing name replaces that tool in place.
    ///
    /// # Errors
    ///
    /// `PalError::Config` if `input_schema` is not a valid JSON Schema.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: ToolHandler,
    ) -> PalResult<()> {
        let name = name.into();
        let validator = jsonschema::validator_for(&input_schema).map_err(|e| PalError::Config {
            reason: format!("invalid input schema for tool '{name}': {e}"),
        })?;
        let tool = RegisteredTool {
            spec: ToolSpec { name: name.clone(), description: description.into(), input_schema },
            validator,
            handler,
        };

        match self.tools.iter_mut().find(|t| t.spec.name == name) {
            Some(existing) => *existing = tool,
            None => self.tools.push(tool),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.spec.name.as_str()).collect()
    }

    /// Check `args` against the named tool's schema without running it.
    pub fn validate(&self, tool_name: &str, args: &Value) -> PalResult<()> {
        let tool = self.find(tool_name)?;
        let violations: Vec<String> = tool
            .validator
            .iter_errors(args)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(PalError::InvalidToolParams {
                tool: tool_name.to_string(),
                reason: violations.join("; "),
            })
        }
    }

    fn find(&self, tool_name: &str) -> PalResult<&RegisteredTool> {
        self.tools
            .iter()
            .find(|t| t.spec.name == tool_name)
            .ok_or_else(|| PalError::UnknownTool { tool: tool_name.to_string() })
    }
}

#[async_trait::async_trait]
impl ToolExecutor for ToolSet {
    fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec.clone()).collect()
    }

    async fn execute(&self, agent_id: AgentId, tool_name: &str, args: &Value) -> PalResult<String> {
        if let Err(e) = self.validate(tool_name, args) {
            warn!(agent_id = %agent_id, tool = tool_name, error = %e, "tool call rejected");
            return Err(e);
        }
        debug!(agent_id = %agent_id, tool = tool_name, args = %args, "executing tool");

        let tool = self.find(tool_name)?;
        (tool.handler)(agent_id, args.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::FutureExt;
    use serde_json::json;

    use super::*;

    fn echo_handler(calls: Arc<Mutex<Vec<Value>>>) -> ToolHandler {
        Box::new(move |_agent, args| {
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push(args.clone());
                Ok(format!("echo {args}"))
            }
            .boxed()
        })
    }

    fn counter_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "n": { "type": "integer", "minimum": 0, "maximum": 10 }
            },
            "required": ["n"],
            "additionalProperties": false
        })
    }

    #[tokio::test]
    async fn valid_args_reach_the_handler() {
        let calls = Arc::new(Mutex::new(vec![]));
        let mut tools = ToolSet::new();
        tools.register("count", "count things", counter_schema(), echo_handler(calls.clone())).unwrap();

        let out = tools.execute(AgentId(1), "count", &json!({ "n": 3 })).await.unwrap();
        assert_eq!(out, "echo {\"n\":3}");
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_args_never_reach_the_handler() {
        let calls = Arc::new(Mutex::new(vec![]));
        let mut tools = ToolSet::new();
        tools.register("count", "count things", counter_schema(), echo_handler(calls.clone())).unwrap();

        let err = tools.execute(AgentId(1), "count", &json!({ "n": 11 })).await.unwrap_err();
        match err {
            PalError::InvalidToolParams { tool, reason } => {
                assert_eq!(tool, "count");
                assert!(reason.contains("/n"), "reason should name the field: {reason}");
            }
            other => panic!("expected InvalidToolParams, got {:?}", other),
        }
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn all_violations_are_reported() {
        let mut tools = ToolSet::new();
        tools
            .register("count", "count things", counter_schema(), echo_handler(Arc::new(Mutex::new(vec![]))))
            .unwrap();

        let err = tools.validate("count", &json!({ "extra": true })).unwrap_err();
        let PalError::InvalidToolParams { reason, .. } = err else {
            panic!("expected InvalidToolParams");
        };
        // Missing "n" and the unexpected "extra" property.
        assert_eq!(reason.split("; ").count(), 2, "got: {reason}");
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let tools = ToolSet::new();
        let err = tools.execute(AgentId(1), "fly", &json!({})).await.unwrap_err();
        assert!(matches!(err, PalError::UnknownTool { tool } if tool == "fly"));
    }

    #[test]
    fn invalid_schema_is_rejected_at_registration() {
        let mut tools = ToolSet::new();
        let err = tools
            .register(
                "broken",
                "bad schema",
                json!({ "type": "not-a-type" }),
                echo_handler(Arc::new(Mutex::new(vec![]))),
            )
            .unwrap_err();
        assert!(matches!(err, PalError::Config { .. }));
        assert!(tools.is_empty());
    }

    #[test]
    fn re_registering_replaces_in_place() {
        let mut tools = ToolSet::new();
        let calls = Arc::new(Mutex::new(vec![]));
        tools.register("a", "first", json!({}), echo_handler(calls.clone())).unwrap();
        tools.register("b", "second", json!({}), echo_handler(calls.clone())).unwrap();
        tools.register("a", "replaced", json!({}), echo_handler(calls)).unwrap();

        assert_eq!(tools.names(), vec!["a", "b"]);
        assert_eq!(tools.specs()[0].description, "replaced");
    }
}
