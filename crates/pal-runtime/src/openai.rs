//! OpenAI-compatible chat-completions client.
//!
//! One `generate` call is exactly one HTTP request. Retries, timeouts and
//! the skip-turn fallback belong to `ModelInvoker`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use pal_contracts::{
    config::ModelConfig,
    error::{PalError, PalResult},
    message::{ConversationMessage, GeneratedMessage},
    model::{GenerationRequest, GenerationResponse, ModelError, ToolSpec},
};
use pal_core::traits::LanguageModel;

/// Longest error body carried into a `ModelError` message.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// A `LanguageModel` backed by any `/chat/completions` endpoint.
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleModel {
    /// Build a client from `config`.
    ///
    /// # Errors
    ///
    /// `PalError::Config` when no API key is configured or the HTTP client
    /// cannot be built.
    pub fn new(config: &ModelConfig) -> PalResult<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| PalError::Config {
            reason: "model.api_key is required (set AIMO_API_KEY)".to_string(),
        })?;
        let client = reqwest::Client::builder().build().map_err(|e| PalError::Config {
            reason: format!("failed to build HTTP client: {e}"),
        })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.name.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ModelError> {
        let body = request_body(&self.model, request);
        debug!(model = %self.model, messages = request.messages.len(), "sending chat completion");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(ModelError::http(status.as_u16(), text));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ModelError::invalid_response(format!("response body is not JSON: {e}")))?;
        parse_completion(&json)
    }
}

// ── Wire format ──────────────────────────────────────────────────────────────

/// Chat-completions request body for `request`.
pub fn request_body(model: &str, request: &GenerationRequest) -> Value {
    let mut messages = vec![json!({ "role": "system", "content": request.system })];
    messages.extend(request.messages.iter().map(wire_message));

    let mut body = json!({ "model": model, "messages": messages });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(wire_tool).collect());
    }
    body
}

fn wire_tool(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.input_schema,
        }
    })
}

fn wire_message(message: &ConversationMessage) -> Value {
    match message {
        ConversationMessage::User(content) => json!({ "role": "user", "content": content }),
        ConversationMessage::Generated(GeneratedMessage::AssistantText { text }) => {
            json!({ "role": "assistant", "content": text })
        }
        ConversationMessage::Generated(GeneratedMessage::ToolCall { call_id, tool_name, args }) => {
            json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [{
                    "id": call_id,
                    "type": "function",
                    "function": { "name": tool_name, "arguments": args.to_string() }
                }]
            })
        }
        ConversationMessage::Generated(GeneratedMessage::ToolResult { call_id, output, .. }) => {
            json!({ "role": "tool", "tool_call_id": call_id, "content": output })
        }
    }
}

/// Classify the first choice of a chat-completions response.
///
/// Text becomes `AssistantText` and each tool call becomes a `ToolCall`, in
/// that order. `reasoning_content`, when present, is returned separately.
pub fn parse_completion(json: &Value) -> Result<GenerationResponse, ModelError> {
    let message = json
        .pointer("/choices/0/message")
        .ok_or_else(|| ModelError::invalid_response("response has no choices[0].message"))?;

    let mut messages = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            messages.push(GeneratedMessage::text(text.trim()));
        }
    }

    for call in message.get("tool_calls").and_then(Value::as_array).into_iter().flatten() {
        let name = call
            .pointer("/function/name")
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::invalid_response("tool call without a function name"))?;
        let args = match call.pointer("/function/arguments") {
            Some(Value::String(raw)) if raw.trim().is_empty() => Value::Object(Map::new()),
            Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|e| {
                ModelError::invalid_response(format!("arguments for '{name}' are not JSON: {e}"))
            })?,
            Some(other) => other.clone(),
            None => Value::Object(Map::new()),
        };

        let tool_call = match call.get("id").and_then(Value::as_str) {
            Some(id) => GeneratedMessage::ToolCall {
                call_id: id.to_string(),
                tool_name: name.to_string(),
                args,
            },
            None => GeneratedMessage::tool_call(name, args),
        };
        messages.push(tool_call);
    }

    let reasoning = message
        .get("reasoning_content")
        .and_then(Value::as_str)
        .filter(|r| !r.trim().is_empty())
        .map(str::to_string);

    Ok(GenerationResponse { messages, reasoning })
}
