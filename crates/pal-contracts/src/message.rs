//! Conversation message types.
//!
//! Model output is classified into an explicit `GeneratedMessage` variant at
//! parse time, so nothing downstream checks for optional fields to find out
//! whether a message is a tool call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The conversational role a message plays when replayed to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A message produced by the model (or by executing one of its tool calls).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneratedMessage {
    /// Free-form assistant text: reasoning, narration, or the skip notice.
    AssistantText { text: String },

    /// A request to invoke a named tool with structured arguments.
    ToolCall {
        call_id: String,
        tool_name: String,
        args: Value,
    },

    /// The outcome of executing a tool call, as short text.
    ToolResult {
        call_id: String,
        tool_name: String,
        output: String,
    },
}

impl GeneratedMessage {
    /// Build an assistant text message.
    pub fn text(text: impl Into<String>) -> Self {
        GeneratedMessage::AssistantText { text: text.into() }
    }

    /// Build a tool call with a freshly generated call id.
    pub fn tool_call(tool_name: impl Into<String>, args: Value) -> Self {
        GeneratedMessage::ToolCall {
            call_id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            tool_name: tool_name.into(),
            args,
        }
    }

    /// Role of this message when replayed as conversation context.
    pub fn role(&self) -> Role {
        match self {
            GeneratedMessage::AssistantText { .. } | GeneratedMessage::ToolCall { .. } => {
                Role::Assistant
            }
            GeneratedMessage::ToolResult { .. } => Role::Tool,
        }
    }
}

/// One entry of an agent's conversation history.
///
/// Histories are append-only; insertion order is conversation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMessage {
    /// Context supplied to the model, typically a world observation.
    User(String),
    /// Anything the model produced during a step.
    Generated(GeneratedMessage),
}

impl ConversationMessage {
    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        ConversationMessage::User(content.into())
    }

    pub fn role(&self) -> Role {
        match self {
            ConversationMessage::User(_) => Role::User,
            ConversationMessage::Generated(m) => m.role(),
        }
    }

    /// Text content of the message, serializing structured payloads to JSON.
    pub fn content_text(&self) -> String {
        match self {
            ConversationMessage::User(content) => content.clone(),
            ConversationMessage::Generated(GeneratedMessage::AssistantText { text }) => {
                text.clone()
            }
            ConversationMessage::Generated(GeneratedMessage::ToolCall { args, .. }) => {
                args.to_string()
            }
            ConversationMessage::Generated(GeneratedMessage::ToolResult { output, .. }) => {
                output.clone()
            }
        }
    }
}

impl From<GeneratedMessage> for ConversationMessage {
    fn from(message: GeneratedMessage) -> Self {
        ConversationMessage::Generated(message)
    }
}
