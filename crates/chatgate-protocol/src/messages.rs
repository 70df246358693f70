//! Chat message and completion types.
//!
//! `Message` is the display-side unit of a conversation; its position in the
//! list is its display order. `CompletionChunk` and `Completion` mirror the
//! OpenAI-compatible provider payloads the relay passes through.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Agent-side activity such as tool calls.
    Agent,
    System,
}

/// Content kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
    /// Standalone tool-call message.
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Raw JSON arguments, accumulated fragment by fragment while streaming.
    #[serde(default)]
    pub arguments: String,
}

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    #[serde(default)]
    pub content: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ContentKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            kind: Some(ContentKind::Text),
            reasoning: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            ..Self::user(content)
        }
    }

    pub fn assistant(content: impl Into<String>, reasoning: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            kind: Some(ContentKind::Text),
            reasoning,
            tool_calls: None,
        }
    }

    /// A standalone agent message carrying a single tool call.
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: String::new(),
            kind: Some(ContentKind::Tool),
            reasoning: None,
            tool_calls: Some(vec![ToolCall {
                id: id.into(),
                name: name.into(),
                arguments: arguments.into(),
            }]),
        }
    }

    pub fn is_tool(&self) -> bool {
        self.kind == Some(ContentKind::Tool)
    }

    /// Id of the first tool call carried by this message.
    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_calls
            .as_ref()
            .and_then(|calls| calls.first())
            .map(|call| call.id.as_str())
    }
}

/// Chat request sent by clients to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            messages,
            stream: true,
        }
    }
}

// ============================================================================
// Streamed completion chunks
// ============================================================================

/// One `data:` frame of a streamed completion.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    /// Set by providers that attribute content to a running tool call.
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

impl Delta {
    /// Reasoning text, whichever field the provider used.
    pub fn reasoning_text(&self) -> Option<&str> {
        self.reasoning_content
            .as_deref()
            .or(self.reasoning.as_deref())
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .is_some_and(|calls| !calls.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// ============================================================================
// Non-streamed completion
// ============================================================================

/// Full (non-streamed) provider completion.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub message: CompletionMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionToolCall {
    pub id: String,
    #[serde(default)]
    pub function: FunctionDelta,
}
