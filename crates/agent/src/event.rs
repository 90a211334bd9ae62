//! Chat-level streaming events.
//!
//! `ChatEvent` is what the orchestrator pushes into the caller's sink while
//! a message is being processed. Serialized with a `type` tag so the events
//! can be written out as JSON lines.

use serde::{Deserialize, Serialize};

/// Events emitted during a `send`:
/// - `token`       — a fragment of generated text
/// - `tool_call`   — a parsed invocation is about to run
/// - `tool_result` — the invocation finished
/// - `done`        — the reply is complete
/// - `error`       — the send failed or was cancelled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Token { content: String },

    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },

    ToolResult {
        name: String,
        output: String,
        succeeded: bool,
    },

    Done {
        session_id: String,
        turns: usize,
        tool_calls_made: usize,
        hit_iteration_limit: bool,
    },

    Error { message: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
