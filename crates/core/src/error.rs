//! Error types for the toolchat domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own enum; callers convert at their edge.

use thiserror::Error;

// --- Bounded context errors ---

/// Failures raised by a generation engine. Fatal to the current turn only.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    #[error("Model not loaded: {0}")]
    NotLoaded(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Context overflow: need {needed} units, capacity is {capacity}")]
    ContextOverflow { needed: usize, capacity: usize },

    #[error("Generation stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Engine script exhausted after {turns} turns")]
    Exhausted { turns: usize },
}

/// Failures raised while dispatching a tool.
///
/// These never escape the registry: `ToolRegistry::dispatch` folds every
/// variant into a failed `ToolOutcome`.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Tool panicked: {tool_name}: {reason}")]
    Panicked { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failures from a tool-call log backend.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}
