//! # toolchat core
//!
//! Domain types, traits, and error definitions for the toolchat agent runtime.
//! This crate has no framework dependencies; it defines the domain model
//! that the other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the chat loop is a trait here:
//! - [`GenerationEngine`] produces text for a rendered prompt
//! - [`ToolHandler`] runs one named capability
//! - [`ToolCallLog`] persists dispatched tool calls
//!
//! Implementations live in their own crates, so tests can swap in
//! scripted engines and in-memory logs.

pub mod engine;
pub mod error;
pub mod journal;
pub mod message;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use engine::{FragmentStream, GenerationEngine, GenerationRequest, estimate_units};
pub use error::{EngineError, LogError, ToolError};
pub use journal::{ToolCallLog, ToolCallRecord};
pub use message::{Message, Role, SessionId};
pub use tool::{ToolHandler, ToolInvocation, ToolOutcome, ToolRegistry, Typed, TypedTool};
