//! The chat loop — the heart of toolchat.
//!
//! The orchestrator follows a **Generate → Parse → Dispatch** cycle:
//!
//! 1. **Receive** a user message and append it to the session
//! 2. **Render** the new part of the transcript and reserve context for it
//! 3. **Generate** a turn, streaming fragments to the caller's sink
//! 4. **If tool calls**: dispatch them, append the results, loop back to step 2
//! 5. **If text**: return it to the caller
//!
//! The loop continues until the engine answers in plain text or the
//! tool-iteration limit is reached.

pub mod budget;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod parser;
pub mod session;
pub mod template;

pub use budget::{ContextBudgetManager, EvictionPlan};
pub use error::AgentError;
pub use event::ChatEvent;
pub use orchestrator::{
    ChatOrchestrator, ChatReply, ITERATION_LIMIT_NOTICE, OrchestratorConfig, OrchestratorPhase,
};
pub use parser::{ToolCallParser, ToolCallShape};
pub use session::ConversationSession;
pub use template::ChatTemplate;
