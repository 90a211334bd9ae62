//! Generation engine implementations for toolchat.
//!
//! - [`ScriptedEngine`] replays canned turns (tests, demos, offline runs)
//! - `LocalEngine` runs a GGUF model with Candle (feature `local`)

pub mod scripted;

#[cfg(feature = "local")]
pub mod local;

pub use scripted::{ScriptedEngine, ScriptedTurn};

#[cfg(feature = "local")]
pub use local::{LocalEngine, LocalEngineOptions};
