//! Generation engine trait — the abstraction over text generators.
//!
//! An engine holds a fixed-size resident context (a KV cache for local models).
//! The chat loop submits prompts incrementally, accounts for every unit it
//! feeds in, and asks the engine to drop its oldest units when a turn would
//! overflow the window. Tokenization is engine-defined; the loop only needs
//! monotonic, evictable unit accounting.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EngineError;

/// Fragments of generated text, delivered in order.
///
/// The stream ends when the sender is dropped. Dropping the receiver tells
/// the engine to stop generating.
pub type FragmentStream = mpsc::Receiver<Result<String, EngineError>>;

/// A single generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Text to append to the resident context before generating.
    pub prompt: String,

    /// Upper bound on generated units for this turn.
    pub max_units: usize,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_units: usize) -> Self {
        Self {
            prompt: prompt.into(),
            max_units,
        }
    }
}

/// The generation engine contract.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Engine name for logs (e.g., "local", "scripted").
    fn name(&self) -> &str;

    /// Total units the resident context can hold.
    fn capacity(&self) -> usize;

    /// Units `text` would occupy once submitted.
    fn count_units(&self, text: &str) -> std::result::Result<usize, EngineError>;

    /// Units currently resident, when the engine tracks them itself.
    fn resident_units(&self) -> Option<usize> {
        None
    }

    /// Submit `request.prompt` and stream the generated turn.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<FragmentStream, EngineError>;

    /// Drop the `units` oldest resident units.
    async fn evict_oldest(&self, units: usize) -> std::result::Result<(), EngineError>;

    /// Clear the resident context entirely.
    async fn reset(&self) -> std::result::Result<(), EngineError>;
}

/// Estimate the unit count for a string.
///
/// Heuristic: 1 unit ≈ 4 bytes, rounded up. Used by engines that have no
/// tokenizer of their own.
pub fn estimate_units(text: &str) -> usize {
    text.len().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_units(""), 0);
    }

    #[test]
    fn four_bytes_is_one_unit() {
        assert_eq!(estimate_units("test"), 1);
    }

    #[test]
    fn five_bytes_rounds_up() {
        assert_eq!(estimate_units("hello"), 2);
    }

    #[test]
    fn hundred_bytes() {
        assert_eq!(estimate_units(&"a".repeat(100)), 25);
    }
}
