//! Scripted engine — replays canned turns instead of running a model.
//!
//! Behaves like a stateful engine: it tracks resident units, refuses
//! prompts that would overflow its capacity, honours eviction and reset,
//! and streams each turn word by word. Tests use it to drive the chat loop
//! deterministically; the CLI uses it for offline demos.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use toolchat_core::engine::{estimate_units, FragmentStream, GenerationEngine, GenerationRequest};
use toolchat_core::error::EngineError;
use tracing::debug;

/// One canned turn.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Stream this text, then end the turn.
    Text(String),

    /// Stream `partial`, then fail with `error`.
    FailAfter { partial: String, error: EngineError },
}

impl From<&str> for ScriptedTurn {
    fn from(text: &str) -> Self {
        ScriptedTurn::Text(text.to_string())
    }
}

#[derive(Default)]
struct ScriptState {
    turns: VecDeque<ScriptedTurn>,
    repeat: Option<ScriptedTurn>,
    served: usize,
    prompts: Vec<String>,
    resident: usize,
    evicted: usize,
    resets: usize,
}

/// An engine that answers from a script.
pub struct ScriptedEngine {
    state: Arc<Mutex<ScriptState>>,
    capacity: usize,
    fragment_delay: Option<Duration>,
}

impl ScriptedEngine {
    pub fn new(turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                turns: turns.into_iter().collect(),
                ..ScriptState::default()
            })),
            capacity: 4096,
            fragment_delay: None,
        }
    }

    /// Plain-text turns, served in order.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| ScriptedTurn::Text(t.into())))
    }

    /// An engine that answers every prompt with `text`, forever.
    pub fn repeating(text: impl Into<String>) -> Self {
        let engine = Self::new(Vec::new());
        if let Ok(mut state) = engine.state.lock() {
            state.repeat = Some(ScriptedTurn::Text(text.into()));
        }
        engine
    }

    /// Load turns from a file holding one JSON string per line.
    pub fn from_jsonl(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::NotLoaded(format!("{}: {e}", path.display())))?;

        let mut turns = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let text: String = serde_json::from_str(line).map_err(|e| {
                EngineError::NotLoaded(format!("{}:{}: {e}", path.display(), lineno + 1))
            })?;
            turns.push(ScriptedTurn::Text(text));
        }
        debug!(turns = turns.len(), path = %path.display(), "Loaded engine script");
        Ok(Self::new(turns))
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Pause between fragments (lets tests cancel mid-turn).
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    /// Every prompt submitted so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.lock().map(|s| s.prompts.clone()).unwrap_or_default()
    }

    /// Number of turns served.
    pub fn turns_served(&self) -> usize {
        self.lock().map(|s| s.served).unwrap_or(0)
    }

    /// Total units dropped through `evict_oldest`.
    pub fn evicted_units(&self) -> usize {
        self.lock().map(|s| s.evicted).unwrap_or(0)
    }

    pub fn resets(&self) -> usize {
        self.lock().map(|s| s.resets).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ScriptState>, EngineError> {
        self.state
            .lock()
            .map_err(|_| EngineError::StreamInterrupted("script state poisoned".into()))
    }
}

/// Split a turn into word-sized fragments, whitespace kept attached.
fn fragments(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl GenerationEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn count_units(&self, text: &str) -> Result<usize, EngineError> {
        Ok(estimate_units(text))
    }

    fn resident_units(&self) -> Option<usize> {
        self.lock().ok().map(|s| s.resident)
    }

    async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream, EngineError> {
        let prompt_units = estimate_units(&request.prompt);

        let turn = {
            let mut state = self.lock()?;
            if state.resident + prompt_units > self.capacity {
                return Err(EngineError::ContextOverflow {
                    needed: state.resident + prompt_units,
                    capacity: self.capacity,
                });
            }
            let turn = match state.turns.pop_front().or_else(|| state.repeat.clone()) {
                Some(turn) => turn,
                None => return Err(EngineError::Exhausted { turns: state.served }),
            };
            state.prompts.push(request.prompt);
            state.resident += prompt_units;
            state.served += 1;
            turn
        };

        let (text, failure) = match turn {
            ScriptedTurn::Text(text) => (text, None),
            ScriptedTurn::FailAfter { partial, error } => (partial, Some(error)),
        };

        let (tx, rx) = mpsc::channel(16);
        let state = Arc::clone(&self.state);
        let capacity = self.capacity;
        let max_units = request.max_units;
        let delay = self.fragment_delay;

        tokio::spawn(async move {
            let mut sent = String::new();
            for fragment in fragments(&text) {
                let projected = estimate_units(&format!("{sent}{fragment}"));
                let resident = state.lock().map(|s| s.resident).unwrap_or(capacity);
                if projected > max_units || resident + projected > capacity {
                    debug!(units = projected, "Scripted turn hit its unit limit");
                    break;
                }
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(fragment.clone())).await.is_err() {
                    break;
                }
                sent.push_str(&fragment);
            }

            if let Ok(mut s) = state.lock() {
                s.resident = (s.resident + estimate_units(&sent)).min(capacity);
            }

            if let Some(error) = failure {
                let _ = tx.send(Err(error)).await;
            }
        });

        Ok(rx)
    }

    async fn evict_oldest(&self, units: usize) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        let dropped = units.min(state.resident);
        state.resident -= dropped;
        state.evicted += dropped;
        debug!(units = dropped, resident = state.resident, "Scripted engine evicted");
        Ok(())
    }

    async fn reset(&self) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.resident = 0;
        state.resets += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut rx: FragmentStream) -> (String, Option<EngineError>) {
        let mut text = String::new();
        while let Some(item) = rx.recv().await {
            match item {
                Ok(fragment) => text.push_str(&fragment),
                Err(e) => return (text, Some(e)),
            }
        }
        (text, None)
    }

    #[tokio::test]
    async fn serves_turns_in_order() {
        let engine = ScriptedEngine::from_texts(["first answer", "second answer"]);
        let (a, _) = collect(engine.generate(GenerationRequest::new("p1", 64)).await.unwrap()).await;
        let (b, _) = collect(engine.generate(GenerationRequest::new("p2", 64)).await.unwrap()).await;
        assert_eq!(a, "first answer");
        assert_eq!(b, "second answer");
        assert_eq!(engine.prompts(), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let engine = ScriptedEngine::from_texts(["only"]);
        let _ = collect(engine.generate(GenerationRequest::new("p", 64)).await.unwrap()).await;
        let err = engine.generate(GenerationRequest::new("p", 64)).await.unwrap_err();
        assert!(matches!(err, EngineError::Exhausted { turns: 1 }));
    }

    #[tokio::test]
    async fn repeating_never_runs_out() {
        let engine = ScriptedEngine::repeating("again");
        for _ in 0..10 {
            let (text, _) = collect(engine.generate(GenerationRequest::new("", 64)).await.unwrap()).await;
            assert_eq!(text, "again");
        }
    }

    #[tokio::test]
    async fn tracks_resident_units() {
        let engine = ScriptedEngine::from_texts(["abcdefgh"]);
        let _ = collect(engine.generate(GenerationRequest::new("1234", 64)).await.unwrap()).await;
        assert_eq!(engine.resident_units(), Some(3));

        engine.evict_oldest(2).await.unwrap();
        assert_eq!(engine.resident_units(), Some(1));
        assert_eq!(engine.evicted_units(), 2);

        engine.reset().await.unwrap();
        assert_eq!(engine.resident_units(), Some(0));
    }

    #[tokio::test]
    async fn overflowing_prompt_is_rejected() {
        let engine = ScriptedEngine::from_texts(["x"]).with_capacity(4);
        let err = engine
            .generate(GenerationRequest::new("a prompt far longer than four units", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ContextOverflow { capacity: 4, .. }));
    }

    #[tokio::test]
    async fn max_units_truncates_turn() {
        let engine = ScriptedEngine::from_texts(["one two three four five six"]);
        let (text, _) = collect(engine.generate(GenerationRequest::new("", 2)).await.unwrap()).await;
        assert_eq!(text, "one two ");
    }

    #[tokio::test]
    async fn fail_after_streams_partial_then_errors() {
        let engine = ScriptedEngine::new([ScriptedTurn::FailAfter {
            partial: "half a ".into(),
            error: EngineError::Decode("bad token".into()),
        }]);
        let (text, err) = collect(engine.generate(GenerationRequest::new("", 64)).await.unwrap()).await;
        assert_eq!(text, "half a ");
        assert!(matches!(err, Some(EngineError::Decode(_))));
    }

    #[test]
    fn loads_jsonl_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("turns.jsonl");
        std::fs::write(
            &path,
            "\"{\\\"tool_name\\\": \\\"get_profile\\\"}\"\n\n\"Done.\"\n",
        )
        .unwrap();
        let engine = ScriptedEngine::from_jsonl(&path).unwrap();
        assert_eq!(engine.lock().unwrap().turns.len(), 2);
    }

    #[test]
    fn bad_jsonl_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("turns.jsonl");
        std::fs::write(&path, "\"ok\"\nnot json\n").unwrap();
        let err = ScriptedEngine::from_jsonl(&path).err().unwrap();
        assert!(err.to_string().contains(":2:"));
    }
}
