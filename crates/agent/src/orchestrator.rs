//! The chat orchestrator — multi-turn generation with tool dispatch.

use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use toolchat_core::engine::{GenerationEngine, GenerationRequest};
use toolchat_core::error::EngineError;
use toolchat_core::journal::ToolCallLog;
use toolchat_core::message::{Message, SessionId};
use toolchat_core::tool::{ToolInvocation, ToolOutcome, ToolRegistry};
use toolchat_memory::NoopToolCallLog;
use tracing::{debug, info, warn};

use crate::budget::ContextBudgetManager;
use crate::error::AgentError;
use crate::event::ChatEvent;
use crate::parser::ToolCallParser;
use crate::session::ConversationSession;
use crate::template::ChatTemplate;

/// Appended when a send ends because every allowed turn was a tool call.
pub const ITERATION_LIMIT_NOTICE: &str =
    "[Error: Exceeded maximum tool iterations. Last response was a tool call.]";

/// Chat loop settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Generated turns allowed per send
    pub max_tool_iterations: usize,

    /// Units reserved for, and the generation limit of, each turn
    pub max_response_units: usize,

    /// A turn stops streaming once it reaches this many characters
    pub max_response_chars: usize,

    /// Submit only new transcript text (stateful engines) or the whole
    /// transcript after an engine reset (stateless engines)
    pub incremental_prompts: bool,

    /// Per-dispatch timeout; `None` falls back to the registry default
    pub tool_timeout: Option<Duration>,

    pub reasoning_close: String,
    pub eviction_margin_divisor: usize,
    pub template: ChatTemplate,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 5,
            max_response_units: 512,
            max_response_chars: 1024,
            incremental_prompts: true,
            tool_timeout: None,
            reasoning_close: crate::parser::DEFAULT_REASONING_CLOSE.to_string(),
            eviction_margin_divisor: crate::budget::DEFAULT_MARGIN_DIVISOR,
            template: ChatTemplate::default(),
        }
    }
}

/// Where the orchestrator is within a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OrchestratorPhase {
    Idle = 0,
    AwaitingGeneration = 1,
    Parsing = 2,
    Dispatching = 3,
    Done = 4,
}

impl OrchestratorPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::AwaitingGeneration,
            2 => Self::Parsing,
            3 => Self::Dispatching,
            4 => Self::Done,
            _ => Self::Idle,
        }
    }
}

/// The result of a completed send.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    /// Final turn text (with the iteration notice when the limit was hit)
    pub text: String,

    /// Turns generated
    pub turns: usize,

    /// Tool invocations dispatched
    pub tool_calls: usize,

    /// Every dispatch outcome, in order
    pub outcomes: Vec<ToolOutcome>,

    pub hit_iteration_limit: bool,
}

struct SessionState {
    session: ConversationSession,
    budget: ContextBudgetManager,
}

/// How a single generated turn failed.
enum TurnFailure {
    Cancelled,
    Engine { source: EngineError, partial: String },
}

impl TurnFailure {
    fn engine(source: EngineError) -> Self {
        Self::Engine {
            source,
            partial: String::new(),
        }
    }
}

impl From<TurnFailure> for AgentError {
    fn from(failure: TurnFailure) -> Self {
        match failure {
            TurnFailure::Cancelled => AgentError::Cancelled,
            TurnFailure::Engine { source, partial } => AgentError::Engine { source, partial },
        }
    }
}

/// Clears the streaming flag on every exit path of a send.
struct StreamingGuard<'a> {
    streaming: &'a AtomicBool,
    phase: &'a AtomicU8,
}

impl Drop for StreamingGuard<'_> {
    fn drop(&mut self) {
        if self.phase.load(Ordering::SeqCst) != OrchestratorPhase::Done as u8 {
            self.phase.store(OrchestratorPhase::Idle as u8, Ordering::SeqCst);
        }
        self.streaming.store(false, Ordering::SeqCst);
    }
}

/// Runs the Generate → Parse → Dispatch loop over one conversation.
///
/// One send at a time: a concurrent `send` is rejected with
/// [`AgentError::Busy`] rather than queued.
pub struct ChatOrchestrator {
    engine: Arc<dyn GenerationEngine>,
    tools: Arc<ToolRegistry>,
    log: Arc<dyn ToolCallLog>,
    parser: ToolCallParser,
    config: OrchestratorConfig,
    state: Mutex<SessionState>,
    streaming: AtomicBool,
    phase: AtomicU8,
    session_id: SessionId,
}

impl ChatOrchestrator {
    pub fn new(
        engine: Arc<dyn GenerationEngine>,
        tools: Arc<ToolRegistry>,
        mut config: OrchestratorConfig,
    ) -> Self {
        config.max_tool_iterations = config.max_tool_iterations.max(1);
        let budget = ContextBudgetManager::new(engine.capacity())
            .with_margin_divisor(config.eviction_margin_divisor);
        Self {
            engine,
            tools,
            log: Arc::new(NoopToolCallLog),
            parser: ToolCallParser::new(config.reasoning_close.clone()),
            state: Mutex::new(SessionState {
                session: ConversationSession::new(config.template),
                budget,
            }),
            config,
            streaming: AtomicBool::new(false),
            phase: AtomicU8::new(OrchestratorPhase::Idle as u8),
            session_id: SessionId::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.state.get_mut().session.append_system_prompt(prompt);
        self
    }

    /// Record every dispatch in `log`.
    pub fn with_log(mut self, log: Arc<dyn ToolCallLog>) -> Self {
        self.log = log;
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn phase(&self) -> OrchestratorPhase {
        OrchestratorPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Whether a send is in progress.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// The system prompt followed by the history.
    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.session.messages()
    }

    /// `(consumed, capacity)` of the context budget.
    pub async fn budget_usage(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.budget.consumed(), state.budget.capacity())
    }

    /// Process one user message with no sink and no cancellation.
    pub async fn send(&self, user_message: &str) -> Result<ChatReply, AgentError> {
        self.send_with(user_message, None, &CancellationToken::new())
            .await
    }

    /// Process one user message, streaming events into `sink`.
    ///
    /// `cancel` is checked between fragments. A cancelled turn is dropped:
    /// nothing of it reaches the session, and the engine is reset so the
    /// next send re-submits the whole transcript.
    pub async fn send_with(
        &self,
        user_message: &str,
        sink: Option<&mpsc::Sender<ChatEvent>>,
        cancel: &CancellationToken,
    ) -> Result<ChatReply, AgentError> {
        let _guard = self.begin()?;
        let mut state = self.state.lock().await;
        let SessionState { session, budget } = &mut *state;

        info!(
            session_id = %self.session_id,
            history = session.len(),
            "Processing message"
        );
        session.append_user(user_message);

        let mut turns = 0;
        let mut outcomes: Vec<ToolOutcome> = Vec::new();
        let mut last_turn = String::new();

        while turns < self.config.max_tool_iterations {
            if cancel.is_cancelled() {
                return Err(self.fail(sink, cancel, AgentError::Cancelled).await);
            }

            turns += 1;
            self.set_phase(OrchestratorPhase::AwaitingGeneration);
            debug!(session_id = %self.session_id, iteration = turns, "Chat loop iteration");

            let text = match self.generate_turn(session, budget, sink, cancel).await {
                Ok(text) => text,
                Err(failure) => {
                    self.resync(session, budget).await;
                    return Err(self.fail(sink, cancel, failure.into()).await);
                }
            };
            session.append_generated(text.as_str());

            self.set_phase(OrchestratorPhase::Parsing);
            let Some(invocations) = self.parser.parse(&text) else {
                let reply = ChatReply {
                    text,
                    turns,
                    tool_calls: outcomes.len(),
                    outcomes,
                    hit_iteration_limit: false,
                };
                return Ok(self.finish(sink, cancel, reply).await);
            };

            self.set_phase(OrchestratorPhase::Dispatching);
            for invocation in invocations {
                let outcome = self.dispatch(user_message, invocation, sink, cancel).await;
                session.append_tool(outcome.to_message_text());
                outcomes.push(outcome);
            }
            last_turn = text;
        }

        warn!(
            session_id = %self.session_id,
            iterations = turns,
            "Max tool iterations reached"
        );
        session.append_system(ITERATION_LIMIT_NOTICE);
        let reply = ChatReply {
            text: format!("{last_turn}\n{ITERATION_LIMIT_NOTICE}"),
            turns,
            tool_calls: outcomes.len(),
            outcomes,
            hit_iteration_limit: true,
        };
        Ok(self.finish(sink, cancel, reply).await)
    }

    /// Clear the history, the budget and the engine. The system prompt stays.
    pub async fn reset(&self) -> Result<(), AgentError> {
        let _guard = self.begin()?;
        let mut state = self.state.lock().await;
        state.session.reset();
        state.budget.reset();
        self.engine.reset().await?;
        info!(session_id = %self.session_id, "Session reset");
        Ok(())
    }

    /// Replace the system prompt; the engine starts over from the new transcript.
    pub async fn set_system_prompt(&self, prompt: impl Into<String>) -> Result<(), AgentError> {
        let _guard = self.begin()?;
        let mut state = self.state.lock().await;
        state.session.append_system_prompt(prompt);
        state.session.invalidate_render();
        state.budget.reset();
        self.engine.reset().await?;
        Ok(())
    }

    fn begin(&self) -> Result<StreamingGuard<'_>, AgentError> {
        if self
            .streaming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(session_id = %self.session_id, "Rejecting concurrent send");
            return Err(AgentError::Busy);
        }
        self.set_phase(OrchestratorPhase::Idle);
        Ok(StreamingGuard {
            streaming: &self.streaming,
            phase: &self.phase,
        })
    }

    fn set_phase(&self, phase: OrchestratorPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Render, budget, and stream one turn.
    async fn generate_turn(
        &self,
        session: &mut ConversationSession,
        budget: &mut ContextBudgetManager,
        sink: Option<&mpsc::Sender<ChatEvent>>,
        cancel: &CancellationToken,
    ) -> Result<String, TurnFailure> {
        let incremental = self.config.incremental_prompts;
        if incremental {
            if let Some(resident) = self.engine.resident_units() {
                budget.sync(resident);
            }
        } else {
            self.engine.reset().await.map_err(TurnFailure::engine)?;
            budget.reset();
            session.invalidate_render();
        }

        let limit = budget
            .capacity()
            .saturating_sub(self.config.max_response_units);
        let mut prompt = self.pending_prompt(session);
        let mut prompt_units = self
            .engine
            .count_units(&prompt)
            .map_err(TurnFailure::engine)?;

        if prompt_units > limit && session.renders_from_start() {
            (prompt, prompt_units) = self.fit_window(session, prompt_units, limit)?;
        }
        session.mark_rendered();

        let plan = budget.reserve(prompt_units + self.config.max_response_units);
        if !plan.is_noop() {
            info!(
                discard = plan.discard,
                consumed = budget.consumed(),
                "Evicting oldest context"
            );
            self.engine
                .evict_oldest(plan.discard)
                .await
                .map_err(TurnFailure::engine)?;
            budget.evict(plan.discard);
        }

        let mut stream = self
            .engine
            .generate(GenerationRequest::new(prompt, self.config.max_response_units))
            .await
            .map_err(TurnFailure::engine)?;
        budget.commit(prompt_units);

        let mut text = String::new();
        let mut chars = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(partial_len = text.len(), "Turn cancelled");
                    return Err(TurnFailure::Cancelled);
                }
                next = stream.recv() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    chars += fragment.chars().count();
                    text.push_str(&fragment);
                    emit(sink, cancel, ChatEvent::Token { content: fragment }).await;
                    if chars >= self.config.max_response_chars {
                        debug!(chars, "Turn reached the response length limit");
                        break;
                    }
                }
                Some(Err(source)) => {
                    return Err(TurnFailure::Engine {
                        source,
                        partial: text,
                    });
                }
                None => break,
            }
        }
        drop(stream);

        match self.engine.count_units(&text) {
            Ok(units) => budget.commit(units),
            Err(source) => {
                return Err(TurnFailure::Engine {
                    source,
                    partial: text,
                });
            }
        }
        Ok(text)
    }

    /// The unsent transcript followed by the generation cue.
    fn pending_prompt(&self, session: &ConversationSession) -> String {
        let mut prompt = session.pending_prompt(true).to_string();
        prompt.push_str(session.template().generation_cue());
        prompt
    }

    /// Slide the history window until a full render fits in `limit` units.
    ///
    /// The system prompt and the newest message always stay. If even those
    /// do not fit, the prompt is returned as is and the engine decides.
    fn fit_window(
        &self,
        session: &mut ConversationSession,
        mut prompt_units: usize,
        limit: usize,
    ) -> Result<(String, usize), TurnFailure> {
        let template = session.template();
        loop {
            let mut excess = prompt_units.saturating_sub(limit);
            let mut count = 0;
            let window = session.window();
            for message in &window[..window.len().saturating_sub(1)] {
                if excess == 0 {
                    break;
                }
                let units = self
                    .engine
                    .count_units(&template.segment(message.role, &message.content))
                    .map_err(TurnFailure::engine)?;
                excess = excess.saturating_sub(units);
                count += 1;
            }

            let dropped = session.slide_window(count);
            let prompt = self.pending_prompt(session);
            if dropped == 0 {
                warn!(prompt_units, limit, "Prompt exceeds the context window");
                return Ok((prompt, prompt_units));
            }
            prompt_units = self
                .engine
                .count_units(&prompt)
                .map_err(TurnFailure::engine)?;
            info!(
                dropped,
                window = session.window().len(),
                prompt_units,
                "Dropped oldest history from the prompt"
            );
            if prompt_units <= limit {
                return Ok((prompt, prompt_units));
            }
        }
    }

    async fn dispatch(
        &self,
        prompt: &str,
        invocation: ToolInvocation,
        sink: Option<&mpsc::Sender<ChatEvent>>,
        cancel: &CancellationToken,
    ) -> ToolOutcome {
        let ToolInvocation { name, arguments } = invocation;
        let arguments_json = Value::Object(arguments.clone());

        emit(
            sink,
            cancel,
            ChatEvent::ToolCall {
                name: name.clone(),
                arguments: arguments_json.clone(),
            },
        )
        .await;

        let timeout = self.config.tool_timeout.or(self.tools.default_timeout());
        let outcome = self
            .tools
            .dispatch_with_timeout(&name, arguments, timeout)
            .await;
        info!(tool = %name, succeeded = outcome.succeeded, "Tool dispatched");

        emit(
            sink,
            cancel,
            ChatEvent::ToolResult {
                name: name.clone(),
                output: match &outcome.error_detail {
                    Some(detail) if !outcome.succeeded => detail.clone(),
                    _ => outcome.result_text.clone(),
                },
                succeeded: outcome.succeeded,
            },
        )
        .await;

        let response = if outcome.succeeded {
            serde_json::from_str(&outcome.result_text)
                .unwrap_or_else(|_| Value::String(outcome.result_text.clone()))
        } else {
            json!({ "error": outcome.error_detail })
        };
        if let Err(e) = self
            .log
            .record_tool_call(prompt, &name, &arguments_json, &response)
            .await
        {
            warn!(tool = %name, error = %e, "Failed to record tool call");
        }

        outcome
    }

    /// Bring the engine, budget and render marker back in line after a
    /// turn was abandoned.
    async fn resync(&self, session: &mut ConversationSession, budget: &mut ContextBudgetManager) {
        if let Err(e) = self.engine.reset().await {
            warn!(error = %e, "Engine reset failed");
        }
        budget.reset();
        session.invalidate_render();
    }

    async fn fail(
        &self,
        sink: Option<&mpsc::Sender<ChatEvent>>,
        cancel: &CancellationToken,
        err: AgentError,
    ) -> AgentError {
        warn!(session_id = %self.session_id, error = %err, "Send failed");
        emit(
            sink,
            cancel,
            ChatEvent::Error {
                message: err.to_string(),
            },
        )
        .await;
        err
    }

    async fn finish(
        &self,
        sink: Option<&mpsc::Sender<ChatEvent>>,
        cancel: &CancellationToken,
        reply: ChatReply,
    ) -> ChatReply {
        self.set_phase(OrchestratorPhase::Done);
        info!(
            session_id = %self.session_id,
            turns = reply.turns,
            tool_calls = reply.tool_calls,
            hit_iteration_limit = reply.hit_iteration_limit,
            "Reply complete"
        );
        emit(
            sink,
            cancel,
            ChatEvent::Done {
                session_id: self.session_id.to_string(),
                turns: reply.turns,
                tool_calls_made: reply.tool_calls,
                hit_iteration_limit: reply.hit_iteration_limit,
            },
        )
        .await;
        reply
    }
}

/// Deliver `event` if there is a sink; a closed sink is not an error.
///
/// A full sink waits for room, but gives up once `cancel` fires.
async fn emit(
    sink: Option<&mpsc::Sender<ChatEvent>>,
    cancel: &CancellationToken,
    event: ChatEvent,
) {
    if let Some(tx) = sink {
        tokio::select! {
            biased;
            _ = tx.send(event) => {}
            _ = cancel.cancelled() => {
                debug!("Cancelled while the sink was full, event dropped");
            }
        }
    }
}
