//! Conversation session — the ordered message log and its rendering.
//!
//! The session keeps the full transcript as a string that grows by one
//! template segment per appended message, plus a render marker: the byte
//! offset up to which the engine already holds the transcript. Incremental
//! renders return only what lies past the marker.
//!
//! The transcript covers a window of the history. Sliding the window drops
//! the oldest messages from what the engine is given; the system prompt and
//! the full history in [`ConversationSession::messages`] are unaffected.

use toolchat_core::message::{Message, Role};
use tracing::debug;

use crate::template::ChatTemplate;

#[derive(Debug, Clone)]
pub struct ConversationSession {
    template: ChatTemplate,
    system_prompt: Option<String>,
    messages: Vec<Message>,

    /// Concatenated segments of the system prompt and every message.
    transcript: String,

    /// Transcript bytes the engine has already been given.
    marker: usize,

    /// Index of the oldest message still rendered.
    window_start: usize,
}

impl ConversationSession {
    pub fn new(template: ChatTemplate) -> Self {
        Self {
            template,
            system_prompt: None,
            messages: Vec::new(),
            transcript: String::new(),
            marker: 0,
            window_start: 0,
        }
    }

    pub fn with_system_prompt(template: ChatTemplate, system_prompt: impl Into<String>) -> Self {
        let mut session = Self::new(template);
        session.append_system_prompt(system_prompt);
        session
    }

    pub fn template(&self) -> ChatTemplate {
        self.template
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Set or replace the system prompt.
    ///
    /// The prompt sits at the head of the transcript, so replacing it after
    /// anything was rendered invalidates the marker.
    pub fn append_system_prompt(&mut self, text: impl Into<String>) {
        self.system_prompt = Some(text.into());
        self.rebuild();
        if self.marker > 0 {
            debug!("System prompt replaced after render, next render is full");
            self.marker = 0;
        }
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.push(Message::user(text));
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.push(Message::assistant(text));
    }

    pub fn append_tool(&mut self, text: impl Into<String>) {
        self.push(Message::tool(text));
    }

    /// A System message in the history (notices, not the system prompt).
    pub fn append_system(&mut self, text: impl Into<String>) {
        self.push(Message::system(text));
    }

    /// Append an assistant turn the engine generated itself.
    ///
    /// The engine already holds the cue and the content, so the marker moves
    /// to just before the turn terminator.
    pub fn append_generated(&mut self, text: impl Into<String>) {
        self.push(Message::assistant(text));
        self.marker = self.transcript.len() - self.template.turn_terminator().len();
    }

    /// Render the prompt and advance the marker.
    ///
    /// `new_turn_only` returns the transcript past the marker; otherwise the
    /// whole transcript. The generation cue is not included.
    pub fn render_prompt(&mut self, new_turn_only: bool) -> String {
        let rendered = self.pending_prompt(new_turn_only).to_string();
        self.mark_rendered();
        rendered
    }

    /// What [`render_prompt`](Self::render_prompt) would return, without
    /// moving the marker.
    pub fn pending_prompt(&self, new_turn_only: bool) -> &str {
        let start = if new_turn_only {
            self.marker.min(self.transcript.len())
        } else {
            0
        };
        &self.transcript[start..]
    }

    /// Record that the engine now holds the whole transcript.
    pub fn mark_rendered(&mut self) {
        self.marker = self.transcript.len();
    }

    /// Whether the next incremental render starts from the system prompt.
    pub fn renders_from_start(&self) -> bool {
        self.marker == 0
    }

    /// Make the next incremental render re-submit everything.
    pub fn invalidate_render(&mut self) {
        self.marker = 0;
    }

    /// The messages the transcript currently covers.
    pub fn window(&self) -> &[Message] {
        &self.messages[self.window_start..]
    }

    /// Drop up to `count` of the oldest messages from the transcript.
    ///
    /// The newest message is never dropped. Returns how many were dropped;
    /// when any were, the next render is full.
    pub fn slide_window(&mut self, count: usize) -> usize {
        let droppable = self.messages.len().saturating_sub(self.window_start + 1);
        let dropped = count.min(droppable);
        if dropped > 0 {
            self.window_start += dropped;
            self.rebuild();
            self.marker = 0;
            debug!(dropped, window_start = self.window_start, "History window slid");
        }
        dropped
    }

    /// Clear the history; the system prompt stays.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.window_start = 0;
        self.rebuild();
        self.marker = 0;
    }

    /// History without the system prompt, in order.
    pub fn history(&self) -> &[Message] {
        &self.messages
    }

    /// The system prompt (if any) followed by the history.
    pub fn messages(&self) -> Vec<Message> {
        let mut all = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            all.push(Message::system(prompt.clone()));
        }
        all.extend(self.messages.iter().cloned());
        all
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, message: Message) {
        self.transcript
            .push_str(&self.template.segment(message.role, &message.content));
        self.messages.push(message);
    }

    fn rebuild(&mut self) {
        let mut transcript = String::new();
        if let Some(prompt) = &self.system_prompt {
            transcript.push_str(&self.template.segment(Role::System, prompt));
        }
        for message in &self.messages[self.window_start..] {
            transcript.push_str(&self.template.segment(message.role, &message.content));
        }
        self.transcript = transcript;
    }
}
