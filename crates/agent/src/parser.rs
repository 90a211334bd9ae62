//! Tool-call detection in generated text.
//!
//! Two shapes are accepted:
//!
//! - a single call: `{"tool_name": "get_profile", "parameters": {}}`
//! - a batch: `[{"name": "list_messages", "arguments": {"max_results": 2}}, ...]`
//!
//! Anything before the last reasoning close marker is ignored, and so is
//! prose around the JSON. Parsing is total: text that is not a tool call
//! yields `None`, never an error or a panic.

use serde_json::Value;
use toolchat_core::tool::{Arguments, ToolInvocation};
use tracing::debug;

/// Default marker closing a reasoning block.
pub const DEFAULT_REASONING_CLOSE: &str = "</think>";

/// The tool-call shapes, as found in the text.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallShape {
    /// `{"tool_name": ..., "parameters": {...}}`
    Single {
        tool_name: String,
        parameters: Arguments,
    },

    /// `[{"name": ..., "arguments": {...}}, ...]`
    Batch(Vec<(String, Arguments)>),
}

impl ToolCallShape {
    /// Classify a parsed JSON value.
    pub fn classify(value: Value) -> Option<Self> {
        match value {
            Value::Object(mut object) => {
                if let Some(name) = object.get("tool_name") {
                    let tool_name = name.as_str()?.to_string();
                    let parameters = take_object(&mut object, "parameters");
                    Some(Self::Single {
                        tool_name,
                        parameters,
                    })
                } else {
                    // A bare batch item counts as a batch of one.
                    Some(Self::Batch(vec![batch_item(object)?]))
                }
            }
            Value::Array(items) => {
                let mut calls = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(object) => calls.push(batch_item(object)?),
                        other => debug!(item = %other, "Skipping non-object batch item"),
                    }
                }
                if calls.is_empty() {
                    None
                } else {
                    Some(Self::Batch(calls))
                }
            }
            _ => None,
        }
    }

    pub fn into_invocations(self) -> Vec<ToolInvocation> {
        match self {
            Self::Single {
                tool_name,
                parameters,
            } => vec![ToolInvocation::new(tool_name, parameters)],
            Self::Batch(calls) => calls
                .into_iter()
                .map(|(name, arguments)| ToolInvocation::new(name, arguments))
                .collect(),
        }
    }
}

fn batch_item(mut object: serde_json::Map<String, Value>) -> Option<(String, Arguments)> {
    let name = object.get("name")?.as_str()?.to_string();
    Some((name, take_object(&mut object, "arguments")))
}

/// Missing or non-object → empty map.
fn take_object(object: &mut serde_json::Map<String, Value>, key: &str) -> Arguments {
    match object.remove(key) {
        Some(Value::Object(map)) => map,
        _ => Arguments::new(),
    }
}

/// Finds tool calls in completed turns.
#[derive(Debug, Clone)]
pub struct ToolCallParser {
    reasoning_close: String,
}

impl Default for ToolCallParser {
    fn default() -> Self {
        Self::new(DEFAULT_REASONING_CLOSE)
    }
}

impl ToolCallParser {
    pub fn new(reasoning_close: impl Into<String>) -> Self {
        Self {
            reasoning_close: reasoning_close.into(),
        }
    }

    /// The invocations in `text`, in order, or `None` for plain text.
    pub fn parse(&self, text: &str) -> Option<Vec<ToolInvocation>> {
        let candidate = self.candidate(text)?;
        let value: Value = match serde_json::from_str(candidate) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Braced text is not valid JSON");
                return None;
            }
        };
        let invocations = ToolCallShape::classify(value)?.into_invocations();
        debug!(count = invocations.len(), "Tool calls detected");
        Some(invocations)
    }

    /// The JSON slice to try: first `{` to last `}`, widened to the
    /// enclosing brackets when the call list is an array.
    fn candidate<'a>(&self, text: &'a str) -> Option<&'a str> {
        let body = match (self.reasoning_close.is_empty(), text.rfind(&self.reasoning_close)) {
            (false, Some(at)) => &text[at + self.reasoning_close.len()..],
            _ => text,
        };

        let start = body.find('{')?;
        let end = body.rfind('}')?;
        if end < start {
            return None;
        }

        let before = body[..start].trim_end();
        let after = &body[end + 1..];
        let after_trimmed = after.trim_start();
        if before.ends_with('[') && after_trimmed.starts_with(']') {
            let open = before.len() - 1;
            let close = end + 1 + (after.len() - after_trimmed.len());
            return Some(&body[open..=close]);
        }

        Some(&body[start..=end])
    }
}
