//! Default system prompt.

use serde_json::json;
use toolchat_core::tool::ToolRegistry;

const PREAMBLE: &str = "You are an AI assistant. Tools are available.
When calling a tool, respond ONLY with a single JSON object: {\"tool_name\": \"...\", \"parameters\": {...}}.
No other text, explanations, or markdown.";

const FOLLOW_UP: &str = "Tool results will be provided via role \"tool\".
Based on the result:
- Respond to the user in plain text.
- Call another tool (as JSON).
- Ask for clarification.
If no tool is needed, respond directly. If a tool call errors, inform the user or try an alternative.";

/// Build a system prompt listing every tool in `registry`.
///
/// Each tool is one JSON line, so the model sees names and parameter
/// hints in the same shape it is asked to produce.
pub fn default_system_prompt(registry: &ToolRegistry) -> String {
    let mut prompt = String::from(PREAMBLE);
    prompt.push_str("\n\n");

    if registry.is_empty() {
        prompt.push_str("No tools are currently registered.\n");
    } else {
        prompt.push_str("Available tools:\n");
        for tool in registry.descriptions() {
            let line = json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            });
            prompt.push_str("- ");
            prompt.push_str(&line.to_string());
            prompt.push('\n');
        }
    }

    prompt.push('\n');
    prompt.push_str(FOLLOW_UP);
    prompt.push('\n');
    prompt
}
