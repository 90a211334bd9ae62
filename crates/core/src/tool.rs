//! Tool handlers and the registry that dispatches to them.
//!
//! Tools are what give the assistant the ability to act: send an email,
//! list a mailbox, trash a message. The engine asks for one by emitting a
//! JSON tool call; the chat loop parses it into a [`ToolInvocation`] and
//! hands it to [`ToolRegistry::dispatch`], which always answers with a
//! [`ToolOutcome`], never an error.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ToolError;

/// Tool arguments as an ordered JSON object.
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// A request, parsed from generated text, to run a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Name of the tool to execute
    pub name: String,

    /// Arguments in the order the engine wrote them
    #[serde(default)]
    pub arguments: Arguments,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// The result of dispatching one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// The tool that was asked for
    pub tool_name: String,

    /// Canonical text of the handler's return value (empty on failure)
    pub result_text: String,

    /// Whether the handler ran and returned a value
    pub succeeded: bool,

    /// Why the dispatch failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ToolOutcome {
    pub fn success(tool_name: impl Into<String>, result_text: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            result_text: result_text.into(),
            succeeded: true,
            error_detail: None,
        }
    }

    pub fn failure(tool_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            result_text: String::new(),
            succeeded: false,
            error_detail: Some(detail.into()),
        }
    }

    /// Text folded back into the conversation as a tool message.
    pub fn to_message_text(&self) -> String {
        if self.succeeded {
            format!("Result from {}: {}", self.tool_name, self.result_text)
        } else {
            format!(
                "Error from {}: {}",
                self.tool_name,
                self.error_detail.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

/// Canonical string form of a handler's return value.
///
/// Strings are used verbatim; everything else becomes compact JSON.
pub fn canonical_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Name, description and parameter hint of a tool, for prompt building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The untyped tool contract.
///
/// Handlers may cross into other runtimes or do network I/O; the registry
/// runs each call on its own task so errors, panics and hangs are contained.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// The name the engine uses to request this tool (e.g., "list_messages").
    fn name(&self) -> &str;

    /// A description of what this tool does (shown to the model).
    fn description(&self) -> &str;

    /// Parameter hint shown to the model, e.g. `{"message_id": "string"}`.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with raw arguments.
    async fn call(&self, arguments: Arguments) -> Result<serde_json::Value, ToolError>;

    fn to_description(&self) -> ToolDescription {
        ToolDescription {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A tool with a declared argument type.
///
/// Raw arguments are deserialized into `Args` before `run` is called, so
/// every tool gets an explicit validation step. Wrap in [`Typed`] to register.
#[async_trait]
pub trait TypedTool: Send + Sync + 'static {
    type Args: DeserializeOwned + Send;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> serde_json::Value;

    async fn run(&self, args: Self::Args) -> Result<serde_json::Value, ToolError>;
}

/// Adapter turning a [`TypedTool`] into a [`ToolHandler`].
pub struct Typed<T>(pub T);

#[async_trait]
impl<T: TypedTool> ToolHandler for Typed<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.0.parameters_schema()
    }

    async fn call(&self, arguments: Arguments) -> Result<serde_json::Value, ToolError> {
        let args: T::Args = serde_json::from_value(serde_json::Value::Object(arguments))
            .map_err(|e| ToolError::InvalidArguments(format!("{}: {e}", self.0.name())))?;
        self.0.run(args).await
    }
}

/// A registry of available tools.
///
/// Registering a name twice replaces the earlier handler (last registration
/// wins); the overwrite is logged.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
    default_timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `timeout` to every [`dispatch`](Self::dispatch) call.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Register `handler` under `name`. Replaces any existing tool with the same name.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        let name = name.into();
        if self.tools.insert(name.clone(), handler).is_some() {
            warn!(tool = %name, "Tool re-registered, previous handler replaced");
        } else {
            debug!(tool = %name, "Tool registered");
        }
    }

    /// Register a handler under its own name.
    pub fn register_tool(&mut self, handler: impl ToolHandler + 'static) {
        let name = handler.name().to_string();
        self.register(name, Arc::new(handler));
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// All registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Descriptions of every tool, sorted by registered name.
    pub fn descriptions(&self) -> Vec<ToolDescription> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                self.tools.get(name).map(|t| {
                    let mut desc = t.to_description();
                    desc.name = name.to_string();
                    desc
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch using the registry's default timeout (if any).
    pub async fn dispatch(&self, name: &str, arguments: Arguments) -> ToolOutcome {
        self.dispatch_with_timeout(name, arguments, self.default_timeout)
            .await
    }

    /// Run the named tool and fold every failure into the outcome.
    ///
    /// The handler runs on its own task: a panic surfaces as a failed
    /// outcome, and an expired `timeout` aborts the task.
    pub async fn dispatch_with_timeout(
        &self,
        name: &str,
        arguments: Arguments,
        timeout: Option<Duration>,
    ) -> ToolOutcome {
        let Some(handler) = self.get(name) else {
            warn!(tool = name, "Dispatch to unregistered tool");
            return ToolOutcome::failure(name, ToolError::NotFound(name.to_string()).to_string());
        };

        debug!(tool = name, args = arguments.len(), "Dispatching tool");
        let mut task = tokio::spawn(async move { handler.call(arguments).await });

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    let err = ToolError::Timeout {
                        tool_name: name.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    };
                    warn!(tool = name, "{err}");
                    return ToolOutcome::failure(name, err.to_string());
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(value)) => ToolOutcome::success(name, canonical_text(&value)),
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "Tool returned an error");
                ToolOutcome::failure(name, e.to_string())
            }
            Err(join_err) => {
                let err = ToolError::Panicked {
                    tool_name: name.to_string(),
                    reason: join_err.to_string(),
                };
                warn!(tool = name, "{err}");
                ToolOutcome::failure(name, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"text": "string"})
        }
        async fn call(&self, arguments: Arguments) -> Result<serde_json::Value, ToolError> {
            Ok(arguments.get("text").cloned().unwrap_or(serde_json::Value::Null))
        }
    }

    struct FixedTool(&'static str);

    #[async_trait]
    impl ToolHandler for FixedTool {
        fn name(&self) -> &str {
            "fixed"
        }
        fn description(&self) -> &str {
            "Always answers the same"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({})
        }
        async fn call(&self, _arguments: Arguments) -> Result<serde_json::Value, ToolError> {
            Ok(json!(self.0))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({})
        }
        async fn call(&self, _arguments: Arguments) -> Result<serde_json::Value, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "fail".into(),
                reason: "mailbox offline".into(),
            })
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl ToolHandler for PanickingTool {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "Panics"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({})
        }
        async fn call(&self, _arguments: Arguments) -> Result<serde_json::Value, ToolError> {
            panic!("foreign runtime blew up");
        }
    }

    struct SlowTool;

    #[async_trait]
    impl ToolHandler for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never answers in time"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({})
        }
        async fn call(&self, _arguments: Arguments) -> Result<serde_json::Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!("late"))
        }
    }

    #[derive(Deserialize)]
    struct TrashArgs {
        message_id: String,
    }

    struct TrashTool;

    #[async_trait]
    impl TypedTool for TrashTool {
        type Args = TrashArgs;
        fn name(&self) -> &str {
            "trash_message"
        }
        fn description(&self) -> &str {
            "Moves a message to trash"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"message_id": "string"})
        }
        async fn run(&self, args: TrashArgs) -> Result<serde_json::Value, ToolError> {
            Ok(json!({"id": args.message_id, "trashed": true}))
        }
    }

    fn args(value: serde_json::Value) -> Arguments {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Arguments::new(),
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(EchoTool);
        assert!(registry.has("echo"));
        assert!(!registry.has("nonexistent"));
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut registry = ToolRegistry::new();
        registry.register("answer", Arc::new(FixedTool("first")));
        registry.register("answer", Arc::new(FixedTool("second")));
        assert_eq!(registry.len(), 1);

        let outcome = registry.dispatch("answer", Arguments::new()).await;
        assert_eq!(outcome.result_text, "second");
    }

    #[test]
    fn descriptions_use_registered_names() {
        let mut registry = ToolRegistry::new();
        registry.register("alias", Arc::new(EchoTool));
        let descs = registry.descriptions();
        assert_eq!(descs.len(), 1);
        assert_eq!(descs[0].name, "alias");
        assert_eq!(descs[0].description, "Echoes back the input");
    }

    #[tokio::test]
    async fn dispatch_string_result_is_verbatim() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(EchoTool);
        let outcome = registry
            .dispatch("echo", args(json!({"text": "hello world"})))
            .await;
        assert!(outcome.succeeded);
        assert_eq!(outcome.result_text, "hello world");
        assert_eq!(outcome.to_message_text(), "Result from echo: hello world");
    }

    #[tokio::test]
    async fn dispatch_structured_result_is_compact_json() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(Typed(TrashTool));
        let outcome = registry
            .dispatch("trash_message", args(json!({"message_id": "m-1"})))
            .await;
        assert!(outcome.succeeded);
        assert_eq!(outcome.result_text, r#"{"id":"m-1","trashed":true}"#);
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_fails_softly() {
        let registry = ToolRegistry::new();
        let outcome = registry.dispatch("nonexistent", Arguments::new()).await;
        assert!(!outcome.succeeded);
        assert_eq!(outcome.error_detail.as_deref(), Some("unknown tool"));
        assert_eq!(outcome.to_message_text(), "Error from nonexistent: unknown tool");
    }

    #[tokio::test]
    async fn handler_error_becomes_failed_outcome() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(FailingTool);
        let outcome = registry.dispatch("fail", Arguments::new()).await;
        assert!(!outcome.succeeded);
        assert!(outcome.error_detail.unwrap().contains("mailbox offline"));
    }

    #[tokio::test]
    async fn handler_panic_becomes_failed_outcome() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(PanickingTool);
        let outcome = registry.dispatch("boom", Arguments::new()).await;
        assert!(!outcome.succeeded);
        assert!(outcome.error_detail.unwrap().contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_failed_outcome() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(SlowTool);
        let outcome = registry
            .dispatch_with_timeout("slow", Arguments::new(), Some(Duration::from_millis(50)))
            .await;
        assert!(!outcome.succeeded);
        assert!(outcome.error_detail.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn default_timeout_applies_to_dispatch() {
        let mut registry = ToolRegistry::new().with_default_timeout(Duration::from_millis(10));
        registry.register_tool(SlowTool);
        let outcome = registry.dispatch("slow", Arguments::new()).await;
        assert!(!outcome.succeeded);
    }

    #[tokio::test]
    async fn typed_tool_rejects_bad_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(Typed(TrashTool));
        let outcome = registry
            .dispatch("trash_message", args(json!({"message_id": 42})))
            .await;
        assert!(!outcome.succeeded);
        assert!(outcome.error_detail.unwrap().contains("Invalid tool arguments"));
    }
}
