//! Mail tools — thin typed adapters over a [`MailService`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use toolchat_core::error::ToolError;
use toolchat_core::tool::TypedTool;
use tracing::debug;

use crate::mailbox::{MailError, MailService};

/// Upper bound on messages returned by one `list_messages` call.
///
/// Keeps tool results small enough to fit the context window.
pub const LIST_MESSAGES_CAP: usize = 3;

fn failed(tool_name: &str, err: MailError) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool_name.to_string(),
        reason: err.to_string(),
    }
}

fn to_value<T: serde::Serialize>(tool_name: &str, value: T) -> Result<serde_json::Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::ExecutionFailed {
        tool_name: tool_name.to_string(),
        reason: format!("unserializable result: {e}"),
    })
}

// ── send_email ─────────────────────────────────────────────────────────

pub struct SendEmailTool {
    service: Arc<dyn MailService>,
}

impl SendEmailTool {
    pub fn new(service: Arc<dyn MailService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendEmailArgs {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
impl TypedTool for SendEmailTool {
    type Args = SendEmailArgs;

    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Sends an email."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"to": "string (email_address)", "subject": "string", "body": "string"})
    }

    async fn run(&self, args: SendEmailArgs) -> Result<serde_json::Value, ToolError> {
        let message_id = self
            .service
            .send_email(&args.to, &args.subject, &args.body)
            .await
            .map_err(|e| failed(self.name(), e))?;
        Ok(json!({"message_id": message_id, "status": "sent"}))
    }
}

// ── list_labels ────────────────────────────────────────────────────────

pub struct ListLabelsTool {
    service: Arc<dyn MailService>,
}

impl ListLabelsTool {
    pub fn new(service: Arc<dyn MailService>) -> Self {
        Self { service }
    }
}

/// Takes no arguments; stray keys are ignored.
#[derive(Debug, Deserialize)]
pub struct NoArgs {}

#[async_trait]
impl TypedTool for ListLabelsTool {
    type Args = NoArgs;

    fn name(&self) -> &str {
        "list_labels"
    }

    fn description(&self) -> &str {
        "Lists all mailbox labels."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({})
    }

    async fn run(&self, _args: NoArgs) -> Result<serde_json::Value, ToolError> {
        let labels = self
            .service
            .list_labels()
            .await
            .map_err(|e| failed(self.name(), e))?;
        to_value(self.name(), labels)
    }
}

// ── get_profile ────────────────────────────────────────────────────────

pub struct GetProfileTool {
    service: Arc<dyn MailService>,
}

impl GetProfileTool {
    pub fn new(service: Arc<dyn MailService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TypedTool for GetProfileTool {
    type Args = NoArgs;

    fn name(&self) -> &str {
        "get_profile"
    }

    fn description(&self) -> &str {
        "Gets the user's mailbox profile."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({})
    }

    async fn run(&self, _args: NoArgs) -> Result<serde_json::Value, ToolError> {
        let profile = self
            .service
            .get_profile()
            .await
            .map_err(|e| failed(self.name(), e))?;
        to_value(self.name(), profile)
    }
}

// ── trash_message ──────────────────────────────────────────────────────

pub struct TrashMessageTool {
    service: Arc<dyn MailService>,
}

impl TrashMessageTool {
    pub fn new(service: Arc<dyn MailService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Deserialize)]
pub struct TrashMessageArgs {
    pub message_id: String,
}

#[async_trait]
impl TypedTool for TrashMessageTool {
    type Args = TrashMessageArgs;

    fn name(&self) -> &str {
        "trash_message"
    }

    fn description(&self) -> &str {
        "Moves a specific message to trash."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"message_id": "string"})
    }

    async fn run(&self, args: TrashMessageArgs) -> Result<serde_json::Value, ToolError> {
        let labels = self
            .service
            .trash_message(&args.message_id)
            .await
            .map_err(|e| failed(self.name(), e))?;
        Ok(json!({"id": args.message_id, "labelIds": labels}))
    }
}

// ── list_messages ──────────────────────────────────────────────────────

pub struct ListMessagesTool {
    service: Arc<dyn MailService>,
}

impl ListMessagesTool {
    pub fn new(service: Arc<dyn MailService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesArgs {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[async_trait]
impl TypedTool for ListMessagesTool {
    type Args = ListMessagesArgs;

    fn name(&self) -> &str {
        "list_messages"
    }

    fn description(&self) -> &str {
        "Lists messages."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "query": "string (search query, e.g. is:unread)",
            "max_results": format!("integer (optional, default {LIST_MESSAGES_CAP}, max {LIST_MESSAGES_CAP})")
        })
    }

    async fn run(&self, args: ListMessagesArgs) -> Result<serde_json::Value, ToolError> {
        let requested = args.max_results.unwrap_or(LIST_MESSAGES_CAP);
        let max_results = requested.min(LIST_MESSAGES_CAP);
        if requested > LIST_MESSAGES_CAP {
            debug!(requested, cap = LIST_MESSAGES_CAP, "Capping list_messages max_results");
        }

        let query = args.query.unwrap_or_default();
        let messages = self
            .service
            .list_messages(&query, max_results)
            .await
            .map_err(|e| failed(self.name(), e))?;
        to_value(self.name(), messages)
    }
}
