//! No-op tool-call log — disables persistence entirely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use toolchat_core::error::LogError;
use toolchat_core::journal::{ToolCallLog, ToolCallRecord};

/// A log that stores nothing and always reports id 0.
pub struct NoopToolCallLog;

#[async_trait]
impl ToolCallLog for NoopToolCallLog {
    fn name(&self) -> &str { "none" }

    async fn record_tool_call(
        &self,
        _prompt: &str,
        _tool_name: &str,
        _arguments: &serde_json::Value,
        _response: &serde_json::Value,
    ) -> Result<i64, LogError> {
        Ok(0)
    }

    async fn get(&self, _id: i64) -> Result<Option<ToolCallRecord>, LogError> {
        Ok(None)
    }

    async fn recent(&self, _limit: usize) -> Result<Vec<ToolCallRecord>, LogError> {
        Ok(Vec::new())
    }

    async fn by_time_range(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<ToolCallRecord>, LogError> {
        Ok(Vec::new())
    }
}
