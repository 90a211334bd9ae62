//! Tool-call log trait — an audit trail of every dispatched tool call.
//!
//! The chat loop records each dispatch opportunistically: a failing or
//! absent log never changes what the user sees.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LogError;

/// One persisted tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Backend-assigned identifier (monotonic per log)
    pub id: i64,

    /// When the call was recorded (UTC, second precision)
    pub timestamp: DateTime<Utc>,

    /// The user prompt that led to this call
    pub prompt: String,

    /// Name of the dispatched tool
    pub tool_name: String,

    /// Arguments the tool was called with
    pub arguments: serde_json::Value,

    /// What the dispatch produced
    pub response: serde_json::Value,
}

/// Persistence for tool calls.
#[async_trait]
pub trait ToolCallLog: Send + Sync {
    /// Backend name (e.g., "sqlite", "none").
    fn name(&self) -> &str;

    /// Persist one call, returning its id.
    async fn record_tool_call(
        &self,
        prompt: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
        response: &serde_json::Value,
    ) -> Result<i64, LogError>;

    /// Fetch a single call by id.
    async fn get(&self, id: i64) -> Result<Option<ToolCallRecord>, LogError>;

    /// The `limit` most recent calls, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<ToolCallRecord>, LogError>;

    /// Calls recorded within `[start, end]`, oldest first.
    async fn by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ToolCallRecord>, LogError>;
}

/// Default number of entries returned by `recent` when the caller has no preference.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Timestamp layout used by persisted records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Render a timestamp in the persisted layout.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp written by [`format_timestamp`].
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_layout_is_zulu_seconds() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-09T07:05:01Z");
        assert_eq!(parse_timestamp("2024-03-09T07:05:01Z"), Some(ts));
    }

    #[test]
    fn malformed_timestamp_is_none() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2024-03-09 07:05:01").is_none());
    }
}
