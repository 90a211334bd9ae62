//! SQLite tool-call log.
//!
//! A single table, `tool_calls`, holds one row per dispatched tool call.
//! Arguments and responses are stored as JSON text; timestamps as
//! `%Y-%m-%dT%H:%M:%SZ` strings, which sort chronologically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use toolchat_core::error::LogError;
use toolchat_core::journal::{format_timestamp, parse_timestamp, ToolCallLog, ToolCallRecord};
use tracing::{debug, info, warn};

/// A tool-call log backed by a SQLite database file.
pub struct SqliteToolCallLog {
    pool: SqlitePool,
}

impl SqliteToolCallLog {
    /// Open (or create) the log at `path`.
    ///
    /// Accepts a plain file path or a `sqlite:` URL. Pass `"sqlite::memory:"`
    /// for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, LogError> {
        let options = if path.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(path)
                .map_err(|e| LogError::Storage(format!("Invalid SQLite path: {e}")))?
        } else {
            SqliteConnectOptions::new().filename(path)
        };

        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| LogError::Storage(format!("Failed to open SQLite: {e}")))?;

        let log = Self { pool };
        log.run_migrations().await?;
        info!("SQLite tool-call log initialized at {path}");
        Ok(log)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, LogError> {
        let log = Self { pool };
        log.run_migrations().await?;
        Ok(log)
    }

    async fn run_migrations(&self) -> Result<(), LogError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tool_calls (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp   TEXT NOT NULL,
                prompt      TEXT NOT NULL,
                tool_name   TEXT NOT NULL,
                tool_params TEXT NOT NULL,
                response    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LogError::MigrationFailed(format!("tool_calls table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tool_calls_timestamp ON tool_calls(timestamp DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LogError::MigrationFailed(format!("timestamp index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ToolCallRecord, LogError> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| LogError::QueryFailed(format!("id column: {e}")))?;
        let timestamp_str: String = row
            .try_get("timestamp")
            .map_err(|e| LogError::QueryFailed(format!("timestamp column: {e}")))?;
        let prompt: String = row
            .try_get("prompt")
            .map_err(|e| LogError::QueryFailed(format!("prompt column: {e}")))?;
        let tool_name: String = row
            .try_get("tool_name")
            .map_err(|e| LogError::QueryFailed(format!("tool_name column: {e}")))?;
        let params_json: String = row
            .try_get("tool_params")
            .map_err(|e| LogError::QueryFailed(format!("tool_params column: {e}")))?;
        let response_json: String = row
            .try_get("response")
            .map_err(|e| LogError::QueryFailed(format!("response column: {e}")))?;

        let timestamp = parse_timestamp(&timestamp_str).ok_or_else(|| {
            LogError::QueryFailed(format!("row {id}: bad timestamp '{timestamp_str}'"))
        })?;

        Ok(ToolCallRecord {
            id,
            timestamp,
            prompt,
            tool_name,
            arguments: Self::json_or_text(&params_json),
            response: Self::json_or_text(&response_json),
        })
    }

    /// Rows written by other tools may hold plain text; keep it as a string.
    fn json_or_text(raw: &str) -> serde_json::Value {
        serde_json::from_str(raw).unwrap_or_else(|_| {
            warn!("Non-JSON payload in tool_calls row, keeping as text");
            serde_json::Value::String(raw.to_string())
        })
    }
}

#[async_trait]
impl ToolCallLog for SqliteToolCallLog {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn record_tool_call(
        &self,
        prompt: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
        response: &serde_json::Value,
    ) -> Result<i64, LogError> {
        let timestamp = format_timestamp(&Utc::now());

        let result = sqlx::query(
            r#"
            INSERT INTO tool_calls (timestamp, prompt, tool_name, tool_params, response)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&timestamp)
        .bind(prompt)
        .bind(tool_name)
        .bind(arguments.to_string())
        .bind(response.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| LogError::Storage(format!("INSERT failed: {e}")))?;

        let id = result.last_insert_rowid();
        debug!(id, tool = tool_name, "Tool call recorded");
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<ToolCallRecord>, LogError> {
        let row = sqlx::query("SELECT * FROM tool_calls WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LogError::QueryFailed(format!("GET failed: {e}")))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ToolCallRecord>, LogError> {
        let rows = sqlx::query(
            "SELECT * FROM tool_calls ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LogError::QueryFailed(format!("recent query failed: {e}")))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ToolCallRecord>, LogError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM tool_calls
            WHERE timestamp >= ?1 AND timestamp <= ?2
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(format_timestamp(&start))
        .bind(format_timestamp(&end))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LogError::QueryFailed(format!("range query failed: {e}")))?;

        rows.iter().map(Self::row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_log() -> SqliteToolCallLog {
        SqliteToolCallLog::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn record_and_get() {
        let log = test_log().await;
        let params = json!({"query": "is:unread", "max_results": 2});
        let response = json!([{"id": "m1", "snippet": "Lunch?"}]);
        let id = log
            .record_tool_call("Show me my unread emails", "list_messages", &params, &response)
            .await
            .unwrap();
        assert!(id > 0);

        let record = log.get(id).await.unwrap().unwrap();
        assert_eq!(record.prompt, "Show me my unread emails");
        assert_eq!(record.tool_name, "list_messages");
        assert_eq!(record.arguments, params);
        assert_eq!(record.response, response);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let log = test_log().await;
        assert!(log.get(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let log = test_log().await;
        for name in ["get_profile", "list_labels", "list_messages"] {
            log.record_tool_call("p", name, &json!({}), &json!("ok"))
                .await
                .unwrap();
        }
        let recent = log.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].tool_name, "list_messages");
        assert_eq!(recent[1].tool_name, "list_labels");
    }

    #[tokio::test]
    async fn time_range_filters_rows() {
        let log = test_log().await;
        log.record_tool_call("p", "get_profile", &json!({}), &json!("ok"))
            .await
            .unwrap();

        let now = Utc::now();
        let hour = chrono::Duration::hours(1);
        let hits = log.by_time_range(now - hour, now + hour).await.unwrap();
        assert_eq!(hits.len(), 1);

        let misses = log
            .by_time_range(now - hour * 3, now - hour * 2)
            .await
            .unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn file_backed_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool_calls.db");
        let path = path.to_str().unwrap();

        let id = {
            let log = SqliteToolCallLog::new(path).await.unwrap();
            log.record_tool_call("p", "trash_message", &json!({"message_id": "m9"}), &json!({"trashed": true}))
                .await
                .unwrap()
        };

        let reopened = SqliteToolCallLog::new(path).await.unwrap();
        let record = reopened.get(id).await.unwrap().unwrap();
        assert_eq!(record.arguments["message_id"], "m9");
    }
}
