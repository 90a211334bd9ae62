//! In-memory tool-call log — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use toolchat_core::error::LogError;
use toolchat_core::journal::{ToolCallLog, ToolCallRecord};

/// A log that keeps records in a Vec, in insertion order.
#[derive(Clone, Default)]
pub struct InMemoryToolCallLog {
    records: Arc<RwLock<Vec<ToolCallRecord>>>,
}

impl InMemoryToolCallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Snapshot of every record, oldest first.
    pub async fn all(&self) -> Vec<ToolCallRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl ToolCallLog for InMemoryToolCallLog {
    fn name(&self) -> &str { "in_memory" }

    async fn record_tool_call(
        &self,
        prompt: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
        response: &serde_json::Value,
    ) -> Result<i64, LogError> {
        let mut records = self.records.write().await;
        let id = records.len() as i64 + 1;
        records.push(ToolCallRecord {
            id,
            timestamp: Utc::now().trunc_subsecs(0),
            prompt: prompt.to_string(),
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
            response: response.clone(),
        });
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<ToolCallRecord>, LogError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ToolCallRecord>, LogError> {
        let records = self.records.read().await;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }

    async fn by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ToolCallRecord>, LogError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn ids_are_sequential() {
        let log = InMemoryToolCallLog::new();
        let a = log
            .record_tool_call("hi", "get_profile", &json!({}), &json!("ok"))
            .await
            .unwrap();
        let b = log
            .record_tool_call("hi", "list_labels", &json!({}), &json!([]))
            .await
            .unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(log.get(2).await.unwrap().unwrap().tool_name, "list_labels");
        assert!(log.get(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_is_newest_first() {
        let log = InMemoryToolCallLog::new();
        for name in ["a", "b", "c"] {
            log.record_tool_call("p", name, &json!({}), &json!(null))
                .await
                .unwrap();
        }
        let names: Vec<String> = log
            .recent(2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.tool_name)
            .collect();
        assert_eq!(names, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn time_range_is_inclusive() {
        let log = InMemoryToolCallLog::new();
        log.record_tool_call("p", "get_profile", &json!({}), &json!("x"))
            .await
            .unwrap();
        let ts = log.all().await[0].timestamp;
        assert_eq!(log.by_time_range(ts, ts).await.unwrap().len(), 1);
        let later = ts + chrono::Duration::seconds(1);
        assert!(log.by_time_range(later, later).await.unwrap().is_empty());
    }
}
