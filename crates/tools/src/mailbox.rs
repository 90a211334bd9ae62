//! The mail service contract and an in-memory mailbox.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// Errors raised by a mail backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MailError {
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Mail backend error: {0}")]
    Backend(String),
}

/// Account summary, shaped like the Gmail profile resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub email_address: String,
    pub messages_total: usize,
    pub threads_total: usize,
    pub history_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Label {
    fn system(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            kind: "system".to_string(),
        }
    }
}

/// Metadata for one listed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub subject: String,
    pub snippet: String,
}

/// What the mail tools need from a mailbox.
#[async_trait]
pub trait MailService: Send + Sync {
    /// Send a message; returns the new message id.
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<String, MailError>;

    async fn list_labels(&self) -> Result<Vec<Label>, MailError>;

    async fn get_profile(&self) -> Result<Profile, MailError>;

    /// Move a message to the trash; returns its labels afterwards.
    async fn trash_message(&self, message_id: &str) -> Result<Vec<String>, MailError>;

    /// Messages matching `query`, newest first, at most `max_results`.
    async fn list_messages(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<MessageSummary>, MailError>;
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    thread_id: String,
    from: String,
    to: String,
    subject: String,
    body: String,
    labels: Vec<String>,
}

impl StoredMessage {
    fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }

    fn snippet(&self) -> String {
        self.body.chars().take(100).collect()
    }

    /// Gmail-style query matching: `is:`, `in:`, `label:`, `from:`, `to:`
    /// operators, and plain words matched against subject and body.
    fn matches(&self, query: &str) -> bool {
        let mut wants_trash = false;
        for term in query.split_whitespace() {
            let term = term.to_lowercase();
            let ok = if let Some(flag) = term.strip_prefix("is:") {
                self.has_label(flag)
            } else if let Some(label) = term
                .strip_prefix("in:")
                .or_else(|| term.strip_prefix("label:"))
            {
                wants_trash |= label == "trash";
                self.has_label(label)
            } else if let Some(from) = term.strip_prefix("from:") {
                self.from.to_lowercase().contains(from)
            } else if let Some(to) = term.strip_prefix("to:") {
                self.to.to_lowercase().contains(to)
            } else {
                self.subject.to_lowercase().contains(&term)
                    || self.body.to_lowercase().contains(&term)
            };
            if !ok {
                return false;
            }
        }
        wants_trash || !self.has_label("TRASH")
    }

    fn summary(&self) -> MessageSummary {
        MessageSummary {
            id: self.id.clone(),
            thread_id: self.thread_id.clone(),
            from: self.from.clone(),
            subject: self.subject.clone(),
            snippet: self.snippet(),
        }
    }
}

struct MailboxState {
    messages: Vec<StoredMessage>,
    labels: Vec<Label>,
    next_id: u64,
    history_id: u64,
}

/// A mailbox held entirely in memory.
pub struct InMemoryMailbox {
    address: String,
    state: RwLock<MailboxState>,
}

impl InMemoryMailbox {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: RwLock::new(MailboxState {
                messages: Vec::new(),
                labels: ["INBOX", "SENT", "TRASH", "UNREAD", "STARRED"]
                    .into_iter()
                    .map(Label::system)
                    .collect(),
                next_id: 1,
                history_id: 1,
            }),
        }
    }

    /// A mailbox pre-filled with a few messages, for demos.
    pub async fn with_sample_data(address: impl Into<String>) -> Self {
        let mailbox = Self::new(address);
        mailbox
            .deliver(
                "alice@example.com",
                "Lunch on Friday?",
                "Are you free for lunch on Friday? The new ramen place opened.",
            )
            .await;
        mailbox
            .deliver(
                "billing@example.com",
                "Your invoice is ready",
                "Invoice #2231 for October is attached. Payment is due in 14 days.",
            )
            .await;
        mailbox
            .deliver(
                "bob@example.com",
                "Project sync notes",
                "Notes from today's sync: ship the parser fix, review the budget math.",
            )
            .await;
        mailbox
    }

    /// Place an unread message in the inbox; returns its id.
    pub async fn deliver(&self, from: &str, subject: &str, body: &str) -> String {
        let mut state = self.state.write().await;
        let id = Self::next_id(&mut state);
        state.messages.push(StoredMessage {
            id: id.clone(),
            thread_id: id.clone(),
            from: from.to_string(),
            to: self.address.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
            labels: vec!["INBOX".into(), "UNREAD".into()],
        });
        id
    }

    fn next_id(state: &mut MailboxState) -> String {
        let id = format!("{:016x}", state.next_id);
        state.next_id += 1;
        state.history_id += 1;
        id
    }
}

#[async_trait]
impl MailService for InMemoryMailbox {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<String, MailError> {
        let (local, domain) = to
            .split_once('@')
            .ok_or_else(|| MailError::InvalidRecipient(to.to_string()))?;
        if local.is_empty() || !domain.contains('.') {
            return Err(MailError::InvalidRecipient(to.to_string()));
        }

        let mut state = self.state.write().await;
        let id = Self::next_id(&mut state);
        state.messages.push(StoredMessage {
            id: id.clone(),
            thread_id: id.clone(),
            from: self.address.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            labels: vec!["SENT".into()],
        });
        debug!(id = %id, to, "Message sent");
        Ok(id)
    }

    async fn list_labels(&self) -> Result<Vec<Label>, MailError> {
        Ok(self.state.read().await.labels.clone())
    }

    async fn get_profile(&self) -> Result<Profile, MailError> {
        let state = self.state.read().await;
        let mut threads: Vec<&str> = state.messages.iter().map(|m| m.thread_id.as_str()).collect();
        threads.sort_unstable();
        threads.dedup();
        Ok(Profile {
            email_address: self.address.clone(),
            messages_total: state.messages.len(),
            threads_total: threads.len(),
            history_id: state.history_id.to_string(),
        })
    }

    async fn trash_message(&self, message_id: &str) -> Result<Vec<String>, MailError> {
        let mut state = self.state.write().await;
        state.history_id += 1;
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| MailError::MessageNotFound(message_id.to_string()))?;

        message.labels.retain(|l| l != "INBOX");
        if !message.has_label("TRASH") {
            message.labels.push("TRASH".into());
        }
        Ok(message.labels.clone())
    }

    async fn list_messages(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<MessageSummary>, MailError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .rev()
            .filter(|m| m.matches(query))
            .take(max_results)
            .map(StoredMessage::summary)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_rejects_bad_recipient() {
        let mailbox = InMemoryMailbox::new("me@example.com");
        let err = mailbox.send_email("nobody", "s", "b").await.unwrap_err();
        assert!(matches!(err, MailError::InvalidRecipient(_)));
        assert!(mailbox.send_email("a@example.com", "s", "b").await.is_ok());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let mailbox = InMemoryMailbox::with_sample_data("me@example.com").await;
        let listed = mailbox.list_messages("", 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].subject, "Project sync notes");
        assert_eq!(listed[1].subject, "Your invoice is ready");
    }

    #[tokio::test]
    async fn query_operators() {
        let mailbox = InMemoryMailbox::with_sample_data("me@example.com").await;
        mailbox.send_email("carol@example.com", "Hi", "hello").await.unwrap();

        assert_eq!(mailbox.list_messages("is:unread", 10).await.unwrap().len(), 3);
        assert_eq!(mailbox.list_messages("in:sent", 10).await.unwrap().len(), 1);
        assert_eq!(mailbox.list_messages("from:alice", 10).await.unwrap().len(), 1);
        assert_eq!(mailbox.list_messages("invoice", 10).await.unwrap().len(), 1);
        assert!(mailbox.list_messages("from:alice invoice", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn trashed_messages_leave_the_inbox() {
        let mailbox = InMemoryMailbox::new("me@example.com");
        let id = mailbox.deliver("x@example.com", "Spam", "buy now").await;

        let labels = mailbox.trash_message(&id).await.unwrap();
        assert_eq!(labels, vec!["UNREAD", "TRASH"]);
        assert!(mailbox.list_messages("", 10).await.unwrap().is_empty());
        assert_eq!(mailbox.list_messages("in:trash", 10).await.unwrap().len(), 1);

        let err = mailbox.trash_message("missing").await.unwrap_err();
        assert!(matches!(err, MailError::MessageNotFound(_)));
    }

    #[tokio::test]
    async fn profile_counts_messages() {
        let mailbox = InMemoryMailbox::with_sample_data("me@example.com").await;
        let profile = mailbox.get_profile().await.unwrap();
        assert_eq!(profile.email_address, "me@example.com");
        assert_eq!(profile.messages_total, 3);
        assert_eq!(profile.threads_total, 3);

        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("emailAddress").is_some());
    }
}
