//! End-to-end integration tests for the toolchat runtime.
//!
//! These tests drive the full pipeline from user message to reply: prompt
//! rendering, scripted generation, tool-call parsing, dispatch against the
//! mail tools, and journaling of every call.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Value, json};
use toolchat_agent::{
    ChatEvent, ChatOrchestrator, ChatTemplate, ITERATION_LIMIT_NOTICE, OrchestratorConfig,
};
use toolchat_core::error::ToolError;
use toolchat_core::journal::ToolCallLog;
use toolchat_core::message::{Message, Role};
use toolchat_core::tool::{Arguments, ToolHandler, ToolRegistry};
use toolchat_engine::ScriptedEngine;
use toolchat_memory::SqliteToolCallLog;
use toolchat_tools::{InMemoryMailbox, MailService, default_system_prompt, mail_registry};
use tokio_util::sync::CancellationToken;

// ── Helpers ──────────────────────────────────────────────────────────────

/// A profile tool that answers with a bare string.
struct FixedProfile;

#[async_trait::async_trait]
impl ToolHandler for FixedProfile {
    fn name(&self) -> &str {
        "get_profile"
    }
    fn description(&self) -> &str {
        "Returns the user's address"
    }
    fn parameters_schema(&self) -> Value {
        json!({})
    }
    async fn call(&self, _arguments: Arguments) -> Result<Value, ToolError> {
        Ok(json!("ok@example.com"))
    }
}

/// A tool that always panics.
struct Exploding;

#[async_trait::async_trait]
impl ToolHandler for Exploding {
    fn name(&self) -> &str {
        "explode"
    }
    fn description(&self) -> &str {
        "Panics"
    }
    fn parameters_schema(&self) -> Value {
        json!({})
    }
    async fn call(&self, _arguments: Arguments) -> Result<Value, ToolError> {
        panic!("boom");
    }
}

async fn sample_mailbox() -> Arc<InMemoryMailbox> {
    Arc::new(InMemoryMailbox::with_sample_data("me@example.com").await)
}

async fn memory_journal() -> Arc<SqliteToolCallLog> {
    Arc::new(SqliteToolCallLog::new("sqlite::memory:").await.unwrap())
}

fn chat(engine: Arc<ScriptedEngine>, registry: ToolRegistry) -> ChatOrchestrator {
    ChatOrchestrator::new(engine, Arc::new(registry), OrchestratorConfig::default())
        .with_system_prompt("You are helpful.")
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_plain_answer() {
    let engine = Arc::new(ScriptedEngine::from_texts(["Hello!"]));
    let chat = chat(engine, ToolRegistry::new());

    let reply = chat.send("hi").await.unwrap();
    assert_eq!(reply.text, "Hello!");
    assert_eq!(
        chat.messages().await,
        vec![
            Message::system("You are helpful."),
            Message::user("hi"),
            Message::assistant("Hello!"),
        ]
    );
}

#[tokio::test]
async fn e2e_tool_result_between_assistant_turns() {
    let engine = Arc::new(ScriptedEngine::from_texts([
        r#"{"tool_name":"get_profile","parameters":{}}"#,
        "Your email is ok@example.com.",
    ]));
    let mut registry = ToolRegistry::new();
    registry.register_tool(FixedProfile);
    let chat = chat(engine, registry);

    let reply = chat.send("what is my email?").await.unwrap();
    assert_eq!(reply.text, "Your email is ok@example.com.");

    let messages = chat.messages().await;
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[2].role, Role::Assistant);
    assert_eq!(messages[3], Message::tool("Result from get_profile: ok@example.com"));
    assert_eq!(messages[4].role, Role::Assistant);
}

#[tokio::test]
async fn e2e_default_prompt_lists_mail_tools() {
    let engine = Arc::new(ScriptedEngine::from_texts(["Sure."]));
    let registry = mail_registry(sample_mailbox().await);
    let prompt = default_system_prompt(&registry);
    let chat = ChatOrchestrator::new(engine.clone(), Arc::new(registry), OrchestratorConfig::default())
        .with_system_prompt(prompt);

    chat.send("hello").await.unwrap();
    let submitted = &engine.prompts()[0];
    for tool in ["send_email", "list_labels", "get_profile", "trash_message", "list_messages"] {
        assert!(submitted.contains(tool), "prompt is missing {tool}");
    }
}

#[tokio::test]
async fn e2e_send_then_list_with_journal() {
    let mailbox = sample_mailbox().await;
    let journal = memory_journal().await;
    let engine = Arc::new(ScriptedEngine::from_texts([
        r#"{"tool_name": "send_email", "parameters": {"to": "bob@example.com", "subject": "Hi", "body": "See you"}}"#,
        r#"[{"name": "list_messages", "arguments": {"query": "from:alice"}}]"#,
        "Sent, and here is Alice's mail.",
    ]));
    let chat = chat(engine, mail_registry(mailbox.clone())).with_log(journal.clone());

    let reply = chat.send("email bob then show alice's mail").await.unwrap();
    assert_eq!(reply.tool_calls, 2);
    assert!(reply.outcomes.iter().all(|o| o.succeeded));

    let recent = journal.recent(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].tool_name, "list_messages");
    assert_eq!(recent[1].tool_name, "send_email");
    assert_eq!(recent[1].arguments["to"], "bob@example.com");
    assert_eq!(recent[1].response["status"], "sent");
    assert_eq!(recent[1].prompt, "email bob then show alice's mail");

    let window = journal
        .by_time_range(
            Utc::now() - ChronoDuration::minutes(5),
            Utc::now() + ChronoDuration::minutes(5),
        )
        .await
        .unwrap();
    assert_eq!(window.len(), 2);
    assert_eq!(window[0].tool_name, "send_email");

    let sent = mailbox.list_messages("in:sent", 10).await.unwrap();
    assert!(sent.iter().any(|m| m.subject == "Hi"));
}

#[tokio::test]
async fn e2e_list_messages_is_capped() {
    let mailbox = sample_mailbox().await;
    for i in 0..5 {
        mailbox
            .deliver("carol@example.com", &format!("Note {i}"), "body")
            .await;
    }
    let engine = Arc::new(ScriptedEngine::from_texts([
        r#"{"tool_name": "list_messages", "parameters": {"max_results": 50}}"#,
        "Here you go.",
    ]));
    let chat = chat(engine, mail_registry(mailbox));

    let reply = chat.send("list everything").await.unwrap();
    let listed: Value = serde_json::from_str(&reply.outcomes[0].result_text).unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn e2e_failures_are_folded_into_the_conversation() {
    let engine = Arc::new(ScriptedEngine::from_texts([
        r#"[{"name": "explode"}, {"name": "trash_message", "arguments": {"message_id": "nope"}}, {"name": "no_such_tool"}]"#,
        "Nothing worked.",
    ]));
    let mut registry = mail_registry(sample_mailbox().await);
    registry.register_tool(Exploding);
    let chat = chat(engine, registry);

    let reply = chat.send("try things").await.unwrap();
    assert_eq!(reply.text, "Nothing worked.");
    assert_eq!(reply.outcomes.len(), 3);
    assert!(reply.outcomes.iter().all(|o| !o.succeeded));

    let tool_messages: Vec<String> = chat
        .messages()
        .await
        .into_iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content)
        .collect();
    assert!(tool_messages[0].starts_with("Error from explode: Tool panicked"));
    assert!(tool_messages[1].starts_with("Error from trash_message:"));
    assert_eq!(tool_messages[2], "Error from no_such_tool: unknown tool");
}

#[tokio::test]
async fn e2e_iteration_limit() {
    let call = r#"{"tool_name": "list_labels", "parameters": {}}"#;
    let engine = Arc::new(ScriptedEngine::from_texts(vec![call; 10]));
    let journal = memory_journal().await;
    let config = OrchestratorConfig {
        max_tool_iterations: 3,
        ..OrchestratorConfig::default()
    };
    let chat = ChatOrchestrator::new(
        engine.clone(),
        Arc::new(mail_registry(sample_mailbox().await)),
        config,
    )
    .with_log(journal.clone());

    let reply = chat.send("labels please").await.unwrap();
    assert!(reply.hit_iteration_limit);
    assert!(reply.text.ends_with(ITERATION_LIMIT_NOTICE));
    assert_eq!(engine.turns_served(), 3);
    assert_eq!(journal.recent(100).await.unwrap().len(), 3);
}

#[tokio::test]
async fn e2e_reasoning_block_does_not_trigger_tools() {
    let engine = Arc::new(ScriptedEngine::from_texts([
        r#"<think>I could call {"tool_name": "trash_message", "parameters": {"message_id": "m1"}}</think>No need to delete anything."#,
    ]));
    let mailbox = sample_mailbox().await;
    let chat = chat(engine, mail_registry(mailbox.clone()));

    let reply = chat.send("tidy up?").await.unwrap();
    assert_eq!(reply.tool_calls, 0);
    assert!(mailbox.list_messages("in:trash", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn e2e_tinyllama_template_maps_tool_role() {
    let engine = Arc::new(ScriptedEngine::from_texts([
        r#"{"tool_name": "get_profile", "parameters": {}}"#,
        "Done.",
    ]));
    let config = OrchestratorConfig {
        template: ChatTemplate::TinyLlama,
        ..OrchestratorConfig::default()
    };
    let chat = ChatOrchestrator::new(
        engine.clone(),
        Arc::new(mail_registry(sample_mailbox().await)),
        config,
    );

    chat.send("who am I?").await.unwrap();
    let prompts = engine.prompts();
    assert!(prompts[0].ends_with("<|user|>\nwho am I?</s>\n<|assistant|>\n"));
    assert!(prompts[1].starts_with("</s>\n<|user|>\n[Tool Result] Result from get_profile"));
}

#[tokio::test]
async fn e2e_script_file_drives_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("turns.jsonl");
    std::fs::write(
        &script,
        "\"{\\\"tool_name\\\": \\\"list_labels\\\", \\\"parameters\\\": {}}\"\n\"You have 5 labels.\"\n",
    )
    .unwrap();

    let engine = Arc::new(ScriptedEngine::from_jsonl(&script).unwrap());
    let chat = chat(engine, mail_registry(sample_mailbox().await));
    let (tx, mut rx) = tokio::sync::mpsc::channel(256);

    let reply = chat
        .send_with("labels?", Some(&tx), &CancellationToken::new())
        .await
        .unwrap();
    drop(tx);
    assert_eq!(reply.text, "You have 5 labels.");

    let mut saw_result = false;
    let mut saw_done = false;
    while let Some(event) = rx.recv().await {
        match event {
            ChatEvent::ToolResult { name, succeeded, .. } => {
                assert_eq!(name, "list_labels");
                assert!(succeeded);
                saw_result = true;
            }
            ChatEvent::Done { turns, .. } => {
                assert_eq!(turns, 2);
                saw_done = true;
            }
            _ => {}
        }
    }
    assert!(saw_result && saw_done);
}
