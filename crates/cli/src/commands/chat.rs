//! `toolchat chat` — Interactive or single-message chat.

use clap::Args;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use toolchat_agent::{
    AgentError, ChatEvent, ChatOrchestrator, ChatReply, ChatTemplate, ITERATION_LIMIT_NOTICE,
    OrchestratorConfig,
};
use toolchat_config::AppConfig;
use toolchat_core::engine::GenerationEngine;
use toolchat_core::journal::ToolCallLog;
use toolchat_engine::ScriptedEngine;
use toolchat_memory::NoopToolCallLog;
use toolchat_tools::{InMemoryMailbox, default_system_prompt, mail_registry};

/// Address of the bundled demo mailbox.
const MAILBOX_ADDRESS: &str = "me@example.com";

/// Tool results longer than this are cut in the transcript view.
const RESULT_PREVIEW_CHARS: usize = 160;

#[derive(Args, Debug, Default)]
pub struct ChatArgs {
    /// Send a single message instead of entering interactive mode
    #[arg(short, long)]
    pub message: Option<String>,

    /// GGUF file path or preset (tinyllama, smollm:135m, smollm:360m, smollm:1.7b)
    #[arg(long)]
    pub model: Option<String>,

    /// Context window size in tokens
    #[arg(short = 'c', long = "ctx-size")]
    pub ctx_size: Option<usize>,

    /// Layers to offload to the GPU
    #[arg(long = "ngl")]
    pub gpu_layers: Option<u32>,

    /// Generated turns allowed per message
    #[arg(long)]
    pub max_tool_iterations: Option<usize>,

    /// Read the system prompt from this file
    #[arg(long)]
    pub system_prompt_file: Option<PathBuf>,

    /// Engine kind: local or scripted
    #[arg(long)]
    pub engine: Option<String>,

    /// JSON-lines script for the scripted engine (implies --engine scripted)
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Chat template: chatml, tinyllama or llama3
    #[arg(long)]
    pub template: Option<String>,

    /// Re-submit the whole transcript every turn
    #[arg(long)]
    pub full_prompts: bool,

    /// Do not record tool calls
    #[arg(long)]
    pub no_journal: bool,

    /// Print reasoning blocks instead of hiding them
    #[arg(long)]
    pub show_reasoning: bool,
}

impl ChatArgs {
    /// Apply command-line overrides on top of the loaded config.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(model) = &self.model {
            config.engine.model = model.clone();
        }
        if let Some(size) = self.ctx_size {
            config.engine.context_size = size;
        }
        if let Some(layers) = self.gpu_layers {
            config.engine.gpu_layers = layers;
        }
        if let Some(n) = self.max_tool_iterations {
            config.agent.max_tool_iterations = n;
        }
        if let Some(path) = &self.system_prompt_file {
            config.prompt.system_prompt_file = Some(path.clone());
        }
        if let Some(script) = &self.script {
            config.engine.script = Some(script.clone());
            config.engine.kind = "scripted".into();
        }
        if let Some(kind) = &self.engine {
            config.engine.kind = kind.clone();
        }
        if let Some(template) = &self.template {
            config.engine.template = template.clone();
        }
        if self.full_prompts {
            config.agent.incremental_prompts = false;
        }
        if self.no_journal {
            config.journal.enabled = false;
        }
    }
}

pub async fn run(
    config_path: Option<&Path>,
    args: ChatArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    args.apply(&mut config);
    config.validate()?;

    let (engine, preferred) = build_engine(&config).await?;
    let template = resolve_template(args.template.is_some(), preferred, &config.engine.template);

    let mailbox = Arc::new(InMemoryMailbox::with_sample_data(MAILBOX_ADDRESS).await);
    let mut registry = mail_registry(mailbox);
    if let Some(timeout) = config.tool_timeout() {
        registry = registry.with_default_timeout(timeout);
    }
    let system_prompt = match config.prompt.resolve()? {
        Some(prompt) => prompt,
        None => default_system_prompt(&registry),
    };

    let journal: Arc<dyn ToolCallLog> = if config.journal.enabled {
        Arc::new(super::open_journal(&config).await?)
    } else {
        Arc::new(NoopToolCallLog)
    };

    let tool_names = registry.names().join(", ");
    let engine_name = engine.name().to_string();
    let orchestrator = ChatOrchestrator::new(
        engine,
        Arc::new(registry),
        orchestrator_config(&config, template),
    )
    .with_system_prompt(system_prompt)
    .with_log(journal.clone());

    let view = ViewSettings {
        sink_capacity: config.agent.sink_capacity,
        reasoning_open: config.agent.reasoning_open.clone(),
        reasoning_close: config.agent.reasoning_close.clone(),
        show_reasoning: args.show_reasoning,
    };

    if let Some(message) = args.message {
        // Single message mode
        let reply = ask(&orchestrator, &message, &view).await?;
        if reply.hit_iteration_limit {
            println!("{ITERATION_LIMIT_NOTICE}");
        }
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  toolchat — interactive mode");
    println!();
    println!("  Engine:    {engine_name}");
    println!("  Template:  {template}");
    println!("  Context:   {} tokens", config.engine.context_size);
    println!("  Tools:     {tool_names}");
    println!("  Journal:   {}", journal.name());
    println!();
    println!("  Type your message and press Enter.");
    println!("  /reset clears the conversation, /usage shows context use.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let input = line.trim();

        match input {
            "" => continue,
            "exit" | "quit" | "/exit" | "/quit" => break,
            "/reset" => {
                match orchestrator.reset().await {
                    Ok(()) => println!("  Conversation cleared.\n"),
                    Err(e) => eprintln!("  [Error] {e}\n"),
                }
                continue;
            }
            "/usage" => {
                let (consumed, capacity) = orchestrator.budget_usage().await;
                println!("  Context: {consumed}/{capacity} tokens\n");
                continue;
            }
            _ => {}
        }

        print!("  Assistant > ");
        std::io::stdout().flush()?;
        match ask(&orchestrator, input, &view).await {
            Ok(reply) => {
                if reply.hit_iteration_limit {
                    println!("  {ITERATION_LIMIT_NOTICE}");
                }
                println!();
            }
            Err(AgentError::Cancelled) => println!("\n  [Cancelled]\n"),
            Err(e) => eprintln!("\n  [Error] {e}\n"),
        }
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

struct ViewSettings {
    sink_capacity: usize,
    reasoning_open: String,
    reasoning_close: String,
    show_reasoning: bool,
}

/// Send one message, printing events as they arrive. Ctrl+C cancels the turn.
async fn ask(
    orchestrator: &ChatOrchestrator,
    message: &str,
    view: &ViewSettings,
) -> Result<ChatReply, AgentError> {
    let (tx, mut rx) = mpsc::channel(view.sink_capacity);
    let cancel = CancellationToken::new();

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut filter = ReasoningFilter::new(
        &view.reasoning_open,
        &view.reasoning_close,
        view.show_reasoning,
    );
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            render(&mut filter, event);
        }
    });

    let result = orchestrator.send_with(message, Some(&tx), &cancel).await;
    drop(tx);
    let _ = printer.await;
    interrupt.abort();
    result
}

fn render(filter: &mut ReasoningFilter, event: ChatEvent) {
    let mut out = std::io::stdout();
    match event {
        ChatEvent::Token { content } => {
            let _ = write!(out, "{}", filter.push(&content));
        }
        ChatEvent::ToolCall { name, arguments } => {
            let _ = write!(out, "{}", filter.finish());
            let _ = writeln!(out, "\n  [tool] {name} {arguments}");
        }
        ChatEvent::ToolResult {
            name,
            output,
            succeeded,
        } => {
            let status = if succeeded { "ok" } else { "failed" };
            let _ = writeln!(out, "  [{status}] {name}: {}", preview(&output));
            let _ = write!(out, "  Assistant > ");
        }
        ChatEvent::Done { .. } => {
            let _ = writeln!(out, "{}", filter.finish());
        }
        ChatEvent::Error { message } => {
            tracing::debug!(%message, "Chat event error");
        }
    }
    let _ = out.flush();
}

fn preview(text: &str) -> String {
    if text.chars().count() <= RESULT_PREVIEW_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(RESULT_PREVIEW_CHARS).collect();
    format!("{cut}…")
}

/// Hides reasoning blocks from streamed output.
///
/// Markers may be split across fragments, so a tail that could start a
/// marker is held back until the next fragment decides it.
struct ReasoningFilter {
    open: String,
    close: String,
    show: bool,
    inside: bool,
    pending: String,
}

impl ReasoningFilter {
    fn new(open: &str, close: &str, show: bool) -> Self {
        Self {
            open: open.to_string(),
            close: close.to_string(),
            show: show || open.is_empty() || close.is_empty(),
            inside: false,
            pending: String::new(),
        }
    }

    fn push(&mut self, fragment: &str) -> String {
        if self.show {
            return fragment.to_string();
        }
        self.pending.push_str(fragment);

        let mut visible = String::new();
        loop {
            let marker = if self.inside { &self.close } else { &self.open };
            if let Some(at) = self.pending.find(marker.as_str()) {
                if !self.inside {
                    visible.push_str(&self.pending[..at]);
                }
                let consumed = at + marker.len();
                self.pending.drain(..consumed);
                self.inside = !self.inside;
                continue;
            }

            let held = partial_marker_len(&self.pending, marker);
            let ready = self.pending.len() - held;
            if !self.inside {
                visible.push_str(&self.pending[..ready]);
            }
            self.pending.drain(..ready);
            return visible;
        }
    }

    /// Flush held text at the end of a turn.
    fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        let inside = std::mem::replace(&mut self.inside, false);
        if inside { String::new() } else { rest }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `marker`.
fn partial_marker_len(text: &str, marker: &str) -> usize {
    let longest = marker.len().saturating_sub(1).min(text.len());
    (1..=longest)
        .rev()
        .find(|&k| {
            text.is_char_boundary(text.len() - k)
                && marker.is_char_boundary(k)
                && text.ends_with(&marker[..k])
        })
        .unwrap_or(0)
}

async fn build_engine(
    config: &AppConfig,
) -> Result<(Arc<dyn GenerationEngine>, Option<ChatTemplate>), Box<dyn std::error::Error>> {
    match config.engine.kind.as_str() {
        "scripted" => {
            let path = config
                .engine
                .script
                .as_deref()
                .ok_or("engine.script is required for the scripted engine")?;
            let engine =
                ScriptedEngine::from_jsonl(path)?.with_capacity(config.engine.context_size);
            Ok((Arc::new(engine), None))
        }
        "local" => load_local(config).await,
        other => Err(format!("Unknown engine kind '{other}'").into()),
    }
}

#[cfg(feature = "local")]
async fn load_local(
    config: &AppConfig,
) -> Result<(Arc<dyn GenerationEngine>, Option<ChatTemplate>), Box<dyn std::error::Error>> {
    use toolchat_engine::{LocalEngine, LocalEngineOptions};

    let options = LocalEngineOptions {
        model: config.engine.model.clone(),
        context_size: config.engine.context_size,
        gpu_layers: config.engine.gpu_layers,
        temperature: config.engine.temperature,
        seed: config.engine.seed,
    };
    eprintln!("  Loading model {} ...", options.model);
    let engine = tokio::task::spawn_blocking(move || LocalEngine::load(options)).await??;
    let preferred = ChatTemplate::from_name(engine.preferred_template());
    Ok((Arc::new(engine), preferred))
}

#[cfg(not(feature = "local"))]
async fn load_local(
    _config: &AppConfig,
) -> Result<(Arc<dyn GenerationEngine>, Option<ChatTemplate>), Box<dyn std::error::Error>> {
    Err("this build has no local engine; rebuild with `--features local` \
         or use `--engine scripted --script FILE`"
        .into())
}

/// An explicit `--template` wins, then the model's own template, then config.
fn resolve_template(
    explicit: bool,
    preferred: Option<ChatTemplate>,
    configured: &str,
) -> ChatTemplate {
    let configured = ChatTemplate::from_name(configured).unwrap_or_default();
    if explicit {
        configured
    } else {
        preferred.unwrap_or(configured)
    }
}

fn orchestrator_config(config: &AppConfig, template: ChatTemplate) -> OrchestratorConfig {
    OrchestratorConfig {
        max_tool_iterations: config.agent.max_tool_iterations,
        max_response_units: config.engine.max_response_units,
        max_response_chars: config.engine.max_response_chars,
        incremental_prompts: config.agent.incremental_prompts,
        tool_timeout: config.tool_timeout(),
        reasoning_close: config.agent.reasoning_close.clone(),
        eviction_margin_divisor: config.agent.eviction_margin_divisor,
        template,
    }
}
