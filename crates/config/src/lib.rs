//! Configuration loading, validation, and management for toolchat.
//!
//! Loads configuration from `~/.toolchat/config.toml` with environment
//! variable overrides. Validates all settings at startup. Command-line
//! flags are applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.toolchat/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Chat loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// System prompt source
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Tool-call journal
    #[serde(default)]
    pub journal: JournalConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Which engine to run: "local" or "scripted"
    #[serde(default = "default_engine_kind")]
    pub kind: String,

    /// GGUF file path or preset alias for the local engine
    #[serde(default = "default_model")]
    pub model: String,

    /// Context window size in tokens
    #[serde(default = "default_context_size")]
    pub context_size: usize,

    /// Layers to offload to the GPU
    #[serde(default = "default_gpu_layers")]
    pub gpu_layers: u32,

    /// Chat template: "chatml", "tinyllama" or "llama3"
    #[serde(default = "default_template")]
    pub template: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Upper bound on generated tokens per turn
    #[serde(default = "default_max_response_units")]
    pub max_response_units: usize,

    /// Generation stops once a turn reaches this many characters
    #[serde(default = "default_max_response_chars")]
    pub max_response_chars: usize,

    /// Turn script for the scripted engine (one JSON string per line)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
}

fn default_engine_kind() -> String {
    "local".into()
}
fn default_model() -> String {
    "smollm:360m".into()
}
fn default_context_size() -> usize {
    4096
}
fn default_gpu_layers() -> u32 {
    99
}
fn default_template() -> String {
    "chatml".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_seed() -> u64 {
    42
}
fn default_max_response_units() -> usize {
    512
}
fn default_max_response_chars() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: default_engine_kind(),
            model: default_model(),
            context_size: default_context_size(),
            gpu_layers: default_gpu_layers(),
            template: default_template(),
            temperature: default_temperature(),
            seed: default_seed(),
            max_response_units: default_max_response_units(),
            max_response_chars: default_max_response_chars(),
            script: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Generation turns allowed per message before the loop gives up
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,

    /// Eviction margin is `context_size / eviction_margin_divisor`
    #[serde(default = "default_eviction_margin_divisor")]
    pub eviction_margin_divisor: usize,

    #[serde(default = "default_reasoning_open")]
    pub reasoning_open: String,

    #[serde(default = "default_reasoning_close")]
    pub reasoning_close: String,

    /// Per-dispatch tool timeout; 0 disables it
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Submit only new text to a stateful engine
    #[serde(default = "default_true")]
    pub incremental_prompts: bool,

    /// Buffer size of the token channel to the terminal
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
}

fn default_max_tool_iterations() -> usize {
    5
}
fn default_eviction_margin_divisor() -> usize {
    4
}
fn default_reasoning_open() -> String {
    "<think>".into()
}
fn default_reasoning_close() -> String {
    "</think>".into()
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_sink_capacity() -> usize {
    64
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            eviction_margin_divisor: default_eviction_margin_divisor(),
            reasoning_open: default_reasoning_open(),
            reasoning_close: default_reasoning_close(),
            tool_timeout_secs: default_tool_timeout_secs(),
            incremental_prompts: true,
            sink_capacity: default_sink_capacity(),
        }
    }
}

/// Where the system prompt comes from. A file wins over inline text;
/// with neither set the binary builds one from the registered tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<PathBuf>,
}

impl PromptConfig {
    /// Resolve the configured prompt text, reading the file if one is set.
    pub fn resolve(&self) -> Result<Option<String>, ConfigError> {
        if let Some(path) = &self.system_prompt_file {
            let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            return Ok(Some(text));
        }
        Ok(self.system_prompt.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Database file; defaults to `~/.toolchat/tool_calls.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl JournalConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("tool_calls.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// pretty | json
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "warn".into()
}
fn default_log_format() -> String {
    "pretty".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

const ENGINE_KINDS: &[&str] = &["local", "scripted"];
const TEMPLATES: &[&str] = &["chatml", "tinyllama", "llama3"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "json"];

impl AppConfig {
    /// Load configuration from the default location with env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `TOOLCHAT_*` overrides looked up through `lookup`, then re-validate.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("TOOLCHAT_MODEL") {
            self.engine.model = model;
        }
        if let Some(kind) = lookup("TOOLCHAT_ENGINE") {
            self.engine.kind = kind;
        }
        if let Some(ctx) = lookup("TOOLCHAT_CTX_SIZE") {
            self.engine.context_size = parse_override("TOOLCHAT_CTX_SIZE", &ctx)?;
        }
        if let Some(n) = lookup("TOOLCHAT_MAX_TOOL_ITERATIONS") {
            self.agent.max_tool_iterations = parse_override("TOOLCHAT_MAX_TOOL_ITERATIONS", &n)?;
        }
        if let Some(path) = lookup("TOOLCHAT_SYSTEM_PROMPT_FILE") {
            self.prompt.system_prompt_file = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("TOOLCHAT_JOURNAL") {
            self.journal.path = Some(PathBuf::from(path));
        }
        if let Some(level) = lookup("TOOLCHAT_LOG_LEVEL") {
            self.logging.level = level;
        }
        self.validate()
    }

    /// Get the configuration directory path (`$TOOLCHAT_HOME` or `~/.toolchat`).
    pub fn config_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("TOOLCHAT_HOME") {
            return PathBuf::from(dir);
        }
        dirs_home().join(".toolchat")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if !ENGINE_KINDS.contains(&engine.kind.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "engine.kind must be one of {ENGINE_KINDS:?}, got '{}'",
                engine.kind
            )));
        }
        if !TEMPLATES.contains(&engine.template.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "engine.template must be one of {TEMPLATES:?}, got '{}'",
                engine.template
            )));
        }
        if engine.context_size == 0 {
            return Err(ConfigError::ValidationError(
                "engine.context_size must be > 0".into(),
            ));
        }
        if engine.max_response_units == 0 || engine.max_response_units >= engine.context_size {
            return Err(ConfigError::ValidationError(
                "engine.max_response_units must be > 0 and below engine.context_size".into(),
            ));
        }
        if engine.temperature < 0.0 || engine.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "engine.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if engine.kind == "scripted" && engine.script.is_none() {
            return Err(ConfigError::ValidationError(
                "engine.script is required when engine.kind = \"scripted\"".into(),
            ));
        }

        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be >= 1".into(),
            ));
        }
        if self.agent.eviction_margin_divisor == 0 {
            return Err(ConfigError::ValidationError(
                "agent.eviction_margin_divisor must be >= 1".into(),
            ));
        }
        if self.agent.reasoning_close.is_empty() {
            return Err(ConfigError::ValidationError(
                "agent.reasoning_close must not be empty".into(),
            ));
        }
        if self.agent.sink_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "agent.sink_capacity must be > 0".into(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of {LOG_LEVELS:?}, got '{}'",
                self.logging.level
            )));
        }
        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.format must be one of {LOG_FORMATS:?}, got '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Tool timeout as a `Duration`, `None` when disabled.
    pub fn tool_timeout(&self) -> Option<std::time::Duration> {
        match self.agent.tool_timeout_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key}: '{value}' is not a valid number")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
