//! Subcommand implementations.

pub mod chat;
pub mod config_cmd;
pub mod doctor;
pub mod history;

use std::path::{Path, PathBuf};
use toolchat_config::{AppConfig, ConfigError};
use toolchat_memory::SqliteToolCallLog;

/// The config file in use: `--config` if given, else the default location.
pub fn config_file(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load configuration with `TOOLCHAT_*` overrides applied.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        None => AppConfig::load(),
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            Ok(config)
        }
    }
}

/// Open the journal database, creating its directory if needed.
pub async fn open_journal(
    config: &AppConfig,
) -> Result<SqliteToolCallLog, Box<dyn std::error::Error>> {
    let path = config.journal.resolved_path();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let log = SqliteToolCallLog::new(&path.to_string_lossy()).await?;
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_path_wins() {
        let path = Path::new("/tmp/custom.toml");
        assert_eq!(config_file(Some(path)), PathBuf::from("/tmp/custom.toml"));
        assert!(config_file(None).ends_with("config.toml"));
    }

    #[test]
    fn missing_explicit_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.agent.max_tool_iterations, 5);
    }
}
