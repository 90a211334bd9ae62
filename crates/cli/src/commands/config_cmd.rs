//! `toolchat config` — Configuration management commands.

use std::path::Path;
use toolchat_config::AppConfig;

pub async fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

/// Write a starter config file.
pub async fn init(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = super::config_file(config_path);
    write_starter(&path, force)?;
    println!("✅ Wrote {}", path.display());
    Ok(())
}

pub async fn path(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", super::config_file(config_path).display());
    Ok(())
}

fn write_starter(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(())
}
