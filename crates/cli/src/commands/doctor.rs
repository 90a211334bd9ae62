//! `toolchat doctor` — Diagnose setup.

use std::path::Path;
use toolchat_config::AppConfig;
use toolchat_engine::ScriptedEngine;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 toolchat doctor");
    println!("==================\n");

    let mut issues = 0;

    // Check config
    let file = super::config_file(config_path);
    let config = if file.exists() {
        match super::load_config(config_path) {
            Ok(config) => {
                println!("  ✅ Config file valid ({})", file.display());
                config
            }
            Err(e) => {
                println!("  ❌ Config file invalid: {e}");
                println!("\n  ⚠️  Fix the config file before running other checks.");
                return Ok(());
            }
        }
    } else {
        println!("  ⚠️  No config file; using defaults (run `toolchat config init`)");
        AppConfig::default()
    };

    issues += check_engine(&config);
    issues += check_prompt(&config);
    issues += check_journal(&config).await;

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

fn check_engine(config: &AppConfig) -> usize {
    match config.engine.kind.as_str() {
        "scripted" => match config.engine.script.as_deref() {
            Some(script) => match ScriptedEngine::from_jsonl(script) {
                Ok(_) => {
                    println!("  ✅ Engine script readable ({})", script.display());
                    0
                }
                Err(e) => {
                    println!("  ❌ Engine script unusable: {e}");
                    1
                }
            },
            None => {
                println!("  ❌ Scripted engine selected but engine.script is not set");
                1
            }
        },
        _ => {
            let mut issues = 0;
            if cfg!(feature = "local") {
                println!("  ✅ Local engine compiled in");
            } else {
                println!("  ❌ Local engine not compiled in (rebuild with --features local)");
                issues += 1;
            }

            let model = &config.engine.model;
            if model.ends_with(".gguf") && !Path::new(model).exists() {
                println!("  ❌ Model file not found: {model}");
                issues += 1;
            } else {
                println!("  ✅ Model: {model}");
            }
            issues
        }
    }
}

fn check_prompt(config: &AppConfig) -> usize {
    match config.prompt.resolve() {
        Ok(Some(_)) => {
            println!("  ✅ Custom system prompt loaded");
            0
        }
        Ok(None) => {
            println!("  ✅ Using the built-in system prompt");
            0
        }
        Err(e) => {
            println!("  ❌ System prompt: {e}");
            1
        }
    }
}

async fn check_journal(config: &AppConfig) -> usize {
    if !config.journal.enabled {
        println!("  ⚠️  Tool-call journal disabled");
        return 0;
    }
    match super::open_journal(config).await {
        Ok(_) => {
            println!(
                "  ✅ Tool-call journal ready ({})",
                config.journal.resolved_path().display()
            );
            0
        }
        Err(e) => {
            println!("  ❌ Tool-call journal unavailable: {e}");
            1
        }
    }
}
