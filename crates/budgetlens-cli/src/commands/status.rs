//! Status command

use std::path::Path;

use anyhow::Result;
use budgetlens_core::{
    categorize::CATEGORIES_CONFIG_FILE,
    config::{default_config_dir, PIPELINE_CONFIG_FILE},
    prompts::default_prompts_dir,
    AIClient, LlmBackend, PromptId, PromptLibrary,
};

use super::{load_categorizer, load_config, open_db};

pub async fn cmd_status(db_path: &Path, config_dir: Option<&Path>) -> Result<()> {
    println!();
    println!("📊 Budgetlens Status");
    println!("   ─────────────────────────────────────────────────────────────");

    println!("   Database: {}", db_path.display());
    if db_path.exists() {
        if let Ok(metadata) = std::fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
        if let Err(e) = open_db(db_path) {
            println!("   ❌ Error opening database: {}", e);
        }
    } else {
        println!("   Size: (database not initialized, run 'budgetlens init')");
    }

    // Config layers
    println!();
    let dir = config_dir
        .map(Path::to_path_buf)
        .or_else(default_config_dir);
    match &dir {
        Some(dir) => println!("   Config dir: {}", dir.display()),
        None => println!("   Config dir: (not available)"),
    }
    for file in [PIPELINE_CONFIG_FILE, CATEGORIES_CONFIG_FILE] {
        let overridden = dir.as_ref().is_some_and(|d| d.join(file).exists());
        println!(
            "   {:<18} {}",
            file,
            if overridden { "✓ override" } else { "default" }
        );
    }
    match load_config(config_dir) {
        Ok(config) => {
            println!(
                "   Extraction: {} tokens/segment, {}s timeout, {} retries",
                config.extraction.token_budget,
                config.extraction.timeout.as_secs(),
                config.retry.max_upstream_retries
            );
            if config.cleaning.enabled {
                println!(
                    "   Cleaning: on ({})",
                    config.cleaning.model.as_deref().unwrap_or("extraction model")
                );
            } else {
                println!("   Cleaning: off");
            }
        }
        Err(e) => println!("   ❌ {:#}", e),
    }
    match load_categorizer(config_dir) {
        Ok(categorizer) => println!(
            "   Taxonomy: {} categories, {} rules",
            categorizer.taxonomy().len(),
            categorizer.rules().len()
        ),
        Err(e) => println!("   ❌ {:#}", e),
    }
    let library = match default_prompts_dir() {
        Some(dir) => PromptLibrary::with_override_dir(dir),
        None => PromptLibrary::embedded_only(),
    };
    for id in PromptId::all() {
        println!(
            "   Prompt {:<21} {}",
            id.as_str(),
            if library.has_override(*id) {
                "✓ override"
            } else {
                "default"
            }
        );
    }

    // AI backend
    println!();
    match AIClient::from_env() {
        Some(client) => {
            let healthy = client.health_check().await;
            println!(
                "   AI backend: {} ({} at {})",
                client.kind(),
                client.model(),
                client.host()
            );
            if healthy {
                println!("   🟢 Reachable");
            } else {
                println!("   🔴 Not reachable");
            }
        }
        None => {
            println!("   AI backend: not configured");
            println!("   💡 Set OLLAMA_HOST or OPENAI_COMPATIBLE_HOST to enable ingestion");
        }
    }

    println!();
    Ok(())
}
