//! `ragflow status` — Show configuration and index status.

use std::path::Path;

use ragflow_config::AppConfig;

use crate::bootstrap;

pub async fn run(config: AppConfig, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::config_dir().join("config.toml"),
    };

    println!("RAGFlow Status");
    println!("==============");
    println!("  Config file:  {}", config_path.display());
    println!("  Provider:     {}", config.generator.provider);
    println!("  Model:        {}", config.generator.model);
    println!("  API key:      {}", if config.has_api_key() { "configured" } else { "missing" });
    println!("  Data dir:     {}", config.retrieval.data_dir.display());
    println!("  Embedder:     {}", config.retrieval.embedder);
    println!(
        "  Decision:     threshold {:.3}, top-k {}, fetch-k {}",
        config.retrieval.distance_threshold, config.retrieval.top_k, config.retrieval.fetch_k
    );
    println!(
        "  Retry:        {} attempts, {}ms base, x{}",
        config.retry.max_attempts, config.retry.base_delay_ms, config.retry.multiplier
    );
    println!("  Memory:       {} turns per session", config.memory.max_turns);
    println!("  Gateway:      {}:{}", config.gateway.host, config.gateway.port);

    match bootstrap::build_index(&config).await {
        Ok(index) => {
            use ragflow_core::Retriever;
            let stats = index.stats().await;
            println!("  Index:        {} documents, {} chunks ({})", stats.documents, stats.chunks, stats.status);
        }
        Err(e) => println!("  Index:        unavailable ({e:#})"),
    }

    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `ragflow init` first");
    }

    Ok(())
}
