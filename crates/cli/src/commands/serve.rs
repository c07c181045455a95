//! `ragflow serve` — Start the HTTP API server.

use ragflow_config::AppConfig;

use crate::bootstrap;

pub async fn run(mut config: AppConfig, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let engine = bootstrap::build_engine(&config).await?;
    let stats = engine.index_stats().await;

    println!("RAGFlow Gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Index:     {} documents, {} chunks ({})", stats.documents, stats.chunks, stats.status);
    println!("   Model:     {}", config.generator.model);

    ragflow_gateway::start(config, engine).await?;

    Ok(())
}
