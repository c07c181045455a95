//! `ragflow init` — First-time setup.

use std::path::Path;

use ragflow_config::AppConfig;

pub async fn run(path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::config_dir().join("config.toml"),
    };

    println!("RAGFlow — First-Time Setup");
    println!("==========================\n");

    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty())
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
        println!("✅ Created config directory: {}", dir.display());
    }

    if config_path.exists() && !force {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or re-run with --force to overwrite.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Wrote config.toml at: {}", config_path.display());

    let defaults = AppConfig::default();
    println!("\n📝 Next steps:");
    println!("   1. Put markdown documents under ./{}", defaults.retrieval.data_dir.display());
    println!("   2. Set RAGFLOW_API_KEY (or OPENROUTER_API_KEY / OPENAI_API_KEY)");
    println!("   3. Run: ragflow chat\n");

    Ok(())
}
