//! `localcoder status` — Show configuration and engine status.

use std::path::PathBuf;

use localcoder_engines::resolve_preset;

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path.as_deref())?;
    let file = super::config_file(config_path.as_deref());

    println!("🧠 LocalCoder Status");
    println!("===================");
    println!("  Config file:  {}", file.display());
    println!("  Engine:       {}", config.model.engine);
    println!("  Model:        {}", config.model.model);
    if let Some(url) = &config.model.api_url {
        println!("  Engine URL:   {url}");
    }
    println!("  Template:     {}", config.model.template);
    println!(
        "  Context:      {} tokens ({} reserved, {} turns kept)",
        config.context.max_context_tokens,
        config.context.reserved_output_tokens,
        config.context.max_history_turns
    );
    println!(
        "  Generation:   {} tokens max, temperature {}",
        config.generation.max_tokens, config.generation.temperature
    );
    println!(
        "  Cache:        {}",
        if config.cache.enabled { "enabled" } else { "disabled" }
    );
    println!(
        "  Timeouts:     chat {}s, code {}s",
        config.dispatcher.inference_timeout_seconds,
        config.dispatcher.code_inference_timeout_seconds
    );
    println!("  Sessions:     {}", config.persistence.backend);
    println!("  Gateway:      {}:{}", config.gateway.host, config.gateway.port);

    println!();
    if file.exists() {
        println!("  ✅ Config file found");
    } else {
        println!("  ⚠️  No config file, using defaults (`localcoder config > {}`)", file.display());
    }

    if config.model.engine == "local" && resolve_preset(&config.model.model).is_none() {
        println!(
            "  ⚠️  '{}' is not a known preset; run `localcoder models`",
            config.model.model
        );
    }

    match localcoder_engines::build_from_config(&config) {
        Ok(engine) => match engine.health_check().await {
            Ok(true) => println!("  ✅ Engine ready ({})", engine.model_id()),
            Ok(false) => println!("  ⚠️  Engine '{}' is not responding", engine.model_id()),
            Err(e) => println!("  ❌ Engine health check failed: {e}"),
        },
        Err(e) => println!("  ❌ Engine unavailable: {e}"),
    }

    if config.persistence.backend == "file" {
        let dir = config.persistence.sessions_dir();
        let sessions = std::fs::read_dir(&dir)
            .map(|entries| entries.filter_map(Result::ok).count())
            .unwrap_or(0);
        println!("  📁 {sessions} saved session(s) in {}", dir.display());
    }

    Ok(())
}
