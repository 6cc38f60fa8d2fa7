//! `localcoder serve` — Start the HTTP API server.

use std::path::PathBuf;

pub async fn run(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path.as_deref())?;

    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    let coordinator = super::build_coordinator(&config)?;

    println!("🧠 LocalCoder Gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", coordinator.model_id());
    println!("   Sessions:  {}", config.persistence.backend);
    println!("   Cache:     {}", cache_summary(&config));

    localcoder_gateway::start(&config, coordinator).await?;

    Ok(())
}

fn cache_summary(config: &localcoder_config::AppConfig) -> String {
    if config.cache.enabled {
        format!(
            "{} entries, {}s TTL",
            config.cache.cache_capacity, config.cache.cache_ttl_seconds
        )
    } else {
        "disabled".into()
    }
}
