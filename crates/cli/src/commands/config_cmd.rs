//! `localcoder config` — Configuration management commands.

use std::path::PathBuf;

use localcoder_config::AppConfig;

pub fn print_default() -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", AppConfig::default_toml());
    Ok(())
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match AppConfig::load_with_env(&super::config_file(config_path.as_deref())) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Engine:    {}", config.model.engine);
    println!("   Model:     {}", config.model.model);
    println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Sessions:  {}", config.persistence.backend);
    Ok(())
}

/// Settings that are valid but probably not what the user wants.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if config.gateway.host == "0.0.0.0" {
        warnings.push("Gateway bound to 0.0.0.0; the API has no authentication");
    }
    if config.generation.max_tokens > config.context.reserved_output_tokens {
        warnings.push("generation.max_tokens exceeds context.reserved_output_tokens");
    }
    if config.model.engine != "llama-server" && config.model.api_url.is_some() {
        warnings.push("model.api_url is only used by the llama-server engine");
    }
    if !config.cache.enabled && config.cache.snapshot_path.is_some() {
        warnings.push("cache.snapshot_path is set but the cache is disabled");
    }
    warnings
}

pub fn show(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path.as_deref())?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", super::config_file(config_path.as_deref()).display());
    Ok(())
}
