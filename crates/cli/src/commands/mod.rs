//! Subcommand implementations and the wiring they share.

pub mod ask;
pub mod bench;
pub mod chat;
pub mod code;
pub mod config_cmd;
pub mod models;
pub mod serve;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use localcoder_agent::{Coordinator, persistence_from_config};
use localcoder_config::AppConfig;

/// Path the configuration is read from: `--config` or the default location.
pub fn config_file(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load the configuration with environment overrides applied.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = AppConfig::load_with_env(&config_file(path))
        .map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(config)
}

/// Build the engine, session persistence and coordinator described by `config`.
pub fn build_coordinator(config: &AppConfig) -> Result<Arc<Coordinator>, Box<dyn std::error::Error>> {
    let engine = localcoder_engines::build_from_config(config)
        .map_err(|e| format!("Failed to start inference engine: {e}"))?;
    let persistence = persistence_from_config(config)?;
    let coordinator = Coordinator::from_config(config, engine, Some(persistence))?;
    Ok(Arc::new(coordinator))
}

/// Read source code from a file, or from stdin when the path is `-`.
pub fn read_source(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()).into())
}

/// Guess a language from a file extension.
pub fn language_for(path: &Path) -> Option<String> {
    let lang = match path.extension()?.to_str()? {
        "py" => "python",
        "rs" => "rust",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "rb" => "ruby",
        "sh" | "bash" => "bash",
        "sql" => "sql",
        _ => return None,
    };
    Some(lang.to_string())
}
