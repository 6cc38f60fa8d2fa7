//! `localcoder code`, `explain` and `debug` — one-shot code tasks.

use std::path::PathBuf;

use localcoder_agent::AssistResponse;
use localcoder_core::session::SessionId;

pub async fn generate(
    config_path: Option<PathBuf>,
    prompt: String,
    language: Option<String>,
    template: Option<String>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path.as_deref())?;
    let coordinator = super::build_coordinator(&config)?;

    eprintln!("  Generating code: {prompt}");
    if let Some(lang) = &language {
        eprintln!("  Language: {lang}");
    }

    let response = coordinator
        .code(&SessionId::new(), prompt, language, template)
        .await?;
    println!("{}", response.response_text);
    report(&response);

    if let Some(path) = output {
        std::fs::write(&path, format!("{}\n", response.response_text))
            .map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
        eprintln!("  💾 Saved to: {}", path.display());
    }
    Ok(())
}

pub async fn explain(
    config_path: Option<PathBuf>,
    file: PathBuf,
    language: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path.as_deref())?;
    let code = super::read_source(&file)?;
    let language = language.or_else(|| super::language_for(&file));
    let coordinator = super::build_coordinator(&config)?;

    let response = coordinator
        .explain(&SessionId::new(), code, language)
        .await?;
    println!("{}", response.response_text);
    report(&response);
    Ok(())
}

pub async fn debug(
    config_path: Option<PathBuf>,
    file: PathBuf,
    error: Option<String>,
    language: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path.as_deref())?;
    let code = super::read_source(&file)?;
    let language = language.or_else(|| super::language_for(&file));
    let coordinator = super::build_coordinator(&config)?;

    let response = coordinator
        .debug(&SessionId::new(), code, language, error)
        .await?;
    println!("{}", response.response_text);
    report(&response);
    Ok(())
}

fn report(response: &AssistResponse) {
    tracing::debug!(
        latency_ms = response.latency_ms,
        prompt_tokens = response.token_usage.prompt_tokens,
        completion_tokens = response.token_usage.completion_tokens,
        cache_hit = response.cache_hit,
        "Request finished"
    );
}
