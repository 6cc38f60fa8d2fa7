//! `localcoder ask` — One-shot question.

use std::path::PathBuf;

use localcoder_core::session::SessionId;

pub async fn run(
    config_path: Option<PathBuf>,
    prompt: String,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path.as_deref())?;
    let coordinator = super::build_coordinator(&config)?;

    eprint!("  Thinking...");
    let result = coordinator.chat(&SessionId::new(), prompt).await;
    eprint!("\r              \r");

    let response = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", response.response_text);
    }
    Ok(())
}
