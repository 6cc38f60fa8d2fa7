//! `localcoder models` — List known model presets.

use std::path::PathBuf;

use localcoder_engines::{ModelPreset, PRESETS, resolve_preset};

pub fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path.as_deref())?;
    let current = resolve_preset(&config.model.model).map(|p| p.name);

    println!("🤖 Model Presets");
    println!("================");
    println!();
    for line in table(PRESETS, current) {
        println!("  {line}");
    }
    println!();
    println!("  Select one in config.toml:");
    println!("    [model]");
    println!("    model = \"{}\"", PRESETS[0].name);
    println!();
    println!("  Or run a llama-server and point LocalCoder at it:");
    println!("    LOCALCODER_ENGINE=llama-server LOCALCODER_ENGINE_URL=http://127.0.0.1:8080");
    Ok(())
}

/// Render presets as table rows; the active preset is starred.
fn table(presets: &[ModelPreset], current: Option<&str>) -> Vec<String> {
    let mut rows = vec![
        format!("  {:<22} {:<10} {:<9} {}", "Name", "Template", "Size", "Aliases"),
        format!("  {}", "─".repeat(66)),
    ];
    for preset in presets {
        let marker = if Some(preset.name) == current { "*" } else { " " };
        rows.push(format!(
            "{marker} {:<22} {:<10} {:<9} {}",
            preset.name,
            preset.template,
            preset.size,
            preset.aliases.join(", ")
        ));
    }
    rows
}
