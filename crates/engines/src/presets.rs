//! Well-known model aliases.
//!
//! Presets resolve a friendly name to a HuggingFace GGUF repo, the tokenizer
//! repo, and the prompt template the model was fine-tuned on. They are
//! available without the `local` feature so front ends can list them.

/// A model preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPreset {
    /// Canonical name shown to users
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub repo: &'static str,
    pub gguf_file: &'static str,
    pub tokenizer_repo: &'static str,
    /// Prompt template name understood by the context assembler
    pub template: &'static str,
    /// Approximate download size
    pub size: &'static str,
}

pub const PRESETS: &[ModelPreset] = &[
    ModelPreset {
        name: "deepseek-coder-1.3b",
        aliases: &["deepseek-coder", "deepseek", "deepseek-coder-1.3b-instruct"],
        repo: "TheBloke/deepseek-coder-1.3b-instruct-GGUF",
        gguf_file: "deepseek-coder-1.3b-instruct.Q4_K_M.gguf",
        tokenizer_repo: "deepseek-ai/deepseek-coder-1.3b-instruct",
        template: "chatml",
        size: "~870 MB",
    },
    ModelPreset {
        name: "tinyllama",
        aliases: &["tiny-llama", "tinyllama-1.1b"],
        repo: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
        gguf_file: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
        tokenizer_repo: "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
        template: "tinyllama",
        size: "~670 MB",
    },
    ModelPreset {
        name: "smollm:360m",
        aliases: &["smollm", "smollm-360m"],
        repo: "TheBloke/SmolLM-360M-Instruct-GGUF",
        gguf_file: "smollm-360m-instruct.Q4_K_M.gguf",
        tokenizer_repo: "HuggingFaceTB/SmolLM-360M-Instruct",
        template: "chatml",
        size: "~230 MB",
    },
    ModelPreset {
        name: "qwen:0.5b",
        aliases: &["qwen-0.5b", "qwen2-0.5b"],
        repo: "Qwen/Qwen2-0.5B-Instruct-GGUF",
        gguf_file: "qwen2-0_5b-instruct-q4_k_m.gguf",
        tokenizer_repo: "Qwen/Qwen2-0.5B-Instruct",
        template: "chatml",
        size: "~400 MB",
    },
    ModelPreset {
        name: "qwen:1.5b",
        aliases: &["qwen-1.5b", "qwen2-1.5b"],
        repo: "Qwen/Qwen2-1.5B-Instruct-GGUF",
        gguf_file: "qwen2-1_5b-instruct-q4_k_m.gguf",
        tokenizer_repo: "Qwen/Qwen2-1.5B-Instruct",
        template: "chatml",
        size: "~990 MB",
    },
];

/// Resolve a preset by name or alias (case-insensitive).
pub fn resolve_preset(alias: &str) -> Option<&'static ModelPreset> {
    let alias = alias.to_lowercase();
    PRESETS
        .iter()
        .find(|p| p.name == alias || p.aliases.contains(&alias.as_str()))
}

/// Comma-separated preset names, for error messages.
pub fn preset_names() -> String {
    PRESETS.iter().map(|p| p.name).collect::<Vec<_>>().join(", ")
}
