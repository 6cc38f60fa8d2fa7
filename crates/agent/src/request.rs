//! Request kinds and the prompts they produce.
//!
//! Each [`Task`] knows its system preamble, how to phrase the user turn,
//! how it adjusts the base generation parameters, which timeout class it
//! runs under, and how its raw output is cleaned up.

use localcoder_core::engine::GenerationParams;
use serde::{Deserialize, Serialize};

/// Language assumed for explain/debug requests that do not name one.
pub const DEFAULT_LANGUAGE: &str = "python";

/// Upper bound on the token allowance for code generation.
pub const CODE_MAX_TOKENS: usize = 2048;

const CHAT_PREAMBLE: &str = "You are a helpful coding assistant. Provide clear, concise, and accurate responses.\n\
Focus on practical solutions and best practices. If you're not sure about something, say so.";

const CODE_PRINCIPLES: &str = "Follow these principles:\n\
- Write clean, readable, and well-documented code\n\
- Include proper error handling where appropriate\n\
- Follow language-specific best practices and conventions\n\
- Add helpful comments explaining complex logic\n\
- Include necessary imports and dependencies\n\
- Make the code modular and reusable when possible";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Chat,
    Code,
    Explain,
    Debug,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Code => "code",
            Self::Explain => "explain",
            Self::Debug => "debug",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which configured inference timeout applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Chat,
    Code,
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Task {
    Chat {
        message: String,
    },
    Code {
        prompt: String,
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        template: Option<String>,
    },
    Explain {
        code: String,
        #[serde(default)]
        language: Option<String>,
    },
    Debug {
        code: String,
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        error_message: Option<String>,
    },
}

impl Task {
    pub fn chat(message: impl Into<String>) -> Self {
        Self::Chat {
            message: message.into(),
        }
    }

    pub fn code(prompt: impl Into<String>) -> Self {
        Self::Code {
            prompt: prompt.into(),
            language: None,
            template: None,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Chat { .. } => RequestKind::Chat,
            Self::Code { .. } => RequestKind::Code,
            Self::Explain { .. } => RequestKind::Explain,
            Self::Debug { .. } => RequestKind::Debug,
        }
    }

    pub fn timeout_class(&self) -> TimeoutClass {
        match self {
            Self::Code { .. } => TimeoutClass::Code,
            _ => TimeoutClass::Chat,
        }
    }

    /// The text the user actually typed or pasted.
    pub fn primary_text(&self) -> &str {
        match self {
            Self::Chat { message } => message,
            Self::Code { prompt, .. } => prompt,
            Self::Explain { code, .. } | Self::Debug { code, .. } => code,
        }
    }

    /// System preamble for this kind. `chat_override` replaces the chat
    /// preamble only.
    pub fn system_preamble(&self, chat_override: Option<&str>) -> String {
        match self {
            Self::Chat { .. } => chat_override.unwrap_or(CHAT_PREAMBLE).to_string(),
            Self::Code {
                language, template, ..
            } => {
                let mut parts = vec![
                    "You are an expert coding assistant. Generate high-quality, production-ready code."
                        .to_string(),
                ];
                parts.push(match non_empty(language) {
                    Some(lang) => format!("Generate code in {lang}."),
                    None => "Auto-detect the best programming language for the task.".to_string(),
                });
                parts.push(CODE_PRINCIPLES.to_string());
                if let Some(template) = non_empty(template) {
                    parts.push(format!("Use this template structure: {template}"));
                }
                parts.join("\n")
            }
            Self::Explain { language, .. } => format!(
                "You are a coding assistant. Explain the provided {} code clearly and concisely.\n\
                 Focus on what the code does, how it works, and any important patterns or concepts.",
                language_or_default(language)
            ),
            Self::Debug { language, .. } => format!(
                "You are a debugging assistant. Analyze the provided {} code and identify issues.\n\
                 Provide specific fixes and explanations. If an error message is provided, focus on that specific issue.",
                language_or_default(language)
            ),
        }
    }

    /// Render the user turn around an already normalized primary text.
    pub fn user_prompt(&self, primary: &str) -> String {
        match self {
            Self::Chat { .. } => primary.to_string(),
            Self::Code { language, .. } => format!(
                "Code Generation Request:\n{primary}\n\n\
                 Requirements:\n\
                 - Language: {}\n\
                 - Style: Production-ready with proper documentation\n\
                 - Include: Imports, error handling, comments\n\
                 - Format: Clean and well-structured\n\n\
                 Generate the complete code:",
                non_empty(language).unwrap_or("Auto-detect best fit")
            ),
            Self::Explain { language, .. } => {
                let lang = language_or_default(language);
                format!("Please explain this {lang} code:\n\n```{lang}\n{primary}\n```")
            }
            Self::Debug {
                language,
                error_message,
                ..
            } => {
                let lang = language_or_default(language);
                match non_empty(error_message) {
                    Some(err) => format!(
                        "Please debug this {lang} code. Error: {err}\n\n```{lang}\n{primary}\n```"
                    ),
                    None => format!(
                        "Please analyze this {lang} code for potential issues:\n\n```{lang}\n{primary}\n```"
                    ),
                }
            }
        }
    }

    /// Derive this request's parameters from the configured base.
    pub fn adjust_params(&self, base: &GenerationParams) -> GenerationParams {
        match self {
            Self::Code { .. } => {
                let mut params = base.clone();
                params.max_tokens = base.max_tokens.saturating_mul(2).min(CODE_MAX_TOKENS);
                params.temperature = (base.temperature - 0.1).max(0.1);
                let fence_stop = "```\n\n".to_string();
                if !params.stop_sequences.contains(&fence_stop) {
                    params.stop_sequences.push(fence_stop);
                }
                params
            }
            _ => base.clone(),
        }
    }

    /// Clean up raw engine output.
    pub fn post_process(&self, text: &str) -> String {
        let text = text.trim();
        match self {
            Self::Code { .. } => strip_code_fence(text),
            _ => text.to_string(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn language_or_default(language: &Option<String>) -> &str {
    non_empty(language).unwrap_or(DEFAULT_LANGUAGE)
}

/// Remove a markdown fence wrapping the whole response.
pub fn strip_code_fence(text: &str) -> String {
    if !text.starts_with("```") {
        return text.to_string();
    }
    let mut lines: Vec<&str> = text.lines().collect();
    lines.remove(0);
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    lines.join("\n")
}

/// Canonical form of user input.
///
/// CRLF becomes LF, trailing whitespace is stripped from every line, runs
/// of blank lines collapse to one, and the whole text is trimmed.
pub fn normalize_prompt(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = false;

    for line in unified.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if blank_run {
                continue;
            }
            blank_run = true;
        } else {
            blank_run = false;
        }
        out.push_str(line);
        out.push('\n');
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace() {
        let raw = "  def f():  \r\n\r\n\r\n    return 1\t\r\n\n";
        assert_eq!(normalize_prompt(raw), "def f():\n\n    return 1");
    }

    #[test]
    fn normalize_whitespace_only_is_empty() {
        assert_eq!(normalize_prompt(" \n\t\r\n "), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_prompt("a  \n\n\n b\n");
        assert_eq!(normalize_prompt(&once), once);
    }

    #[test]
    fn code_params_are_adjusted() {
        let base = GenerationParams::default();
        let task = Task::code("sort a list");
        let params = task.adjust_params(&base);
        assert_eq!(params.max_tokens, 1024);
        assert!((params.temperature - 0.6).abs() < 1e-6);
        assert!(params.stop_sequences.contains(&"```\n\n".to_string()));

        let mut big = base.clone();
        big.max_tokens = 1500;
        big.temperature = 0.1;
        let params = task.adjust_params(&big);
        assert_eq!(params.max_tokens, CODE_MAX_TOKENS);
        assert!((params.temperature - 0.1).abs() < 1e-6);
    }

    #[test]
    fn code_params_clamp_huge_client_budget() {
        let base = GenerationParams {
            max_tokens: usize::MAX,
            ..GenerationParams::default()
        };
        let params = Task::code("x").adjust_params(&base);
        assert_eq!(params.max_tokens, CODE_MAX_TOKENS);
    }

    #[test]
    fn chat_params_unchanged() {
        let base = GenerationParams::default();
        assert_eq!(Task::chat("hi").adjust_params(&base), base);
    }

    #[test]
    fn code_preamble_mentions_language_and_template() {
        let task = Task::Code {
            prompt: "x".into(),
            language: Some("rust".into()),
            template: Some("fn main".into()),
        };
        let preamble = task.system_preamble(None);
        assert!(preamble.contains("Generate code in rust."));
        assert!(preamble.contains("Use this template structure: fn main"));

        let auto = Task::code("x").system_preamble(None);
        assert!(auto.contains("Auto-detect the best programming language"));
    }

    #[test]
    fn explain_defaults_to_python() {
        let task = Task::Explain {
            code: "print(1)".into(),
            language: None,
        };
        assert_eq!(
            task.user_prompt("print(1)"),
            "Please explain this python code:\n\n```python\nprint(1)\n```"
        );
        assert_eq!(task.timeout_class(), TimeoutClass::Chat);
    }

    #[test]
    fn debug_prompt_includes_error() {
        let task = Task::Debug {
            code: "x = 1/0".into(),
            language: None,
            error_message: Some("ZeroDivisionError".into()),
        };
        assert!(task.user_prompt("x = 1/0").contains("Error: ZeroDivisionError"));

        let task = Task::Debug {
            code: "x".into(),
            language: Some("go".into()),
            error_message: None,
        };
        assert!(task.user_prompt("x").starts_with("Please analyze this go code"));
    }

    #[test]
    fn chat_override_replaces_only_chat_preamble() {
        assert_eq!(Task::chat("hi").system_preamble(Some("Be terse.")), "Be terse.");
        assert!(Task::code("x").system_preamble(Some("Be terse.")).starts_with("You are an expert"));
    }

    #[test]
    fn fence_stripped_from_code_output() {
        let task = Task::code("x");
        assert_eq!(task.post_process("```python\nprint(1)\n```"), "print(1)");
        assert_eq!(task.post_process("```rust\nfn main() {}"), "fn main() {}");
        assert_eq!(task.post_process("plain"), "plain");
        // Chat output keeps its fences.
        assert_eq!(Task::chat("x").post_process("```a```"), "```a```");
    }

    #[test]
    fn task_serde_is_tagged() {
        let task: Task = serde_json::from_str(r#"{"kind":"explain","code":"x"}"#).unwrap();
        assert_eq!(task.kind(), RequestKind::Explain);
    }
}
