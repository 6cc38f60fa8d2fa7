//! Prompt templates.
//!
//! Each template renders the system preamble and every turn as a
//! self-contained chunk, then ends the prompt with a generation cue that
//! hands the floor to the assistant.

use localcoder_core::session::Role;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptTemplate {
    /// `<|im_start|>role\n{content}<|im_end|>\n`
    #[default]
    ChatMl,
    /// `<|user|>\n{content}</s>\n`
    TinyLlama,
    /// `User: {content}\n` / `Assistant: {content}\n`
    Plain,
}

impl PromptTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatMl => "chatml",
            Self::TinyLlama => "tinyllama",
            Self::Plain => "plain",
        }
    }

    /// Render the system preamble. An empty preamble renders to nothing.
    pub fn render_system(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        match self {
            Self::ChatMl => format!("<|im_start|>system\n{text}<|im_end|>\n"),
            Self::TinyLlama => format!("<|system|>\n{text}</s>\n"),
            Self::Plain => format!("{text}\n\n"),
        }
    }

    pub fn render_turn(&self, role: Role, text: &str) -> String {
        match self {
            Self::ChatMl => format!("<|im_start|>{}\n{text}<|im_end|>\n", role.as_str()),
            Self::TinyLlama => format!("<|{}|>\n{text}</s>\n", role.as_str()),
            Self::Plain => match role {
                Role::User => format!("User: {text}\n"),
                Role::Assistant => format!("Assistant: {text}\n"),
            },
        }
    }

    /// Suffix that asks the model to answer.
    pub fn generation_cue(&self) -> &'static str {
        match self {
            Self::ChatMl => "<|im_start|>assistant\n",
            Self::TinyLlama => "<|assistant|>\n",
            Self::Plain => "Assistant:",
        }
    }
}

impl FromStr for PromptTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chatml" | "chat-ml" => Ok(Self::ChatMl),
            "tinyllama" | "zephyr" => Ok(Self::TinyLlama),
            "plain" | "llama2" => Ok(Self::Plain),
            other => Err(format!(
                "unknown prompt template '{other}' (expected chatml, tinyllama or plain)"
            )),
        }
    }
}

impl std::fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chatml_turns() {
        let t = PromptTemplate::ChatMl;
        assert_eq!(
            t.render_turn(Role::User, "Hi"),
            "<|im_start|>user\nHi<|im_end|>\n"
        );
        assert!(t.render_system("Be brief.").starts_with("<|im_start|>system\n"));
        assert_eq!(t.generation_cue(), "<|im_start|>assistant\n");
    }

    #[test]
    fn tinyllama_turns() {
        let t = PromptTemplate::TinyLlama;
        assert_eq!(t.render_turn(Role::Assistant, "ok"), "<|assistant|>\nok</s>\n");
        assert_eq!(t.render_system("sys"), "<|system|>\nsys</s>\n");
    }

    #[test]
    fn plain_turns() {
        let t = PromptTemplate::Plain;
        assert_eq!(t.render_turn(Role::User, "fix"), "User: fix\n");
        assert_eq!(t.render_turn(Role::Assistant, "done"), "Assistant: done\n");
    }

    #[test]
    fn empty_preamble_renders_nothing() {
        for t in [PromptTemplate::ChatMl, PromptTemplate::TinyLlama, PromptTemplate::Plain] {
            assert!(t.render_system("").is_empty());
        }
    }

    #[test]
    fn parse_names() {
        assert_eq!("ChatML".parse::<PromptTemplate>().unwrap(), PromptTemplate::ChatMl);
        assert_eq!("llama2".parse::<PromptTemplate>().unwrap(), PromptTemplate::Plain);
        assert!("alpaca".parse::<PromptTemplate>().is_err());
    }
}
