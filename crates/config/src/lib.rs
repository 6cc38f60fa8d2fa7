//! Configuration loading, validation, and management for LocalCoder.
//!
//! Loads configuration from `~/.localcoder/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.localcoder/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which model to run and how to reach it
    #[serde(default)]
    pub model: ModelConfig,

    /// Default generation parameters
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Prompt budget and session history
    #[serde(default)]
    pub context: ContextConfig,

    /// Response cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Inference queue and timeouts
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Session persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_true() -> bool {
    true
}

// ── Model ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Engine backend: "local" (in-process GGUF) or "llama-server"
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Model preset name (local) or model id sent to the server
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of a llama.cpp / OpenAI-compatible completion server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Prompt template: "chatml", "tinyllama" or "plain"
    #[serde(default = "default_template")]
    pub template: String,

    /// Characters per token used by the budget estimator
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

fn default_engine() -> String {
    "local".into()
}
fn default_model() -> String {
    "deepseek-coder-1.3b".into()
}
fn default_template() -> String {
    "chatml".into()
}
fn default_chars_per_token() -> usize {
    4
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            model: default_model(),
            api_url: None,
            template: default_template(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

// ── Generation ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_stop_sequences")]
    pub stop_sequences: Vec<String>,
}

fn default_max_tokens() -> usize {
    512
}
fn default_temperature() -> f32 {
    0.7
}
fn default_stop_sequences() -> Vec<String> {
    vec!["</s>".into(), "Human:".into(), "Assistant:".into()]
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            stop_sequences: default_stop_sequences(),
        }
    }
}

// ── Context ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Hard upper bound on prompt + generated tokens
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Tokens held back for the model's answer
    #[serde(default = "default_reserved_output_tokens")]
    pub reserved_output_tokens: usize,

    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Sessions untouched for this long are evicted from memory
    #[serde(default = "default_session_idle_timeout")]
    pub session_idle_timeout_seconds: u64,

    /// Override the built-in chat preamble
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_preamble: Option<String>,
}

fn default_max_context_tokens() -> usize {
    2048
}
fn default_reserved_output_tokens() -> usize {
    512
}
fn default_max_history_turns() -> usize {
    20
}
fn default_session_idle_timeout() -> u64 {
    1800
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            reserved_output_tokens: default_reserved_output_tokens(),
            max_history_turns: default_max_history_turns(),
            session_idle_timeout_seconds: default_session_idle_timeout(),
            system_preamble: None,
        }
    }
}

impl ContextConfig {
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_seconds)
    }
}

// ── Cache ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// JSONL file the cache is restored from and flushed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

fn default_cache_capacity() -> usize {
    500
}
fn default_cache_ttl() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_capacity: default_cache_capacity(),
            cache_ttl_seconds: default_cache_ttl(),
            snapshot_path: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

// ── Dispatcher ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_inference_timeout")]
    pub inference_timeout_seconds: u64,

    /// Code generation produces longer outputs and gets its own budget
    #[serde(default = "default_code_inference_timeout")]
    pub code_inference_timeout_seconds: u64,

    /// Extra attempts after an engine error (each preceded by a reset)
    #[serde(default = "default_engine_retries")]
    pub engine_retries: u32,
}

fn default_inference_timeout() -> u64 {
    120
}
fn default_code_inference_timeout() -> u64 {
    300
}
fn default_engine_retries() -> u32 {
    1
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            inference_timeout_seconds: default_inference_timeout(),
            code_inference_timeout_seconds: default_code_inference_timeout(),
            engine_retries: default_engine_retries(),
        }
    }
}

impl DispatcherConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_seconds)
    }

    pub fn code_inference_timeout(&self) -> Duration {
        Duration::from_secs(self.code_inference_timeout_seconds)
    }
}

// ── Persistence ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// "memory" or "file"
    #[serde(default = "default_persistence_backend")]
    pub backend: String,

    /// Directory for the file backend (defaults to ~/.localcoder/sessions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_persistence_backend() -> String {
    "memory".into()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_persistence_backend(),
            path: None,
        }
    }
}

impl PersistenceConfig {
    pub fn sessions_dir(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("sessions"))
    }
}

// ── Gateway ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.localcoder/config.toml).
    ///
    /// Environment variables take precedence over the file:
    /// - `LOCALCODER_MODEL`
    /// - `LOCALCODER_ENGINE`
    /// - `LOCALCODER_ENGINE_URL`
    /// - `LOCALCODER_MAX_CONTEXT_TOKENS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides and re-validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `LOCALCODER_*` overrides using the given variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("LOCALCODER_MODEL") {
            self.model.model = model;
        }
        if let Some(engine) = lookup("LOCALCODER_ENGINE") {
            self.model.engine = engine;
        }
        if let Some(url) = lookup("LOCALCODER_ENGINE_URL") {
            self.model.api_url = Some(url);
        }
        if let Some(raw) = lookup("LOCALCODER_MAX_CONTEXT_TOKENS") {
            self.context.max_context_tokens = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "LOCALCODER_MAX_CONTEXT_TOKENS must be a positive integer, got '{raw}'"
                ))
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".localcoder")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.generation.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "generation.max_tokens must be > 0".into(),
            ));
        }

        if self.context.reserved_output_tokens >= self.context.max_context_tokens {
            return Err(ConfigError::ValidationError(format!(
                "context.reserved_output_tokens ({}) must be less than context.max_context_tokens ({})",
                self.context.reserved_output_tokens, self.context.max_context_tokens
            )));
        }

        if self.context.max_history_turns == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_history_turns must be > 0".into(),
            ));
        }

        if self.cache.cache_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "cache.cache_capacity must be > 0".into(),
            ));
        }

        if self.dispatcher.inference_timeout_seconds == 0
            || self.dispatcher.code_inference_timeout_seconds == 0
        {
            return Err(ConfigError::ValidationError(
                "dispatcher timeouts must be > 0".into(),
            ));
        }

        if self.model.chars_per_token == 0 {
            return Err(ConfigError::ValidationError(
                "model.chars_per_token must be > 0".into(),
            ));
        }

        match self.model.engine.as_str() {
            "local" | "llama-server" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "model.engine must be 'local' or 'llama-server', got '{other}'"
                )));
            }
        }

        match self.persistence.backend.as_str() {
            "memory" | "file" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "persistence.backend must be 'memory' or 'file', got '{other}'"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.context.max_context_tokens, 2048);
        assert_eq!(config.context.reserved_output_tokens, 512);
        assert_eq!(config.cache.cache_capacity, 500);
        assert_eq!(config.cache.cache_ttl_seconds, 3600);
        assert_eq!(config.dispatcher.inference_timeout_seconds, 120);
        assert_eq!(config.gateway.port, 8000);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.model, config.model.model);
        assert_eq!(parsed.generation.stop_sequences, config.generation.stop_sequences);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[context]
max_context_tokens = 4096

[model]
engine = "llama-server"
api_url = "http://127.0.0.1:8080/v1"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.context.max_context_tokens, 4096);
        assert_eq!(config.context.reserved_output_tokens, 512);
        assert_eq!(config.model.engine, "llama-server");
        assert_eq!(config.model.template, "chatml");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.generation.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn reserve_must_leave_room_for_prompt() {
        let mut config = AppConfig::default();
        config.context.reserved_output_tokens = config.context.max_context_tokens;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reserved_output_tokens"));
    }

    #[test]
    fn zero_capacity_and_timeouts_rejected() {
        let mut config = AppConfig::default();
        config.cache.cache_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.dispatcher.code_inference_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_engine_rejected() {
        let mut config = AppConfig::default();
        config.model.engine = "cloud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.model.engine, "local");
    }

    #[test]
    fn load_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[generation]\ntemperature = 3.5\n").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[context\nmax_context_tokens = ").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("LOCALCODER_MODEL", "tinyllama"),
            ("LOCALCODER_ENGINE", "llama-server"),
            ("LOCALCODER_ENGINE_URL", "http://localhost:8080/v1"),
            ("LOCALCODER_MAX_CONTEXT_TOKENS", "1024"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.model.model, "tinyllama");
        assert_eq!(config.model.engine, "llama-server");
        assert_eq!(config.model.api_url.as_deref(), Some("http://localhost:8080/v1"));
        assert_eq!(config.context.max_context_tokens, 1024);
    }

    #[test]
    fn bad_numeric_override_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(|k| {
            (k == "LOCALCODER_MAX_CONTEXT_TOKENS").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("max_context_tokens = 2048"));
        assert!(toml_str.contains("8000"));
    }
}
