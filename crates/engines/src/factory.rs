//! Engine factory — builds the configured inference engine.

use localcoder_config::AppConfig;
use localcoder_core::engine::InferenceEngine;
use localcoder_core::error::EngineError;
use tracing::info;

use crate::llama_server::{DEFAULT_BASE_URL, LlamaServerEngine};

/// Build the engine selected by `model.engine`.
pub fn build_from_config(config: &AppConfig) -> Result<Box<dyn InferenceEngine>, EngineError> {
    match config.model.engine.as_str() {
        "llama-server" => {
            let url = config.model.api_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
            info!(url, model = %config.model.model, "Using llama-server engine");
            Ok(Box::new(LlamaServerEngine::new(url, &config.model.model)?))
        }
        "local" => build_local(&config.model.model),
        other => Err(EngineError::NotConfigured(format!(
            "Unknown engine '{other}' (expected 'local' or 'llama-server')"
        ))),
    }
}

#[cfg(feature = "local")]
fn build_local(model: &str) -> Result<Box<dyn InferenceEngine>, EngineError> {
    info!(model, "Using in-process Candle engine");
    Ok(Box::new(crate::local::LocalEngine::new(model)))
}

#[cfg(not(feature = "local"))]
fn build_local(_model: &str) -> Result<Box<dyn InferenceEngine>, EngineError> {
    Err(EngineError::NotConfigured(
        "this build has no in-process engine; rebuild with `--features local` \
         or set model.engine = \"llama-server\""
            .into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_llama_server_engine() {
        let mut config = AppConfig::default();
        config.model.engine = "llama-server".into();
        config.model.model = "deepseek-coder".into();
        let engine = build_from_config(&config).unwrap();
        assert_eq!(engine.model_id(), "deepseek-coder");
    }

    #[test]
    fn unknown_engine_is_rejected() {
        let mut config = AppConfig::default();
        config.model.engine = "cloud".into();
        assert!(matches!(
            build_from_config(&config),
            Err(EngineError::NotConfigured(_))
        ));
    }
}
