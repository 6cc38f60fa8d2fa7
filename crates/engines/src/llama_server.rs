//! llama.cpp server engine.
//!
//! Talks to a locally running `llama-server` (or any server exposing the
//! OpenAI-compatible `/v1/completions` endpoint, e.g. Ollama). The prompt is
//! sent verbatim, so templating stays on our side.

use std::time::Duration;

use async_trait::async_trait;
use localcoder_core::engine::{AbortSignal, Generation, GenerationParams, InferenceEngine, TokenUsage};
use localcoder_core::error::EngineError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default endpoint of `llama-server` started with no flags.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/v1";

/// How often an in-flight request checks its abort flag.
const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct LlamaServerEngine {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl LlamaServerEngine {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, EngineError> {
        // No client-side timeout: the dispatcher owns the deadline.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| EngineError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body<'a>(&'a self, prompt: &'a str, params: &'a GenerationParams) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            prompt,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stop: &params.stop_sequences,
            stream: false,
        }
    }

    async fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<Generation, EngineError> {
        let url = format!("{}/completions", self.base_url);
        let body = self.request_body(prompt, params);

        debug!(model = %self.model, max_tokens = params.max_tokens, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %error_body, "Engine server returned error");
            return Err(EngineError::Generation(format!(
                "server returned {status}: {error_body}"
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Generation(format!("Failed to parse response: {e}")))?;

        parse_completion(parsed)
    }
}

fn parse_completion(response: CompletionResponse) -> Result<Generation, EngineError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::Generation("No choices in response".into()))?;

    let usage = response
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    Ok(Generation {
        text: choice.text.trim().to_string(),
        usage,
    })
}

#[async_trait]
impl InferenceEngine for LlamaServerEngine {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        abort: AbortSignal,
    ) -> Result<Generation, EngineError> {
        let request = self.complete(prompt, params);
        tokio::pin!(request);

        // Dropping the request future closes the connection, which makes
        // llama-server stop decoding.
        loop {
            tokio::select! {
                result = &mut request => return result,
                _ = tokio::time::sleep(ABORT_POLL_INTERVAL) => {
                    if abort.is_aborted() {
                        return Err(EngineError::Aborted);
                    }
                }
            }
        }
    }

    async fn reset(&self) -> Result<(), EngineError> {
        // The server keeps no state between completions.
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, EngineError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// ── Wire types ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "no_stops")]
    stop: &'a [String],
    stream: bool,
}

fn no_stops(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let engine = LlamaServerEngine::new("http://localhost:8080/v1/", "deepseek").unwrap();
        assert_eq!(engine.base_url(), "http://localhost:8080/v1");
        assert_eq!(engine.model_id(), "deepseek");
    }

    #[test]
    fn request_body_carries_params() {
        let engine = LlamaServerEngine::new(DEFAULT_BASE_URL, "deepseek").unwrap();
        let params = GenerationParams {
            max_tokens: 64,
            temperature: 0.2,
            stop_sequences: vec!["</s>".into()],
        };
        let body = serde_json::to_value(engine.request_body("hello", &params)).unwrap();
        assert_eq!(body["prompt"], "hello");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stop"][0], "</s>");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn empty_stop_list_is_omitted() {
        let engine = LlamaServerEngine::new(DEFAULT_BASE_URL, "m").unwrap();
        let params = GenerationParams {
            stop_sequences: vec![],
            ..GenerationParams::default()
        };
        let body = serde_json::to_value(engine.request_body("x", &params)).unwrap();
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn parse_completion_response() {
        let raw = r#"{
            "choices": [{"text": "  fn main() {}\n", "index": 0, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
        }"#;
        let parsed: CompletionResponse = serde_json::from_str(raw).unwrap();
        let generation = parse_completion(parsed).unwrap();
        assert_eq!(generation.text, "fn main() {}");
        assert_eq!(generation.usage.total_tokens, 17);
    }

    #[test]
    fn parse_completion_without_choices_fails() {
        let parsed: CompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(parse_completion(parsed), Err(EngineError::Generation(_))));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let engine = LlamaServerEngine::new("http://127.0.0.1:9/v1", "m").unwrap();
        let result = engine
            .generate("hi", &GenerationParams::default(), AbortSignal::new())
            .await;
        assert!(matches!(result, Err(EngineError::Network(_))));
    }
}
