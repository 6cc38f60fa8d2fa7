//! Integration tests for the coordination layer, wired from configuration
//! the way the binaries wire it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use localcoder_agent::{
    AssistRequest, ContextAssembler, Coordinator, PromptTemplate, Task, TokenBudget,
    TokenEstimator, persistence_from_config,
};
use localcoder_config::AppConfig;
use localcoder_core::engine::{AbortSignal, Generation, GenerationParams, InferenceEngine, TokenUsage};
use localcoder_core::error::{CoordinatorError, EngineError};
use localcoder_core::session::{Role, SessionId, Turn};

// ── Scripted engine ──────────────────────────────────────────────────────

/// Answers with "reply N" for the N-th call after an optional delay, and
/// records every prompt it sees.
#[derive(Clone, Default)]
struct CountingEngine {
    prompts: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    fail: bool,
}

impl CountingEngine {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl InferenceEngine for CountingEngine {
    fn model_id(&self) -> &str {
        "counting-model"
    }

    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
        _abort: AbortSignal,
    ) -> Result<Generation, EngineError> {
        let n = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            prompts.len()
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(EngineError::Generation("model crashed".into()));
        }
        Ok(Generation {
            text: format!("reply {n}"),
            usage: TokenUsage::new(prompt.len() / 4, 2),
        })
    }

    async fn reset(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.model.template = "plain".into();
    config
}

fn coordinator(config: &AppConfig, engine: CountingEngine) -> Coordinator {
    let persistence = persistence_from_config(config).unwrap();
    Coordinator::from_config(config, Box::new(engine), Some(persistence)).unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_prompt_in_fresh_sessions_is_served_from_cache() {
    let engine = CountingEngine::default();
    let coord = coordinator(&config(), engine.clone());

    let first = coord
        .chat(&SessionId::from("one"), "What does `?` do in Rust?")
        .await
        .unwrap();
    let second = coord
        .chat(&SessionId::from("two"), "What does `?` do in Rust?  \r\n")
        .await
        .unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.response_text, second.response_text);
    assert_eq!(engine.prompts().len(), 1);

    let stats = coord.stats().await;
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.dispatcher.completed, 1);
}

#[tokio::test]
async fn failed_generation_preserves_the_user_turn() {
    let coord = coordinator(&config(), CountingEngine::failing());
    let id = SessionId::from("broken");

    let err = coord.chat(&id, "explain lifetimes").await.unwrap_err();
    assert_eq!(err.kind(), "generation_failed");

    let history = coord.history(&id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].text, "explain lifetimes");
    assert_eq!(coord.stats().await.cache.size, 0);
}

#[tokio::test]
async fn oversized_prompt_fails_before_inference() {
    let mut config = config();
    config.context.max_context_tokens = 64;
    config.context.reserved_output_tokens = 16;
    let engine = CountingEngine::default();
    let coord = coordinator(&config, engine.clone());

    let err = coord
        .chat(&SessionId::from("big"), "word ".repeat(100))
        .await
        .unwrap_err();
    match err {
        CoordinatorError::ContextTooLarge { budget, .. } => assert_eq!(budget, 48),
        other => panic!("expected ContextTooLarge, got {other:?}"),
    }
    assert!(engine.prompts().is_empty());
}

#[tokio::test]
async fn empty_prompt_rejected() {
    let coord = coordinator(&config(), CountingEngine::default());
    let err = coord
        .handle(AssistRequest::new(None, Task::chat("\n\n   \n")))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::EmptyPrompt));
    assert!(coord.list_sessions().await.is_empty());
}

#[tokio::test]
async fn code_request_strips_fence_from_reply() {
    #[derive(Clone)]
    struct FencedEngine;

    #[async_trait::async_trait]
    impl InferenceEngine for FencedEngine {
        fn model_id(&self) -> &str {
            "fenced"
        }
        async fn generate(
            &self,
            _prompt: &str,
            params: &GenerationParams,
            _abort: AbortSignal,
        ) -> Result<Generation, EngineError> {
            assert_eq!(params.max_tokens, 1024);
            Ok(Generation {
                text: "```rust\nfn add(a: i32, b: i32) -> i32 { a + b }\n```".into(),
                usage: TokenUsage::new(50, 20),
            })
        }
        async fn reset(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    let config = config();
    let coord = Coordinator::from_config(&config, Box::new(FencedEngine), None).unwrap();
    let response = coord
        .code(&SessionId::from("c"), "add two ints", Some("rust".into()), None)
        .await
        .unwrap();
    assert_eq!(response.response_text, "fn add(a: i32, b: i32) -> i32 { a + b }");
}

#[tokio::test]
async fn sessions_are_independent_and_jobs_run_in_order() {
    let engine = CountingEngine::slow(Duration::from_millis(20));
    let coord = Arc::new(coordinator(&config(), engine.clone()));

    let mut tasks = Vec::new();
    for i in 0..4 {
        let coord = coord.clone();
        tasks.push(tokio::spawn(async move {
            coord
                .chat(&SessionId::from(format!("s{i}").as_str()), format!("question {i}"))
                .await
        }));
        // Stagger submissions so the queue order is known.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let prompts = engine.prompts();
    assert_eq!(prompts.len(), 4);
    for (i, prompt) in prompts.iter().enumerate() {
        assert!(prompt.contains(&format!("question {i}")), "prompt {i} out of order");
    }
    assert_eq!(coord.list_sessions().await.len(), 4);
}

#[tokio::test]
async fn file_persistence_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.persistence.backend = "file".into();
    config.persistence.path = Some(dir.path().to_path_buf());
    let id = SessionId::from("durable");

    {
        let coord = coordinator(&config, CountingEngine::default());
        coord.chat(&id, "remember this").await.unwrap();
    }

    let coord = coordinator(&config, CountingEngine::default());
    let history = coord.history(&id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text, "remember this");
}

#[tokio::test]
async fn cache_snapshot_restored_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.cache.snapshot_path = Some(dir.path().join("cache.jsonl"));

    {
        let coord = coordinator(&config, CountingEngine::default());
        coord.chat(&SessionId::from("a"), "hello").await.unwrap();
        assert_eq!(coord.save_cache_snapshot().unwrap(), Some(1));
    }

    let engine = CountingEngine::default();
    let coord = coordinator(&config, engine.clone());
    let response = coord.chat(&SessionId::from("b"), "hello").await.unwrap();
    assert!(response.cache_hit);
    assert!(engine.prompts().is_empty());
}

#[test]
fn budget_scenario_drops_oldest_turn() {
    // 4 chars per token, plain template; turns of 12 + 16 + 12 = 40 tokens.
    let estimator = TokenEstimator::new(4);
    let assembler = ContextAssembler::new(
        estimator,
        PromptTemplate::Plain,
        TokenBudget {
            max_context_tokens: 50,
            reserved_output_tokens: 10,
        },
        20,
    );
    let turn = |role, text: &str| {
        let cost = assembler.turn_cost(role, text);
        Turn::new(role, text, cost)
    };
    let history = vec![
        turn(Role::User, &"a".repeat(41)),
        turn(Role::Assistant, &"b".repeat(52)),
        turn(Role::User, &"c".repeat(41)),
    ];
    assert_eq!(
        history.iter().map(|t| t.token_count).sum::<usize>(),
        40
    );

    let assembled = assembler.assemble("", &history, "fix").unwrap();
    assert_eq!(assembled.metadata.turns_dropped, 1);
    assert!(assembled.metadata.prompt_tokens <= 40);
    assert!(!assembled.text.contains("aaaa"));
}
