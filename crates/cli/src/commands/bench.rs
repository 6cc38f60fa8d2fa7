//! `localcoder bench` — Run a fixed prompt set and report performance.
//!
//! Every prompt runs in a fresh session, so the first round measures the
//! engine and later rounds measure the response cache.

use std::path::PathBuf;

use localcoder_agent::{AssistResponse, Coordinator};
use localcoder_core::session::SessionId;

const CHAT_PROMPTS: &[&str] = &[
    "Explain how Python functions work",
    "What is machine learning?",
    "Describe the benefits of using Git for version control",
    "How do you optimize database queries?",
    "What are the principles of clean code?",
];

const CODE_PROMPTS: &[&str] = &[
    "Create a Python function to calculate fibonacci numbers",
    "Write a JavaScript function to sort an array",
    "Generate a SQL query to find top 10 customers",
    "Create a Python class for a simple calculator",
    "Write a function to validate email addresses",
];

/// Outcome of one benchmarked request.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    latency_ms: u64,
    cache_hit: bool,
    completion_tokens: usize,
}

impl From<&AssistResponse> for Sample {
    fn from(response: &AssistResponse) -> Self {
        Self {
            latency_ms: response.latency_ms,
            cache_hit: response.cache_hit,
            completion_tokens: response.token_usage.completion_tokens,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
struct Report {
    requests: usize,
    failures: usize,
    avg_latency_ms: f64,
    min_latency_ms: u64,
    max_latency_ms: u64,
    cache_hit_rate: f64,
    /// Completion tokens per second over requests that reached the engine.
    tokens_per_second: f64,
}

impl Report {
    fn from_samples(samples: &[Sample], failures: usize) -> Self {
        if samples.is_empty() {
            return Self {
                failures,
                ..Self::default()
            };
        }

        let total_ms: u64 = samples.iter().map(|s| s.latency_ms).sum();
        let hits = samples.iter().filter(|s| s.cache_hit).count();

        let generated = samples.iter().filter(|s| !s.cache_hit);
        let (gen_tokens, gen_ms) = generated.fold((0usize, 0u64), |(tokens, ms), s| {
            (tokens + s.completion_tokens, ms + s.latency_ms)
        });
        let tokens_per_second = if gen_ms == 0 {
            0.0
        } else {
            gen_tokens as f64 / (gen_ms as f64 / 1000.0)
        };

        Self {
            requests: samples.len(),
            failures,
            avg_latency_ms: total_ms as f64 / samples.len() as f64,
            min_latency_ms: samples.iter().map(|s| s.latency_ms).min().unwrap_or(0),
            max_latency_ms: samples.iter().map(|s| s.latency_ms).max().unwrap_or(0),
            cache_hit_rate: hits as f64 / samples.len() as f64,
            tokens_per_second,
        }
    }
}

pub async fn run(
    config_path: Option<PathBuf>,
    rounds: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path.as_deref())?;
    let coordinator = super::build_coordinator(&config)?;
    let rounds = rounds.max(1);

    println!("⚡ LocalCoder Benchmark");
    println!("   Model:  {}", coordinator.model_id());
    println!("   Rounds: {rounds}");
    println!();

    let chat = run_set(&coordinator, "Text generation", CHAT_PROMPTS, rounds, false).await;
    let code = run_set(&coordinator, "Code generation", CODE_PROMPTS, rounds, true).await;

    let stats = coordinator.stats().await;
    println!();
    println!(
        "   Engine:  {} completed, {} failed, {} timed out, {} resets",
        stats.dispatcher.completed,
        stats.dispatcher.failed,
        stats.dispatcher.timed_out,
        stats.dispatcher.engine_resets
    );

    if chat.requests + code.requests == 0 {
        return Err("Every benchmark request failed".into());
    }
    Ok(())
}

async fn run_set(
    coordinator: &Coordinator,
    label: &str,
    prompts: &[&str],
    rounds: usize,
    code: bool,
) -> Report {
    let mut samples = Vec::new();
    let mut failures = 0;

    for round in 0..rounds {
        for prompt in prompts {
            let session = SessionId::new();
            let result = if code {
                coordinator.code(&session, *prompt, None, None).await
            } else {
                coordinator.chat(&session, *prompt).await
            };
            match result {
                Ok(response) => samples.push(Sample::from(&response)),
                Err(e) => {
                    tracing::warn!(round, prompt, error = %e, "Benchmark request failed");
                    failures += 1;
                }
            }
            // Sessions exist only to isolate prompts.
            let _ = coordinator.close(&session).await;
        }
    }

    let report = Report::from_samples(&samples, failures);
    println!("   {label}");
    println!(
        "     requests: {} ok, {} failed",
        report.requests, report.failures
    );
    println!(
        "     latency:  avg {:.0} ms, min {} ms, max {} ms",
        report.avg_latency_ms, report.min_latency_ms, report.max_latency_ms
    );
    println!("     cache:    {:.0}% hits", report.cache_hit_rate * 100.0);
    println!("     speed:    {:.1} tokens/s", report.tokens_per_second);
    report
}
