//! `localcoder chat` — Interactive chat on one session.

use std::io::Write;
use std::path::PathBuf;

use localcoder_agent::{AssistResponse, Coordinator};
use localcoder_core::session::{SessionId, Turn};
use tokio::io::{self, AsyncBufReadExt, BufReader};

/// One line of REPL input.
#[derive(Debug, PartialEq)]
enum ReplCommand<'a> {
    Message(&'a str),
    Help,
    Clear,
    History,
    Stats,
    Search(&'a str),
    Code(&'a str),
    Explain(&'a str),
    Exit,
    Unknown(&'a str),
}

fn parse_line(line: &str) -> Option<ReplCommand<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q") {
        return Some(ReplCommand::Exit);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(ReplCommand::Message(line));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match (name, arg) {
        ("help", _) => ReplCommand::Help,
        ("clear", _) => ReplCommand::Clear,
        ("history", _) => ReplCommand::History,
        ("stats", _) => ReplCommand::Stats,
        ("search", q) if !q.is_empty() => ReplCommand::Search(q),
        ("code", p) if !p.is_empty() => ReplCommand::Code(p),
        ("explain", c) if !c.is_empty() => ReplCommand::Explain(c),
        _ => ReplCommand::Unknown(line),
    };
    Some(command)
}

pub async fn run(
    config_path: Option<PathBuf>,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path.as_deref())?;
    let coordinator = super::build_coordinator(&config)?;
    let mut session_id = session.map(SessionId).unwrap_or_default();

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║       LocalCoder — Interactive Mode          ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Engine:    {}", config.model.engine);
    println!("  Model:     {}", coordinator.model_id());
    println!("  Session:   {session_id}");
    println!(
        "  Context:   {} tokens ({} reserved for output)",
        config.context.max_context_tokens, config.context.reserved_output_tokens
    );
    println!();
    println!("  Type your message and press Enter. /help lists commands.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(io::stdin()).lines();

    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_line(&line) else {
            prompt()?;
            continue;
        };

        match command {
            ReplCommand::Exit => break,
            ReplCommand::Help => print_help(),
            ReplCommand::Clear => {
                // The old session may only exist on disk; nothing to close then.
                let _ = coordinator.close(&session_id).await;
                session_id = SessionId::new();
                println!("  Started a new session: {session_id}");
            }
            ReplCommand::History => match coordinator.history(&session_id).await {
                Ok(turns) => print_turns(&turns),
                Err(_) => println!("  (no history yet)"),
            },
            ReplCommand::Stats => print_stats(&coordinator, &session_id).await,
            ReplCommand::Search(query) => match coordinator.search(&session_id, query).await {
                Ok(turns) if !turns.is_empty() => print_turns(&turns),
                _ => println!("  No turns match '{query}'"),
            },
            ReplCommand::Message(text) => {
                let result = thinking(coordinator.chat(&session_id, text)).await;
                print_reply(result);
            }
            ReplCommand::Code(text) => {
                let result = thinking(coordinator.code(&session_id, text, None, None)).await;
                print_reply(result);
            }
            ReplCommand::Explain(code) => {
                let result = thinking(coordinator.explain(&session_id, code, None)).await;
                print_reply(result);
            }
            ReplCommand::Unknown(raw) => {
                println!("  Unknown command: {raw} (try /help)");
            }
        }
        prompt()?;
    }

    match coordinator.save_cache_snapshot() {
        Ok(Some(saved)) => tracing::debug!(entries = saved, "Response cache saved"),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to save response cache"),
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

async fn thinking<F, T>(fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    eprint!("  ...");
    let out = fut.await;
    eprint!("\r     \r");
    out
}

fn print_reply(result: Result<AssistResponse, localcoder_core::error::CoordinatorError>) {
    match result {
        Ok(response) => {
            println!();
            for line in response.response_text.lines() {
                println!("  Assistant > {line}");
            }
            let source = if response.cache_hit { "cached" } else { "generated" };
            println!(
                "  ({source}, {} ms, {} tokens, {} turns dropped)",
                response.latency_ms,
                response.token_usage.total_tokens,
                response.turns_dropped
            );
            println!();
        }
        Err(e) => {
            eprintln!("  [Error] {e}");
            println!();
        }
    }
}

fn print_turns(turns: &[Turn]) {
    for turn in turns {
        let first = turn.text.lines().next().unwrap_or_default();
        println!(
            "  [{}] {:<9} {}",
            turn.timestamp.format("%H:%M:%S"),
            turn.role.as_str(),
            first
        );
    }
}

async fn print_stats(coordinator: &Coordinator, session_id: &SessionId) {
    if let Ok(stats) = coordinator.session_stats(session_id).await {
        println!("  Session:    {session_id}");
        println!("  Exchanges:  {}", stats.exchanges);
        println!("  Turns:      {} (~{} tokens)", stats.turns, stats.total_tokens);
    }
    let stats = coordinator.stats().await;
    println!(
        "  Cache:      {} / {} entries, hit rate {:.0}%",
        stats.cache.size,
        stats.cache.capacity,
        stats.cache.hit_rate() * 100.0
    );
    println!(
        "  Engine:     {} completed, {} failed, {} timed out",
        stats.dispatcher.completed, stats.dispatcher.failed, stats.dispatcher.timed_out
    );
}

fn print_help() {
    println!("  Commands:");
    println!("    /help             Show this help");
    println!("    /clear            Start a new session");
    println!("    /history          Show this session's turns");
    println!("    /stats            Session, cache and engine statistics");
    println!("    /search <query>   Find turns containing <query>");
    println!("    /code <prompt>    Generate code");
    println!("    /explain <code>   Explain a snippet");
    println!("    exit              Quit");
}
