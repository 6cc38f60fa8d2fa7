//! LocalCoder CLI — the main entry point.
//!
//! Commands:
//! - `chat`     — Interactive REPL on one session
//! - `ask`      — One-shot question
//! - `code`     — Generate code, optionally into a file
//! - `explain`  — Explain a source file
//! - `debug`    — Diagnose a source file and an error message
//! - `serve`    — Start the HTTP API
//! - `status`   — Show configuration and engine status
//! - `config`   — Show, validate or print the default configuration
//! - `models`   — List model presets
//! - `bench`    — Run a fixed prompt set and report latency

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "localcoder",
    about = "LocalCoder — offline AI coding assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config.toml (defaults to ~/.localcoder/config.toml)
    #[arg(short, long, global = true, env = "LOCALCODER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant interactively
    Chat {
        /// Resume (or name) a session instead of starting a fresh one
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Ask a single question and print the answer
    Ask {
        /// The question
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,

        /// Print the full response (usage, latency, cache hit) as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate code
    Code {
        /// What the code should do
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,

        /// Target language (defaults to python)
        #[arg(short, long = "lang")]
        language: Option<String>,

        /// Code template hint, e.g. "cli" or "class"
        #[arg(short, long)]
        template: Option<String>,

        /// Write the generated code to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Explain what a piece of code does
    Explain {
        /// Source file, or "-" for stdin
        file: PathBuf,

        /// Language of the code
        #[arg(short, long = "lang")]
        language: Option<String>,
    },

    /// Find and fix a bug in a piece of code
    Debug {
        /// Source file, or "-" for stdin
        file: PathBuf,

        /// Error message or symptom
        #[arg(short, long)]
        error: Option<String>,

        /// Language of the code
        #[arg(short, long = "lang")]
        language: Option<String>,
    },

    /// Start the HTTP API server
    Serve {
        /// Override the bind address
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show configuration and engine status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// List known model presets
    Models,

    /// Run a fixed prompt set through the assistant and report performance
    Bench {
        /// How many times to run the prompt set (later rounds hit the cache)
        #[arg(short, long, default_value_t = 2)]
        rounds: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default configuration as TOML
    Default,
    /// Print the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config;

    match cli.command {
        Commands::Chat { session } => commands::chat::run(config_path, session).await?,
        Commands::Ask { prompt, json } => {
            commands::ask::run(config_path, prompt.join(" "), json).await?
        }
        Commands::Code {
            prompt,
            language,
            template,
            output,
        } => {
            commands::code::generate(config_path, prompt.join(" "), language, template, output)
                .await?
        }
        Commands::Explain { file, language } => {
            commands::code::explain(config_path, file, language).await?
        }
        Commands::Debug {
            file,
            error,
            language,
        } => commands::code::debug(config_path, file, error, language).await?,
        Commands::Serve { host, port } => commands::serve::run(config_path, host, port).await?,
        Commands::Status => commands::status::run(config_path).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Default) {
            ConfigAction::Default => commands::config_cmd::print_default()?,
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path)?,
        },
        Commands::Models => commands::models::run(config_path)?,
        Commands::Bench { rounds } => commands::bench::run(config_path, rounds).await?,
    }

    Ok(())
}
