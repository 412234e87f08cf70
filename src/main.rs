//! Interactive REPL over the oi-memory engine.
//!
//! One line of input per turn; the session directory carries all state, so
//! quitting and restarting resumes the same conversation. Reads the API
//! key from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Default session under ~/.local/state/oi/session
//! oi
//!
//! # A separate session per project
//! oi --session-dir ./.oi/session --model anthropic/claude-sonnet-4
//! ```
//!
//! Type `exit` (or send EOF) to quit. Set `RUST_LOG=oi_memory=debug` for
//! engine tracing on stderr.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use oi_memory::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Conversational agent with bounded working memory.
#[derive(Parser)]
#[command(name = "oi", version)]
struct Cli {
    /// Session directory (created if missing).
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Model identifier for all LLM calls.
    #[arg(long, env = "OI_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Replace the built-in system prompt.
    #[arg(long)]
    system_prompt: Option<String>,
}

fn default_session_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".local/state/oi/session"),
        None => PathBuf::from(".oi/session"),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let api_key = match std::env::var("OPENROUTER_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("Error: OPENROUTER_KEY environment variable is not set");
            std::process::exit(2);
        }
    };

    let client = match OpenRouterClient::with_model(api_key, &cli.model) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: failed to create API client: {e}");
            std::process::exit(2);
        }
    };

    let session_dir = cli.session_dir.unwrap_or_else(default_session_dir);
    let store = match SessionStore::open(&session_dir) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: failed to open session directory: {e}");
            std::process::exit(1);
        }
    };

    let mut config = TurnConfig::new(&cli.model);
    if let Some(prompt) = cli.system_prompt {
        config = config.system_prompt(prompt);
    }
    let mut orchestrator = Orchestrator::new(store, &client, config);

    eprintln!("oi: session at {} (model {})", session_dir.display(), cli.model);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error: failed to read input: {e}");
                std::process::exit(1);
            }
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" {
            break;
        }

        match orchestrator.turn(input).await {
            Ok(reply) => println!("{reply}\n"),
            Err(e) if e.is_fatal() => {
                eprintln!("Fatal: {e}");
                let code = if matches!(e, EngineError::Config(_)) { 2 } else { 1 };
                std::process::exit(code);
            }
            Err(e) => {
                // Turn-level failure: nothing of this turn persisted past
                // the counter (or the user line, for a tool-loop overrun).
                eprintln!("Error: {e}");
            }
        }
    }
}
