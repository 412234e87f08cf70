//! Bounded working-memory manager for long-running conversational agents.
//!
//! A conversation with an LLM assistant normally grows its context window
//! without bound. `oi-memory` keeps the *full* conversational record on disk
//! while bounding what is presented to the model on each turn: a short
//! ambient window, a set of resident effort summaries, and zero or more
//! expanded raw effort logs.
//!
//! The core abstraction is the **effort** — a named, focused unit of work
//! with its own append-only log and a summary produced when it concludes.
//! The model itself drives effort lifecycle through a small set of tools
//! (`open_effort`, `close_effort`, `reopen_effort`, `expand_effort`,
//! `collapse_effort`, `effort_status`, `search_efforts`).
//!
//! # Getting started
//!
//! ```ignore
//! use oi_memory::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EngineError> {
//!     let api_key = std::env::var("OPENROUTER_KEY").unwrap();
//!     let client = OpenRouterClient::new(api_key)?;
//!
//!     let store = SessionStore::open("/path/to/session")?;
//!     let config = TurnConfig::new("anthropic/claude-sonnet-4");
//!
//!     let mut orchestrator = Orchestrator::new(store, &client, config);
//!     let reply = orchestrator.turn("Let's debug the auth bug").await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Session files on disk:** [`store::SessionStore`] — jsonl append-only
//!   logs plus atomically-replaced json/yaml state files.
//! - **The effort catalog:** [`manifest::Manifest`] and the auxiliary state
//!   ([`manifest::ExpandedState`], [`manifest::SummaryRefs`],
//!   [`manifest::SessionCounter`]).
//! - **Keyword extraction, reference detection, decay, eviction:**
//!   [`salience`].
//! - **Per-turn message assembly:** [`context::assemble`].
//! - **The tools the model can call:** [`tools`] (definitions + dispatch).
//! - **The turn loop:** [`turn::Orchestrator`].
//! - **The LLM seam:** [`api::LanguageModel`] and the bundled
//!   [`api::OpenRouterClient`].
//!
//! # Design principles
//!
//! 1. **The session directory is the sole unit of state.** Every engine
//!    entry point takes it explicitly; there is no process-wide default.
//! 2. **Tool calls drive routing.** An exchange lands in the active
//!    effort's log because the model opened that effort, not because of a
//!    keyword heuristic.
//! 3. **Salience is cheap.** Decay and eviction are pure filters over
//!    small maps — no LLM call, no tokenizer dependency.
//! 4. **Logs are append-only.** A message once written is never rewritten;
//!    readers tolerate a partial trailing line.

pub mod api;
pub mod context;
pub mod error;
pub mod manifest;
pub mod prelude;
pub mod salience;
pub mod store;
pub mod tokens;
pub mod tools;
pub mod turn;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use error::EngineError;

// ── Constants ──────────────────────────────────────────────────────

/// Default model for all LLM calls (override with `OI_MODEL`).
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

/// Turns an expanded effort may go unreferenced before auto-collapse.
pub const DECAY_THRESHOLD: u64 = 3;

/// Turns a concluded effort's summary may go unreferenced before it is
/// filtered out of the system-message Memory section.
pub const SUMMARY_EVICTION_THRESHOLD: u64 = 20;

/// Number of ambient exchanges (user/assistant pairs) kept in context.
pub const AMBIENT_WINDOW: usize = 10;

/// Minimum keyword overlap between a message and an effort summary for
/// the message to count as a reference to that effort.
pub const MIN_KEYWORD_OVERLAP: usize = 2;

/// Maximum LLM round-trips per turn before the tool loop is cut off.
pub const MAX_TOOL_ITERATIONS: u32 = 8;

/// Target length for effort summaries, in tokens.
pub const SUMMARY_TARGET_TOKENS: u32 = 100;

// ── Log entries ────────────────────────────────────────────────────

/// Role of a persisted exchange line. Tool results are
/// orchestrator-internal and are never written to a log.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One line of an append-only jsonl log (ambient or per-effort).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LogEntry {
    pub role: Role,
    pub content: String,
    /// ISO-8601 timestamp assigned at append time.
    pub timestamp: String,
}

impl LogEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: now_iso8601(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: now_iso8601(),
        }
    }
}

/// Current UTC time as an ISO-8601 string.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types
/// and the `serde_json::Value` the function-calling API expects.
///
/// # Example
///
/// ```
/// use oi_memory::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     query: String,
/// }
///
/// let schema = json_schema_for::<SearchArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"query".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
