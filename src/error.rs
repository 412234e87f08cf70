//! Typed error surface for the engine.
//!
//! Five kinds, matched by the orchestrator and the CLI:
//!
//! - [`EngineError::Transport`] — LLM network/timeout failures. Surfaced to
//!   the caller; nothing beyond the turn-counter increment is persisted.
//! - [`EngineError::ToolUsage`] — a tool called with invalid arguments or
//!   in a state that forbids it. Never raised past the dispatcher: it is
//!   serialized as `{"error": "..."}` so the model can self-correct.
//! - [`EngineError::Storage`] — file-system failure. Fatal for the turn.
//! - [`EngineError::Parse`] — malformed persisted state. Readers skip
//!   malformed *log lines* silently; this kind only surfaces when a whole
//!   state file fails to decode.
//! - [`EngineError::Protocol`] — the tool-iteration bound was exceeded.
//!
//! [`EngineError::Config`] exists for the CLI boundary (missing API key,
//! bad session dir) and maps to exit code 2.

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// LLM network or API failure.
    #[error("transport: {0}")]
    Transport(String),

    /// Tool called with invalid arguments or violating effort state.
    #[error("tool usage: {0}")]
    ToolUsage(String),

    /// File-system failure.
    #[error("storage: {0}")]
    Storage(String),

    /// A state file on disk failed to decode.
    #[error("parse: {0}")]
    Parse(String),

    /// Tool iteration bound exceeded without a final text response.
    #[error("tool loop exceeded {0} iterations without a final response")]
    Protocol(u32),

    /// Invalid configuration (CLI boundary).
    #[error("config: {0}")]
    Config(String),
}

impl EngineError {
    /// Storage error carrying the offending path.
    pub fn storage(path: &Path, err: impl std::fmt::Display) -> Self {
        EngineError::Storage(format!("{}: {err}", path.display()))
    }

    /// Parse error carrying the offending path.
    pub fn parse(path: &Path, err: impl std::fmt::Display) -> Self {
        EngineError::Parse(format!("{}: {err}", path.display()))
    }

    /// Whether this error is fatal for the whole process (vs. the turn).
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Storage(_) | EngineError::Config(_))
    }
}
