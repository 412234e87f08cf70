//! Convenience re-exports for common `oi-memory` types.
//!
//! Meant to be glob-imported when embedding the engine:
//!
//! ```ignore
//! use oi_memory::prelude::*;
//! ```
//!
//! This pulls in the types needed for the vast majority of embedders: the
//! session store, the orchestrator + config, the [`LanguageModel`] seam
//! with the bundled [`OpenRouterClient`], log entries, and the tunable
//! constants. Specialized pieces (salience internals, tool dispatch,
//! assembler internals) are intentionally excluded — import those from
//! their modules directly when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    json_schema_for, EngineError, LogEntry, Role, AMBIENT_WINDOW, DECAY_THRESHOLD, DEFAULT_MODEL,
    MAX_TOOL_ITERATIONS, MIN_KEYWORD_OVERLAP, SUMMARY_EVICTION_THRESHOLD,
};

// ── Session state ───────────────────────────────────────────────────
pub use crate::manifest::{Effort, EffortStatus, ExpandedState, Manifest, SessionCounter, SummaryRefs};
pub use crate::store::SessionStore;

// ── Turn loop ───────────────────────────────────────────────────────
pub use crate::context::DEFAULT_SYSTEM_PROMPT;
pub use crate::turn::{Orchestrator, TurnConfig};

// ── LLM transport ───────────────────────────────────────────────────
pub use crate::api::{ChatCompletion, LanguageModel, Message, OpenRouterClient, ToolDef};

// ── Monitoring ──────────────────────────────────────────────────────
pub use crate::tokens::TokenEstimator;
