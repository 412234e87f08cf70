//! Context assembler: builds the ordered message list sent to the LLM each
//! turn.
//!
//! Section order is fixed:
//!
//! 1. System message — static prompt plus a Memory section listing the
//!    summary of each concluded, non-evicted, non-expanded effort.
//! 2. Ambient window — the last [`AMBIENT_WINDOW`] exchanges from
//!    `raw.jsonl`.
//! 3. Expanded effort logs — full raw logs for every id in the expanded
//!    set (raw replaces summary while expanded).
//! 4. Open effort logs — full raw logs for every open effort, the active
//!    effort last so it sits closest to the new user message.
//!
//! The orchestrator appends the new user message after assembly. The
//! assembler never tokenizes; token counts are a monitoring metric only.

use crate::api::Message;
use crate::error::EngineError;
use crate::manifest::{ExpandedState, Manifest, SummaryRefs};
use crate::salience;
use crate::store::SessionStore;
use crate::tokens::TokenEstimator;
use crate::AMBIENT_WINDOW;
use tracing::debug;

/// Default static system prompt for the working-memory agent.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a long-running assistant with a bounded working memory.

Focused work happens inside *efforts*. When the user starts a distinct task, \
open an effort with `open_effort` (kebab-case name); when the task is done, \
call `close_effort` so it is summarized and collapsed. Answer quick asides \
directly, without touching effort state. Use `reopen_effort` to resume a \
concluded effort, `expand_effort`/`collapse_effort` to review a concluded \
effort's full log, `effort_status` to inspect the catalog, and \
`search_efforts` to recall older work by topic.";

// ── Assembled context ──────────────────────────────────────────────

/// Per-section message counts, for logging and monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextBreakdown {
    /// Summaries listed in the Memory section.
    pub memory_summaries: usize,
    /// Concluded efforts filtered out by eviction this turn.
    pub evicted: usize,
    pub ambient_messages: usize,
    pub expanded_messages: usize,
    pub open_messages: usize,
}

/// The ordered message list for one turn, plus its breakdown.
#[derive(Debug)]
pub struct AssembledContext {
    pub messages: Vec<Message>,
    pub breakdown: ContextBreakdown,
}

impl AssembledContext {
    /// Estimated token footprint of the assembled messages.
    pub fn estimate_tokens(&self, estimator: &TokenEstimator) -> usize {
        self.messages
            .iter()
            .map(|m| m.content.as_ref().map_or(0, |c| estimator.count(c)))
            .sum()
    }
}

// ── Assembly ───────────────────────────────────────────────────────

/// Build the working context for the given turn from persisted state.
pub fn assemble(
    store: &SessionStore,
    manifest: &Manifest,
    expanded: &ExpandedState,
    refs: &SummaryRefs,
    turn: u64,
    system_prompt: &str,
) -> Result<AssembledContext, EngineError> {
    let mut breakdown = ContextBreakdown::default();
    let mut messages = Vec::new();

    // 1. System message with the Memory section.
    messages.push(Message::system(build_system_message(
        manifest,
        expanded,
        refs,
        turn,
        system_prompt,
        &mut breakdown,
    )));

    // 2. Ambient window: last AMBIENT_WINDOW exchanges (two messages each).
    let ambient = store.read_last_entries(&store.raw_log_path(), AMBIENT_WINDOW * 2)?;
    breakdown.ambient_messages = ambient.len();
    messages.extend(ambient.iter().map(Message::from_entry));

    // 3. Expanded effort logs, full and in order.
    for id in expanded.ids() {
        let entries = store.read_entries(&store.effort_log_path(id))?;
        breakdown.expanded_messages += entries.len();
        messages.extend(entries.iter().map(Message::from_entry));
    }

    // 4. Open effort logs, the active effort last.
    let mut open: Vec<_> = manifest.get_all_open();
    open.sort_by_key(|e| e.active);
    for effort in open {
        let entries = store.read_entries(&store.effort_log_path(&effort.id))?;
        breakdown.open_messages += entries.len();
        messages.extend(entries.iter().map(Message::from_entry));
    }

    debug!(
        "Assembled context: {} memory summaries ({} evicted), {} ambient / {} expanded / {} open messages",
        breakdown.memory_summaries,
        breakdown.evicted,
        breakdown.ambient_messages,
        breakdown.expanded_messages,
        breakdown.open_messages,
    );

    Ok(AssembledContext {
        messages,
        breakdown,
    })
}

/// System prompt plus the Memory section.
///
/// Lists (id, summary) for each concluded effort that is neither evicted
/// nor currently expanded — an expanded effort's raw log replaces its
/// summary. Always advertises `search_efforts` as the recall path once any
/// effort has concluded.
fn build_system_message(
    manifest: &Manifest,
    expanded: &ExpandedState,
    refs: &SummaryRefs,
    turn: u64,
    system_prompt: &str,
    breakdown: &mut ContextBreakdown,
) -> String {
    let concluded = manifest.get_concluded();
    if concluded.is_empty() {
        return system_prompt.to_string();
    }

    let mut section = String::from("\n\n## Memory\n\nConcluded efforts from this session:\n");
    for effort in &concluded {
        if expanded.contains(&effort.id) {
            continue;
        }
        if salience::is_evicted(refs, &effort.id, turn) {
            breakdown.evicted += 1;
            continue;
        }
        let summary = effort.summary.as_deref().unwrap_or("(no summary)");
        section.push_str(&format!("- {}: {}\n", effort.id, summary));
        breakdown.memory_summaries += 1;
    }
    if breakdown.memory_summaries == 0 {
        section.push_str("(none resident)\n");
    }
    section.push_str(
        "\nOlder summaries rotate out of this list; use the `search_efforts` \
         tool to recall any concluded effort by topic.",
    );

    format!("{system_prompt}{section}")
}
