//! Salience engine: keyword extraction, reference detection, decay of
//! expanded efforts, and eviction of stale summaries.
//!
//! Everything here is a pure function over small in-memory state — no LLM
//! calls, no tokenizer. The orchestrator runs [`apply_decay`] and
//! [`refresh_summary_refs`] once per turn after the exchange is persisted;
//! the context assembler uses [`is_evicted`] as a filter when building the
//! Memory section. Eviction never deletes anything: an evicted effort stays
//! in the manifest and remains recoverable via `search_efforts`.

use crate::manifest::{Effort, ExpandedState, Manifest, SummaryRefs};
use crate::{DECAY_THRESHOLD, MIN_KEYWORD_OVERLAP, SUMMARY_EVICTION_THRESHOLD};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

/// Punctuation stripped from token edges during keyword extraction.
const PUNCTUATION: &str = ".,;:!?\"'()-[]{}/*#@&^%$`~<>|\\+_=";

/// Fixed English stopword set: articles, copulas, common prepositions,
/// pronouns, demonstratives, auxiliary verbs, common adverbs.
static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "a", "an", "is", "was", "are", "been", "be", "has", "have", "do", "does", "did",
        "will", "would", "should", "may", "might", "must", "can", "could", "and", "but", "or",
        "nor", "not", "no", "so", "yet", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "into", "through", "during", "before", "after", "above", "below",
        "between", "out", "off", "over", "under", "again", "further", "then", "once", "here",
        "there", "when", "where", "why", "how", "all", "each", "every", "both", "few", "more",
        "most", "other", "some", "such", "only", "own", "same", "than", "too", "very", "this",
        "that", "these", "those", "its", "it", "i", "me", "my", "we", "our", "you", "your",
        "he", "him", "his", "she", "her", "they", "them", "their", "what", "which", "who",
        "whom", "just", "about", "also", "now", "still", "even",
    ]
    .into_iter()
    .collect()
});

// ── Keyword extraction ─────────────────────────────────────────────

/// Extract the keyword set of a text: lowercase, whitespace-split,
/// edge punctuation stripped, tokens shorter than 3 chars and stopwords
/// dropped.
pub fn extract_keywords(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|token| {
            token
                .trim_matches(|c| PUNCTUATION.contains(c))
                .to_lowercase()
        })
        .filter(|token| token.chars().count() >= 3)
        .filter(|token| !STOPWORDS.contains(token.as_str()))
        .collect()
}

/// Size of the intersection of two keyword sets.
pub fn keyword_overlap(a: &HashSet<String>, b: &HashSet<String>) -> usize {
    a.intersection(b).count()
}

// ── Reference detection ────────────────────────────────────────────

/// Whether a message references an effort: either the effort id appears as
/// a substring (hyphens optionally read as spaces), or the message shares
/// at least [`MIN_KEYWORD_OVERLAP`] keywords with the effort's summary.
pub fn references_effort(text: &str, effort: &Effort) -> bool {
    let lowered = text.to_lowercase();
    if lowered.contains(&effort.id) || lowered.contains(&effort.id.replace('-', " ")) {
        return true;
    }
    match &effort.summary {
        Some(summary) => {
            keyword_overlap(&extract_keywords(summary), &extract_keywords(&lowered))
                >= MIN_KEYWORD_OVERLAP
        }
        None => false,
    }
}

// ── Decay of expanded efforts ──────────────────────────────────────

/// Per-turn decay pass over the expanded set.
///
/// For each expanded effort: a reference in any one of this turn's messages
/// resets its `last_referenced_turn` to `turn`; otherwise, once
/// [`DECAY_THRESHOLD`] turns have passed without a reference, the effort is
/// auto-collapsed (removed from the expanded set). Messages are matched
/// independently, so keyword overlap does not pool across them.
///
/// Returns the collapsed ids, sorted, for the orchestrator's banner.
pub fn apply_decay(
    expanded: &mut ExpandedState,
    manifest: &Manifest,
    turn: u64,
    turn_texts: &[&str],
) -> Vec<String> {
    let mut collapsed = Vec::new();

    for id in expanded.ids().iter().map(|s| s.to_string()).collect::<Vec<_>>() {
        let referenced = manifest
            .get(&id)
            .is_some_and(|effort| turn_texts.iter().any(|t| references_effort(t, effort)));

        if referenced {
            expanded.insert(id.clone(), turn);
            debug!("Expanded effort '{id}' referenced at turn {turn}");
        } else if let Some(last) = expanded.efforts.get(&id).copied()
            && turn.saturating_sub(last) >= DECAY_THRESHOLD
        {
            expanded.remove(&id);
            debug!("Auto-collapsed expanded effort '{id}' (idle since turn {last})");
            collapsed.push(id);
        }
    }

    collapsed.sort();
    collapsed
}

// ── Summary eviction ───────────────────────────────────────────────

/// Per-turn reference bookkeeping for concluded efforts' summaries.
///
/// A reference in any one of this turn's messages moves the effort's clock
/// to `turn`. An effort with no entry yet gets one at `turn` — the grace
/// period: an effort is never evicted on first sighting, so its first
/// window is a full [`SUMMARY_EVICTION_THRESHOLD`] turns.
pub fn refresh_summary_refs(
    refs: &mut SummaryRefs,
    manifest: &Manifest,
    turn: u64,
    turn_texts: &[&str],
) {
    for effort in manifest.get_concluded() {
        if turn_texts.iter().any(|t| references_effort(t, effort)) {
            refs.set(effort.id.clone(), turn);
        } else if refs.get(&effort.id).is_none() {
            refs.set(effort.id.clone(), turn);
        }
    }
}

/// Eviction filter for the Memory section: a concluded effort whose summary
/// went [`SUMMARY_EVICTION_THRESHOLD`] turns without a reference is
/// excluded from context. Efforts with no clock entry yet are never
/// evicted.
pub fn is_evicted(refs: &SummaryRefs, id: &str, turn: u64) -> bool {
    match refs.get(id) {
        Some(last) => turn.saturating_sub(last) >= SUMMARY_EVICTION_THRESHOLD,
        None => false,
    }
}
