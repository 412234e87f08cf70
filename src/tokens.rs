//! Tokenizer facade: approximate token counts for monitoring.
//!
//! Token counts are never load-bearing here — they feed `effort_status`
//! reporting and context-size logging only. Counting is a chars-per-token
//! estimate with a per-model-family ratio; most tokenizers average 3-4
//! characters per English token.

use crate::LogEntry;

/// Default characters per token (conservative estimate for English text).
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Approximate token counter for a model family.
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    chars_per_token: f64,
}

impl TokenEstimator {
    /// Pick a ratio from the model identifier. OpenAI-family tokenizers run
    /// slightly denser than Claude's; everything else gets the default.
    pub fn for_model(model: &str) -> Self {
        let lowered = model.to_lowercase();
        let chars_per_token = if lowered.contains("gpt") || lowered.contains("openai") {
            4.0
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    /// Estimator with an explicit ratio.
    pub fn with_ratio(chars_per_token: f64) -> Self {
        Self { chars_per_token }
    }

    /// Estimated tokens in a string.
    pub fn count(&self, text: &str) -> usize {
        (text.chars().count() as f64 / self.chars_per_token).ceil() as usize
    }

    /// Estimated tokens across a slice of log entries.
    pub fn count_entries(&self, entries: &[LogEntry]) -> usize {
        entries.iter().map(|e| self.count(&e.content)).sum()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::with_ratio(DEFAULT_CHARS_PER_TOKEN)
    }
}

/// Percentage saved by replacing `raw` tokens with `summary` tokens.
pub fn savings_pct(raw_tokens: usize, summary_tokens: usize) -> f64 {
    if raw_tokens == 0 {
        return 0.0;
    }
    let saved = raw_tokens.saturating_sub(summary_tokens) as f64;
    (saved / raw_tokens as f64) * 100.0
}
