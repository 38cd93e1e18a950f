//! History summarization.
//!
//! When the history reaches `max_history_entries`, the oldest
//! `summarize_after` entries are condensed by the Reasoning Provider into one
//! `summary` entry. If the condensed block already starts with a summary
//! entry, its text is handed to the provider as the existing summary so the
//! result is a single cohesive summary rather than a summary of a summary.

use super::history::{EntryKind, HistoryEntry};
use crate::session::Goal;

/// Instructions for condensing a block of history entries.
pub const SUMMARIZATION_PROMPT: &str = "\
Summarize the following agent history entries concisely. Focus on:
- Which actions were executed and what they returned
- Failed or rejected actions and the reason given
- Key values the agent learned (numbers, names, identifiers)
- What remains to be done toward the goal

Rules:
- Only include facts explicitly stated in the entries. Do not infer or extrapolate.
- Preserve tool names, parameter values and error messages verbatim.
- Be concise. Every token must earn its place.
- If there is an existing summary, merge the new entries into it to produce a single \
  cohesive summary that replaces the existing one entirely.";

/// Settings for the summarization call.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizerConfig {
    /// Model override for summarization. `None` uses the planning model.
    pub model: Option<String>,
    /// Maximum tokens for the summary response.
    pub max_summary_tokens: u32,
    pub temperature: f32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_summary_tokens: 1024,
            temperature: 0.2,
        }
    }
}

impl SummarizerConfig {
    pub fn summary_model<'a>(&'a self, main_model: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(main_model)
    }
}

/// Build the (system, user) prompt pair for condensing `span`.
pub fn build_summarization_request(goal: &Goal, span: &[HistoryEntry]) -> (String, String) {
    let mut content = format!("Goal: {}\n\n", goal.text());

    let existing: Vec<&str> = span
        .iter()
        .filter(|e| e.kind == EntryKind::Summary)
        .filter_map(|e| e.note.as_deref())
        .collect();
    if !existing.is_empty() {
        content.push_str("=== EXISTING SUMMARY ===\n");
        content.push_str(&existing.join("\n"));
        content.push_str("\n\n=== NEW ENTRIES TO SUMMARIZE ===\n");
    }

    for entry in span.iter().filter(|e| e.kind != EntryKind::Summary) {
        content.push_str(&entry.describe());
        content.push('\n');
    }

    (SUMMARIZATION_PROMPT.to_string(), content)
}

/// The entry that replaces `span`. Its turn index is the last turn covered.
pub fn summary_entry(span: &[HistoryEntry], text: impl Into<String>, cost: u64) -> HistoryEntry {
    let first = span
        .first()
        .map(|e| e.turns_covered.map_or(e.turn_index, |(a, _)| a))
        .unwrap_or(0);
    let last = span.last().map(|e| e.turn_index).unwrap_or(first);
    let mut entry = HistoryEntry::new(last, EntryKind::Summary)
        .with_note(text)
        .with_cost(cost);
    entry.turns_covered = Some((first, last));
    entry
}
