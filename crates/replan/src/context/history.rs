//! Append-only turn log with bounded-size summarization.
//!
//! Entries are immutable once appended. The one permitted rewrite is
//! [`History::replace_prefix`], which swaps the oldest `summarize_after`
//! entries for a single [`EntryKind::Summary`] entry. The most recent
//! `max_history_entries - summarize_after` entries are never touched.

use crate::session::Action;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// What happened in one history record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Proposed,
    Approved,
    Skipped,
    Executed,
    Failed,
    Rejected,
    Summary,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryKind::Proposed => "proposed",
            EntryKind::Approved => "approved",
            EntryKind::Skipped => "skipped",
            EntryKind::Executed => "executed",
            EntryKind::Failed => "failed",
            EntryKind::Rejected => "rejected",
            EntryKind::Summary => "summary",
        };
        f.write_str(s)
    }
}

/// One record of what happened on a turn.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub turn_index: u32,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Inner tool payload for `executed` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub token_cost: u64,
    /// Rejection reason, failure text, skip feedback, or summary text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
    /// First and last turn condensed into a `summary` entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turns_covered: Option<(u32, u32)>,
}

impl HistoryEntry {
    pub fn new(turn_index: u32, kind: EntryKind) -> Self {
        Self {
            turn_index,
            kind,
            action: None,
            result: None,
            token_cost: 0,
            note: None,
            recorded_at: Utc::now(),
            turns_covered: None,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_cost(mut self, token_cost: u64) -> Self {
        self.token_cost = token_cost;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// One line for prompts and logs, e.g.
    /// `turn 2 executed weather.search({"city":"Tokyo"}) -> {"rain_chance":75}`.
    pub fn describe(&self) -> String {
        if self.kind == EntryKind::Summary {
            let span = self
                .turns_covered
                .map(|(a, b)| format!("turns {a}-{b}"))
                .unwrap_or_else(|| format!("turn {}", self.turn_index));
            return format!("[summary of {span}] {}", self.note.as_deref().unwrap_or(""));
        }
        let mut line = format!("turn {} {}", self.turn_index, self.kind);
        if let Some(action) = &self.action {
            line.push(' ');
            line.push_str(&action.to_string());
        }
        if let Some(result) = &self.result {
            line.push_str(&format!(" -> {result}"));
        }
        if let Some(note) = &self.note {
            line.push_str(&format!(" ({note})"));
        }
        line
    }
}

/// Sizes for the prompt window and the summarization trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Most recent entries sent to the provider with each proposal request.
    pub window: usize,
    /// Entry count at which summarization triggers.
    pub max_history_entries: usize,
    /// Oldest entries condensed into one summary entry.
    pub summarize_after: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            window: 5,
            max_history_entries: 10,
            summarize_after: 7,
        }
    }
}

impl HistoryConfig {
    /// Raw entries guaranteed to survive summarization.
    pub fn retained(&self) -> usize {
        self.max_history_entries.saturating_sub(self.summarize_after)
    }
}

/// The session's turn log.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> &[HistoryEntry] {
        let start = self.entries.len().saturating_sub(n);
        self.entries.get(start..).unwrap_or_default()
    }

    pub fn count(&self, kind: EntryKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// The block that summarization would condense, if the trigger is met.
    pub fn summarization_span(&self, config: &HistoryConfig) -> Option<&[HistoryEntry]> {
        if config.summarize_after == 0 || self.entries.len() < config.max_history_entries {
            return None;
        }
        self.entries.get(..config.summarize_after)
    }

    pub(crate) fn append(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// Replace the oldest `count` entries with `summary`. Returns the removed
    /// entries; does nothing if fewer than `count` entries exist.
    pub(crate) fn replace_prefix(
        &mut self,
        count: usize,
        summary: HistoryEntry,
    ) -> Vec<HistoryEntry> {
        if count == 0 || count > self.entries.len() {
            return Vec::new();
        }
        let removed: Vec<HistoryEntry> = self.entries.splice(..count, [summary]).collect();
        removed
    }
}
