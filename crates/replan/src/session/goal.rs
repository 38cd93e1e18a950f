use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A byte range into [`Goal::text`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct GoalSpan {
    pub start: usize,
    pub end: usize,
}

impl GoalSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The span is non-empty, in bounds, and on character boundaries.
    pub fn fits(&self, text: &str) -> bool {
        self.start < self.end && text.get(self.start..self.end).is_some()
    }
}

/// The user objective driving a session. Immutable once created.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Goal {
    id: String,
    text: String,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    spans: Vec<GoalSpan>,
}

impl Goal {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: super::generate_id("goal"),
            text: text.into(),
            created_at: Utc::now(),
            spans: Vec::new(),
        }
    }

    /// Attach the spans sub-objectives were extracted from. Spans that do not
    /// fit the text are dropped.
    pub fn with_spans(mut self, spans: impl IntoIterator<Item = GoalSpan>) -> Self {
        self.spans = spans
            .into_iter()
            .filter(|span| {
                let ok = span.fits(&self.text);
                if !ok {
                    warn!("Dropping goal span {}..{} outside the goal text", span.start, span.end);
                }
                ok
            })
            .collect();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn spans(&self) -> &[GoalSpan] {
        &self.spans
    }

    /// The goal text covered by `span`, if it fits.
    pub fn excerpt(&self, span: GoalSpan) -> Option<&str> {
        if span.fits(&self.text) {
            self.text.get(span.start..span.end)
        } else {
            None
        }
    }

    /// The first `max_chars` characters of the text.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut preview: String = self.text.chars().take(max_chars).collect();
        if self.text.chars().count() > max_chars {
            preview.push_str("...");
        }
        preview
    }
}
