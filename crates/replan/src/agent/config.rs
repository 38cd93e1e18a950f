//! Configuration for the [`PlannerLoop`](super::planner::PlannerLoop).
//!
//! Every field has a working default; [`PlannerConfig::new`] only needs the
//! token budget. Override with the builder methods or struct update syntax:
//!
//! ```
//! use replan::agent::config::{PlannerConfig, Toggle};
//! use replan::context::HistoryConfig;
//! use std::time::Duration;
//!
//! let config = PlannerConfig::new(5_000)
//!     .with_max_turns(20)
//!     .with_tool_timeout(Duration::from_secs(10))
//!     .with_history(HistoryConfig {
//!         window: 3,
//!         max_history_entries: 12,
//!         summarize_after: 8,
//!     });
//! assert!(config.validate().is_ok());
//!
//! let no_summaries = PlannerConfig {
//!     summarizer: Toggle::disabled(),
//!     ..PlannerConfig::new(5_000)
//! };
//! assert!(!no_summaries.summarizer.enabled);
//! ```

use crate::api::retry::RetryConfig;
use crate::context::{HistoryConfig, SummarizerConfig};
use crate::error::ConfigError;
use crate::session::{Goal, Session};
use std::time::Duration;

/// Default token budget for a session.
pub const DEFAULT_MAX_TOKENS: u64 = 100_000;

/// Default cap on turns per session.
pub const DEFAULT_MAX_TURNS: u32 = 50;

// ── Toggle ─────────────────────────────────────────────────────────

/// An optional module: on by default, with its own config.
#[derive(Debug, Clone, PartialEq)]
pub struct Toggle<T: Default> {
    pub enabled: bool,
    pub config: T,
}

impl<T: Default> Toggle<T> {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: T::default(),
        }
    }

    pub fn enabled(config: T) -> Self {
        Self {
            enabled: true,
            config,
        }
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            config: T::default(),
        }
    }
}

// ── PlanningPolicy ─────────────────────────────────────────────────

/// How many times a failed Propose call is retried within one turn before
/// the session fails.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningPolicy {
    /// `max_retries = 1` means two consecutive failures end the session.
    pub retry: RetryConfig,
}

impl Default for PlanningPolicy {
    fn default() -> Self {
        Self {
            retry: RetryConfig::with_retries(1),
        }
    }
}

impl PlanningPolicy {
    /// Total Propose attempts per turn.
    pub fn attempts(&self) -> u32 {
        self.retry.attempts()
    }
}

// ── PlannerConfig ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    /// Token budget for new sessions.
    pub max_tokens: u64,
    /// Cap on turns per session. `None` runs until another terminal condition.
    pub max_turns: Option<u32>,
    pub history: HistoryConfig,
    pub summarizer: Toggle<SummarizerConfig>,
    pub planning: PlanningPolicy,
    /// Bound on each Reasoning Provider call.
    pub provider_timeout: Duration,
    /// Bound on each Tool Registry execute call.
    pub tool_timeout: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            max_turns: Some(DEFAULT_MAX_TURNS),
            history: HistoryConfig::default(),
            summarizer: Toggle::default(),
            planning: PlanningPolicy::default(),
            provider_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(30),
        }
    }
}

impl PlannerConfig {
    pub fn new(max_tokens: u64) -> Self {
        Self {
            max_tokens,
            ..Default::default()
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn without_turn_limit(mut self) -> Self {
        self.max_turns = None;
        self
    }

    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Toggle<SummarizerConfig>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn with_planning_retry(mut self, retry: RetryConfig) -> Self {
        self.planning.retry = retry;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// A fresh active session for `goal` with this config's token budget.
    pub fn new_session(&self, goal: Goal) -> Session {
        Session::new(goal, self.max_tokens)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens == 0 {
            return Err(ConfigError::ZeroBudget);
        }
        if self.history.window == 0 {
            return Err(ConfigError::ZeroHistoryWindow);
        }
        if self.history.summarize_after == 0 {
            return Err(ConfigError::ZeroSummarizeAfter);
        }
        if self.history.summarize_after >= self.history.max_history_entries {
            return Err(ConfigError::SummarizeWindow {
                summarize_after: self.history.summarize_after,
                max_history_entries: self.history.max_history_entries,
            });
        }
        Ok(())
    }
}
