//! Error types for the turn engine.
//!
//! Only [`PlanningError`] can end a session on its own (after the planning
//! retry policy is exhausted). [`ToolExecutionError`] and [`ValidationError`]
//! are recorded in history and the session continues. Budget exhaustion and
//! user aborts are status transitions, not errors.

use std::time::Duration;
use thiserror::Error;

/// The Reasoning Provider could not produce a usable proposal or summary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanningError {
    #[error("reasoning provider error: {0}")]
    Provider(String),
    #[error("reasoning provider timed out after {0:?}")]
    Timeout(Duration),
    /// The call went through and was billed, but its output was unusable.
    #[error("reasoning provider returned a malformed response: {detail}")]
    Malformed { detail: String, token_cost: u64 },
}

impl PlanningError {
    pub fn malformed(detail: impl Into<String>, token_cost: u64) -> Self {
        PlanningError::Malformed {
            detail: detail.into(),
            token_cost,
        }
    }

    /// Tokens the failed call consumed anyway. Zero when the request never
    /// produced a billed response.
    pub fn token_cost(&self) -> u64 {
        match self {
            PlanningError::Malformed { token_cost, .. } => *token_cost,
            PlanningError::Provider(_) | PlanningError::Timeout(_) => 0,
        }
    }
}

/// A chat completions call failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("completions API HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completions API error: {0}")]
    Api(String),
    #[error("failed to parse completion: {0}")]
    Decode(String),
}

impl From<ChatError> for PlanningError {
    fn from(err: ChatError) -> Self {
        PlanningError::Provider(err.to_string())
    }
}

/// A proposed action was rejected before dispatch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
    #[error("unknown tool '{category}.{function}'")]
    UnknownTool { category: String, function: String },
    #[error("tool catalog unavailable while resolving '{tool}': {reason}")]
    CatalogUnavailable { tool: String, reason: String },
    #[error("parameters for '{tool}' must be a JSON object")]
    ParametersNotObject { tool: String },
    #[error("parameters for '{tool}' failed schema validation:\n{}", errors.join("\n"))]
    InvalidParameters { tool: String, errors: Vec<String> },
}

/// Execution of an approved action failed. Never fatal to the session.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolExecutionError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("tool call timed out after {0:?}")]
    Timeout(Duration),
    #[error("tool '{function}' reported failure: {detail}")]
    Reported { function: String, detail: String },
    #[error("malformed tool response: {0}")]
    MalformedResponse(String),
}

/// Discovery calls against the Tool Registry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DiscoveryError {
    #[error("registry request failed: {0}")]
    Transport(String),
    #[error("registry returned an unexpected body: {0}")]
    Decode(String),
}

/// Invalid [`PlannerConfig`](crate::agent::config::PlannerConfig) values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_tokens must be greater than zero")]
    ZeroBudget,
    #[error("summarize_after must be at least 1")]
    ZeroSummarizeAfter,
    #[error(
        "summarize_after ({summarize_after}) must be smaller than max_history_entries ({max_history_entries})"
    )]
    SummarizeWindow {
        summarize_after: usize,
        max_history_entries: usize,
    },
    #[error("history window must be at least 1")]
    ZeroHistoryWindow,
}

/// Session persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize session {id}: {source}")]
    Serde {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Session Registry failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error("session {0} is busy with another caller")]
    Busy(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
