//! The session aggregate: Goal, Plan, AgentState, History, TokenBudget and
//! SessionStatus.
//!
//! All fields of [`Session`] are private. Callers read through accessors;
//! writes go through `pub(crate)` transitions used by the planner loop, so
//! the session invariants (immutable goal, monotonic budget, monotonic step
//! status, `active → terminal` only) hold for every value outside the crate.

pub mod goal;
pub mod plan;
pub mod state;
pub mod store;

pub use goal::{Goal, GoalSpan};
pub use plan::{Action, Plan, PlanStep, StepStatus};
pub use state::{AgentNote, AgentState};
pub use store::{FileSessionStore, MemorySessionStore, SessionManifest, SessionStore};

use crate::context::TokenBudget;
use crate::context::history::{History, HistoryEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Generate a unique id such as `sess-18c3f0a1b2c-0001`.
pub fn generate_id(prefix: &str) -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{ts:x}-{count:04x}")
}

// ── SessionStatus ──────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
    Aborted,
    BudgetExceeded,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        self != SessionStatus::Active
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted => "aborted",
            SessionStatus::BudgetExceeded => "budget_exceeded",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ── Session ────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Session {
    id: String,
    goal: Goal,
    #[serde(default)]
    plan: Plan,
    #[serde(default)]
    state: AgentState,
    #[serde(default)]
    history: History,
    budget: TokenBudget,
    #[serde(default)]
    status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_reason: Option<String>,
    /// Turns started so far.
    #[serde(default)]
    turn: u32,
    /// The provider's latest judgement on whether the goal is met.
    #[serde(default)]
    goal_satisfied: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(goal: Goal, max_tokens: u64) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id("sess"),
            goal,
            plan: Plan::default(),
            state: AgentState::default(),
            history: History::default(),
            budget: TokenBudget::new(max_tokens),
            status: SessionStatus::Active,
            end_reason: None,
            turn: 0,
            goal_satisfied: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Use a caller-chosen id instead of a generated one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn end_reason(&self) -> Option<&str> {
        self.end_reason.as_deref()
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn goal_satisfied(&self) -> bool {
        self.goal_satisfied
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Steps done out of total, e.g. `(1, 3)`.
    pub fn progress(&self) -> (usize, usize) {
        (self.plan.count(StepStatus::Done), self.plan.steps.len())
    }

    /// Goal preview for listings.
    pub fn preview(&self) -> String {
        self.goal.preview(100)
    }

    // ── Transitions (planner only) ─────────────────────────────────

    /// Start a new turn and return its index (1-based).
    pub(crate) fn begin_turn(&mut self) -> u32 {
        self.turn += 1;
        self.touch();
        self.turn
    }

    /// Move out of `active`. Returns `false` and changes nothing if the
    /// session is already terminal or `to` is `active`.
    pub(crate) fn transition(&mut self, to: SessionStatus, reason: impl Into<String>) -> bool {
        if self.status.is_terminal() || !to.is_terminal() {
            warn!(
                "Refusing session {} status change {} -> {}",
                self.id, self.status, to
            );
            return false;
        }
        let reason = reason.into();
        debug!("Session {}: {} -> {to} ({reason})", self.id, self.status);
        self.status = to;
        self.end_reason = Some(reason);
        self.touch();
        true
    }

    pub(crate) fn charge(&mut self, tokens: u64) -> u64 {
        self.budget.charge(tokens)
    }

    /// Install the provider's plan, reconciled so no step regresses.
    pub(crate) fn replace_plan(&mut self, plan: Plan) {
        let previous = std::mem::take(&mut self.plan);
        self.plan = plan.reconciled_with(&previous);
        self.touch();
    }

    pub(crate) fn record(&mut self, entry: HistoryEntry) {
        self.history.append(entry);
        self.touch();
    }

    pub(crate) fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    pub(crate) fn plan_mut(&mut self) -> &mut Plan {
        &mut self.plan
    }

    pub(crate) fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    pub(crate) fn set_goal_satisfied(&mut self, satisfied: bool) {
        self.goal_satisfied = satisfied;
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
