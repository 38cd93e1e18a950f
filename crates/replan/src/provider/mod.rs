//! The Reasoning Provider contract.
//!
//! The planner asks a provider for two things: a proposal (updated plan, an
//! optional next action, a judgement on whether the goal is met) and, when
//! history grows too long, a condensed summary of the oldest entries. Both
//! report the tokens they consumed so the planner can charge the budget.
//!
//! [`OpenRouterProvider`] implements the contract over a chat completions
//! API. Tests script their own providers.

pub mod chat;
pub mod openrouter;

pub use openrouter::OpenRouterProvider;

use crate::context::{HistoryEntry, TokenBudget};
use crate::error::PlanningError;
use crate::session::{Action, AgentState, Goal, Plan};
use futures::future::BoxFuture;

pub type ProviderFuture<'a, T> = BoxFuture<'a, Result<T, PlanningError>>;

/// Everything the provider sees when planning a turn.
#[derive(Debug, Clone, Copy)]
pub struct ProposalRequest<'a> {
    pub goal: &'a Goal,
    pub state: &'a AgentState,
    pub plan: &'a Plan,
    /// The bounded recent history window, oldest first.
    pub history: &'a [HistoryEntry],
    pub turn: u32,
    pub budget: &'a TokenBudget,
}

/// The provider's answer for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    /// The replacement plan, carrying its own reasoning and confidence.
    pub plan: Plan,
    pub action: Option<Action>,
    pub goal_satisfied: bool,
    /// Replacement for `AgentState.summary`, if the provider offers one.
    pub summary: Option<String>,
    pub token_cost: u64,
}

impl Proposal {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            action: None,
            goal_satisfied: false,
            summary: None,
            token_cost: 0,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_cost(mut self, token_cost: u64) -> Self {
        self.token_cost = token_cost;
        self
    }

    pub fn satisfied(mut self) -> Self {
        self.goal_satisfied = true;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

/// A block of history to condense.
#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'a> {
    pub goal: &'a Goal,
    pub entries: &'a [HistoryEntry],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    pub token_cost: u64,
}

/// A source of plans and summaries. Must be usable behind `&dyn`.
pub trait ReasoningProvider: Send + Sync {
    fn propose<'a>(&'a self, request: ProposalRequest<'a>) -> ProviderFuture<'a, Proposal>;

    fn summarize<'a>(&'a self, request: SummaryRequest<'a>) -> ProviderFuture<'a, Summary>;
}
