//! Events, handlers, and reports for the [`PlannerLoop`](super::planner::PlannerLoop).
//!
//! The planner publishes a [`PlannerEvent`] for every phase change,
//! decision, tool call, summarization and status change. Handlers only
//! observe; decisions go through the [`ApprovalGate`](super::gate::ApprovalGate).
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use super::gate::Decision;
use crate::context::{HistoryEntry, TokenBudget};
use crate::error::{PlanningError, ToolExecutionError, ValidationError};
use crate::provider::Proposal;
use crate::session::{Action, AgentState, Plan, Session, SessionStatus};
use crate::tools::ToolId;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, trace, warn};

// ── Phases ─────────────────────────────────────────────────────────

/// Where a turn currently is.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingProposal,
    AwaitingApproval,
    Executing,
    Updating,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnPhase::AwaitingProposal => "awaiting_proposal",
            TurnPhase::AwaitingApproval => "awaiting_approval",
            TurnPhase::Executing => "executing",
            TurnPhase::Updating => "updating",
        };
        f.write_str(s)
    }
}

/// Which call a token charge came from.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    Planning,
    Execution,
    Summarization,
}

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum PlannerEvent<'a> {
    TurnStart {
        session_id: &'a str,
        turn: u32,
        budget: &'a TokenBudget,
    },
    PhaseChanged {
        turn: u32,
        phase: TurnPhase,
    },
    /// A Propose attempt failed and will be retried.
    PlanningRetry {
        turn: u32,
        attempt: u32,
        max_attempts: u32,
        error: &'a PlanningError,
    },
    ProposalReceived {
        turn: u32,
        proposal: &'a Proposal,
    },
    ProposalRejected {
        turn: u32,
        error: &'a ValidationError,
    },
    ApprovalRequired {
        turn: u32,
        action: &'a Action,
    },
    DecisionMade {
        turn: u32,
        decision: &'a Decision,
    },
    ToolExecuting {
        turn: u32,
        action: &'a Action,
    },
    ToolResult {
        turn: u32,
        tool: &'a ToolId,
        outcome: Result<&'a Value, &'a ToolExecutionError>,
    },
    Summarized {
        entries_condensed: usize,
        token_cost: u64,
    },
    TokenUsage {
        source: CostSource,
        tokens: u64,
        budget: &'a TokenBudget,
    },
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
        reason: &'a str,
    },
    SessionSaved {
        session_id: &'a str,
        turn: u32,
    },
}

/// Observer for planner events.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &PlannerEvent<'_>) {
        let _ = event;
    }
}

pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```
/// use replan::agent::events::{FnEventHandler, PlannerEvent};
///
/// let handler = FnEventHandler::new(|event| {
///     if let PlannerEvent::StatusChanged { to, .. } = event {
///         println!("session ended: {to}");
///     }
/// });
/// # let _ = handler;
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&PlannerEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&PlannerEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&PlannerEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &PlannerEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler, in registration order.
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add `handler` only when `condition` holds.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &PlannerEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &PlannerEvent<'_>) {
        match event {
            PlannerEvent::TurnStart {
                session_id,
                turn,
                budget,
            } => {
                info!("[{session_id} turn {turn}] {}", budget.to_log_string());
            }
            PlannerEvent::PhaseChanged { turn, phase } => {
                debug!("Turn {turn}: {phase}");
            }
            PlannerEvent::PlanningRetry {
                turn,
                attempt,
                max_attempts,
                error,
            } => {
                warn!("Turn {turn}: propose attempt {attempt}/{max_attempts} failed: {error}");
            }
            PlannerEvent::ProposalReceived { turn, proposal } => {
                let (done, total) = (
                    proposal
                        .plan
                        .steps
                        .iter()
                        .filter(|s| s.status.is_terminal())
                        .count(),
                    proposal.plan.steps.len(),
                );
                match &proposal.action {
                    Some(action) => info!(
                        "Turn {turn}: proposed {action} (confidence {:.2}, {done}/{total} steps closed)",
                        proposal.plan.confidence
                    ),
                    None => info!(
                        "Turn {turn}: no action proposed (goal satisfied: {}, {done}/{total} steps closed)",
                        proposal.goal_satisfied
                    ),
                }
                let preview: String = proposal.plan.reasoning.chars().take(200).collect();
                debug!("Reasoning: {preview}");
            }
            PlannerEvent::ProposalRejected { turn, error } => {
                warn!("Turn {turn}: proposal rejected: {error}");
            }
            PlannerEvent::ApprovalRequired { turn, action } => {
                info!("Turn {turn}: awaiting approval for {}", action.tool);
            }
            PlannerEvent::DecisionMade { turn, decision } => {
                info!("Turn {turn}: decision {decision:?}");
            }
            PlannerEvent::ToolExecuting { turn, action } => {
                debug!("Turn {turn}: executing {action}");
            }
            PlannerEvent::ToolResult {
                turn,
                tool,
                outcome,
            } => match outcome {
                Ok(payload) => {
                    let text = payload.to_string();
                    info!("Turn {turn}: {tool} succeeded ({} bytes)", text.len());
                    trace!("{tool} payload: {}", text.chars().take(300).collect::<String>());
                }
                Err(e) => warn!("Turn {turn}: {tool} failed: {e}"),
            },
            PlannerEvent::Summarized {
                entries_condensed,
                token_cost,
            } => {
                info!("Summarized {entries_condensed} history entries ({token_cost} tokens)");
            }
            PlannerEvent::TokenUsage {
                source,
                tokens,
                budget,
            } => {
                debug!("{source:?} cost {tokens} tokens; {}", budget.to_log_string());
            }
            PlannerEvent::StatusChanged { from, to, reason } => {
                info!("Session {from} -> {to}: {reason}");
            }
            PlannerEvent::SessionSaved { session_id, turn } => {
                debug!("Saved {session_id} after turn {turn}");
            }
        }
    }
}

// ── Reports ────────────────────────────────────────────────────────

/// How a single turn ended.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The session was already terminal, or ended at the top-of-turn check.
    Halted,
    /// The provider failed on every attempt.
    PlanningFailed,
    /// The planning call itself used up the budget; nothing executed.
    BudgetExhausted,
    /// The provider proposed no action.
    NoAction,
    Rejected,
    Skipped,
    Aborted,
    Executed,
    ToolFailed,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub turn: u32,
    pub outcome: TurnOutcome,
    pub status: SessionStatus,
    /// Tokens charged during this turn, summarization included.
    pub tokens_charged: u64,
}

/// The final picture of a session: everything needed to reconstruct what
/// was attempted and why it ended.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub end_reason: Option<String>,
    pub turns: u32,
    pub used_tokens: u64,
    pub max_tokens: u64,
    pub plan: Plan,
    pub state: AgentState,
    pub history: Vec<HistoryEntry>,
}

impl SessionReport {
    pub fn of(session: &Session) -> Self {
        Self {
            session_id: session.id().to_string(),
            status: session.status(),
            end_reason: session.end_reason().map(str::to_string),
            turns: session.turn(),
            used_tokens: session.budget().used_tokens(),
            max_tokens: session.budget().max_tokens(),
            plan: session.plan().clone(),
            state: session.state().clone(),
            history: session.history().entries().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn composite_dispatches_to_all() {
        let count = Arc::new(AtomicUsize::new(0));
        let (a, b) = (count.clone(), count.clone());
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            }))
            .with_if(false, NoopHandler)
            .with_opt(Some(FnEventHandler::new(move |_| {
                b.fetch_add(1, Ordering::SeqCst);
            })))
            .with(LoggingHandler);
        handler.on_event(&PlannerEvent::PhaseChanged {
            turn: 1,
            phase: TurnPhase::Executing,
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn report_mirrors_session() {
        let session = Session::new(crate::session::Goal::new("g"), 10);
        let report = SessionReport::of(&session);
        assert_eq!(report.session_id, session.id());
        assert_eq!(report.status, SessionStatus::Active);
        assert!(report.history.is_empty());
        assert_eq!(report.max_tokens, 10);
    }
}
