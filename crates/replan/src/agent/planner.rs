//! The turn state machine.
//!
//! One turn walks `AwaitingProposal → AwaitingApproval → Executing →
//! Updating` and ends either ready for the next turn or in a terminal
//! status. The session is written only through its `pub(crate)`
//! transitions, and only from here.
//!
//! History entries per turn:
//!
//! | Turn path | Entries |
//! |-----------|---------|
//! | proposal fails validation | `rejected` |
//! | no action, or planning exhausted the budget, or abort | `proposed` |
//! | every attempt failed after a billed response | `proposed` |
//! | skip | `skipped` |
//! | approve | `approved`, then `executed` or `failed` |
//!
//! The planning cost, failed attempts included, is carried by the first
//! entry of the turn and the execution cost by `executed`/`failed`. A
//! summarization call that fails is charged but has no entry of its own.

use super::config::PlannerConfig;
use super::events::{
    CostSource, EventHandler, NoopHandler, PlannerEvent, SessionReport, TurnOutcome, TurnPhase,
    TurnReport,
};
use super::gate::{ApprovalGate, ApprovalRequest, AutoApprove, Decision};
use crate::context::estimate_tokens;
use crate::context::history::{EntryKind, HistoryEntry};
use crate::context::summarizer::summary_entry;
use crate::error::{ConfigError, PlanningError, StoreError, ToolExecutionError, ValidationError};
use crate::provider::{Proposal, ProposalRequest, ReasoningProvider, SummaryRequest};
use crate::session::{Action, Session, SessionStatus, SessionStore, StepStatus};
use crate::tools::{ToolRegistry, resolve, unwrap_payload, validate_parameters};
use serde_json::Value;
use tracing::{debug, info, warn};

pub struct PlannerLoop<'a> {
    provider: &'a dyn ReasoningProvider,
    tools: &'a dyn ToolRegistry,
    gate: &'a dyn ApprovalGate,
    handler: &'a dyn EventHandler,
    config: PlannerConfig,
}

impl<'a> PlannerLoop<'a> {
    /// A planner that auto-approves and publishes no events. An invalid
    /// config is logged; use [`PlannerLoop::try_new`] to reject it instead.
    pub fn new(
        provider: &'a dyn ReasoningProvider,
        tools: &'a dyn ToolRegistry,
        config: PlannerConfig,
    ) -> Self {
        if let Err(e) = config.validate() {
            warn!("Planner built with an invalid configuration: {e}");
        }
        Self {
            provider,
            tools,
            gate: &AutoApprove,
            handler: &NoopHandler,
            config,
        }
    }

    /// Like [`PlannerLoop::new`], but fails on an invalid config.
    pub fn try_new(
        provider: &'a dyn ReasoningProvider,
        tools: &'a dyn ToolRegistry,
        config: PlannerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(provider, tools, config))
    }

    pub fn with_gate(mut self, gate: &'a dyn ApprovalGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.handler = handler;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    fn emit(&self, event: PlannerEvent<'_>) {
        self.handler.on_event(&event);
    }

    fn phase(&self, turn: u32, phase: TurnPhase) {
        self.emit(PlannerEvent::PhaseChanged { turn, phase });
    }

    fn charge(&self, session: &mut Session, source: CostSource, tokens: u64) {
        session.charge(tokens);
        self.emit(PlannerEvent::TokenUsage {
            source,
            tokens,
            budget: session.budget(),
        });
    }

    fn end(&self, session: &mut Session, to: SessionStatus, reason: impl Into<String>) {
        let from = session.status();
        let reason = reason.into();
        if session.transition(to, reason.as_str()) {
            self.emit(PlannerEvent::StatusChanged {
                from,
                to,
                reason: &reason,
            });
        }
    }

    fn report(&self, session: &Session, outcome: TurnOutcome, used_before: u64) -> TurnReport {
        TurnReport {
            turn: session.turn(),
            outcome,
            status: session.status(),
            tokens_charged: session.budget().used_tokens() - used_before,
        }
    }

    // ── Completion rules ───────────────────────────────────────────

    fn goal_reached(session: &Session) -> bool {
        session.goal_satisfied() && session.plan().is_finished()
    }

    /// Evaluated before any provider call. Returns the status to end with.
    fn top_of_turn_check(&self, session: &Session) -> Option<(SessionStatus, String)> {
        if Self::goal_reached(session) {
            return Some((
                SessionStatus::Completed,
                "goal satisfied and every plan step closed".into(),
            ));
        }
        let budget = session.budget();
        if budget.exceeded() {
            return Some((
                SessionStatus::BudgetExceeded,
                format!("token budget exhausted ({})", budget.to_log_string()),
            ));
        }
        if let Some(max_turns) = self.config.max_turns
            && session.turn() >= max_turns
        {
            return Some((
                SessionStatus::BudgetExceeded,
                format!("turn limit of {max_turns} reached"),
            ));
        }
        None
    }

    // ── Turn ───────────────────────────────────────────────────────

    /// Run one full turn. Never panics and never returns an error: every
    /// failure is either recorded in history or ends the session.
    pub async fn run_turn(&self, session: &mut Session) -> TurnReport {
        let used_before = session.budget().used_tokens();
        if session.status().is_terminal() {
            return self.report(session, TurnOutcome::Halted, used_before);
        }
        if let Some((status, reason)) = self.top_of_turn_check(session) {
            self.end(session, status, reason);
            return self.report(session, TurnOutcome::Halted, used_before);
        }

        let turn = session.begin_turn();
        self.emit(PlannerEvent::TurnStart {
            session_id: session.id(),
            turn,
            budget: session.budget(),
        });

        // Propose.
        self.phase(turn, TurnPhase::AwaitingProposal);
        let (result, failed_cost) = self.propose(session, turn).await;
        let proposal = match result {
            Ok(proposal) => proposal,
            Err(e) => {
                if failed_cost > 0 {
                    session.record(
                        HistoryEntry::new(turn, EntryKind::Proposed)
                            .with_cost(failed_cost)
                            .with_note(format!("planning failed: {e}")),
                    );
                }
                let reason = format!(
                    "planning failed {} consecutive time(s): {e}",
                    self.config.planning.attempts()
                );
                self.end(session, SessionStatus::Failed, reason);
                return self.report(session, TurnOutcome::PlanningFailed, used_before);
            }
        };
        self.charge(session, CostSource::Planning, proposal.token_cost);
        let planning_cost = failed_cost + proposal.token_cost;
        self.emit(PlannerEvent::ProposalReceived {
            turn,
            proposal: &proposal,
        });

        if let Err(error) = self.validate(&proposal).await {
            self.emit(PlannerEvent::ProposalRejected {
                turn,
                error: &error,
            });
            let mut entry = HistoryEntry::new(turn, EntryKind::Rejected)
                .with_cost(planning_cost)
                .with_note(error.to_string());
            if let Some(action) = proposal.action {
                entry = entry.with_action(action);
            }
            session.record(entry);
            if session.budget().exceeded() {
                self.end_over_budget(session);
            } else {
                self.summarize_if_due(session).await;
            }
            return self.report(session, TurnOutcome::Rejected, used_before);
        }

        let Proposal {
            plan,
            action,
            goal_satisfied,
            summary,
            ..
        } = proposal;
        session.replace_plan(plan);
        session.set_goal_satisfied(goal_satisfied);
        if let Some(summary) = summary {
            session.state_mut().set_summary(summary);
        }

        // A planning call that crossed the limit completes, but nothing
        // runs after it.
        if session.budget().exceeded() {
            let mut entry = HistoryEntry::new(turn, EntryKind::Proposed)
                .with_cost(planning_cost)
                .with_note("token budget exhausted by the planning call");
            if let Some(action) = action {
                entry = entry.with_action(action);
            }
            session.record(entry);
            self.end_over_budget(session);
            return self.report(session, TurnOutcome::BudgetExhausted, used_before);
        }

        let Some(action) = action else {
            session.record(
                HistoryEntry::new(turn, EntryKind::Proposed)
                    .with_cost(planning_cost)
                    .with_note("no action proposed"),
            );
            self.finish_turn(session).await;
            return self.report(session, TurnOutcome::NoAction, used_before);
        };

        // Gate.
        self.phase(turn, TurnPhase::AwaitingApproval);
        self.emit(PlannerEvent::ApprovalRequired {
            turn,
            action: &action,
        });
        let decision = self
            .gate
            .decide(ApprovalRequest {
                session_id: session.id(),
                turn,
                action: &action,
                reasoning: &session.plan().reasoning,
                confidence: session.plan().confidence,
            })
            .await;
        self.emit(PlannerEvent::DecisionMade {
            turn,
            decision: &decision,
        });

        match decision {
            Decision::Abort => {
                session.record(
                    HistoryEntry::new(turn, EntryKind::Proposed)
                        .with_action(action)
                        .with_cost(planning_cost)
                        .with_note("aborted at the approval gate"),
                );
                self.end(
                    session,
                    SessionStatus::Aborted,
                    "aborted by user at the approval gate",
                );
                return self.report(session, TurnOutcome::Aborted, used_before);
            }
            Decision::Skip { feedback } => {
                let note = match feedback {
                    Some(f) => format!("skipped by user: {f}"),
                    None => "skipped by user".to_string(),
                };
                session.record(
                    HistoryEntry::new(turn, EntryKind::Skipped)
                        .with_action(action)
                        .with_cost(planning_cost)
                        .with_note(note),
                );
                self.summarize_if_due(session).await;
                return self.report(session, TurnOutcome::Skipped, used_before);
            }
            Decision::Approve => {}
        }

        session.record(
            HistoryEntry::new(turn, EntryKind::Approved)
                .with_action(action.clone())
                .with_cost(planning_cost),
        );

        // Execute.
        self.phase(turn, TurnPhase::Executing);
        let step_id = session
            .plan()
            .target_step(action.step_id.as_deref())
            .map(|s| s.id.clone());
        if let Some(id) = &step_id
            && let Some(step) = session.plan_mut().step_mut(id)
        {
            step.advance(StepStatus::InProgress);
            step.tool = Some(action.tool.clone());
        }
        self.emit(PlannerEvent::ToolExecuting {
            turn,
            action: &action,
        });
        let (outcome, execution_cost) = self.execute(&action).await;
        self.charge(session, CostSource::Execution, execution_cost);
        self.emit(PlannerEvent::ToolResult {
            turn,
            tool: &action.tool,
            outcome: outcome.as_ref(),
        });

        // Update.
        self.phase(turn, TurnPhase::Updating);
        let turn_outcome = match outcome {
            Ok(payload) => {
                session.state_mut().merge_result(&action.tool, &payload);
                if let Some(id) = &step_id {
                    Self::close_step(session, id);
                }
                session.record(
                    HistoryEntry::new(turn, EntryKind::Executed)
                        .with_action(action)
                        .with_result(payload)
                        .with_cost(execution_cost),
                );
                TurnOutcome::Executed
            }
            Err(error) => {
                let text = error.to_string();
                session
                    .state_mut()
                    .add_blocker(format!("turn {turn}: {} failed: {text}", action.tool));
                if let Some(id) = &step_id
                    && let Some(step) = session.plan_mut().step_mut(id)
                    && step.advance(StepStatus::Failed)
                {
                    step.error = Some(text.clone());
                }
                session.record(
                    HistoryEntry::new(turn, EntryKind::Failed)
                        .with_action(action)
                        .with_cost(execution_cost)
                        .with_note(text),
                );
                TurnOutcome::ToolFailed
            }
        };
        self.finish_turn(session).await;
        self.report(session, turn_outcome, used_before)
    }

    /// Drive turns until the session is terminal, saving after every turn.
    pub async fn run(
        &self,
        session: &mut Session,
        store: Option<&dyn SessionStore>,
    ) -> Result<SessionReport, StoreError> {
        info!(
            "Planner run started: session={}, {}",
            session.id(),
            session.budget().to_log_string()
        );
        loop {
            let report = self.run_turn(session).await;
            debug!(
                "Turn {} ended: {:?}, status {}, {} tokens",
                report.turn, report.outcome, report.status, report.tokens_charged
            );
            if let Some(store) = store {
                store.save(session)?;
                self.emit(PlannerEvent::SessionSaved {
                    session_id: session.id(),
                    turn: session.turn(),
                });
            }
            if session.status().is_terminal() {
                break;
            }
        }
        info!(
            "Planner run finished: session={}, status={}, turns={}, {}",
            session.id(),
            session.status(),
            session.turn(),
            session.budget().to_log_string()
        );
        Ok(SessionReport::of(session))
    }

    // ── Phases ─────────────────────────────────────────────────────

    /// Call the provider under the timeout, retrying per the planning policy.
    /// Failed attempts that were billed are charged as they happen; their
    /// total is returned alongside the result.
    async fn propose(
        &self,
        session: &mut Session,
        turn: u32,
    ) -> (Result<Proposal, PlanningError>, u64) {
        let policy = &self.config.planning.retry;
        let max_attempts = policy.attempts();
        let mut failed_cost = 0;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = ProposalRequest {
                goal: session.goal(),
                state: session.state(),
                plan: session.plan(),
                history: session.history().recent(self.config.history.window),
                turn,
                budget: session.budget(),
            };
            let result = tokio::time::timeout(
                self.config.provider_timeout,
                self.provider.propose(request),
            )
            .await
            .unwrap_or(Err(PlanningError::Timeout(self.config.provider_timeout)));
            let error = match result {
                Ok(proposal) => return (Ok(proposal), failed_cost),
                Err(error) => error,
            };
            let cost = error.token_cost();
            if cost > 0 {
                failed_cost += cost;
                self.charge(session, CostSource::Planning, cost);
            }
            if attempt >= max_attempts {
                return (Err(error), failed_cost);
            }
            self.emit(PlannerEvent::PlanningRetry {
                turn,
                attempt,
                max_attempts,
                error: &error,
            });
            let delay = policy.delay_for_attempt(attempt - 1);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Confidence range, tool resolution, parameter schema. Fails closed.
    async fn validate(&self, proposal: &Proposal) -> Result<(), ValidationError> {
        let confidence = proposal.plan.confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(confidence));
        }
        if let Some(action) = &proposal.action {
            let spec = resolve(self.tools, &action.tool).await?;
            validate_parameters(&spec, &action.params)?;
        }
        Ok(())
    }

    /// Dispatch under the tool timeout. The cost is an estimate from the
    /// request and response sizes.
    async fn execute(&self, action: &Action) -> (Result<Value, ToolExecutionError>, u64) {
        let request_cost = estimate_tokens(&action.params.to_string());
        let raw = tokio::time::timeout(
            self.config.tool_timeout,
            self.tools.execute(&action.tool, &action.params),
        )
        .await
        .unwrap_or(Err(ToolExecutionError::Timeout(self.config.tool_timeout)));
        match raw {
            Ok(raw) => {
                let cost = request_cost + estimate_tokens(&raw.to_string());
                (unwrap_payload(&raw, &action.tool), cost)
            }
            Err(e) => (Err(e), request_cost),
        }
    }

    /// Mark a step done and record its objective. No-op if already closed.
    fn close_step(session: &mut Session, step_id: &str) {
        let mut objective = None;
        if let Some(step) = session.plan_mut().step_mut(step_id)
            && step.advance(StepStatus::Done)
        {
            step.error = None;
            objective = Some(step.description.clone());
        }
        if let Some(objective) = objective {
            session.state_mut().complete_objective(objective);
        }
    }

    fn end_over_budget(&self, session: &mut Session) {
        let reason = format!(
            "token budget exhausted ({})",
            session.budget().to_log_string()
        );
        self.end(session, SessionStatus::BudgetExceeded, reason);
    }

    /// Post-update completion check, then summarization.
    async fn finish_turn(&self, session: &mut Session) {
        if Self::goal_reached(session) {
            self.end(
                session,
                SessionStatus::Completed,
                "goal satisfied and every plan step closed",
            );
        }
        self.summarize_if_due(session).await;
    }

    /// Condense the oldest history block if the threshold is reached. Runs
    /// only between turns of an active session with budget left.
    async fn summarize_if_due(&self, session: &mut Session) {
        if !self.config.summarizer.enabled || !session.is_active() || session.budget().exceeded()
        {
            return;
        }
        let Some(span) = session.history().summarization_span(&self.config.history) else {
            return;
        };
        let count = span.len();
        let request = SummaryRequest {
            goal: session.goal(),
            entries: span,
        };
        let result = tokio::time::timeout(
            self.config.provider_timeout,
            self.provider.summarize(request),
        )
        .await
        .unwrap_or(Err(PlanningError::Timeout(self.config.provider_timeout)));

        match result {
            Ok(summary) => {
                let entry = summary_entry(span, summary.text, summary.token_cost);
                self.charge(session, CostSource::Summarization, summary.token_cost);
                session.history_mut().replace_prefix(count, entry);
                session.touch();
                self.emit(PlannerEvent::Summarized {
                    entries_condensed: count,
                    token_cost: summary.token_cost,
                });
            }
            Err(e) => {
                warn!("History summarization failed, keeping {count} entries as-is: {e}");
                let cost = e.token_cost();
                if cost > 0 {
                    self.charge(session, CostSource::Summarization, cost);
                }
            }
        }
    }
}
