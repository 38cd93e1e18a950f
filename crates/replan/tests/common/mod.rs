//! Shared fixtures: a scripted provider, a scripted gate, a counting tool
//! registry and an event recorder.

#![allow(dead_code)]

use futures::future::BoxFuture;
use replan::agent::events::{EventHandler, PlannerEvent};
use replan::agent::gate::{ApprovalGate, ApprovalRequest, Decision};
use replan::error::PlanningError;
use replan::provider::{
    Proposal, ProposalRequest, ProviderFuture, ReasoningProvider, Summary, SummaryRequest,
};
use replan::session::{Action, Plan, PlanStep, SessionStatus, StepStatus};
use replan::tools::{
    DiscoveryFuture, ExecuteFuture, FunctionSpec, LocalFunction, LocalToolRegistry, Page,
    PageRequest, ParamSpec, ToolId, ToolRegistry,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ── Provider ───────────────────────────────────────────────────────

/// Replays a fixed sequence of Propose results. Once the script runs out
/// every call fails.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Proposal, PlanningError>>>,
    pub proposals: AtomicUsize,
    pub summaries: AtomicUsize,
    pub summary_cost: u64,
    /// When set, every summarize call returns a billed malformed response.
    pub summaries_fail: bool,
    /// History window length seen by each Propose call.
    pub windows: Mutex<Vec<usize>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<Proposal, PlanningError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            proposals: AtomicUsize::new(0),
            summaries: AtomicUsize::new(0),
            summary_cost: 10,
            summaries_fail: false,
            windows: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failing_summaries(mut self) -> Self {
        self.summaries_fail = true;
        self
    }

    pub fn proposals(&self) -> usize {
        self.proposals.load(Ordering::SeqCst)
    }

    pub fn summaries(&self) -> usize {
        self.summaries.load(Ordering::SeqCst)
    }
}

impl ReasoningProvider for ScriptedProvider {
    fn propose<'a>(&'a self, request: ProposalRequest<'a>) -> ProviderFuture<'a, Proposal> {
        self.proposals.fetch_add(1, Ordering::SeqCst);
        self.windows.lock().unwrap().push(request.history.len());
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PlanningError::Provider("script exhausted".into())));
        Box::pin(async move { next })
    }

    fn summarize<'a>(&'a self, request: SummaryRequest<'a>) -> ProviderFuture<'a, Summary> {
        self.summaries.fetch_add(1, Ordering::SeqCst);
        let text = format!("condensed {} entries", request.entries.len());
        let token_cost = self.summary_cost;
        if self.summaries_fail {
            return Box::pin(async move {
                Err::<Summary, _>(PlanningError::malformed("empty response", token_cost))
            });
        }
        Box::pin(async move { Ok(Summary { text, token_cost }) })
    }
}

// ── Gate ───────────────────────────────────────────────────────────

/// Replays decisions in order, approving once the script runs out.
pub struct ScriptedGate {
    decisions: Mutex<VecDeque<Decision>>,
    pub asked: AtomicUsize,
}

impl ScriptedGate {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl ApprovalGate for ScriptedGate {
    fn decide<'a>(&'a self, _request: ApprovalRequest<'a>) -> BoxFuture<'a, Decision> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        let decision = self
            .decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Decision::Approve);
        Box::pin(async move { decision })
    }
}

// ── Registry ───────────────────────────────────────────────────────

/// A local registry that counts `execute` calls.
pub struct CountingRegistry {
    inner: LocalToolRegistry,
    executions: AtomicUsize,
}

impl CountingRegistry {
    pub fn new(inner: LocalToolRegistry) -> Self {
        Self {
            inner,
            executions: AtomicUsize::new(0),
        }
    }

    /// `weather.search`, `weather.slow` (sleeps 500ms), `weather.broken`
    /// (reports failure) and `calc.evaluate`.
    pub fn weather() -> Self {
        let search = FunctionSpec::new("weather", "search", "Forecast for a city")
            .param("city", ParamSpec::required("str"));
        let slow = FunctionSpec::new("weather", "slow", "A forecast service that hangs")
            .param("city", ParamSpec::required("str"));
        let broken = FunctionSpec::new("weather", "broken", "A forecast service that is down")
            .param("city", ParamSpec::required("str"));
        let registry = LocalToolRegistry::new()
            .with(LocalFunction::new(search, |_params: Value| async {
                Ok(json!({"rain_chance": 75}))
            }))
            .with(LocalFunction::new(slow, |_params: Value| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(json!({"rain_chance": 10}))
            }))
            .with(LocalFunction::new(broken, |_params: Value| async {
                Err("upstream unavailable".to_string())
            }))
            .with_calculator();
        Self::new(registry)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

impl ToolRegistry for CountingRegistry {
    fn list_functions(&self, page: PageRequest) -> DiscoveryFuture<'_, Page<FunctionSpec>> {
        self.inner.list_functions(page)
    }

    fn get_function<'a>(&'a self, name: &'a str) -> DiscoveryFuture<'a, Option<FunctionSpec>> {
        self.inner.get_function(name)
    }

    fn list_by_category<'a>(
        &'a self,
        category: &'a str,
        page: PageRequest,
    ) -> DiscoveryFuture<'a, Page<FunctionSpec>> {
        self.inner.list_by_category(category, page)
    }

    fn list_categories(&self) -> DiscoveryFuture<'_, Vec<String>> {
        self.inner.list_categories()
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        page: PageRequest,
    ) -> DiscoveryFuture<'a, Page<FunctionSpec>> {
        self.inner.search(query, page)
    }

    fn execute<'a>(&'a self, tool: &'a ToolId, params: &'a Value) -> ExecuteFuture<'a> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(tool, params)
    }
}

// ── Event recorder ─────────────────────────────────────────────────

#[derive(Default)]
pub struct Recorder {
    pub transitions: Mutex<Vec<(SessionStatus, SessionStatus)>>,
    pub used_tokens: Mutex<Vec<u64>>,
}

impl EventHandler for Recorder {
    fn on_event(&self, event: &PlannerEvent<'_>) {
        match event {
            PlannerEvent::StatusChanged { from, to, .. } => {
                self.transitions.lock().unwrap().push((*from, *to));
            }
            PlannerEvent::TokenUsage { budget, .. } | PlannerEvent::TurnStart { budget, .. } => {
                self.used_tokens.lock().unwrap().push(budget.used_tokens());
            }
            _ => {}
        }
    }
}

// ── Builders ───────────────────────────────────────────────────────

pub fn step(id: &str, description: &str, status: StepStatus) -> PlanStep {
    PlanStep::new(id, description).with_status(status)
}

pub fn plan(steps: Vec<PlanStep>) -> Plan {
    Plan::new(steps, "scripted reasoning", 0.8)
}

pub fn action(qualified: &str, params: Value) -> Action {
    Action::new(ToolId::parse(qualified).unwrap(), params)
}

/// A proposal with a one-step plan and no action.
pub fn idle(cost: u64) -> Result<Proposal, PlanningError> {
    Ok(Proposal::new(plan(vec![step("s1", "think", StepStatus::Pending)])).with_cost(cost))
}
