//! Plans, plan steps, and proposed actions.
//!
//! A [`Plan`] is replaced wholesale every turn. Step status is still
//! monotonic across replacements: [`Plan::reconciled_with`] carries forward
//! any status the previous plan had already reached for the same step id.

use super::goal::GoalSpan;
use crate::tools::ToolId;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle of one plan step: `pending → in_progress → {done, failed}`.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Failed,
}

impl StepStatus {
    fn rank(self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::InProgress => 1,
            StepStatus::Done | StepStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a forward step (or a no-op).
    pub fn can_advance_to(self, next: StepStatus) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        next.rank() >= self.rank()
    }

    /// The status to keep when a new plan proposes `proposed` for a step
    /// that is currently `self`.
    pub fn reconcile(self, proposed: StepStatus) -> StepStatus {
        if self.can_advance_to(proposed) {
            proposed
        } else {
            self
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One step of a plan.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_span: Option<GoalSpan>,
    /// Tool most recently dispatched for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolId>,
    /// Most recent failure while working on this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: StepStatus::Pending,
            goal_span: None,
            tool: None,
            error: None,
        }
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_span(mut self, span: GoalSpan) -> Self {
        self.goal_span = Some(span);
        self
    }

    /// Move forward to `next`. Returns `false` (and changes nothing) for a
    /// regression.
    pub(crate) fn advance(&mut self, next: StepStatus) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        true
    }
}

/// The current decomposition of the goal.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Plan {
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub reasoning: String,
    /// Provider confidence in `[0, 1]`. Checked by the planner, not here.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            reasoning: String::new(),
            confidence: 0.0,
            updated_at: Utc::now(),
        }
    }
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>, reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            steps,
            reasoning: reasoning.into(),
            confidence,
            updated_at: Utc::now(),
        }
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub(crate) fn step_mut(&mut self, id: &str) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Steps not yet `done` or `failed`.
    pub fn remaining(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| !s.status.is_terminal())
    }

    /// No step is left to work on. An empty plan is finished.
    pub fn is_finished(&self) -> bool {
        self.remaining().next().is_none()
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// The step an action works on: `hint` when it names a non-terminal step,
    /// otherwise the first `in_progress` step, otherwise the first `pending`.
    pub fn target_step(&self, hint: Option<&str>) -> Option<&PlanStep> {
        if let Some(id) = hint
            && let Some(step) = self.step(id)
            && !step.status.is_terminal()
        {
            return Some(step);
        }
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::InProgress)
            .or_else(|| self.steps.iter().find(|s| s.status == StepStatus::Pending))
    }

    /// Carry forward progress from `previous`: for every step id present in
    /// both plans, keep whichever status is further along. Tool and error
    /// annotations are inherited when the new plan omits them.
    pub fn reconciled_with(mut self, previous: &Plan) -> Plan {
        for step in self.steps.iter_mut() {
            if let Some(prev) = previous.step(&step.id) {
                step.status = prev.status.reconcile(step.status);
                if step.tool.is_none() {
                    step.tool = prev.tool.clone();
                }
                if step.error.is_none() {
                    step.error = prev.error.clone();
                }
            }
        }
        self
    }
}

/// A proposed tool invocation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Action {
    pub tool: ToolId,
    #[serde(default = "empty_object")]
    pub params: Value,
    /// The plan step this action works on, when the provider names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl Action {
    pub fn new(tool: ToolId, params: Value) -> Self {
        Self {
            tool,
            params,
            step_id: None,
        }
    }

    pub fn for_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tool, self.params)
    }
}
