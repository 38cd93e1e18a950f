use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::tools::ToolId;

/// A free-form note attached to a session between turns.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AgentNote {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// Accumulated understanding derived from executed actions.
///
/// Written by the planner after a turn's execution step. Readers get it
/// through [`Session::state`](super::Session::state).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AgentState {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    completed_objectives: BTreeSet<String>,
    #[serde(default)]
    blockers: Vec<String>,
    #[serde(default)]
    context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    notes: Vec<AgentNote>,
}

impl AgentState {
    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn completed_objectives(&self) -> &BTreeSet<String> {
        &self.completed_objectives
    }

    pub fn blockers(&self) -> &[String] {
        &self.blockers
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn notes(&self) -> &[AgentNote] {
        &self.notes
    }

    /// Merge an inner tool payload into `context`.
    ///
    /// Object payloads contribute their top-level fields except `success`.
    /// Anything else is stored whole under `"{category}.{function}"`.
    /// Returns the keys written.
    pub(crate) fn merge_result(&mut self, tool: &ToolId, payload: &Value) -> Vec<String> {
        match payload {
            Value::Object(fields) => fields
                .iter()
                .filter(|(k, _)| k.as_str() != "success")
                .map(|(k, v)| {
                    self.context.insert(k.clone(), v.clone());
                    k.clone()
                })
                .collect(),
            other => {
                let key = tool.to_string();
                self.context.insert(key.clone(), other.clone());
                vec![key]
            }
        }
    }

    pub(crate) fn add_blocker(&mut self, blocker: impl Into<String>) {
        self.blockers.push(blocker.into());
    }

    /// Returns `true` if the objective was not already recorded.
    pub(crate) fn complete_objective(&mut self, objective: impl Into<String>) -> bool {
        self.completed_objectives.insert(objective.into())
    }

    pub(crate) fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = summary.into();
    }

    pub(crate) fn add_note(&mut self, text: impl Into<String>) {
        self.notes.push(AgentNote {
            at: Utc::now(),
            text: text.into(),
        });
    }
}
