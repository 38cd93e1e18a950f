//! [`ReasoningProvider`] backed by the OpenRouter chat completions API.
//!
//! The model is asked for a single JSON object matching [`ProposalWire`].
//! Output wrapped in markdown fences is tolerated. Token cost is the usage
//! reported by the API, or an estimate from prompt and response length when
//! usage is missing.

use super::chat::{
    ChatCompletion, ChatMessage, ChatRequest, DEFAULT_MODEL, OpenRouterClient, ResponseFormat,
};
use super::{
    Proposal, ProposalRequest, ProviderFuture, ReasoningProvider, Summary, SummaryRequest,
};
use crate::context::estimate_tokens;
use crate::context::summarizer::{SummarizerConfig, build_summarization_request};
use crate::error::PlanningError;
use crate::json_schema_for;
use crate::session::{Action, GoalSpan, Plan, PlanStep, StepStatus};
use crate::tools::{ToolId, ToolRegistry, tools_summary};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

const PLANNER_PROMPT: &str = "\
You are the planner of a task execution agent. Each turn you receive the user's goal, \
the current plan, what the agent has learned so far and the recent history. You return \
an updated plan and at most one next action.

Rules:
- Only propose tools listed under AVAILABLE TOOLS, with parameters matching their signature.
- Keep step ids stable across turns. Never move a step backwards.
- Mark a step done only when a previous result shows it is done.
- Set goal_satisfied to true only when the goal is fully achieved and no step remains.
- If the last action failed, decide whether to retry, try an alternative, or give up the step.
- confidence is a number between 0 and 1.

Respond with ONLY a JSON object (no markdown, no explanation) matching this schema:";

// ── Wire format ────────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct StepWire {
    id: String,
    description: String,
    #[serde(default)]
    status: StepStatus,
    /// Byte offsets `[start, end]` into the goal text.
    #[serde(default)]
    goal_span: Option<[usize; 2]>,
}

#[derive(Deserialize, JsonSchema)]
struct PlanWire {
    #[serde(default)]
    steps: Vec<StepWire>,
    #[serde(default)]
    reasoning: String,
    confidence: f64,
}

#[derive(Deserialize, JsonSchema)]
struct ActionWire {
    category: String,
    function: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    step_id: Option<String>,
}

/// The JSON object the model must return.
#[derive(Deserialize, JsonSchema)]
struct ProposalWire {
    plan: PlanWire,
    #[serde(default)]
    action: Option<ActionWire>,
    #[serde(default)]
    goal_satisfied: bool,
    /// Updated one-paragraph summary of what the agent knows.
    #[serde(default)]
    summary: Option<String>,
}

impl ProposalWire {
    fn into_proposal(self, token_cost: u64) -> Proposal {
        let steps = self
            .plan
            .steps
            .into_iter()
            .map(|s| {
                let mut step = PlanStep::new(s.id, s.description).with_status(s.status);
                if let Some([start, end]) = s.goal_span {
                    step = step.with_span(GoalSpan::new(start, end));
                }
                step
            })
            .collect();
        Proposal {
            plan: Plan::new(steps, self.plan.reasoning, self.plan.confidence),
            action: self.action.map(|a| {
                let params = if a.params.is_null() {
                    Value::Object(Default::default())
                } else {
                    a.params
                };
                Action {
                    tool: ToolId::new(a.category, a.function),
                    params,
                    step_id: a.step_id,
                }
            }),
            goal_satisfied: self.goal_satisfied,
            summary: self.summary.filter(|s| !s.trim().is_empty()),
            token_cost,
        }
    }
}

/// Remove a surrounding markdown code fence, if any.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse model output into a proposal.
fn parse_proposal(text: &str, token_cost: u64) -> Result<Proposal, PlanningError> {
    let json = strip_fences(text);
    let wire: ProposalWire = serde_json::from_str(json).map_err(|e| {
        PlanningError::malformed(
            format!(
                "{e}; output began: {}",
                json.chars().take(200).collect::<String>()
            ),
            token_cost,
        )
    })?;
    Ok(wire.into_proposal(token_cost))
}

fn completion_cost(completion: &ChatCompletion, prompt: &str) -> u64 {
    completion.total_tokens.unwrap_or_else(|| {
        estimate_tokens(prompt) + estimate_tokens(completion.content.as_deref().unwrap_or(""))
    })
}

// ── Prompt construction ────────────────────────────────────────────

fn render_request(request: &ProposalRequest<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "GOAL:\n{}\n", request.goal.text());

    out.push_str("CURRENT PLAN:\n");
    if request.plan.steps.is_empty() {
        out.push_str("(no plan yet)\n");
    }
    for step in &request.plan.steps {
        let _ = write!(out, "- [{}] {} ({})", step.id, step.description, step.status);
        if let Some(err) = &step.error {
            let _ = write!(out, " last error: {err}");
        }
        out.push('\n');
    }

    let state = request.state;
    out.push_str("\nAGENT STATE:\n");
    if !state.summary().is_empty() {
        let _ = writeln!(out, "Summary: {}", state.summary());
    }
    if !state.completed_objectives().is_empty() {
        let done: Vec<&str> = state.completed_objectives().iter().map(String::as_str).collect();
        let _ = writeln!(out, "Completed: {}", done.join("; "));
    }
    if !state.blockers().is_empty() {
        let _ = writeln!(out, "Blockers: {}", state.blockers().join("; "));
    }
    if !state.context().is_empty() {
        let _ = writeln!(out, "Known values: {}", Value::Object(state.context().clone()));
    }
    for note in state.notes() {
        let _ = writeln!(out, "Note: {}", note.text);
    }

    out.push_str("\nRECENT HISTORY:\n");
    if request.history.is_empty() {
        out.push_str("(none)\n");
    }
    for entry in request.history {
        let _ = writeln!(out, "- {}", entry.describe());
    }

    let _ = write!(
        out,
        "\nTURN {} ({})",
        request.turn,
        request.budget.to_log_string()
    );
    out
}

// ── Provider ───────────────────────────────────────────────────────

pub struct OpenRouterProvider {
    client: OpenRouterClient,
    tools: Arc<dyn ToolRegistry>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    summarizer: SummarizerConfig,
    tools_summary: OnceCell<String>,
}

impl OpenRouterProvider {
    pub fn new(client: OpenRouterClient, tools: Arc<dyn ToolRegistry>) -> Self {
        Self {
            client,
            tools,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            temperature: 0.3,
            summarizer: SummarizerConfig::default(),
            tools_summary: OnceCell::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_summarizer(mut self, summarizer: SummarizerConfig) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The catalog rendered for the system prompt, fetched once.
    async fn catalog(&self) -> Result<&str, PlanningError> {
        let summary = self
            .tools_summary
            .get_or_try_init(|| async {
                tools_summary(self.tools.as_ref())
                    .await
                    .map_err(|e| PlanningError::Provider(format!("tool catalog unavailable: {e}")))
            })
            .await?;
        Ok(summary.as_str())
    }

    async fn complete(
        &self,
        model: &str,
        system: String,
        user: String,
        max_tokens: u32,
        temperature: f32,
        json: bool,
    ) -> Result<(String, u64), PlanningError> {
        let prompt_len_source = format!("{system}\n{user}");
        let body = ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            max_tokens,
            temperature,
            response_format: json.then(ResponseFormat::json_object),
        };
        let completion = self.client.chat(&body).await?;
        let cost = completion_cost(&completion, &prompt_len_source);
        let content = completion
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PlanningError::malformed("empty response", cost))?;
        trace!("Provider output: {}", content.chars().take(300).collect::<String>());
        Ok((content, cost))
    }
}

impl ReasoningProvider for OpenRouterProvider {
    fn propose<'a>(&'a self, request: ProposalRequest<'a>) -> ProviderFuture<'a, Proposal> {
        Box::pin(async move {
            let catalog = self.catalog().await?;
            let schema = serde_json::to_string_pretty(&json_schema_for::<ProposalWire>())
                .map_err(|e| PlanningError::Provider(format!("schema: {e}")))?;
            let system = format!("{PLANNER_PROMPT}\n{schema}\n\nAVAILABLE TOOLS:\n{catalog}");
            let user = render_request(&request);
            debug!(
                "Requesting proposal for turn {} from {} ({} history entries)",
                request.turn,
                self.model,
                request.history.len()
            );
            let (content, cost) = self
                .complete(&self.model, system, user, self.max_tokens, self.temperature, true)
                .await?;
            parse_proposal(&content, cost)
        })
    }

    fn summarize<'a>(&'a self, request: SummaryRequest<'a>) -> ProviderFuture<'a, Summary> {
        Box::pin(async move {
            let (system, user) = build_summarization_request(request.goal, request.entries);
            let model = self.summarizer.summary_model(&self.model);
            debug!(
                "Summarizing {} history entries with {model}",
                request.entries.len()
            );
            let (text, token_cost) = self
                .complete(
                    model,
                    system,
                    user,
                    self.summarizer.max_summary_tokens,
                    self.summarizer.temperature,
                    false,
                )
                .await?;
            Ok(Summary {
                text: text.trim().to_string(),
                token_cost,
            })
        })
    }
}
