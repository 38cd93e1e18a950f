//! Continuous-planning agent turn engine.
//!
//! `replan` drives a long-lived plan toward a natural-language goal, one
//! turn at a time. Every turn the plan is re-derived from scratch by a
//! [`ReasoningProvider`](provider::ReasoningProvider) given the goal, the
//! accumulated [`AgentState`](session::AgentState) and recent history. At
//! most one concrete tool action is proposed, validated against a
//! [`ToolRegistry`](tools::ToolRegistry), approved (or skipped, or aborted)
//! by an [`ApprovalGate`](agent::gate::ApprovalGate), executed, and folded
//! back into state.
//!
//! # Getting started
//!
//! ```ignore
//! use replan::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api_key = std::env::var("OPENROUTER_KEY")?;
//!     let tools: Arc<dyn ToolRegistry> = Arc::new(HttpToolRegistry::new("http://localhost:9999")?);
//!     let provider = OpenRouterProvider::new(OpenRouterClient::new(api_key)?, tools.clone());
//!
//!     let config = PlannerConfig::new(5_000).with_max_turns(20);
//!     let mut session = Session::new(Goal::new("Get weather for Tokyo"), config.max_tokens);
//!
//!     let report = PlannerLoop::new(&provider, tools.as_ref(), config)
//!         .with_event_handler(&LoggingHandler)
//!         .run(&mut session, None)
//!         .await?;
//!
//!     println!("{}: {:?}", report.status, report.end_reason);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | [`PlannerLoop`](agent::planner::PlannerLoop) turn engine, config, approval gate, events, session registry |
//! | [`session`] | [`Session`](session::Session), goal, plan, agent state, persistence |
//! | [`context`] | Token budget, action history, history summarization |
//! | [`provider`] | [`ReasoningProvider`](provider::ReasoningProvider) contract and the OpenRouter-backed provider |
//! | [`tools`] | [`ToolRegistry`](tools::ToolRegistry) contract, HTTP and in-process registries, parameter validation |
//! | [`api`] | Retry with backoff for outbound calls |
//! | [`error`] | Error types |
//!
//! # Invariants
//!
//! 1. **One action per turn.** A turn proposes at most one action and
//!    nothing runs without an explicit `approve`.
//! 2. **Fail closed.** Unknown tools, malformed parameters, out-of-range
//!    confidence and unreachable catalogs all reject the proposal.
//! 3. **The budget is monotone.** Every provider and tool call is charged,
//!    and no new call starts once `used_tokens >= max_tokens`.
//! 4. **Progress never regresses.** A re-derived plan cannot move a step
//!    back from `done` or `failed`.

pub mod agent;
pub mod api;
pub mod context;
pub mod error;
pub mod prelude;
pub mod provider;
pub mod session;
pub mod tools;

use schemars::JsonSchema;

pub use provider::chat::{DEFAULT_MODEL, OPENROUTER_URL, OpenRouterClient};
// Re-export schemars for downstream crates.
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` for a `schemars::JsonSchema`
/// type. Used to show the provider the exact proposal shape it must emit.
///
/// # Example
///
/// ```
/// use replan::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     city: String,
///     #[serde(default)]
///     days: Option<u32>,
/// }
///
/// let schema = json_schema_for::<SearchArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"city".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
