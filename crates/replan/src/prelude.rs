//! Convenience re-exports for common `replan` types.
//!
//! ```ignore
//! use replan::prelude::*;
//! ```
//!
//! Covers what an embedding program needs to run sessions: the planner and
//! its config, gates and handlers, sessions and stores, the tool registry
//! adapters and the OpenRouter provider. Wire-level and validation helpers
//! stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{OpenRouterClient, json_schema_for};

// ── Turn engine ─────────────────────────────────────────────────────
pub use crate::agent::{
    ApprovalGate, AutoApprove, ChannelGate, CompositeEventHandler, Decision, EventHandler,
    FnEventHandler, FnGate, LoggingHandler, NoopHandler, PlannerConfig, PlannerEvent,
    PlannerLoop, SessionRegistry, SessionReport, Toggle, TurnOutcome, TurnReport,
};

// ── Sessions and context ────────────────────────────────────────────
pub use crate::context::{HistoryConfig, SummarizerConfig, TokenBudget};
pub use crate::session::{
    Action, FileSessionStore, Goal, MemorySessionStore, Plan, PlanStep, Session, SessionStatus,
    SessionStore, StepStatus,
};

// ── Providers and tools ─────────────────────────────────────────────
pub use crate::provider::{OpenRouterProvider, Proposal, ReasoningProvider};
pub use crate::tools::{
    FunctionSpec, HttpToolRegistry, LocalFunction, LocalToolRegistry, ParamSpec, ToolId,
    ToolRegistry,
};
