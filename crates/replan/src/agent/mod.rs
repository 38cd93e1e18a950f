//! The turn engine: the [`PlannerLoop`] and its supporting modules.
//!
//! - [`planner::PlannerLoop`]: one turn at a time, propose → approve →
//!   execute → update. Start here.
//! - [`config::PlannerConfig`]: budget, turn cap, history window,
//!   summarization, retry and timeouts.
//! - [`gate`]: the [`ApprovalGate`] consulted before every action.
//! - [`events`]: [`EventHandler`] observers and the [`TurnReport`] /
//!   [`SessionReport`] results.
//! - [`registry`]: [`SessionRegistry`] for serving many sessions at once.

pub mod config;
pub mod events;
pub mod gate;
pub mod planner;
pub mod registry;

pub use config::{PlannerConfig, PlanningPolicy, Toggle};
pub use events::{
    CompositeEventHandler, CostSource, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    PlannerEvent, SessionReport, TurnOutcome, TurnPhase, TurnReport,
};
pub use gate::{
    ApprovalGate, ApprovalInbox, ApprovalRequest, AutoApprove, ChannelGate, Decision, FnGate,
    PendingApproval,
};
pub use planner::PlannerLoop;
pub use registry::{SessionGuard, SessionRegistry, SessionSlot};
