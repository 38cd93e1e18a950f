//! The approve/skip/abort gate.
//!
//! Before any approved action runs, the planner suspends on
//! [`ApprovalGate::decide`] with no timeout. This is the only externally
//! cancellable point of a turn: a gate that goes away without answering
//! counts as [`Decision::Abort`].
//!
//! | Gate | Use case |
//! |------|----------|
//! | [`AutoApprove`] | Unattended runs and tests |
//! | [`FnGate`] | Scripted decisions from a closure |
//! | [`ChannelGate`] | Decisions from another task (CLI prompt, web handler) |

use crate::session::Action;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// The user's answer for one proposed action.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Skip {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
    },
    Abort,
}

impl Decision {
    pub fn skip() -> Self {
        Decision::Skip { feedback: None }
    }

    pub fn skip_with(feedback: impl Into<String>) -> Self {
        Decision::Skip {
            feedback: Some(feedback.into()),
        }
    }
}

/// What the gate sees when asked to decide.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalRequest<'a> {
    pub session_id: &'a str,
    pub turn: u32,
    pub action: &'a Action,
    /// The plan's reasoning for this turn.
    pub reasoning: &'a str,
    pub confidence: f64,
}

pub trait ApprovalGate: Send + Sync {
    fn decide<'a>(&'a self, request: ApprovalRequest<'a>) -> BoxFuture<'a, Decision>;
}

/// Approves everything.
pub struct AutoApprove;

impl ApprovalGate for AutoApprove {
    fn decide<'a>(&'a self, _request: ApprovalRequest<'a>) -> BoxFuture<'a, Decision> {
        Box::pin(async { Decision::Approve })
    }
}

/// A gate backed by a synchronous closure.
pub struct FnGate<F>(F)
where
    F: Fn(&ApprovalRequest<'_>) -> Decision + Send + Sync;

impl<F> FnGate<F>
where
    F: Fn(&ApprovalRequest<'_>) -> Decision + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ApprovalGate for FnGate<F>
where
    F: Fn(&ApprovalRequest<'_>) -> Decision + Send + Sync,
{
    fn decide<'a>(&'a self, request: ApprovalRequest<'a>) -> BoxFuture<'a, Decision> {
        let decision = (self.0)(&request);
        Box::pin(async move { decision })
    }
}

// ── Channel gate ───────────────────────────────────────────────────

/// A pending decision delivered to an [`ApprovalInbox`].
#[derive(Debug)]
pub struct PendingApproval {
    pub session_id: String,
    pub turn: u32,
    pub action: Action,
    pub reasoning: String,
    pub confidence: f64,
    reply: oneshot::Sender<Decision>,
}

impl PendingApproval {
    /// Answer the request. Dropping a `PendingApproval` unanswered aborts.
    pub fn respond(self, decision: Decision) {
        // A send error means the planner stopped waiting; nothing to do.
        let _ = self.reply.send(decision);
    }
}

/// Forwards every request over a channel and waits for the reply.
pub struct ChannelGate {
    requests: mpsc::Sender<PendingApproval>,
}

/// Receiving half of a [`ChannelGate`].
pub struct ApprovalInbox {
    requests: mpsc::Receiver<PendingApproval>,
}

impl ApprovalInbox {
    /// Next pending request. `None` once every gate is dropped.
    pub async fn next(&mut self) -> Option<PendingApproval> {
        self.requests.recv().await
    }
}

impl ChannelGate {
    pub fn new() -> (Self, ApprovalInbox) {
        let (tx, rx) = mpsc::channel(1);
        (Self { requests: tx }, ApprovalInbox { requests: rx })
    }
}

impl ApprovalGate for ChannelGate {
    fn decide<'a>(&'a self, request: ApprovalRequest<'a>) -> BoxFuture<'a, Decision> {
        Box::pin(async move {
            let (reply, answer) = oneshot::channel();
            let pending = PendingApproval {
                session_id: request.session_id.to_string(),
                turn: request.turn,
                action: request.action.clone(),
                reasoning: request.reasoning.to_string(),
                confidence: request.confidence,
                reply,
            };
            if self.requests.send(pending).await.is_err() {
                debug!("Approval inbox closed; treating as abort");
                return Decision::Abort;
            }
            answer.await.unwrap_or_else(|_| {
                debug!("Approval request dropped unanswered; treating as abort");
                Decision::Abort
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolId;
    use serde_json::json;

    fn action() -> Action {
        Action::new(ToolId::new("weather", "search"), json!({"city": "Tokyo"}))
    }

    fn request(action: &Action) -> ApprovalRequest<'_> {
        ApprovalRequest {
            session_id: "sess-1",
            turn: 1,
            action,
            reasoning: "need forecast",
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn channel_gate_relays_decision() {
        let (gate, mut inbox) = ChannelGate::new();
        let responder = tokio::spawn(async move {
            let pending = inbox.next().await.unwrap();
            assert_eq!(pending.action.tool.function, "search");
            pending.respond(Decision::skip_with("later"));
        });
        let action = action();
        let decision = gate.decide(request(&action)).await;
        responder.await.unwrap();
        assert_eq!(decision, Decision::skip_with("later"));
    }

    #[tokio::test]
    async fn dropped_request_counts_as_abort() {
        let (gate, mut inbox) = ChannelGate::new();
        tokio::spawn(async move {
            let pending = inbox.next().await.unwrap();
            drop(pending);
        });
        let action = action();
        assert_eq!(gate.decide(request(&action)).await, Decision::Abort);
    }

    #[tokio::test]
    async fn closed_inbox_counts_as_abort() {
        let (gate, inbox) = ChannelGate::new();
        drop(inbox);
        let action = action();
        assert_eq!(gate.decide(request(&action)).await, Decision::Abort);
    }

    #[test]
    fn decision_serde_shape() {
        let json = serde_json::to_value(Decision::skip_with("no")).unwrap();
        assert_eq!(json, json!({"decision": "skip", "feedback": "no"}));
        let back: Decision = serde_json::from_value(json!({"decision": "abort"})).unwrap();
        assert_eq!(back, Decision::Abort);
    }
}
