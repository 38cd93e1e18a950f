//! Session registry: exclusive access per session, parallel sessions, and
//! persistence through the store.

mod common;

use common::{CountingRegistry, ScriptedProvider, idle};
use replan::agent::events::TurnOutcome;
use replan::agent::{PlannerConfig, PlannerLoop, SessionRegistry};
use replan::error::RegistryError;
use replan::session::{FileSessionStore, Goal, SessionStatus, SessionStore};
use std::sync::Arc;
use std::time::Duration;

fn file_registry(dir: &std::path::Path) -> SessionRegistry {
    SessionRegistry::new(Arc::new(FileSessionStore::new(dir).unwrap()))
}

#[tokio::test]
async fn run_turn_persists_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let registry = file_registry(dir.path());
    let id = registry.create(Goal::new("think"), 1_000).unwrap();

    let provider = ScriptedProvider::new(vec![idle(10), idle(10)]);
    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(&provider, &tools, PlannerConfig::new(1_000));

    let report = registry.run_turn(&id, &planner).await.unwrap();
    assert_eq!(report.outcome, TurnOutcome::NoAction);

    // A fresh registry over the same directory sees the saved turn.
    let reopened = file_registry(dir.path());
    let snapshot = reopened.snapshot(&id).await.unwrap();
    assert_eq!(snapshot.turns, 1);
    assert_eq!(snapshot.used_tokens, 10);
    assert_eq!(snapshot.status, SessionStatus::Active);

    let report = reopened.run_turn(&id, &planner).await.unwrap();
    assert_eq!(report.turn, 2);
    let manifests = reopened.list().unwrap();
    assert_eq!(manifests[0].turn, 2);
}

#[tokio::test]
async fn held_session_blocks_other_callers() {
    let registry = SessionRegistry::new(Arc::new(replan::session::MemorySessionStore::new()));
    let id = registry.create(Goal::new("think"), 1_000).unwrap();

    let guard = registry.checkout(&id).await.unwrap();
    assert!(matches!(
        registry.try_checkout(&id),
        Err(RegistryError::Busy(_))
    ));

    // checkout waits rather than failing.
    let waited = tokio::time::timeout(Duration::from_millis(20), registry.checkout(&id)).await;
    assert!(waited.is_err());

    drop(guard);
    assert!(registry.try_checkout(&id).is_ok());
}

#[tokio::test]
async fn distinct_sessions_run_in_parallel() {
    let registry = Arc::new(SessionRegistry::new(Arc::new(
        replan::session::MemorySessionStore::new(),
    )));
    let a = registry.create(Goal::new("first"), 1_000).unwrap();
    let b = registry.create(Goal::new("second"), 1_000).unwrap();

    // Holding `a` must not block work on `b`.
    let _held = registry.checkout(&a).await.unwrap();
    let provider = ScriptedProvider::new(vec![idle(3)]);
    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(&provider, &tools, PlannerConfig::new(1_000));
    let report = tokio::time::timeout(Duration::from_secs(1), registry.run_turn(&b, &planner))
        .await
        .expect("session b was blocked by session a")
        .unwrap();
    assert_eq!(report.turn, 1);
}

#[tokio::test]
async fn run_drives_to_terminal_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSessionStore::new(dir.path()).unwrap());
    let registry = SessionRegistry::new(store.clone());
    let id = registry.create(Goal::new("think"), 25).unwrap();

    let provider = ScriptedProvider::new(vec![idle(10), idle(10), idle(10)]);
    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(&provider, &tools, PlannerConfig::new(25));

    let report = registry.run(&id, &planner).await.unwrap();
    assert_eq!(report.status, SessionStatus::BudgetExceeded);
    assert_eq!(report.used_tokens, 30);

    let stored = store.load(&id).unwrap().unwrap();
    assert_eq!(stored.status(), SessionStatus::BudgetExceeded);
    assert_eq!(stored.turn(), 3);
}

#[tokio::test]
async fn queued_turn_does_not_bring_back_a_removed_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSessionStore::new(dir.path()).unwrap());
    let registry = SessionRegistry::new(store.clone());
    let id = registry.create(Goal::new("think"), 1_000).unwrap();

    let provider = ScriptedProvider::new(vec![idle(10)]);
    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(&provider, &tools, PlannerConfig::new(1_000));

    // `remove` queues on the session lock first, then the turn behind it.
    let guard = registry.checkout(&id).await.unwrap();
    let release = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
    };
    let (removed, turn, ()) = tokio::join!(
        registry.remove(&id),
        registry.run_turn(&id, &planner),
        release
    );

    assert!(removed.unwrap());
    assert!(matches!(turn, Err(RegistryError::NotFound(missing)) if missing == id));
    assert_eq!(provider.proposals(), 0);
    assert!(store.load(&id).unwrap().is_none());
    assert!(!registry.contains(&id));
    assert!(matches!(
        registry.snapshot(&id).await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn missing_sessions_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let registry = file_registry(dir.path());
    assert!(matches!(
        registry.snapshot("sess-nope").await,
        Err(RegistryError::NotFound(id)) if id == "sess-nope"
    ));
    assert!(!registry.remove("sess-nope").await.unwrap());
}
