//! End-to-end behavior of the turn engine against a scripted provider, a
//! scripted gate and an in-process tool registry.

mod common;

use common::{
    CountingRegistry, Recorder, ScriptedGate, ScriptedProvider, action, idle, plan, step,
};
use replan::agent::events::TurnOutcome;
use replan::agent::gate::Decision;
use replan::agent::{PlannerConfig, PlannerLoop};
use replan::api::RetryConfig;
use replan::context::{EntryKind, HistoryConfig};
use replan::error::PlanningError;
use replan::provider::Proposal;
use replan::session::{FileSessionStore, Goal, Session, SessionStatus, SessionStore, StepStatus};
use serde_json::json;
use std::time::Duration;

fn config(max_tokens: u64) -> PlannerConfig {
    PlannerConfig::new(max_tokens).with_planning_retry(RetryConfig::immediate(1))
}

fn session(goal: &str, max_tokens: u64) -> Session {
    Session::new(Goal::new(goal), max_tokens)
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn weather_then_umbrella_completes_in_two_turns() {
    let provider = ScriptedProvider::new(vec![
        Ok(Proposal::new(plan(vec![
            step("s1", "Get weather for Tokyo", StepStatus::InProgress),
            step("s2", "Decide on umbrella", StepStatus::Pending),
        ]))
        .with_action(action("weather.search", json!({"city": "Tokyo"})).for_step("s1"))
        .with_cost(100)),
        Ok(Proposal::new(plan(vec![
            step("s1", "Get weather for Tokyo", StepStatus::Done),
            step("s2", "Decide on umbrella", StepStatus::InProgress),
        ]))
        .with_action(action("calc.evaluate", json!({"expr": "75>50"})).for_step("s2"))
        .satisfied()
        .with_summary("75% rain: take an umbrella")
        .with_cost(100)),
    ]);
    let tools = CountingRegistry::weather();
    let gate = ScriptedGate::new(vec![Decision::Approve, Decision::Approve]);
    let recorder = Recorder::default();
    let planner = PlannerLoop::new(&provider, &tools, config(10_000))
        .with_gate(&gate)
        .with_event_handler(&recorder);
    let mut session = session("Get weather for Tokyo then decide on umbrella.", 10_000);

    let first = planner.run_turn(&mut session).await;
    assert_eq!(first.outcome, TurnOutcome::Executed);
    assert_eq!(session.state().context()["rain_chance"], json!(75));
    assert_eq!(session.plan().step("s1").unwrap().status, StepStatus::Done);
    assert_eq!(session.status(), SessionStatus::Active);

    let report = planner.run(&mut session, None).await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.turns, 2);
    assert_eq!(session.state().context()["result"], json!(true));
    assert!(session.plan().is_finished());
    let objectives = session.state().completed_objectives();
    assert!(objectives.contains("Get weather for Tokyo"));
    assert!(objectives.contains("Decide on umbrella"));
    assert_eq!(session.state().summary(), "75% rain: take an umbrella");

    let kinds: Vec<EntryKind> = report.history.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EntryKind::Approved,
            EntryKind::Executed,
            EntryKind::Approved,
            EntryKind::Executed
        ]
    );
    assert_eq!(tools.executions(), 2);
    assert_eq!(gate.asked(), 2);
    assert_eq!(
        *recorder.transitions.lock().unwrap(),
        vec![(SessionStatus::Active, SessionStatus::Completed)]
    );
}

#[tokio::test]
async fn planning_cost_reaching_the_limit_ends_the_session() {
    let provider = ScriptedProvider::new(vec![idle(600), idle(400), idle(1)]);
    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(&provider, &tools, config(1000));
    let mut session = session("think hard", 1000);

    assert_eq!(
        planner.run_turn(&mut session).await.outcome,
        TurnOutcome::NoAction
    );
    let second = planner.run_turn(&mut session).await;
    assert_eq!(second.outcome, TurnOutcome::BudgetExhausted);
    assert_eq!(session.budget().used_tokens(), 1000);
    assert!(session.budget().exceeded());
    assert_eq!(session.status(), SessionStatus::BudgetExceeded);

    let third = planner.run_turn(&mut session).await;
    assert_eq!(third.outcome, TurnOutcome::Halted);
    assert_eq!(provider.proposals(), 2);
    assert_eq!(session.turn(), 2);
}

#[tokio::test]
async fn planning_call_over_the_limit_blocks_its_own_action() {
    let provider = ScriptedProvider::new(vec![Ok(Proposal::new(plan(vec![step(
        "s1",
        "forecast",
        StepStatus::Pending,
    )]))
    .with_action(action("weather.search", json!({"city": "Oslo"})))
    .with_cost(1500))]);
    let tools = CountingRegistry::weather();
    let gate = ScriptedGate::new(vec![]);
    let planner = PlannerLoop::new(&provider, &tools, config(1000)).with_gate(&gate);
    let mut session = session("forecast", 1000);

    let report = planner.run_turn(&mut session).await;
    assert_eq!(report.outcome, TurnOutcome::BudgetExhausted);
    assert_eq!(report.tokens_charged, 1500);
    assert_eq!(session.status(), SessionStatus::BudgetExceeded);
    assert_eq!(gate.asked(), 0);
    assert_eq!(tools.executions(), 0);
    let entry = session.history().last().unwrap();
    assert_eq!(entry.kind, EntryKind::Proposed);
    assert!(entry.action.is_some());
}

#[tokio::test]
async fn tool_timeout_is_recorded_as_failure() {
    let provider = ScriptedProvider::new(vec![Ok(Proposal::new(plan(vec![step(
        "s1",
        "forecast",
        StepStatus::Pending,
    )]))
    .with_action(action("weather.slow", json!({"city": "Tokyo"})))
    .with_cost(50))]);
    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(
        &provider,
        &tools,
        config(10_000).with_tool_timeout(Duration::from_millis(20)),
    );
    let mut session = session("forecast", 10_000);

    let report = planner.run_turn(&mut session).await;
    assert_eq!(report.outcome, TurnOutcome::ToolFailed);
    assert_eq!(session.status(), SessionStatus::Active);
    assert_eq!(session.state().blockers().len(), 1);
    assert!(session.state().blockers()[0].contains("weather.slow"));

    let entry = session.history().last().unwrap();
    assert_eq!(entry.kind, EntryKind::Failed);
    assert!(entry.note.as_deref().unwrap().contains("timed out"));

    let s1 = session.plan().step("s1").unwrap();
    assert_eq!(s1.status, StepStatus::Failed);
    assert!(s1.error.is_some());
}

#[tokio::test]
async fn reported_tool_failure_becomes_a_blocker() {
    let provider = ScriptedProvider::new(vec![
        Ok(Proposal::new(plan(vec![step("s1", "forecast", StepStatus::Pending)]))
            .with_action(action("weather.broken", json!({"city": "Tokyo"})).for_step("s1"))
            .with_cost(40)),
        Ok(Proposal::new(plan(vec![
            step("s1", "forecast", StepStatus::InProgress),
            step("s2", "forecast from the backup service", StepStatus::Pending),
        ]))
        .with_action(action("weather.search", json!({"city": "Tokyo"})).for_step("s2"))
        .with_cost(40)),
    ]);
    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(&provider, &tools, config(10_000));
    let mut session = session("forecast for Tokyo", 10_000);

    let first = planner.run_turn(&mut session).await;
    assert_eq!(first.outcome, TurnOutcome::ToolFailed);
    assert_eq!(first.status, SessionStatus::Active);
    assert_eq!(tools.executions(), 1);
    assert!(session.state().context().is_empty());
    assert_eq!(session.state().blockers().len(), 1);
    assert!(session.state().blockers()[0].contains("weather.broken"));
    assert!(session.state().blockers()[0].contains("upstream unavailable"));

    let entry = session.history().last().unwrap();
    assert_eq!(entry.kind, EntryKind::Failed);
    assert!(entry.result.is_none());
    let s1 = session.plan().step("s1").unwrap();
    assert_eq!(s1.status, StepStatus::Failed);
    assert!(s1.error.as_deref().unwrap().contains("upstream unavailable"));
    assert!(session.state().completed_objectives().is_empty());

    let second = planner.run_turn(&mut session).await;
    assert_eq!(second.outcome, TurnOutcome::Executed);
    assert_eq!(session.state().context()["rain_chance"], json!(75));
    assert_eq!(session.plan().step("s1").unwrap().status, StepStatus::Failed);
    assert_eq!(session.plan().step("s2").unwrap().status, StepStatus::Done);
    assert_eq!(session.state().blockers().len(), 1);
}

#[tokio::test]
async fn unknown_tool_is_rejected_and_replanned() {
    let provider = ScriptedProvider::new(vec![
        Ok(Proposal::new(plan(vec![step("s1", "do it", StepStatus::Pending)]))
            .with_action(action("unknown.func", json!({})))
            .with_cost(30)),
        idle(30),
    ]);
    let tools = CountingRegistry::weather();
    let gate = ScriptedGate::new(vec![]);
    let planner = PlannerLoop::new(&provider, &tools, config(10_000)).with_gate(&gate);
    let mut session = session("do it", 10_000);

    let first = planner.run_turn(&mut session).await;
    assert_eq!(first.outcome, TurnOutcome::Rejected);
    let entry = session.history().last().unwrap();
    assert_eq!(entry.kind, EntryKind::Rejected);
    assert!(entry.note.as_deref().unwrap().contains("unknown.func"));
    assert_eq!(tools.executions(), 0);
    assert_eq!(gate.asked(), 0);
    assert_eq!(session.status(), SessionStatus::Active);

    planner.run_turn(&mut session).await;
    assert_eq!(provider.proposals(), 2);
    assert_eq!(session.history().len(), 2);
}

#[tokio::test]
async fn summarization_keeps_the_recent_window() {
    let provider = ScriptedProvider::new((0..10).map(|_| idle(20)).collect());
    let tools = CountingRegistry::weather();
    let history = HistoryConfig {
        window: 5,
        max_history_entries: 10,
        summarize_after: 7,
    };
    let recorder = Recorder::default();
    let planner = PlannerLoop::new(&provider, &tools, config(10_000).with_history(history))
        .with_event_handler(&recorder);
    let mut session = session("think", 10_000);

    for _ in 0..9 {
        planner.run_turn(&mut session).await;
    }
    assert_eq!(session.history().len(), 9);
    assert_eq!(provider.summaries(), 0);
    let before: Vec<_> = session.history().entries().get(7..9).unwrap().to_vec();

    planner.run_turn(&mut session).await;
    let entries = session.history().entries();
    assert_eq!(entries.len(), 10 - 7 + 1);
    assert_eq!(entries[0].kind, EntryKind::Summary);
    assert_eq!(entries[0].turns_covered, Some((1, 7)));
    assert_eq!(entries[0].note.as_deref(), Some("condensed 7 entries"));
    assert_eq!(entries.get(1..3).unwrap(), before.as_slice());
    assert_eq!(entries[3].turn_index, 10);
    assert_eq!(provider.summaries(), 1);
    assert_eq!(session.budget().used_tokens(), 10 * 20 + 10);

    let used = recorder.used_tokens.lock().unwrap();
    assert!(used.windows(2).all(|w| w[0] <= w[1]));
    assert!(provider.windows.lock().unwrap().iter().all(|&n| n <= 5));
}

#[tokio::test]
async fn failed_summarization_is_still_charged() {
    let provider =
        ScriptedProvider::new((0..4).map(|_| idle(20)).collect()).with_failing_summaries();
    let tools = CountingRegistry::weather();
    let history = HistoryConfig {
        window: 2,
        max_history_entries: 4,
        summarize_after: 3,
    };
    let planner = PlannerLoop::new(&provider, &tools, config(10_000).with_history(history));
    let mut session = session("think", 10_000);

    for _ in 0..4 {
        planner.run_turn(&mut session).await;
    }
    assert_eq!(provider.summaries(), 1);
    assert_eq!(session.history().len(), 4);
    assert!(session.history().entries().iter().all(|e| e.kind != EntryKind::Summary));
    assert_eq!(session.budget().used_tokens(), 4 * 20 + 10);
    assert_eq!(session.status(), SessionStatus::Active);
}

// ── Gate decisions ─────────────────────────────────────────────────

#[tokio::test]
async fn skip_never_executes() {
    let forecast = || {
        Ok(
            Proposal::new(plan(vec![step("s1", "forecast", StepStatus::Pending)]))
                .with_action(action("weather.search", json!({"city": "Tokyo"})))
                .with_cost(10),
        )
    };
    let provider = ScriptedProvider::new(vec![forecast(), forecast()]);
    let tools = CountingRegistry::weather();
    let gate = ScriptedGate::new(vec![Decision::skip_with("not yet"), Decision::skip()]);
    let planner = PlannerLoop::new(&provider, &tools, config(10_000)).with_gate(&gate);
    let mut session = session("forecast", 10_000);

    assert_eq!(
        planner.run_turn(&mut session).await.outcome,
        TurnOutcome::Skipped
    );
    assert_eq!(
        planner.run_turn(&mut session).await.outcome,
        TurnOutcome::Skipped
    );
    assert_eq!(tools.executions(), 0);
    assert_eq!(session.history().count(EntryKind::Skipped), 2);
    let first = &session.history().entries()[0];
    assert!(first.note.as_deref().unwrap().contains("not yet"));
    assert_eq!(session.status(), SessionStatus::Active);
    assert_eq!(session.plan().step("s1").unwrap().status, StepStatus::Pending);
}

#[tokio::test]
async fn abort_ends_the_session_before_dispatch() {
    let provider = ScriptedProvider::new(vec![Ok(Proposal::new(plan(vec![step(
        "s1",
        "forecast",
        StepStatus::Pending,
    )]))
    .with_action(action("weather.search", json!({"city": "Tokyo"})))
    .with_cost(10))]);
    let tools = CountingRegistry::weather();
    let gate = ScriptedGate::new(vec![Decision::Abort]);
    let planner = PlannerLoop::new(&provider, &tools, config(10_000)).with_gate(&gate);
    let mut session = session("forecast", 10_000);

    let report = planner.run(&mut session, None).await.unwrap();
    assert_eq!(report.status, SessionStatus::Aborted);
    assert_eq!(report.turns, 1);
    assert_eq!(tools.executions(), 0);
    assert_eq!(provider.proposals(), 1);
    assert_eq!(report.history.len(), 1);
    assert_eq!(report.history[0].kind, EntryKind::Proposed);
}

// ── Validation ─────────────────────────────────────────────────────

#[tokio::test]
async fn schema_violations_are_rejected() {
    let provider = ScriptedProvider::new(vec![
        Ok(Proposal::new(plan(vec![step("s1", "forecast", StepStatus::Pending)]))
            .with_action(action("weather.search", json!({"town": "Tokyo"})))),
        Ok(Proposal::new(plan(vec![step("s1", "forecast", StepStatus::Pending)]))
            .with_action(action("weather.search", json!(["Tokyo"])))),
        Ok(Proposal::new(plan(vec![step("s1", "forecast", StepStatus::Pending)]))
            .with_action(action("calc.search", json!({"city": "Tokyo"})))),
    ]);
    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(&provider, &tools, config(10_000));
    let mut session = session("forecast", 10_000);

    for _ in 0..3 {
        assert_eq!(
            planner.run_turn(&mut session).await.outcome,
            TurnOutcome::Rejected
        );
    }
    assert_eq!(tools.executions(), 0);
    assert_eq!(session.history().count(EntryKind::Rejected), 3);
    assert_eq!(session.status(), SessionStatus::Active);
}

#[tokio::test]
async fn out_of_range_confidence_is_rejected() {
    let mut overconfident = plan(vec![step("s1", "forecast", StepStatus::Pending)]);
    overconfident.confidence = 1.5;
    let provider = ScriptedProvider::new(vec![Ok(Proposal::new(overconfident)
        .with_action(action("weather.search", json!({"city": "Tokyo"}))))]);
    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(&provider, &tools, config(10_000));
    let mut session = session("forecast", 10_000);

    assert_eq!(
        planner.run_turn(&mut session).await.outcome,
        TurnOutcome::Rejected
    );
    assert!(session.plan().steps.is_empty());
    assert_eq!(tools.executions(), 0);
}

// ── Invariants ─────────────────────────────────────────────────────

#[tokio::test]
async fn done_steps_never_regress() {
    let provider = ScriptedProvider::new(vec![
        Ok(Proposal::new(plan(vec![
            step("s1", "forecast", StepStatus::Pending),
            step("s2", "decide", StepStatus::Pending),
        ]))
        .with_action(action("weather.search", json!({"city": "Tokyo"})).for_step("s1"))),
        Ok(Proposal::new(plan(vec![
            step("s1", "forecast", StepStatus::Pending),
            step("s2", "decide", StepStatus::InProgress),
        ]))),
    ]);
    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(&provider, &tools, config(10_000));
    let mut session = session("forecast then decide", 10_000);

    planner.run_turn(&mut session).await;
    assert_eq!(session.plan().step("s1").unwrap().status, StepStatus::Done);
    planner.run_turn(&mut session).await;
    assert_eq!(session.plan().step("s1").unwrap().status, StepStatus::Done);
    assert_eq!(
        session.plan().step("s2").unwrap().status,
        StepStatus::InProgress
    );
}

#[tokio::test]
async fn terminal_status_is_final() {
    let provider = ScriptedProvider::new(vec![
        Err(PlanningError::Provider("down".into())),
        Err(PlanningError::Timeout(Duration::from_secs(1))),
    ]);
    let tools = CountingRegistry::weather();
    let recorder = Recorder::default();
    let planner =
        PlannerLoop::new(&provider, &tools, config(10_000)).with_event_handler(&recorder);
    let mut session = session("anything", 10_000);

    let report = planner.run(&mut session, None).await.unwrap();
    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(provider.proposals(), 2);
    assert_eq!(session.budget().used_tokens(), 0);

    for _ in 0..3 {
        assert_eq!(
            planner.run_turn(&mut session).await.outcome,
            TurnOutcome::Halted
        );
    }
    assert_eq!(session.status(), SessionStatus::Failed);
    assert_eq!(provider.proposals(), 2);
    assert_eq!(
        *recorder.transitions.lock().unwrap(),
        vec![(SessionStatus::Active, SessionStatus::Failed)]
    );
}

#[tokio::test]
async fn slow_provider_counts_as_planning_failure() {
    struct Hanging;
    impl replan::provider::ReasoningProvider for Hanging {
        fn propose<'a>(
            &'a self,
            _request: replan::provider::ProposalRequest<'a>,
        ) -> replan::provider::ProviderFuture<'a, Proposal> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Err(PlanningError::Provider("unreachable".into()))
            })
        }

        fn summarize<'a>(
            &'a self,
            _request: replan::provider::SummaryRequest<'a>,
        ) -> replan::provider::ProviderFuture<'a, replan::provider::Summary> {
            Box::pin(async { Err(PlanningError::Provider("unused".into())) })
        }
    }

    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(
        &Hanging,
        &tools,
        config(10_000).with_provider_timeout(Duration::from_millis(10)),
    );
    let mut session = session("anything", 10_000);

    let report = planner.run_turn(&mut session).await;
    assert_eq!(report.outcome, TurnOutcome::PlanningFailed);
    assert_eq!(session.status(), SessionStatus::Failed);
    assert!(session.end_reason().unwrap().contains("timed out"));
}

#[tokio::test]
async fn turn_limit_ends_the_session() {
    let provider = ScriptedProvider::new(vec![idle(1), idle(1), idle(1)]);
    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(&provider, &tools, config(10_000).with_max_turns(2));
    let mut session = session("loop forever", 10_000);

    let report = planner.run(&mut session, None).await.unwrap();
    assert_eq!(report.status, SessionStatus::BudgetExceeded);
    assert_eq!(report.turns, 2);
    assert!(report.end_reason.unwrap().contains("turn limit"));
    assert_eq!(provider.proposals(), 2);
}

#[tokio::test]
async fn satisfied_goal_with_empty_plan_completes() {
    let provider = ScriptedProvider::new(vec![Ok(Proposal::new(plan(vec![]))
        .satisfied()
        .with_cost(5))]);
    let tools = CountingRegistry::weather();
    let planner = PlannerLoop::new(&provider, &tools, config(10_000));
    let mut session = session("nothing to do", 10_000);

    let report = planner.run_turn(&mut session).await;
    assert_eq!(report.outcome, TurnOutcome::NoAction);
    assert_eq!(session.status(), SessionStatus::Completed);
}

// ── Persistence ────────────────────────────────────────────────────

#[tokio::test]
async fn run_persists_every_turn_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path()).unwrap();
    let tools = CountingRegistry::weather();

    let provider = ScriptedProvider::new(vec![
        Ok(Proposal::new(plan(vec![
            step("s1", "forecast", StepStatus::Pending),
            step("s2", "decide", StepStatus::Pending),
        ]))
        .with_action(action("weather.search", json!({"city": "Tokyo"})).for_step("s1"))
        .with_cost(40)),
        idle(40),
    ]);
    let planner = PlannerLoop::new(&provider, &tools, config(10_000).with_max_turns(2));
    let mut original = session("forecast then decide", 10_000);
    planner
        .run(&mut original, Some(&store as &dyn SessionStore))
        .await
        .unwrap();
    assert_eq!(store.snapshot_count(original.id()).unwrap(), 2);

    let loaded = store.load(original.id()).unwrap().unwrap();
    assert_eq!(loaded.turn(), 2);
    assert_eq!(loaded.status(), SessionStatus::BudgetExceeded);
    assert_eq!(
        loaded.budget().used_tokens(),
        original.budget().used_tokens()
    );
    assert_eq!(loaded.history().len(), original.history().len());
    assert_eq!(loaded.state().context()["rain_chance"], json!(75));

    let manifests = store.list().unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].status, SessionStatus::BudgetExceeded);
}

#[tokio::test]
async fn resumed_session_continues_numbering() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path()).unwrap();
    let tools = CountingRegistry::weather();

    let mut session = session("think twice", 10_000);
    let first = ScriptedProvider::new(vec![idle(5)]);
    PlannerLoop::new(&first, &tools, config(10_000))
        .run_turn(&mut session)
        .await;
    store.save(&session).unwrap();
    let id = session.id().to_string();
    drop(session);

    let mut resumed = store.load(&id).unwrap().unwrap();
    let second = ScriptedProvider::new(vec![idle(5)]);
    let report = PlannerLoop::new(&second, &tools, config(10_000))
        .run_turn(&mut resumed)
        .await;
    assert_eq!(report.turn, 2);
    assert_eq!(resumed.history().len(), 2);
    assert_eq!(resumed.history().entries()[1].turn_index, 2);
    assert_eq!(resumed.budget().used_tokens(), 10);
}
