//! Custom tools example: serve domain functions from an in-process registry.
//!
//! Demonstrates:
//! - Typed parameter structs with `LocalFunction::typed`
//! - Declaring parameters with `FunctionSpec::param`
//! - A closure gate that skips actions outside an allow-list
//! - Event handling with `CompositeEventHandler`
//! - Persisting turn snapshots with `FileSessionStore`
//!
//! # Usage
//!
//! ```bash
//! OPENROUTER_KEY=sk-... cargo run --example custom_tools
//! ```

use replan::agent::ApprovalRequest;
use replan::prelude::*;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

// ── Typed parameter structs ─────────────────────────────────────────

#[derive(Deserialize)]
struct ConvertArgs {
    value: f64,
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct LookupArgs {
    city: String,
}

// ── Functions ───────────────────────────────────────────────────────

fn convert_units() -> LocalFunction {
    let spec = FunctionSpec::new("units", "convert", "Convert a temperature between C and F")
        .param("value", ParamSpec::required("float"))
        .param("from", ParamSpec::required("str"))
        .param("to", ParamSpec::required("str"));

    LocalFunction::typed(spec, |args: ConvertArgs| async move {
        let converted = match (args.from.as_str(), args.to.as_str()) {
            ("C", "F") => args.value * 9.0 / 5.0 + 32.0,
            ("F", "C") => (args.value - 32.0) * 5.0 / 9.0,
            (a, b) if a == b => args.value,
            (a, b) => return Err(format!("cannot convert {a} to {b}")),
        };
        Ok(json!({"value": converted, "unit": args.to}))
    })
}

/// A stand-in for a real forecast service.
fn lookup_forecast() -> LocalFunction {
    let spec = FunctionSpec::new("weather", "forecast", "Tomorrow's forecast for a city")
        .param("city", ParamSpec::required("str"));

    LocalFunction::typed(spec, |args: LookupArgs| async move {
        Ok(json!({"city": args.city, "high_c": 21.5, "rain_chance": 40}))
    })
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "Set OPENROUTER_KEY env var to your OpenRouter API key")?;
    let client = OpenRouterClient::new(api_key)?;

    let tools: Arc<dyn ToolRegistry> = Arc::new(
        LocalToolRegistry::new()
            .with(convert_units())
            .with(lookup_forecast())
            .with_calculator(),
    );
    let provider = OpenRouterProvider::new(client, tools.clone());

    // Only weather and unit lookups run unattended; anything else is skipped
    // with feedback the model sees next turn.
    let gate = FnGate::new(|request: &ApprovalRequest<'_>| {
        match request.action.tool.category.as_str() {
            "weather" | "units" => Decision::Approve,
            other => Decision::skip_with(format!("{other} tools are disabled in this demo")),
        }
    });

    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(FnEventHandler::new(|event: &PlannerEvent<'_>| {
            if let PlannerEvent::StatusChanged { to, reason, .. } = event {
                println!("session {to}: {reason}");
            }
        }));

    let store = FileSessionStore::new(".replan/demo-sessions").map_err(|e| e.to_string())?;
    let planner = PlannerLoop::new(&provider, tools.as_ref(), PlannerConfig::new(30_000))
        .with_gate(&gate)
        .with_event_handler(&handler);

    let mut session = planner.config().new_session(Goal::new(
        "Get tomorrow's high for Oslo in Fahrenheit and say whether to pack a jacket.",
    ));
    let report = planner
        .run(&mut session, Some(&store as &dyn SessionStore))
        .await
        .map_err(|e| e.to_string())?;

    println!("\n{}", report.state.summary());
    println!(
        "\n--- {} turns | {} tokens | saved under {} ---",
        report.turns,
        report.used_tokens,
        store.dir().display()
    );
    Ok(())
}
