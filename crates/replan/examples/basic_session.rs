//! Minimal session example: one goal, the built-in calculator, auto-approve.
//!
//! Runs turns until the model declares the goal satisfied or the budget runs
//! out, then prints the final plan and what the agent learned.
//!
//! # Usage
//!
//! ```bash
//! OPENROUTER_KEY=sk-... cargo run --example basic_session
//! ```

use replan::prelude::*;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
        .with_writer(std::io::stderr)
        .init();

    // 1. Create the OpenRouter client.
    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "Set OPENROUTER_KEY env var to your OpenRouter API key")?;
    let client = OpenRouterClient::new(api_key)?;

    // 2. Tools the planner may propose.
    let tools: Arc<dyn ToolRegistry> = Arc::new(LocalToolRegistry::new().with_calculator());

    // 3. Provider and planner.
    let provider = OpenRouterProvider::new(client, tools.clone());
    let config = PlannerConfig::new(20_000).with_max_turns(8);
    let planner = PlannerLoop::try_new(&provider, tools.as_ref(), config)
        .map_err(|e| e.to_string())?
        .with_event_handler(&LoggingHandler);

    // 4. Drive the session to a terminal status.
    let mut session = planner.config().new_session(Goal::new(
        "Compute 17 * 23, then check whether the result is above 400.",
    ));
    let report = planner
        .run(&mut session, None)
        .await
        .map_err(|e| e.to_string())?;

    // 5. Print results.
    for step in &report.plan.steps {
        println!("[{}] {} {}", step.status, step.id, step.description);
    }
    println!("\n{}", report.state.summary());
    println!(
        "\n--- {} | {} turns | {}/{} tokens ---",
        report.status, report.turns, report.used_tokens, report.max_tokens
    );

    Ok(())
}
