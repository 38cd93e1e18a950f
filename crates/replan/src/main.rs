//! Drive continuous-planning sessions from the terminal.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable and the
//! tool registry URL from `--registry-url` or `TOOL_REGISTRY_URL`.
//!
//! # Examples
//!
//! ```sh
//! # Plan toward a goal, approving each action on stdin
//! replan run --goal "Get weather for Tokyo and decide if I need an umbrella"
//!
//! # Unattended, against the in-process calculator registry
//! replan --builtin-tools --auto-approve run --goal "What is 17 * 23 + 4?"
//!
//! # Pick up where a session left off
//! replan resume sess-18c3f0a1b2c-0001
//!
//! # Inspect stored sessions and the tool catalog
//! replan sessions
//! replan show sess-18c3f0a1b2c-0001
//! replan tools --category weather
//! replan eval "price * qty > 100" --var price=12.5 --var qty=9
//! ```

use clap::{Parser, Subcommand};
use futures::future::BoxFuture;
use replan::agent::events::{
    CompositeEventHandler, FnEventHandler, LoggingHandler, PlannerEvent, SessionReport,
};
use replan::agent::gate::{ApprovalGate, ApprovalRequest, AutoApprove, Decision};
use replan::agent::{PlannerConfig, PlannerLoop};
use replan::api::RetryConfig;
use replan::provider::OpenRouterProvider;
use replan::session::store::DEFAULT_SNAPSHOT_RETENTION;
use replan::session::{FileSessionStore, Goal, Session, SessionStore};
use replan::tools::expr::{self, Literal};
use replan::tools::http::DEFAULT_REGISTRY_URL;
use replan::tools::{
    HttpToolRegistry, LocalToolRegistry, PageRequest, ToolRegistry, tools_summary,
};
use replan::{DEFAULT_MODEL, OpenRouterClient};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Continuous-planning agent: plan, approve, execute, update.
#[derive(Parser)]
#[command(name = "replan", version)]
struct Cli {
    // ── Tool registry ──────────────────────────────────────────
    /// Tool registry base URL (default: $TOOL_REGISTRY_URL or http://localhost:9999)
    #[arg(long, global = true)]
    registry_url: Option<String>,

    /// Use the in-process registry with the built-in calculator instead of HTTP
    #[arg(long, global = true)]
    builtin_tools: bool,

    // ── Provider ───────────────────────────────────────────────
    /// Model for planning and summarization calls
    #[arg(long, global = true, default_value = DEFAULT_MODEL)]
    model: String,

    /// Cheaper model for history summarization (defaults to --model)
    #[arg(long, global = true)]
    summary_model: Option<String>,

    /// Seconds to wait for each reasoning provider call
    #[arg(long, global = true, default_value_t = 120)]
    provider_timeout_secs: u64,

    /// Retries for a failed planning call before the session fails
    #[arg(long, global = true, default_value_t = 1)]
    planning_retries: u32,

    // ── Session limits ─────────────────────────────────────────
    /// Token budget for new sessions
    #[arg(long, global = true, default_value_t = replan::agent::config::DEFAULT_MAX_TOKENS)]
    max_tokens: u64,

    /// Maximum turns per session (0 = unlimited)
    #[arg(long, global = true, default_value_t = replan::agent::config::DEFAULT_MAX_TURNS)]
    max_turns: u32,

    /// Seconds to wait for each tool execution
    #[arg(long, global = true, default_value_t = 30)]
    tool_timeout_secs: u64,

    /// Approve every proposed action without prompting
    #[arg(long, global = true)]
    auto_approve: bool,

    /// Disable history summarization
    #[arg(long, global = true)]
    no_summarize: bool,

    /// Directory holding persisted sessions
    #[arg(long, global = true, default_value = ".replan/sessions")]
    sessions_dir: String,

    /// Turn snapshots kept per session (0 = keep all)
    #[arg(long, global = true, default_value_t = DEFAULT_SNAPSHOT_RETENTION)]
    keep_snapshots: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new session for a goal and run it to completion
    Run {
        /// The goal, in natural language
        #[arg(long)]
        goal: String,
    },
    /// Continue a stored session
    Resume { id: String },
    /// List stored sessions, newest first
    Sessions,
    /// Print a stored session as JSON
    Show { id: String },
    /// Delete a stored session
    Delete { id: String },
    /// Browse the tool registry catalog
    Tools {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },
    /// Evaluate an expression with the sandboxed evaluator
    Eval {
        expr: String,
        /// Variable binding, `name=json` (repeatable)
        #[arg(long = "var")]
        vars: Vec<String>,
    },
}

// ── Approval on stdin ──────────────────────────────────────────────

/// Prompts on stderr and reads the decision from stdin. EOF aborts.
struct StdinGate;

fn parse_decision(line: &str) -> Option<Decision> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let feedback = rest.trim();
    match word.to_ascii_lowercase().as_str() {
        "a" | "approve" | "y" | "yes" => Some(Decision::Approve),
        "s" | "skip" | "n" | "no" if feedback.is_empty() => Some(Decision::skip()),
        "s" | "skip" | "n" | "no" => Some(Decision::skip_with(feedback)),
        "x" | "abort" | "q" | "quit" => Some(Decision::Abort),
        _ => None,
    }
}

impl ApprovalGate for StdinGate {
    fn decide<'a>(&'a self, request: ApprovalRequest<'a>) -> BoxFuture<'a, Decision> {
        eprintln!();
        eprintln!("  [turn {}] proposed: {}", request.turn, request.action);
        eprintln!("  confidence {:.2}", request.confidence);
        if !request.reasoning.is_empty() {
            eprintln!("  reasoning: {}", request.reasoning);
        }
        Box::pin(async {
            tokio::task::spawn_blocking(|| {
                let stdin = io::stdin();
                loop {
                    eprint!("  [a]pprove / [s]kip [feedback] / abort (x): ");
                    let _ = io::stderr().flush();
                    let mut line = String::new();
                    match stdin.lock().read_line(&mut line) {
                        Ok(0) | Err(_) => return Decision::Abort,
                        Ok(_) => {}
                    }
                    if let Some(decision) = parse_decision(&line) {
                        return decision;
                    }
                    if !line.trim().is_empty() {
                        eprintln!("  unrecognized answer: {}", line.trim());
                    }
                }
            })
            .await
            .unwrap_or(Decision::Abort)
        })
    }
}

// ── Wiring ─────────────────────────────────────────────────────────

fn build_registry(cli: &Cli) -> Result<Arc<dyn ToolRegistry>, String> {
    if cli.builtin_tools {
        return Ok(Arc::new(LocalToolRegistry::new().with_calculator()));
    }
    let url = cli
        .registry_url
        .clone()
        .or_else(|| std::env::var("TOOL_REGISTRY_URL").ok())
        .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string());
    Ok(Arc::new(HttpToolRegistry::new(url)?))
}

fn build_config(cli: &Cli) -> Result<PlannerConfig, String> {
    let mut config = PlannerConfig::new(cli.max_tokens)
        .with_provider_timeout(Duration::from_secs(cli.provider_timeout_secs))
        .with_tool_timeout(Duration::from_secs(cli.tool_timeout_secs))
        .with_planning_retry(RetryConfig::with_retries(cli.planning_retries));
    config = match cli.max_turns {
        0 => config.without_turn_limit(),
        n => config.with_max_turns(n),
    };
    if cli.no_summarize {
        config.summarizer.enabled = false;
    }
    if let Some(model) = &cli.summary_model {
        config.summarizer.config.model = Some(model.clone());
    }
    Ok(config)
}

fn open_store(cli: &Cli) -> Result<FileSessionStore, String> {
    let store = FileSessionStore::new(&cli.sessions_dir).map_err(|e| e.to_string())?;
    Ok(match cli.keep_snapshots {
        0 => store.keep_all_snapshots(),
        n => store.with_retention(n),
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| format!("failed to format: {e}"))?;
    println!("{text}");
    Ok(())
}

async fn drive(cli: &Cli, mut session: Session, store: &FileSessionStore) -> Result<(), String> {
    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "OPENROUTER_KEY environment variable is not set".to_string())?;
    let client = OpenRouterClient::new(api_key)?;
    let tools = build_registry(cli)?;
    let config = build_config(cli)?;
    let provider = OpenRouterProvider::new(client, tools.clone())
        .with_model(cli.model.clone())
        .with_summarizer(config.summarizer.config.clone());

    let progress = FnEventHandler::new(|event: &PlannerEvent<'_>| match event {
        PlannerEvent::TurnStart { turn, budget, .. } => {
            eprintln!("  [turn {turn}] {}", budget.to_log_string());
        }
        PlannerEvent::ToolResult { tool, outcome, .. } => match outcome {
            Ok(payload) => eprintln!("  [{tool}] {payload}"),
            Err(e) => eprintln!("  [{tool}] failed: {e}"),
        },
        PlannerEvent::ProposalRejected { error, .. } => eprintln!("  [rejected] {error}"),
        _ => {}
    });
    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(progress);

    let gate: &dyn ApprovalGate = if cli.auto_approve {
        &AutoApprove
    } else {
        &StdinGate
    };

    let report: SessionReport = PlannerLoop::try_new(&provider, tools.as_ref(), config)
        .map_err(|e| format!("invalid configuration: {e}"))?
        .with_gate(gate)
        .with_event_handler(&handler)
        .run(&mut session, Some(store as &dyn SessionStore))
        .await
        .map_err(|e| e.to_string())?;

    eprintln!(
        "  Session {} ended {} after {} turn(s): {}",
        report.session_id,
        report.status,
        report.turns,
        report.end_reason.as_deref().unwrap_or("-")
    );
    print_json(&report)
}

async fn dispatch(cli: &Cli) -> Result<(), String> {
    match &cli.command {
        Command::Run { goal } => {
            let store = open_store(cli)?;
            let session = build_config(cli)?.new_session(Goal::new(goal.as_str()));
            eprintln!("  Created session {}", session.id());
            drive(cli, session, &store).await
        }
        Command::Resume { id } => {
            let store = open_store(cli)?;
            let session = store
                .load(id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("session {id} not found"))?;
            if !session.is_active() {
                eprintln!("  Session {id} already ended: {}", session.status());
                return print_json(&SessionReport::of(&session));
            }
            drive(cli, session, &store).await
        }
        Command::Sessions => {
            let store = open_store(cli)?;
            let manifests = store.list().map_err(|e| e.to_string())?;
            if manifests.is_empty() {
                println!("no sessions in {}", cli.sessions_dir);
            }
            for m in manifests {
                println!(
                    "{}  {:<15} turn {:>3}  {:>7}/{:<7}  {}",
                    m.id, m.status, m.turn, m.used_tokens, m.max_tokens, m.goal_preview
                );
            }
            Ok(())
        }
        Command::Show { id } => {
            let store = open_store(cli)?;
            let session = store
                .load(id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("session {id} not found"))?;
            print_json(&session)
        }
        Command::Delete { id } => {
            let store = open_store(cli)?;
            if store.delete(id).map_err(|e| e.to_string())? {
                println!("deleted {id}");
                Ok(())
            } else {
                Err(format!("session {id} not found"))
            }
        }
        Command::Tools { category, search } => {
            let registry = build_registry(cli)?;
            let page = match (category, search) {
                (Some(c), _) => Some(registry.list_by_category(c, PageRequest::all()).await),
                (None, Some(q)) => Some(registry.search(q, PageRequest::all()).await),
                (None, None) => None,
            };
            match page {
                Some(page) => {
                    for spec in page.map_err(|e| e.to_string())?.items {
                        println!("{}", spec.summary_line());
                    }
                }
                None => print!(
                    "{}",
                    tools_summary(registry.as_ref()).await.map_err(|e| e.to_string())?
                ),
            }
            Ok(())
        }
        Command::Eval { expr: source, vars } => {
            let mut variables = BTreeMap::new();
            for binding in vars {
                let (name, raw) = binding
                    .split_once('=')
                    .ok_or_else(|| format!("expected name=value, got '{binding}'"))?;
                let json: serde_json::Value = serde_json::from_str(raw)
                    .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
                let literal = Literal::from_json(&json)
                    .ok_or_else(|| format!("unsupported value for '{name}': {raw}"))?;
                variables.insert(name.to_string(), literal);
            }
            let value = expr::evaluate(source, &variables).map_err(|e| e.to_string())?;
            println!("{value}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = dispatch(&cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
