//! `rro` - inspect and exercise the recovery core from the command line

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use rro_backpressure::BackpressureGovernor;
use rro_core::{
    GoalRecord, InMemoryTaskStore, RecoveryConfig, RecoveryStrategy, TaskRecord, TaskStatus,
    TaskStore, WorkspaceId,
};
use rro_orchestrator::{
    RecoveryExecutor, RecoveryOrchestrator, RecoveryOutcome, LAST_ERROR_KEY, LAST_ERROR_TYPE_KEY,
};
use rro_policy::{BackoffCalculator, FailureClassifier, HttpAdvisor, PolicyEngine};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Failures cycled through by `simulate`
const SIMULATED_FAILURES: [(&str, Option<&str>); 6] = [
    ("HTTP 429 Too Many Requests", None),
    ("connection reset by peer", None),
    ("ImportError: No module named 'pandas'", Some("ImportError")),
    ("KeyError: 'invoice_id'", None),
    ("agent lacks required skill: sql", None),
    ("orchestration_context: field required", None),
];

fn cli() -> Command {
    Command::new("rro")
        .version(rro_core::VERSION)
        .about("Resilience & Recovery Orchestration core")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .env("RRO_CONFIG")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("analyze")
                .about("Analyse one failure against an in-memory task")
                .arg(
                    Arg::new("error")
                        .long("error")
                        .short('e')
                        .required(true)
                        .help("Error message of the failed attempt"),
                )
                .arg(Arg::new("error-type").long("error-type").help("Error type name"))
                .arg(
                    Arg::new("task-name")
                        .long("task-name")
                        .default_value("ad-hoc task")
                        .help("Name of the failed task"),
                )
                .arg(
                    Arg::new("attempts")
                        .long("attempts")
                        .default_value("0")
                        .value_parser(value_parser!(u32))
                        .help("Failed attempts already made"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("backoff")
                .about("Print the delay schedule of a strategy")
                .arg(
                    Arg::new("strategy")
                        .long("strategy")
                        .short('s')
                        .default_value("exponential_backoff")
                        .help("Strategy name"),
                )
                .arg(
                    Arg::new("attempts")
                        .long("attempts")
                        .default_value("8")
                        .value_parser(value_parser!(u32))
                        .help("Number of attempts to show"),
                ),
        )
        .subcommand(Command::new("patterns").about("List the failure pattern catalog"))
        .subcommand(Command::new("config").about("Print the effective configuration as TOML"))
        .subcommand(
            Command::new("simulate")
                .about("Drive failing tasks through analysis and execution")
                .arg(
                    Arg::new("tasks")
                        .long("tasks")
                        .default_value("24")
                        .value_parser(value_parser!(usize))
                        .help("Number of failing tasks"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output statistics as JSON"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let config = load_config(matches.get_one::<PathBuf>("config"))?;

    match matches.subcommand() {
        Some(("analyze", args)) => analyze(config, args).await,
        Some(("backoff", args)) => backoff(&config, args),
        Some(("patterns", _)) => {
            patterns();
            Ok(())
        }
        Some(("config", _)) => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Some(("simulate", args)) => simulate(config, args).await,
        _ => Ok(()),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<RecoveryConfig> {
    let config = match path {
        Some(path) => RecoveryConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RecoveryConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_orchestrator(config: RecoveryConfig, store: Arc<dyn TaskStore>) -> RecoveryOrchestrator {
    if !config.advisor.enabled {
        return RecoveryOrchestrator::new(config, store);
    }
    let advisor = HttpAdvisor::from_config(&config.advisor);
    if !advisor.is_configured() {
        tracing::warn!(
            env = %config.advisor.api_key_env,
            "advisor enabled without an API key, heuristics will be used"
        );
    }
    let policy = PolicyEngine::new(&config).with_advisor(Arc::new(advisor));
    RecoveryOrchestrator::new(config, store).with_policy_engine(policy)
}

async fn analyze(config: RecoveryConfig, args: &ArgMatches) -> Result<()> {
    let error = args
        .get_one::<String>("error")
        .context("--error is required")?;
    let error_type = args.get_one::<String>("error-type").map(String::as_str);
    let task_name = args
        .get_one::<String>("task-name")
        .map_or("ad-hoc task", String::as_str);
    let attempts = args.get_one::<u32>("attempts").copied().unwrap_or(0);

    let task = TaskRecord::new("cli-task", "cli-workspace", task_name)
        .with_status(TaskStatus::Failed)
        .with_retry_count(attempts);
    let store = Arc::new(InMemoryTaskStore::with_tasks([task.clone()]));
    let orchestrator = build_orchestrator(config, store);

    let (proceed, result) = orchestrator
        .should_attempt_recovery(
            &task.id,
            &task.workspace_id,
            error,
            error_type,
            Some(task_name),
        )
        .await;

    if args.get_flag("json") {
        let body = serde_json::json!({ "should_recover": proceed, "analysis": result });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("Should recover: {proceed}");
    match result {
        Some(result) => {
            println!("  Decision:   {}", result.decision);
            println!("  Strategy:   {}", result.strategy);
            println!("  Confidence: {:.2}", result.confidence_score);
            println!("  Delay:      {}s", result.recommended_delay_seconds);
            println!("  Budget:     {} retries", result.max_retries);
            println!(
                "  Pattern:    {}",
                result.pattern_id.as_deref().unwrap_or("-")
            );
            println!("  AI used:    {}", result.ai_used);
            println!("  Reasoning:  {}", result.reasoning);
        }
        None => println!(
            "  Attempt cap of {} reached, no analysis run",
            orchestrator.config().max_attempts
        ),
    }
    Ok(())
}

fn backoff(config: &RecoveryConfig, args: &ArgMatches) -> Result<()> {
    let name = args
        .get_one::<String>("strategy")
        .context("--strategy is required")?;
    let strategy: RecoveryStrategy = match name.parse() {
        Ok(strategy) => strategy,
        Err(err) => bail!("{err}; expected one of {}", RecoveryStrategy::names()),
    };
    let attempts = args.get_one::<u32>("attempts").copied().unwrap_or(8);

    let calculator = BackoffCalculator::new(config.backoff);
    println!("{strategy} (budget {} retries)", strategy.max_retries());
    println!("  attempt  delay");
    for (i, delay) in calculator.schedule(strategy, attempts).iter().enumerate() {
        println!("  {:>7}  {delay}s", i + 1);
    }
    Ok(())
}

fn patterns() {
    let classifier = FailureClassifier::new();
    for pattern in classifier.patterns() {
        println!("{}", pattern.pattern_id);
        println!("  {}", pattern.description);
        println!(
            "  strategy {} at {:.2}, budget {}",
            pattern.default_strategy,
            pattern.default_confidence,
            pattern.retry_budget()
        );
    }
}

async fn simulate(config: RecoveryConfig, args: &ArgMatches) -> Result<()> {
    let count = args.get_one::<usize>("tasks").copied().unwrap_or(24);
    let workspace = WorkspaceId::from("sim-workspace");
    let goal = GoalRecord::new("sim-goal", workspace.clone(), "simulated goal")
        .created_at(Utc::now() - Duration::days(1));

    let store = Arc::new(InMemoryTaskStore::new());
    for i in 0..count {
        let (message, error_type) = SIMULATED_FAILURES[i % SIMULATED_FAILURES.len()];
        let mut task = TaskRecord::new(format!("sim-{i}"), workspace.clone(), format!("step {i}"))
            .with_goal(goal.id.clone())
            .with_agent(format!("agent-{}", i % 3))
            .with_status(TaskStatus::Failed);
        task.metadata.insert(LAST_ERROR_KEY.into(), message.into());
        if let Some(error_type) = error_type {
            task.metadata.insert(LAST_ERROR_TYPE_KEY.into(), error_type.into());
        }
        store.upsert(task);
    }

    let rounds = config.max_attempts + 2;
    let executor = RecoveryExecutor::new(&config, store.clone());
    let governor = BackpressureGovernor::new(config.backpressure.clone(), store.clone());
    let orchestrator = build_orchestrator(config, store.clone());

    let mut outcomes: BTreeMap<&'static str, usize> = BTreeMap::new();
    for round in 1..=rounds {
        let report = executor.recover_workspace(&orchestrator, &workspace).await?;
        if report.total == 0 {
            break;
        }
        tracing::info!(round, total = report.total, status = %report.status, "simulation round");
        for (_, outcome) in &report.outcomes {
            *outcomes.entry(outcome_label(outcome)).or_default() += 1;
        }
        fail_again(&store, &workspace).await?;
    }

    let stats = orchestrator.get_recovery_stats();
    let tasks = store.list_workspace_tasks(&workspace).await?;
    let decision = governor.should_validate(&workspace, &goal, Some(&tasks)).await;

    if args.get_flag("json") {
        let body = serde_json::json!({
            "outcomes": outcomes,
            "stats": stats,
            "backpressure": decision,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("Simulated {count} failing tasks");
    println!();
    println!("Outcomes:");
    for (label, n) in &outcomes {
        println!("  {label:<26} {n}");
    }
    println!();
    println!("Recovery stats:");
    println!("  Analyses:       {}", stats.total_analyses);
    println!("  Avg confidence: {:.2}", stats.average_confidence);
    println!("  Escalation:     {:.1}%", stats.escalation_rate * 100.0);
    println!("  AI usage:       {:.1}%", stats.ai_usage_percentage);
    for (strategy, n) in &stats.strategy_distribution {
        println!("    {strategy:<24} {n}");
    }
    println!();
    println!(
        "Backpressure: proceed={} ({})",
        decision.should_proceed, decision.reason
    );
    Ok(())
}

/// Requeued tasks fail again; subtasks created by decomposition succeed
async fn fail_again(store: &InMemoryTaskStore, workspace: &WorkspaceId) -> Result<()> {
    for mut task in store.list_workspace_tasks(workspace).await? {
        if task.status != TaskStatus::Pending {
            continue;
        }
        if task.parent_id.is_some() {
            task.status = TaskStatus::Completed;
            task.completion_percentage = Some(100);
            task.completed_at = Some(Utc::now());
        } else {
            task.status = TaskStatus::Failed;
        }
        store.upsert(task);
    }
    Ok(())
}

fn outcome_label(outcome: &RecoveryOutcome) -> &'static str {
    match outcome {
        RecoveryOutcome::RequeuedForRetry { .. } => "requeued_for_retry",
        RecoveryOutcome::RequeuedWithNewAgent { .. } => "requeued_with_new_agent",
        RecoveryOutcome::SplitIntoSubtasks { .. } => "split_into_subtasks",
        RecoveryOutcome::CompletedWithFallback { .. } => "completed_with_fallback",
        RecoveryOutcome::CompletedWithFinalFallback { .. } => "completed_with_final_fallback",
        RecoveryOutcome::Escalated => "escalated",
    }
}
