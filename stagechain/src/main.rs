//! Stagechain CLI
//!
//! Runs the cluster module scenarios and cleans up kept resources.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use stagechain::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Multi-stage Terraform end-to-end scenarios
#[derive(Parser, Debug)]
#[command(name = "stagechain", version)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "STAGECHAIN_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(flatten)]
    config: RunConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run scenarios in parallel (all of them by default)
    Run {
        /// Scenario to run, repeatable
        #[arg(short = 's', long = "scenario")]
        scenarios: Vec<ScenarioKind>,

        /// Write every report as JSON to this file
        #[arg(long)]
        report_json: Option<PathBuf>,

        /// Fail the run when a teardown step leaks resources
        #[arg(long)]
        strict_teardown: bool,
    },

    /// List the scenario catalog
    List,

    /// Destroy the kept resources of a scenario
    Destroy {
        /// Scenario whose resources to destroy
        #[arg(short = 's', long = "scenario")]
        scenario: ScenarioKind,

        /// Suffix the resources were created with
        #[arg(long)]
        suffix: String,
    },

    /// Print one output of a kept stage
    Output {
        /// Scenario the stage belongs to
        #[arg(short = 's', long = "scenario")]
        scenario: ScenarioKind,

        /// Suffix the resources were created with
        #[arg(long)]
        suffix: String,

        /// Stage name
        #[arg(long)]
        stage: String,

        /// Output name
        name: String,
    },
}

fn build_runner(config: &RunConfig) -> ScenarioRunner {
    let events: Arc<dyn EventSink> = Arc::new(LoggingEventSink::debug());
    let validator = ValidationDispatcher::new(
        Arc::new(config.ssh_probe()),
        Arc::new(config.service_probe()),
        events.clone(),
    );
    ScenarioRunner::new(
        Arc::new(config.provisioner()),
        Arc::new(config.workspace()),
        validator,
    )
    .with_events(events)
}

fn interrupt_token() -> Arc<CancellationToken> {
    let token = Arc::new(CancellationToken::new());
    token.on_cancel(|reason| warn!(%reason, "finishing current stage then tearing down"));

    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel("interrupted");
        }
    });
    token
}

async fn run_scenarios(
    config: &RunConfig,
    kinds: Vec<ScenarioKind>,
    report_json: Option<PathBuf>,
    strict_teardown: bool,
) -> Result<bool> {
    let kinds = if kinds.is_empty() { ScenarioKind::ALL.to_vec() } else { kinds };
    let ctx = config.assembly_context()?;

    let mut reports = Vec::new();
    let mut scenarios = Vec::with_capacity(kinds.len());
    for kind in kinds {
        match assemble_or_reject(kind, &config.suffix_for(kind), &ctx) {
            Ok(scenario) => scenarios.push(scenario),
            Err(rejected) => reports.push(rejected),
        }
    }

    let runner = Arc::new(build_runner(config).with_cancellation(interrupt_token()));
    let mut set = JoinSet::new();
    for scenario in scenarios {
        let runner = runner.clone();
        set.spawn(async move { runner.run(&scenario).await });
    }

    let mut crashed = 0usize;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(error = %e, "scenario task failed");
                crashed += 1;
            }
        }
    }
    reports.sort_by(|a, b| a.scenario.cmp(&b.scenario));

    for report in &reports {
        println!("{}", report.summary());
    }

    if let Some(path) = report_json {
        let json = serde_json::to_string_pretty(&reports)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    let passed = crashed == 0
        && reports
            .iter()
            .all(|r| r.is_success() && !(strict_teardown && r.has_leaks()));
    Ok(passed)
}

fn list_scenarios() {
    for kind in ScenarioKind::ALL {
        let policy = kind.name_policy();
        println!(
            "{:<18} region={:<14} cluster={}<{} chars>",
            kind.name(),
            kind.region(),
            policy.prefix,
            policy.suffix_len
        );
    }
}

async fn destroy_scenario(config: &RunConfig, kind: ScenarioKind, suffix: &str) -> Result<bool> {
    let scenario = assemble(kind, suffix, &config.assembly_context()?)?;
    let outcomes = build_runner(config).destroy_existing(&scenario).await;

    if outcomes.is_empty() {
        warn!(scenario = %kind, suffix, "no working copies found, nothing destroyed");
    }
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => println!("destroyed {}", outcome.name),
            Err(reason) => println!("FAILED to destroy {}: {reason}", outcome.name),
        }
    }
    Ok(outcomes.iter().all(TeardownOutcome::is_success))
}

async fn print_output(
    config: &RunConfig,
    kind: ScenarioKind,
    suffix: &str,
    stage: &str,
    name: &str,
) -> Result<()> {
    let scenario = assemble(kind, suffix, &config.assembly_context()?)?;
    match build_runner(config).read_output(&scenario, stage, name).await? {
        Some(value) => println!("{value}"),
        None => bail!("output '{stage}.{name}' is not set"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let passed = match cli.command {
        Command::Run {
            scenarios,
            report_json,
            strict_teardown,
        } => run_scenarios(&cli.config, scenarios, report_json, strict_teardown).await?,
        Command::List => {
            list_scenarios();
            true
        }
        Command::Destroy { scenario, suffix } => {
            destroy_scenario(&cli.config, scenario, &suffix).await?
        }
        Command::Output {
            scenario,
            suffix,
            stage,
            name,
        } => {
            print_output(&cli.config, scenario, &suffix, &stage, &name).await?;
            true
        }
    };

    Ok(if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
