//! Subcommand implementations.
//!
//! Each command writes its result to stdout and returns the process exit
//! code; errors that prevent a result bubble up as `anyhow::Error`.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use strata_core::RunId;
use strata_engine::{Engine, EventSubscriber, RunReport};
use strata_execution::{ExecutionPlan, RunStatus};
use strata_workflow::{WorkflowDefinition, collect_validation_errors};

use crate::cli::{Cli, Command, RunArgs};
use crate::{TRACING_TARGET_RUN, config, plugins};

/// Everything succeeded.
pub const EXIT_OK: i32 = 0;
/// The graph is invalid or the run did not complete.
pub const EXIT_FAILED: i32 = 2;

/// Dispatch the parsed command line.
pub async fn execute(cli: Cli) -> anyhow::Result<i32> {
    match &cli.command {
        Command::Validate { graph } => validate(graph),
        Command::Plan { graph } => plan(graph),
        Command::Run(args) => run(cli.config.as_deref(), args).await,
        Command::Demo => demo(),
        Command::Plugins => list_plugins(),
    }
}

fn load_graph(path: &Path) -> anyhow::Result<WorkflowDefinition> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn validate(path: &Path) -> anyhow::Result<i32> {
    let workflow = load_graph(path)?;
    let mut problems = collect_validation_errors(&workflow);
    if problems.is_empty() {
        problems = plugins::registry()?.contract_violations(&workflow);
    }
    if problems.is_empty() {
        println!(
            "{}: valid ({} nodes, {} connections)",
            workflow.name,
            workflow.nodes.len(),
            workflow.connections.len()
        );
        return Ok(EXIT_OK);
    }

    println!("{}: {} problem(s)", workflow.name, problems.len());
    for problem in &problems {
        println!("  - {problem}");
    }
    Ok(EXIT_FAILED)
}

fn plan(path: &Path) -> anyhow::Result<i32> {
    let workflow = load_graph(path)?;
    let plan = ExecutionPlan::from_workflow(RunId::v4(), &workflow).context("cannot plan workflow")?;
    print_json(&plan)?;
    Ok(EXIT_OK)
}

async fn run(config_file: Option<&Path>, args: &RunArgs) -> anyhow::Result<i32> {
    let workflow = load_graph(&args.graph)?;
    let run_config = config::load(config_file, args)?;
    let engine = Engine::new(plugins::registry()?);

    let (run_id, events) = engine.submit_and_subscribe(workflow, run_config)?;
    tracing::info!(target: TRACING_TARGET_RUN, %run_id, "run submitted");

    let printer = args.events.then(|| tokio::spawn(stream_events(events)));
    let report = tokio::select! {
        report = engine.wait(run_id) => report?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            tracing::warn!(target: TRACING_TARGET_RUN, %run_id, "interrupted, cancelling run");
            if let Err(error) = engine.cancel(run_id) {
                tracing::debug!(target: TRACING_TARGET_RUN, %error, "cancel not delivered");
            }
            engine.wait(run_id).await?
        }
    };
    if let Some(printer) = printer {
        printer.await.context("event printer panicked")??;
    }

    summarize(&report);
    print_json(&report)?;
    Ok(if report.status == RunStatus::Completed {
        EXIT_OK
    } else {
        EXIT_FAILED
    })
}

async fn stream_events(mut events: EventSubscriber) -> anyhow::Result<()> {
    while let Some(event) = events.recv().await {
        let line = serde_json::to_string(&event)?;
        eprintln!("{line}");
        if event.is_final() {
            break;
        }
    }
    Ok(())
}

fn summarize(report: &RunReport) {
    let errors = report.snapshot.errors.len();
    tracing::info!(
        target: TRACING_TARGET_RUN,
        run_id = %report.run_id,
        status = %report.status,
        duration_ms = report.duration.as_millis(),
        peak_running = report.peak_running,
        retries = report.snapshot.total_retries,
        errors,
        "run finished"
    );
}

fn demo() -> anyhow::Result<i32> {
    let registry = plugins::registry()?;
    print_json(&plugins::demo_workflow(&registry)?)?;
    Ok(EXIT_OK)
}

fn list_plugins() -> anyhow::Result<i32> {
    let registry = plugins::registry()?;
    for desc in registry.descriptors() {
        let ports = |ports: &[strata_workflow::PortSchema]| {
            ports
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!(
            "{:<12} in: [{}] out: [{}]  {}",
            desc.type_tag.as_str(),
            ports(&desc.inputs),
            ports(&desc.outputs),
            desc.description.as_deref().unwrap_or_default()
        );
    }
    Ok(EXIT_OK)
}
