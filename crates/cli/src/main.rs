use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map as JsonMap, Value};
use tg_engine::stage::depth;
use tg_engine::{Gateway, Plan, iter_parent_stages, parse_plan_file};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Materialize and execute query gateway plans.
#[derive(Parser, Debug)]
#[command(name = "tg", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the plan and print its stages grouped by parent
    Plan {
        /// Plan document (YAML or JSON)
        file: PathBuf,

        /// Log every materialized stage
        #[arg(long)]
        verbose: bool,
    },
    /// Build and execute the plan, printing the assembled result
    Run {
        /// Plan document (YAML or JSON)
        file: PathBuf,

        /// Log every materialized stage
        #[arg(long)]
        verbose: bool,

        /// JSON object overriding the document variables
        #[arg(long)]
        variables: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    match Args::parse().command {
        Command::Plan { file, verbose } => plan_cmd(file, verbose),
        Command::Run { file, verbose, variables } => run_cmd(file, verbose, variables.as_deref()).await,
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn plan_cmd(file: PathBuf, verbose: bool) -> Result<()> {
    let document = parse_plan_file(&file)?;
    let prepared = Gateway::new()
        .verbose(verbose)
        .prepare(&document)
        .with_context(|| format!("Failed to build plan from {}", file.display()))?;
    print!("{}", render_plan(prepared.plan()));
    prepared.release();
    Ok(())
}

async fn run_cmd(file: PathBuf, verbose: bool, variables: Option<&str>) -> Result<()> {
    let document = parse_plan_file(&file)?;
    let overrides = parse_variables(variables)?;
    let prepared = Gateway::new()
        .verbose(verbose)
        .prepare(&document)
        .with_context(|| format!("Failed to build plan from {}", file.display()))?;

    let cancellation = CancellationToken::new();
    let ctrl_c_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            ctrl_c_token.cancel();
        }
    });

    let report = prepared.execute(&overrides, cancellation).await;
    prepared.release();
    let report = report?;

    println!("{}", serde_json::to_string_pretty(&report.data)?);
    let summary = report.summary();
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        "run finished"
    );
    for failure in report.failures() {
        eprintln!("stage '{}' failed: {}", failure.id, failure.error.as_deref().unwrap_or("unknown error"));
    }
    if summary.failed > 0 {
        bail!("{} stage(s) failed", summary.failed);
    }
    Ok(())
}

fn parse_variables(raw: Option<&str>) -> Result<JsonMap<String, Value>> {
    let Some(raw) = raw else {
        return Ok(JsonMap::new());
    };
    match serde_json::from_str::<Value>(raw).context("--variables must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--variables must be a JSON object, got {}", other),
    }
}

/// One block per top-level stage, descendants indented by depth.
fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    iter_parent_stages(plan.stages(), |parent, block| {
        let base = depth(&parent.id);
        for stage in std::iter::once(parent).chain(block) {
            let indent = "  ".repeat(depth(&stage.id).saturating_sub(base));
            let dependencies = if stage.dependencies.is_empty() {
                "-".to_string()
            } else {
                stage.dependencies.join(", ")
            };
            out.push_str(&format!(
                "{indent}{} [{}] batcher={} deps={}\n",
                stage.id, stage.runtime, stage.batcher, dependencies
            ));
        }
    });
    out
}
