//! DAGLINE CLI
//!
//! Runs the training pipeline, shows its graph, lists spooled trigger
//! requests and clears run locks left by aborted runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use dagline_cli::{Overrides, Pipeline, PipelineConfig, build_dag, unlock};
use dagline_core::TaskId;
use dagline_notify::SpoolTrigger;
use dagline_runtime::RunReport;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dagline")]
#[command(about = "DAGLINE - Deterministic training pipeline runner", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once
    Run(RunArgs),
    /// Print tasks in execution order
    Graph {
        /// Pipeline configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List trigger requests waiting in the spool
    Triggers {
        /// Pipeline configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Remove the run lock of an aborted run
    Unlock {
        /// Pipeline configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory holding the model artifact
        #[arg(long)]
        artifact_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Pipeline configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// CSV file to train on
    #[arg(long, conflicts_with = "synthetic")]
    data: Option<PathBuf>,
    /// Label column of the CSV file
    #[arg(long)]
    label: Option<String>,
    /// Generate this many synthetic rows instead of reading a file
    #[arg(long, value_name = "ROWS")]
    synthetic: Option<usize>,
    /// Seed for data generation and the split
    #[arg(long)]
    seed: Option<u64>,
    /// Directory holding the model artifact
    #[arg(long)]
    artifact_dir: Option<PathBuf>,
    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
    /// Make a task fail; may be repeated
    #[arg(long, value_name = "ID")]
    fail_task: Vec<String>,
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

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Graph { config } => {
            let config = PipelineConfig::load_or_default(config.as_deref())?;
            graph(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Triggers { config } => {
            let config = PipelineConfig::load_or_default(config.as_deref())?;
            triggers(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Unlock {
            config,
            artifact_dir,
        } => {
            let mut config = PipelineConfig::load_or_default(config.as_deref())?;
            config.apply(&Overrides {
                artifact_dir,
                ..Overrides::default()
            });
            if unlock(&config)? {
                println!("removed run lock in {}", config.artifact.dir.display());
            } else {
                println!("no run lock in {}", config.artifact.dir.display());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run(args: RunArgs) -> Result<ExitCode> {
    let mut config = PipelineConfig::load_or_default(args.config.as_deref())?;
    config.apply(&Overrides {
        data: args.data,
        label: args.label,
        synthetic_rows: args.synthetic,
        seed: args.seed,
        artifact_dir: args.artifact_dir,
    });

    let mut pipeline = Pipeline::from_config(config)?;
    for task in &args.fail_task {
        pipeline.inject_failure(task)?;
    }

    let report = pipeline.run()?;
    print_summary(&report);

    if let Ok(artifact) = pipeline.store().info(&pipeline.config().artifact.name) {
        println!(
            "model: {} ({} bytes, blake3 {})",
            artifact.path.display(),
            artifact.size_bytes,
            artifact.checksum
        );
    }
    if let Some(evaluation) = pipeline.evaluation() {
        println!(
            "accuracy: {:.4} ({}/{} test rows)",
            evaluation.accuracy,
            evaluation.correct(),
            evaluation.test_rows
        );
    }
    if let Some(request) = pipeline.trigger_request() {
        println!(
            "triggered {} (run {})",
            request.target_pipeline, request.run_id
        );
    }

    if let Some(path) = &args.report {
        fs::write(path, report.to_json_pretty()?)
            .wrap_err_with(|| format!("writing report to {}", path.display()))?;
        println!("report: {}", path.display());
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(report: &RunReport) {
    println!("{} {} {}", report.pipeline_id, report.run_id, report.status);
    println!("{:<28} {:<16} {:>8} {:>10}", "TASK", "STATE", "ATTEMPTS", "MS");
    for record in &report.tasks {
        let ms = record
            .duration_ms()
            .map_or_else(|| "-".to_string(), |ms| ms.to_string());
        println!(
            "{:<28} {:<16} {:>8} {:>10}",
            record.task_id.to_string(),
            record.state.to_string(),
            record.attempts,
            ms
        );
        if let Some(error) = &record.error {
            println!("    error: {}", error);
        }
        for error in &record.hook_errors {
            println!("    hook error: {}", error);
        }
    }
    let m = &report.metrics;
    println!(
        "succeeded {} failed {} upstream_failed {} skipped {} hook_failures {} success_rate {:.2}",
        m.tasks_succeeded,
        m.tasks_failed,
        m.tasks_upstream_failed,
        m.tasks_skipped,
        m.hook_failures,
        m.success_rate()
    );
}

fn graph(config: &PipelineConfig) -> Result<()> {
    let dag = build_dag(config)?;
    println!("{} ({})", dag.pipeline_id, dag.meta.description);
    for id in dag.topological_order() {
        let Some(spec) = dag.get_task(&id) else {
            continue;
        };
        let upstream: Vec<String> = dag.upstream(&id).into_iter().map(ToString::to_string).collect();
        println!(
            "{:<28} rule={:<12} upstream=[{}]",
            id.to_string(),
            spec.trigger_rule.to_string(),
            upstream.join(", ")
        );
    }
    println!("roots: {}", join_ids(dag.roots()));
    println!("leaves: {}", join_ids(dag.leaves()));
    Ok(())
}

fn join_ids(ids: Vec<&TaskId>) -> String {
    ids.into_iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn triggers(config: &PipelineConfig) -> Result<()> {
    let spool = SpoolTrigger::new(config.trigger.spool_dir.clone());
    let requests = spool.list()?;
    if requests.is_empty() {
        println!("no trigger requests in {}", spool.dir().display());
        return Ok(());
    }
    for request in requests {
        println!(
            "{} {} <- {} ({}) conf={}",
            request.requested_at,
            request.target_pipeline,
            request.source_pipeline,
            request.source_run_id,
            serde_json::Value::Object(request.conf)
        );
    }
    Ok(())
}
