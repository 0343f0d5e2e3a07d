use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use benchdash::artifacts::{self, ArtifactSource, RunsDir};
use benchdash::config::Config;
use benchdash::inference::{LogKind, TaskStatus};
use benchdash::reconcile::{self, watch, RunReport, TaskReport};
use benchdash::registry::{Backend, Batch, Registry};

#[derive(Parser)]
#[command(
    name = "benchdash",
    about = "Status reconciliation and dashboard API for terminal-bench runs",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, env = "BENCHDASH_CONFIG")]
    config: Option<PathBuf>,

    /// Override the terminal-bench runs directory
    #[arg(long, global = true)]
    runs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// List runs with their status summary
    Runs {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show every task of a run
    Run {
        /// Run ID (timestamp directory name)
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Show one task of a run
    Task {
        run: String,
        task: String,

        #[arg(long)]
        json: bool,
    },

    /// Print the tail of a task artifact (agent, tests, commands, results)
    Logs {
        run: String,
        task: String,
        kind: LogKind,
    },

    /// Poll a run until it finishes, logging status changes
    Watch {
        run: String,

        /// Poll interval in seconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Manage registered object-storage batches
    Batch {
        #[command(subcommand)]
        action: BatchAction,
    },
}

#[derive(Subcommand)]
enum BatchAction {
    /// Register (or update) a batch
    Add {
        /// Batch ID (bucket prefix)
        id: String,

        /// Where the batch ran: local, docker, ec2, ecs, modal
        #[arg(long)]
        backend: Backend,

        /// Task launched in the batch (repeatable)
        #[arg(long = "task")]
        tasks: Vec<String>,

        #[arg(long)]
        note: Option<String>,
    },

    /// List registered batches
    List,

    /// Remove a batch from the registry
    Remove { id: String },

    /// Reconcile a batch against the configured bucket source
    Status {
        id: String,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::resolve(cli.config.as_deref())?;
    if let Some(dir) = cli.runs_dir {
        config.sources.runs_dir = dir;
    }

    benchdash::init_tracing(&config.logging);

    let runs = RunsDir::new(&config.sources.runs_dir, config.sources.max_artifact_bytes);
    let rules = &config.inference;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting benchdash server");
            benchdash::serve(&config).await?;
        }
        Commands::Runs { json } => {
            let reports = reconcile::list_runs(&runs, rules)
                .await
                .with_context(|| format!("cannot list runs in {}", runs.root().display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else if reports.is_empty() {
                println!("No runs found in {}.", runs.root().display());
            } else {
                print_run_table(&reports);
            }
        }
        Commands::Run { id, json } => {
            let report = reconcile::reconcile_run(&runs, &id, rules).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_run_detail(&report);
            }
        }
        Commands::Task { run, task, json } => {
            let report = reconcile::reconcile_task(&runs, &run, &task, rules).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_task_table(std::slice::from_ref(&report));
            }
        }
        Commands::Logs { run, task, kind } => match runs.artifact_text(&run, &task, kind).await {
            Some(text) => print!("{}", text),
            None => anyhow::bail!("no {:?} artifact for {}/{}", kind, run, task),
        },
        Commands::Watch { run, interval } => {
            let secs = interval.unwrap_or(config.watch.interval_secs).max(1);
            let report = watch::watch_run(&runs, &run, rules, Duration::from_secs(secs)).await?;
            print_run_detail(&report);
        }
        Commands::Batch { action } => {
            let db_path = config.storage.db_path.to_string_lossy();
            let registry = Registry::new(benchdash::storage::open_pool(&db_path)?);

            match action {
                BatchAction::Add {
                    id,
                    backend,
                    tasks,
                    note,
                } => {
                    let mut batch = Batch::new(id, backend, tasks);
                    batch.note = note;
                    registry.register(&batch)?;
                    println!("Batch '{}' registered ({} task(s)).", batch.id, batch.tasks.len());
                }
                BatchAction::List => {
                    let batches = registry.list()?;
                    if batches.is_empty() {
                        println!("No batches registered.");
                    } else {
                        println!("{:<24} | {:<7} | {:>5} | {:<25} | Note", "ID", "Backend", "Tasks", "Registered");
                        println!("{:-<24}-|-{:-<7}-|-{:->5}-|-{:-<25}-|-{:-<20}", "", "", "", "", "");
                        for b in batches {
                            println!(
                                "{:<24} | {:<7} | {:>5} | {:<25} | {}",
                                b.id,
                                b.backend,
                                b.tasks.len(),
                                b.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                                b.note.unwrap_or_default()
                            );
                        }
                    }
                }
                BatchAction::Remove { id } => {
                    registry.remove(&id)?;
                    println!("Batch '{}' removed.", id);
                }
                BatchAction::Status { id, json } => {
                    let batch = registry.get(&id)?;
                    let source = artifacts::bucket_source(&config.sources)?.context(
                        "no bucket source configured (set sources.bucket_mirror_dir or sources.bucket_url)",
                    )?;
                    let report = reconcile::reconcile_batch(source.as_ref(), &batch, rules).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        print_run_detail(&report);
                    }
                }
            }
        }
    }

    Ok(())
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "QUEUED",
        TaskStatus::Running => "RUNNING",
        TaskStatus::Passed => "PASS",
        TaskStatus::Failed => "FAIL",
    }
}

fn accuracy_label(report: &RunReport) -> String {
    report
        .summary
        .accuracy
        .map(|a| format!("{:.1}%", a * 100.0))
        .unwrap_or_else(|| "-".to_string())
}

fn print_run_table(reports: &[RunReport]) {
    println!(
        "{:<22} | {:<9} | {:>5} | {:>6} | {:>6} | {:>7} | {:>6} | Accuracy",
        "Run", "State", "Tasks", "Passed", "Failed", "Running", "Queued"
    );
    println!(
        "{:-<22}-|-{:-<9}-|-{:->5}-|-{:->6}-|-{:->6}-|-{:->7}-|-{:->6}-|-{:-<8}",
        "", "", "", "", "", "", "", ""
    );
    for r in reports {
        println!(
            "{:<22} | {:<9} | {:>5} | {:>6} | {:>6} | {:>7} | {:>6} | {}",
            r.id,
            r.state,
            r.summary.total,
            r.summary.passed,
            r.summary.failed,
            r.summary.running,
            r.summary.queued,
            accuracy_label(r)
        );
    }
}

fn print_task_table(tasks: &[TaskReport]) {
    println!("{:<32} | {:<7} | {:<16} | Trial", "Task", "Status", "Evidence");
    println!("{:-<32}-|-{:-<7}-|-{:-<16}-|-{:-<24}", "", "", "", "");
    for t in tasks {
        let evidence = serde_json::to_value(t.evidence)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        println!(
            "{:<32} | {:<7} | {:<16} | {}",
            t.name,
            status_label(t.status),
            evidence,
            t.trial.as_deref().unwrap_or("-")
        );
    }
}

fn print_run_detail(report: &RunReport) {
    println!("\n=== Run {} ({}) ===", report.id, report.source);
    println!("State:    {}", report.state);
    if let Some(meta) = &report.metadata {
        if let Some(agent) = &meta.agent_name {
            println!("Agent:    {}", agent);
        }
        if let Some(model) = &meta.model_name {
            println!("Model:    {}", model);
        }
    }
    println!(
        "Tasks:    {} total, {} passed, {} failed, {} running, {} queued",
        report.summary.total,
        report.summary.passed,
        report.summary.failed,
        report.summary.running,
        report.summary.queued
    );
    println!("Accuracy: {}", accuracy_label(report));
    println!();
    if !report.tasks.is_empty() {
        print_task_table(&report.tasks);
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_batch_add() {
        let cli = Cli::try_parse_from([
            "benchdash", "batch", "add", "20250601-120000", "--backend", "ec2", "--task", "a", "--task", "b",
        ])
        .unwrap();
        match cli.command {
            Commands::Batch {
                action: BatchAction::Add { id, backend, tasks, .. },
            } => {
                assert_eq!(id, "20250601-120000");
                assert_eq!(backend, Backend::Ec2);
                assert_eq!(tasks, vec!["a".to_string(), "b".to_string()]);
            }
            _ => panic!("expected batch add"),
        }
    }

    #[test]
    fn test_parse_logs_kind() {
        assert!(Cli::try_parse_from(["benchdash", "logs", "r1", "t", "tests"]).is_ok());
        assert!(Cli::try_parse_from(["benchdash", "logs", "r1", "t", "screenshots"]).is_err());
    }
}
