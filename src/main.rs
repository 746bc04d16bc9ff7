//! specloop - operator CLI for the TDD pipeline decision core
//!
//! Every subcommand is a thin shell over one library decision, so the
//! pipeline's behavior can be inspected and driven from a terminal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use specloop::classifier::{ErrorClassifier, Outcome};
use specloop::config::PipelineConfig;
use specloop::health::{HealthMonitor, QueueMetrics, WorkflowMetrics};
use specloop::retry::calculate_exponential_backoff;
use specloop::scheduler::{SchedulerState, SpecSelector};
use specloop::state_machine::{analyze_labels, SpecState, SpecStateMachine};
use specloop::store::JsonLabelStore;
use specloop::PipelineError;

#[derive(Parser)]
#[command(name = "specloop")]
#[command(
    author,
    version,
    about = "Scheduling, retry and admission decisions for an autonomous TDD pipeline"
)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (default: current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify an execution log
    Classify {
        /// Log file, or "-" for stdin
        #[arg(long)]
        log: PathBuf,

        /// Final status reported by the runner
        #[arg(long, value_enum)]
        outcome: Outcome,

        /// The run produced its artifact (e.g. a pull request)
        #[arg(long)]
        artifact: bool,
    },

    /// Print the retry delay table (without jitter)
    Backoff {
        /// Number of attempts to show
        #[arg(long, default_value = "5")]
        attempts: u32,
    },

    /// Select the next batch from a scheduler state snapshot
    Select {
        /// Snapshot JSON file
        #[arg(long)]
        snapshot: PathBuf,

        /// Items to admit (default: configured batch size)
        #[arg(long)]
        count: Option<usize>,
    },

    /// Assess pipeline health from a metrics file
    Health {
        /// Metrics JSON file
        #[arg(long)]
        metrics: PathBuf,
    },

    /// Inspect lifecycle labels
    Labels {
        #[command(subcommand)]
        action: LabelsAction,
    },

    /// Move an item to a new lifecycle state
    Transition {
        /// Label file (default: <project>/.specloop/labels.json)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Item identifier
        item: String,

        /// Target state (queued, in-progress, completed, failed)
        #[arg(value_parser = parse_state)]
        state: SpecState,

        /// Bypass the transition table
        #[arg(long)]
        force: bool,
    },

    /// Show effective configuration and validation problems
    Config,
}

#[derive(Subcommand)]
enum LabelsAction {
    /// Derive lifecycle facts from a label set
    Analyze {
        /// Labels as they appear on the record
        #[arg(required = true)]
        labels: Vec<String>,
    },
}

/// Input document for `specloop health`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct HealthInput {
    queue: QueueMetrics,
    workflow: WorkflowMetrics,
    circuit_open: bool,
}

/// One row of the backoff table.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackoffRow {
    retry_count: u32,
    delay_seconds: u64,
}

fn parse_state(value: &str) -> std::result::Result<SpecState, String> {
    value.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "specloop=debug,info"
    } else {
        "specloop=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let project = match cli.project.canonicalize() {
        Ok(p) => p,
        Err(_) => {
            eprintln!(
                "{} Project directory does not exist: {}",
                "Error:".red().bold(),
                cli.project.display()
            );
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&cli, &project).await {
        let code = e
            .downcast_ref::<PipelineError>()
            .map_or(1, PipelineError::exit_code);
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(code);
    }
    Ok(())
}

async fn run(cli: &Cli, project: &Path) -> Result<()> {
    let config = PipelineConfig::load(project)?;
    debug!(project = %project.display(), "Configuration loaded");

    match &cli.command {
        Commands::Classify {
            log,
            outcome,
            artifact,
        } => {
            let content = read_log(log).await?;
            let result = ErrorClassifier::new().classify(&content, *outcome, *artifact);

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            let headline = if result.is_success() {
                result.error_type.to_string().green().bold()
            } else if result.treats_work_as_done() {
                result.error_type.to_string().cyan().bold()
            } else {
                result.error_type.to_string().red().bold()
            };
            println!("{} {} ({})", "Classification:".bold(), headline, result.category);
            println!("   {}", result.message);
            println!(
                "   Infrastructure: {}  Retryable: {}  Pause queue: {}",
                yes_no(result.is_infrastructure),
                yes_no(result.is_retryable),
                yes_no(result.should_pause_queue)
            );
            if let Some(ref guidance) = result.guidance {
                println!("   {} {}", "Guidance:".blue(), guidance);
            }
            if let Some(ref line) = result.matched_line {
                println!("   {} {}", "Matched:".dimmed(), line);
            }
        }

        Commands::Backoff { attempts } => {
            let rows: Vec<BackoffRow> = (1..=*attempts)
                .map(|n| BackoffRow {
                    retry_count: n,
                    delay_seconds: calculate_exponential_backoff(
                        n,
                        config.retry.base_delay_seconds,
                        config.retry.max_delay_seconds,
                    ),
                })
                .collect();

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }

            println!("{}", "Retry backoff:".cyan().bold());
            println!("{}", "─".repeat(40));
            for row in &rows {
                println!("   retry {:>2}  {:>5}s", row.retry_count, row.delay_seconds);
            }
            println!(
                "   {} up to +{:.0}% jitter is added at runtime",
                "Info:".blue(),
                config.retry.jitter_fraction * 100.0
            );
        }

        Commands::Select { snapshot, count } => {
            let state: SchedulerState = read_json(snapshot).await?;
            let count = count.unwrap_or(config.scheduler.batch_size);
            let selector = SpecSelector::new(config.scheduler.clone());
            let selection = selector.select(count, &state, chrono::Utc::now());

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&selection)?);
                return Ok(());
            }

            if selection.selected.is_empty() {
                println!("{} Nothing admissible", "Info:".blue());
            } else {
                println!("{}", "Selected:".green().bold());
                for scored in &selection.selected {
                    println!(
                        "   {} {:>3}  {}",
                        scored.item.spec_id.bold(),
                        scored.score,
                        scored.item.file_path.dimmed()
                    );
                }
            }
            for (spec_id, reason) in &selection.skipped {
                println!("   {} {} skipped: {:?}", "•".dimmed(), spec_id, reason);
            }
            for spec_id in &selection.deferred {
                println!("   {} {} deferred: path group already used", "•".dimmed(), spec_id);
            }
        }

        Commands::Health { metrics } => {
            let input: HealthInput = read_json(metrics).await?;
            let assessment = HealthMonitor::new(config.health.clone()).assess(
                input.queue,
                input.workflow,
                input.circuit_open,
                chrono::Utc::now(),
            );

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&assessment)?);
            } else {
                assessment.print();
            }
        }

        Commands::Labels {
            action: LabelsAction::Analyze { labels },
        } => {
            let analysis = analyze_labels(labels);

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
                return Ok(());
            }

            let state = analysis
                .current_state
                .map_or_else(|| "none".dimmed(), |s| s.to_string().bold());
            println!("{} {}", "State:".bold(), state);
            println!(
                "   Retries: spec {}, infra {}",
                analysis.spec_retry_count, analysis.infra_retry_count
            );
            if let Some(failure) = analysis.failure_type {
                println!("   Failure type: {}", failure.to_string().red());
            }
            if analysis.queue_disabled {
                println!("   {} Queue disabled sentinel present", "Warning:".yellow());
            }
        }

        Commands::Transition {
            store,
            item,
            state,
            force,
        } => {
            let store = match store {
                Some(path) => JsonLabelStore::new(path),
                None => JsonLabelStore::in_project(project),
            };
            let machine = SpecStateMachine::new(store);
            let transition = if *force {
                machine.force_transition_to(item, *state).await?
            } else {
                machine.transition_to(item, *state).await?
            };

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&transition)?);
                return Ok(());
            }

            let from = transition
                .from
                .map_or_else(|| "none".to_string(), |s| s.to_string());
            let marker = if transition.forced {
                "Forced".yellow().bold()
            } else {
                "OK".green().bold()
            };
            println!("{} {}: {} -> {}", marker, item, from, transition.to);
        }

        Commands::Config => {
            let report = config.validate();

            if cli.json {
                let doc = serde_json::json!({
                    "config": config,
                    "validation": report,
                });
                println!("{}", serde_json::to_string_pretty(&doc)?);
                return Ok(());
            }

            println!("{}", "Config:".cyan().bold());
            println!("{}", "─".repeat(40));
            println!(
                "   Settings: {}",
                PipelineConfig::settings_path(project).display()
            );
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!();
            for problem in report.errors() {
                println!("   {} {}: {}", "Error:".red(), problem.field, problem.message);
            }
            for problem in report.warnings() {
                println!("   {} {}: {}", "Warning:".yellow(), problem.field, problem.message);
            }
            if report.is_valid() {
                println!("{} {}", "OK".green(), report.summary());
            } else {
                println!("{} {}", "Invalid".red().bold(), report.summary());
                config.clone().validated()?;
            }
        }
    }

    Ok(())
}

async fn read_log(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("Failed to read log from stdin")?;
        return Ok(content);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read log {}", path.display()))
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn yes_no(value: bool) -> colored::ColoredString {
    if value {
        "yes".yellow()
    } else {
        "no".normal()
    }
}
