use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use volley::config::ScenarioConfig;
use volley::engine::http_client::HyperClient;
use volley::engine::{Scheduler, Verdict};

#[derive(Parser)]
#[command(name = "volley")]
#[command(about = "HTTP load testing engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario to completion
    Run {
        /// Path to the scenario YAML file
        scenario: PathBuf,
        /// Override the scenario's worker count
        #[arg(short, long, alias = "vus")]
        workers: Option<usize>,
        /// Override the scenario's duration (e.g., "30s")
        #[arg(short, long)]
        duration: Option<String>,
        /// Print the summary as JSON instead of the console report
        #[arg(long)]
        json: bool,
        /// Also write the JSON summary to a file
        #[arg(long)]
        export_json: Option<PathBuf>,
    },
    /// Validate a scenario file without running it
    Validate {
        scenario: PathBuf,
    },
    /// Print the scenario JSON schema
    Schema {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_scenario(path: &Path) -> Result<ScenarioConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse scenario {}", path.display()))
}

fn run_scenario(
    scenario: PathBuf,
    workers: Option<usize>,
    duration: Option<String>,
    json: bool,
    export_json: Option<PathBuf>,
) -> Result<ExitCode> {
    let mut config = load_scenario(&scenario)?;
    if let Some(w) = workers {
        // Command-line worker count replaces whatever ramp the file declares.
        config.workers = Some(w);
        config.schedule = None;
    }
    if let Some(d) = duration {
        config.duration = Some(d);
    }

    let plan = config.compile().context("invalid scenario")?;
    let client = Arc::new(HyperClient::new().context("failed to build HTTP client")?);

    let runtime = Runtime::new()?;
    let report = runtime.block_on(async move {
        let scheduler = Scheduler::new(plan, client);
        let state = scheduler.state();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping");
                state.cancel();
            }
        });
        scheduler.run().await
    })?;

    if json {
        println!("{}", report.stats.to_json());
    } else {
        report.stats.report();
    }
    for breach in &report.breaches {
        eprintln!("{breach}");
    }
    if let Some(path) = export_json {
        std::fs::write(&path, report.stats.to_json())
            .with_context(|| format!("failed to write {}", path.display()))?;
        eprintln!("Summary written to {}", path.display());
    }

    match report.verdict {
        Verdict::CompletedPass => Ok(ExitCode::SUCCESS),
        verdict => {
            eprintln!("verdict: {:?}", verdict);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn validate_scenario(scenario: PathBuf) -> Result<ExitCode> {
    let config = load_scenario(&scenario)?;
    match config.compile() {
        Ok(plan) => {
            let total: std::time::Duration = plan.stages.iter().map(|s| s.duration).sum();
            println!(
                "{} is valid: {} stage(s), {:.0}s total, {} threshold(s), {} check(s)",
                scenario.display(),
                plan.stages.len(),
                total.as_secs_f64(),
                plan.thresholds.len(),
                plan.checks.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{} is invalid: {}", scenario.display(), e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_schema(output: Option<PathBuf>) -> Result<ExitCode> {
    let schema = schemars::schema_for!(ScenarioConfig);
    let json = serde_json::to_string_pretty(&schema)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Schema written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            scenario,
            workers,
            duration,
            json,
            export_json,
        } => run_scenario(scenario, workers, duration, json, export_json),
        Commands::Validate { scenario } => validate_scenario(scenario),
        Commands::Schema { output } => print_schema(output),
    }
}
