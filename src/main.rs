use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use slow_orders::config::RunConfig;
use slow_orders::lifecycle::TracingObserver;
use slow_orders::orchestrator::MonthlyOrchestrator;
use slow_orders::planet::PlanetClient;
use slow_orders::summary::RunSummary;
use slow_orders::window::month_windows;

#[derive(Parser)]
#[command(version, about = "Search, order and download imagery one calendar month at a time")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every month described by a config file
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Also write the per-month outcomes as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
        #[arg(long, env = "PL_API_KEY", hide_env_values = true)]
        api_key: String,
    },
    /// Write a starter config file
    Init { path: PathBuf },
    /// Print a summary written by `run --summary`
    Report { path: PathBuf },
    /// Print the month windows of a date range
    Windows {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
}

fn init_tracing() {
    let env = std::env::var("SLOW_ORDERS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            summary,
            api_key,
        } => run(config, summary, api_key).await,
        Command::Init { path } => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            std::fs::write(&path, RunConfig::template())?;
            println!("Wrote {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Report { path } => {
            let summary = RunSummary::read(&path)
                .with_context(|| format!("Reading summary {}", path.display()))?;
            println!("{summary}");
            if summary.failed() > 0 || summary.cancelled {
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Windows { start, end } => {
            if start > end {
                bail!("Start date must be before or equal to end date");
            }
            for window in month_windows(start, end) {
                println!("{}  {}", window.label(), window);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: PathBuf, summary_path: Option<PathBuf>, api_key: String) -> Result<ExitCode> {
    let run_config = RunConfig::read(&config)
        .with_context(|| format!("Reading config {}", config.display()))?;
    let base_url = run_config.api.base_url.clone();
    let plan = run_config.into_plan()?;

    let client = PlanetClient::new(base_url, api_key)?;
    let observer = TracingObserver;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling remaining work");
                cancel.cancel();
            }
        }
    });

    let orchestrator = MonthlyOrchestrator::new(&client, plan, &observer);
    let summary = orchestrator.run(&cancel).await;

    println!("{summary}");
    if let Some(path) = summary_path {
        summary.write(&path)?;
        info!(path = %path.display(), "Wrote run summary");
    }

    info!("All orders processed");
    if summary.failed() > 0 || summary.cancelled {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
