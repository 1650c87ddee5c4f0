//! CLI entry point for flyscan
//!
//! Runs a simulated fly scan across mock flyers:
//!
//! ```bash
//! flyscan run --config config/flyscan.toml
//! flyscan run --config config/flyscan.toml --points 3 --json
//! flyscan check --config config/flyscan.toml
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flyscan::logging::{self, OutputFormat, TracingConfig};
use flyscan::{build_coordinator, scan_points, FlyscanConfig, ScanSummary};
use serde_json::json;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "flyscan")]
#[command(about = "Synchronized multi-device fly scans on simulated hardware", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured scan
    Run {
        /// Configuration file
        #[arg(long)]
        config: PathBuf,

        /// Run at most this many points
        #[arg(long)]
        points: Option<usize>,

        /// Override the configured log format
        #[arg(long, value_enum)]
        log_format: Option<OutputFormat>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and validate a configuration file
    Check {
        /// Configuration file
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            points,
            log_format,
            json,
        } => run(config, points, log_format, json).await,
        Commands::Check { config } => check(config),
    }
}

fn load(path: &Path) -> Result<FlyscanConfig> {
    FlyscanConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

async fn run(
    path: PathBuf,
    limit: Option<usize>,
    log_format: Option<OutputFormat>,
    as_json: bool,
) -> Result<ExitCode> {
    let config = load(&path)?;

    let mut tracing_config = TracingConfig::from_config(&config)?;
    if let Some(format) = log_format {
        tracing_config = tracing_config.with_format(format);
    }
    logging::init(tracing_config)?;

    let points = scan_points(&config.scan, limit);
    info!(
        name = %config.application.name,
        points = points.len(),
        axis = %config.scan.axis,
        "starting fly scan"
    );

    let mut coordinator = build_coordinator(&config).await?;
    let scan = coordinator.run_points(&points).await;
    let summary = ScanSummary::new(&scan, points.len());

    if as_json {
        let output = json!({
            "name": config.application.name,
            "kickoff_order": coordinator.kickoff_order(),
            "summary": summary,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("kickoff order: {}", coordinator.kickoff_order().join(" -> "));
        println!("{summary}");
    }

    if summary.success {
        Ok(ExitCode::SUCCESS)
    } else {
        error!(points_run = summary.points_run, "fly scan failed");
        Ok(ExitCode::FAILURE)
    }
}

fn check(path: PathBuf) -> Result<ExitCode> {
    let config = load(&path)?;
    let enabled: Vec<&str> = config.enabled_devices().map(|d| d.id.as_str()).collect();
    println!("{}: configuration ok", path.display());
    println!("  devices: {}", enabled.join(", "));
    println!(
        "  scan: {} points on '{}' from {} to {}, {}s x {} triggers",
        config.scan.num_points,
        config.scan.axis,
        config.scan.start,
        config.scan.stop,
        config.scan.exposure_s,
        config.scan.triggers_per_point
    );
    Ok(ExitCode::SUCCESS)
}
