use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;

use margin_consensus::agent::runner::Runner;
use margin_consensus::config::{AppConfig, DEFAULT_CONFIG_PATH};
use margin_consensus::fixtures::calendar::RoundCalendar;
use margin_consensus::fixtures::models::RoundId;
use margin_consensus::monitoring::logger;

#[derive(Parser)]
#[command(name = "margin-consensus")]
#[command(about = "Weighted consensus of margin predictions from several sources", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast and submit a round (default: the round covering today)
    Run {
        #[arg(long)]
        round: Option<RoundId>,
    },
    /// Record results of a completed round (default: the previous round)
    Results {
        #[arg(long)]
        round: Option<RoundId>,
    },
    /// Score sources against a completed round (default: the previous round)
    Calibrate {
        #[arg(long)]
        round: Option<RoundId>,
        /// Save the proposed weights
        #[arg(long)]
        apply: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, secrets) = AppConfig::load(&cli.config)?;

    logger::init_logging(&config.monitoring)?;

    let calendar = RoundCalendar::new(config.rounds.clone())?;
    let runner = Runner::from_config(&config, &secrets).await?;

    match cli.command {
        Commands::Run { round } => {
            let round_id = match round {
                Some(id) => id,
                None => current_round(&calendar)?,
            };
            let report = runner.run_round(round_id).await?;
            print_json(&report)
        }
        Commands::Results { round } => {
            let round_id = resolve_previous(&calendar, round)?;
            let report = runner.record_results(round_id).await?;
            print_json(&report)
        }
        Commands::Calibrate { round, apply } => {
            let round_id = resolve_previous(&calendar, round)?;
            let report = runner.calibrate(round_id, apply).await?;
            print_json(&report)
        }
    }
}

fn current_round(calendar: &RoundCalendar) -> Result<RoundId> {
    let today = Utc::now().date_naive();
    let round_id = calendar.current_round(today)?;
    tracing::info!(%today, round_id, "Resolved current round");
    Ok(round_id)
}

fn resolve_previous(calendar: &RoundCalendar, round: Option<RoundId>) -> Result<RoundId> {
    if let Some(id) = round {
        return Ok(id);
    }
    let current = current_round(calendar)?;
    calendar
        .previous_round(current)
        .with_context(|| format!("No round configured before round {current}"))
}

fn print_json<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
