mod config;
mod loader;
mod market;
mod models;
mod pipeline;
mod report;
mod sentiment;
mod storage;
mod utils;
mod valuation;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::pipeline::PortfolioService;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "coinfolio", about = "Crypto portfolio valuation and sentiment", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a portfolio file (`amount|symbol|purchasePrice` per line) and value it
    Upload {
        file: PathBuf,

        /// Store and value the valid lines even if some lines are malformed
        #[arg(long)]
        skip_invalid: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Also write the valuation lines to a CSV file
        #[arg(long, value_name = "CSV")]
        export: Option<PathBuf>,
    },

    /// Value the stored portfolio against live prices
    Refresh {
        #[arg(long)]
        json: bool,

        #[arg(long, value_name = "CSV")]
        export: Option<PathBuf>,
    },

    /// Classify market sentiment for a coin (CoinLore slug, e.g. `bitcoin`)
    Analyse {
        coin: String,

        #[arg(long)]
        json: bool,
    },

    /// List stored holdings
    Holdings,

    /// Show recent valuation runs
    Runs {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Apply schema migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "coinfolio=info,warn",
        1 => "coinfolio=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Upload { file, skip_invalid, json, export } => {
            let _t = utils::Timer::start("Portfolio upload");
            let parsed = loader::load_file(&file)?;

            if !parsed.is_clean() {
                for err in &parsed.rejected {
                    warn!("line {} ({:?}): {}", err.line_no, err.error.field(), err.error);
                }
                if !skip_invalid {
                    bail!(
                        "{} malformed line(s) in {:?}, fix them or pass --skip-invalid",
                        parsed.rejected.len(),
                        file
                    );
                }
            }

            let service = PortfolioService::from_config(&config)?;
            let result = service.upload(parsed.holdings).await?;
            if let Some(path) = export {
                report::export_csv(&result, &path)?;
            }
            emit(&result, json, report::render_portfolio)?;
        }

        Command::Refresh { json, export } => {
            let _t = utils::Timer::start("Portfolio refresh");
            let service = PortfolioService::from_config(&config)?;
            let result = service.refresh().await?;
            if let Some(path) = export {
                report::export_csv(&result, &path)?;
            }
            emit(&result, json, report::render_portfolio)?;
        }

        Command::Analyse { coin, json } => {
            let _t = utils::Timer::start(format!("Sentiment analysis ({})", coin));
            let service = PortfolioService::from_config(&config)?;
            let analysis = service.analyse(&coin).await?;
            emit(&analysis, json, report::render_analysis)?;
        }

        Command::Holdings => {
            let service = PortfolioService::from_config(&config)?;
            print!("{}", report::render_holdings(&service.holdings()?));
        }

        Command::Runs { limit } => {
            let service = PortfolioService::from_config(&config)?;
            print!("{}", report::render_runs(&service.recent_runs(limit)?));
        }

        Command::Migrate => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            info!("Migrations applied to {:?}", config.storage.db_path);
            println!("Migrations applied ({} holdings stored).", repo.holding_count()?);
        }
    }

    Ok(())
}

fn emit<T: Serialize>(value: &T, json: bool, render: fn(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", render(value));
    }
    Ok(())
}
