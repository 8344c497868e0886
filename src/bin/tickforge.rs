use std::{path::PathBuf, process::ExitCode, str::FromStr};

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tickforge::{
    Config, Pipeline, TickStore, TickforgeResult,
    catalog::venue::{InstrumentType, Product, SymbolType, Venue},
    pipeline::DownloadSelection,
    validator::missing::{MissingFilters, entries_to_csv},
};

/// Market-data ingestion pipeline: instrument catalogs, tick downloads,
/// missing-data reports and gap backfill.
#[derive(Debug, Parser)]
#[command(name = "tickforge", version, about)]
struct Cli {
    /// Operation mode.
    #[arg(long, value_enum)]
    mode: Mode,

    /// Start date, YYYY-MM-DD (inclusive).
    #[arg(long)]
    start_date: NaiveDate,

    /// End date, YYYY-MM-DD (inclusive).
    #[arg(long)]
    end_date: NaiveDate,

    /// Exchanges to process in instruments mode (vendor ids or canonical names).
    #[arg(long, num_args = 1..)]
    exchanges: Option<Vec<String>>,

    /// Venue filter for download/validate modes.
    #[arg(long, num_args = 1..)]
    venues: Option<Vec<String>>,

    /// Instrument-type filter (e.g. option, perpetual, SPOT_PAIR).
    #[arg(long, num_args = 1..)]
    instrument_types: Option<Vec<String>>,

    /// Product filter (e.g. trades book_snapshot_5).
    #[arg(long, num_args = 1..)]
    data_types: Option<Vec<String>>,

    /// Cap on catalog rows turned into download targets.
    #[arg(long)]
    max_instruments: Option<usize>,

    /// Parallel exchange fetches during catalog generation.
    #[arg(long, default_value_t = 4)]
    max_workers: usize,

    /// Shard index for distributed runs (0-based, with --total-shards).
    #[arg(long)]
    shard_index: Option<u32>,

    /// Total shard count for distributed runs.
    #[arg(long)]
    total_shards: Option<u32>,

    /// Environment file loaded before configuration.
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// YAML configuration file.
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Log level override (DEBUG, INFO, WARNING, ERROR, CRITICAL).
    #[arg(long)]
    log_level: Option<String>,

    /// Write the detailed missing-data rows to this CSV file.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Print detailed missing-data rows.
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Generate instrument definitions (C1).
    Instruments,
    /// Download only what missing-data reports list (C4 → C2).
    Download,
    /// Detect and report missing data (C3).
    Validate,
    /// Light catalog-only existence check.
    CheckGaps,
    /// C1 → C2 → C3 in sequence.
    FullPipeline,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(env_file) = &cli.env_file {
        match dotenvy::from_path(env_file) {
            Ok(()) => eprintln!("Loaded environment from {}", env_file.display()),
            Err(e) => {
                eprintln!("Failed to load {}: {e}", env_file.display());
                return ExitCode::FAILURE;
            }
        }
    } else {
        // Best-effort default .env; absence is fine.
        let _ = dotenvy::dotenv();
    }

    let level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "INFO".to_string());
    let filter = match level.to_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> TickforgeResult<()> {
    if cli.start_date > cli.end_date {
        return Err(tickforge::error::ConfigError::InvalidValue {
            option: "start_date".to_string(),
            msg: "start date must not be after end date".to_string(),
        }
        .into());
    }

    let mut config = Config::load(cli.config_file.as_deref())?;
    if cli.shard_index.is_some() || cli.total_shards.is_some() {
        config.sharding.shard_index = cli.shard_index;
        config.sharding.total_shards = cli.total_shards;
        config.validate()?;
    }

    let store = TickStore::gcs(&config.gcs)?;
    let pipeline = Pipeline::new(config, store)?;

    let exchanges = cli.exchanges.as_deref().map(parse_venues).transpose()?;
    let selection = DownloadSelection {
        venues: cli.venues.as_deref().map(parse_venues).transpose()?,
        instrument_types: cli
            .instrument_types
            .as_deref()
            .map(parse_instrument_types)
            .transpose()?,
        products: cli.data_types.as_deref().map(parse_products).transpose()?,
        max_instruments: cli.max_instruments,
    };

    match cli.mode {
        Mode::Instruments => {
            let report = pipeline
                .run_instruments(exchanges, cli.start_date, cli.end_date, cli.max_workers)
                .await?;
            info!(
                days = report.processed_days,
                instruments = report.total_instruments,
                parse_failures = report.stats.failed_parsing,
                errors = report.errors.len(),
                "Instrument generation completed"
            );
        }
        Mode::Download => {
            let report = pipeline.run_gapfill(cli.start_date, cli.end_date).await?;
            info!(
                days = report.total_days,
                targets = report.hydrated_targets,
                processed = report.processed,
                failed = report.failed,
                "Missing-data download completed"
            );
        }
        Mode::Validate => {
            let filters = MissingFilters {
                venues: selection.venues.clone(),
                instrument_types: selection.instrument_types.clone(),
                products: selection.products.clone(),
            };
            let summary = pipeline
                .run_validate(cli.start_date, cli.end_date, &filters)
                .await?;
            info!(
                missing = summary.total_missing,
                coverage = format!("{:.1}%", summary.coverage_percentage()),
                "Validation completed"
            );

            if cli.verbose {
                for entry in &summary.entries {
                    println!(
                        "{} {} {}",
                        entry.date, entry.instrument_key, entry.product
                    );
                }
            }
            if let Some(output) = &cli.output {
                std::fs::write(output, entries_to_csv(&summary.entries))
                    .map_err(tickforge::error::StorageError::Io)?;
                info!(path = %output.display(), "Wrote missing-data CSV");
            }
            if !summary.is_complete() {
                return Err(tickforge::error::SystemError::Generic(format!(
                    "{} missing data entries",
                    summary.total_missing
                ))
                .into());
            }
        }
        Mode::CheckGaps => {
            let report = pipeline.run_check_gaps(cli.start_date, cli.end_date).await?;
            info!(
                days = report.total_days,
                covered = report.days_with_catalog,
                gaps = report.missing_days.len(),
                "Gap check completed"
            );
        }
        Mode::FullPipeline => {
            let (catalog, download, validation) = pipeline
                .run_full_pipeline(
                    exchanges,
                    cli.start_date,
                    cli.end_date,
                    &selection,
                    cli.max_workers,
                )
                .await?;
            info!(
                instruments = catalog.total_instruments,
                downloaded = download.processed,
                failed = download.failed,
                missing = validation.total_missing,
                "Full pipeline completed"
            );
        }
    }

    Ok(())
}

/// Accepts vendor ids (`binance-futures`, `okex`) and canonical names
/// (`BINANCE-FUTURES`, `OKX`) alike.
fn parse_venues(raw: &[String]) -> TickforgeResult<Vec<Venue>> {
    raw.iter()
        .map(|s| {
            Venue::from_vendor_id(&s.to_lowercase())
                .or_else(|_| {
                    Venue::from_str(&s.to_uppercase()).map_err(|_| {
                        tickforge::error::CatalogError::UnknownVenue(s.clone())
                    })
                })
                .map_err(Into::into)
        })
        .collect()
}

/// Accepts canonical type names (`SPOT_PAIR`) and vendor symbol types
/// (`spot`, `perpetual`) alike.
fn parse_instrument_types(raw: &[String]) -> TickforgeResult<Vec<InstrumentType>> {
    raw.iter()
        .map(|s| {
            InstrumentType::from_str(&s.to_uppercase())
                .or_else(|_| SymbolType::from_str(&s.to_lowercase()).map(|t| t.canonical()))
                .map_err(|_| {
                    tickforge::error::CatalogError::UnknownSymbolType(s.clone()).into()
                })
        })
        .collect()
}

fn parse_products(raw: &[String]) -> TickforgeResult<Vec<Product>> {
    raw.iter()
        .map(|s| {
            Product::from_str(&s.to_lowercase())
                .map_err(|_| tickforge::error::CatalogError::UnknownProduct(s.clone()).into())
        })
        .collect()
}
