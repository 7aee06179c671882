use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use mobility_etl::config::EtlConfig;
use mobility_etl::logging::init_logging;
use mobility_etl::metrics;
use mobility_etl::pipeline::processing::{read_numeric_column, AnomalyDetector};
use mobility_etl::pipeline::{ChunkedPipelineRunner, OutputPaths, TripSource};
use mobility_etl::storage::{TripFilter, TripStore};

#[derive(Parser)]
#[command(name = "mobility_etl")]
#[command(about = "Clean raw taxi trip exports and load them into SQLite")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (defaults to ETL_CONFIG, then ./etl.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Write a Prometheus text snapshot of run metrics to this file
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean the raw trip file into cleaned and excluded CSVs
    Clean {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        clean_out: Option<PathBuf>,
        #[arg(long)]
        excluded_out: Option<PathBuf>,
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Load a cleaned file into the database
    Load {
        #[arg(long)]
        cleaned: Option<PathBuf>,
        #[arg(long)]
        database: Option<PathBuf>,
        /// Load even without a completed run manifest
        #[arg(long)]
        force: bool,
    },
    /// Clean, then load
    Run {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Report speed outliers in a cleaned file
    Anomalies {
        #[arg(long)]
        cleaned: Option<PathBuf>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long, default_value = "trip_speed_kmph")]
        column: String,
    },
    /// Run an analytical query against the database
    Report {
        #[arg(value_enum)]
        kind: ReportKind,
        #[arg(long)]
        database: Option<PathBuf>,
        #[arg(long)]
        min_km: Option<f64>,
        #[arg(long)]
        max_km: Option<f64>,
        /// Earliest pickup, `YYYY-MM-DD HH:MM:SS`
        #[arg(long)]
        start: Option<String>,
        /// Latest pickup, `YYYY-MM-DD HH:MM:SS`
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportKind {
    DurationByHour,
    PassengerDistribution,
    PickupLocations,
    VendorSummary,
    /// Trips filtered by distance and pickup time
    Search,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn clean(config: &EtlConfig, input: &Path, outputs: &OutputPaths, chunk_size: usize) -> Result<()> {
    let runner = ChunkedPipelineRunner::from_config(config);
    let manifest = runner
        .run_to_files(&TripSource::new(input), chunk_size, outputs)
        .with_context(|| format!("cleaning {}", input.display()))?;
    print_json(&manifest.summary)
}

fn load(database: &Path, cleaned: &Path, manifest: &Path, force: bool) -> Result<()> {
    let mut store = TripStore::open(database)
        .with_context(|| format!("opening database {}", database.display()))?;
    let report = if force {
        warn!("--force given, loading {} without checking the run manifest", cleaned.display());
        store.load_cleaned_file(cleaned)
    } else {
        store.load_completed_run(cleaned, manifest)
    }
    .with_context(|| format!("loading {}", cleaned.display()))?;
    print_json(&report)
}

fn report(database: &Path, kind: ReportKind, filter: &TripFilter) -> Result<()> {
    let store = TripStore::open(database)
        .with_context(|| format!("opening database {}", database.display()))?;
    match kind {
        ReportKind::DurationByHour => print_json(&store.duration_by_hour()?),
        ReportKind::PassengerDistribution => print_json(&store.passenger_distribution()?),
        ReportKind::PickupLocations => print_json(&store.pickup_locations()?),
        ReportKind::VendorSummary => print_json(&store.vendor_summary()?),
        ReportKind::Search => print_json(&store.search_trips(filter)?),
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = EtlConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let _log_guard = init_logging(&config.paths.log_dir);
    match &config.source {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("Using built-in configuration defaults"),
    }
    metrics::init_metrics();

    let outcome = match cli.command {
        Commands::Clean {
            input,
            clean_out,
            excluded_out,
            chunk_size,
        } => {
            let input = input.unwrap_or_else(|| config.paths.raw_file.clone());
            let mut outputs = OutputPaths::from(&config.paths);
            if let Some(path) = clean_out {
                outputs.cleaned = path;
            }
            if let Some(path) = excluded_out {
                outputs.excluded = path;
            }
            let chunk_size = chunk_size.unwrap_or(config.pipeline.chunk_size);
            clean(&config, &input, &outputs, chunk_size)
        }
        Commands::Load {
            cleaned,
            database,
            force,
        } => {
            let cleaned = cleaned.unwrap_or_else(|| config.paths.clean_file.clone());
            let database = database.unwrap_or_else(|| config.paths.database.clone());
            load(&database, &cleaned, &config.paths.manifest, force)
        }
        Commands::Run { input, chunk_size } => {
            let input = input.unwrap_or_else(|| config.paths.raw_file.clone());
            let outputs = OutputPaths::from(&config.paths);
            let chunk_size = chunk_size.unwrap_or(config.pipeline.chunk_size);
            clean(&config, &input, &outputs, chunk_size)
                .and_then(|_| load(&config.paths.database, &outputs.cleaned, &outputs.manifest, false))
        }
        Commands::Anomalies {
            cleaned,
            threshold,
            column,
        } => {
            let cleaned = cleaned.unwrap_or_else(|| config.paths.clean_file.clone());
            let detector =
                AnomalyDetector::new(threshold.unwrap_or(config.policy.anomaly_z_threshold));
            read_numeric_column(&cleaned, &column)
                .with_context(|| format!("reading {} from {}", column, cleaned.display()))
                .and_then(|values| {
                    let report = detector.report(&values);
                    info!(
                        "{} of {} values in '{}' exceed z={}",
                        report.anomaly_count, report.sample_size, column, report.threshold
                    );
                    print_json(&report)
                })
        }
        Commands::Report {
            kind,
            database,
            min_km,
            max_km,
            start,
            end,
            limit,
        } => {
            let database = database.unwrap_or_else(|| config.paths.database.clone());
            let defaults = TripFilter::default();
            let filter = TripFilter {
                min_distance_km: min_km.unwrap_or(defaults.min_distance_km),
                max_distance_km: max_km.unwrap_or(defaults.max_distance_km),
                start: start.unwrap_or(defaults.start),
                end: end.unwrap_or(defaults.end),
                limit: limit.unwrap_or(defaults.limit),
            };
            report(&database, kind, &filter)
        }
    };

    if let Some(path) = cli.metrics_out.as_deref() {
        if let Err(e) = metrics::write_snapshot(path) {
            warn!("Could not write metrics snapshot: {}", e);
        }
    }
    outcome
}
