//! grib-batch command-line tool.
//!
//! Resolves many (run date, forecast lead) pairs against one configured
//! model and runs a batch operation over the files that exist:
//! - `search`: which files exist, as a date x lead table
//! - `inventory`: GRIB message listing of every existing file
//! - `download`: whole files, or only the messages matching a search
//! - `read`: decode and merge into one dataset per hypercube
//! - `latest`: most recent run with a published analysis
//!
//! Results are printed to stdout as JSON; logs go to stderr.

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use grib_batch::{DownloadOptions, OpenOptions};
use grib_source::{DownloadConfig, SourceOptions};

#[derive(Parser, Debug)]
#[command(name = "grib-batch")]
#[command(about = "Batch search, download and read of forecast GRIB2 files")]
struct Args {
    /// Configuration directory (contains models/*.yaml and an optional batch.yaml)
    #[arg(long, env = "CONFIG_DIR", default_value = "config", global = true)]
    config_dir: PathBuf,

    /// Model id from the configuration directory
    #[arg(short, long, env = "GRIB_MODEL", default_value = "hrrr", global = true)]
    model: String,

    /// Product to fetch (default: the model's configured product)
    #[arg(short, long, env = "GRIB_PRODUCT", global = true)]
    product: Option<String>,

    /// Source names to probe, in order (default: all, as configured)
    #[arg(long, env = "GRIB_PRIORITY", value_delimiter = ',', global = true)]
    priority: Vec<String>,

    /// Directory for downloaded files
    #[arg(long, env = "GRIB_SAVE_DIR", default_value = "/data/grib", global = true)]
    save_dir: PathBuf,

    /// Concurrent existence probes during resolution
    #[arg(long, env = "GRIB_RESOLVE_WORKERS", global = true)]
    resolve_workers: Option<usize>,

    /// Maximum retry attempts per download
    #[arg(long, default_value = "3", global = true)]
    max_retries: u32,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LogFormat {
    Json,
    Pretty,
}

/// Dates and leads to resolve.
#[derive(ClapArgs, Debug, Clone)]
pub struct Selection {
    /// One date, a comma separated list, or start/end[/freq] (e.g. 2024011500/2024011518/6h)
    #[arg(long)]
    pub dates: String,

    /// One lead, a list ("0,6,12") or a range ("0..=24:6")
    #[arg(long, default_value = "0")]
    pub leads: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report which files exist
    Search {
        #[command(flatten)]
        selection: Selection,
    },
    /// List the GRIB messages of every existing file
    Inventory {
        #[command(flatten)]
        selection: Selection,
        /// Regular expression matched against ":VAR:LEVEL:FORECAST"
        #[arg(long)]
        search: Option<String>,
    },
    /// Download every existing file
    Download {
        #[command(flatten)]
        selection: Selection,
        #[arg(long)]
        search: Option<String>,
        /// Concurrent downloads
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        overwrite: bool,
    },
    /// Decode every existing file and merge into hypercubes
    Read {
        #[command(flatten)]
        selection: Selection,
        #[arg(long)]
        search: Option<String>,
        /// Concurrent opens (default: one at a time)
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        overwrite: bool,
        /// Delete each local file once it has been read
        #[arg(long)]
        remove_download: bool,
        /// Include data values in the output
        #[arg(long)]
        values: bool,
    },
    /// Find the most recent run whose analysis file exists
    Latest {
        /// Number of candidate runs to probe
        #[arg(long)]
        window: Option<usize>,
        /// Spacing between candidate runs (e.g. "1h", "6h")
        #[arg(long)]
        freq: Option<String>,
    },
}

fn init_tracing(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format);

    let mut batch_config = config::load_batch_config(&args.config_dir)?;
    if let Some(workers) = args.resolve_workers {
        batch_config.resolve_workers = workers;
    }
    batch_config.validate()?;

    let factory = config::build_factory(
        &args.config_dir,
        &args.model,
        SourceOptions {
            product: args.product.clone(),
            priority: args.priority.clone(),
            save_dir: args.save_dir.clone(),
            download: DownloadConfig {
                max_retries: args.max_retries,
                ..Default::default()
            },
        },
    )?;
    info!(
        model = %factory.model(),
        product = %factory.product(),
        sources = ?factory.source_order(),
        "Starting grib-batch"
    );

    let output = match args.command {
        Command::Search { selection } => {
            serde_json::to_value(commands::search(&factory, &selection, &batch_config).await?)?
        }
        Command::Inventory { selection, search } => serde_json::to_value(
            commands::inventory(&factory, &selection, search.as_deref(), &batch_config).await?,
        )?,
        Command::Download {
            selection,
            search,
            workers,
            overwrite,
        } => {
            if let Some(workers) = workers {
                batch_config.download_workers = workers;
            }
            let options = DownloadOptions {
                overwrite,
                save_dir: None,
            };
            serde_json::to_value(
                commands::download(&factory, &selection, search.as_deref(), &options, &batch_config)
                    .await?,
            )?
        }
        Command::Read {
            selection,
            search,
            workers,
            overwrite,
            remove_download,
            values,
        } => {
            if workers.is_some() {
                batch_config.read_workers = workers;
            }
            let options = OpenOptions {
                overwrite,
                remove_download,
            };
            serde_json::to_value(
                commands::read(
                    &factory,
                    &selection,
                    search.as_deref(),
                    &options,
                    values,
                    &batch_config,
                )
                .await?,
            )?
        }
        Command::Latest { window, freq } => {
            if let Some(window) = window {
                batch_config.latest_window = window;
            }
            if let Some(freq) = freq {
                batch_config.latest_frequency = freq.parse()?;
            }
            serde_json::to_value(commands::latest(&factory, &batch_config).await?)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
