// ██████╗ ██╗      ██████╗  ██████╗ ███╗   ███╗
// ██╔══██╗██║     ██╔═══██╗██╔═══██╗████╗ ████║
// ██████╔╝██║     ██║   ██║██║   ██║██╔████╔██║
// ██╔══██╗██║     ██║   ██║██║   ██║██║╚██╔╝██║
// ██████╔╝███████╗╚██████╔╝╚██████╔╝██║ ╚═╝ ██║
// ╚═════╝ ╚══════╝ ╚═════╝  ╚═════╝ ╚═╝     ╚═╝
//
// D E D U P
//
// Ten million prediction records. One question per record: seen it before?
// Ask a HashSet and pay in RAM. Ask a Bloom filter and pay in certainty.
// This binary lets you run both and compare the bill.

mod bitarray;
mod bloom;
mod codec;
mod config;
mod dedup;
mod error;
mod fingerprint;
mod generator;
mod memory;
mod metrics;
mod models;
mod scanner;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::bloom::BloomFilter;
use crate::codec::{RecordReader, RecordWriter};
use crate::config::Config;
use crate::dedup::ExactIndex;
use crate::error::DedupError;
use crate::fingerprint::FingerprintDeriver;
use crate::generator::{generate, GeneratorOptions, RecordGenerator};
use crate::scanner::{scan, ScanOptions, ScanSummary, StopSignal};

/// Duplicate detection over a length-delimited record stream, exact or approximate.
#[derive(Parser, Debug)]
#[command(name = "bloom_dedup")]
#[command(about = "Find duplicate records with a hash set or a Bloom filter")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a synthetic record stream
    #[command(name = "generate-file", alias = "gen-file")]
    GenerateFile {
        /// Output path (overrides BLOOM_DEDUP_FILE)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Count duplicates exactly, with a hash set
    #[command(name = "scan-with-exact-index", alias = "find-dup-with-map")]
    ScanWithExactIndex {
        /// Input path (overrides BLOOM_DEDUP_FILE)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Count likely duplicates with a Bloom filter
    #[command(name = "scan-with-bloom-filter", alias = "find-dup-with-filter")]
    ScanWithBloomFilter {
        /// Input path (overrides BLOOM_DEDUP_FILE)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Structure {
    Exact,
    Bloom,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON summary.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env();
    match cli.command {
        Command::GenerateFile { file } => {
            config.file = file.unwrap_or(config.file);
            generate_file(config).await
        }
        Command::ScanWithExactIndex { file } => {
            config.file = file.unwrap_or(config.file);
            run_scan(config, Structure::Exact).await
        }
        Command::ScanWithBloomFilter { file } => {
            config.file = file.unwrap_or(config.file);
            run_scan(config, Structure::Bloom).await
        }
    }
}

async fn generate_file(config: Config) -> Result<()> {
    info!(
        path = %config.file.display(),
        count = config.record_count,
        seed = ?config.seed,
        "Generating record file"
    );

    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut writer = RecordWriter::create(&config.file)
            .with_context(|| format!("failed to create {}", config.file.display()))?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut generator = RecordGenerator::new(rng, Utc::now());
        let options = GeneratorOptions {
            count: config.record_count,
            duplicate_probability: config.duplicate_probability,
            appended_copies: config.appended_copies,
            progress_interval: config.progress_interval,
        };

        let report = generate(&mut writer, &mut generator, &options)?;
        let written = writer.records_written();
        writer.finish()?;
        info!(
            path = %config.file.display(),
            written = written,
            intentional_duplicates = report.intentional_duplicates,
            memory = %memory::snapshot(),
            "Record file written"
        );
        Ok(())
    })
    .await
    .context("generator task panicked")?
}

async fn run_scan(config: Config, structure: Structure) -> Result<()> {
    let stop = StopSignal::new();
    spawn_stop_watchers(&stop, config.deadline);

    let options = ScanOptions {
        deriver: FingerprintDeriver::new(config.precision),
        workers: config.workers,
        batch_size: config.batch_size,
        progress_interval: config.progress_interval,
        stop,
    };
    info!(
        path = %config.file.display(),
        structure = ?structure,
        precision = %options.deriver.precision(),
        workers = options.workers,
        "Scanning record file"
    );

    let summary = tokio::task::spawn_blocking(move || scan_file(&config, structure, &options))
        .await
        .context("scan task panicked")??;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn scan_file(config: &Config, structure: Structure, options: &ScanOptions) -> Result<ScanSummary> {
    let mut reader = RecordReader::open(&config.file)
        .with_context(|| format!("failed to open {}", config.file.display()))?;

    let summary = match structure {
        Structure::Exact => {
            let index = ExactIndex::with_capacity(config.exact_capacity);
            let summary =
                scan(&mut reader, &index, options).map_err(|e| scan_failure(e, &config.file))?;
            if index.is_empty() {
                warn!(path = %config.file.display(), "Record stream held no records");
            }
            info!(distinct_keys = index.len(), "Exact index final state");
            summary
        }
        Structure::Bloom => {
            let filter =
                BloomFilter::new(config.bloom_expected_items, config.bloom_false_positive_rate)?;
            let summary =
                scan(&mut reader, &filter, options).map_err(|e| scan_failure(e, &config.file))?;
            info!(
                fill_ratio = filter.fill_ratio(),
                estimated_fp_rate = filter.estimated_false_positive_rate(summary.records_scanned),
                "Bloom filter final state"
            );
            summary
        }
    };

    info!(
        records = reader.records_read(),
        bytes = reader.bytes_read(),
        "Record stream consumed"
    );
    Ok(summary)
}

/// Tell a damaged input file apart from a scan that broke on its own.
fn scan_failure(err: DedupError, path: &Path) -> anyhow::Error {
    let context = if err.is_stream_read() {
        format!("record stream {} is damaged or unreadable", path.display())
    } else {
        format!("scan of {} aborted", path.display())
    };
    anyhow::Error::new(err).context(context)
}

/// Ctrl+C and the optional deadline both end a scan the same way the end of
/// the file would.
fn spawn_stop_watchers(stop: &StopSignal, deadline: Option<Duration>) {
    let on_interrupt = stop.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping scan");
                on_interrupt.raise();
            }
            Err(err) => error!(error = %err, "Signal listener error"),
        }
    });

    if let Some(limit) = deadline {
        let on_deadline = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!(deadline_secs = limit.as_secs(), "Scan deadline reached, stopping scan");
            on_deadline.raise();
        });
    }
}
