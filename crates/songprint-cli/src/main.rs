// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use songprint_application::{IngestService, Matcher, MultiSongScanner, ScanOptions};
use songprint_config::{load as load_config, AppConfig, TelemetryConfig};
use songprint_domain::{format_position, SongInterval};
use songprint_fingerprint::{
    decoder::decode_file, AudioSource, FileAudioSource, Fingerprinter, SampleBuffer,
};
use songprint_infrastructure::{init_database, SqliteFingerprintIndex};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "songprint")]
#[command(author, version, about = "Landmark audio fingerprinting", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint a known song and add it to the index
    Ingest {
        file: PathBuf,
        #[arg(long)]
        title: String,
    },

    /// Identify a clip
    Identify {
        file: PathBuf,
        /// Seconds to skip before the clip starts
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        /// Clip length in seconds, defaults to the rest of the file
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Find every known song in a long recording
    Scan {
        file: PathBuf,
        /// Window length in seconds
        #[arg(long)]
        segment: Option<f64>,
        /// Seconds shared by consecutive windows
        #[arg(long)]
        overlap: Option<f64>,
        /// Minimum votes for a window to count
        #[arg(long)]
        min_confidence: Option<u32>,
    },

    /// List indexed songs
    Songs,
}

#[derive(Serialize)]
struct IntervalReport<'a> {
    #[serde(flatten)]
    interval: &'a SongInterval,
    start: String,
    end: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.telemetry);

    tokio::select! {
        result = run(cli.command, config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!(target: "cli", "interrupted, stopping");
            Ok(())
        }
    }
}

async fn run(command: Commands, config: AppConfig) -> Result<()> {
    let pool = init_database(&config.database).await?;
    let index = Arc::new(SqliteFingerprintIndex::new(pool));
    let fingerprinter = Arc::new(Fingerprinter::new(config.fingerprint.clone())?);
    let sample_rate = config.fingerprint.sample_rate;

    match command {
        Commands::Ingest { file, title } => {
            let buffer = decode(&file, sample_rate).await?;
            let service = IngestService::new(fingerprinter, index);
            let ingested = service.ingest(&title, &buffer).await?;
            print_json(&ingested)
        }
        Commands::Identify {
            file,
            start,
            duration,
        } => {
            let source = open_source(&file, sample_rate).await?;
            let buffer = tokio::task::spawn_blocking(move || source.load(start, duration))
                .await
                .context("decoder task failed")?
                .context("failed to decode clip")?;
            let matcher = Matcher::new(index, config.matcher)?;
            let outcome = matcher.identify(&fingerprinter, &buffer).await?;
            if let Some(result) = outcome.matched() {
                info!(
                    target: "cli",
                    title = %result.title,
                    position = %result.position_label(),
                    votes = result.confidence,
                    "match found"
                );
            }
            print_json(&outcome)
        }
        Commands::Scan {
            file,
            segment,
            overlap,
            min_confidence,
        } => {
            let options = scan_options(config.scan, segment, overlap, min_confidence);
            let matcher = Arc::new(Matcher::new(index, config.matcher)?);
            let scanner = MultiSongScanner::new(fingerprinter, matcher, options)?;

            let source: Arc<dyn AudioSource> = Arc::new(open_source(&file, sample_rate).await?);
            let intervals = scanner.scan(source).await?;

            let report: Vec<IntervalReport<'_>> = intervals
                .iter()
                .map(|interval| IntervalReport {
                    interval,
                    start: format_position(interval.start_time),
                    end: format_position(interval.end_time),
                })
                .collect();
            print_json(&report)
        }
        Commands::Songs => {
            let songs = index.list_songs().await?;
            info!(
                target: "cli",
                songs = songs.len(),
                fingerprints = index.fingerprint_count().await?,
                "index contents"
            );
            print_json(&songs)
        }
    }
}

fn scan_options(
    base: ScanOptions,
    segment: Option<f64>,
    overlap: Option<f64>,
    min_confidence: Option<u32>,
) -> ScanOptions {
    ScanOptions {
        segment_duration: segment.unwrap_or(base.segment_duration),
        overlap: overlap.unwrap_or(base.overlap),
        min_confidence: min_confidence.unwrap_or(base.min_confidence),
        ..base
    }
}

async fn decode(path: &Path, sample_rate: u32) -> Result<SampleBuffer> {
    let path = path.to_path_buf();
    let shown = path.display().to_string();
    let buffer = tokio::task::spawn_blocking(move || decode_file(&path, sample_rate))
        .await
        .context("decoder task failed")?
        .with_context(|| format!("failed to decode {}", shown))?;
    info!(target: "cli", file = %shown, seconds = buffer.duration(), "decoded audio");
    Ok(buffer)
}

/// Probe a file for windowed decoding without reading its audio.
async fn open_source(path: &Path, sample_rate: u32) -> Result<FileAudioSource> {
    let path = path.to_path_buf();
    let shown = path.display().to_string();
    let source = tokio::task::spawn_blocking(move || FileAudioSource::open(&path, sample_rate))
        .await
        .context("decoder task failed")?
        .with_context(|| format!("failed to open {}", shown))?;
    info!(target: "cli", file = %shown, seconds = source.total_duration(), "opened audio");
    Ok(source)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(telemetry: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&telemetry.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout carries results; logs go to stderr
    if telemetry.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
