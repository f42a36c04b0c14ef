// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Siphon: request-log redaction and shipping
//
//  Input:     JSON-lines log records (file or stdin)
//  Pipeline:  validate → sanitize → batch → POST to collector
//  Config:    YAML file + SIPHON_* environment overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Context;
use clap::Parser;
use siphon_core::config::SiphonConfig;
use siphon_core::record::LogRecord;
use siphon_observability::batcher::{BatchConfig, Shipper, ShipperError};
use siphon_observability::delivery::Delivery;
use siphon_observability::metrics::ShipperMetrics;
use siphon_observability::sanitizer::Sanitizer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "siphon", version, about = "Siphon: redact, batch and ship request logs")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/siphon/siphon.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// JSON-lines file of log records, `-` for stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Print shipper metrics in Prometheus text format on exit
    #[arg(long)]
    print_metrics: bool,
}

#[derive(Debug, Default)]
struct ReplayStats {
    read: u64,
    invalid: u64,
    rejected: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Siphon starting");

    // ── Config ──
    let config = if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config file");
        SiphonConfig::load(&cli.config)?
    } else {
        info!("No config file found, using defaults");
        SiphonConfig::default()
    };

    if !config.collector.is_enabled() {
        warn!("Collector URL or API key not set, batches will be discarded");
    }

    // ── Pipeline ──
    let sanitizer = Sanitizer::from_config(&config.masking);
    let delivery = Delivery::from_config(&config.collector).context("collector setup failed")?;
    let metrics = Arc::new(ShipperMetrics::new(true)?);
    let shipper = Shipper::spawn(
        BatchConfig::from(&config.shipper),
        delivery,
        Arc::clone(&metrics),
    );

    info!(
        max_batch_size_bytes = config.shipper.max_batch_size_bytes,
        max_record_age_ms = config.shipper.max_record_age_ms,
        "Siphon is ready, reading records"
    );

    // ── Replay until EOF or Ctrl-C ──
    let reader = open_input(&cli.input).await?;
    let mut stats = ReplayStats::default();
    tokio::select! {
        result = replay(reader, &sanitizer, &shipper, &mut stats) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    // ── Flush and wait for in-flight deliveries ──
    shipper.shutdown().await;

    info!(
        read = stats.read,
        invalid = stats.invalid,
        rejected = stats.rejected,
        enqueued = metrics.enqueued(),
        "Siphon stopped"
    );

    if cli.print_metrics {
        print!("{}", metrics.render());
    }
    Ok(())
}

async fn open_input(input: &str) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let path = Path::new(input);
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

async fn replay(
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    sanitizer: &Sanitizer,
    shipper: &Shipper,
    stats: &mut ReplayStats,
) -> anyhow::Result<()> {
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        stats.read += 1;

        let record = match LogRecord::from_json(line.as_bytes()) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no, error = %e, kind = e.kind(), "Skipping invalid record");
                stats.invalid += 1;
                continue;
            }
        };

        match shipper.enqueue(sanitizer.sanitize(record)).await {
            Ok(()) => {}
            Err(ShipperError::QueueFull) => stats.rejected += 1,
            Err(ShipperError::Closed) => break,
        }
    }
    Ok(())
}
