//! Revscrape: concurrent Google Maps review scraper
//!
//! Reads a place list, fans it out over proxy-bound browser workers and
//! appends every extracted review to a CSV file.

use anyhow::Result;
use clap::Parser;
use revscrape::config::{Config, LogFormat};
use revscrape::input::{load_places, load_proxies};
use revscrape::scraping::driver::SessionDriver;
use revscrape::scraping::proxy::ProxyPool;
use revscrape::scraping::retry::RetryController;
use revscrape::scraping::scheduler::Scheduler;
use revscrape::scraping::sink::ReviewSink;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "revscrape")]
#[command(about = "Collect Google Maps reviews for a list of places")]
#[command(version)]
struct Cli {
    /// Place list CSV (place_id and name columns required)
    #[arg(short, long)]
    input: PathBuf,

    /// Output CSV path; appended to across runs
    #[arg(short, long)]
    out: PathBuf,

    /// Worker count; capped by the proxy count when proxies are supplied
    #[arg(short, long, default_value = "1")]
    threads: usize,

    /// Proxy list, one URI per line; a missing file means no proxies
    #[arg(short, long, default_value = "proxies.txt")]
    proxies: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep a worker running unproxied when its proxy fails preflight
    #[arg(long)]
    fallback_no_proxy: bool,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    init_logging(&config, cli.verbose)?;

    let places = load_places(&cli.input)?;
    if places.is_empty() {
        anyhow::bail!("no usable places in '{}'", cli.input.display());
    }

    let proxy_lines = load_proxies(&cli.proxies)?;
    let pool = ProxyPool::from_lines(&proxy_lines)?;

    if let Some(parent) = cli.out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let sink = Arc::new(ReviewSink::open(&cli.out)?);

    let scraper = Arc::new(SessionDriver::new(&config));
    let retry = RetryController::new(config.scrape.max_retries_per_place);
    let scheduler = Scheduler::new(
        scraper,
        sink,
        pool,
        retry,
        cli.threads,
        cli.fallback_no_proxy,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight places");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(
        places = places.len(),
        workers = scheduler.workers(),
        out = %cli.out.display(),
        "starting scrape"
    );
    let summary = scheduler.run(places, shutdown_rx).await?;

    println!("\nScrape complete!");
    println!("================");
    println!("Places total:     {}", summary.places_total);
    println!("Places succeeded: {}", summary.places_succeeded);
    println!("Places failed:    {}", summary.places_failed);
    println!("Records written:  {}", summary.records_written);
    if !summary.failures.is_empty() {
        println!("\nFailed places:");
        for (name, reason) in &summary.failures {
            println!("  {}: {}", name, reason);
        }
    }

    if summary.places_succeeded == 0 && summary.places_failed > 0 {
        anyhow::bail!("every place failed; see log for per-place errors");
    }
    Ok(())
}

/// Verbosity flags override the configured level; an explicit RUST_LOG
/// overrides both.
fn init_logging(config: &Config, verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}
