//! # CLI Module
//!
//! Command-line interface for the duplicate-image finder.
//!
//! ## Usage
//! ```bash
//! # Compare every image under a directory
//! image-dups --dir ~/Photos
//!
//! # More workers, stricter distance, skip mirrored comparisons
//! image-dups --dir ~/Photos --threads 4 --distance 5 --dedup-pairs
//! ```
//!
//! Duplicate pairs land in a JSON delete log for human verification;
//! nothing is ever removed automatically.

use clap::Parser;
use console::style;
use crossbeam_channel::{never, select, Receiver};
use image_dup_finder::core::{cancel_channel, Canceller, Engine, EngineConfig};
use image_dup_finder::report::DeleteLog;
use image_dup_finder::Result;
use indicatif::ProgressBar;
use prometheus::{Encoder, Registry, TextEncoder};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Metric namespace for everything this binary registers
const NAMESPACE: &str = "imagedup";

/// Find near-duplicate images and log them for verified deletion
#[derive(Parser, Debug)]
#[command(name = "image-dups")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory to scan for images (recursively)
    #[arg(short, long)]
    dir: PathBuf,

    /// Number of differ workers (clamped to available cores - 1)
    #[arg(long, default_value = "1")]
    threads: usize,

    /// Max Hamming distance for two images to count as duplicates
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(0..=64))]
    distance: u32,

    /// Skip the reverse ordering of already-compared pairs.
    /// Halves the comparisons but costs memory per emitted pair.
    #[arg(long)]
    dedup_pairs: bool,

    /// Hash cache location, reused across runs
    #[arg(long, default_value = "hashcache.json")]
    cache_file: PathBuf,

    /// Where to write the delete log
    #[arg(long, default_value = "dupes.json")]
    delete_log: PathBuf,

    /// Print gathered metrics in Prometheus text format on exit
    #[arg(long)]
    dump_metrics: bool,
}

/// Run the CLI
pub fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let start = Instant::now();

    let files = list_images(&cli.dir);
    info!(images = files.len(), dir = %cli.dir.display(), "found images");

    let registry = Registry::new();
    let mut engine = Engine::new(
        EngineConfig {
            namespace: NAMESPACE.to_string(),
            cache_path: cli.cache_file.clone(),
            num_workers: cli.threads,
            num_files: files.len(),
            threshold: cli.distance,
            dedup_pairs: cli.dedup_pairs,
        },
        &registry,
    )?;

    let (canceller, token) = cancel_channel();
    install_ctrlc_handler(canceller);

    let mut log = DeleteLog::create(&cli.delete_log)?;
    let (results, errors) = engine.run(&token, files);

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(120));

    let failures = drain(results, errors, &mut log, &spinner)?;
    spinner.finish_and_clear();

    if cli.dump_metrics {
        dump_metrics(&registry);
    }

    engine.shutdown()?;
    let found = log.len();
    log.close()?;

    println!(
        "{} {} duplicate pairs, {} failed files, in {:.1?}",
        style("Found").green().bold(),
        found,
        failures,
        start.elapsed()
    );
    println!("Delete log written to {}", cli.delete_log.display());

    Ok(())
}

/// Drain both engine channels until they close, appending duplicates to
/// the delete log. Returns the number of failed files.
fn drain(
    results: Receiver<image_dup_finder::core::DuplicatePair>,
    errors: Receiver<image_dup_finder::error::DiffError>,
    log: &mut DeleteLog,
    spinner: &ProgressBar,
) -> Result<usize> {
    let mut results = results;
    let mut errors = errors;
    let mut results_open = true;
    let mut errors_open = true;
    let mut failures = 0usize;

    while results_open || errors_open {
        select! {
            recv(results) -> msg => match msg {
                Ok(dup) => {
                    log.append(&dup.big, &dup.small)?;
                    spinner.set_message(format!("{} duplicate pairs", log.len()));
                }
                Err(_) => results_open = false,
            },
            recv(errors) -> msg => match msg {
                Ok(error) => {
                    failures += 1;
                    warn!(%error, "comparison failed");
                }
                Err(_) => errors_open = false,
            },
        }
        // a closed channel would keep the select busy; park it instead
        if !results_open {
            results = never();
        }
        if !errors_open {
            errors = never();
        }
    }

    Ok(failures)
}

/// Cancel the run on the first ctrl-c; later presses are ignored while
/// shutdown completes.
fn install_ctrlc_handler(canceller: Canceller) {
    let slot = Mutex::new(Some(canceller));
    if let Err(error) = ctrlc::set_handler(move || {
        if let Some(canceller) = slot.lock().expect("ctrl-c slot poisoned").take() {
            info!("interrupt received, shutting down");
            canceller.cancel();
        }
    }) {
        warn!(%error, "could not install ctrl-c handler");
    }
}

fn dump_metrics(registry: &Registry) {
    let mut buffer = Vec::new();
    if TextEncoder::new().encode(&registry.gather(), &mut buffer).is_ok() {
        print!("{}", String::from_utf8_lossy(&buffer));
    }
}

/// Recursively list the images under `root`, sorted for a deterministic
/// comparison schedule
fn list_images(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_image_extension(path))
        .collect();
    files.sort();
    files
}

fn has_image_extension(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("jpg" | "jpeg" | "png" | "webp")
    )
}
