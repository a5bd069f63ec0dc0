//! KlineVault CLI — fetch, clean and status commands.
//!
//! Commands:
//! - `fetch` — download monthly kline archives, extract and merge them per symbol
//! - `clean` — remove the downloads and extracts working directories
//! - `status` — report result files, sizes and the last run's manifest

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use klinevault_core::config::{normalize_symbol, resolve_interval};
use klinevault_core::{ArchiveProvider, BinanceVision, Granularity, Layout, PipelineConfig};
use klinevault_runner::{remove_tree, Pipeline, RunManifest, RunSummary, TracingProgress};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "klinevault",
    about = "KlineVault — monthly kline archive downloader and merger"
)]
struct Cli {
    /// Verbose logging and full error causes.
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download, extract and merge every available month for each symbol.
    Fetch {
        /// Base assets to fetch (e.g., BTC ETH). Paired with --quote.
        symbols: Vec<String>,

        /// Fetch every base asset the provider lists against the quote.
        #[arg(long, default_value_t = false, conflicts_with = "symbols")]
        all: bool,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Work root holding downloads/, extracts/ and results/.
        #[arg(long)]
        work_root: Option<PathBuf>,

        /// Quote currency (e.g., USDT).
        #[arg(long)]
        quote: Option<String>,

        /// Kline granularity: 1s, 1m, 3m, 5m, 15m, 30m, 1h, 2h, 4h, 6h, 8h, 12h, 1d.
        #[arg(long)]
        granularity: Option<String>,

        /// Keep one row in every N. 0 keeps all rows.
        #[arg(long, allow_negative_numbers = true)]
        interval: Option<i64>,

        /// Delete archives once extracted. When true (the default) the
        /// downloads directory is also emptied before the run, which discards
        /// cached archives and partial transfers that could otherwise resume.
        #[arg(long, value_name = "BOOL")]
        clear_downloads: Option<bool>,

        /// Delete shards once merged. When true (the default) the extracts
        /// directory is also emptied before the run.
        #[arg(long, value_name = "BOOL")]
        clear_extracts: Option<bool>,

        /// Worker threads for extraction and merge.
        #[arg(long)]
        workers: Option<usize>,

        /// Skip checksum verification of downloaded archives.
        #[arg(long, default_value_t = false)]
        no_verify: bool,
    },
    /// Remove working directories. Without flags, removes both.
    Clean {
        /// Work root. Defaults to ./data.
        #[arg(long, default_value = "data")]
        work_root: PathBuf,

        /// Remove downloaded archives.
        #[arg(long, default_value_t = false)]
        downloads: bool,

        /// Remove extracted shards.
        #[arg(long, default_value_t = false)]
        extracts: bool,
    },
    /// Report result files and the manifest of the last run.
    Status {
        /// Work root. Defaults to ./data.
        #[arg(long, default_value = "data")]
        work_root: PathBuf,
    },
}

struct FetchArgs {
    symbols: Vec<String>,
    all: bool,
    config: Option<PathBuf>,
    work_root: Option<PathBuf>,
    quote: Option<String>,
    granularity: Option<String>,
    interval: Option<i64>,
    clear_downloads: Option<bool>,
    clear_extracts: Option<bool>,
    workers: Option<usize>,
    no_verify: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Fetch {
            symbols,
            all,
            config,
            work_root,
            quote,
            granularity,
            interval,
            clear_downloads,
            clear_extracts,
            workers,
            no_verify,
        } => run_fetch(
            FetchArgs {
                symbols,
                all,
                config,
                work_root,
                quote,
                granularity,
                interval,
                clear_downloads,
                clear_extracts,
                workers,
                no_verify,
            },
            cli.debug,
        ),
        Commands::Clean {
            work_root,
            downloads,
            extracts,
        } => run_clean(&work_root, downloads, extracts),
        Commands::Status { work_root } => run_status(&work_root),
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "klinevault=debug,klinevault_core=debug,klinevault_runner=debug"
    } else {
        "klinevault=info,klinevault_core=info,klinevault_runner=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn run_fetch(args: FetchArgs, verbose: bool) -> Result<()> {
    let config = build_config(&args, verbose)?;
    let provider = BinanceVision::new(config.verify_checksums)
        .context("failed to build HTTP client")?;

    let symbols = if args.all {
        provider
            .list_symbols(&config.quote)
            .with_context(|| format!("failed to list symbols quoted in {}", config.quote))?
    } else {
        validated_symbols(&provider, &args.symbols, &config.quote)
    };
    if symbols.is_empty() {
        bail!("no valid symbols to fetch");
    }

    info!(
        "fetching {} symbol(s) quoted in {} at {} into {}",
        symbols.len(),
        config.quote,
        config.granularity,
        config.work_root.display()
    );

    let progress = TracingProgress;
    let pipeline = Pipeline::new(config, &provider, &progress);
    // Start from empty working dirs when the clear flags are set.
    if let Err(e) = pipeline.clear_cache() {
        warn!("{}", e.describe(verbose));
    }

    let summary = pipeline.run(&symbols)?;
    print_summary(&summary, pipeline.layout(), &pipeline.config().quote);
    Ok(())
}

/// Config file (if any), then command-line overrides.
fn build_config(args: &FetchArgs, verbose: bool) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let (config, warnings) = PipelineConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            for warning in warnings {
                warn!("{warning}");
            }
            config
        }
        None => PipelineConfig::default(),
    };

    if let Some(root) = &args.work_root {
        config.work_root = root.clone();
    }
    if let Some(quote) = &args.quote {
        let quote = normalize_symbol(quote);
        if quote.is_empty() {
            warn!("--quote left blank, keeping '{}'", config.quote);
        } else {
            config.quote = quote;
        }
    }
    if let Some(raw) = &args.granularity {
        let (granularity, warning) = Granularity::resolve(raw);
        if let Some(warning) = warning {
            warn!("{warning}");
        }
        config.granularity = granularity;
    }
    if let Some(raw) = args.interval {
        let (interval, warning) = resolve_interval(raw);
        if let Some(warning) = warning {
            warn!("{warning}");
        }
        config.interval = interval;
    }
    if let Some(v) = args.clear_downloads {
        config.clear_downloads = v;
    }
    if let Some(v) = args.clear_extracts {
        config.clear_extracts = v;
    }
    if let Some(workers) = args.workers {
        config.max_workers = workers.max(1);
    }
    if args.no_verify {
        config.verify_checksums = false;
    }
    config.debug |= verbose;
    Ok(config)
}

/// Normalize, de-duplicate and keep only pairs the provider trades.
fn validated_symbols(provider: &dyn ArchiveProvider, raw: &[String], quote: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.iter().map(|s| normalize_symbol(s)) {
        if symbol.is_empty() || symbols.contains(&symbol) {
            continue;
        }
        match provider.validate_pair(&symbol, quote) {
            Ok(true) => symbols.push(symbol),
            Ok(false) => warn!("{symbol}{quote} is not a trading pair, skipping {symbol}"),
            Err(e) => warn!("could not validate {symbol}{quote}, skipping {symbol}: {e}"),
        }
    }
    symbols
}

fn run_clean(work_root: &Path, downloads: bool, extracts: bool) -> Result<()> {
    let layout = Layout::new(work_root);
    let both = !downloads && !extracts;

    let mut targets = Vec::new();
    if downloads || both {
        targets.push(layout.downloads_root());
    }
    if extracts || both {
        targets.push(layout.extracts_root());
    }

    for dir in targets {
        let size = dir_size(&dir);
        remove_tree(&dir)?;
        println!("Removed {} ({})", dir.display(), format_size(size));
    }
    Ok(())
}

fn run_status(work_root: &Path) -> Result<()> {
    let layout = Layout::new(work_root);
    let results = layout.results_dir();
    if !results.exists() {
        println!("No results under {}", work_root.display());
        return Ok(());
    }

    let mut files: Vec<(String, u64)> = Vec::new();
    for entry in std::fs::read_dir(&results)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".csv") {
            files.push((name, entry.metadata()?.len()));
        }
    }
    files.sort();

    let total: u64 = files.iter().map(|(_, size)| size).sum();
    println!("Results:   {}", results.display());
    println!("Files:     {}", files.len());
    println!("Size:      {}", format_size(total));
    println!(
        "Working:   downloads {}, extracts {}",
        format_size(dir_size(&layout.downloads_root())),
        format_size(dir_size(&layout.extracts_root()))
    );

    let manifest = match RunManifest::load(&layout.manifest_path()) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!("{e}");
            None
        }
    };

    println!();
    if let Some(m) = &manifest {
        println!(
            "Manifest:  {} {} interval {} (generated {})",
            m.quote,
            m.granularity,
            m.interval,
            m.generated_at.format("%Y-%m-%d %H:%M UTC")
        );
    }
    println!(
        "{:<16} {:>10} {:>10} {:<35} {:>5}",
        "File", "Size", "Rows", "Range", "Gaps"
    );
    println!("{}", "-".repeat(80));
    for (name, size) in &files {
        let report = manifest.as_ref().and_then(|m| {
            m.symbols.iter().find(|r| {
                r.output
                    .as_ref()
                    .and_then(|p| p.file_name())
                    .is_some_and(|f| f.to_string_lossy() == name.as_str())
            })
        });
        match report {
            Some(r) => println!(
                "{:<16} {:>10} {:>10} {:<35} {:>5}",
                name,
                format_size(*size),
                r.rows,
                format_range(r.first_open_time, r.last_open_time),
                r.gaps.len()
            ),
            None => println!("{:<16} {:>10} {:>10} {:<35} {:>5}", name, format_size(*size), "-", "-", "-"),
        }
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, layout: &Layout, quote: &str) {
    println!();
    println!("=== Fetch Summary ===");
    println!(
        "{:<10} {:>8} {:>8} {:>8} {:>10} {:>5}  Note",
        "Symbol", "Months", "Failed", "Merged", "Rows", "Gaps"
    );
    for s in &summary.symbols {
        let (merged, rows, gaps) = match &s.merge {
            Some(m) => (m.shards_merged.to_string(), m.rows.to_string(), m.gaps.len().to_string()),
            None => ("FAIL".to_string(), "-".to_string(), "-".to_string()),
        };
        let note = match (&s.fetch_error, s.boundary) {
            (Some(e), _) => format!("stopped: {e}"),
            (None, Some(p)) => format!("history starts after {p}"),
            (None, None) => String::new(),
        };
        println!(
            "{:<10} {:>8} {:>8} {:>8} {:>10} {:>5}  {}",
            s.symbol, s.dispatched, s.extraction_failures, merged, rows, gaps, note
        );
    }
    println!();
    for s in summary.symbols.iter().filter(|s| s.merge.as_ref().is_some_and(|m| m.output.is_some())) {
        println!("  {}", layout.result_path(&s.symbol, quote).display());
    }
    if summary.all_succeeded() {
        println!("Finished: all units succeeded");
    } else {
        println!(
            "Finished with {} extraction and {} merge failure(s); see log for details",
            summary.extraction_failures, summary.merge_failures
        );
    }
}

fn format_range(first: Option<u64>, last: Option<u64>) -> String {
    let fmt = |ms: u64| {
        i64::try_from(ms)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| ms.to_string())
    };
    match (first, last) {
        (Some(a), Some(b)) => format!("{} .. {}", fmt(a), fmt(b)),
        _ => "-".to_string(),
    }
}

/// Total size of all files below `path`.
fn dir_size(path: &Path) -> u64 {
    let mut size = 0u64;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            match entry.metadata() {
                Ok(meta) if meta.is_dir() => size += dir_size(&entry.path()),
                Ok(meta) => size += meta.len(),
                Err(_) => {}
            }
        }
    }
    size
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
