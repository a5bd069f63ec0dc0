//! Pipeline orchestration.
//!
//! A run has three phases:
//! 1. **Discovery** (driver thread, sequential): for each symbol, walk back
//!    month by month from the newest period, fetching archives. The first
//!    `NotFound` ends that symbol's walk. Every fetched archive is handed to
//!    the worker pool for extraction right away.
//! 2. **Extraction barrier**: once every symbol has been discovered, wait on
//!    each symbol's extraction tracker.
//! 3. **Merge**: one merge task per symbol on the same pool, one tracker for
//!    all of them. After it clears, the manifest is written and the working
//!    directories are removed per the clear flags.
//!
//! Failed units are logged and counted; none of them stop the run.

use crate::error::PipelineError;
use crate::extract::{run_extraction, ExtractContext, ExtractStats};
use crate::manifest::RunManifest;
use crate::merge::{run_merge, MergeContext, MergeReport};
use crate::progress::PipelineProgress;
use crate::tracker::CompletionTracker;
use klinevault_core::{
    ArchiveProvider, ArchiveTask, FetchOutcome, Layout, Period, PipelineConfig,
};
use rayon::ThreadPool;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// How one symbol fared across all three phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolSummary {
    pub symbol: String,
    /// Archives handed to extraction.
    pub dispatched: usize,
    /// First month the provider had nothing for.
    pub boundary: Option<Period>,
    /// Discovery stopped on this fetch error instead of a boundary.
    pub fetch_error: Option<String>,
    pub extraction_failures: usize,
    pub rows_kept: u64,
    /// `None` when the merge failed.
    pub merge: Option<MergeReport>,
}

impl SymbolSummary {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            dispatched: 0,
            boundary: None,
            fetch_error: None,
            extraction_failures: 0,
            rows_kept: 0,
            merge: None,
        }
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub symbols: Vec<SymbolSummary>,
    pub extraction_failures: usize,
    pub merge_failures: usize,
    pub manifest_written: bool,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.extraction_failures == 0
            && self.merge_failures == 0
            && self.symbols.iter().all(|s| s.fetch_error.is_none())
    }

    pub fn archives_dispatched(&self) -> usize {
        self.symbols.iter().map(|s| s.dispatched).sum()
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolSummary> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }
}

pub struct Pipeline<'a> {
    config: PipelineConfig,
    layout: Layout,
    provider: &'a dyn ArchiveProvider,
    progress: &'a dyn PipelineProgress,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: PipelineConfig,
        provider: &'a dyn ArchiveProvider,
        progress: &'a dyn PipelineProgress,
    ) -> Self {
        let layout = config.layout();
        Self {
            config,
            layout,
            provider,
            progress,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Run all three phases for `symbols`.
    ///
    /// Only failing to start the worker pool is an error; everything else is
    /// reported in the summary.
    pub fn run(&self, symbols: &[String]) -> Result<RunSummary, PipelineError> {
        let symbols = unique_symbols(symbols);
        let pool = self.build_pool()?;
        info!(
            provider = self.provider.name(),
            symbols = symbols.len(),
            granularity = %self.config.granularity,
            interval = self.config.interval,
            workers = pool.current_num_threads(),
            "pipeline starting"
        );

        let extract_ctx = Arc::new(ExtractContext {
            layout: self.layout.clone(),
            interval: self.config.interval,
            clear_downloads: self.config.clear_downloads,
        });

        let mut pending = Vec::with_capacity(symbols.len());
        for (index, symbol) in symbols.iter().enumerate() {
            self.progress.on_symbol_start(symbol, index, symbols.len());
            let mut tracker = CompletionTracker::new(format!("extract {symbol}"), 0);
            let summary = self.discover(symbol, &pool, &extract_ctx, &mut tracker);
            pending.push((summary, tracker));
        }

        let mut summaries = Vec::with_capacity(pending.len());
        let mut extraction_failures = 0;
        for (mut summary, tracker) in pending {
            let outcome = tracker.wait(self.config.debug);
            summary.extraction_failures = outcome.failed();
            summary.rows_kept = outcome.values.iter().map(|s: &ExtractStats| s.rows_kept).sum();
            extraction_failures += outcome.failed();
            summaries.push(summary);
        }

        let reports = self.merge_all(&pool, &summaries);
        let merge_failures = summaries.len() - reports.len();
        for summary in &mut summaries {
            summary.merge = reports.iter().find(|r| r.symbol == summary.symbol).cloned();
        }

        let manifest_written = match self.write_manifest(reports) {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e.describe(self.config.debug));
                false
            }
        };

        if let Err(e) = self.clear_cache() {
            warn!("{}", e.describe(self.config.debug));
        }

        let summary = RunSummary {
            symbols: summaries,
            extraction_failures,
            merge_failures,
            manifest_written,
        };
        self.progress.on_run_complete(&summary);
        Ok(summary)
    }

    /// Remove the downloads and extracts roots as the clear flags ask.
    pub fn clear_cache(&self) -> Result<(), PipelineError> {
        if self.config.clear_downloads {
            remove_tree(&self.layout.downloads_root())?;
        }
        if self.config.clear_extracts {
            remove_tree(&self.layout.extracts_root())?;
        }
        Ok(())
    }

    fn build_pool(&self) -> Result<ThreadPool, PipelineError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_workers.max(1))
            .thread_name(|i| format!("klinevault-worker-{i}"))
            // A panicking task drops its reporter, which reports it as abandoned.
            .panic_handler(|_| error!("pipeline worker panicked"))
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))
    }

    /// Walk back from the newest month until the provider runs out.
    fn discover(
        &self,
        symbol: &str,
        pool: &ThreadPool,
        ctx: &Arc<ExtractContext>,
        tracker: &mut CompletionTracker<ExtractStats>,
    ) -> SymbolSummary {
        let mut summary = SymbolSummary::new(symbol);
        let latest = self.config.latest_period();

        for period in Period::walk_back(latest, self.config.earliest_year) {
            let task = ArchiveTask::new(
                symbol,
                &self.config.quote,
                self.config.granularity,
                period,
            );
            let dest = self.layout.archive_path(&task);

            match self.provider.fetch_archive(&task, &dest) {
                Ok(FetchOutcome::NotFound) => {
                    self.progress.on_boundary(symbol, period);
                    summary.boundary = Some(period);
                    return summary;
                }
                Ok(outcome) => {
                    self.progress.on_fetched(symbol, period, &outcome);
                    let reporter = tracker.expect_one(format!("extract {}", task.shard_id()));
                    let ctx = Arc::clone(ctx);
                    pool.spawn(move || run_extraction(task, &ctx, reporter));
                    summary.dispatched += 1;
                }
                Err(e) => {
                    self.progress.on_fetch_failed(symbol, period, &e);
                    summary.fetch_error = Some(e.to_string());
                    return summary;
                }
            }
        }

        info!(
            "{symbol}: reached {} without a missing month",
            self.config.earliest_year
        );
        summary
    }

    fn merge_all(&self, pool: &ThreadPool, summaries: &[SymbolSummary]) -> Vec<MergeReport> {
        let ctx = Arc::new(MergeContext {
            layout: self.layout.clone(),
            quote: self.config.quote.clone(),
            granularity: self.config.granularity,
            interval: self.config.interval,
            clear_extracts: self.config.clear_extracts,
        });

        let tracker = CompletionTracker::new("merge", summaries.len());
        for summary in summaries {
            let reporter = tracker.reporter(format!("merge {}", summary.symbol));
            let symbol = summary.symbol.clone();
            let ctx = Arc::clone(&ctx);
            pool.spawn(move || run_merge(symbol, &ctx, reporter));
        }
        tracker.wait(self.config.debug).values
    }

    fn write_manifest(&self, reports: Vec<MergeReport>) -> Result<(), PipelineError> {
        let path = self.layout.manifest_path();
        let produced: Vec<MergeReport> = reports
            .into_iter()
            .filter(|r| r.output.is_some())
            .collect();
        let previous = match RunManifest::load(&path) {
            Ok(previous) => previous,
            Err(e) => {
                warn!(
                    "{}; writing a fresh manifest",
                    e.describe(self.config.debug)
                );
                None
            }
        };
        if produced.is_empty() && previous.is_none() {
            return Ok(());
        }

        let mut manifest = RunManifest::new(&self.config, produced);
        if let Some(previous) = previous {
            manifest.carry_over(previous);
        }
        manifest.write(&path)
    }
}

/// Symbols in first-seen order, each once. Every symbol has exactly one merger.
fn unique_symbols(symbols: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        if unique.contains(symbol) {
            warn!("{symbol} listed more than once, fetching it once");
        } else {
            unique.push(symbol.clone());
        }
    }
    unique
}

/// Remove a directory tree. A missing tree is not an error.
pub fn remove_tree(path: &Path) -> Result<(), PipelineError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::io(format!("remove {}", path.display()), e)),
    }
}
