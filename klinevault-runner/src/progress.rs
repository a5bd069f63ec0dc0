//! Progress callbacks for a pipeline run.

use crate::pipeline::RunSummary;
use klinevault_core::{FetchOutcome, Period, ProviderError};
use tracing::{info, warn};

/// Observer of the discovery phase and the end of the run.
///
/// Callbacks come from the driver thread only.
pub trait PipelineProgress: Send {
    /// Discovery is starting for a symbol.
    fn on_symbol_start(&self, symbol: &str, index: usize, total: usize);

    /// An archive for `period` is on disk and has been dispatched for extraction.
    fn on_fetched(&self, symbol: &str, period: Period, outcome: &FetchOutcome);

    /// The provider has nothing for `period`; discovery for the symbol ends here.
    fn on_boundary(&self, symbol: &str, period: Period);

    /// Fetching `period` failed; discovery for the symbol ends here.
    fn on_fetch_failed(&self, symbol: &str, period: Period, error: &ProviderError);

    /// Every phase has finished.
    fn on_run_complete(&self, summary: &RunSummary);
}

/// Progress reporter that writes to the tracing log.
pub struct TracingProgress;

impl PipelineProgress for TracingProgress {
    fn on_symbol_start(&self, symbol: &str, index: usize, total: usize) {
        info!("[{}/{}] discovering {symbol}", index + 1, total);
    }

    fn on_fetched(&self, symbol: &str, period: Period, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Cached { .. } => info!("{symbol} {period}: cached"),
            FetchOutcome::Downloaded { resumed: true, .. } => {
                info!("{symbol} {period}: downloaded (resumed)")
            }
            _ => info!("{symbol} {period}: downloaded"),
        }
    }

    fn on_boundary(&self, symbol: &str, period: Period) {
        info!("{symbol}: no archive for {period}, history starts after it");
    }

    fn on_fetch_failed(&self, symbol: &str, period: Period, error: &ProviderError) {
        warn!("{symbol} {period}: fetch failed, stopping discovery: {error}");
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        info!(
            "run complete: {} symbols, {} archives, {} extraction failures, {} merge failures",
            summary.symbols.len(),
            summary.archives_dispatched(),
            summary.extraction_failures,
            summary.merge_failures
        );
    }
}

/// Progress reporter that ignores every callback.
pub struct NoProgress;

impl PipelineProgress for NoProgress {
    fn on_symbol_start(&self, _symbol: &str, _index: usize, _total: usize) {}
    fn on_fetched(&self, _symbol: &str, _period: Period, _outcome: &FetchOutcome) {}
    fn on_boundary(&self, _symbol: &str, _period: Period) {}
    fn on_fetch_failed(&self, _symbol: &str, _period: Period, _error: &ProviderError) {}
    fn on_run_complete(&self, _summary: &RunSummary) {}
}
