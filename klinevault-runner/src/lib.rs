//! KlineVault Runner — concurrent download, extraction and merge.
//!
//! This crate builds on `klinevault-core` to provide:
//! - A completion barrier for fire-and-forget workers
//! - Archive extraction into downsampled monthly shards
//! - Chronological merging of shards with integrity reporting
//! - The three-phase pipeline driver and its progress callbacks
//! - The run manifest written next to the results

pub mod error;
pub mod extract;
pub mod manifest;
pub mod merge;
pub mod pipeline;
pub mod progress;
pub mod tracker;

pub use error::PipelineError;
pub use extract::{extract_shard, run_extraction, ExtractContext, ExtractStats};
pub use manifest::RunManifest;
pub use merge::{list_shards, merge_symbol, run_merge, Gap, MergeContext, MergeReport};
pub use pipeline::{remove_tree, Pipeline, RunSummary, SymbolSummary};
pub use progress::{NoProgress, PipelineProgress, TracingProgress};
pub use tracker::{CompletionReporter, CompletionTracker, TrackerOutcome};
