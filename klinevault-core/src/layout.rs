//! On-disk layout of a work root.
//!
//! ```text
//! {root}/downloads/{symbol}/{symbol}{quote}-{granularity}-{year}-{MM}.zip
//! {root}/extracts/{symbol}/{symbol}{quote}-{granularity}-{year}-{MM}.csv
//! {root}/results/{symbol}{quote}.csv
//! {root}/results/manifest.json
//! ```
//!
//! These paths are shared with earlier runs, so archives and shards left
//! behind by one run are picked up by the next.

use crate::task::ArchiveTask;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn downloads_root(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn extracts_root(&self) -> PathBuf {
        self.root.join("extracts")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn downloads_dir(&self, symbol: &str) -> PathBuf {
        self.downloads_root().join(symbol)
    }

    pub fn extracts_dir(&self, symbol: &str) -> PathBuf {
        self.extracts_root().join(symbol)
    }

    pub fn archive_path(&self, task: &ArchiveTask) -> PathBuf {
        self.downloads_dir(&task.symbol).join(task.archive_file_name())
    }

    pub fn shard_path(&self, task: &ArchiveTask) -> PathBuf {
        self.extracts_dir(&task.symbol).join(task.shard_file_name())
    }

    /// Final merged file: `{root}/results/{symbol}{quote}.csv`
    pub fn result_path(&self, symbol: &str, quote: &str) -> PathBuf {
        self.results_dir().join(format!("{symbol}{quote}.csv"))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.results_dir().join("manifest.json")
    }
}
