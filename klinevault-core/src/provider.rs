//! Archive provider trait and structured error types.
//!
//! The ArchiveProvider trait abstracts over where monthly archives come from
//! so the pipeline can run against the real provider or a scripted one in
//! tests. Providers know nothing about extraction or merging.

use crate::task::ArchiveTask;
use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("unexpected HTTP {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProviderError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ProviderError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result of asking the provider for one symbol-month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Archive transferred to `path`; `resumed` when a partial file was continued.
    Downloaded { path: PathBuf, resumed: bool },
    /// Archive was already on disk from an earlier run.
    Cached { path: PathBuf },
    /// The provider has no archive for this month.
    NotFound,
}

impl FetchOutcome {
    /// Local archive path, if one exists.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            FetchOutcome::Downloaded { path, .. } | FetchOutcome::Cached { path } => Some(path),
            FetchOutcome::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        !matches!(self, FetchOutcome::NotFound)
    }
}

/// Source of monthly archives.
pub trait ArchiveProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch the archive for `task` into `dest`.
    fn fetch_archive(
        &self,
        task: &ArchiveTask,
        dest: &std::path::Path,
    ) -> Result<FetchOutcome, ProviderError>;

    /// Whether `symbol` trades against `quote`.
    fn validate_pair(&self, symbol: &str, quote: &str) -> Result<bool, ProviderError>;

    /// Every base asset that trades against `quote`.
    fn list_symbols(&self, quote: &str) -> Result<Vec<String>, ProviderError>;
}
