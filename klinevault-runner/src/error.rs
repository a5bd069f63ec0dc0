//! Failures of individual pipeline units.
//!
//! Every variant is local to one extraction or merge; none of them stop the
//! run. They are collected by a completion tracker and logged after its
//! barrier clears.

use klinevault_core::ProviderError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Zip {
        context: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("{context}: {source}")]
    Csv {
        context: String,
        #[source]
        source: csv::Error,
    },

    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("archive {} has no entries", path.display())]
    EmptyArchive { path: PathBuf },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{unit} finished without reporting a result")]
    Abandoned { unit: String },

    #[error("worker pool: {0}")]
    WorkerPool(String),
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn zip(context: impl Into<String>, source: zip::result::ZipError) -> Self {
        PipelineError::Zip {
            context: context.into(),
            source,
        }
    }

    pub fn csv(context: impl Into<String>, source: csv::Error) -> Self {
        PipelineError::Csv {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        PipelineError::Json {
            context: context.into(),
            source,
        }
    }

    /// Message for logs. Only `verbose` output includes the underlying cause.
    pub fn describe(&self, verbose: bool) -> String {
        match self {
            PipelineError::Io { context, source } if verbose => format!("{context} -> {source}"),
            PipelineError::Zip { context, source } if verbose => format!("{context} -> {source}"),
            PipelineError::Csv { context, source } if verbose => format!("{context} -> {source}"),
            PipelineError::Json { context, source } if verbose => format!("{context} -> {source}"),
            PipelineError::Io { context, .. }
            | PipelineError::Zip { context, .. }
            | PipelineError::Csv { context, .. }
            | PipelineError::Json { context, .. } => context.clone(),
            other => other.to_string(),
        }
    }
}
