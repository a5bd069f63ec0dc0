//! Run manifest: `results/manifest.json`.
//!
//! Describes every result file in the results directory: which granularity
//! and quote produced it, the downsampling interval, and each symbol's
//! merge report. Written atomically (`.tmp` then rename) after the merge
//! barrier clears.

use crate::error::PipelineError;
use crate::merge::MergeReport;
use chrono::{DateTime, Utc};
use klinevault_core::{Granularity, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub generated_at: DateTime<Utc>,
    pub granularity: Granularity,
    pub quote: String,
    pub interval: u32,
    /// Sorted by symbol.
    pub symbols: Vec<MergeReport>,
}

impl RunManifest {
    pub fn new(config: &PipelineConfig, reports: Vec<MergeReport>) -> Self {
        let mut manifest = Self {
            generated_at: Utc::now(),
            granularity: config.granularity,
            quote: config.quote.clone(),
            interval: config.interval,
            symbols: reports,
        };
        manifest.sort();
        manifest
    }

    /// Carry over entries for symbols this run did not merge.
    ///
    /// Only a manifest with the same granularity, quote and interval
    /// describes compatible result files; anything else is ignored.
    pub fn carry_over(&mut self, previous: RunManifest) {
        if previous.granularity != self.granularity
            || previous.quote != self.quote
            || previous.interval != self.interval
        {
            return;
        }
        for report in previous.symbols {
            if !self.symbols.iter().any(|r| r.symbol == report.symbol) {
                self.symbols.push(report);
            }
        }
        self.sort();
    }

    pub fn report(&self, symbol: &str) -> Option<&MergeReport> {
        self.symbols.iter().find(|r| r.symbol == symbol)
    }

    /// Read a manifest. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, PipelineError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PipelineError::io(
                    format!("read manifest {}", path.display()),
                    e,
                ))
            }
        };
        let manifest = serde_json::from_str(&content)
            .map_err(|e| PipelineError::json(format!("parse manifest {}", path.display()), e))?;
        Ok(Some(manifest))
    }

    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::json("serialize manifest", e))?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                PipelineError::io(format!("create results dir {}", dir.display()), e)
            })?;
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| PipelineError::io(format!("write manifest {}", tmp.display()), e))?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            PipelineError::io(format!("move manifest into {}", path.display()), e)
        })
    }

    fn sort(&mut self) {
        self.symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(symbol: &str, rows: u64) -> MergeReport {
        MergeReport {
            symbol: symbol.into(),
            output: None,
            shards_merged: 1,
            rows,
            first_open_time: Some(1_625_097_600_000),
            last_open_time: Some(1_625_097_600_000),
            gaps: Vec::new(),
            out_of_order: 0,
            unparsed: 0,
            data_hash: Some("abc".into()),
        }
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results").join("manifest.json");
        let manifest = RunManifest::new(
            &PipelineConfig::default(),
            vec![report("ETH", 2), report("BTC", 1)],
        );

        manifest.write(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = RunManifest::load(&path).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.symbols[0].symbol, "BTC");
    }

    #[test]
    fn missing_manifest_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunManifest::load(&dir.path().join("manifest.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn garbage_manifest_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            RunManifest::load(&path),
            Err(PipelineError::Json { .. })
        ));
    }

    #[test]
    fn carry_over_keeps_untouched_symbols() {
        let config = PipelineConfig::default();
        let previous = RunManifest::new(&config, vec![report("BTC", 1), report("ETH", 5)]);
        let mut current = RunManifest::new(&config, vec![report("BTC", 9)]);

        current.carry_over(previous);
        assert_eq!(current.symbols.len(), 2);
        assert_eq!(current.report("BTC").unwrap().rows, 9);
        assert_eq!(current.report("ETH").unwrap().rows, 5);
    }

    #[test]
    fn carry_over_ignores_other_granularity() {
        let config = PipelineConfig::default();
        let other = PipelineConfig {
            granularity: Granularity::OneHour,
            ..PipelineConfig::default()
        };
        let previous = RunManifest::new(&other, vec![report("ETH", 5)]);
        let mut current = RunManifest::new(&config, vec![report("BTC", 9)]);

        current.carry_over(previous);
        assert_eq!(current.symbols.len(), 1);
    }
}
