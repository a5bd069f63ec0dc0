//! Pipeline configuration.
//!
//! Settings are loaded from a TOML file where every field is optional.
//! Invalid granularity or interval values never fail the load: they are
//! replaced by defaults and reported back as warnings.

use crate::granularity::Granularity;
use crate::layout::Layout;
use crate::period::{Period, PROVIDER_EPOCH_YEAR};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_QUOTE: &str = "USDT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Fully resolved settings for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub work_root: PathBuf,
    /// Quote currency every symbol is paired against.
    pub quote: String,
    pub granularity: Granularity,
    /// Downsampling factor; 0 keeps every row.
    pub interval: u32,
    /// Delete each archive once extracted, and the downloads dir at run end.
    pub clear_downloads: bool,
    /// Delete each shard once merged, and the extracts dir at run end.
    pub clear_extracts: bool,
    /// Include underlying causes in logged failures.
    pub debug: bool,
    pub earliest_year: i32,
    /// Newest month to attempt. `None` means the month before today.
    pub latest_period: Option<Period>,
    /// Worker threads shared by extraction and merge.
    pub max_workers: usize,
    pub verify_checksums: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("data"),
            quote: DEFAULT_QUOTE.to_string(),
            granularity: Granularity::default(),
            interval: 0,
            clear_downloads: true,
            clear_extracts: true,
            debug: false,
            earliest_year: PROVIDER_EPOCH_YEAR,
            latest_period: None,
            max_workers: default_workers(),
            verify_checksums: true,
        }
    }
}

impl PipelineConfig {
    /// Load a config from a TOML file. Returns the warnings raised while resolving it.
    pub fn from_file(path: &Path) -> Result<(Self, Vec<String>), ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.resolve())
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.work_root)
    }

    /// Newest month to attempt, falling back to the month before today.
    pub fn latest_period(&self) -> Period {
        self.latest_period
            .unwrap_or_else(|| Period::latest_published(chrono::Local::now().date_naive()))
    }
}

/// Raw, lenient form of [`PipelineConfig`] as written in TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub work_root: Option<PathBuf>,
    pub quote: Option<String>,
    // Untyped: blank or mistyped values fall back with a warning.
    pub granularity: Option<toml::Value>,
    pub interval: Option<toml::Value>,
    pub clear_downloads: Option<toml::Value>,
    pub clear_extracts: Option<toml::Value>,
    pub debug: Option<toml::Value>,
    pub earliest_year: Option<i32>,
    /// `YYYY-MM`
    pub latest_period: Option<String>,
    pub max_workers: Option<usize>,
    pub verify_checksums: Option<bool>,
}

impl ConfigFile {
    /// Apply defaults for missing or invalid values.
    pub fn resolve(self) -> (PipelineConfig, Vec<String>) {
        let mut config = PipelineConfig::default();
        let mut warnings = Vec::new();

        if let Some(root) = self.work_root {
            config.work_root = root;
        }
        if let Some(quote) = self.quote {
            let quote = normalize_symbol(&quote);
            if quote.is_empty() {
                warnings.push(format!("quote left blank, using default '{DEFAULT_QUOTE}'"));
            } else {
                config.quote = quote;
            }
        }
        if let Some(raw) = self.granularity {
            let (granularity, warning) = match raw {
                toml::Value::String(s) => Granularity::resolve(&s),
                other => (
                    Granularity::default(),
                    Some(format!(
                        "granularity {other} is not a string, using default '{}'",
                        Granularity::default()
                    )),
                ),
            };
            config.granularity = granularity;
            warnings.extend(warning);
        }
        if let Some(raw) = self.interval {
            let (interval, warning) = match raw {
                toml::Value::Integer(v) => resolve_interval(v),
                toml::Value::String(s) if s.trim().is_empty() => (0, None),
                toml::Value::String(s) => match s.trim().parse::<i64>() {
                    Ok(v) => resolve_interval(v),
                    Err(_) => (
                        0,
                        Some(format!("interval '{s}' is not a number, downsampling disabled")),
                    ),
                },
                other => (
                    0,
                    Some(format!("interval {other} is not a number, downsampling disabled")),
                ),
            };
            config.interval = interval;
            warnings.extend(warning);
        }
        config.clear_downloads = resolve_flag(
            "clear_downloads",
            self.clear_downloads,
            config.clear_downloads,
            &mut warnings,
        );
        config.clear_extracts = resolve_flag(
            "clear_extracts",
            self.clear_extracts,
            config.clear_extracts,
            &mut warnings,
        );
        config.debug = resolve_flag("debug", self.debug, config.debug, &mut warnings);
        if let Some(year) = self.earliest_year {
            config.earliest_year = year;
        }
        if let Some(raw) = self.latest_period {
            match parse_period(&raw) {
                Some(p) => config.latest_period = Some(p),
                None => warnings.push(format!(
                    "latest_period '{raw}' is not YYYY-MM, using the month before today"
                )),
            }
        }
        if let Some(workers) = self.max_workers {
            if workers == 0 {
                warnings.push("max_workers must be at least 1, using 1".to_string());
            }
            config.max_workers = workers.max(1);
        }
        if let Some(v) = self.verify_checksums {
            config.verify_checksums = v;
        }

        (config, warnings)
    }
}

/// Negative intervals fall back to 0 (no downsampling).
pub fn resolve_interval(raw: i64) -> (u32, Option<String>) {
    match u32::try_from(raw) {
        Ok(v) => (v, None),
        Err(_) => (
            0,
            Some(format!("interval {raw} is invalid, downsampling disabled")),
        ),
    }
}

/// Booleans may also be written as `"true"` / `"false"`; anything else keeps `default`.
fn resolve_flag(
    name: &str,
    raw: Option<toml::Value>,
    default: bool,
    warnings: &mut Vec<String>,
) -> bool {
    match raw {
        None => default,
        Some(toml::Value::Boolean(v)) => v,
        Some(toml::Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            "" => default,
            _ => {
                warnings.push(format!("{name} '{s}' is not true/false, using {default}"));
                default
            }
        },
        Some(other) => {
            warnings.push(format!("{name} {other} is not true/false, using {default}"));
            default
        }
    }
}

/// Parse `YYYY-MM`.
pub fn parse_period(raw: &str) -> Option<Period> {
    let (year, month) = raw.trim().split_once('-')?;
    Period::new(year.parse().ok()?, month.parse().ok()?)
}

/// Strip whitespace and upper-case a symbol as the provider spells it.
pub fn normalize_symbol(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let (config, warnings) = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn full_toml_is_applied() {
        let toml = r#"
work_root = "/tmp/kv"
quote = "busd"
granularity = "15m"
interval = 4
clear_downloads = false
clear_extracts = false
debug = true
earliest_year = 2019
latest_period = "2021-09"
max_workers = 3
verify_checksums = false
"#;
        let (config, warnings) = PipelineConfig::from_toml(toml).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(config.work_root, PathBuf::from("/tmp/kv"));
        assert_eq!(config.quote, "BUSD");
        assert_eq!(config.granularity, Granularity::FifteenMinutes);
        assert_eq!(config.interval, 4);
        assert!(!config.clear_downloads);
        assert!(!config.clear_extracts);
        assert!(config.debug);
        assert_eq!(config.earliest_year, 2019);
        assert_eq!(config.latest_period(), Period::new(2021, 9).unwrap());
        assert_eq!(config.max_workers, 3);
        assert!(!config.verify_checksums);
    }

    #[test]
    fn invalid_values_fall_back_with_warnings() {
        let toml = r#"
granularity = "2s"
interval = -5
latest_period = "2021/09"
max_workers = 0
"#;
        let (config, warnings) = PipelineConfig::from_toml(toml).unwrap();
        assert_eq!(config.granularity, Granularity::OneSecond);
        assert_eq!(config.interval, 0);
        assert!(config.latest_period.is_none());
        assert_eq!(config.max_workers, 1);
        assert_eq!(warnings.len(), 4);
    }

    #[test]
    fn blank_or_mistyped_values_fall_back() {
        let toml = r#"
granularity = 5
interval = ""
clear_downloads = "false"
clear_extracts = 1
debug = "maybe"
"#;
        let (config, warnings) = PipelineConfig::from_toml(toml).unwrap();
        assert_eq!(config.granularity, Granularity::default());
        assert_eq!(config.interval, 0);
        assert!(!config.clear_downloads);
        assert!(config.clear_extracts);
        assert!(!config.debug);
        // granularity, clear_extracts and debug; a blank interval means "none".
        assert_eq!(warnings.len(), 3, "{warnings:?}");
    }

    #[test]
    fn numeric_interval_string_is_accepted() {
        let (config, warnings) = PipelineConfig::from_toml("interval = \" 6 \"").unwrap();
        assert_eq!(config.interval, 6);
        assert!(warnings.is_empty());

        let (config, warnings) = PipelineConfig::from_toml("interval = 2.5").unwrap();
        assert_eq!(config.interval, 0);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(matches!(
            PipelineConfig::from_toml("interval = ["),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = PipelineConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn normalize_symbol_strips_and_uppercases() {
        assert_eq!(normalize_symbol(" b tc "), "BTC");
    }

    #[test]
    fn parse_period_accepts_year_month() {
        assert_eq!(parse_period("2020-02"), Period::new(2020, 2));
        assert_eq!(parse_period("2020-13"), None);
        assert_eq!(parse_period("garbage"), None);
    }
}
