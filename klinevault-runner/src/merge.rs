//! Shard merging: all shards of one symbol → one chronologically ordered file.
//!
//! Shard names embed a zero-padded year and month, so sorting them by name
//! orders them chronologically no matter in which order extraction finished.
//! Rows are appended verbatim. A failure part-way through leaves the rows
//! already appended in the result file.

use crate::error::PipelineError;
use crate::tracker::CompletionReporter;
use klinevault_core::{shard_prefix, Granularity, Layout};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Open times above this are microseconds rather than milliseconds.
const MICROSECOND_THRESHOLD: u64 = 100_000_000_000_000;

/// Settings every merge task of a run shares.
#[derive(Debug, Clone)]
pub struct MergeContext {
    pub layout: Layout,
    pub quote: String,
    pub granularity: Granularity,
    pub interval: u32,
    pub clear_extracts: bool,
}

/// A hole in the merged series, as open times in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub from: u64,
    pub to: u64,
}

/// What one symbol's merge produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub symbol: String,
    /// `None` when there were no shards to merge.
    pub output: Option<PathBuf>,
    pub shards_merged: usize,
    pub rows: u64,
    pub first_open_time: Option<u64>,
    pub last_open_time: Option<u64>,
    pub gaps: Vec<Gap>,
    pub out_of_order: u64,
    /// Rows whose first column is not an integer timestamp.
    pub unparsed: u64,
    /// BLAKE3 of the merged file.
    pub data_hash: Option<String>,
}

impl MergeReport {
    fn empty(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            output: None,
            shards_merged: 0,
            rows: 0,
            first_open_time: None,
            last_open_time: None,
            gaps: Vec::new(),
            out_of_order: 0,
            unparsed: 0,
            data_hash: None,
        }
    }
}

/// Worker entry point: merge one symbol and report once.
pub fn run_merge(symbol: String, ctx: &MergeContext, reporter: CompletionReporter<MergeReport>) {
    let result = merge_symbol(&symbol, ctx);
    if let Ok(report) = &result {
        debug!(
            symbol = %report.symbol,
            shards = report.shards_merged,
            rows = report.rows,
            gaps = report.gaps.len(),
            "symbol merged"
        );
    }
    reporter.report(result);
}

/// Concatenate every shard of `symbol` into its result file in name order.
pub fn merge_symbol(symbol: &str, ctx: &MergeContext) -> Result<MergeReport, PipelineError> {
    let prefix = shard_prefix(symbol, &ctx.quote, ctx.granularity);
    let shards = list_shards(&ctx.layout.extracts_dir(symbol), &prefix)?;

    let mut report = MergeReport::empty(symbol);
    if shards.is_empty() {
        return Ok(report);
    }

    let results_dir = ctx.layout.results_dir();
    fs::create_dir_all(&results_dir).map_err(|e| {
        PipelineError::io(format!("create results dir {}", results_dir.display()), e)
    })?;

    let output = ctx.layout.result_path(symbol, &ctx.quote);
    let file = File::create(&output)
        .map_err(|e| PipelineError::io(format!("create result file {}", output.display()), e))?;
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
    let mut scan = SeriesScan::new(max_step_millis(ctx.granularity, ctx.interval));

    // On error the writer is dropped, which flushes what was already appended.
    for shard in &shards {
        append_shard(shard, &mut writer, &mut scan)?;
        report.shards_merged += 1;

        if ctx.clear_extracts {
            if let Err(e) = fs::remove_file(shard) {
                warn!("delete shard {}: {e}", shard.display());
            }
        }
    }

    writer
        .flush()
        .map_err(|e| PipelineError::io(format!("flush result file {}", output.display()), e))?;
    drop(writer);

    report.data_hash = Some(
        hash_file(&output)
            .map_err(|e| PipelineError::io(format!("hash result file {}", output.display()), e))?,
    );
    report.output = Some(output);
    report.rows = scan.rows;
    report.first_open_time = scan.first;
    report.last_open_time = scan.last;
    report.gaps = scan.gaps;
    report.out_of_order = scan.out_of_order;
    report.unparsed = scan.unparsed;
    Ok(report)
}

/// Shard files in `dir` whose names start with `prefix`, sorted by name.
///
/// A missing directory means no shards.
pub fn list_shards(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(PipelineError::io(
                format!("list shards in {}", dir.display()),
                e,
            ))
        }
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| PipelineError::io(format!("list shards in {}", dir.display()), e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(prefix) && name.ends_with(".csv") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names.into_iter().map(|n| dir.join(n)).collect())
}

fn append_shard<W: Write>(
    shard: &Path,
    writer: &mut csv::Writer<W>,
    scan: &mut SeriesScan,
) -> Result<(), PipelineError> {
    let file = File::open(shard)
        .map_err(|e| PipelineError::io(format!("open shard {}", shard.display()), e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut record = csv::ByteRecord::new();
    loop {
        let more = reader
            .read_byte_record(&mut record)
            .map_err(|e| PipelineError::csv(format!("parse shard {}", shard.display()), e))?;
        if !more {
            return Ok(());
        }
        scan.observe(record.get(0));
        writer
            .write_byte_record(&record)
            .map_err(|e| PipelineError::csv(format!("append {}", shard.display()), e))?;
    }
}

/// Largest step between kept open times that is not a gap.
///
/// Downsampling restarts in every shard, so across a month boundary kept
/// rows can sit up to `2 * interval - 1` bars apart.
fn max_step_millis(granularity: Granularity, interval: u32) -> u64 {
    let bars = if interval > 1 {
        2 * u64::from(interval) - 1
    } else {
        1
    };
    granularity.millis() * bars
}

fn normalize_open_time(raw: u64) -> u64 {
    if raw >= MICROSECOND_THRESHOLD {
        raw / 1_000
    } else {
        raw
    }
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Running integrity check over the open-time column.
struct SeriesScan {
    max_step: u64,
    rows: u64,
    first: Option<u64>,
    last: Option<u64>,
    gaps: Vec<Gap>,
    out_of_order: u64,
    unparsed: u64,
}

impl SeriesScan {
    fn new(max_step: u64) -> Self {
        Self {
            max_step,
            rows: 0,
            first: None,
            last: None,
            gaps: Vec::new(),
            out_of_order: 0,
            unparsed: 0,
        }
    }

    fn observe(&mut self, open_time: Option<&[u8]>) {
        self.rows += 1;
        let parsed = open_time
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(normalize_open_time);
        let Some(ts) = parsed else {
            self.unparsed += 1;
            return;
        };

        if let Some(last) = self.last {
            if ts < last {
                self.out_of_order += 1;
            } else if ts - last > self.max_step {
                self.gaps.push(Gap { from: last, to: ts });
            }
        }
        self.first.get_or_insert(ts);
        self.last = Some(ts);
    }
}
