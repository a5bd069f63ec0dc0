//! Archive extraction: one downloaded month → one downsampled CSV shard.
//!
//! The archive's single embedded table is streamed row by row through a
//! fresh [`Downsampler`] into `<shard>.csv.tmp`, which is renamed into place
//! only after every row was written and flushed. A failed extraction never
//! leaves a readable shard behind.

use crate::error::PipelineError;
use crate::tracker::CompletionReporter;
use klinevault_core::{ArchiveTask, Downsampler, Layout, Period};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::ZipArchive;

/// Settings every extraction task of a run shares.
#[derive(Debug, Clone)]
pub struct ExtractContext {
    pub layout: Layout,
    pub interval: u32,
    pub clear_downloads: bool,
}

/// Row counts for one extracted shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub shard_id: String,
    pub period: Period,
    pub rows_read: u64,
    pub rows_kept: u64,
}

/// Worker entry point: extract, optionally delete the archive, report once.
///
/// The archive is deleted whether or not extraction succeeded. A failed
/// delete is logged but is not the unit's completion.
pub fn run_extraction(
    task: ArchiveTask,
    ctx: &ExtractContext,
    reporter: CompletionReporter<ExtractStats>,
) {
    let result = extract_shard(&task, &ctx.layout, ctx.interval);

    if ctx.clear_downloads {
        let archive = ctx.layout.archive_path(&task);
        if let Err(e) = fs::remove_file(&archive) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("delete archive {}: {e}", archive.display());
            }
        }
    }

    if let Ok(stats) = &result {
        debug!(
            shard = %stats.shard_id,
            rows_read = stats.rows_read,
            rows_kept = stats.rows_kept,
            "shard extracted"
        );
    }
    reporter.report(result);
}

/// Extract the archive for `task` into its shard, keeping rows chosen by the downsampler.
pub fn extract_shard(
    task: &ArchiveTask,
    layout: &Layout,
    interval: u32,
) -> Result<ExtractStats, PipelineError> {
    let source = layout.archive_path(task);
    let target = layout.shard_path(task);

    let file = File::open(&source)
        .map_err(|e| PipelineError::io(format!("open archive {}", source.display()), e))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| PipelineError::zip(format!("read archive {}", source.display()), e))?;
    if archive.len() == 0 {
        return Err(PipelineError::EmptyArchive { path: source });
    }
    let entry = archive
        .by_index(0)
        .map_err(|e| PipelineError::zip(format!("open table in {}", source.display()), e))?;

    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir).map_err(|e| {
            PipelineError::io(format!("create extraction dir {}", dir.display()), e)
        })?;
    }

    let tmp = tmp_path(&target);
    let (rows_read, rows_kept) = match write_shard(entry, &source, &tmp, interval) {
        Ok(counts) => counts,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };

    fs::rename(&tmp, &target).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        PipelineError::io(format!("move shard into {}", target.display()), e)
    })?;

    Ok(ExtractStats {
        shard_id: task.shard_id().to_string(),
        period: task.period,
        rows_read,
        rows_kept,
    })
}

/// Stream rows from `entry` to `tmp`. Returns (rows read, rows kept).
fn write_shard<R: Read>(
    entry: R,
    source: &Path,
    tmp: &Path,
    interval: u32,
) -> Result<(u64, u64), PipelineError> {
    let out = File::create(tmp)
        .map_err(|e| PipelineError::io(format!("create shard {}", tmp.display()), e))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(entry);
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(out);

    let mut downsampler = Downsampler::new(interval);
    let mut record = csv::ByteRecord::new();
    let mut rows_read = 0u64;
    let mut rows_kept = 0u64;

    loop {
        let more = reader.read_byte_record(&mut record).map_err(|e| {
            PipelineError::csv(format!("read row from {}", source.display()), e)
        })?;
        if !more {
            break;
        }
        rows_read += 1;
        if downsampler.keep() {
            writer.write_byte_record(&record).map_err(|e| {
                PipelineError::csv(format!("write row to {}", tmp.display()), e)
            })?;
            rows_kept += 1;
        }
    }

    writer
        .flush()
        .map_err(|e| PipelineError::io(format!("flush shard {}", tmp.display()), e))?;
    Ok((rows_read, rows_kept))
}

/// `<shard>.csv.tmp`
fn tmp_path(target: &Path) -> PathBuf {
    target.with_extension("csv.tmp")
}
