//! # Log Compaction
//!
//! Drops superseded lines and tombstones by rewriting the vector log from its
//! live records. The new log is written next to the old one and renamed over
//! it, so a crash mid-compaction leaves the previous log intact.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use cvfs_core::error::{Error, Result};
use cvfs_core::types::VectorRecord;

use crate::record::{self, HEADER};

/// Outcome of one compaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Live records written to the new log
    pub kept: usize,
    /// Live records removed because the filter rejected them
    pub purged: usize,
    /// Data lines of the old log that did not make it into the new one
    pub lines_dropped: usize,
}

fn compaction_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".compact");
    path.with_file_name(name)
}

/// Write `records` that pass `keep` to a fresh log and swap it in.
/// Returns the number of records kept.
pub fn rewrite_log<I, F>(path: &Path, records: I, keep: F) -> Result<usize>
where
    I: IntoIterator<Item = Result<VectorRecord>>,
    F: Fn(&VectorRecord) -> bool,
{
    let tmp = compaction_path(path);
    let mut kept = 0usize;
    {
        let file = File::create(&tmp).map_err(|e| Error::Io {
            message: format!("Failed to create compaction file {:?}", tmp),
            source: e,
        })?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", HEADER)?;

        for record in records {
            let record = record?;
            if !keep(&record) {
                debug!("Compaction purging {}", record.id);
                continue;
            }
            writeln!(writer, "{}", record::encode_put(&record)?)?;
            kept += 1;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    std::fs::rename(&tmp, path)?;
    Ok(kept)
}
