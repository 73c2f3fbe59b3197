//! Helpers for the `|`-delimited text files indexes persist to.
//!
//! Every side file starts with a `# ...` header and holds one record per line.
//! Writes go to a sibling temp file first and are renamed over the target.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use cvfs_core::error::{Error, Result};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with `header` followed by `lines`
pub(crate) fn write_atomic<I>(path: &Path, header: &str, lines: I) -> Result<()>
where
    I: IntoIterator<Item = String>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(path);
    {
        let file = File::create(&tmp).map_err(|e| Error::Io {
            message: format!("Failed to create {:?}", tmp),
            source: e,
        })?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# {}", header)?;
        for line in lines {
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Non-empty, non-comment lines with their 1-based line numbers
pub(crate) fn read_records(path: &Path) -> Result<Vec<(usize, String)>> {
    let file = File::open(path).map_err(|e| Error::Io {
        message: format!("Failed to open {:?}", path),
        source: e,
    })?;

    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        records.push((idx + 1, trimmed.to_string()));
    }
    Ok(records)
}

/// Split a comma-separated id list; an empty field is an empty list
pub(crate) fn split_ids(field: &str) -> Vec<String> {
    field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
