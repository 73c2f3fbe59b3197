//! # Append-Only Vector Store
//!
//! Durable `id -> (vector, metadata)` mapping kept in a single text log.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    vectors.txt                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  # CVFS vector store: id|vector|metadata|created_at         │
//! │  doc_1|[0.1,0.2]|{"tag":"a"}|2024-05-01T12:00:00.000000Z    │
//! │  doc_2|[0.3,0.4]|{}|2024-05-01T12:00:01.000000Z             │
//! │  doc_1|[0.5,0.6]|{"tag":"b"}|2024-05-01T12:00:00.000000Z    │  <- supersedes line 2
//! │  doc_2|null|{}                                              │  <- tombstone
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every write appends one line. The in-memory index maps each live id to the
//! byte offset of its latest line, so `get` is a single seek and `scan` streams
//! the file without materializing it. Superseded lines and tombstones stay on
//! disk until [`VectorStore::compact`] rewrites the log.
//!
//! Single writer: mutations take `&mut self`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{SubsecRound, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use cvfs_core::error::{Error, Result};
use cvfs_core::types::{validate_id, Metadata, Timestamp, VectorRecord};

use crate::compaction::{self, CompactionStats};
use crate::record::{self, LogEntry, HEADER};

/// Position of an id's latest line
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    created_at: Timestamp,
}

/// Line counts of the log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Ids currently stored
    pub live: usize,
    /// Put lines no longer referenced by the index
    pub superseded: usize,
    /// Deletion markers
    pub tombstones: usize,
}

/// Append-only vector store
pub struct VectorStore {
    path: PathBuf,
    writer: BufWriter<File>,
    reader: Mutex<BufReader<File>>,
    index: HashMap<String, Slot>,
    dimension: Option<usize>,
    /// Byte length of the log
    end: u64,
    put_lines: usize,
    tombstone_lines: usize,
    sync_writes: bool,
}

impl VectorStore {
    /// Open or create the log at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if !path.exists() {
            std::fs::write(&path, format!("{}\n", HEADER)).map_err(|e| Error::Io {
                message: format!("Failed to create vector log {:?}", path),
                source: e,
            })?;
        }

        let mut store = Self::open_existing(path)?;
        store.load()?;
        info!(
            "Opened vector store {:?}: {} live records, dimension {:?}",
            store.path,
            store.index.len(),
            store.dimension
        );
        Ok(store)
    }

    fn open_existing(path: PathBuf) -> Result<Self> {
        let write_handle = OpenOptions::new().append(true).open(&path).map_err(|e| Error::Io {
            message: format!("Failed to open vector log {:?}", path),
            source: e,
        })?;
        let read_handle = File::open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(write_handle),
            reader: Mutex::new(BufReader::new(read_handle)),
            index: HashMap::new(),
            dimension: None,
            end: 0,
            put_lines: 0,
            tombstone_lines: 0,
            sync_writes: false,
        })
    }

    /// Fsync after every write
    pub fn set_sync_writes(&mut self, sync: bool) {
        self.sync_writes = sync;
    }

    /// Rebuild the index from the log, last write wins
    fn load(&mut self) -> Result<()> {
        self.index.clear();
        self.dimension = None;
        self.put_lines = 0;
        self.tombstone_lines = 0;

        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut offset = 0u64;
        let mut line_no = 0usize;
        let mut buf = String::new();
        let mut last_byte_newline = true;

        loop {
            buf.clear();
            let n = reader.read_line(&mut buf)?;
            if n == 0 {
                break;
            }
            line_no += 1;
            let line_offset = offset;
            offset += n as u64;
            last_byte_newline = buf.ends_with('\n');

            let line = buf.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match record::parse_line(line, line_no) {
                Ok(LogEntry::Put(rec)) => {
                    if let Some(dim) = self.dimension {
                        if rec.vector.len() != dim {
                            warn!(
                                "Skipping line {} of {:?}: {}",
                                line_no,
                                self.path,
                                Error::dimension_mismatch(dim, rec.vector.len())
                            );
                            continue;
                        }
                    } else {
                        self.dimension = Some(rec.vector.len());
                    }
                    self.put_lines += 1;
                    self.index.insert(
                        rec.id,
                        Slot {
                            offset: line_offset,
                            created_at: rec.created_at,
                        },
                    );
                }
                Ok(LogEntry::Delete(id)) => {
                    self.tombstone_lines += 1;
                    self.index.remove(&id);
                }
                Err(e) => warn!("Skipping line in {:?}: {}", self.path, e),
            }
        }

        self.end = offset;
        // A torn final line must not swallow the next append.
        if !last_byte_newline {
            self.writer.write_all(b"\n")?;
            self.writer.flush()?;
            self.end += 1;
        }
        Ok(())
    }

    fn append_line(&mut self, line: &str) -> Result<u64> {
        let offset = self.end;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        if self.sync_writes {
            self.writer.get_ref().sync_data()?;
        }
        self.end += line.len() as u64 + 1;
        Ok(offset)
    }

    /// Insert or overwrite `id`. Writing an identical record again is a no-op.
    pub fn put(&mut self, id: &str, vector: Vec<f64>, metadata: Metadata) -> Result<()> {
        validate_id(id)?;
        if let Some(dim) = self.dimension {
            if vector.len() != dim {
                return Err(Error::dimension_mismatch(dim, vector.len()));
            }
        }
        if vector.is_empty() {
            return Err(Error::invalid("vector must not be empty"));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(Error::invalid(format!("vector {} contains a non-finite value", id)));
        }

        let created_at = match self.get(id)? {
            Some(existing) if existing.vector == vector && existing.metadata == metadata => {
                debug!("put {} unchanged, skipping append", id);
                return Ok(());
            }
            Some(existing) => existing.created_at,
            None => Utc::now().trunc_subsecs(6),
        };

        let record = VectorRecord {
            id: id.to_string(),
            vector,
            metadata,
            created_at,
        };
        let line = record::encode_put(&record)?;
        let offset = self.append_line(&line)?;

        if self.dimension.is_none() {
            self.dimension = Some(record.vector.len());
        }
        self.put_lines += 1;
        self.index.insert(record.id, Slot { offset, created_at });
        Ok(())
    }

    /// Latest record for `id`
    pub fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
        let Some(slot) = self.index.get(id) else {
            return Ok(None);
        };

        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(slot.offset))?;
        let mut line = String::new();
        reader.read_line(&mut line)?;

        match record::parse_line(line.trim_end(), 0)? {
            LogEntry::Put(record) if record.id == id => Ok(Some(record)),
            _ => Err(Error::Internal {
                message: format!("index for {} points at a foreign line", id),
            }),
        }
    }

    /// Remove `id`; false when it was not stored
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        if !self.index.contains_key(id) {
            return Ok(false);
        }
        self.append_line(&record::encode_tombstone(id))?;
        self.tombstone_lines += 1;
        self.index.remove(id);
        Ok(true)
    }

    /// Stream every live record in log order.
    ///
    /// Each call opens its own file handle, so a scan can be restarted at any
    /// time and never holds more than one line in memory.
    pub fn scan(&self) -> Result<Scan<'_>> {
        let file = File::open(&self.path).map_err(|e| Error::Io {
            message: format!("Failed to open vector log {:?} for scan", self.path),
            source: e,
        })?;
        Ok(Scan {
            index: &self.index,
            reader: BufReader::new(file).take(self.end),
            offset: 0,
            line_no: 0,
            buf: String::new(),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Dimensionality fixed by the first stored vector
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Live ids in log order
    pub fn ids(&self) -> Vec<String> {
        let mut slots: Vec<(&String, u64)> = self.index.iter().map(|(id, s)| (id, s.offset)).collect();
        slots.sort_by_key(|&(_, offset)| offset);
        slots.into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            live: self.index.len(),
            superseded: self.put_lines.saturating_sub(self.index.len()),
            tombstones: self.tombstone_lines,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rewrite the log with only the live records that satisfy `keep`
    pub fn compact<F>(&mut self, keep: F) -> Result<CompactionStats>
    where
        F: Fn(&VectorRecord) -> bool,
    {
        self.writer.flush()?;
        let lines_before = self.put_lines + self.tombstone_lines;
        let live_before = self.index.len();

        let kept = compaction::rewrite_log(&self.path, self.scan()?, keep)?;

        let sync_writes = self.sync_writes;
        *self = Self::open_existing(self.path.clone())?;
        self.sync_writes = sync_writes;
        self.load()?;

        let stats = CompactionStats {
            kept,
            purged: live_before - kept,
            lines_dropped: lines_before - kept,
        };
        info!(
            "Compacted {:?}: kept {}, purged {}, dropped {} lines",
            self.path, stats.kept, stats.purged, stats.lines_dropped
        );
        Ok(stats)
    }
}

/// Lazy iterator over live records
pub struct Scan<'a> {
    index: &'a HashMap<String, Slot>,
    reader: std::io::Take<BufReader<File>>,
    offset: u64,
    line_no: usize,
    buf: String,
}

impl<'a> Iterator for Scan<'a> {
    type Item = Result<VectorRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            let n = match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(n) => n,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            let line_offset = self.offset;
            self.offset += n as u64;

            let line = self.buf.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // Only the line the index points at is current for its id.
            let id = line.split('|').next().unwrap_or_default();
            match self.index.get(id) {
                Some(slot) if slot.offset == line_offset => {}
                _ => continue,
            }

            return match record::parse_line(line, self.line_no) {
                Ok(LogEntry::Put(record)) => Some(Ok(record)),
                Ok(LogEntry::Delete(_)) => continue,
                Err(e) => Some(Err(e)),
            };
        }
    }
}
