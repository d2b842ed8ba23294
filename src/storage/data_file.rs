//! Data File
//!
//! Header handling, record scanning, appends, and quarantine.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::warn;

use crate::error::{KvError, Result};
use crate::record::{
    self, DamagedFrame, DecodeError, Record, MAX_RECORD_SIZE, RECORD_HEADER_SIZE,
};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes identifying a filekv data file
const MAGIC: &[u8; 4] = b"FKV1";

/// Current data file format version
const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Reserved (2) + Generation (8) = 16 bytes
pub const FILE_HEADER_SIZE: u64 = 16;

/// Quarantine chunk header: Generation (8) + Offset (8) + Length (8)
const QUARANTINE_HEADER_SIZE: usize = 24;

/// Candidate offsets checked per read while searching past damage
const RESYNC_WINDOW: usize = 64 * 1024;

// =============================================================================
// Paths
// =============================================================================

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Where compaction writes before renaming: `{data}.compact`
pub fn compaction_path_for(data_path: &Path) -> PathBuf {
    sibling(data_path, ".compact")
}

/// Where damaged bytes are preserved: `{data}.quarantine`
pub fn quarantine_path_for(data_path: &Path) -> PathBuf {
    sibling(data_path, ".quarantine")
}

// =============================================================================
// Header
// =============================================================================

/// Decoded file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u16,

    /// Changes whenever compaction replaces the file
    pub generation: u64,
}

impl FileHeader {
    /// A header with a generation unlikely to collide with any earlier file
    pub fn fresh(previous: Option<u64>) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let mut generation = nanos ^ ((std::process::id() as u64) << 32);
        if generation == 0 || Some(generation) == previous {
            generation = generation.wrapping_add(1).max(1);
        }

        Self {
            version: VERSION,
            generation,
        }
    }

    fn to_bytes(self) -> [u8; FILE_HEADER_SIZE as usize] {
        let mut buf = [0u8; FILE_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.generation.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; FILE_HEADER_SIZE as usize]) -> Result<Self> {
        if &buf[0..4] != MAGIC {
            return Err(KvError::CorruptRecord {
                offset: 0,
                reason: format!("invalid data file magic: expected FKV1, got {:?}", &buf[0..4]),
            });
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != VERSION {
            return Err(KvError::CorruptRecord {
                offset: 0,
                reason: format!("unsupported data file version: {}", version),
            });
        }

        let mut generation = [0u8; 8];
        generation.copy_from_slice(&buf[8..16]);

        Ok(Self {
            version,
            generation: u64::from_le_bytes(generation),
        })
    }
}

// =============================================================================
// Scan Results
// =============================================================================

/// Index-relevant fields of a record found by a scan
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    pub offset: u64,
    pub len: u32,
    pub key: Bytes,
    pub expires_at: Option<u64>,
    pub tombstone: bool,
}

/// A byte range that failed to decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptSpan {
    pub offset: u64,
    pub len: u64,
    pub error: DecodeError,
}

impl CorruptSpan {
    /// The public error for this span
    pub fn to_error(&self) -> KvError {
        self.error.clone().at(self.offset)
    }
}

/// What a scan hands its visitor, in file order
#[derive(Debug)]
pub enum ScanItem {
    Record(ScannedRecord),

    /// Bytes skipped to reach the next intact frame. `frame` is set when they
    /// form exactly one frame whose lengths the following frame confirms.
    Corrupt {
        span: CorruptSpan,
        frame: Option<DamagedFrame>,
    },
}

/// A frame the scan couldn't accept
struct BadFrame {
    offset: u64,
    error: DecodeError,
    /// Where the frame ends, if its lengths are sane and it fits in the file
    end: Option<u64>,
    damaged: Option<DamagedFrame>,
}

impl BadFrame {
    fn unbounded(offset: u64, error: DecodeError) -> Self {
        Self {
            offset,
            error,
            end: None,
            damaged: None,
        }
    }
}

/// Summary of one scan pass
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Offset just past the last frame that could be delimited
    pub end: u64,

    /// Records handed to the visitor
    pub records: u64,

    /// Damaged byte ranges skipped over, each followed by an intact frame
    pub corrupt: Vec<CorruptSpan>,

    /// Bytes from `end` to the file length with no intact frame in them
    pub damaged_tail: Option<CorruptSpan>,
}

// =============================================================================
// Data File
// =============================================================================

/// Handle on the data file for one critical section
///
/// Opened fresh for every locked operation so a file swapped in by another
/// process's compaction is always the one being read.
pub struct DataFile {
    file: File,
    path: PathBuf,
    len: u64,
}

impl DataFile {
    /// Open an existing data file
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
        })
    }

    /// Open the data file, creating it (with a header) if missing or empty
    ///
    /// Caller must hold the exclusive lock. A file shorter than a header never
    /// held a record and is reinitialised.
    pub fn open_or_create(path: &Path) -> Result<(Self, bool)> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();

        let mut data_file = Self {
            file,
            path: path.to_path_buf(),
            len,
        };

        if len < FILE_HEADER_SIZE {
            data_file.write_header(FileHeader::fresh(None))?;
            return Ok((data_file, true));
        }

        Ok((data_file, false))
    }

    /// Create (or truncate) a file at `path` holding only a header
    pub fn create_with_header(path: &Path, header: FileHeader) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;

        let mut data_file = Self {
            file,
            path: path.to_path_buf(),
            len: 0,
        };
        data_file.write_header(header)?;
        Ok(data_file)
    }

    fn write_header(&mut self, header: FileHeader) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes())?;
        self.file.sync_all()?;
        self.len = FILE_HEADER_SIZE;
        Ok(())
    }

    /// Read and validate the header
    pub fn header(&mut self) -> Result<FileHeader> {
        if self.len < FILE_HEADER_SIZE {
            return Err(KvError::CorruptRecord {
                offset: 0,
                reason: format!("data file is {} bytes, shorter than its header", self.len),
            });
        }

        let mut buf = [0u8; FILE_HEADER_SIZE as usize];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut buf)?;
        FileHeader::from_bytes(&buf)
    }

    /// Current file length in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file holds no records
    pub fn is_empty(&self) -> bool {
        self.len <= FILE_HEADER_SIZE
    }

    /// Path of this file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Walk records from `from` to the end of the file
    ///
    /// Records and skipped damage go to `visit` in file order. When a frame
    /// can't be decoded the scan resumes at the next offset holding an intact
    /// frame; only damage with nothing intact after it is the damaged tail.
    pub fn scan<F>(&mut self, from: u64, mut visit: F) -> Result<ScanOutcome>
    where
        F: FnMut(ScanItem),
    {
        let from = from.max(FILE_HEADER_SIZE);
        let mut outcome = ScanOutcome {
            end: from,
            ..ScanOutcome::default()
        };

        while outcome.end < self.len {
            let Some(bad) = self.scan_run(&mut visit, &mut outcome)? else {
                break;
            };

            match self.resync(&bad)? {
                Some(next) => {
                    let aligned = bad.end == Some(next);
                    let span = CorruptSpan {
                        offset: bad.offset,
                        len: next - bad.offset,
                        error: bad.error,
                    };
                    outcome.corrupt.push(span.clone());
                    visit(ScanItem::Corrupt {
                        span,
                        frame: if aligned { bad.damaged } else { None },
                    });
                    outcome.end = next;
                }
                None => {
                    outcome.damaged_tail = Some(CorruptSpan {
                        offset: bad.offset,
                        len: self.len - bad.offset,
                        error: bad.error,
                    });
                    break;
                }
            }
        }

        Ok(outcome)
    }

    /// Decode frames from `outcome.end` until the file ends or a frame fails
    fn scan_run<F>(
        &mut self,
        visit: &mut F,
        outcome: &mut ScanOutcome,
    ) -> Result<Option<BadFrame>>
    where
        F: FnMut(ScanItem),
    {
        let len = self.len;
        let mut pos = outcome.end;
        self.file.seek(SeekFrom::Start(pos))?;
        let mut reader = BufReader::new(&mut self.file);
        let mut frame = vec![0u8; MAX_RECORD_SIZE];

        while pos < len {
            let remaining = len - pos;
            if remaining < RECORD_HEADER_SIZE as u64 {
                return Ok(Some(BadFrame::unbounded(
                    pos,
                    DecodeError::Truncated {
                        needed: RECORD_HEADER_SIZE,
                        available: remaining as usize,
                    },
                )));
            }

            reader.read_exact(&mut frame[..RECORD_HEADER_SIZE])?;
            let frame_len = match record::frame_len(&frame[..RECORD_HEADER_SIZE]) {
                Ok(len) => len,
                Err(e) => return Ok(Some(BadFrame::unbounded(pos, e))),
            };

            if remaining < frame_len as u64 {
                return Ok(Some(BadFrame::unbounded(
                    pos,
                    DecodeError::Truncated {
                        needed: frame_len,
                        available: remaining as usize,
                    },
                )));
            }

            reader.read_exact(&mut frame[RECORD_HEADER_SIZE..frame_len])?;
            match record::decode_frame(&frame[..frame_len]) {
                Ok((record, _)) => {
                    visit(ScanItem::Record(ScannedRecord {
                        offset: pos,
                        len: frame_len as u32,
                        key: record.key,
                        expires_at: record.expires_at,
                        tombstone: record.tombstone,
                    }));
                    outcome.records += 1;
                }
                Err(error) if error.is_skippable() => {
                    return Ok(Some(BadFrame {
                        offset: pos,
                        error,
                        end: Some(pos + frame_len as u64),
                        damaged: DamagedFrame::new(&frame[..frame_len]),
                    }));
                }
                Err(error) => return Ok(Some(BadFrame::unbounded(pos, error))),
            }

            pos += frame_len as u64;
            outcome.end = pos;
        }

        Ok(None)
    }

    /// Offset where scanning can resume after `bad`, or `None` if nothing
    /// intact follows it
    ///
    /// A frame with sane lengths is trusted to end where it says when an
    /// intact frame (or the end of the file) is there; otherwise the bytes
    /// after it are searched one offset at a time.
    fn resync(&mut self, bad: &BadFrame) -> Result<Option<u64>> {
        if let Some(end) = bad.end {
            if end == self.len || self.frame_at(end)? {
                return Ok(Some(end));
            }
        }
        self.find_next_frame(bad.offset + 1)
    }

    fn frame_at(&mut self, offset: u64) -> Result<bool> {
        let bytes = self.read_range(offset, offset + MAX_RECORD_SIZE as u64)?;
        Ok(record::decode_frame(&bytes).is_ok())
    }

    /// First offset at or after `from` where a whole frame decodes
    fn find_next_frame(&mut self, from: u64) -> Result<Option<u64>> {
        let mut start = from;

        while start + RECORD_HEADER_SIZE as u64 <= self.len {
            // Each window overlaps the next by one frame so a frame starting
            // near the window edge is still seen whole.
            let to = start + (RESYNC_WINDOW + MAX_RECORD_SIZE) as u64;
            let window = self.read_range(start, to)?;
            let candidates = window.len().min(RESYNC_WINDOW);

            for i in 0..candidates {
                if record::decode_frame(&window[i..]).is_ok() {
                    return Ok(Some(start + i as u64));
                }
            }
            start += candidates as u64;
        }

        Ok(None)
    }

    /// Read and decode the record at `offset`
    pub fn read_record(&mut self, offset: u64, len: u32) -> Result<Record> {
        let len = len as usize;
        if offset + len as u64 > self.len {
            return Err(DecodeError::Truncated {
                needed: len,
                available: self.len.saturating_sub(offset) as usize,
            }
            .at(offset));
        }

        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;

        record::decode_frame(&buf)
            .map(|(record, _)| record)
            .map_err(|e| e.at(offset))
    }

    /// Read raw bytes in `[from, to)`
    pub fn read_range(&mut self, from: u64, to: u64) -> Result<Vec<u8>> {
        let to = to.min(self.len);
        if from >= to {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; (to - from) as usize];
        self.file.seek(SeekFrom::Start(from))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Append encoded bytes at the end of the file, returning their offset
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.len;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(offset)
    }

    /// Cut the file back to `len` bytes
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.len = len;
        Ok(())
    }

    /// Copy `[from, len)` into the quarantine file, then truncate to `from`
    pub fn quarantine_tail(&mut self, from: u64, generation: u64) -> Result<u64> {
        let bytes = self.read_range(from, self.len)?;
        if bytes.is_empty() {
            return Ok(0);
        }

        self.append_quarantine(generation, from, &bytes)?;
        self.truncate(from)?;
        self.file.sync_all()?;
        Ok(bytes.len() as u64)
    }

    /// Copy one corrupt frame into the quarantine file, leaving the data file as is
    pub fn quarantine_span(&mut self, span: &CorruptSpan, generation: u64) -> Result<()> {
        self.quarantine_range(span.offset, span.len, generation)
    }

    /// Copy `len` bytes at `offset` into the quarantine file
    pub fn quarantine_range(&mut self, offset: u64, len: u64, generation: u64) -> Result<()> {
        let bytes = self.read_range(offset, offset + len)?;
        self.append_quarantine(generation, offset, &bytes)
    }

    fn append_quarantine(&self, generation: u64, offset: u64, bytes: &[u8]) -> Result<()> {
        let quarantine = quarantine_path_for(&self.path);
        let mut chunk = Vec::with_capacity(QUARANTINE_HEADER_SIZE + bytes.len());
        chunk.extend_from_slice(&generation.to_le_bytes());
        chunk.extend_from_slice(&offset.to_le_bytes());
        chunk.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        chunk.extend_from_slice(bytes);

        let mut out = OpenOptions::new().create(true).append(true).open(&quarantine)?;
        out.write_all(&chunk)?;
        out.sync_all()?;

        warn!(
            path = %quarantine.display(),
            offset,
            bytes = bytes.len(),
            "quarantined damaged data file bytes"
        );
        Ok(())
    }

    /// fsync file contents and metadata
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
