//! Compaction
//!
//! Rewrites the data file without tombstones, superseded records, damaged
//! records, or records expired past the grace period. Nothing a damaged
//! record shadowed is brought back.
//!
//! ## Crash Safety
//! 1. Write survivors to `{data}.compact` under a fresh generation
//! 2. fsync it
//! 3. Rename it over the data file (atomic on POSIX)
//! 4. fsync the parent directory
//!
//! A crash before step 3 leaves the original untouched plus a stale temp file,
//! which the next pass (or the next open) truncates or removes.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;
use crate::expiry::ReclaimPolicy;
use crate::record::encode;
use crate::storage::{compaction_path_for, DataFile, FileHeader, KeyDir};

/// What a compaction pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    pub records_before: u64,
    pub records_after: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,

    /// Frames that couldn't be read and were copied to the quarantine file
    pub quarantined: u64,

    /// Generation of the new file
    pub generation: u64,
}

impl CompactionReport {
    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Rewrite `source` keeping only what `policy` says must survive at `now_ms`
///
/// Caller holds the exclusive lock and has refreshed `keydir` against
/// `source`. On return the data path holds the new file; `source` still
/// points at the old inode.
pub fn rewrite(
    source: &mut DataFile,
    keydir: &KeyDir,
    policy: &ReclaimPolicy,
    now_ms: u64,
) -> Result<CompactionReport> {
    let path = source.path().to_path_buf();
    let old_header = source.header()?;
    let temp_path = compaction_path_for(&path);

    // Corrupt frames are skipped by every scan; keep a copy before they vanish.
    let mut quarantined = 0u64;
    let outcome = source.scan(0, |_| {})?;
    for span in &outcome.corrupt {
        source.quarantine_span(span, old_header.generation)?;
        quarantined += 1;
    }

    let mut survivors: Vec<_> = keydir
        .iter()
        .filter(|(_, meta)| !policy.reclaimable(meta, now_ms))
        .map(|(_, meta)| *meta)
        .collect();
    survivors.sort_by_key(|meta| meta.offset);

    let header = FileHeader::fresh(Some(old_header.generation));
    let mut out = DataFile::create_with_header(&temp_path, header)?;
    let mut records_after = 0u64;

    for meta in survivors {
        let record = match source.read_record(meta.offset, meta.len) {
            Ok(record) => record,
            Err(e) => {
                warn!(offset = meta.offset, error = %e, "dropping unreadable record during compaction");
                source.quarantine_range(meta.offset, meta.len as u64, old_header.generation)?;
                quarantined += 1;
                continue;
            }
        };
        out.append(&encode(&record)?)?;
        records_after += 1;
    }

    out.sync()?;
    let bytes_after = out.len();
    drop(out);

    fs::rename(&temp_path, &path)?;
    sync_parent_dir(&path);

    let report = CompactionReport {
        records_before: keydir.total_records(),
        records_after,
        bytes_before: source.len(),
        bytes_after,
        quarantined,
        generation: header.generation,
    };

    info!(
        path = %path.display(),
        records_before = report.records_before,
        records_after = report.records_after,
        bytes_reclaimed = report.bytes_reclaimed(),
        quarantined = report.quarantined,
        "compaction finished"
    );

    Ok(report)
}

/// Remove a temp file left by an interrupted compaction
pub fn remove_stale_temp(data_path: &Path) -> Result<()> {
    let temp_path = compaction_path_for(data_path);
    if temp_path.exists() {
        warn!(path = %temp_path.display(), "removing leftover compaction file");
        fs::remove_file(&temp_path)?;
    }
    Ok(())
}

/// Make the rename durable; best effort where directories can't be opened
fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            if let Err(e) = fs::File::open(parent).and_then(|dir| dir.sync_all()) {
                warn!(dir = %parent.display(), error = %e, "failed to sync directory after rename");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}
