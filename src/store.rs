//! Snapshot persistence: an append-only JSONL history plus an atomically replaced
//! "latest" file.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One fetched chain payload, stamped with the UTC second it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp_utc: String,
    pub snapshot: Value,
}

impl Snapshot {
    pub fn new(payload: Value) -> Self {
        Self::taken_at(Utc::now(), payload)
    }

    pub fn taken_at(at: DateTime<Utc>, payload: Value) -> Self {
        Self {
            timestamp_utc: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            snapshot: payload,
        }
    }
}

/// Appends one JSON line to `path`, creating parent directories as needed.
pub fn append(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = parent_dir(path) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating history dir {}", parent.display()))?;
    }

    let mut line = serde_json::to_string(snapshot)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening history file {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("appending to history file {}", path.display()))?;

    debug!("appended snapshot {} to {path:?}", snapshot.timestamp_utc);
    Ok(())
}

/// Replaces `path` with a pretty-printed snapshot via a sibling temp file and rename.
///
/// Readers see either the previous file or the new one, never a partial write. The
/// temp file is deleted if anything fails before the rename.
pub fn write_latest(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let dir = parent_dir(path).unwrap_or(Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("creating latest dir {}", dir.display()))?;

    let prefix = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "latest".into());
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .tempfile_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;

    serde_json::to_writer_pretty(&mut tmp, snapshot)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;

    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("renaming temp file onto {}", path.display()))?;

    debug!("wrote latest snapshot {} to {path:?}", snapshot.timestamp_utc);
    Ok(())
}

/// Reads the latest-snapshot file, `None` if it has not been written yet.
pub fn read_latest(path: &Path) -> Result<Option<Snapshot>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("reading latest file {}", path.display()));
        }
    };

    let snapshot = serde_json::from_str(&data)
        .with_context(|| format!("parsing latest file {}", path.display()))?;
    Ok(Some(snapshot))
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

/// The history/latest file pair a poll loop writes to.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pub history: PathBuf,
    pub latest: PathBuf,
}

impl SnapshotStore {
    pub fn new(history: PathBuf, latest: PathBuf) -> Self {
        Self { history, latest }
    }

    /// Writes the same snapshot to both files, history first.
    pub fn record(&self, snapshot: &Snapshot) -> Result<()> {
        append(&self.history, snapshot)?;
        write_latest(&self.latest, snapshot)
    }

    pub fn latest(&self) -> Result<Option<Snapshot>> {
        read_latest(&self.latest)
    }
}
