//! Append-only audit log of executed actions.
//!
//! Each line is one JSON record. Executing an action writes an `intent`
//! record before touching the filesystem and an outcome record (`applied` or
//! `failed`) after, both under the same sequence number. Undo and purge
//! append `reverted` and `purged` records for the same sequence number.
//! Folding the records by `seq` (last record wins) gives the current state
//! of every action ever executed.

use crate::plan::{ActionKind, MoveAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit log {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit log {} line {line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("audit log writer lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Intent,
    Applied,
    Failed,
    Reverted,
    Purged,
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: ActionKind,
    pub source: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    pub reason: String,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Current state of one action after folding its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub seq: u64,
    pub kind: ActionKind,
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub reason: String,
    pub status: AuditStatus,
    pub error: Option<String>,
    /// When the action was applied, if it ever was.
    pub applied_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Writer {
    file: Option<File>,
    next_seq: u64,
}

/// Handle on an audit log file. Writes are serialized through a mutex.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<Writer>,
}

impl AuditLog {
    /// Opens the log at `path`. The file (and its parent directory) is only
    /// created by the first write.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        let next_seq = Self::read_records(path)?
            .iter()
            .map(|r| r.seq + 1)
            .max()
            .unwrap_or(1);
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Writer { file: None, next_seq }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records that `action` is about to run. Returns its sequence number.
    pub fn record_intent(&self, action: &MoveAction) -> Result<u64, AuditError> {
        let mut writer = self.writer.lock().map_err(|_| AuditError::Poisoned)?;
        let seq = writer.next_seq;
        writer.next_seq += 1;
        let record = AuditRecord {
            seq,
            timestamp: Utc::now(),
            kind: action.kind,
            source: action.source_path.clone(),
            destination: action.destination_path.clone(),
            reason: action.reason.clone(),
            status: AuditStatus::Intent,
            error: None,
        };
        self.append(&mut writer, &record)?;
        Ok(seq)
    }

    /// Records how the action with sequence number `seq` ended.
    /// `destination` is where the file actually went.
    pub fn record_outcome(
        &self,
        seq: u64,
        action: &MoveAction,
        destination: Option<&Path>,
        status: AuditStatus,
        error: Option<String>,
    ) -> Result<(), AuditError> {
        let mut writer = self.writer.lock().map_err(|_| AuditError::Poisoned)?;
        let record = AuditRecord {
            seq,
            timestamp: Utc::now(),
            kind: action.kind,
            source: action.source_path.clone(),
            destination: destination.map(Path::to_path_buf),
            reason: action.reason.clone(),
            status,
            error,
        };
        self.append(&mut writer, &record)
    }

    /// Appends a new status (`reverted`, `purged`) for an existing entry.
    pub fn record_status(&self, entry: &AuditEntry, status: AuditStatus, reason: &str) -> Result<(), AuditError> {
        let mut writer = self.writer.lock().map_err(|_| AuditError::Poisoned)?;
        let record = AuditRecord {
            seq: entry.seq,
            timestamp: Utc::now(),
            kind: entry.kind,
            source: entry.source.clone(),
            destination: entry.destination.clone(),
            reason: reason.to_string(),
            status,
            error: None,
        };
        self.append(&mut writer, &record)
    }

    fn append(&self, writer: &mut Writer, record: &AuditRecord) -> Result<(), AuditError> {
        let io = |source| AuditError::Io {
            path: self.path.clone(),
            source,
        };
        if writer.file.is_none() {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent).map_err(io)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(io)?;
            writer.file = Some(file);
        }
        let Some(file) = writer.file.as_mut() else {
            return Ok(());
        };

        let mut line = serde_json::to_string(record).map_err(|e| AuditError::Parse {
            path: self.path.clone(),
            line: 0,
            reason: e.to_string(),
        })?;
        line.push('\n');
        file.write_all(line.as_bytes()).map_err(io)?;
        file.sync_data().map_err(io)?;
        debug!("audit #{} {:?} {}", record.seq, record.status, record.source.display());
        Ok(())
    }

    /// Every record in file order. A missing file reads as empty.
    pub fn read_records(path: &Path) -> Result<Vec<AuditRecord>, AuditError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AuditError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| AuditError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| AuditError::Parse {
                path: path.to_path_buf(),
                line: i + 1,
                reason: e.to_string(),
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Current state of every action, in ascending `seq` order.
    pub fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(fold(Self::read_records(&self.path)?))
    }
}

/// Folds records by `seq`; the last record for a sequence number wins.
pub fn fold(records: Vec<AuditRecord>) -> Vec<AuditEntry> {
    let mut entries: BTreeMap<u64, AuditEntry> = BTreeMap::new();
    for record in records {
        let applied_at = (record.status == AuditStatus::Applied).then_some(record.timestamp);
        match entries.get_mut(&record.seq) {
            Some(entry) => {
                entry.status = record.status;
                entry.updated_at = record.timestamp;
                if record.destination.is_some() {
                    entry.destination = record.destination;
                }
                if record.error.is_some() {
                    entry.error = record.error;
                }
                if applied_at.is_some() {
                    entry.applied_at = applied_at;
                }
            }
            None => {
                entries.insert(
                    record.seq,
                    AuditEntry {
                        seq: record.seq,
                        kind: record.kind,
                        source: record.source,
                        destination: record.destination,
                        reason: record.reason,
                        status: record.status,
                        error: record.error,
                        applied_at,
                        updated_at: record.timestamp,
                    },
                );
            }
        }
    }
    entries.into_values().collect()
}
