/// Reverting executed plans from the audit log.
///
/// Applied actions are walked newest first and each file is moved from its
/// recorded destination back to its source. Every successful restore appends
/// a `reverted` record, so running undo twice never restores a file twice.
use crate::audit::{AuditEntry, AuditError, AuditLog, AuditStatus};
use crate::executor::move_file;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Represents the result of an undo operation.
#[derive(Debug, Default)]
pub struct UndoReport {
    /// Files moved back to their source (or that would be, in a dry run).
    pub restored_files: Vec<PathBuf>,
    /// Files that could not be restored, with the reason.
    pub failed_restores: Vec<(PathBuf, String)>,
    /// Entries skipped because the file is no longer where the log says.
    pub skipped_files: Vec<(PathBuf, String)>,
    /// Files that occupied a source path and were renamed out of the way.
    pub backups: Vec<PathBuf>,
}

impl UndoReport {
    pub fn total_processed(&self) -> usize {
        self.restored_files.len() + self.failed_restores.len() + self.skipped_files.len()
    }

    /// Returns true if every applied action was restored.
    pub fn is_complete_success(&self) -> bool {
        self.failed_restores.is_empty() && self.skipped_files.is_empty()
    }
}

/// Manages undo operations for executed plans.
pub struct UndoManager;

impl UndoManager {
    /// Reverts every applied action in `audit`, newest first.
    ///
    /// # Edge Cases Handled
    ///
    /// * **File not found**: Skipped, the entry stays `applied`
    /// * **Source path occupied**: The occupying file is backed up with a timestamp suffix
    /// * **Permission denied**: Recorded as a failure with the error reason
    /// * **Already reverted or purged**: Ignored
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cloudtidy::audit::AuditLog;
    /// use cloudtidy::undo::UndoManager;
    /// use std::path::Path;
    ///
    /// let audit = AuditLog::open(Path::new(".cloudtidy/audit-log.jsonl")).unwrap();
    /// match UndoManager::undo(&audit, false) {
    ///     Ok(report) => println!("Restored {} files", report.restored_files.len()),
    ///     Err(e) => eprintln!("Undo failed: {}", e),
    /// }
    /// ```
    pub fn undo(audit: &AuditLog, dry_run: bool) -> Result<UndoReport, AuditError> {
        let entries = audit.entries()?;
        let mut report = UndoReport::default();

        for entry in entries.iter().rev().filter(|e| e.status == AuditStatus::Applied) {
            let Some(current) = entry.destination.as_deref() else {
                continue;
            };

            if !current.exists() {
                report.skipped_files.push((
                    current.to_path_buf(),
                    "file not found at recorded destination".to_string(),
                ));
                continue;
            }
            if dry_run {
                report.restored_files.push(entry.source.clone());
                continue;
            }

            match Self::restore_file(entry, current) {
                Ok(backup) => {
                    audit.record_status(entry, AuditStatus::Reverted, "undo")?;
                    report.restored_files.push(entry.source.clone());
                    report.backups.extend(backup);
                }
                Err(reason) => {
                    warn!("could not restore {}: {}", entry.source.display(), reason);
                    report.failed_restores.push((entry.source.clone(), reason));
                }
            }
        }

        info!(
            "restored {} files, {} failed, {} skipped",
            report.restored_files.len(),
            report.failed_restores.len(),
            report.skipped_files.len()
        );
        Ok(report)
    }

    /// Moves `current` back to the entry's source path, backing up whatever
    /// now occupies that path. Returns the backup path, if one was made.
    fn restore_file(entry: &AuditEntry, current: &Path) -> Result<Option<PathBuf>, String> {
        let original = &entry.source;
        if let Some(parent) = original.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("could not recreate {}: {}", parent.display(), e))?;
        }

        let backup = if original.exists() {
            let backup_path = Self::generate_backup_path(original);
            fs::rename(original, &backup_path).map_err(|e| format!("could not back up conflicting file: {}", e))?;
            Some(backup_path)
        } else {
            None
        };

        move_file(current, original).map_err(|e| format!("failed to restore file: {}", e))?;
        Ok(backup)
    }

    /// Generates a backup path for a file by appending a timestamp.
    ///
    /// Example: `file.txt` becomes `file.txt.bak.20251109-143052`
    fn generate_backup_path(original_path: &Path) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let filename = original_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file");

        let backup_name = format!("{}.bak.{}", filename, timestamp);

        if let Some(parent) = original_path.parent() {
            parent.join(backup_name)
        } else {
            PathBuf::from(backup_name)
        }
    }
}
