//! Permanent removal of trashed files once their retention window has passed.

use crate::audit::{AuditError, AuditLog, AuditStatus};
use crate::plan::ActionKind;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct PurgeReport {
    /// Trashed files removed (or that would be, in a dry run).
    pub purged: Vec<PathBuf>,
    /// Trashed files still inside the retention window.
    pub retained: usize,
    /// Trash entries whose file is already gone.
    pub missing: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub reclaimed_bytes: u64,
}

pub struct TrashPurger;

impl TrashPurger {
    /// Removes every trashed file whose delete was applied more than
    /// `retention` before `now`. Reverted and already purged entries are
    /// ignored.
    pub fn purge(
        audit: &AuditLog,
        retention: Duration,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<PurgeReport, AuditError> {
        let cutoff = now - retention;
        let mut report = PurgeReport::default();

        let trashed = audit
            .entries()?
            .into_iter()
            .filter(|e| e.kind == ActionKind::Delete && e.status == AuditStatus::Applied);

        for entry in trashed {
            let Some(path) = entry.destination.clone() else {
                continue;
            };
            let applied_at = entry.applied_at.unwrap_or(entry.updated_at);
            if applied_at > cutoff {
                report.retained += 1;
                continue;
            }

            let size = match fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(_) => {
                    debug!("trashed file {} already gone", path.display());
                    report.missing.push(path);
                    continue;
                }
            };
            if dry_run {
                report.reclaimed_bytes += size;
                report.purged.push(path);
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    audit.record_status(&entry, AuditStatus::Purged, "retention elapsed")?;
                    report.reclaimed_bytes += size;
                    report.purged.push(path);
                }
                Err(e) => {
                    warn!("could not purge {}: {}", path.display(), e);
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        info!(
            "purged {} trashed files ({} bytes), {} still retained",
            report.purged.len(),
            report.reclaimed_bytes,
            report.retained
        );
        Ok(report)
    }
}
