//! Plan execution.
//!
//! A dry run checks every action against the filesystem without changing
//! anything; checks are independent and run in parallel. A live run applies
//! actions one by one in plan order, wrapping each mutating action in an
//! intent/outcome pair in the audit log. Failed actions are reported and the
//! run moves on. Deletions only ever relocate files into the trash.

use crate::audit::{AuditLog, AuditStatus};
use crate::config::ExecutorSettings;
use crate::naming;
use crate::plan::{ActionKind, ActionStatus, MoveAction, Plan, PlanError};
use chrono::Utc;
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that stop a run before any action starts.
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("refusing to execute an invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error(transparent)]
    Audit(#[from] crate::audit::AuditError),
}

/// Why a single action failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionFailure {
    #[error("source not found")]
    SourceNotFound,

    #[error("destination exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("destination not writable: {}", .0.display())]
    NotWritable(PathBuf),

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("{0}")]
    Io(String),
}

impl ActionFailure {
    fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => ActionFailure::SourceNotFound,
            ErrorKind::PermissionDenied => ActionFailure::PermissionDenied(err.to_string()),
            _ => ActionFailure::Io(err.to_string()),
        }
    }
}

/// Cooperative cancellation flag shared between the runner and a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Called with every outcome as soon as it is known.
pub type OutcomeObserver = Arc<dyn Fn(&ActionOutcome) + Send + Sync>;

#[derive(Clone)]
pub struct ExecutorOptions {
    pub action_timeout: Duration,
    pub prune_empty_dirs_under: Option<PathBuf>,
    pub cancellation: CancellationToken,
    pub progress: Option<ProgressBar>,
    pub on_outcome: Option<OutcomeObserver>,
}

impl std::fmt::Debug for ExecutorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorOptions")
            .field("action_timeout", &self.action_timeout)
            .field("prune_empty_dirs_under", &self.prune_empty_dirs_under)
            .field("cancellation", &self.cancellation)
            .field("progress", &self.progress.is_some())
            .field("on_outcome", &self.on_outcome.is_some())
            .finish()
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from(&ExecutorSettings::default())
    }
}

impl From<&ExecutorSettings> for ExecutorOptions {
    fn from(settings: &ExecutorSettings) -> Self {
        Self {
            action_timeout: settings.action_timeout(),
            prune_empty_dirs_under: settings.prune_empty_dirs_under.clone(),
            cancellation: CancellationToken::new(),
            progress: None,
            on_outcome: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    WouldApply,
    Failed,
    Skipped,
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    /// The planned action with its final status.
    pub action: MoveAction,
    pub outcome: Outcome,
    /// Where the file ended up (or would end up), when different from the plan.
    pub final_destination: Option<PathBuf>,
    pub error: Option<String>,
}

/// A mutating action as the executor understood it, for comparing runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IntendedAction {
    pub kind: ActionKind,
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub dry_run: bool,
    pub cancelled: bool,
    pub outcomes: Vec<ActionOutcome>,
}

impl ExecutionReport {
    fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.iter().filter(|o| o.outcome == outcome).count()
    }

    /// Actions applied, or that would be applied in a dry run.
    pub fn succeeded(&self) -> usize {
        self.count(Outcome::Applied) + self.count(Outcome::WouldApply)
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(Outcome::Skipped)
    }

    pub fn not_attempted(&self) -> usize {
        self.count(Outcome::NotAttempted)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|o| o.outcome == Outcome::Failed)
    }

    /// Skipped actions waiting on a human decision.
    pub fn review_items(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.action.kind == ActionKind::Skip && o.action.reason.starts_with("needs review"))
    }

    /// The mutating actions of the plan, in order, as planned.
    pub fn intended_actions(&self) -> Vec<IntendedAction> {
        self.outcomes
            .iter()
            .filter(|o| o.action.is_mutating())
            .map(|o| IntendedAction {
                kind: o.action.kind,
                source: o.action.source_path.clone(),
                destination: o.action.destination_path.clone(),
            })
            .collect()
    }
}

pub struct PlanExecutor<'a> {
    audit: &'a AuditLog,
    options: ExecutorOptions,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(audit: &'a AuditLog, options: ExecutorOptions) -> Self {
        Self { audit, options }
    }

    /// Runs the plan. The plan is validated first; an invalid plan runs nothing.
    pub fn execute(&self, plan: &Plan, dry_run: bool) -> Result<ExecutionReport, ExecuteError> {
        plan.validate()?;
        info!(
            "{} {} actions",
            if dry_run { "checking" } else { "executing" },
            plan.actions.len()
        );

        let report = if dry_run {
            self.dry_run(plan)
        } else {
            self.live_run(plan)?
        };

        info!(
            "{} succeeded, {} failed, {} skipped, {} not attempted{}",
            report.succeeded(),
            report.failed(),
            report.skipped(),
            report.not_attempted(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    fn dry_run(&self, plan: &Plan) -> ExecutionReport {
        // Source of each mutating action, by position. A destination that an
        // earlier action moves away counts as free.
        let vacated: HashMap<&Path, usize> = plan
            .actions
            .iter()
            .enumerate()
            .filter(|(_, action)| action.is_mutating())
            .map(|(index, action)| (action.source_path.as_path(), index))
            .collect();

        let outcomes: Vec<ActionOutcome> = plan
            .actions
            .par_iter()
            .enumerate()
            .map(|(index, action)| {
                let outcome = if self.options.cancellation.is_cancelled() {
                    not_attempted(action)
                } else if !action.is_mutating() {
                    skipped(action)
                } else {
                    let freed = action
                        .destination_path
                        .as_deref()
                        .and_then(|destination| vacated.get(destination))
                        .is_some_and(|&earlier| earlier < index);
                    match check_action(action, freed) {
                        Ok(destination) => ActionOutcome {
                            action: action.clone(),
                            outcome: Outcome::WouldApply,
                            final_destination: destination,
                            error: None,
                        },
                        Err(failure) => failed(action, failure),
                    }
                };
                self.observe(&outcome);
                if let Some(progress) = &self.options.progress {
                    progress.inc(1);
                }
                outcome
            })
            .collect();

        ExecutionReport {
            dry_run: true,
            cancelled: self.options.cancellation.is_cancelled(),
            outcomes,
        }
    }

    fn live_run(&self, plan: &Plan) -> Result<ExecutionReport, ExecuteError> {
        thread::scope(|scope| -> Result<ExecutionReport, ExecuteError> {
            let mut report = ExecutionReport::default();
            let mut pending = Vec::new();

            for (index, action) in plan.actions.iter().enumerate() {
                if report.cancelled || self.options.cancellation.is_cancelled() {
                    report.cancelled = true;
                    report.outcomes.push(not_attempted(action));
                    continue;
                }
                if let Some(progress) = &self.options.progress {
                    progress.set_message(action.source_path.display().to_string());
                }

                let outcome = if action.is_mutating() {
                    self.apply(scope, index, action, &mut pending)?
                } else {
                    skipped(action)
                };
                self.observe(&outcome);
                report.outcomes.push(outcome);

                if let Some(progress) = &self.options.progress {
                    progress.inc(1);
                }
            }

            for late in pending {
                self.settle(late, &mut report)?;
            }

            if report.cancelled {
                warn!("run cancelled; {} actions not attempted", report.not_attempted());
            }
            Ok(report)
        })
    }

    /// Records the intent, moves the file on a scoped worker thread and waits
    /// up to the action timeout. A worker that overruns keeps going; it is
    /// parked in `pending` and settled before the run returns.
    fn apply<'scope>(
        &self,
        scope: &'scope thread::Scope<'scope, '_>,
        index: usize,
        action: &MoveAction,
        pending: &mut Vec<Pending>,
    ) -> Result<ActionOutcome, ExecuteError> {
        let seq = self.audit.record_intent(action)?;
        let Some(planned) = action.destination_path.clone() else {
            return self.finish(seq, action, Err(ActionFailure::Io("no destination".to_string())));
        };
        let kind = action.kind;
        let source = action.source_path.clone();

        let (tx, rx) = mpsc::channel();
        scope.spawn(move || {
            let _ = tx.send(relocate_now(kind, &source, &planned));
        });

        let result = wait_bounded(&rx, self.options.action_timeout);
        if matches!(result, Err(ActionFailure::TimedOut(_))) {
            pending.push(Pending {
                index,
                seq,
                receiver: rx,
            });
        }
        self.finish(seq, action, result)
    }

    /// Writes the outcome record for `seq` and builds the report entry.
    fn finish(
        &self,
        seq: u64,
        action: &MoveAction,
        result: Result<PathBuf, ActionFailure>,
    ) -> Result<ActionOutcome, ExecuteError> {
        match result {
            Ok(destination) => {
                self.audit
                    .record_outcome(seq, action, Some(&destination), AuditStatus::Applied, None)?;
                debug!(
                    "{} {} -> {}",
                    action.kind,
                    action.source_path.display(),
                    destination.display()
                );
                if let Some(root) = &self.options.prune_empty_dirs_under {
                    prune_empty_dirs(&action.source_path, root);
                }
                let mut applied = action.clone();
                applied.status = ActionStatus::Applied;
                let final_destination =
                    (action.destination_path.as_deref() != Some(destination.as_path())).then_some(destination);
                Ok(ActionOutcome {
                    action: applied,
                    outcome: Outcome::Applied,
                    final_destination,
                    error: None,
                })
            }
            Err(failure) => {
                warn!("{} {} failed: {}", action.kind, action.source_path.display(), failure);
                self.audit.record_outcome(
                    seq,
                    action,
                    action.destination_path.as_deref(),
                    AuditStatus::Failed,
                    Some(failure.to_string()),
                )?;
                Ok(failed(action, failure))
            }
        }
    }

    /// Waits for a worker that overran its timeout. If the file was moved
    /// after all, a second outcome record marks the same entry applied so
    /// undo can find it.
    fn settle(&self, late: Pending, report: &mut ExecutionReport) -> Result<(), ExecuteError> {
        let Ok(Ok(destination)) = late.receiver.recv() else {
            return Ok(());
        };
        let Some(outcome) = report.outcomes.get_mut(late.index) else {
            return Ok(());
        };
        warn!(
            "{} {} completed after timing out",
            outcome.action.kind,
            outcome.action.source_path.display()
        );
        let mut action = outcome.action.clone();
        action.status = ActionStatus::Pending;
        *outcome = self.finish(late.seq, &action, Ok(destination))?;
        Ok(())
    }

    fn observe(&self, outcome: &ActionOutcome) {
        if let Some(observer) = &self.options.on_outcome {
            observer(outcome);
        }
    }
}

/// A relocation still running when its timeout expired.
struct Pending {
    index: usize,
    seq: u64,
    receiver: mpsc::Receiver<Result<PathBuf, ActionFailure>>,
}

/// Waits up to `timeout` for a worker's result.
fn wait_bounded<T>(
    receiver: &mpsc::Receiver<Result<T, ActionFailure>>,
    timeout: Duration,
) -> Result<T, ActionFailure> {
    match receiver.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(ActionFailure::TimedOut(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(ActionFailure::Io("worker thread exited".to_string())),
    }
}

fn relocate_now(kind: ActionKind, source: &Path, planned: &Path) -> Result<PathBuf, ActionFailure> {
    if !source.exists() {
        return Err(ActionFailure::SourceNotFound);
    }
    let destination = if planned.exists() {
        if kind != ActionKind::Delete {
            return Err(ActionFailure::DestinationExists(planned.to_path_buf()));
        }
        timestamped(planned)
    } else {
        planned.to_path_buf()
    };

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => ActionFailure::NotWritable(parent.to_path_buf()),
            _ => ActionFailure::Io(e.to_string()),
        })?;
    }
    move_file(source, &destination)?;
    Ok(destination)
}

/// Renames `source` to `destination`, copying and removing when they are on
/// different filesystems.
pub(crate) fn move_file(source: &Path, destination: &Path) -> Result<(), ActionFailure> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            debug!("cross-device move of {}, copying", source.display());
            fs::copy(source, destination).map_err(|e| ActionFailure::from_io(&e))?;
            fs::remove_file(source).map_err(|e| ActionFailure::from_io(&e))
        }
        Err(e) => Err(ActionFailure::from_io(&e)),
    }
}

/// `name.ext` → `name-<timestamp>.ext`, for a trash path that is already taken.
fn timestamped(path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%6f").to_string();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(naming::with_suffix(&file_name, &stamp))
}

/// Read-only checks for a dry run. Returns the adjusted destination when the
/// live run would have to pick a different one. `freed` marks a destination
/// that an earlier action in the plan moves away.
fn check_action(action: &MoveAction, freed: bool) -> Result<Option<PathBuf>, ActionFailure> {
    let Some(destination) = action.destination_path.as_deref() else {
        return Err(ActionFailure::Io("no destination".to_string()));
    };
    if !action.source_path.exists() {
        return Err(ActionFailure::SourceNotFound);
    }

    let adjusted = if destination.exists() && !freed {
        if action.kind != ActionKind::Delete {
            return Err(ActionFailure::DestinationExists(destination.to_path_buf()));
        }
        Some(timestamped(destination))
    } else {
        None
    };

    let mut ancestor = destination.parent();
    while let Some(dir) = ancestor {
        if dir.exists() {
            return if is_writable_dir(dir) {
                Ok(adjusted)
            } else {
                Err(ActionFailure::NotWritable(dir.to_path_buf()))
            };
        }
        ancestor = dir.parent();
    }
    Ok(adjusted)
}

/// Creates and drops an anonymous temp file in `dir`. Mode bits alone do not
/// say whether this process may create entries there.
fn is_writable_dir(dir: &Path) -> bool {
    dir.is_dir() && tempfile::tempfile_in(dir).is_ok()
}

/// Removes directories left empty by a move, walking up from the source's
/// parent and stopping at `root`.
fn prune_empty_dirs(source: &Path, root: &Path) {
    let mut dir = source.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        let is_empty = fs::read_dir(current)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty || fs::remove_dir(current).is_err() {
            break;
        }
        debug!("pruned empty directory {}", current.display());
        dir = current.parent();
    }
}

fn skipped(action: &MoveAction) -> ActionOutcome {
    ActionOutcome {
        action: action.clone(),
        outcome: Outcome::Skipped,
        final_destination: None,
        error: None,
    }
}

fn not_attempted(action: &MoveAction) -> ActionOutcome {
    ActionOutcome {
        action: action.clone(),
        outcome: Outcome::NotAttempted,
        final_destination: None,
        error: None,
    }
}

fn failed(action: &MoveAction, failure: ActionFailure) -> ActionOutcome {
    let mut action = action.clone();
    action.status = ActionStatus::Failed;
    ActionOutcome {
        action,
        outcome: Outcome::Failed,
        final_destination: None,
        error: Some(failure.to_string()),
    }
}
