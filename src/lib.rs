//! cloudtidy - consolidate cloud drive exports into one library
//!
//! This library reads a manifest of files gathered from several cloud
//! sources, resolves exact and near duplicates, classifies the survivors
//! against a taxonomy of category rules, and produces a reviewable plan of
//! moves and deletions. Plans are executed with a dry-run mode, an
//! append-only audit log, undo and a time-gated trash purge.

pub mod audit;
pub mod cli;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod executor;
pub mod logging;
pub mod manifest;
pub mod naming;
pub mod output;
pub mod plan;
pub mod purge;
pub mod review;
pub mod taxonomy;
pub mod undo;

pub use audit::{AuditEntry, AuditLog, AuditStatus};
pub use config::{ConfigError, JunkFilter, Settings};
pub use dedupe::{Disposition, DuplicateGroup, DuplicateResolver, Resolution};
pub use error::{Error, Result};
pub use executor::{CancellationToken, ExecutionReport, ExecutorOptions, OutcomeObserver, PlanExecutor};
pub use manifest::{ContentHash, FileRecord, ManifestIndex, Source};
pub use plan::{ActionKind, ActionStatus, MoveAction, Plan, PlanBuilder};
pub use purge::TrashPurger;
pub use review::{ReviewDecisions, apply_decisions};
pub use taxonomy::{CategoryRule, Classification, Confidence, ContentSignals, Taxonomy, TaxonomyMatcher};
pub use undo::{UndoManager, UndoReport};
