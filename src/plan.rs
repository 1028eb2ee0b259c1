//! Move plans: the reviewable list of filesystem actions for one run.
//!
//! The builder merges the duplicate resolution and the classifications into
//! one action per manifest record. Deletes come first, then moves, then
//! skips; within each group actions follow source path order, except that a
//! move into another move's source waits for it. Move destinations are made
//! unique here, so the executor never has to rename anything. XMP sidecars
//! follow their image.

use crate::config::LibrarySettings;
use crate::dedupe::{Disposition, GroupKind, Resolution};
use crate::manifest::{FileRecord, ManifestIndex};
use crate::naming;
use crate::taxonomy::{Classification, Confidence, UNCATEGORIZED};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("source {} appears in more than one action", .0.display())]
    DuplicateSource(PathBuf),

    #[error("destination {} is claimed by more than one move", .0.display())]
    DuplicateDestination(PathBuf),

    #[error("{kind} action for {} has no destination", path.display())]
    MissingDestination { kind: ActionKind, path: PathBuf },

    #[error("failed to access plan file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse plan file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Move,
    Delete,
    Skip,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Move => "move",
            ActionKind::Delete => "delete",
            ActionKind::Skip => "skip",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Applied,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Applied => "applied",
            ActionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single planned filesystem action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveAction {
    pub kind: ActionKind,
    pub source_path: PathBuf,
    /// Library destination for moves, trash path for deletes, absent for skips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_path: Option<PathBuf>,
    pub reason: String,
    #[serde(default)]
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
}

impl MoveAction {
    fn new(kind: ActionKind, source: &Path, destination: Option<PathBuf>, reason: String) -> Self {
        Self {
            kind,
            source_path: source.to_path_buf(),
            destination_path: destination,
            reason,
            status: ActionStatus::Pending,
            category: None,
            confidence: None,
        }
    }

    /// Move and delete actions touch the filesystem; skips do not.
    pub fn is_mutating(&self) -> bool {
        self.kind != ActionKind::Skip
    }
}

/// Per-kind action counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub moves: usize,
    pub deletes: usize,
    pub skips: usize,
    pub needs_review: usize,
    pub low_confidence: usize,
}

/// An ordered, validated list of actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub created_at: DateTime<Utc>,
    pub base_dir: PathBuf,
    pub trash_dir: PathBuf,
    pub actions: Vec<MoveAction>,
}

impl Plan {
    /// Checks that sources and move destinations are pairwise distinct and
    /// that every mutating action has a destination.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut sources = HashSet::with_capacity(self.actions.len());
        let mut destinations = HashSet::new();
        for action in &self.actions {
            if !sources.insert(action.source_path.as_path()) {
                return Err(PlanError::DuplicateSource(action.source_path.clone()));
            }
            if !action.is_mutating() {
                continue;
            }
            let Some(destination) = action.destination_path.as_deref() else {
                return Err(PlanError::MissingDestination {
                    kind: action.kind,
                    path: action.source_path.clone(),
                });
            };
            if !destinations.insert(destination) {
                return Err(PlanError::DuplicateDestination(destination.to_path_buf()));
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match action.kind {
                ActionKind::Move => {
                    summary.moves += 1;
                    if action.confidence == Some(Confidence::Low) {
                        summary.low_confidence += 1;
                    }
                }
                ActionKind::Delete => summary.deletes += 1,
                ActionKind::Skip => {
                    summary.skips += 1;
                    if action.reason.starts_with(NEEDS_REVIEW) {
                        summary.needs_review += 1;
                    }
                }
            }
        }
        summary
    }

    pub fn save_json(&self, path: &Path) -> Result<(), PlanError> {
        let io = |source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(self).map_err(|e| PlanError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, json).map_err(io)
    }

    pub fn load_json(path: &Path) -> Result<Self, PlanError> {
        let content = fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|e| PlanError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Writes a tab-separated review sheet of the actions.
    pub fn write_tsv(&self, path: &Path) -> Result<(), PlanError> {
        #[derive(Serialize)]
        struct Row<'a> {
            kind: ActionKind,
            status: ActionStatus,
            source: String,
            destination: String,
            category: &'a str,
            confidence: &'a str,
            reason: &'a str,
        }

        let csv_err = |e: csv::Error| PlanError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .map_err(csv_err)?;
        for action in &self.actions {
            writer
                .serialize(Row {
                    kind: action.kind,
                    status: action.status,
                    source: action.source_path.display().to_string(),
                    destination: action
                        .destination_path
                        .as_ref()
                        .map(|d| d.display().to_string())
                        .unwrap_or_default(),
                    category: action.category.as_deref().unwrap_or(""),
                    confidence: action.confidence.map(|c| c.as_str()).unwrap_or(""),
                    reason: &action.reason,
                })
                .map_err(csv_err)?;
        }
        writer.flush().map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

const NEEDS_REVIEW: &str = "needs review";

/// Staging path for a deleted file: the trash root plus the source path
/// with its root and prefix removed.
pub fn trash_path(trash_dir: &Path, source: &Path) -> PathBuf {
    let mut path = trash_dir.to_path_buf();
    path.extend(source.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part),
        _ => None,
    }));
    path
}

/// Builds plans from a resolution and classifications.
pub struct PlanBuilder<'a> {
    library: &'a LibrarySettings,
}

/// What happens to one record before destinations are made unique.
enum Decision<'r> {
    Move(&'r Classification),
    InPlace(&'r Classification),
    Delete(String),
    Skip(String),
}

impl Decision<'_> {
    /// The record ends up in the library, moved or where it already is.
    fn keeps_file(&self) -> bool {
        matches!(self, Decision::Move(_) | Decision::InPlace(_))
    }
}

/// Image formats whose XMP sidecars travel with them.
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "tiff", "tif", "heic", "heif", "cr2", "nef", "arw", "dng", "raw", "raf", "orf", "pef",
    "rw2", "srw", "x3f",
];

impl<'a> PlanBuilder<'a> {
    pub fn new(library: &'a LibrarySettings) -> Self {
        Self { library }
    }

    pub fn build(
        &self,
        index: &ManifestIndex,
        resolution: &Resolution,
        classifications: &[Classification],
    ) -> Plan {
        let by_path: HashMap<&Path, &Classification> = classifications
            .iter()
            .map(|c| (c.path.as_path(), c))
            .collect();

        let mut records: Vec<&FileRecord> = index.records().map(|(_, r)| r).collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));

        let decisions: Vec<(&FileRecord, Decision)> = records
            .into_iter()
            .map(|record| (record, self.decide(record, resolution, &by_path)))
            .collect();

        // Files that stay put keep their paths.
        let mut claimed: HashSet<PathBuf> = decisions
            .iter()
            .filter(|(_, d)| matches!(d, Decision::Skip(_) | Decision::InPlace(_)))
            .map(|(r, _)| r.path.clone())
            .collect();

        // Sidecars are placed after their image, keyed by sidecar position.
        let position: HashMap<&Path, usize> = decisions
            .iter()
            .enumerate()
            .map(|(i, (r, _))| (r.path.as_path(), i))
            .collect();
        let followers: BTreeMap<usize, usize> = decisions
            .iter()
            .enumerate()
            .filter(|(_, (_, d))| d.keeps_file())
            .filter_map(|(i, (record, _))| {
                sidecar_candidates(&record.path)
                    .iter()
                    .filter_map(|candidate| position.get(candidate.as_path()).copied())
                    .find(|&image| decisions[image].1.keeps_file())
                    .map(|image| (i, image))
            })
            .collect();

        let mut slots: Vec<Option<MoveAction>> = vec![None; decisions.len()];
        let mut landed: HashMap<usize, PathBuf> = HashMap::new();
        for (i, (record, decision)) in decisions.iter().enumerate() {
            if followers.contains_key(&i) {
                continue;
            }
            let action = self.action_for(record, decision, &mut claimed);
            match decision {
                Decision::Move(_) => {
                    if let Some(destination) = &action.destination_path {
                        landed.insert(i, destination.clone());
                    }
                }
                Decision::InPlace(_) => {
                    landed.insert(i, record.path.clone());
                }
                _ => {}
            }
            slots[i] = Some(action);
        }
        for (&i, &image) in &followers {
            let record = decisions[i].0;
            let (image_record, image_decision) = &decisions[image];
            let (Some(location), Decision::Move(c) | Decision::InPlace(c)) = (landed.get(&image), image_decision)
            else {
                continue;
            };
            slots[i] = Some(sidecar_action(record, &image_record.path, location, c, &mut claimed));
        }

        let actions = execution_order(slots.into_iter().flatten().collect());
        for action in &actions {
            debug!("{} {} ({})", action.kind, action.source_path.display(), action.reason);
        }

        let plan = Plan {
            created_at: Utc::now(),
            base_dir: self.library.base_dir.clone(),
            trash_dir: self.library.trash_dir.clone(),
            actions,
        };
        let summary = plan.summary();
        info!(
            "planned {} moves, {} deletes, {} skips ({} need review)",
            summary.moves, summary.deletes, summary.skips, summary.needs_review
        );
        plan
    }

    fn action_for(&self, record: &FileRecord, decision: &Decision, claimed: &mut HashSet<PathBuf>) -> MoveAction {
        match decision {
            Decision::Delete(reason) => MoveAction::new(
                ActionKind::Delete,
                &record.path,
                Some(trash_path(&self.library.trash_dir, &record.path)),
                reason.clone(),
            ),
            Decision::Skip(reason) => MoveAction::new(ActionKind::Skip, &record.path, None, reason.clone()),
            Decision::InPlace(_) => {
                MoveAction::new(ActionKind::Skip, &record.path, None, "already in place".to_string())
            }
            Decision::Move(classification) => {
                let (destination, renamed) = unique_destination(record, &classification.destination, claimed);
                let mut reason = match &classification.matched_pattern {
                    Some(pattern) => format!(
                        "classified as {} ({} confidence, pattern '{}')",
                        classification.category, classification.confidence, pattern
                    ),
                    None => format!("{}: no rule matched", UNCATEGORIZED),
                };
                if renamed {
                    reason.push_str("; renamed to avoid a destination collision");
                }
                let mut action = MoveAction::new(ActionKind::Move, &record.path, Some(destination), reason);
                action.category = Some(classification.category.clone());
                action.confidence = Some(classification.confidence);
                action
            }
        }
    }

    fn decide<'r>(
        &self,
        record: &FileRecord,
        resolution: &Resolution,
        by_path: &HashMap<&Path, &'r Classification>,
    ) -> Decision<'r> {
        if let Some(junk) = resolution.junk_entry(&record.path) {
            return Decision::Delete(format!("junk/temp file ({})", junk.rule));
        }
        if let Some((group, member)) = resolution.member(&record.path) {
            match member.disposition {
                Disposition::Delete => return Decision::Delete(member.reason.clone()),
                Disposition::Review => {
                    let key = match &group.kind {
                        GroupKind::Near { key } => key.clone(),
                        GroupKind::Exact { hash } => hash.to_string(),
                    };
                    return Decision::Skip(format!(
                        "{}: near duplicate of {} ({})",
                        NEEDS_REVIEW,
                        group.keep.display(),
                        key
                    ));
                }
                Disposition::Keep => {}
            }
        }
        match by_path.get(record.path.as_path()) {
            Some(c) if c.destination == record.path => Decision::InPlace(c),
            Some(c) => Decision::Move(c),
            None => Decision::Skip("not classified".to_string()),
        }
    }
}

/// Images an XMP sidecar may belong to: `IMG_1.CR2` for `IMG_1.CR2.xmp`,
/// otherwise `IMG_1.<ext>` for `IMG_1.xmp` in either case.
fn sidecar_candidates(path: &Path) -> Vec<PathBuf> {
    if !path.extension().is_some_and(|e| e.eq_ignore_ascii_case("xmp")) {
        return Vec::new();
    }
    let inner = path.with_extension("");
    if has_image_extension(&inner) {
        return vec![inner];
    }
    IMAGE_EXTENSIONS
        .iter()
        .flat_map(|ext| [path.with_extension(ext), path.with_extension(ext.to_ascii_uppercase())])
        .collect()
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Puts a sidecar next to where its image lands, named after the image's
/// final file name.
fn sidecar_action(
    record: &FileRecord,
    image: &Path,
    image_location: &Path,
    classification: &Classification,
    claimed: &mut HashSet<PathBuf>,
) -> MoveAction {
    let extension = record.path.extension().map(|e| e.to_string_lossy()).unwrap_or_default();
    let base = if record.path.with_extension("") == image {
        image_location.file_name()
    } else {
        image_location.file_stem()
    };
    let wanted = image_location.with_file_name(format!(
        "{}.{}",
        base.map(|b| b.to_string_lossy()).unwrap_or_default(),
        extension
    ));
    if wanted == record.path {
        return MoveAction::new(ActionKind::Skip, &record.path, None, "already in place".to_string());
    }

    let (destination, renamed) = unique_destination(record, &wanted, claimed);
    let mut reason = format!("sidecar of {}, kept with its image", image.display());
    if renamed {
        reason.push_str("; renamed to avoid a destination collision");
    }
    let mut action = MoveAction::new(ActionKind::Move, &record.path, Some(destination), reason);
    action.category = Some(classification.category.clone());
    action.confidence = Some(classification.confidence);
    action
}

/// Orders actions for execution. Deletes come first so no move lands on a
/// file that is about to be trashed. A move into another move's source runs
/// after it. Skips go last. Otherwise source order is kept.
fn execution_order(actions: Vec<MoveAction>) -> Vec<MoveAction> {
    let (deletes, rest): (Vec<_>, Vec<_>) = actions.into_iter().partition(|a| a.kind == ActionKind::Delete);
    let (moves, skips): (Vec<_>, Vec<_>) = rest.into_iter().partition(|a| a.kind == ActionKind::Move);

    let by_source: HashMap<&Path, usize> = moves
        .iter()
        .enumerate()
        .map(|(i, a)| (a.source_path.as_path(), i))
        .collect();
    let mut placed = vec![false; moves.len()];
    let mut order = Vec::with_capacity(moves.len());
    for start in 0..moves.len() {
        // Walk the chain of moves this one waits on; a cycle is cut where it closes.
        let mut chain = Vec::new();
        let mut current = start;
        while !placed[current] && !chain.contains(&current) {
            chain.push(current);
            match moves[current].destination_path.as_deref().and_then(|d| by_source.get(d)) {
                Some(&next) => current = next,
                None => break,
            }
        }
        for &i in chain.iter().rev() {
            placed[i] = true;
            order.push(i);
        }
    }

    let mut slots: Vec<Option<MoveAction>> = moves.into_iter().map(Some).collect();
    deletes
        .into_iter()
        .chain(order.into_iter().filter_map(|i| slots[i].take()))
        .chain(skips)
        .collect()
}

/// Claims `wanted`, or a hash-suffixed variant of it when already taken.
/// Returns the claimed path and whether it differs from `wanted`.
fn unique_destination(record: &FileRecord, wanted: &Path, claimed: &mut HashSet<PathBuf>) -> (PathBuf, bool) {
    if claimed.insert(wanted.to_path_buf()) {
        return (wanted.to_path_buf(), false);
    }

    let parent = wanted.parent().unwrap_or(Path::new(""));
    let file_name = wanted
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let short = parent.join(naming::with_suffix(&file_name, record.content_hash.short(8)));
    if claimed.insert(short.clone()) {
        return (short, true);
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(record.path.to_string_lossy().as_bytes());
    hasher.update(record.content_hash.as_str().as_bytes());
    let digest = hasher.finalize().to_hex();
    let mut candidate = parent.join(naming::with_suffix(&file_name, &digest[..12]));
    let mut n = 2;
    while !claimed.insert(candidate.clone()) {
        candidate = parent.join(naming::with_suffix(&file_name, &format!("{}-{}", &digest[..12], n)));
        n += 1;
    }
    (candidate, true)
}
