//! Duplicate detection and keep selection.
//!
//! Exact duplicates share a content hash. Near duplicates share a
//! normalized filename key (copy decorations and version markers stripped)
//! and a comparable size. Exact grouping runs first and wins: a record is
//! only considered for near-duplicate grouping if its hash is unique.
//!
//! Within a group one member is kept, chosen by:
//! 1. most recent mtime
//! 2. longest filename once decorations are stripped, undecorated first
//! 3. configured source priority
//! 4. smallest path
//!
//! Exact duplicates of the kept file are deleted. Near duplicates go to
//! human review unless version ordering is unambiguous.

use crate::config::{DedupeSettings, JunkFilter};
use crate::manifest::{ContentHash, FileRecord, ManifestIndex};
use crate::naming::{self, VersionMarker};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What makes the members of a group duplicates of each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupKind {
    Exact { hash: ContentHash },
    Near { key: String },
}

/// Decision for one member of a duplicate group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Keep,
    Delete,
    Review,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    pub path: PathBuf,
    pub size: u64,
    pub disposition: Disposition,
    pub reason: String,
}

/// A set of records that duplicate each other, with exactly one kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    #[serde(flatten)]
    pub kind: GroupKind,
    pub keep: PathBuf,
    /// Kept member first, then the rest by path.
    pub members: Vec<GroupMember>,
}

impl DuplicateGroup {
    pub fn is_exact(&self) -> bool {
        matches!(self.kind, GroupKind::Exact { .. })
    }

    pub fn others(&self) -> impl Iterator<Item = &GroupMember> {
        self.members.iter().filter(|m| m.disposition != Disposition::Keep)
    }
}

/// A temp, lock or backup file scheduled for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JunkEntry {
    pub path: PathBuf,
    pub size: u64,
    pub rule: String,
}

/// Counts for the terminal report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionSummary {
    pub exact_groups: usize,
    pub near_groups: usize,
    pub to_delete: usize,
    pub to_review: usize,
    pub junk: usize,
    pub reclaimable_bytes: u64,
}

/// Output of the resolver: duplicate groups plus junk files.
///
/// Records that appear in neither are implicitly kept.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    groups: Vec<DuplicateGroup>,
    junk: Vec<JunkEntry>,
    #[serde(skip)]
    members: HashMap<PathBuf, (usize, usize)>,
    #[serde(skip)]
    junk_paths: HashMap<PathBuf, usize>,
}

impl Resolution {
    pub fn new(mut groups: Vec<DuplicateGroup>, mut junk: Vec<JunkEntry>) -> Self {
        groups.sort_by(|a, b| a.keep.cmp(&b.keep));
        junk.sort_by(|a, b| a.path.cmp(&b.path));
        let mut resolution = Self {
            groups,
            junk,
            members: HashMap::new(),
            junk_paths: HashMap::new(),
        };
        resolution.reindex();
        resolution
    }

    fn reindex(&mut self) {
        self.groups.retain(|g| g.members.len() > 1);
        self.members = self
            .groups
            .iter()
            .enumerate()
            .flat_map(|(gi, g)| {
                g.members
                    .iter()
                    .enumerate()
                    .map(move |(mi, m)| (m.path.clone(), (gi, mi)))
            })
            .collect();
        self.junk_paths = self
            .junk
            .iter()
            .enumerate()
            .map(|(i, j)| (j.path.clone(), i))
            .collect();
    }

    pub fn groups(&self) -> &[DuplicateGroup] {
        &self.groups
    }

    pub fn junk(&self) -> &[JunkEntry] {
        &self.junk
    }

    /// The group and member entry for `path`, if it belongs to a group.
    pub fn member(&self, path: &Path) -> Option<(&DuplicateGroup, &GroupMember)> {
        let (gi, mi) = *self.members.get(path)?;
        let group = &self.groups[gi];
        Some((group, &group.members[mi]))
    }

    pub fn junk_entry(&self, path: &Path) -> Option<&JunkEntry> {
        self.junk_paths.get(path).map(|i| &self.junk[*i])
    }

    /// Disposition of any record; records outside every group are kept.
    pub fn disposition(&self, path: &Path) -> Disposition {
        if self.junk_paths.contains_key(path) {
            return Disposition::Delete;
        }
        self.member(path)
            .map(|(_, m)| m.disposition)
            .unwrap_or(Disposition::Keep)
    }

    /// Members still waiting for a human decision.
    pub fn review_items(&self) -> impl Iterator<Item = (&DuplicateGroup, &GroupMember)> {
        self.groups.iter().flat_map(|g| {
            g.members
                .iter()
                .filter(|m| m.disposition == Disposition::Review)
                .map(move |m| (g, m))
        })
    }

    /// Marks a review member for deletion. Returns false if `path` is not under review.
    pub fn confirm_delete(&mut self, path: &Path, reason: String) -> bool {
        let Some(&(gi, mi)) = self.members.get(path) else {
            return false;
        };
        let member = &mut self.groups[gi].members[mi];
        if member.disposition != Disposition::Review {
            return false;
        }
        member.disposition = Disposition::Delete;
        member.reason = reason;
        true
    }

    /// Takes a review member out of its group so it is kept on its own.
    /// Returns false if `path` is not under review.
    pub fn release(&mut self, path: &Path) -> bool {
        let Some(&(gi, mi)) = self.members.get(path) else {
            return false;
        };
        if self.groups[gi].members[mi].disposition != Disposition::Review {
            return false;
        }
        self.groups[gi].members.remove(mi);
        self.reindex();
        true
    }

    pub fn summary(&self) -> ResolutionSummary {
        let mut summary = ResolutionSummary {
            junk: self.junk.len(),
            reclaimable_bytes: self.junk.iter().map(|j| j.size).sum(),
            ..ResolutionSummary::default()
        };
        for group in &self.groups {
            if group.is_exact() {
                summary.exact_groups += 1;
            } else {
                summary.near_groups += 1;
            }
            for member in group.others() {
                match member.disposition {
                    Disposition::Delete => {
                        summary.to_delete += 1;
                        summary.reclaimable_bytes += member.size;
                    }
                    Disposition::Review => summary.to_review += 1,
                    Disposition::Keep => {}
                }
            }
        }
        summary
    }
}

/// Groups duplicates and applies the keep policy.
pub struct DuplicateResolver<'a> {
    settings: &'a DedupeSettings,
    junk: &'a JunkFilter,
}

impl<'a> DuplicateResolver<'a> {
    pub fn new(settings: &'a DedupeSettings, junk: &'a JunkFilter) -> Self {
        Self { settings, junk }
    }

    pub fn resolve(&self, index: &ManifestIndex) -> Resolution {
        let mut groups = Vec::new();
        let mut in_exact_group: HashSet<&Path> = HashSet::new();

        for (hash, ids) in index.hash_buckets() {
            if ids.len() < 2 {
                continue;
            }
            let records: Vec<&FileRecord> = ids.iter().map(|id| index.get(*id)).collect();
            in_exact_group.extend(records.iter().map(|r| r.path.as_path()));
            groups.push(self.resolve_exact(hash, records));
        }

        let mut junk = Vec::new();
        let mut by_key: BTreeMap<String, Vec<&FileRecord>> = BTreeMap::new();
        for (_, record) in index.records() {
            if in_exact_group.contains(record.path.as_path()) {
                continue;
            }
            let file_name = record.file_name();
            if let Some(rule) = self.junk.matched_rule(&file_name) {
                debug!("junk file {} ({})", record.path.display(), rule);
                junk.push(JunkEntry {
                    path: record.path.clone(),
                    size: record.size,
                    rule,
                });
                continue;
            }
            let key = naming::near_duplicate_key(&file_name, &record.extension);
            by_key.entry(key).or_default().push(record);
        }

        for (key, records) in by_key {
            if records.len() < 2 {
                continue;
            }
            for cluster in self.size_clusters(records) {
                groups.push(self.resolve_near(&key, cluster));
            }
        }

        let resolution = Resolution::new(groups, junk);
        let summary = resolution.summary();
        info!(
            "resolved {} exact and {} near duplicate groups: {} to delete, {} for review, {} junk",
            summary.exact_groups, summary.near_groups, summary.to_delete, summary.to_review, summary.junk
        );
        resolution
    }

    /// Splits same-key records into clusters whose sizes stay within the
    /// tolerance of the cluster's smallest member. Singletons are dropped.
    fn size_clusters<'r>(&self, mut records: Vec<&'r FileRecord>) -> Vec<Vec<&'r FileRecord>> {
        records.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.path.cmp(&b.path)));

        let mut clusters: Vec<Vec<&FileRecord>> = Vec::new();
        for record in records {
            match clusters.last_mut() {
                Some(cluster) if record.size - cluster[0].size <= self.settings.size_tolerance_bytes => {
                    cluster.push(record)
                }
                _ => clusters.push(vec![record]),
            }
        }
        clusters.retain(|c| c.len() > 1);
        clusters
    }

    /// Ordering where `Less` means "prefer to keep".
    fn keep_order(&self, a: &FileRecord, b: &FileRecord) -> Ordering {
        b.mtime
            .cmp(&a.mtime)
            .then_with(|| name_quality(b).cmp(&name_quality(a)))
            .then_with(|| {
                self.settings
                    .source_rank(&a.source)
                    .cmp(&self.settings.source_rank(&b.source))
            })
            .then_with(|| a.path.cmp(&b.path))
    }

    /// Names the first criterion on which `keep` beat `other`.
    fn tie_break(&self, keep: &FileRecord, other: &FileRecord) -> &'static str {
        if keep.mtime != other.mtime {
            "newer mtime"
        } else if name_quality(keep) != name_quality(other) {
            if naming::is_decorated(&other.file_name()) && !naming::is_decorated(&keep.file_name()) {
                "undecorated filename"
            } else {
                "longer filename"
            }
        } else if self.settings.source_rank(&keep.source) != self.settings.source_rank(&other.source) {
            "preferred source"
        } else {
            "path order"
        }
    }

    fn sorted<'r>(&self, mut records: Vec<&'r FileRecord>) -> Vec<&'r FileRecord> {
        records.sort_by(|a, b| self.keep_order(a, b));
        records
    }

    fn resolve_exact(&self, hash: &ContentHash, records: Vec<&FileRecord>) -> DuplicateGroup {
        let sorted = self.sorted(records);
        let keep = sorted[0];

        let mut members = vec![kept_member(keep)];
        let mut others: Vec<GroupMember> = sorted[1..]
            .iter()
            .map(|r| GroupMember {
                path: r.path.clone(),
                size: r.size,
                disposition: Disposition::Delete,
                reason: format!(
                    "exact duplicate of {}, {}",
                    keep.path.display(),
                    self.tie_break(keep, r)
                ),
            })
            .collect();
        others.sort_by(|a, b| a.path.cmp(&b.path));
        members.extend(others);

        debug!("exact group {}: keep {}", hash.short(8), keep.path.display());
        DuplicateGroup {
            kind: GroupKind::Exact { hash: hash.clone() },
            keep: keep.path.clone(),
            members,
        }
    }

    fn resolve_near(&self, key: &str, records: Vec<&FileRecord>) -> DuplicateGroup {
        if self.settings.auto_resolve_versions
            && let Some(group) = self.resolve_by_version(key, &records)
        {
            return group;
        }

        let sorted = self.sorted(records);
        let keep = sorted[0];
        let mut members = vec![kept_member(keep)];
        let mut others: Vec<GroupMember> = sorted[1..]
            .iter()
            .map(|r| GroupMember {
                path: r.path.clone(),
                size: r.size,
                disposition: Disposition::Review,
                reason: format!("possible variant of {} ({})", keep.path.display(), key),
            })
            .collect();
        others.sort_by(|a, b| a.path.cmp(&b.path));
        members.extend(others);

        debug!("near group {}: {} members for review", key, members.len() - 1);
        DuplicateGroup {
            kind: GroupKind::Near { key: key.to_string() },
            keep: keep.path.clone(),
            members,
        }
    }

    /// Keeps the single `final` member when every other member is a
    /// numbered draft. Any other mix is ambiguous and returns `None`.
    fn resolve_by_version(&self, key: &str, records: &[&FileRecord]) -> Option<DuplicateGroup> {
        let markers: Vec<Option<VersionMarker>> = records
            .iter()
            .map(|r| naming::version_marker(&r.file_name()))
            .collect();

        let mut finals = markers
            .iter()
            .enumerate()
            .filter(|(_, m)| matches!(m, Some(VersionMarker::Final(_))));
        let (final_idx, final_marker) = finals.next()?;
        if finals.next().is_some() {
            return None;
        }
        let all_drafts = markers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != final_idx)
            .all(|(_, m)| matches!(m, Some(VersionMarker::Draft { .. })));
        if !all_drafts {
            return None;
        }

        let keep = records[final_idx];
        let final_text = final_marker.as_ref()?.text().to_string();
        let mut members = vec![kept_member(keep)];
        let mut others: Vec<GroupMember> = records
            .iter()
            .zip(markers.iter())
            .enumerate()
            .filter(|(i, _)| *i != final_idx)
            .filter_map(|(_, (r, m))| {
                let draft = m.as_ref()?.text();
                Some(GroupMember {
                    path: r.path.clone(),
                    size: r.size,
                    disposition: Disposition::Delete,
                    reason: format!(
                        "superseded by final version {} (matched version pattern '{}' over draft '{}')",
                        keep.path.display(),
                        final_text,
                        draft
                    ),
                })
            })
            .collect();
        others.sort_by(|a, b| a.path.cmp(&b.path));
        members.extend(others);

        debug!("near group {}: final version {} supersedes drafts", key, keep.path.display());
        Some(DuplicateGroup {
            kind: GroupKind::Near { key: key.to_string() },
            keep: keep.path.clone(),
            members,
        })
    }
}

fn kept_member(record: &FileRecord) -> GroupMember {
    GroupMember {
        path: record.path.clone(),
        size: record.size,
        disposition: Disposition::Keep,
        reason: "kept".to_string(),
    }
}

/// Length of the undecorated name, then whether the name was undecorated.
fn name_quality(record: &FileRecord) -> (usize, bool) {
    let name = record.file_name();
    (
        naming::undecorated_name(&name).chars().count(),
        !naming::is_decorated(&name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Source;
    use chrono::{TimeZone, Utc};

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const HASH_C: &str = "cccccccccccccccccccccccccccccccc";
    const HASH_D: &str = "dddddddddddddddddddddddddddddddd";

    fn rec(path: &str, hash: &str, ymd: (i32, u32, u32), source: Source, size: u64) -> FileRecord {
        FileRecord::builder(path, hash)
            .mtime(Utc.with_ymd_and_hms(ymd.0, ymd.1, ymd.2, 0, 0, 0).unwrap())
            .source(source)
            .size(size)
            .build()
            .unwrap()
    }

    fn resolve(records: Vec<FileRecord>) -> Resolution {
        resolve_with(records, DedupeSettings::default())
    }

    fn resolve_with(records: Vec<FileRecord>, settings: DedupeSettings) -> Resolution {
        let index = ManifestIndex::load(records).unwrap();
        let junk = JunkFilter::new(&crate::config::JunkSettings::default()).unwrap();
        DuplicateResolver::new(&settings, &junk).resolve(&index)
    }

    #[test]
    fn test_exact_duplicate_keeps_newer() {
        let res = resolve(vec![
            rec("/in/gdrive/A.docx", HASH_A, (2024, 1, 1), Source::Gdrive, 10),
            rec("/in/dropbox/A (1).docx", HASH_A, (2023, 6, 1), Source::Dropbox, 10),
        ]);

        assert_eq!(res.groups().len(), 1);
        let group = &res.groups()[0];
        assert_eq!(group.keep, PathBuf::from("/in/gdrive/A.docx"));
        let (_, deleted) = res.member(Path::new("/in/dropbox/A (1).docx")).unwrap();
        assert_eq!(deleted.disposition, Disposition::Delete);
        assert!(deleted.reason.contains("exact duplicate"));
        assert!(deleted.reason.contains("newer mtime"));
    }

    #[test]
    fn test_exact_tie_prefers_undecorated_name() {
        let res = resolve(vec![
            rec("/in/a/Report (2).pdf", HASH_A, (2024, 1, 1), Source::Gdrive, 1),
            rec("/in/b/Report.pdf", HASH_A, (2024, 1, 1), Source::Onedrive, 1),
        ]);
        assert_eq!(res.groups()[0].keep, PathBuf::from("/in/b/Report.pdf"));
        let (_, other) = res.member(Path::new("/in/a/Report (2).pdf")).unwrap();
        assert!(other.reason.contains("undecorated filename"));
    }

    #[test]
    fn test_exact_tie_prefers_longer_name() {
        let res = resolve(vec![
            rec("/in/a/scan.pdf", HASH_A, (2024, 1, 1), Source::Gdrive, 1),
            rec("/in/b/tax-return-2023.pdf", HASH_A, (2024, 1, 1), Source::Onedrive, 1),
        ]);
        assert_eq!(res.groups()[0].keep, PathBuf::from("/in/b/tax-return-2023.pdf"));
    }

    #[test]
    fn test_exact_tie_uses_source_priority_then_path() {
        let res = resolve(vec![
            rec("/in/onedrive/x.pdf", HASH_A, (2024, 1, 1), Source::Onedrive, 1),
            rec("/in/dropbox/x.pdf", HASH_A, (2024, 1, 1), Source::Dropbox, 1),
            rec("/in/z/x.pdf", HASH_B, (2024, 1, 1), Source::Gdrive, 1),
            rec("/in/y/x.pdf", HASH_B, (2024, 1, 1), Source::Gdrive, 1),
        ]);
        let a = res.member(Path::new("/in/onedrive/x.pdf")).unwrap().0;
        assert_eq!(a.keep, PathBuf::from("/in/dropbox/x.pdf"));
        let b = res.member(Path::new("/in/z/x.pdf")).unwrap().0;
        assert_eq!(b.keep, PathBuf::from("/in/y/x.pdf"));
        assert!(b.members[1].reason.contains("path order"));
    }

    #[test]
    fn test_custom_source_priority() {
        let settings = DedupeSettings {
            source_priority: vec![Source::Onedrive, Source::Gdrive],
            ..DedupeSettings::default()
        };
        let res = resolve_with(
            vec![
                rec("/in/g/x.pdf", HASH_A, (2024, 1, 1), Source::Gdrive, 1),
                rec("/in/o/x.pdf", HASH_A, (2024, 1, 1), Source::Onedrive, 1),
            ],
            settings,
        );
        assert_eq!(res.groups()[0].keep, PathBuf::from("/in/o/x.pdf"));
    }

    #[test]
    fn test_exactly_one_keep_and_deterministic() {
        let records = vec![
            rec("/in/1.bin", HASH_A, (2022, 1, 1), Source::Gdrive, 1),
            rec("/in/2.bin", HASH_A, (2023, 1, 1), Source::Dropbox, 1),
            rec("/in/3.bin", HASH_A, (2023, 1, 1), Source::Onedrive, 1),
            rec("/in/4.bin", HASH_A, (2021, 1, 1), Source::Gdrive, 1),
        ];
        let mut reversed = records.clone();
        reversed.reverse();

        let first = resolve(records);
        let second = resolve(reversed);
        assert_eq!(first.groups(), second.groups());

        let group = &first.groups()[0];
        let keeps = group
            .members
            .iter()
            .filter(|m| m.disposition == Disposition::Keep)
            .count();
        assert_eq!(keeps, 1);
        assert_eq!(group.keep, PathBuf::from("/in/2.bin"));
        assert_eq!(group.others().count(), 3);
    }

    #[test]
    fn test_singletons_are_kept() {
        let res = resolve(vec![
            rec("/in/a.pdf", HASH_A, (2024, 1, 1), Source::Gdrive, 1),
            rec("/in/b.pdf", HASH_B, (2024, 1, 1), Source::Gdrive, 2),
        ]);
        assert!(res.groups().is_empty());
        assert_eq!(res.disposition(Path::new("/in/a.pdf")), Disposition::Keep);
    }

    #[test]
    fn test_near_duplicates_go_to_review() {
        let res = resolve(vec![
            rec("/in/a/Budget.xlsx", HASH_A, (2024, 1, 1), Source::Gdrive, 100),
            rec("/in/b/Budget (1).xlsx", HASH_B, (2024, 2, 1), Source::Dropbox, 100),
        ]);
        assert_eq!(res.groups().len(), 1);
        let group = &res.groups()[0];
        assert_eq!(group.kind, GroupKind::Near { key: "budget.xlsx".to_string() });
        assert_eq!(group.keep, PathBuf::from("/in/b/Budget (1).xlsx"));
        assert_eq!(res.disposition(Path::new("/in/a/Budget.xlsx")), Disposition::Review);
        assert_eq!(res.review_items().count(), 1);
    }

    #[test]
    fn test_near_duplicates_require_matching_size_by_default() {
        let res = resolve(vec![
            rec("/in/a/Budget.xlsx", HASH_A, (2024, 1, 1), Source::Gdrive, 100),
            rec("/in/b/Budget (1).xlsx", HASH_B, (2024, 2, 1), Source::Dropbox, 101),
        ]);
        assert!(res.groups().is_empty());

        let settings = DedupeSettings {
            size_tolerance_bytes: 5,
            ..DedupeSettings::default()
        };
        let res = resolve_with(
            vec![
                rec("/in/a/Budget.xlsx", HASH_A, (2024, 1, 1), Source::Gdrive, 100),
                rec("/in/b/Budget (1).xlsx", HASH_B, (2024, 2, 1), Source::Dropbox, 101),
            ],
            settings,
        );
        assert_eq!(res.groups().len(), 1);
    }

    #[test]
    fn test_final_supersedes_numbered_drafts() {
        let res = resolve(vec![
            rec("/in/thesis_v1.docx", HASH_A, (2024, 3, 1), Source::Gdrive, 5),
            rec("/in/thesis_v2.docx", HASH_B, (2024, 3, 2), Source::Gdrive, 5),
            rec("/in/thesis_final.docx", HASH_C, (2024, 1, 1), Source::Gdrive, 5),
        ]);
        let group = &res.groups()[0];
        assert_eq!(group.keep, PathBuf::from("/in/thesis_final.docx"));
        for member in group.others() {
            assert_eq!(member.disposition, Disposition::Delete);
            assert!(member.reason.contains("'final'"));
        }
    }

    #[test]
    fn test_ambiguous_versions_stay_in_review() {
        let res = resolve(vec![
            rec("/in/thesis_final.docx", HASH_A, (2024, 3, 1), Source::Gdrive, 5),
            rec("/in/thesis_FINAL (1).docx", HASH_B, (2024, 3, 2), Source::Gdrive, 5),
            rec("/in/thesis_v2.docx", HASH_C, (2024, 1, 1), Source::Gdrive, 5),
        ]);
        assert_eq!(res.summary().to_review, 2);

        let res = resolve(vec![
            rec("/in/thesis_final.docx", HASH_A, (2024, 3, 1), Source::Gdrive, 5),
            rec("/in/thesis.docx", HASH_B, (2024, 3, 2), Source::Gdrive, 5),
        ]);
        assert_eq!(res.summary().to_review, 1);
    }

    #[test]
    fn test_version_resolution_can_be_disabled() {
        let settings = DedupeSettings {
            auto_resolve_versions: false,
            ..DedupeSettings::default()
        };
        let res = resolve_with(
            vec![
                rec("/in/plan_v1.txt", HASH_A, (2024, 3, 1), Source::Gdrive, 5),
                rec("/in/plan_final.txt", HASH_B, (2024, 1, 1), Source::Gdrive, 5),
            ],
            settings,
        );
        assert_eq!(res.summary().to_delete, 0);
        assert_eq!(res.summary().to_review, 1);
    }

    #[test]
    fn test_exact_takes_precedence_over_near() {
        let res = resolve(vec![
            rec("/in/a/Notes.txt", HASH_A, (2024, 1, 1), Source::Gdrive, 5),
            rec("/in/b/Notes.txt", HASH_A, (2023, 1, 1), Source::Gdrive, 5),
            rec("/in/c/Notes (1).txt", HASH_B, (2022, 1, 1), Source::Gdrive, 5),
        ]);
        assert_eq!(res.groups().len(), 1);
        assert!(res.groups()[0].is_exact());
        assert_eq!(res.disposition(Path::new("/in/c/Notes (1).txt")), Disposition::Keep);
    }

    #[test]
    fn test_junk_files_are_listed() {
        let res = resolve(vec![
            rec("/in/~$report.docx", HASH_A, (2024, 1, 1), Source::Gdrive, 1),
            rec("/in/.DS_Store", HASH_B, (2024, 1, 1), Source::Gdrive, 1),
            rec("/in/report.docx", HASH_C, (2024, 1, 1), Source::Gdrive, 1),
            rec("/in/report.docx.bak", HASH_D, (2024, 1, 1), Source::Gdrive, 1),
        ]);
        assert_eq!(res.junk().len(), 3);
        assert_eq!(res.disposition(Path::new("/in/.DS_Store")), Disposition::Delete);
        assert_eq!(res.disposition(Path::new("/in/report.docx")), Disposition::Keep);
    }

    #[test]
    fn test_confirm_and_release_review_members() {
        let mut res = resolve(vec![
            rec("/in/a/Budget.xlsx", HASH_A, (2024, 1, 1), Source::Gdrive, 100),
            rec("/in/b/Budget (1).xlsx", HASH_B, (2024, 2, 1), Source::Dropbox, 100),
            rec("/in/c/Budget copy.xlsx", HASH_C, (2024, 1, 5), Source::Dropbox, 100),
        ]);
        assert!(res.confirm_delete(Path::new("/in/a/Budget.xlsx"), "manual".to_string()));
        assert_eq!(res.disposition(Path::new("/in/a/Budget.xlsx")), Disposition::Delete);
        assert!(!res.confirm_delete(Path::new("/in/b/Budget (1).xlsx"), "manual".to_string()));

        assert!(res.release(Path::new("/in/c/Budget copy.xlsx")));
        assert_eq!(res.disposition(Path::new("/in/c/Budget copy.xlsx")), Disposition::Keep);
        assert!(res.member(Path::new("/in/c/Budget copy.xlsx")).is_none());
        assert_eq!(res.groups().len(), 1);
    }
}
