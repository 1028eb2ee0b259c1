/// Integration tests for cloudtidy
///
/// These tests run the whole pipeline against real files in a temporary
/// directory: manifest, duplicate resolution, classification, planning,
/// execution, undo and purge.
use chrono::{Duration, Utc};
use cloudtidy::cli::{ExecuteArgs, PlanArgs, build_plan, execute_plan};
use cloudtidy::config::Settings;
use cloudtidy::executor::{CancellationToken, Outcome};
use cloudtidy::plan::{ActionKind, Plan};
use cloudtidy::purge::TrashPurger;
use cloudtidy::undo::UndoManager;
use cloudtidy::{AuditLog, ExecutionReport};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// A temporary workspace with an input tree, a library, a trash area and
/// the manifest describing the inputs.
struct TestFixture {
    temp_dir: TempDir,
    records: Vec<serde_json::Value>,
}

impl TestFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        TestFixture {
            temp_dir,
            records: Vec::new(),
        }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Creates `in/<rel>` on disk and adds it to the manifest.
    fn add_file(&mut self, rel: &str, content: &str, hash: &str, mtime: &str, source: &str) -> PathBuf {
        let path = self.path().join("in").join(rel);
        fs::create_dir_all(path.parent().unwrap()).expect("Failed to create input dir");
        fs::write(&path, content).expect("Failed to write file");
        self.add_record(&path, content.len() as u64, hash, mtime, source);
        path
    }

    /// Adds a manifest record without creating the file.
    fn add_record(&mut self, path: &Path, size: u64, hash: &str, mtime: &str, source: &str) {
        self.records.push(json!({
            "path": path.to_string_lossy(),
            "source": source,
            "size": size,
            "mtime": mtime,
            "content_hash": hash,
        }));
    }

    fn write_taxonomy(&self) -> PathBuf {
        let path = self.path().join("taxonomy.toml");
        fs::write(
            &path,
            r#"
[[rules]]
name = "Finance"

[[rules]]
name = "Taxes"
parent = "Finance"
patterns = ["keyword:1099", "keyword:w-2"]

[[rules]]
name = "Documents"
patterns = ["*.docx", "*.pdf"]
priority = 10
"#,
        )
        .expect("Failed to write taxonomy");
        path
    }

    fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.library.base_dir = self.path().join("library");
        settings.library.trash_dir = self.path().join("trash");
        settings.library.audit_log = self.path().join("audit-log.jsonl");
        settings
    }

    fn plan_args(&self) -> PlanArgs {
        let manifest = self.path().join("manifest.json");
        fs::write(
            &manifest,
            serde_json::to_string_pretty(&json!({ "files": self.records })).unwrap(),
        )
        .expect("Failed to write manifest");
        PlanArgs {
            manifest,
            taxonomy: Some(self.write_taxonomy()),
            signals: None,
            decisions: None,
            out_dir: self.path().join("out"),
            base_dir: None,
            trash_dir: None,
        }
    }

    fn plan(&self) -> Plan {
        build_plan(&self.plan_args(), &self.settings()).expect("plan should build")
    }

    fn execute(&self, dry_run: bool) -> ExecutionReport {
        let args = ExecuteArgs {
            plan: self.path().join("out").join("plan.json"),
            dry_run,
            audit_log: None,
        };
        execute_plan(&args, &self.settings(), CancellationToken::new()).expect("execution should run")
    }

    fn audit(&self) -> AuditLog {
        AuditLog::open(&self.settings().library.audit_log).unwrap()
    }

    fn assert_file_exists(&self, rel: &str) {
        let path = self.path().join(rel);
        assert!(path.is_file(), "File should exist: {}", path.display());
    }

    fn assert_file_not_exists(&self, rel: &str) {
        let path = self.path().join(rel);
        assert!(!path.exists(), "File should not exist: {}", path.display());
    }
}

const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const HASH_C: &str = "cccccccccccccccccccccccccccccccc";

// ============================================================================
// Planning
// ============================================================================

#[test]
fn test_exact_duplicate_keeps_newest_and_trashes_copy() {
    let mut fixture = TestFixture::new();
    let keep = fixture.add_file("drive/A.docx", "same bytes", HASH_A, "2024-03-02T10:00:00Z", "gdrive");
    let copy = fixture.add_file("dropbox/A (1).docx", "same bytes", HASH_A, "2024-03-01T10:00:00Z", "dropbox");

    let plan = fixture.plan();

    let delete = plan.actions.iter().find(|a| a.source_path == copy).unwrap();
    assert_eq!(delete.kind, ActionKind::Delete);
    assert!(delete.reason.contains("exact duplicate"), "{}", delete.reason);
    assert!(delete.reason.contains("newer mtime"), "{}", delete.reason);
    assert!(delete.destination_path.as_ref().unwrap().starts_with(fixture.path().join("trash")));

    let moved = plan.actions.iter().find(|a| a.source_path == keep).unwrap();
    assert_eq!(moved.kind, ActionKind::Move);
    assert_eq!(
        moved.destination_path.as_deref(),
        Some(fixture.path().join("library/Documents/A.docx").as_path())
    );
}

#[test]
fn test_tax_form_is_filed_under_finance_taxes() {
    let mut fixture = TestFixture::new();
    let form = fixture.add_file("drive/Form 1099 2023.pdf", "1099", HASH_A, "2024-02-01T00:00:00Z", "gdrive");

    let plan = fixture.plan();

    let action = plan.actions.iter().find(|a| a.source_path == form).unwrap();
    assert_eq!(action.category.as_deref(), Some("Finance/Taxes"));
    assert_eq!(action.confidence.map(|c| c.as_str()), Some("high"));
    assert_eq!(
        action.destination_path.as_deref(),
        Some(fixture.path().join("library/Finance/Taxes/Form-1099-2023.pdf").as_path())
    );
}

#[test]
fn test_destination_collision_gets_hash_suffix() {
    let mut fixture = TestFixture::new();
    let first = fixture.add_file("a/report.pdf", "first report", HASH_B, "2024-01-01T00:00:00Z", "gdrive");
    let second = fixture.add_file("b/report.pdf", "second, longer report", HASH_C, "2024-01-02T00:00:00Z", "onedrive");

    let plan = fixture.plan();

    let dest = |source: &Path| {
        plan.actions
            .iter()
            .find(|a| a.source_path == source)
            .and_then(|a| a.destination_path.clone())
            .unwrap()
    };
    let library = fixture.path().join("library/Documents");
    assert_eq!(dest(&first), library.join("report.pdf"));
    assert_eq!(dest(&second), library.join(format!("report-{}.pdf", &HASH_C[..8])));
    assert!(plan.validate().is_ok());
}

#[test]
fn test_plan_command_writes_all_artifacts() {
    let mut fixture = TestFixture::new();
    fixture.add_file("drive/notes.docx", "notes", HASH_A, "2024-01-01T00:00:00Z", "gdrive");
    fixture.add_file("drive/~$notes.docx", "lock", HASH_B, "2024-01-01T00:00:00Z", "gdrive");

    let plan = fixture.plan();

    for artifact in ["duplicates.json", "classifications.tsv", "plan.json", "plan.tsv"] {
        fixture.assert_file_exists(&format!("out/{}", artifact));
    }
    let saved = Plan::load_json(&fixture.path().join("out/plan.json")).unwrap();
    assert_eq!(saved, plan);

    let junk = plan
        .actions
        .iter()
        .find(|a| a.source_path.ends_with("~$notes.docx"))
        .unwrap();
    assert_eq!(junk.kind, ActionKind::Delete);
    assert!(junk.reason.starts_with("junk/temp file"), "{}", junk.reason);

    // Planning never touches the inputs.
    fixture.assert_file_exists("in/drive/notes.docx");
    fixture.assert_file_not_exists("library");
}

// ============================================================================
// Execution
// ============================================================================

#[test]
fn test_missing_source_fails_and_run_continues() {
    let mut fixture = TestFixture::new();
    let present = fixture.add_file("drive/present.docx", "here", HASH_A, "2024-01-01T00:00:00Z", "gdrive");
    let missing = fixture.path().join("in/drive/missing.docx");
    fixture.add_record(&missing, 10, HASH_B, "2024-01-01T00:00:00Z", "gdrive");
    fixture.plan();

    let report = fixture.execute(false);

    let failed = report.outcomes.iter().find(|o| o.action.source_path == missing).unwrap();
    assert_eq!(failed.outcome, Outcome::Failed);
    assert_eq!(failed.error.as_deref(), Some("source not found"));

    let applied = report.outcomes.iter().find(|o| o.action.source_path == present).unwrap();
    assert_eq!(applied.outcome, Outcome::Applied);
    fixture.assert_file_exists("library/Documents/present.docx");
    assert!(!present.exists());
}

#[test]
fn test_dry_run_reports_what_live_run_does() {
    let mut fixture = TestFixture::new();
    fixture.add_file("drive/A.docx", "same bytes", HASH_A, "2024-03-02T10:00:00Z", "gdrive");
    let copy = fixture.add_file("dropbox/A (1).docx", "same bytes", HASH_A, "2024-03-01T10:00:00Z", "dropbox");
    fixture.add_file("drive/Form 1099 2023.pdf", "1099", HASH_B, "2024-02-01T00:00:00Z", "gdrive");
    fixture.plan();

    let dry = fixture.execute(true);
    assert!(dry.dry_run);
    assert_eq!(dry.failed(), 0);
    fixture.assert_file_exists("in/drive/A.docx");
    fixture.assert_file_not_exists("audit-log.jsonl");

    let live = fixture.execute(false);
    assert_eq!(live.failed(), 0);
    assert_eq!(dry.intended_actions(), live.intended_actions());
    fixture.assert_file_exists("library/Documents/A.docx");
    fixture.assert_file_exists("library/Finance/Taxes/Form-1099-2023.pdf");
    assert!(cloudtidy::plan::trash_path(&fixture.path().join("trash"), &copy).is_file());
}

#[test]
fn test_newer_copy_replaces_older_library_copy() {
    let mut fixture = TestFixture::new();
    let incoming = fixture.add_file("drive/report.pdf", "same bytes", HASH_A, "2024-05-01T00:00:00Z", "gdrive");
    let shelved = fixture.path().join("library/Documents/report.pdf");
    fs::create_dir_all(shelved.parent().unwrap()).unwrap();
    fs::write(&shelved, "same bytes").unwrap();
    fixture.add_record(&shelved, 10, HASH_A, "2023-05-01T00:00:00Z", "onedrive");
    let plan = fixture.plan();

    let position = |source: &Path| plan.actions.iter().position(|a| a.source_path == source).unwrap();
    assert!(position(&shelved) < position(&incoming));

    let dry = fixture.execute(true);
    assert_eq!(dry.failed(), 0, "{:?}", dry.failures().collect::<Vec<_>>());

    let live = fixture.execute(false);
    assert_eq!(live.failed(), 0, "{:?}", live.failures().collect::<Vec<_>>());
    assert!(!incoming.exists());
    fixture.assert_file_exists("library/Documents/report.pdf");
    assert!(cloudtidy::plan::trash_path(&fixture.path().join("trash"), &shelved).is_file());

    // Undo puts both files back where they were.
    let undone = UndoManager::undo(&fixture.audit(), false).unwrap();
    assert!(undone.is_complete_success());
    assert!(incoming.is_file());
    assert!(shelved.is_file());
}

#[test]
fn test_relative_library_paths_are_stored_absolute() {
    let mut fixture = TestFixture::new();
    fixture.add_file("drive/notes.docx", "notes", HASH_A, "2024-01-01T00:00:00Z", "gdrive");
    let args = PlanArgs {
        base_dir: Some(PathBuf::from("relative-library")),
        trash_dir: Some(PathBuf::from("relative-trash")),
        ..fixture.plan_args()
    };

    let plan = build_plan(&args, &fixture.settings()).unwrap();

    let cwd = std::env::current_dir().unwrap();
    assert_eq!(plan.base_dir, cwd.join("relative-library"));
    assert_eq!(plan.trash_dir, cwd.join("relative-trash"));
    assert!(plan
        .actions
        .iter()
        .filter_map(|a| a.destination_path.as_deref())
        .all(Path::is_absolute));
}

// ============================================================================
// Undo and purge
// ============================================================================

#[test]
fn test_undo_restores_moved_and_trashed_files() {
    let mut fixture = TestFixture::new();
    let keep = fixture.add_file("drive/A.docx", "same bytes", HASH_A, "2024-03-02T10:00:00Z", "gdrive");
    let copy = fixture.add_file("dropbox/A (1).docx", "same bytes", HASH_A, "2024-03-01T10:00:00Z", "dropbox");
    fixture.plan();
    fixture.execute(false);
    assert!(!keep.exists());
    assert!(!copy.exists());

    let report = UndoManager::undo(&fixture.audit(), false).unwrap();

    assert!(report.is_complete_success());
    assert_eq!(report.restored_files.len(), 2);
    assert!(keep.is_file());
    assert!(copy.is_file());
    fixture.assert_file_not_exists("library/Documents/A.docx");

    // A second undo has nothing left to revert.
    let again = UndoManager::undo(&fixture.audit(), false).unwrap();
    assert!(again.restored_files.is_empty());
}

#[test]
fn test_purge_respects_retention() {
    let mut fixture = TestFixture::new();
    fixture.add_file("drive/A.docx", "same bytes", HASH_A, "2024-03-02T10:00:00Z", "gdrive");
    let copy = fixture.add_file("dropbox/A (1).docx", "same bytes", HASH_A, "2024-03-01T10:00:00Z", "dropbox");
    let plan = fixture.plan();
    fixture.execute(false);

    let trashed = plan
        .actions
        .iter()
        .find(|a| a.source_path == copy)
        .and_then(|a| a.destination_path.clone())
        .unwrap();
    assert!(trashed.is_file());

    let audit = fixture.audit();
    let early = TrashPurger::purge(&audit, Duration::days(30), Utc::now(), false).unwrap();
    assert!(early.purged.is_empty());
    assert_eq!(early.retained, 1);
    assert!(trashed.is_file());

    let later = Utc::now() + Duration::days(31);
    let dry = TrashPurger::purge(&audit, Duration::days(30), later, true).unwrap();
    assert_eq!(dry.purged.len(), 1);
    assert!(trashed.is_file());

    let report = TrashPurger::purge(&audit, Duration::days(30), later, false).unwrap();
    assert_eq!(report.purged, vec![trashed.clone()]);
    assert!(!trashed.exists());

    // Purged files are not purged twice.
    let again = TrashPurger::purge(&audit, Duration::days(30), later, false).unwrap();
    assert!(again.purged.is_empty());
}
