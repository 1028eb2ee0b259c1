//! Settings and junk-file filtering.
//!
//! This module loads the TOML configuration that drives every stage of the
//! pipeline, and compiles the junk-file rules into matchers. It supports
//! several junk detection strategies:
//! - Exact filename matching
//! - Glob pattern matching
//! - File extension matching
//! - Regex pattern matching
//!
//! # Configuration File Format
//!
//! ```toml
//! [library]
//! base_dir = "/mnt/library"
//! trash_dir = "/mnt/library/.trash"
//! audit_log = "/mnt/library/.cloudtidy/audit-log.jsonl"
//!
//! [dedupe]
//! source_priority = ["gdrive", "dropbox", "onedrive"]
//! size_tolerance_bytes = 0
//!
//! [junk]
//! filenames = [".DS_Store", "Thumbs.db"]
//! patterns = ["~$*"]
//! extensions = ["tmp", "bak"]
//! regex = []
//!
//! [naming]
//! whitespace_to_hyphen = true
//!
//! [executor]
//! action_timeout_secs = 30
//!
//! [purge]
//! retention_days = 30
//! ```

use crate::manifest::Source;
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading and compilation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Invalid glob pattern provided.
    #[error("Invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),
    /// Invalid regex pattern provided with the actual error reason.
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern {
        /// The regex pattern that failed to compile.
        pattern: String,
        /// The reason why the pattern is invalid.
        reason: String,
    },
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub library: LibrarySettings,
    #[serde(default)]
    pub dedupe: DedupeSettings,
    #[serde(default)]
    pub junk: JunkSettings,
    #[serde(default)]
    pub naming: NamingSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub purge: PurgeSettings,
}

/// Where the library, the trash and the audit log live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySettings {
    /// Root of the consolidated library.
    pub base_dir: PathBuf,
    /// Staging area for deletions.
    pub trash_dir: PathBuf,
    /// Append-only audit log (JSON lines).
    pub audit_log: PathBuf,
    /// Sniff MIME types from file contents when the manifest has none.
    pub sniff_mime: bool,
}

impl LibrarySettings {
    /// Joins every relative path onto `root`, so later runs from another
    /// working directory resolve the same tree.
    pub fn anchor(&mut self, root: &Path) {
        for path in [&mut self.base_dir, &mut self.trash_dir, &mut self.audit_log] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
    }
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("library"),
            trash_dir: PathBuf::from(".cloudtidy/trash"),
            audit_log: PathBuf::from(".cloudtidy/audit-log.jsonl"),
            sniff_mime: false,
        }
    }
}

/// Duplicate resolution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeSettings {
    /// Preferred sources first. Sources not listed rank after all listed ones.
    pub source_priority: Vec<Source>,
    /// Largest size difference (bytes) between near duplicates.
    pub size_tolerance_bytes: u64,
    /// Delete numbered drafts when exactly one `final` version exists.
    pub auto_resolve_versions: bool,
}

impl Default for DedupeSettings {
    fn default() -> Self {
        Self {
            source_priority: vec![Source::Gdrive, Source::Dropbox, Source::Onedrive],
            size_tolerance_bytes: 0,
            auto_resolve_versions: true,
        }
    }
}

impl DedupeSettings {
    /// Position of `source` in the priority order (lower is preferred).
    pub fn source_rank(&self, source: &Source) -> usize {
        self.source_priority
            .iter()
            .position(|s| s == source)
            .unwrap_or(self.source_priority.len())
    }
}

/// Rules for recognising temp, lock and backup files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JunkSettings {
    pub enabled: bool,
    /// Exact filenames (e.g. ".DS_Store", "Thumbs.db").
    pub filenames: Vec<String>,
    /// Extensions without the dot, case-insensitive.
    pub extensions: Vec<String>,
    /// Glob patterns matched against the filename.
    pub patterns: Vec<String>,
    /// Regex patterns matched against the filename.
    pub regex: Vec<String>,
}

impl Default for JunkSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            filenames: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
            ],
            extensions: ["tmp", "temp", "bak", "partial", "lock", "lrcat-journal"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            patterns: vec!["~$*".to_string(), "*~".to_string()],
            regex: Vec::new(),
        }
    }
}

/// Destination filename rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingSettings {
    /// Replace whitespace runs with `-` (otherwise collapse them to one space).
    pub whitespace_to_hyphen: bool,
    /// Prefix names with an extracted date when they have none.
    pub date_prefix: bool,
}

impl Default for NamingSettings {
    fn default() -> Self {
        Self {
            whitespace_to_hyphen: true,
            date_prefix: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Upper bound for a single filesystem operation.
    pub action_timeout_secs: u64,
    /// Remove source directories left empty, stopping at this root.
    pub prune_empty_dirs_under: Option<PathBuf>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            action_timeout_secs: 30,
            prune_empty_dirs_under: None,
        }
    }
}

impl ExecutorSettings {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeSettings {
    pub retention_days: u32,
}

impl Default for PurgeSettings {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

impl Settings {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.cloudtidyrc.toml` in the current directory
    /// 3. Look for `~/.config/cloudtidy/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but cannot be read,
    /// or if any discovered file is invalid.
    ///
    /// Relative library paths in a file are resolved against the file's
    /// directory; built-in defaults against the working directory.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".cloudtidyrc.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("cloudtidy")
                .join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        let mut settings = Self::default();
        settings.library.anchor(&working_dir()?);
        Ok(settings)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if file does not exist.
    /// Returns `ConfigError::ConfigInvalid` if TOML parsing fails.
    /// Returns `ConfigError::IoError` if file cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut settings = Self::from_toml(&content)?;
        let absolute = std::path::absolute(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let root = match absolute.parent() {
            Some(dir) => dir.to_path_buf(),
            None => working_dir()?,
        };
        settings.library.anchor(&root);
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Compile the junk rules, validating every pattern.
    pub fn junk_filter(&self) -> Result<JunkFilter, ConfigError> {
        JunkFilter::new(&self.junk)
    }
}

fn working_dir() -> Result<PathBuf, ConfigError> {
    std::env::current_dir().map_err(|e| ConfigError::IoError(e.to_string()))
}

/// Compiled junk rules.
///
/// Patterns are parsed once so that matching a filename is a set lookup or a
/// linear scan over the rules.
#[derive(Debug, Clone)]
pub struct JunkFilter {
    enabled: bool,
    filenames: HashSet<String>,
    extensions: HashSet<String>,
    patterns: Vec<Pattern>,
    regexes: Vec<Regex>,
}

impl JunkFilter {
    /// # Errors
    ///
    /// Returns an error if any glob or regex patterns are invalid.
    pub fn new(settings: &JunkSettings) -> Result<Self, ConfigError> {
        let patterns = settings
            .patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let regexes = settings
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enabled: settings.enabled,
            filenames: settings.filenames.iter().map(|n| n.to_lowercase()).collect(),
            extensions: settings
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            patterns,
            regexes,
        })
    }

    /// A filter that never matches.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            filenames: HashSet::new(),
            extensions: HashSet::new(),
            patterns: Vec::new(),
            regexes: Vec::new(),
        }
    }

    /// Returns the rule that marks `file_name` as junk, if any.
    ///
    /// Checks are performed in this order, with early termination:
    /// 1. Exact filename match (case-insensitive)
    /// 2. File extension match
    /// 3. Glob pattern match
    /// 4. Regex pattern match
    pub fn matched_rule(&self, file_name: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }

        if self.filenames.contains(&file_name.to_lowercase()) {
            return Some(format!("filename {}", file_name));
        }

        if let Some(ext) = Path::new(file_name).extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.extensions.contains(&ext_lower) {
                return Some(format!("extension .{}", ext_lower));
            }
        }

        if let Some(pattern) = self.patterns.iter().find(|p| p.matches(file_name)) {
            return Some(format!("pattern {}", pattern.as_str()));
        }

        self.regexes
            .iter()
            .find(|re| re.is_match(file_name))
            .map(|re| format!("regex {}", re.as_str()))
    }

    pub fn is_junk(&self, file_name: &str) -> bool {
        self.matched_rule(file_name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.dedupe.size_tolerance_bytes, 0);
        assert_eq!(settings.purge.retention_days, 30);
        assert_eq!(settings.executor.action_timeout(), Duration::from_secs(30));
        assert!(settings.naming.whitespace_to_hyphen);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            [library]
            base_dir = "/srv/library"

            [dedupe]
            source_priority = ["dropbox", "gdrive"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.library.base_dir, PathBuf::from("/srv/library"));
        assert_eq!(settings.library.trash_dir, PathBuf::from(".cloudtidy/trash"));
        assert_eq!(settings.dedupe.source_rank(&Source::Dropbox), 0);
        assert_eq!(settings.dedupe.source_rank(&Source::Gdrive), 1);
        assert_eq!(settings.dedupe.source_rank(&Source::Onedrive), 2);
        assert!(settings.dedupe.auto_resolve_versions);
    }

    #[test]
    fn test_library_paths_resolve_against_config_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cloudtidy.toml");
        fs::write(
            &path,
            r#"
            [library]
            base_dir = "/srv/library"
            trash_dir = "trash"
            "#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        let root = std::path::absolute(dir.path()).unwrap();
        assert_eq!(settings.library.base_dir, PathBuf::from("/srv/library"));
        assert_eq!(settings.library.trash_dir, root.join("trash"));
        assert_eq!(settings.library.audit_log, root.join(".cloudtidy/audit-log.jsonl"));
    }

    #[test]
    fn test_anchor_leaves_absolute_paths() {
        let mut library = LibrarySettings {
            base_dir: PathBuf::from("/lib"),
            ..LibrarySettings::default()
        };
        library.anchor(Path::new("/work"));
        assert_eq!(library.base_dir, PathBuf::from("/lib"));
        assert_eq!(library.trash_dir, PathBuf::from("/work/.cloudtidy/trash"));
        assert!(library.audit_log.is_absolute());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let result = Settings::from_toml("[library\nbase_dir = 1");
        assert!(matches!(result, Err(ConfigError::ConfigInvalid(_))));
    }

    #[test]
    fn test_missing_explicit_file_returns_error() {
        let result = Settings::load(Some(Path::new("/non/existent/cloudtidy.toml")));
        assert!(matches!(result, Err(ConfigError::ConfigNotFound(_))));
    }

    #[test]
    fn test_default_junk_rules() {
        let filter = Settings::default().junk_filter().unwrap();

        assert!(filter.is_junk(".DS_Store"));
        assert!(filter.is_junk("thumbs.db"));
        assert!(filter.is_junk("~$report.docx"));
        assert!(filter.is_junk("notes.txt~"));
        assert!(filter.is_junk("download.PARTIAL"));
        assert!(filter.is_junk("catalog.lrcat-journal"));
        assert!(!filter.is_junk("report.docx"));
        assert!(!filter.is_junk("lockscreen.png"));
    }

    #[test]
    fn test_matched_rule_names_the_rule() {
        let filter = Settings::default().junk_filter().unwrap();
        assert_eq!(filter.matched_rule("a.tmp").as_deref(), Some("extension .tmp"));
        assert_eq!(filter.matched_rule("~$a.docx").as_deref(), Some("pattern ~$*"));
    }

    #[test]
    fn test_junk_regex_rules() {
        let settings = JunkSettings {
            regex: vec![r"^\.~lock\..*#$".to_string()],
            ..JunkSettings::default()
        };
        let filter = JunkFilter::new(&settings).unwrap();
        assert!(filter.is_junk(".~lock.budget.ods#"));
    }

    #[test]
    fn test_disabled_junk_filter() {
        let settings = JunkSettings {
            enabled: false,
            ..JunkSettings::default()
        };
        let filter = JunkFilter::new(&settings).unwrap();
        assert!(!filter.is_junk(".DS_Store"));
        assert!(!JunkFilter::disabled().is_junk("a.tmp"));
    }

    #[test]
    fn test_invalid_regex_returns_error() {
        let settings = JunkSettings {
            regex: vec!["[invalid(".to_string()],
            ..JunkSettings::default()
        };
        assert!(matches!(
            JunkFilter::new(&settings),
            Err(ConfigError::InvalidRegexPattern { .. })
        ));
    }

    #[test]
    fn test_invalid_glob_pattern_returns_error() {
        let settings = JunkSettings {
            patterns: vec!["[invalid".to_string()],
            ..JunkSettings::default()
        };
        assert!(matches!(
            JunkFilter::new(&settings),
            Err(ConfigError::InvalidGlobPattern(_))
        ));
    }
}
