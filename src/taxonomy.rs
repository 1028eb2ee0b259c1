//! Category rules and first-match classification.
//!
//! A taxonomy is a forest of named categories. Each rule carries an ordered
//! list of patterns and a priority; rules are tried in ascending priority
//! (ties keep file order) and the first rule with a matching pattern wins.
//!
//! # Pattern forms
//!
//! All matching is case-insensitive.
//!
//! | Pattern            | Matches                                      | Confidence |
//! |--------------------|----------------------------------------------|------------|
//! | `*.pdf`, `ext:pdf` | file extension                               | medium     |
//! | `mime:image/*`     | MIME type (glob)                             | medium     |
//! | `*`, `**`          | anything                                     | low        |
//! | `keyword:invoice`  | a filename token or an extracted keyword     | high       |
//! | `entity:ACME`      | an extracted entity                          | high       |
//! | `date:2024*`       | a date in the filename or an extracted date  | high       |
//! | `re:^scan_\d+`     | regex on the filename                        | high       |
//! | anything else      | glob on the filename                         | high       |
//!
//! Every pattern of a rule marked `fallback` matches with low confidence.

use crate::config::NamingSettings;
use crate::manifest::FileRecord;
use crate::naming;
use glob::{MatchOptions, Pattern};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info};

/// Category assigned when no rule matches.
pub const UNCATEGORIZED: &str = "uncategorized";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

static FILENAME_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])((?:19|20)\d{2})(?:[-_.](0[1-9]|1[0-2])(?:[-_.](0[1-9]|[12]\d|3[01]))?)?(?:[^0-9]|$)")
        .expect("valid regex")
});

#[derive(Error, Debug)]
pub enum TaxonomyError {
    #[error("category name must not be empty")]
    EmptyName,

    #[error("category '{0}' must not contain '.' or '..' segments or backslashes")]
    UnsafeName(String),

    #[error("duplicate category '{0}'")]
    DuplicateCategory(String),

    #[error("category '{rule}' refers to unknown parent '{parent}'")]
    UnknownParent { rule: String, parent: String },

    #[error("category '{0}' is part of a parent cycle")]
    Cycle(String),

    #[error("invalid pattern '{pattern}' in category '{rule}': {reason}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        reason: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("unsupported taxonomy format '{0}' (expected .json, .toml or .tsv)")]
    UnsupportedFormat(String),
}

/// One category as written in a taxonomy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub fallback: bool,
}

impl CategoryRule {
    pub fn new(name: &str, patterns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            priority: 0,
            fallback: false,
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text-extraction output for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentSignals {
    pub keywords: Vec<String>,
    pub dates: Vec<String>,
    pub entities: Vec<String>,
}

/// Reads a JSON object mapping file path to its content signals.
pub fn read_signals(path: &Path) -> Result<HashMap<PathBuf, ContentSignals>, TaxonomyError> {
    let content = fs::read_to_string(path).map_err(|source| TaxonomyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let signals: HashMap<PathBuf, ContentSignals> =
        serde_json::from_str(&content).map_err(|e| TaxonomyError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    info!("read content signals for {} files", signals.len());
    Ok(signals)
}

/// Index of a category inside its [`Taxonomy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryId(usize);

#[derive(Debug, Clone)]
enum Matcher {
    Extension(String),
    Mime(Pattern),
    CatchAll,
    Keyword(String),
    Entity(String),
    Date(Pattern),
    Regex(Regex),
    Glob(Pattern),
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    text: String,
    matcher: Matcher,
    confidence: Confidence,
}

impl CompiledPattern {
    fn compile(rule: &CategoryRule, text: &str) -> Result<Self, TaxonomyError> {
        let invalid = |reason: String| TaxonomyError::InvalidPattern {
            rule: rule.name.clone(),
            pattern: text.to_string(),
            reason,
        };
        let glob = |p: &str| Pattern::new(p).map_err(|e| invalid(e.to_string()));
        let trimmed = text.trim();
        let lower = trimmed.to_lowercase();

        let (matcher, confidence) = if trimmed == "*" || trimmed == "**" {
            (Matcher::CatchAll, Confidence::Low)
        } else if let Some(ext) = lower.strip_prefix("ext:") {
            (Matcher::Extension(ext.trim_start_matches('.').to_string()), Confidence::Medium)
        } else if let Some(ext) = lower.strip_prefix("*.")
            && !ext.is_empty()
            && !ext.contains(['*', '?', '[', ']', '/'])
        {
            (Matcher::Extension(ext.to_string()), Confidence::Medium)
        } else if let Some(mime) = lower.strip_prefix("mime:") {
            (Matcher::Mime(glob(mime)?), Confidence::Medium)
        } else if let Some(word) = lower.strip_prefix("keyword:") {
            (Matcher::Keyword(word.trim().to_string()), Confidence::High)
        } else if let Some(entity) = lower.strip_prefix("entity:") {
            (Matcher::Entity(entity.trim().to_string()), Confidence::High)
        } else if let Some(date) = lower.strip_prefix("date:") {
            (Matcher::Date(glob(date)?), Confidence::High)
        } else if let Some(re) = trimmed.strip_prefix("re:") {
            let regex = Regex::new(&format!("(?i){}", re)).map_err(|e| invalid(e.to_string()))?;
            (Matcher::Regex(regex), Confidence::High)
        } else {
            (Matcher::Glob(glob(trimmed)?), Confidence::High)
        };

        if matches!(&matcher, Matcher::Keyword(w) | Matcher::Entity(w) | Matcher::Extension(w) if w.is_empty()) {
            return Err(invalid("empty pattern value".to_string()));
        }

        Ok(Self {
            text: text.to_string(),
            matcher,
            confidence: if rule.fallback { Confidence::Low } else { confidence },
        })
    }

    fn matches(&self, record: &FileRecord, file_name: &str, signals: Option<&ContentSignals>) -> bool {
        match &self.matcher {
            Matcher::CatchAll => true,
            Matcher::Extension(ext) => {
                record.extension.eq_ignore_ascii_case(ext)
                    || file_name.to_lowercase().ends_with(&format!(".{}", ext))
            }
            Matcher::Mime(pattern) => record
                .mime_type
                .as_deref()
                .is_some_and(|mime| pattern.matches_with(mime, MATCH_OPTIONS)),
            Matcher::Keyword(word) => {
                filename_has_keyword(file_name, word)
                    || signals.is_some_and(|s| s.keywords.iter().any(|k| k.trim().eq_ignore_ascii_case(word)))
            }
            Matcher::Entity(entity) => {
                signals.is_some_and(|s| s.entities.iter().any(|e| e.trim().eq_ignore_ascii_case(entity)))
            }
            Matcher::Date(pattern) => {
                filename_dates(file_name)
                    .iter()
                    .any(|d| pattern.matches_with(d, MATCH_OPTIONS))
                    || signals.is_some_and(|s| {
                        s.dates
                            .iter()
                            .any(|d| pattern.matches_with(d.trim(), MATCH_OPTIONS))
                    })
            }
            Matcher::Regex(regex) => regex.is_match(file_name),
            Matcher::Glob(pattern) => pattern.matches_with(file_name, MATCH_OPTIONS),
        }
    }
}

fn filename_has_keyword(file_name: &str, word: &str) -> bool {
    let (stem, _) = naming::split_name(file_name);
    let stem = stem.to_lowercase();
    if word.contains(|c: char| !c.is_alphanumeric()) {
        let spaced = |s: &str| {
            s.split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        };
        return format!(" {} ", spaced(&stem)).contains(&format!(" {} ", spaced(word)));
    }
    stem.split(|c: char| !c.is_alphanumeric()).any(|token| token == word)
}

/// Dates embedded in a filename, normalized to `YYYY[-MM[-DD]]`.
fn filename_dates(file_name: &str) -> Vec<String> {
    FILENAME_DATE
        .captures_iter(file_name)
        .filter_map(|caps| {
            let year = caps.get(1)?.as_str();
            Some(match (caps.get(2), caps.get(3)) {
                (Some(m), Some(d)) => format!("{}-{}-{}", year, m.as_str(), d.as_str()),
                (Some(m), None) => format!("{}-{}", year, m.as_str()),
                _ => year.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
struct CategoryNode {
    rule: CategoryRule,
    parent: Option<CategoryId>,
    children: Vec<CategoryId>,
    path: String,
    patterns: Vec<CompiledPattern>,
}

/// Validated category forest, stored as an arena.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    nodes: Vec<CategoryNode>,
    /// Evaluation order: ascending priority, then file order.
    order: Vec<CategoryId>,
}

impl Taxonomy {
    /// Validates names, parents and patterns and builds the forest.
    pub fn from_rules(rules: Vec<CategoryRule>) -> Result<Self, TaxonomyError> {
        let mut ids: HashMap<String, CategoryId> = HashMap::with_capacity(rules.len());
        for (i, rule) in rules.iter().enumerate() {
            let name = rule.name.trim();
            if name.is_empty() || name.split('/').any(|s| s.trim().is_empty()) {
                return Err(TaxonomyError::EmptyName);
            }
            if name.contains('\\') || name.split('/').any(|s| matches!(s.trim(), "." | "..")) {
                return Err(TaxonomyError::UnsafeName(name.to_string()));
            }
            if ids.insert(name.to_string(), CategoryId(i)).is_some() {
                return Err(TaxonomyError::DuplicateCategory(name.to_string()));
            }
        }

        let mut nodes = Vec::with_capacity(rules.len());
        for rule in rules {
            let parent = match rule.parent.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
                Some(parent) => Some(*ids.get(parent).ok_or_else(|| TaxonomyError::UnknownParent {
                    rule: rule.name.clone(),
                    parent: parent.to_string(),
                })?),
                None => None,
            };
            let patterns = rule
                .patterns
                .iter()
                .map(|p| CompiledPattern::compile(&rule, p))
                .collect::<Result<Vec<_>, _>>()?;
            nodes.push(CategoryNode {
                rule,
                parent,
                children: Vec::new(),
                path: String::new(),
                patterns,
            });
        }

        for i in 0..nodes.len() {
            let mut seen = HashSet::new();
            let mut segments = Vec::new();
            let mut current = Some(CategoryId(i));
            while let Some(id) = current {
                if !seen.insert(id) {
                    return Err(TaxonomyError::Cycle(nodes[i].rule.name.clone()));
                }
                segments.push(nodes[id.0].rule.name.trim().to_string());
                current = nodes[id.0].parent;
            }
            segments.reverse();
            nodes[i].path = segments.join("/");
            if let Some(parent) = nodes[i].parent {
                nodes[parent.0].children.push(CategoryId(i));
            }
        }

        let mut order: Vec<CategoryId> = (0..nodes.len()).map(CategoryId).collect();
        order.sort_by_key(|id| nodes[id.0].rule.priority);

        info!("loaded taxonomy with {} categories", nodes.len());
        Ok(Self { nodes, order })
    }

    /// Reads rules from a `.json`, `.toml` or `.tsv` file.
    pub fn load(path: &Path) -> Result<Self, TaxonomyError> {
        let content = fs::read_to_string(path).map_err(|source| TaxonomyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |reason: String| TaxonomyError::Parse {
            path: path.to_path_buf(),
            reason,
        };
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let rules = match ext.as_str() {
            "json" => {
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum JsonRules {
                    List(Vec<CategoryRule>),
                    Document { rules: Vec<CategoryRule> },
                }
                match serde_json::from_str::<JsonRules>(&content).map_err(|e| parse_err(e.to_string()))? {
                    JsonRules::List(rules) | JsonRules::Document { rules } => rules,
                }
            }
            "toml" => {
                #[derive(Deserialize)]
                struct TomlRules {
                    #[serde(default)]
                    rules: Vec<CategoryRule>,
                }
                toml::from_str::<TomlRules>(&content)
                    .map_err(|e| parse_err(e.to_string()))?
                    .rules
            }
            "tsv" => parse_tsv_rules(&content).map_err(parse_err)?,
            other => return Err(TaxonomyError::UnsupportedFormat(other.to_string())),
        };
        Self::from_rules(rules)
    }

    /// Extension and MIME based categories used when no taxonomy file is given.
    pub fn builtin() -> Self {
        const CATEGORIES: &[(&str, &[&str], &[&str])] = &[
            (
                "Images",
                &["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "tiff", "ico", "heic"],
                &["image/*"],
            ),
            ("Audio", &["mp3", "wav", "ogg", "flac", "aac", "m4a", "wma"], &["audio/*"]),
            (
                "Videos",
                &["mp4", "mkv", "avi", "mov", "flv", "wmv", "webm", "3gp"],
                &["video/*"],
            ),
            (
                "Documents",
                &["pdf", "txt", "doc", "docx", "html", "htm", "md", "rtf", "odt"],
                &["application/pdf", "text/plain", "application/msword", "*wordprocessingml*"],
            ),
            ("Spreadsheets", &["csv", "xls", "xlsx", "ods"], &["text/csv", "*spreadsheet*"]),
            ("Presentations", &["ppt", "pptx", "odp", "key"], &["*presentation*"]),
            (
                "Archives",
                &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"],
                &["application/zip", "application/gzip", "application/x-*compressed"],
            ),
            ("Fonts", &["ttf", "otf", "woff", "woff2"], &["font/*"]),
        ];

        let rules = CATEGORIES
            .iter()
            .map(|(name, exts, mimes)| CategoryRule {
                name: name.to_string(),
                parent: None,
                patterns: mimes
                    .iter()
                    .map(|m| format!("mime:{}", m))
                    .chain(exts.iter().map(|e| format!("*.{}", e)))
                    .collect(),
                priority: 0,
                fallback: false,
            })
            .chain(std::iter::once(CategoryRule::new("Other", &["*"]).with_priority(i32::MAX).as_fallback()))
            .collect();

        // Patterns above are constant and always compile.
        Self::from_rules(rules).unwrap_or(Self {
            nodes: Vec::new(),
            order: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn id(&self, name: &str) -> Option<CategoryId> {
        self.nodes
            .iter()
            .position(|n| n.rule.name.trim() == name)
            .map(CategoryId)
    }

    pub fn rule(&self, id: CategoryId) -> &CategoryRule {
        &self.nodes[id.0].rule
    }

    /// Slash-joined names from the root down to `id`.
    pub fn path(&self, id: CategoryId) -> &str {
        &self.nodes[id.0].path
    }

    pub fn parent(&self, id: CategoryId) -> Option<CategoryId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: CategoryId) -> &[CategoryId] {
        &self.nodes[id.0].children
    }

    pub fn roots(&self) -> impl Iterator<Item = CategoryId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(i, _)| CategoryId(i))
    }
}

fn parse_tsv_rules(content: &str) -> Result<Vec<CategoryRule>, String> {
    #[derive(Deserialize)]
    struct TsvRule {
        name: String,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        priority: Option<i32>,
        #[serde(default)]
        patterns: Option<String>,
        #[serde(default)]
        fallback: Option<String>,
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut rules = Vec::new();
    for (i, row) in reader.deserialize::<TsvRule>().enumerate() {
        let row = row.map_err(|e| format!("row {}: {}", i + 2, e))?;
        rules.push(CategoryRule {
            name: row.name,
            parent: row.parent.filter(|p| !p.is_empty()),
            patterns: row
                .patterns
                .unwrap_or_default()
                .split('|')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            priority: row.priority.unwrap_or(0),
            fallback: row
                .fallback
                .is_some_and(|f| matches!(f.to_lowercase().as_str(), "true" | "yes" | "1")),
        });
    }
    Ok(rules)
}

/// Where a record belongs and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub path: PathBuf,
    pub category: String,
    pub matched_rule: Option<String>,
    pub matched_pattern: Option<String>,
    pub confidence: Confidence,
    pub destination: PathBuf,
}

/// Applies a taxonomy to records and computes their library destination.
pub struct TaxonomyMatcher<'a> {
    taxonomy: &'a Taxonomy,
    base_dir: &'a Path,
    naming: &'a NamingSettings,
}

impl<'a> TaxonomyMatcher<'a> {
    pub fn new(taxonomy: &'a Taxonomy, base_dir: &'a Path, naming: &'a NamingSettings) -> Self {
        Self {
            taxonomy,
            base_dir,
            naming,
        }
    }

    pub fn classify(&self, record: &FileRecord, signals: Option<&ContentSignals>) -> Classification {
        let file_name = record.file_name();
        let date_signal = signals.and_then(|s| s.dates.first()).map(String::as_str);
        let normalized = naming::normalize_filename(&file_name, self.naming, date_signal);

        for id in &self.taxonomy.order {
            let node = &self.taxonomy.nodes[id.0];
            if let Some(pattern) = node
                .patterns
                .iter()
                .find(|p| p.matches(record, &file_name, signals))
            {
                debug!(
                    "{} -> {} (pattern '{}', {})",
                    record.path.display(),
                    node.path,
                    pattern.text,
                    pattern.confidence
                );
                let mut destination = self.base_dir.to_path_buf();
                destination.extend(node.path.split('/'));
                destination.push(&normalized);
                return Classification {
                    path: record.path.clone(),
                    category: node.path.clone(),
                    matched_rule: Some(node.rule.name.clone()),
                    matched_pattern: Some(pattern.text.clone()),
                    confidence: pattern.confidence,
                    destination,
                };
            }
        }

        debug!("{} -> {}", record.path.display(), UNCATEGORIZED);
        Classification {
            path: record.path.clone(),
            category: UNCATEGORIZED.to_string(),
            matched_rule: None,
            matched_pattern: None,
            confidence: Confidence::Low,
            destination: self.base_dir.join(UNCATEGORIZED).join(&normalized),
        }
    }

    /// Classifies every record, looking up signals by path.
    pub fn classify_all<'r>(
        &self,
        records: impl IntoIterator<Item = &'r FileRecord>,
        signals: &HashMap<PathBuf, ContentSignals>,
    ) -> Vec<Classification> {
        let classifications: Vec<Classification> = records
            .into_iter()
            .map(|r| self.classify(r, signals.get(&r.path)))
            .collect();
        let uncategorized = classifications
            .iter()
            .filter(|c| c.category == UNCATEGORIZED)
            .count();
        info!(
            "classified {} files ({} uncategorized)",
            classifications.len(),
            uncategorized
        );
        classifications
    }
}

/// Writes classifications as a tab-separated review sheet.
pub fn write_classifications_tsv(path: &Path, classifications: &[Classification]) -> Result<(), csv::Error> {
    #[derive(Serialize)]
    struct Row<'a> {
        path: String,
        category: &'a str,
        confidence: Confidence,
        matched_rule: &'a str,
        matched_pattern: &'a str,
        destination: String,
    }

    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    for c in classifications {
        writer.serialize(Row {
            path: c.path.display().to_string(),
            category: &c.category,
            confidence: c.confidence,
            matched_rule: c.matched_rule.as_deref().unwrap_or(""),
            matched_pattern: c.matched_pattern.as_deref().unwrap_or(""),
            destination: c.destination.display().to_string(),
        })?;
    }
    writer.flush()?;
    Ok(())
}
