//! Filename rules shared by the resolver, the matcher and the plan builder.
//!
//! Everything here is a fixed set of regex transformations so that the same
//! input always produces the same name:
//!
//! - copy decorations (`Copy of x`, `x - Copy`, `x (1)`, `x copy`) are stripped
//! - version markers (`v2`, `final`, `FINAL`, `final_final`) are recognised
//!   and stripped when building near-duplicate keys
//! - destination names have unsafe characters replaced and whitespace
//!   normalized, with an optional date prefix

use crate::config::NamingSettings;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static COPY_OF_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^copy\s+of\s+").expect("valid regex"));
static NUMERIC_PAREN_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\(\d+\)$").expect("valid regex"));
static DASH_COPY_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+-\s+copy$").expect("valid regex"));
static SEP_COPY_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[-_ ]copy(\s+\d+)?$").expect("valid regex"));
static FINAL_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[-_ .]final([-_ .]final)*$").expect("valid regex"));
static DRAFT_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[-_ .]v(\d+)$").expect("valid regex"));
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static REPEATED_HYPHEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{2,}").expect("valid regex"));
static REPEATED_UNDERSCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_{2,}").expect("valid regex"));
static YEAR_IN_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])(?:19|20)\d{2}(?:[^0-9]|$)|(?:19|20)\d{2}(?:0[1-9]|1[0-2])(?:0[1-9]|[12]\d|3[01])")
        .expect("valid regex")
});
static DATE_SIGNAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:19|20)\d{2})(?:[-/.](0[1-9]|1[0-2])(?:[-/.](0[1-9]|[12]\d|3[01]))?)?")
        .expect("valid regex")
});

/// Version marker found at the end of a filename stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionMarker {
    /// `final`, `FINAL`, `final_final` and friends. Holds the matched text.
    Final(String),
    /// A numbered draft such as `v2`.
    Draft { number: u32, text: String },
}

impl VersionMarker {
    pub fn text(&self) -> &str {
        match self {
            VersionMarker::Final(text) => text,
            VersionMarker::Draft { text, .. } => text,
        }
    }
}

/// Splits a file name into stem and extension (without the dot).
pub fn split_name(file_name: &str) -> (&str, Option<&str>) {
    let path = Path::new(file_name);
    match (path.file_stem().and_then(|s| s.to_str()), path.extension().and_then(|e| e.to_str())) {
        (Some(stem), Some(ext)) => (stem, Some(ext)),
        _ => (file_name, None),
    }
}

fn join_name(stem: &str, ext: Option<&str>) -> String {
    match ext {
        Some(ext) if !ext.is_empty() => format!("{}.{}", stem, ext),
        _ => stem.to_string(),
    }
}

/// Removes one decoration from the end or start of `stem`, if any.
fn strip_one_decoration(stem: &str) -> Option<String> {
    for re in [&*COPY_OF_PREFIX, &*NUMERIC_PAREN_SUFFIX, &*DASH_COPY_SUFFIX, &*SEP_COPY_SUFFIX] {
        if re.is_match(stem) {
            let stripped = re.replace(stem, "").trim().to_string();
            if !stripped.is_empty() {
                return Some(stripped);
            }
        }
    }
    None
}

/// Strips copy decorations from a stem until none are left.
pub fn strip_decorations(stem: &str) -> String {
    let mut current = stem.trim().to_string();
    while let Some(next) = strip_one_decoration(&current) {
        current = next;
    }
    current
}

/// File name with copy decorations removed, extension preserved.
///
/// ```
/// use cloudtidy::naming::undecorated_name;
///
/// assert_eq!(undecorated_name("A (1).docx"), "A.docx");
/// assert_eq!(undecorated_name("Copy of plan - Copy.txt"), "plan.txt");
/// ```
pub fn undecorated_name(file_name: &str) -> String {
    let (stem, ext) = split_name(file_name);
    join_name(&strip_decorations(stem), ext)
}

pub fn is_decorated(file_name: &str) -> bool {
    let (stem, _) = split_name(file_name);
    strip_decorations(stem) != stem.trim()
}

/// The version marker closest to the end of the stem, ignoring decorations.
///
/// ```
/// use cloudtidy::naming::{version_marker, VersionMarker};
///
/// assert!(matches!(version_marker("thesis_FINAL (2).pdf"), Some(VersionMarker::Final(_))));
/// assert!(matches!(version_marker("thesis-v3.pdf"), Some(VersionMarker::Draft { number: 3, .. })));
/// assert_eq!(version_marker("thesis.pdf"), None);
/// ```
pub fn version_marker(file_name: &str) -> Option<VersionMarker> {
    let (stem, _) = split_name(file_name);
    let stem = strip_decorations(stem);

    if let Some(m) = FINAL_SUFFIX.find(&stem) {
        let text = m.as_str().trim_start_matches(['-', '_', ' ', '.']).to_string();
        return Some(VersionMarker::Final(text));
    }
    let caps = DRAFT_SUFFIX.captures(&stem)?;
    let number = caps.get(1)?.as_str().parse().ok()?;
    let text = caps
        .get(0)?
        .as_str()
        .trim_start_matches(['-', '_', ' ', '.'])
        .to_string();
    Some(VersionMarker::Draft { number, text })
}

/// Key used to find near duplicates: lowercase stem with decorations and
/// version markers stripped, plus the extension.
///
/// ```
/// use cloudtidy::naming::near_duplicate_key;
///
/// assert_eq!(near_duplicate_key("Budget_v2.xlsx", "xlsx"), "budget.xlsx");
/// assert_eq!(near_duplicate_key("Budget FINAL (1).xlsx", "xlsx"), "budget.xlsx");
/// assert_eq!(near_duplicate_key("budget_final_final.xlsx", "xlsx"), "budget.xlsx");
/// ```
pub fn near_duplicate_key(file_name: &str, extension: &str) -> String {
    let (stem, _) = split_name(file_name);
    let mut current = strip_decorations(stem);
    loop {
        let next = if FINAL_SUFFIX.is_match(&current) {
            FINAL_SUFFIX.replace(&current, "").to_string()
        } else if DRAFT_SUFFIX.is_match(&current) {
            DRAFT_SUFFIX.replace(&current, "").to_string()
        } else {
            break;
        };
        let next = strip_decorations(&next);
        if next.is_empty() || next == current {
            break;
        }
        current = next;
    }

    let key_stem = current.trim_matches(['-', '_', ' ', '.']).to_lowercase();
    let key_stem = if key_stem.is_empty() {
        stem.to_lowercase()
    } else {
        key_stem
    };
    join_name(&key_stem, Some(&extension.to_lowercase()))
}

/// True when the stem already carries a year or compact date.
pub fn contains_date(stem: &str) -> bool {
    YEAR_IN_NAME.is_match(stem)
}

/// Turns a date signal (`2024-03-15`, `2024-03`, `2024`, RFC 3339) into a
/// filename prefix without the trailing separator.
pub fn date_prefix(signal: &str) -> Option<String> {
    let caps = DATE_SIGNAL.captures(signal.trim())?;
    let year = caps.get(1)?.as_str();
    Some(match (caps.get(2), caps.get(3)) {
        (Some(month), Some(day)) => format!("{}-{}-{}", year, month.as_str(), day.as_str()),
        (Some(month), None) => format!("{}-{}", year, month.as_str()),
        _ => year.to_string(),
    })
}

/// Produces the library file name for `file_name`.
///
/// ```
/// use cloudtidy::config::NamingSettings;
/// use cloudtidy::naming::normalize_filename;
///
/// let opts = NamingSettings::default();
/// assert_eq!(normalize_filename("2024-1099-DIV.pdf", &opts, None), "2024-1099-DIV.pdf");
/// assert_eq!(normalize_filename("My Notes (1).TXT", &opts, None), "My-Notes.txt");
/// assert_eq!(normalize_filename("receipt.pdf", &opts, Some("2023-04-01")), "2023-04-01-receipt.pdf");
/// ```
pub fn normalize_filename(file_name: &str, settings: &NamingSettings, date_signal: Option<&str>) -> String {
    let (stem, ext) = split_name(file_name);

    let mut stem = strip_decorations(stem);
    stem = UNSAFE_CHARS.replace_all(&stem, "_").into_owned();
    stem = if settings.whitespace_to_hyphen {
        WHITESPACE.replace_all(&stem, "-").into_owned()
    } else {
        WHITESPACE.replace_all(&stem, " ").into_owned()
    };
    stem = REPEATED_HYPHEN.replace_all(&stem, "-").into_owned();
    stem = REPEATED_UNDERSCORE.replace_all(&stem, "_").into_owned();
    let mut stem = stem.trim_matches(['-', '_', ' ', '.']).to_string();
    if stem.is_empty() {
        stem = "unnamed".to_string();
    }

    if settings.date_prefix
        && !contains_date(&stem)
        && let Some(prefix) = date_signal.and_then(date_prefix)
    {
        stem = format!("{}-{}", prefix, stem);
    }

    let ext = ext.map(|e| UNSAFE_CHARS.replace_all(&e.to_lowercase(), "_").into_owned());
    join_name(&stem, ext.as_deref())
}

/// Inserts `suffix` between stem and extension: `report.pdf` → `report-<suffix>.pdf`.
pub fn with_suffix(file_name: &str, suffix: &str) -> String {
    let (stem, ext) = split_name(file_name);
    join_name(&format!("{}-{}", stem, suffix), ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> NamingSettings {
        NamingSettings::default()
    }

    #[test]
    fn test_strip_decorations() {
        assert_eq!(strip_decorations("A (1)"), "A");
        assert_eq!(strip_decorations("Report - Copy"), "Report");
        assert_eq!(strip_decorations("Report - Copy (2)"), "Report");
        assert_eq!(strip_decorations("Copy of Report"), "Report");
        assert_eq!(strip_decorations("Report copy 2"), "Report");
        assert_eq!(strip_decorations("report_copy"), "report");
        assert_eq!(strip_decorations("Report"), "Report");
    }

    #[test]
    fn test_strip_decorations_keeps_non_empty_stem() {
        assert_eq!(strip_decorations("(1)"), "(1)");
        assert_eq!(strip_decorations("copy"), "copy");
    }

    #[test]
    fn test_is_decorated() {
        assert!(is_decorated("A (1).docx"));
        assert!(!is_decorated("A.docx"));
    }

    #[test]
    fn test_version_marker_variants() {
        assert_eq!(
            version_marker("plan_final_final.doc"),
            Some(VersionMarker::Final("final_final".to_string()))
        );
        assert_eq!(
            version_marker("plan FINAL.doc"),
            Some(VersionMarker::Final("FINAL".to_string()))
        );
        assert_eq!(
            version_marker("plan-v12.doc"),
            Some(VersionMarker::Draft {
                number: 12,
                text: "v12".to_string()
            })
        );
        assert_eq!(version_marker("finalist.doc"), None);
    }

    #[test]
    fn test_near_duplicate_key_groups_variants() {
        let base = near_duplicate_key("Thesis.docx", "docx");
        for name in [
            "Thesis_v1.docx",
            "thesis-v2.docx",
            "Thesis FINAL.docx",
            "Thesis_final_final.docx",
            "Thesis (3).docx",
            "Copy of Thesis.docx",
            "Thesis_v2_final.docx",
        ] {
            assert_eq!(near_duplicate_key(name, "docx"), base, "{}", name);
        }
        assert_ne!(near_duplicate_key("Thesis.pdf", "pdf"), base);
    }

    #[test]
    fn test_near_duplicate_key_of_pure_marker() {
        assert_eq!(near_duplicate_key("v2.txt", "txt"), "v2.txt");
        assert_eq!(near_duplicate_key("final.txt", "txt"), "final.txt");
    }

    #[test]
    fn test_contains_date() {
        assert!(contains_date("2024-1099-DIV"));
        assert!(contains_date("scan_20230115"));
        assert!(contains_date("notes 1999"));
        assert!(!contains_date("1099-DIV"));
        assert!(!contains_date("invoice-12345"));
    }

    #[test]
    fn test_date_prefix() {
        assert_eq!(date_prefix("2024-03-15"), Some("2024-03-15".to_string()));
        assert_eq!(date_prefix("2024-03-15T10:00:00Z"), Some("2024-03-15".to_string()));
        assert_eq!(date_prefix("2024-03"), Some("2024-03".to_string()));
        assert_eq!(date_prefix("2024"), Some("2024".to_string()));
        assert_eq!(date_prefix("March 2024"), None);
    }

    #[test]
    fn test_normalize_unsafe_and_whitespace() {
        assert_eq!(normalize_filename("a:b?c.pdf", &opts(), None), "a_b_c.pdf");
        assert_eq!(normalize_filename("  my   file .pdf", &opts(), None), "my-file.pdf");
        assert_eq!(normalize_filename("a - b.pdf", &opts(), None), "a-b.pdf");
        assert_eq!(normalize_filename("---.pdf", &opts(), None), "unnamed.pdf");
    }

    #[test]
    fn test_normalize_without_hyphenation() {
        let settings = NamingSettings {
            whitespace_to_hyphen: false,
            ..NamingSettings::default()
        };
        assert_eq!(normalize_filename("my   notes.txt", &settings, None), "my notes.txt");
    }

    #[test]
    fn test_normalize_date_prefix_only_when_missing() {
        assert_eq!(
            normalize_filename("2022 taxes.pdf", &opts(), Some("2023-01-01")),
            "2022-taxes.pdf"
        );
        let settings = NamingSettings {
            date_prefix: false,
            ..NamingSettings::default()
        };
        assert_eq!(normalize_filename("taxes.pdf", &settings, Some("2023-01-01")), "taxes.pdf");
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(with_suffix("report.pdf", "abcd1234"), "report-abcd1234.pdf");
        assert_eq!(with_suffix("README", "abcd1234"), "README-abcd1234");
    }
}
