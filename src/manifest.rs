//! Manifest records and the in-memory index built over them.
//!
//! The manifest is produced by an external scanner that walks the ingest
//! sources and hashes every file. This module reads that output, checks it
//! for integrity problems and exposes lookups by path and by content hash.
//!
//! Three layouts are accepted:
//!
//! - `.json`: either `{"files": [...]}` or a bare array of records
//! - `.jsonl` / `.ndjson`: one record per line
//! - `.tsv`: tab-separated with a header row
//!
//! # Examples
//!
//! ```
//! use cloudtidy::manifest::{FileRecord, ManifestIndex};
//!
//! let a = FileRecord::builder("/ingest/gdrive/a.pdf", "0123456789abcdef0123456789abcdef")
//!     .build()
//!     .unwrap();
//! let index = ManifestIndex::load(vec![a]).unwrap();
//! assert!(index.by_path("/ingest/gdrive/a.pdf").is_some());
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while reading or indexing a manifest.
///
/// All of these are fatal: a corrupted manifest has to be regenerated.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("duplicate path in manifest: {}", .0.display())]
    DuplicatePath(PathBuf),

    #[error("malformed manifest record {record}: {reason}")]
    MalformedRecord { record: String, reason: String },

    #[error("failed to read manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse manifest {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("unsupported manifest format '{0}' (expected .json, .jsonl, .ndjson or .tsv)")]
    UnsupportedFormat(String),
}

/// Where a file was pulled from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    Gdrive,
    Dropbox,
    Onedrive,
    Unknown,
    /// Any other named origin.
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::Gdrive => "gdrive",
            Source::Dropbox => "dropbox",
            Source::Onedrive => "onedrive",
            Source::Unknown => "unknown",
            Source::Other(name) => name,
        }
    }

    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.to_lowercase().as_str() {
            "gdrive" | "google-drive" | "googledrive" => Source::Gdrive,
            "dropbox" => Source::Dropbox,
            "onedrive" => Source::Onedrive,
            "" | "unknown" => Source::Unknown,
            other => Source::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Source::parse(&raw))
    }
}

/// Lowercase hex content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Accepted digest widths in hex characters (md5, sha1, sha256/blake3, sha512).
    const VALID_LENGTHS: [usize; 4] = [32, 40, 64, 128];

    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if value.is_empty() {
            return Err("content hash is empty".to_string());
        }
        if !Self::VALID_LENGTHS.contains(&value.len()) {
            return Err(format!(
                "content hash has {} hex characters, expected one of {:?}",
                value.len(),
                Self::VALID_LENGTHS
            ));
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("content hash '{}' is not hexadecimal", value));
        }
        Ok(Self(value.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `len` characters, used for short disambiguating suffixes.
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ContentHash::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// One physical file as described by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub source: Source,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub content_hash: ContentHash,
    pub extension: String,
    pub mime_type: Option<String>,
}

impl FileRecord {
    /// Starts a record with defaults for everything but path and hash.
    pub fn builder(path: impl Into<PathBuf>, content_hash: &str) -> FileRecordBuilder {
        FileRecordBuilder {
            path: path.into(),
            content_hash: content_hash.to_string(),
            source: Source::Unknown,
            size: 0,
            mtime: DateTime::<Utc>::UNIX_EPOCH,
            extension: None,
            mime_type: None,
        }
    }

    /// The final path component, lossily converted.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Builder used by tests and by the raw-record conversion.
#[derive(Debug, Clone)]
pub struct FileRecordBuilder {
    path: PathBuf,
    content_hash: String,
    source: Source,
    size: u64,
    mtime: DateTime<Utc>,
    extension: Option<String>,
    mime_type: Option<String>,
}

impl FileRecordBuilder {
    pub fn source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn mtime(mut self, mtime: DateTime<Utc>) -> Self {
        self.mtime = mtime;
        self
    }

    pub fn extension(mut self, extension: &str) -> Self {
        self.extension = Some(extension.to_string());
        self
    }

    pub fn mime_type(mut self, mime_type: &str) -> Self {
        self.mime_type = Some(mime_type.to_string());
        self
    }

    /// Validates the record and derives missing fields.
    pub fn build(self) -> Result<FileRecord, ManifestError> {
        let record_name = self.path.display().to_string();
        let malformed = |reason: String| ManifestError::MalformedRecord {
            record: record_name.clone(),
            reason,
        };

        if !self.path.is_absolute() {
            return Err(malformed("path must be absolute".to_string()));
        }
        if self.path.file_name().is_none() {
            return Err(malformed("path has no file name".to_string()));
        }
        let content_hash = ContentHash::parse(&self.content_hash).map_err(malformed)?;

        let extension = match self.extension {
            Some(ext) if !ext.trim().is_empty() => ext.trim().trim_start_matches('.').to_lowercase(),
            _ => self
                .path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
        };

        let mime_type = self
            .mime_type
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty() && m != "unknown");

        Ok(FileRecord {
            path: self.path,
            source: self.source,
            size: self.size,
            mtime: self.mtime,
            content_hash,
            extension,
            mime_type,
        })
    }
}

/// A record exactly as it appears on disk, before validation.
#[derive(Debug, Deserialize)]
struct RawRecord {
    path: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    size: u64,
    mtime: String,
    #[serde(alias = "contentHash", alias = "md5", alias = "hash")]
    content_hash: String,
    #[serde(default)]
    extension: Option<String>,
    #[serde(default, alias = "mimeType")]
    mime_type: Option<String>,
}

impl RawRecord {
    fn into_record(self) -> Result<FileRecord, ManifestError> {
        let mtime = parse_timestamp(&self.mtime).ok_or_else(|| ManifestError::MalformedRecord {
            record: self.path.clone(),
            reason: format!("unparsable mtime '{}'", self.mtime),
        })?;

        let mut builder = FileRecord::builder(&self.path, &self.content_hash)
            .source(Source::parse(self.source.as_deref().unwrap_or("")))
            .size(self.size)
            .mtime(mtime);
        if let Some(ext) = self.extension.as_deref() {
            builder = builder.extension(ext);
        }
        if let Some(mime) = self.mime_type.as_deref() {
            builder = builder.mime_type(mime);
        }
        builder.build()
    }
}

/// Parses RFC 3339 timestamps, falling back to naive ISO-8601 read as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Options for [`read_manifest`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Fill missing MIME types by sniffing file contents.
    pub sniff_mime: bool,
}

/// Reads and validates every record of a manifest file.
pub fn read_manifest(path: &Path, options: ReadOptions) -> Result<Vec<FileRecord>, ManifestError> {
    let content = fs::read_to_string(path).map_err(|e| ManifestError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let parse_error = |reason: String| ManifestError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    let raw_records: Vec<RawRecord> = match extension.as_str() {
        "json" => {
            // Either the scanner's `{"files": [...]}` document or a bare array.
            let document: serde_json::Value =
                serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?;
            let entries = match document {
                serde_json::Value::Array(entries) => entries,
                serde_json::Value::Object(mut fields) => match fields.remove("files") {
                    Some(serde_json::Value::Array(entries)) => entries,
                    _ => return Err(parse_error("expected a \"files\" array".to_string())),
                },
                _ => return Err(parse_error("expected an array of records".to_string())),
            };
            entries
                .into_iter()
                .enumerate()
                .map(|(n, entry)| {
                    serde_json::from_value(entry).map_err(|e| parse_error(format!("record {}: {}", n + 1, e)))
                })
                .collect::<Result<_, _>>()?
        }
        "jsonl" | "ndjson" => content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| parse_error(format!("line {}: {}", n + 1, e)))
            })
            .collect::<Result<_, _>>()?,
        "tsv" => {
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(b'\t')
                .flexible(true)
                .from_reader(content.as_bytes());
            reader
                .deserialize::<RawRecord>()
                .enumerate()
                .map(|(n, row)| row.map_err(|e| parse_error(format!("row {}: {}", n + 1, e))))
                .collect::<Result<_, _>>()?
        }
        other => return Err(ManifestError::UnsupportedFormat(other.to_string())),
    };

    let mut records = raw_records
        .into_iter()
        .map(RawRecord::into_record)
        .collect::<Result<Vec<_>, _>>()?;

    if options.sniff_mime {
        let sniffed = records
            .iter_mut()
            .filter(|r| r.mime_type.is_none())
            .filter_map(|r| {
                let kind = infer::get_from_path(&r.path).ok().flatten()?;
                r.mime_type = Some(kind.mime_type().to_string());
                Some(())
            })
            .count();
        debug!("sniffed MIME type for {} records", sniffed);
    }

    info!("read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Stable position of a record inside a [`ManifestIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(usize);

/// Records indexed by path and by content hash.
#[derive(Debug, Clone)]
pub struct ManifestIndex {
    records: Vec<FileRecord>,
    by_path: HashMap<PathBuf, RecordId>,
    by_hash: HashMap<ContentHash, Vec<RecordId>>,
}

impl ManifestIndex {
    /// Builds the index, rejecting the whole manifest on a repeated path.
    pub fn load(records: Vec<FileRecord>) -> Result<Self, ManifestError> {
        let mut by_path = HashMap::with_capacity(records.len());
        let mut by_hash: HashMap<ContentHash, Vec<RecordId>> = HashMap::new();

        for (i, record) in records.iter().enumerate() {
            let id = RecordId(i);
            if by_path.insert(record.path.clone(), id).is_some() {
                return Err(ManifestError::DuplicatePath(record.path.clone()));
            }
            by_hash.entry(record.content_hash.clone()).or_default().push(id);
        }

        Ok(Self {
            records,
            by_path,
            by_hash,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: RecordId) -> &FileRecord {
        &self.records[id.0]
    }

    /// All records sharing `hash`, in manifest order.
    pub fn by_hash(&self, hash: &ContentHash) -> Vec<&FileRecord> {
        self.by_hash
            .get(hash)
            .map(|ids| ids.iter().map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    pub fn by_path(&self, path: impl AsRef<Path>) -> Option<&FileRecord> {
        self.by_path.get(path.as_ref()).map(|id| self.get(*id))
    }

    pub fn id_of(&self, path: impl AsRef<Path>) -> Option<RecordId> {
        self.by_path.get(path.as_ref()).copied()
    }

    /// Hash buckets with their record ids, in no particular order.
    pub fn hash_buckets(&self) -> impl Iterator<Item = (&ContentHash, &[RecordId])> {
        self.by_hash.iter().map(|(h, ids)| (h, ids.as_slice()))
    }

    pub fn records(&self) -> impl Iterator<Item = (RecordId, &FileRecord)> {
        self.records.iter().enumerate().map(|(i, r)| (RecordId(i), r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const HASH_A: &str = "d41d8cd98f00b204e9800998ecf8427e";
    const HASH_B: &str = "0cc175b9c0f1b6a831c399e269772661";

    fn record(path: &str, hash: &str) -> FileRecord {
        FileRecord::builder(path, hash).build().unwrap()
    }

    #[test]
    fn test_load_indexes_by_hash_and_path() {
        let index = ManifestIndex::load(vec![
            record("/in/a.pdf", HASH_A),
            record("/in/b.pdf", HASH_A),
            record("/in/c.pdf", HASH_B),
        ])
        .unwrap();

        let hash = ContentHash::parse(HASH_A).unwrap();
        assert_eq!(index.by_hash(&hash).len(), 2);
        assert_eq!(index.by_path("/in/c.pdf").unwrap().content_hash.as_str(), HASH_B);
        assert!(index.by_path("/in/missing.pdf").is_none());
    }

    #[test]
    fn test_duplicate_path_is_fatal() {
        let result = ManifestIndex::load(vec![record("/in/a.pdf", HASH_A), record("/in/a.pdf", HASH_B)]);
        assert!(matches!(result, Err(ManifestError::DuplicatePath(p)) if p == Path::new("/in/a.pdf")));
    }

    #[test]
    fn test_builder_rejects_relative_path() {
        let result = FileRecord::builder("relative/a.pdf", HASH_A).build();
        assert!(matches!(result, Err(ManifestError::MalformedRecord { .. })));
    }

    #[test]
    fn test_builder_rejects_bad_hash() {
        assert!(FileRecord::builder("/in/a.pdf", "").build().is_err());
        assert!(FileRecord::builder("/in/a.pdf", "xyz").build().is_err());
        assert!(FileRecord::builder("/in/a.pdf", &"g".repeat(32)).build().is_err());
    }

    #[test]
    fn test_builder_derives_extension_and_drops_unknown_mime() {
        let r = FileRecord::builder("/in/Report.PDF", HASH_A)
            .mime_type("unknown")
            .build()
            .unwrap();
        assert_eq!(r.extension, "pdf");
        assert_eq!(r.mime_type, None);
        assert_eq!(r.file_name(), "Report.PDF");
    }

    #[test]
    fn test_hash_is_normalized_to_lowercase() {
        let hash = ContentHash::parse(&HASH_A.to_uppercase()).unwrap();
        assert_eq!(hash.as_str(), HASH_A);
        assert_eq!(hash.short(8), "d41d8cd9");
    }

    #[test]
    fn test_source_parse() {
        assert_eq!(Source::parse("GDrive"), Source::Gdrive);
        assert_eq!(Source::parse(""), Source::Unknown);
        assert_eq!(Source::parse("box"), Source::Other("box".to_string()));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp("2024-01-01T10:00:00+02:00").is_some());
        assert!(parse_timestamp("2024-01-01T10:00:00.123456").is_some());
        assert!(parse_timestamp("2024-01-01").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_read_json_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        let json = format!(
            r#"{{"generated_at": "2024-05-01T00:00:00", "files": [
                {{"path": "/in/gdrive/a.pdf", "source": "gdrive", "filename": "a.pdf",
                  "extension": "pdf", "size": 10, "mtime": "2024-01-01T00:00:00",
                  "md5": "{HASH_A}", "mime_type": "application/pdf"}}
            ]}}"#
        );
        fs::write(&path, json).unwrap();

        let records = read_manifest(&path, ReadOptions::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, Source::Gdrive);
        assert_eq!(records[0].mime_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn test_read_json_document_reports_record_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        let json = format!(
            r#"{{"files": [
                {{"path": "/in/a.pdf", "size": 1, "mtime": "2024-01-01T00:00:00Z", "md5": "{HASH_A}"}},
                {{"path": "/in/b.pdf", "size": "big", "mtime": "2024-01-01T00:00:00Z", "md5": "{HASH_A}"}}
            ]}}"#
        );
        fs::write(&path, json).unwrap();

        let err = read_manifest(&path, ReadOptions::default()).unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
        assert!(err.to_string().contains("record 2"), "{}", err);

        fs::write(&path, r#"{"generated_at": "2024-05-01"}"#).unwrap();
        let err = read_manifest(&path, ReadOptions::default()).unwrap_err();
        assert!(err.to_string().contains("\"files\" array"), "{}", err);
    }

    #[test]
    fn test_read_json_lines_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.jsonl");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"path": "/in/a.pdf", "size": 1, "mtime": "2024-01-01T00:00:00Z", "contentHash": "{HASH_A}"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{not json").unwrap();

        let err = read_manifest(&path, ReadOptions::default()).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_read_tsv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.tsv");
        let tsv = format!(
            "path\tsource\tsize\tmtime\tcontent_hash\tmime_type\n/in/a.pdf\tdropbox\t5\t2024-01-01T00:00:00\t{HASH_A}\t\n"
        );
        fs::write(&path, tsv).unwrap();

        let records = read_manifest(&path, ReadOptions::default()).unwrap();
        assert_eq!(records[0].source, Source::Dropbox);
        assert_eq!(records[0].size, 5);
        assert_eq!(records[0].mime_type, None);
    }

    #[test]
    fn test_read_unsupported_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.xml");
        fs::write(&path, "<files/>").unwrap();
        assert!(matches!(
            read_manifest(&path, ReadOptions::default()),
            Err(ManifestError::UnsupportedFormat(_))
        ));
    }
}
