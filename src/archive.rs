use crate::db;
use crate::grading::{GradingScale, GradingScaleConfig};
use anyhow::Context;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const ARCHIVE_FORMAT_V1: &str = "examd-archive-v1";
pub const RAW_SQLITE_FORMAT: &str = "raw-sqlite3";

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "records.sqlite3";
const STAGING_FILE_NAME: &str = "examd.sqlite3.importing";
const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Reasons an archive is refused. Anything else is an IO failure.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("file is neither an examd archive nor a SQLite database")]
    UnrecognizedFile,
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),
    #[error("archive is not a readable zip file: {0}")]
    CorruptArchive(String),
    #[error("archive is missing {0}")]
    MissingEntry(&'static str),
    #[error("manifest.json is malformed: {0}")]
    MalformedManifest(String),
    #[error("database digest mismatch: manifest {expected}, archive {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("database does not hold exam records: {0}")]
    NotExamRecords(String),
    #[error("record counts differ from manifest: manifest {expected:?}, database {actual:?}")]
    CountMismatch {
        expected: RecordCounts,
        actual: RecordCounts,
    },
    #[error("grading scale differs from manifest")]
    ScaleMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCounts {
    pub courses: i64,
    pub students: i64,
    pub marks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveManifest {
    pub format: String,
    pub app_version: String,
    pub exported_at: String,
    pub db_sha256: String,
    pub counts: RecordCounts,
    pub grading_scale: GradingScaleConfig,
}

/// A validated database waiting next to the live one.
#[derive(Debug)]
pub struct StagedImport {
    pub format: &'static str,
    pub counts: RecordCounts,
    staged: PathBuf,
    target: PathBuf,
}

impl StagedImport {
    /// Swaps the staged file over the live database. On failure the staged
    /// file is removed and the live database is left as it was.
    pub fn commit(self) -> anyhow::Result<()> {
        if let Err(e) = std::fs::rename(&self.staged, &self.target) {
            let _ = std::fs::remove_file(&self.staged);
            return Err(anyhow::Error::new(e).context(format!(
                "failed to move staged database to {}",
                self.target.to_string_lossy()
            )));
        }
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn count_records(conn: &Connection) -> rusqlite::Result<RecordCounts> {
    let count = |table: &str| -> rusqlite::Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
    };
    Ok(RecordCounts {
        courses: count("courses")?,
        students: count("students")?,
        marks: count("marks")?,
    })
}

/// Writes the workspace database to a zip archive whose manifest records the
/// grading scale in force and how many courses, students and marks it holds.
pub fn export_archive(
    conn: &Connection,
    workspace: &Path,
    out_path: &Path,
) -> anyhow::Result<ArchiveManifest> {
    let counts = count_records(conn).context("failed to count records")?;
    let scale = db::load_grading_scale(conn)?;

    let db_path = workspace.join(db::DB_FILE_NAME);
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.to_string_lossy()))?;

    let manifest = ArchiveManifest {
        format: ARCHIVE_FORMAT_V1.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: db::now_timestamp(),
        db_sha256: sha256_hex(&db_bytes),
        counts,
        grading_scale: GradingScaleConfig::from(&scale),
    };

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create {}", out_path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_ENTRY, opts)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
    zip.start_file(DB_ENTRY, opts)?;
    zip.write_all(&db_bytes)?;
    zip.finish().context("failed to finalize archive")?;

    Ok(manifest)
}

/// Reads an archive (or a bare SQLite database), checks it and stages it in
/// `workspace`. The live database is not touched until `commit`.
pub fn stage_import(in_path: &Path, workspace: &Path) -> anyhow::Result<StagedImport> {
    let bytes = std::fs::read(in_path)
        .with_context(|| format!("failed to read {}", in_path.to_string_lossy()))?;

    let (format, db_bytes, manifest) = if bytes.starts_with(&ZIP_MAGIC) {
        let (manifest, db_bytes) = read_archive(&bytes)?;
        (ARCHIVE_FORMAT_V1, db_bytes, Some(manifest))
    } else if bytes.starts_with(SQLITE_HEADER) {
        (RAW_SQLITE_FORMAT, bytes, None)
    } else {
        return Err(ArchiveError::UnrecognizedFile.into());
    };

    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let staged = workspace.join(STAGING_FILE_NAME);
    let mut out = File::create(&staged)
        .with_context(|| format!("failed to create {}", staged.to_string_lossy()))?;
    out.write_all(&db_bytes)?;
    out.sync_all()?;
    drop(out);

    let checked = check_staged(&staged, manifest.as_ref());
    let counts = match checked {
        Ok(c) => c,
        Err(e) => {
            let _ = std::fs::remove_file(&staged);
            return Err(e);
        }
    };

    Ok(StagedImport {
        format,
        counts,
        staged,
        target: workspace.join(db::DB_FILE_NAME),
    })
}

fn read_archive(bytes: &[u8]) -> anyhow::Result<(ArchiveManifest, Vec<u8>)> {
    let mut archive = ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ArchiveError::CorruptArchive(e.to_string()))?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .map_err(|_| ArchiveError::MissingEntry(MANIFEST_ENTRY))?
        .read_to_string(&mut manifest_text)?;
    let manifest: ArchiveManifest = serde_json::from_str(&manifest_text)
        .map_err(|e| ArchiveError::MalformedManifest(e.to_string()))?;
    if manifest.format != ARCHIVE_FORMAT_V1 {
        return Err(ArchiveError::UnsupportedFormat(manifest.format).into());
    }

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .map_err(|_| ArchiveError::MissingEntry(DB_ENTRY))?
        .read_to_end(&mut db_bytes)?;
    let actual = sha256_hex(&db_bytes);
    if actual != manifest.db_sha256 {
        return Err(ArchiveError::DigestMismatch {
            expected: manifest.db_sha256,
            actual,
        }
        .into());
    }
    if !db_bytes.starts_with(SQLITE_HEADER) {
        return Err(ArchiveError::UnrecognizedFile.into());
    }
    Ok((manifest, db_bytes))
}

fn check_staged(staged: &Path, manifest: Option<&ArchiveManifest>) -> anyhow::Result<RecordCounts> {
    let conn = Connection::open(staged)
        .with_context(|| format!("failed to open {}", staged.to_string_lossy()))?;
    let counts =
        count_records(&conn).map_err(|e| ArchiveError::NotExamRecords(e.to_string()))?;
    let scale: GradingScale = db::load_grading_scale(&conn)
        .map_err(|e| ArchiveError::NotExamRecords(format!("{:#}", e)))?;

    if let Some(m) = manifest {
        if m.counts != counts {
            return Err(ArchiveError::CountMismatch {
                expected: m.counts,
                actual: counts,
            }
            .into());
        }
        let declared = GradingScale::from_config(m.grading_scale.clone())
            .map_err(|_| ArchiveError::ScaleMismatch)?;
        if declared != scale {
            return Err(ArchiveError::ScaleMismatch.into());
        }
    }
    Ok(counts)
}
