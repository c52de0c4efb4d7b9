//! Persistence: output paths, atomic JSON writes and the batch archive.
//!
//! Paths are a pure function of the document filename, so re-running a batch
//! overwrites the same files. Writes go to a sibling temp file first and are
//! renamed into place, so a reader never sees a half-written JSON file.

use crate::config::OutputLayout;
use crate::error::InvoiceError;
use crate::output::Document;
use crate::pipeline::input::sanitize_filename;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

static RE_PDF_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.pdf$").unwrap());
static RE_RAW_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(_raw)?\.json$").unwrap());

/// `invoice.PDF` → `invoice`. Names without a `.pdf` suffix are kept whole.
pub fn output_stem(filename: &str) -> String {
    RE_PDF_SUFFIX
        .replace(&sanitize_filename(filename), "")
        .into_owned()
}

/// `invoice_raw.json` → `invoice`, `other.json` → `other`.
pub fn raw_file_stem(filename: &str) -> String {
    RE_RAW_SUFFIX
        .replace(&sanitize_filename(filename), "")
        .into_owned()
}

pub fn raw_path(layout: &OutputLayout, stem: &str) -> PathBuf {
    layout.raw_dir.join(format!("{stem}_raw.json"))
}

pub fn structured_path(layout: &OutputLayout, stem: &str) -> PathBuf {
    layout.structured_dir.join(format!("{stem}_structured.json"))
}

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> InvoiceError + '_ {
    move |source| InvoiceError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `bytes` to `path` through a temp file and rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), InvoiceError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err(path))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(write_err(path))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(write_err(path))?;
    Ok(())
}

/// Pretty-print `value` to `path`.
pub async fn write_json(path: &Path, value: &Value) -> Result<(), InvoiceError> {
    let text = serde_json::to_vec_pretty(value)
        .map_err(|e| InvoiceError::Internal(format!("JSON serialisation failed: {}", e)))?;
    write_atomic(path, &text).await?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Keep a copy of the uploaded PDF under the inputs directory.
pub async fn save_input(layout: &OutputLayout, document: &Document) -> Result<PathBuf, InvoiceError> {
    let path = layout.inputs_dir.join(sanitize_filename(&document.filename));
    write_atomic(&path, &document.bytes).await?;
    debug!("Saved input {} ({} bytes)", path.display(), document.bytes.len());
    Ok(path)
}

/// Package `files` into a zip at `archive_path`, one entry per file named by
/// its basename. Later files win when two share a basename.
pub async fn write_archive(files: Vec<PathBuf>, archive_path: PathBuf) -> Result<PathBuf, InvoiceError> {
    tokio::task::spawn_blocking(move || write_archive_blocking(&files, &archive_path))
        .await
        .map_err(|e| InvoiceError::Internal(format!("Archive task panicked: {}", e)))?
}

fn write_archive_blocking(files: &[PathBuf], archive_path: &Path) -> Result<PathBuf, InvoiceError> {
    let archive_err = |detail: String| InvoiceError::ArchiveFailed {
        path: archive_path.to_path_buf(),
        detail,
    };

    let mut seen = HashSet::new();
    let mut entries: Vec<(String, &PathBuf)> = Vec::with_capacity(files.len());
    for path in files.iter().rev() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| archive_err(format!("{} has no file name", path.display())))?;
        if seen.insert(name.clone()) {
            entries.push((name, path));
        }
    }
    entries.reverse();

    let dir = archive_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| archive_err(e.to_string()))?;
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| archive_err(e.to_string()))?;

    let mut zip = ZipWriter::new(tmp);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, path) in &entries {
        let bytes = std::fs::read(path)
            .map_err(|e| archive_err(format!("cannot read {}: {}", path.display(), e)))?;
        zip.start_file(name.as_str(), options)
            .map_err(|e| archive_err(e.to_string()))?;
        zip.write_all(&bytes).map_err(|e| archive_err(e.to_string()))?;
    }
    let tmp = zip.finish().map_err(|e| archive_err(e.to_string()))?;
    tmp.persist(archive_path)
        .map_err(|e| archive_err(e.error.to_string()))?;

    info!(
        "Archived {} structured files → {}",
        entries.len(),
        archive_path.display()
    );
    Ok(archive_path.to_path_buf())
}
