//! Input resolution: a user-supplied path or URL → in-memory [`Document`].
//!
//! PDFium loads from a byte slice, so nothing is staged on disk here. The
//! PDF magic bytes (`%PDF`) are checked before returning so callers get a
//! meaningful error rather than a pdfium failure deep in rendering.

use crate::error::InvoiceError;
use crate::output::Document;
use crate::pipeline::render::check_pdf_magic;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve one input to a [`Document`].
///
/// URLs are downloaded with `timeout_secs` as the whole-request timeout;
/// anything else is read as a local file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Document, InvoiceError> {
    let document = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(Path::new(input)).await?
    };
    check_pdf_magic(&document)?;
    Ok(document)
}

/// Resolve several inputs, stopping at the first that cannot be read.
pub async fn resolve_inputs<S: AsRef<str>>(
    inputs: &[S],
    timeout_secs: u64,
) -> Result<Vec<Document>, InvoiceError> {
    let mut documents = Vec::with_capacity(inputs.len());
    for input in inputs {
        documents.push(resolve_input(input.as_ref(), timeout_secs).await?);
    }
    Ok(documents)
}

/// The final path component of `name`, so a client-supplied filename cannot
/// point outside the directory it is written to.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or("");
    match base {
        "" | "." | ".." => "upload.pdf".to_string(),
        other => other.to_string(),
    }
}

async fn read_local(path: &Path) -> Result<Document, InvoiceError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => InvoiceError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => InvoiceError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => InvoiceError::InvalidInput {
            input: format!("{}: {}", path.display(), e),
        },
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| sanitize_filename(&path.to_string_lossy()));

    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(Document::new(filename, bytes))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, InvoiceError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| InvoiceError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            InvoiceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            InvoiceError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(InvoiceError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| InvoiceError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let filename = filename_from_url(url);
    info!("Downloaded {} ({} bytes)", filename, bytes.len());
    Ok(Document::new(filename, bytes.to_vec()))
}

/// Last non-empty URL path segment with an extension, else `downloaded.pdf`.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return sanitize_filename(last);
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

/// Every `*.json` file directly inside `dir`, sorted by name.
pub async fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>, InvoiceError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => InvoiceError::FileNotFound {
            path: dir.to_path_buf(),
        },
        _ => InvoiceError::InvalidInput {
            input: format!("{}: {}", dir.display(), e),
        },
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| InvoiceError::Internal(format!("Failed to list {}: {}", dir.display(), e)))?
    {
        let path = entry.path();
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
