use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Minimum number of non-whitespace characters before a PDF is considered
/// to contain usable text. Scanned reports fall below this and are rejected.
const MIN_TEXT_CHARS: usize = 100;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("could not read PDF: {0}")]
    Io(#[from] std::io::Error),

    #[error("no extractable text in {0} (scanned document?)")]
    NoText(String),

    #[error("extraction task failed: {0}")]
    Join(String),
}

/// Extract the full text of a PDF.
///
/// `pdf-extract` is tried first; when it fails or produces too little text
/// the raw page text from `lopdf` is used instead. Both are CPU-bound, so
/// the whole thing runs on the blocking pool.
pub async fn extract_text(path: &Path) -> Result<String, ExtractError> {
    let path: PathBuf = path.to_path_buf();
    let display_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.pdf")
        .to_string();

    let text = tokio::task::spawn_blocking(move || extract_text_blocking(&path))
        .await
        .map_err(|e| ExtractError::Join(e.to_string()))??;

    if usable_chars(&text) < MIN_TEXT_CHARS {
        return Err(ExtractError::NoText(display_name));
    }
    Ok(text)
}

fn extract_text_blocking(path: &Path) -> Result<String, ExtractError> {
    match pdf_extract::extract_text(path) {
        Ok(text) if usable_chars(&text) >= MIN_TEXT_CHARS => {
            debug!("extracted {} chars with pdf-extract", text.len());
            Ok(text)
        }
        Ok(text) => {
            warn!(
                "pdf-extract produced only {} usable chars, trying lopdf",
                usable_chars(&text)
            );
            Ok(extract_with_lopdf(path).unwrap_or(text))
        }
        Err(e) => {
            warn!("pdf-extract failed ({}), trying lopdf", e);
            extract_with_lopdf(path).ok_or_else(|| {
                ExtractError::NoText(
                    path.file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("upload.pdf")
                        .to_string(),
                )
            })
        }
    }
}

fn extract_with_lopdf(path: &Path) -> Option<String> {
    let document = lopdf::Document::load(path).ok()?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return None;
    }
    let text = document.extract_text(&pages).ok()?;
    debug!("extracted {} chars with lopdf fallback", text.len());
    Some(text)
}

fn usable_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}
