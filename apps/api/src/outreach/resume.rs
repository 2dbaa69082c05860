//! Résumé storage and text extraction.

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::outreach::smtp::MAX_ATTACHMENT_BYTES;

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("Résumé must be a PDF file")]
    NotPdf,

    #[error("Résumé is {0} bytes; the limit is 25 MB")]
    TooLarge(u64),

    #[error("Failed to store résumé: {0}")]
    Io(#[from] std::io::Error),
}

/// Stores an uploaded PDF as `<dir>/<user_id>.pdf`, replacing any earlier upload.
pub async fn save_resume(dir: &Path, user_id: Uuid, bytes: Vec<u8>) -> Result<PathBuf, ResumeError> {
    if bytes.len() as u64 > MAX_ATTACHMENT_BYTES {
        return Err(ResumeError::TooLarge(bytes.len() as u64));
    }
    if !bytes.starts_with(b"%PDF") {
        return Err(ResumeError::NotPdf);
    }

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{user_id}.pdf"));

    let target = path.clone();
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

    info!("Stored résumé for user {user_id} at {}", path.display());
    Ok(path)
}

/// Plain text of the PDF at `path`, or `None` when it cannot be read or parsed.
/// Drafting works without a résumé, so failures only warn.
pub async fn extract_resume_text(path: &Path) -> Option<String> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) => {
            warn!("Could not read résumé {}: {e}", path.display());
            return None;
        }
    };

    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .ok()?;

    match text {
        Ok(text) if !text.trim().is_empty() => Some(normalize_whitespace(&text)),
        Ok(_) => {
            warn!("Résumé {} contains no extractable text", path.display());
            None
        }
        Err(e) => {
            warn!("Failed to extract text from {}: {e}", path.display());
            None
        }
    }
}

/// Collapses runs of blank lines and trailing spaces left by PDF extraction.
fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
