//! Local PDF text extraction for the inline attachment mode.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("Could not read PDF {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse PDF {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("PDF {0} has no extractable text (scanned or empty?)")]
    NoText(PathBuf),
}

/// Extracts the text layer of a PDF. Parsing is CPU-bound, so it runs on
/// the blocking pool.
pub async fn read_pdf_text(path: &Path) -> Result<String, PdfError> {
    let owned = path.to_path_buf();
    let bytes = tokio::fs::read(&owned).await.map_err(|source| PdfError::Io {
        path: owned.clone(),
        source,
    })?;

    let parse_path = owned.clone();
    let text = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| PdfError::Parse {
            path: parse_path,
            message: e.to_string(),
        })
    })
    .await
    .map_err(|e| PdfError::Parse {
        path: owned.clone(),
        message: format!("extraction task failed: {e}"),
    })??;

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(PdfError::NoText(owned));
    }

    debug!(path = %owned.display(), chars = text.len(), "Extracted PDF text");
    Ok(text)
}
