use std::path::PathBuf;

use thiserror::Error;

use crate::llm_client::LlmError;
use crate::pdf::PdfError;

/// Fatal run errors. Everything recoverable is folded into the conversation
/// as a negative tool result instead of surfacing here.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Source résumé is not readable at {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template is not readable at {path}: {source}")]
    TemplateUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported template type for {0} (expected .docx or .html)")]
    UnsupportedTemplate(PathBuf),

    #[error("Could not extract résumé text: {0}")]
    SourceText(#[from] PdfError),

    #[error("LLM transport failed: {0}")]
    Transport(#[from] LlmError),

    #[error("{}", output_missing_message(.path, .last_error.as_deref()))]
    OutputMissing {
        path: PathBuf,
        last_error: Option<String>,
    },

    #[error("Export did not finish correctly: {0}")]
    ExportIncomplete(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Could not prepare working directory: {0}")]
    Workspace(#[source] std::io::Error),
}

fn output_missing_message(path: &std::path::Path, last_error: Option<&str>) -> String {
    match last_error {
        Some(error) => format!(
            "The output artifact was not created at {}: {error}",
            path.display()
        ),
        None => format!("The output artifact was not created at {}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_missing_includes_last_error() {
        let err = AgentError::OutputMissing {
            path: PathBuf::from("/tmp/out.pdf"),
            last_error: Some("render failed".to_string()),
        };
        let message = err.to_string();
        assert!(message.contains("not created"));
        assert!(message.contains("render failed"));
    }

    #[test]
    fn test_output_missing_without_error() {
        let err = AgentError::OutputMissing {
            path: PathBuf::from("/tmp/out.pdf"),
            last_error: None,
        };
        assert_eq!(
            err.to_string(),
            "The output artifact was not created at /tmp/out.pdf"
        );
    }
}
