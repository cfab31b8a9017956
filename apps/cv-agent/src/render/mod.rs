/// Document Renderer: fills DOCX and HTML templates and drives the headless
/// browser for previews and print exports.
///
/// Templates are read-only: every fill writes to a separate output path.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

pub mod browser;
pub mod docx;
pub mod fields;
pub mod html;

pub use browser::{BrowserEngine, ChromiumCli, Viewport};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template error: {0}")]
    Template(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("DOCX archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Refusing to overwrite the template at {0}")]
    SameAsTemplate(PathBuf),

    #[error("Render task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RenderError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        RenderError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Which fill pipeline a template selects, by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFamily {
    Docx,
    Html,
}

impl TemplateFamily {
    pub fn detect(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "docx" => Some(TemplateFamily::Docx),
            "html" | "htm" => Some(TemplateFamily::Html),
            _ => None,
        }
    }
}

/// A file written by the renderer, with its bytes kept for inlining.
#[derive(Debug, Clone)]
pub struct RenderedArtifact {
    pub path: PathBuf,
    pub bytes: Bytes,
}

/// Template fills plus browser-backed preview and export.
#[derive(Clone)]
pub struct Renderer {
    browser: Arc<dyn BrowserEngine>,
}

impl Renderer {
    pub fn new(browser: Arc<dyn BrowserEngine>) -> Self {
        Self { browser }
    }

    pub async fn fill_docx(
        &self,
        template: &Path,
        output: &Path,
        fields: &Map<String, Value>,
    ) -> Result<RenderedArtifact, RenderError> {
        guard_template(template, output).await?;
        let template_bytes = tokio::fs::read(template)
            .await
            .map_err(|e| RenderError::io(template, e))?;

        let data = Value::Object(fields::prepare_fields(fields));
        let rendered =
            tokio::task::spawn_blocking(move || docx::render_docx(&template_bytes, &data))
                .await??;

        write_output(output, &rendered).await?;
        debug!(output = %output.display(), bytes = rendered.len(), "DOCX written");
        Ok(RenderedArtifact {
            path: output.to_path_buf(),
            bytes: Bytes::from(rendered),
        })
    }

    pub async fn fill_html(
        &self,
        template: &Path,
        output: &Path,
        fields: &Map<String, Value>,
    ) -> Result<RenderedArtifact, RenderError> {
        guard_template(template, output).await?;
        let source = tokio::fs::read_to_string(template)
            .await
            .map_err(|e| RenderError::io(template, e))?;

        let filled = html::apply_placeholders(&source, &fields::prepare_fields(fields));
        write_output(output, filled.as_bytes()).await?;
        debug!(output = %output.display(), bytes = filled.len(), "HTML written");
        Ok(RenderedArtifact {
            path: output.to_path_buf(),
            bytes: Bytes::from(filled),
        })
    }

    pub async fn snapshot(
        &self,
        html: &Path,
        image: &Path,
        viewport: Viewport,
    ) -> Result<RenderedArtifact, RenderError> {
        ensure_parent(image).await?;
        self.browser.screenshot(html, image, viewport).await?;
        read_artifact(image).await
    }

    pub async fn export_pdf(&self, html: &Path, pdf: &Path) -> Result<RenderedArtifact, RenderError> {
        ensure_parent(pdf).await?;
        self.browser.print_pdf(html, pdf).await?;
        read_artifact(pdf).await
    }

    /// Word opens HTML saved under a `.doc` name; no conversion happens.
    pub async fn export_doc(&self, html: &Path, doc: &Path) -> Result<RenderedArtifact, RenderError> {
        let source = tokio::fs::read(html)
            .await
            .map_err(|e| RenderError::io(html, e))?;
        write_output(doc, &source).await?;
        Ok(RenderedArtifact {
            path: doc.to_path_buf(),
            bytes: Bytes::from(source),
        })
    }
}

async fn guard_template(template: &Path, output: &Path) -> Result<(), RenderError> {
    if !tokio::fs::try_exists(output).await.unwrap_or(false) {
        return Ok(());
    }
    let template_abs = tokio::fs::canonicalize(template)
        .await
        .map_err(|e| RenderError::io(template, e))?;
    let output_abs = tokio::fs::canonicalize(output)
        .await
        .map_err(|e| RenderError::io(output, e))?;
    if template_abs == output_abs {
        return Err(RenderError::SameAsTemplate(template_abs));
    }
    Ok(())
}

async fn ensure_parent(path: &Path) -> Result<(), RenderError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RenderError::io(parent, e))?;
    }
    Ok(())
}

async fn write_output(path: &Path, contents: &[u8]) -> Result<(), RenderError> {
    ensure_parent(path).await?;
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| RenderError::io(path, e))
}

async fn read_artifact(path: &Path) -> Result<RenderedArtifact, RenderError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| RenderError::io(path, e))?;
    Ok(RenderedArtifact {
        path: path.to_path_buf(),
        bytes: Bytes::from(bytes),
    })
}
