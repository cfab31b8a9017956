// Headless browser rasterizer. `ChromiumCli` shells out to a Chromium-family
// binary; tests substitute their own `BrowserEngine`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{html, RenderError};

const BROWSER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl Viewport {
    /// Missing dimensions fall back to the defaults.
    pub fn from_parts(width: Option<u32>, height: Option<u32>) -> Self {
        let fallback = Self::default();
        Self {
            width: width.filter(|w| *w > 0).unwrap_or(fallback.width),
            height: height.filter(|h| *h > 0).unwrap_or(fallback.height),
        }
    }
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Prints `html_path` to an A4 PDF at `pdf_path`.
    async fn print_pdf(&self, html_path: &Path, pdf_path: &Path) -> Result<(), RenderError>;

    /// Captures a PNG of `html_path` at `image_path`.
    async fn screenshot(
        &self,
        html_path: &Path,
        image_path: &Path,
        viewport: Viewport,
    ) -> Result<(), RenderError>;
}

#[derive(Debug, Clone)]
pub struct ChromiumCli {
    binary: String,
}

impl ChromiumCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn file_url(path: &Path) -> Result<String, RenderError> {
        let absolute = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| RenderError::io(path, e))?;
        Ok(format!("file://{}", absolute.display()))
    }

    async fn run(&self, args: Vec<String>, expected: &Path) -> Result<(), RenderError> {
        debug!(binary = %self.binary, ?args, "Launching headless browser");
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RenderError::Browser(format!("failed to start '{}': {e}", self.binary)))?;

        let output = tokio::time::timeout(BROWSER_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                RenderError::Browser(format!(
                    "'{}' timed out after {}s",
                    self.binary,
                    BROWSER_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| RenderError::Browser(format!("failed waiting for '{}': {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::Browser(format!(
                "'{}' exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }
        if !tokio::fs::try_exists(expected).await.unwrap_or(false) {
            return Err(RenderError::Browser(format!(
                "no output produced at {}",
                expected.display()
            )));
        }
        Ok(())
    }
}

fn base_args() -> Vec<String> {
    [
        "--headless=new",
        "--disable-gpu",
        "--no-sandbox",
        "--hide-scrollbars",
        "--run-all-compositor-stages-before-draw",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

/// Sibling copy of the page with print rules injected.
fn print_copy_path(html_path: &Path) -> PathBuf {
    let stem = html_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    html_path.with_file_name(format!("{stem}.print.html"))
}

#[async_trait]
impl BrowserEngine for ChromiumCli {
    async fn print_pdf(&self, html_path: &Path, pdf_path: &Path) -> Result<(), RenderError> {
        let source = tokio::fs::read_to_string(html_path)
            .await
            .map_err(|e| RenderError::io(html_path, e))?;
        let print_path = print_copy_path(html_path);
        tokio::fs::write(&print_path, html::with_print_css(&source))
            .await
            .map_err(|e| RenderError::io(&print_path, e))?;

        let mut args = base_args();
        args.push("--no-pdf-header-footer".to_string());
        args.push(format!("--print-to-pdf={}", pdf_path.display()));
        args.push(Self::file_url(&print_path).await?);

        let result = self.run(args, pdf_path).await;
        if let Err(e) = tokio::fs::remove_file(&print_path).await {
            debug!(path = %print_path.display(), "Could not remove print copy: {e}");
        }
        result
    }

    async fn screenshot(
        &self,
        html_path: &Path,
        image_path: &Path,
        viewport: Viewport,
    ) -> Result<(), RenderError> {
        let mut args = base_args();
        args.push(format!(
            "--window-size={},{}",
            viewport.width, viewport.height
        ));
        args.push(format!("--screenshot={}", image_path.display()));
        args.push(Self::file_url(html_path).await?);

        self.run(args, image_path).await
    }
}
