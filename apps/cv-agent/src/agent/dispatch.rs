//! Tool dispatch table: one handler per tool. Handlers check the usage
//! policy, call the renderer and fold the result into `AgentState`. They never
//! return `Err`; every failure becomes a negative `ToolOutcome` the model sees.

use std::path::{Path, PathBuf};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::conversation::{ContentPart, InputItem};
use crate::llm_client::FilePurpose;
use crate::render::{RenderedArtifact, Renderer, TemplateFamily, Viewport};

use super::policy::{FillKind, PolicyViolation, UsagePolicy};
use super::prompts;
use super::state::AgentState;
use super::tools::{ExportArgs, ExportFormat, FillArgs, PreviewArgs, ToolArgs, ToolInvocation};
use super::uploads::UploadRegistry;

const WORKING_HTML: &str = "resume.html";
const PREVIEW_IMAGE: &str = "resume-preview.png";

/// What a handler hands back to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub ok: bool,
    /// Echoed to the model as the tool result.
    pub result: Value,
    /// Local bookkeeping copy; large binary payloads are redacted.
    pub record: Value,
    /// Messages appended after the tool result (e.g. a preview image).
    pub extra_messages: Vec<InputItem>,
    /// Call the model again right away, skipping end-of-turn checks.
    pub continue_loop: bool,
    /// Stop the run successfully.
    pub exit_loop: bool,
    pub note: Option<String>,
}

impl ToolOutcome {
    fn success(result: Value) -> Self {
        Self {
            ok: true,
            record: result.clone(),
            result,
            extra_messages: Vec::new(),
            continue_loop: false,
            exit_loop: false,
            note: None,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        let result = json!({ "ok": false, "error": error.into() });
        Self {
            ok: false,
            record: result.clone(),
            result,
            extra_messages: Vec::new(),
            continue_loop: false,
            exit_loop: false,
            note: None,
        }
    }

    fn rejected(violation: PolicyViolation) -> Self {
        Self::failure(violation.to_string()).with_note(format!("policy: {violation}"))
    }

    fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn error(&self) -> Option<&str> {
        self.result.get("error").and_then(Value::as_str)
    }
}

/// Default locations the handlers fall back to when the model omits a path.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub template: PathBuf,
    pub output: PathBuf,
    pub work_dir: PathBuf,
}

impl RunPaths {
    pub fn working_html(&self) -> PathBuf {
        self.work_dir.join(WORKING_HTML)
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

pub struct ToolDispatcher {
    family: TemplateFamily,
    renderer: Renderer,
    policy: UsagePolicy,
    paths: RunPaths,
    upload_previews: bool,
}

impl ToolDispatcher {
    pub fn new(
        family: TemplateFamily,
        renderer: Renderer,
        policy: UsagePolicy,
        paths: RunPaths,
        upload_previews: bool,
    ) -> Self {
        Self {
            family,
            renderer,
            policy,
            paths,
            upload_previews,
        }
    }

    pub async fn dispatch(
        &self,
        invocation: &ToolInvocation,
        state: &mut AgentState,
        uploads: &mut UploadRegistry,
    ) -> ToolOutcome {
        let tool = invocation.tool_name();
        debug!(tool, call_id = %invocation.call_id, args = ?invocation.args, "Dispatching tool call");

        let outcome = match (&invocation.args, self.family) {
            (ToolArgs::FillDocx(args), TemplateFamily::Docx) => self.fill_docx(args, state).await,
            (ToolArgs::FillHtml(args), TemplateFamily::Html) => self.fill_html(args, state).await,
            (ToolArgs::Preview(args), TemplateFamily::Html) => {
                self.preview(args, state, uploads).await
            }
            (ToolArgs::Export(args), TemplateFamily::Html) => self.export(args, state).await,
            (ToolArgs::Unknown { name }, _) => ToolOutcome::failure(format!("Unknown tool: {name}")),
            (other, _) => ToolOutcome::failure(format!(
                "Tool {} is not available for this template",
                other.tool_name()
            )),
        };

        let outcome = match &invocation.malformed {
            Some(reason) => {
                warn!(tool, call_id = %invocation.call_id, "Malformed tool arguments: {reason}");
                let mut outcome = outcome.with_note(format!("malformed arguments: {reason}"));
                if let Value::Object(result) = &mut outcome.result {
                    result.insert(
                        "warning".to_string(),
                        json!(format!("arguments were ignored: {reason}")),
                    );
                }
                outcome
            }
            None => outcome,
        };

        debug!(tool, ok = outcome.ok, result = %outcome.record, "Tool result");
        outcome
    }

    async fn fill_docx(&self, args: &FillArgs, state: &mut AgentState) -> ToolOutcome {
        let template = args
            .template_path
            .clone()
            .unwrap_or_else(|| self.paths.template.clone());
        let output = args
            .output_path
            .clone()
            .unwrap_or_else(|| self.paths.output.clone());

        state.fills += 1;
        match self.renderer.fill_docx(&template, &output, &args.fields).await {
            Ok(artifact) => {
                info!(output = %artifact.path.display(), "DOCX generated");
                state.export_succeeded = true;
                state.last_error = None;
                state.final_message = format!("DOCX generated at {}", artifact.path.display());
                state.output_path = artifact.path.clone();
                ToolOutcome::success(json!({ "ok": true, "output_path": display(&artifact.path) }))
            }
            Err(e) => self.render_failure(state, e.to_string()),
        }
    }

    async fn fill_html(&self, args: &FillArgs, state: &mut AgentState) -> ToolOutcome {
        let kind = match self.policy.check_fill(state) {
            Ok(kind) => kind,
            Err(violation) => return ToolOutcome::rejected(violation),
        };
        let template = args
            .template_path
            .clone()
            .unwrap_or_else(|| self.paths.template.clone());
        let output = args
            .output_path
            .clone()
            .or_else(|| state.working_html.clone())
            .unwrap_or_else(|| self.paths.working_html());

        state.fills += 1;
        match self.renderer.fill_html(&template, &output, &args.fields).await {
            Ok(artifact) => {
                if kind == FillKind::Correction {
                    state.corrections += 1;
                }
                state.html_ready = true;
                state.awaiting_correction = false;
                state.last_error = None;
                state.working_html = Some(artifact.path.clone());
                info!(html = %artifact.path.display(), ?kind, "Working HTML written");
                ToolOutcome::success(json!({
                    "ok": true,
                    "html_path": display(&artifact.path),
                    "fills": state.fills,
                }))
            }
            Err(e) => self.render_failure(state, e.to_string()),
        }
    }

    async fn preview(
        &self,
        args: &PreviewArgs,
        state: &mut AgentState,
        uploads: &mut UploadRegistry,
    ) -> ToolOutcome {
        if let Err(violation) = self.policy.check_preview(state) {
            return ToolOutcome::rejected(violation);
        }
        let html = self.html_source(args.html_path.as_ref(), state);
        let image = args.image_path.clone().unwrap_or_else(|| {
            html.parent()
                .unwrap_or_else(|| Path::new("."))
                .join(PREVIEW_IMAGE)
        });
        let viewport = Viewport::from_parts(args.width, args.height);

        let artifact = match self.renderer.snapshot(&html, &image, viewport).await {
            Ok(artifact) => artifact,
            Err(e) => return self.render_failure(state, e.to_string()),
        };

        state.previews += 1;
        state.awaiting_correction = true;
        state.last_error = None;
        info!(image = %artifact.path.display(), previews = state.previews, "Preview captured");

        let image_part = self.image_part(&artifact, uploads).await;
        let result = json!({
            "ok": true,
            "image_path": display(&artifact.path),
            "previews": state.previews,
        });
        let record = json!({
            "ok": true,
            "image_path": display(&artifact.path),
            "image_bytes": artifact.bytes.len(),
        });

        ToolOutcome {
            ok: true,
            result,
            record,
            extra_messages: vec![InputItem::user_parts(vec![
                ContentPart::InputText {
                    text: prompts::preview_review(&artifact.path),
                },
                image_part,
            ])],
            continue_loop: true,
            exit_loop: false,
            note: None,
        }
    }

    /// Uploaded by id when configured (falling back to inline on failure),
    /// otherwise inlined as a base64 data URL.
    async fn image_part(&self, artifact: &RenderedArtifact, uploads: &mut UploadRegistry) -> ContentPart {
        if self.upload_previews {
            match uploads.upload(&artifact.path, FilePurpose::Vision).await {
                Ok(file_id) => {
                    return ContentPart::InputImage {
                        image_url: None,
                        file_id: Some(file_id),
                        detail: "auto",
                    };
                }
                Err(e) => warn!("Preview upload failed, inlining instead: {e}"),
            }
        }
        ContentPart::InputImage {
            image_url: Some(format!(
                "data:image/png;base64,{}",
                STANDARD.encode(&artifact.bytes)
            )),
            file_id: None,
            detail: "auto",
        }
    }

    async fn export(&self, args: &ExportArgs, state: &mut AgentState) -> ToolOutcome {
        if let Err(violation) = self.policy.check_export(state) {
            return ToolOutcome::rejected(violation);
        }
        let html = self.html_source(args.html_path.as_ref(), state);
        let output = match (&args.output_path, args.format) {
            (Some(path), _) => path.clone(),
            (None, ExportFormat::Doc) => self.paths.output.with_extension("doc"),
            (None, ExportFormat::Pdf) => self.paths.output.clone(),
        };

        let exported = match args.format {
            ExportFormat::Pdf => self.renderer.export_pdf(&html, &output).await,
            ExportFormat::Doc => self.renderer.export_doc(&html, &output).await,
        };
        match exported {
            Ok(artifact) => {
                info!(output = %artifact.path.display(), format = ?args.format, "Final document exported");
                state.export_succeeded = true;
                state.last_error = None;
                state.final_message = format!("Document exported to {}", artifact.path.display());
                state.output_path = artifact.path.clone();
                let mut outcome = ToolOutcome::success(json!({
                    "ok": true,
                    "output_path": display(&artifact.path),
                }));
                outcome.exit_loop = true;
                outcome
            }
            Err(e) => self.render_failure(state, e.to_string()),
        }
    }

    fn html_source(&self, explicit: Option<&PathBuf>, state: &AgentState) -> PathBuf {
        explicit
            .cloned()
            .or_else(|| state.working_html.clone())
            .unwrap_or_else(|| self.paths.working_html())
    }

    fn render_failure(&self, state: &mut AgentState, message: String) -> ToolOutcome {
        warn!("Tool execution failed: {message}");
        state.last_error = Some(message.clone());
        ToolOutcome::failure(message)
    }
}
