//! Agent turn-loop controller.
//!
//! One run: preflight the inputs, attach the résumé, then alternate between
//! awaiting the model and dispatching its tool calls until the export
//! succeeds, a handler signals exit, or the turn budget runs out. Remote
//! uploads are released on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{AttachmentMode, Config};
use crate::conversation::{ContentPart, Conversation, InputItem, TokenBudget};
use crate::errors::AgentError;
use crate::llm_client::prompts::tool_reminder;
use crate::llm_client::{
    FilePurpose, LlmTransport, ModelResponse, Reasoning, ResponseRequest, ToolChoice,
    ToolDefinition,
};
use crate::pdf;
use crate::render::{BrowserEngine, Renderer, TemplateFamily};

use super::dispatch::{RunPaths, ToolDispatcher};
use super::insight::{InsightGenerator, INSIGHT_WINDOW};
use super::policy::{Profile, UsagePolicy};
use super::prompts;
use super::state::{AgentState, History, IterationSummary, ToolCallSummary};
use super::tools::{self, ToolInvocation};
use super::uploads::UploadRegistry;

/// Everything a run needs besides its inputs.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub max_turns: usize,
    pub max_output_tokens: u32,
    pub budget: TokenBudget,
    pub profile: Profile,
    pub attachment: AttachmentMode,
    pub upload_previews: bool,
    pub insights_enabled: bool,
    pub insight_model: Option<String>,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model.clone(),
            max_turns: config.max_turns,
            max_output_tokens: config.max_output_tokens,
            budget: TokenBudget::new(config.context_tokens, config.reserve_ratio),
            profile: config.profile,
            attachment: config.attachment,
            upload_previews: config.upload_previews,
            insights_enabled: config.insights_enabled,
            insight_model: config.insight_model.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub cv_path: PathBuf,
    pub template_path: PathBuf,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub output_path: PathBuf,
    pub final_message: String,
    pub turns: usize,
    pub state: AgentState,
}

/// Loop state between turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    AwaitingModel,
    DispatchingTools,
    TerminatedSuccess,
    TerminatedFailure,
}

/// How a single turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnOutcome {
    /// The model called no tool; a reminder was appended.
    NoToolCalls,
    /// Calls dispatched; run the end-of-turn insight and terminal checks.
    Dispatched,
    /// A handler asked to show the model something before it acts again.
    ContinueImmediately,
    /// A handler signalled exit.
    Exit,
}

struct RunContext {
    cv: PathBuf,
    family: TemplateFamily,
    paths: RunPaths,
}

/// Mutable per-run loop data, threaded through each turn.
struct Session {
    conversation: Conversation,
    state: AgentState,
    history: History,
    previous_response_id: Option<String>,
}

pub struct CvAgent {
    transport: Arc<dyn LlmTransport>,
    browser: Arc<dyn BrowserEngine>,
    settings: AgentSettings,
}

impl CvAgent {
    pub fn new(
        transport: Arc<dyn LlmTransport>,
        browser: Arc<dyn BrowserEngine>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            transport,
            browser,
            settings,
        }
    }

    pub async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunReport, AgentError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        self.run_inner(request, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunReport, AgentError> {
        let cv = preflight(&request.cv_path)
            .await
            .map_err(|source| AgentError::SourceUnreadable {
                path: request.cv_path.clone(),
                source,
            })?;
        let template = preflight(&request.template_path)
            .await
            .map_err(|source| AgentError::TemplateUnreadable {
                path: request.template_path.clone(),
                source,
            })?;
        let family = TemplateFamily::detect(&template)
            .ok_or_else(|| AgentError::UnsupportedTemplate(template.clone()))?;
        let output = std::path::absolute(&request.output_path).map_err(AgentError::Workspace)?;

        let work_dir = tempfile::Builder::new()
            .prefix("cv-agent-")
            .tempdir()
            .map_err(AgentError::Workspace)?;

        info!(
            cv = %cv.display(),
            template = %template.display(),
            output = %output.display(),
            ?family,
            profile = %self.settings.profile,
            model = %self.settings.model,
            "Starting run"
        );

        let context = RunContext {
            cv,
            family,
            paths: RunPaths {
                template,
                output,
                work_dir: work_dir.path().to_path_buf(),
            },
        };

        let mut uploads = UploadRegistry::new(self.transport.clone());
        let result = self.drive(&context, &mut uploads, &cancel).await;
        let released = uploads.release().await;
        debug!(released, "Remote uploads released");

        if let Err(e) = work_dir.close() {
            warn!("Could not remove working directory: {e}");
        }
        result
    }

    async fn drive(
        &self,
        context: &RunContext,
        uploads: &mut UploadRegistry,
        cancel: &CancellationToken,
    ) -> Result<RunReport, AgentError> {
        let policy = UsagePolicy::for_profile(self.settings.profile);
        let attachment = self.attachment_message(&context.cv, uploads, cancel).await?;

        let system_prompt = match context.family {
            TemplateFamily::Docx => prompts::docx_system_prompt(),
            TemplateFamily::Html => prompts::html_system_prompt(&policy),
        };
        let working_html =
            (context.family == TemplateFamily::Html).then(|| context.paths.working_html());
        let mut session = Session {
            conversation: Conversation::new(vec![
                InputItem::system(system_prompt),
                InputItem::system(prompts::suggested_paths(
                    &context.paths.template,
                    &context.paths.output,
                    working_html.as_deref(),
                )),
                attachment,
            ]),
            state: AgentState::new(context.paths.output.clone()),
            history: History::new(INSIGHT_WINDOW),
            previous_response_id: None,
        };

        let tools = tools::catalog(context.family);
        let dispatcher = ToolDispatcher::new(
            context.family,
            Renderer::new(self.browser.clone()),
            policy,
            context.paths.clone(),
            self.settings.upload_previews,
        );
        let insights = self.settings.insights_enabled.then(|| {
            let model = self
                .settings
                .insight_model
                .clone()
                .unwrap_or_else(|| self.settings.model.clone());
            InsightGenerator::new(self.transport.clone(), model)
        });

        let mut loop_state = LoopState::AwaitingModel;
        let mut turns = 0;
        while turns < self.settings.max_turns {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            turns += 1;

            let outcome = self
                .run_turn(
                    turns,
                    context.family,
                    &policy,
                    &tools,
                    &dispatcher,
                    &mut session,
                    uploads,
                    cancel,
                )
                .await?;

            loop_state = match outcome {
                TurnOutcome::NoToolCalls | TurnOutcome::ContinueImmediately => {
                    LoopState::AwaitingModel
                }
                TurnOutcome::Exit => LoopState::TerminatedSuccess,
                TurnOutcome::Dispatched if session.state.export_succeeded => {
                    LoopState::TerminatedSuccess
                }
                TurnOutcome::Dispatched => {
                    if let Some(generator) = &insights {
                        inject_insight(generator, &mut session, cancel).await;
                    }
                    LoopState::AwaitingModel
                }
            };
            debug!(turn = turns, ?outcome, ?loop_state, "Turn finished");
            if loop_state == LoopState::TerminatedSuccess {
                break;
            }
        }

        if loop_state != LoopState::TerminatedSuccess {
            loop_state = LoopState::TerminatedFailure;
            warn!(turns, ?loop_state, "Turn budget exhausted without a finished export");
        }
        finish(session.state, turns).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_turn(
        &self,
        turn: usize,
        family: TemplateFamily,
        policy: &UsagePolicy,
        tools: &[ToolDefinition],
        dispatcher: &ToolDispatcher,
        session: &mut Session,
        uploads: &mut UploadRegistry,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let trim = session.conversation.trim_to_budget(&self.settings.budget);
        if trim.removed > 0 {
            debug!(
                turn,
                removed = trim.removed,
                tokens = trim.tokens,
                protected = session.conversation.protected_len(),
                "Trimmed conversation"
            );
        }

        let tool_choice = match (family, policy.next_tool(&session.state)) {
            (TemplateFamily::Html, Some(tool)) => ToolChoice::Function(tool.to_string()),
            _ => ToolChoice::Auto,
        };
        let request = ResponseRequest {
            model: self.settings.model.clone(),
            input: session.conversation.items().to_vec(),
            tools: tools.to_vec(),
            tool_choice: Some(tool_choice),
            max_output_tokens: self.settings.max_output_tokens,
            reasoning: Some(Reasoning {
                effort: "medium",
                summary: "auto",
            }),
            previous_response_id: session.previous_response_id.clone(),
        };

        debug!(
            turn,
            items = session.conversation.len(),
            tokens = session.conversation.estimated_tokens(),
            "Awaiting model"
        );
        let response = self.create_response(&request, cancel).await?;
        debug!(turn, response = %response.raw, "Model response");
        session.previous_response_id = Some(response.id.clone());

        let calls = response.tool_calls();
        if calls.is_empty() {
            info!(turn, "No tool calls received");
            session
                .conversation
                .push(InputItem::system(tool_reminder(tools::primary_tool(family))));
            session.history.push(IterationSummary::new(
                turn,
                Vec::new(),
                &session.state,
                Some("no tool calls".to_string()),
            ));
            let text = response.text();
            if !text.is_empty() {
                debug!(turn, text = %text, "Assistant text without tool calls");
            }
            return Ok(TurnOutcome::NoToolCalls);
        }

        info!(
            turn,
            calls = calls.len(),
            state = ?LoopState::DispatchingTools,
            "Model requested tool calls"
        );
        let mut summaries = Vec::with_capacity(calls.len());
        let mut notes = Vec::new();
        let mut continue_now = false;
        let mut exit = false;

        for call in &calls {
            let invocation = ToolInvocation::from_request(call);
            info!(turn, tool = %invocation.tool_name(), call_id = %call.call_id, "Executing tool");
            let outcome = dispatcher
                .dispatch(&invocation, &mut session.state, uploads)
                .await;

            session
                .conversation
                .push(InputItem::tool_output(&call.call_id, &outcome.result));
            summaries.push(ToolCallSummary {
                name: invocation.tool_name().to_string(),
                ok: outcome.ok,
                error: outcome.error().map(str::to_string),
            });
            if let Some(note) = &outcome.note {
                notes.push(note.clone());
            }
            continue_now |= outcome.continue_loop;
            let exit_loop = outcome.exit_loop;
            session.conversation.extend(outcome.extra_messages);

            if exit_loop {
                exit = true;
                break;
            }
        }

        let note = (!notes.is_empty()).then(|| notes.join("; "));
        session
            .history
            .push(IterationSummary::new(turn, summaries, &session.state, note));

        Ok(if exit {
            TurnOutcome::Exit
        } else if continue_now {
            TurnOutcome::ContinueImmediately
        } else {
            TurnOutcome::Dispatched
        })
    }

    async fn create_response(
        &self,
        request: &ResponseRequest,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, AgentError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            response = self.transport.create_response(request) => Ok(response?),
        }
    }

    /// The user turn carrying the résumé: a remote file reference, or the
    /// locally extracted text.
    async fn attachment_message(
        &self,
        cv: &Path,
        uploads: &mut UploadRegistry,
        cancel: &CancellationToken,
    ) -> Result<InputItem, AgentError> {
        match self.settings.attachment {
            AttachmentMode::Upload => {
                let file_id = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    uploaded = uploads.upload(cv, FilePurpose::UserData) => uploaded?,
                };
                info!(file_id = %file_id, "Uploaded source PDF");
                Ok(InputItem::user_parts(vec![
                    ContentPart::InputText {
                        text: prompts::ATTACHMENT_UPLOADED.to_string(),
                    },
                    ContentPart::InputFile { file_id },
                ]))
            }
            AttachmentMode::Inline => {
                let text = pdf::read_pdf_text(cv).await?;
                info!(chars = text.len(), "Extracted source PDF text");
                Ok(InputItem::user(prompts::attachment_inline(&text)))
            }
        }
    }
}

/// Canonical absolute path of a readable input file.
async fn preflight(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = tokio::fs::canonicalize(path).await?;
    tokio::fs::File::open(&absolute).await?;
    Ok(absolute)
}

/// Advisory only: failures are logged and the run continues.
async fn inject_insight(
    generator: &InsightGenerator,
    session: &mut Session,
    cancel: &CancellationToken,
) {
    if session.history.is_empty() {
        return;
    }
    debug!(records = session.history.len(), "Requesting iteration insight");
    let recent = session.history.recent();
    let generated = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        generated = generator.generate(&recent) => generated,
    };
    match generated {
        Ok(Some(insight)) => {
            info!(insight = %insight, "Iteration insight");
            session
                .conversation
                .push(InputItem::system(prompts::insight_message(&insight)));
        }
        Ok(None) => {}
        Err(e) => warn!("Iteration insight failed: {e}"),
    }
}

async fn finish(state: AgentState, turns: usize) -> Result<RunReport, AgentError> {
    let exists = tokio::fs::try_exists(&state.output_path)
        .await
        .unwrap_or(false);
    if !exists {
        return Err(AgentError::OutputMissing {
            path: state.output_path.clone(),
            last_error: state.last_error.clone(),
        });
    }
    if !state.export_succeeded {
        return Err(AgentError::ExportIncomplete(
            state
                .last_error
                .clone()
                .unwrap_or_else(|| "the final export never succeeded".to_string()),
        ));
    }

    let final_message = if state.final_message.is_empty() {
        format!("Document generated at {}", state.output_path.display())
    } else {
        state.final_message.clone()
    };
    info!(output = %state.output_path.display(), turns, "Run finished");
    Ok(RunReport {
        output_path: state.output_path.clone(),
        final_message,
        turns,
        state,
    })
}
