use super::controller::{AgentSettings, CvAgent, RunReport, RunRequest};
use super::policy::Profile;
use super::tools::{EXPORT_TOOL, FILL_DOCX_TOOL, FILL_HTML_TOOL, PREVIEW_TOOL};
use crate::config::AttachmentMode;
use crate::conversation::{InputItem, TokenBudget};
use crate::errors::AgentError;
use crate::llm_client::{
    FilePurpose, LlmError, LlmTransport, ModelResponse, ResponseRequest, ToolChoice,
};
use crate::render::{BrowserEngine, RenderError, Viewport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

enum Step {
    Reply(Value),
    Fail,
    Hang,
}

/// Replays a fixed script for agent turns. Insight calls are recognised by
/// their empty tool list and answered separately.
struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    insight: Option<Value>,
    requests: Mutex<Vec<ResponseRequest>>,
    insight_calls: Mutex<usize>,
    uploads: Mutex<Vec<(PathBuf, FilePurpose)>>,
    deletes: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            insight: None,
            requests: Mutex::new(Vec::new()),
            insight_calls: Mutex::new(0),
            uploads: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
        }
    }

    fn with_insight(mut self, reply: Value) -> Self {
        self.insight = Some(reply);
        self
    }

    async fn requests(&self) -> Vec<ResponseRequest> {
        self.requests.lock().await.clone()
    }

    async fn deletes(&self) -> Vec<String> {
        self.deletes.lock().await.clone()
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn create_response(&self, request: &ResponseRequest) -> Result<ModelResponse, LlmError> {
        if request.tools.is_empty() {
            *self.insight_calls.lock().await += 1;
            return match &self.insight {
                Some(reply) => ModelResponse::from_raw(reply.clone()),
                None => Err(LlmError::Api {
                    status: 503,
                    message: "insight model unavailable".to_string(),
                }),
            };
        }

        self.requests.lock().await.push(request.clone());
        let step = self.steps.lock().await.pop_front();
        match step {
            Some(Step::Reply(raw)) => ModelResponse::from_raw(raw),
            Some(Step::Fail) => Err(LlmError::Api {
                status: 401,
                message: "invalid api key".to_string(),
            }),
            Some(Step::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => ModelResponse::from_raw(text_reply("resp_extra", "Nothing left to do.")),
        }
    }

    async fn upload_file(&self, path: &Path, purpose: FilePurpose) -> Result<String, LlmError> {
        let mut uploads = self.uploads.lock().await;
        uploads.push((path.to_path_buf(), purpose));
        Ok(format!("file_{}", uploads.len()))
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), LlmError> {
        self.deletes.lock().await.push(file_id.to_string());
        Ok(())
    }
}

struct FakeBrowser;

#[async_trait]
impl BrowserEngine for FakeBrowser {
    async fn print_pdf(&self, _html: &Path, pdf: &Path) -> Result<(), RenderError> {
        tokio::fs::write(pdf, b"%PDF-1.4 fake")
            .await
            .map_err(|e| RenderError::io(pdf, e))
    }

    async fn screenshot(
        &self,
        _html: &Path,
        image: &Path,
        _viewport: Viewport,
    ) -> Result<(), RenderError> {
        tokio::fs::write(image, b"\x89PNG\r\n")
            .await
            .map_err(|e| RenderError::io(image, e))
    }
}

fn call(call_id: &str, name: &str, arguments: Value) -> Value {
    json!({
        "type": "function_call",
        "call_id": call_id,
        "name": name,
        "arguments": arguments.to_string(),
    })
}

fn tool_reply(id: &str, calls: Vec<Value>) -> Step {
    Step::Reply(json!({ "id": id, "output": calls }))
}

fn text_reply(id: &str, text: &str) -> Value {
    json!({
        "id": id,
        "output": [{
            "type": "message",
            "role": "assistant",
            "content": [{ "type": "output_text", "text": text }]
        }]
    })
}

fn transcript(request: &ResponseRequest) -> String {
    serde_json::to_string(&request.input).unwrap()
}

struct Fixture {
    dir: TempDir,
    cv: PathBuf,
    template: PathBuf,
    output: PathBuf,
}

impl Fixture {
    fn request(&self) -> RunRequest {
        RunRequest {
            cv_path: self.cv.clone(),
            template_path: self.template.clone(),
            output_path: self.output.clone(),
        }
    }
}

async fn html_fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let cv = dir.path().join("cv.pdf");
    tokio::fs::write(&cv, b"%PDF-1.4 resume").await.unwrap();
    let template = dir.path().join("template.html");
    tokio::fs::write(&template, "<html><head></head><body><h1>__NAME__</h1><p>__SUMMARY__</p></body></html>")
        .await
        .unwrap();
    let output = dir.path().join("out/cv.pdf");
    Fixture {
        dir,
        cv,
        template,
        output,
    }
}

fn docx_bytes(paragraph_text: &str) -> Vec<u8> {
    use zip::write::SimpleFileOptions;

    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body><w:p><w:r><w:t>{paragraph_text}</w:t></w:r></w:p></w:body></w:document>"
    );
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    writer.start_file("[Content_Types].xml", options).unwrap();
    writer.write_all(b"<Types/>").unwrap();
    writer.start_file("word/document.xml", options).unwrap();
    writer.write_all(document.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

fn settings(profile: Profile, max_turns: usize) -> AgentSettings {
    AgentSettings {
        model: "main-model".to_string(),
        max_turns,
        max_output_tokens: 4096,
        budget: TokenBudget::new(200_000, 0.6),
        profile,
        attachment: AttachmentMode::Upload,
        upload_previews: false,
        insights_enabled: false,
        insight_model: None,
    }
}

async fn run(
    transport: &Arc<ScriptedTransport>,
    settings: AgentSettings,
    request: RunRequest,
) -> Result<RunReport, AgentError> {
    CvAgent::new(transport.clone(), Arc::new(FakeBrowser), settings)
        .run(request, CancellationToken::new())
        .await
}

#[tokio::test]
async fn test_html_fill_then_export_succeeds() {
    let fx = html_fixture().await;
    let transport = Arc::new(
        ScriptedTransport::new(vec![
            tool_reply(
                "resp_1",
                vec![call(
                    "c1",
                    FILL_HTML_TOOL,
                    json!({"fields": {"NAME": "Ada Lovelace", "SUMMARY": "Analyst"}}),
                )],
            ),
            tool_reply("resp_2", vec![call("c2", EXPORT_TOOL, json!({}))]),
        ])
        .with_insight(json!({"id": "ins_1", "output_text": "Fill done. Export next."})),
    );
    let mut settings = settings(Profile::Permissive, 5);
    settings.insights_enabled = true;

    let report = run(&transport, settings, fx.request()).await.unwrap();

    assert_eq!(report.output_path, fx.output);
    assert_eq!(report.turns, 2);
    assert!(report.state.export_succeeded);
    assert!(report.final_message.contains("cv.pdf"));
    assert_eq!(tokio::fs::read(&fx.output).await.unwrap(), b"%PDF-1.4 fake");

    let requests = transport.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].previous_response_id, None);
    assert_eq!(requests[1].previous_response_id.as_deref(), Some("resp_1"));
    assert_eq!(requests[0].model, "main-model");
    assert_eq!(requests[0].tools.len(), 3);
    assert!(transcript(&requests[1]).contains("Iteration insight: Fill done. Export next."));
    assert_eq!(*transport.insight_calls.lock().await, 1);

    let uploads = transport.uploads.lock().await.clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].1, FilePurpose::UserData);
    assert_eq!(transport.deletes().await, vec!["file_1".to_string()]);

    let working_html = report.state.working_html.unwrap();
    assert!(!working_html.exists(), "working directory is removed after the run");
}

#[tokio::test]
async fn test_docx_fill_finishes_in_one_turn() {
    let dir = tempfile::tempdir().unwrap();
    let cv = dir.path().join("cv.pdf");
    tokio::fs::write(&cv, b"%PDF-1.4 resume").await.unwrap();
    let template = dir.path().join("template.docx");
    tokio::fs::write(&template, docx_bytes("{NAME} - {ROLE}")).await.unwrap();
    let output = dir.path().join("out/cv.docx");

    let transport = Arc::new(ScriptedTransport::new(vec![tool_reply(
        "resp_1",
        vec![call(
            "c1",
            FILL_DOCX_TOOL,
            json!({"fields": {"NAME": "Ada", "ROLE": "Engineer"}}),
        )],
    )]));
    let request = RunRequest {
        cv_path: cv,
        template_path: template,
        output_path: output.clone(),
    };

    let report = run(&transport, settings(Profile::Strict, 3), request).await.unwrap();
    assert_eq!(report.turns, 1);
    assert_eq!(report.output_path, output);

    let requests = transport.requests().await;
    assert_eq!(requests[0].tool_choice, Some(ToolChoice::Auto));
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, FILL_DOCX_TOOL);

    let bytes = tokio::fs::read(&output).await.unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .unwrap()
        .read_to_string(&mut xml)
        .unwrap();
    assert!(xml.contains("Ada - Engineer"));
}

#[tokio::test]
async fn test_no_tool_calls_reminds_and_fails_without_output() {
    let fx = html_fixture().await;
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::Reply(text_reply("resp_1", "Here is your résumé.")),
        Step::Reply(text_reply("resp_2", "All done.")),
    ]));

    let err = run(&transport, settings(Profile::Review, 2), fx.request())
        .await
        .unwrap_err();

    match err {
        AgentError::OutputMissing { path, last_error } => {
            assert_eq!(path, fx.output);
            assert_eq!(last_error, None);
        }
        other => panic!("unexpected error: {other}"),
    }

    let requests = transport.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(!transcript(&requests[0]).contains("Remember to call"));
    assert!(transcript(&requests[1]).contains("Remember to call fill_template_html"));
    assert_eq!(transport.deletes().await, vec!["file_1".to_string()]);
}

#[tokio::test]
async fn test_existing_output_without_export_is_incomplete() {
    let fx = html_fixture().await;
    tokio::fs::create_dir_all(fx.output.parent().unwrap()).await.unwrap();
    tokio::fs::write(&fx.output, b"stale").await.unwrap();
    let transport = Arc::new(ScriptedTransport::new(vec![Step::Reply(text_reply(
        "resp_1", "Done.",
    ))]));

    let err = run(&transport, settings(Profile::Review, 1), fx.request())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::ExportIncomplete(_)), "{err}");
}

#[tokio::test]
async fn test_second_preview_rejected_then_export() {
    let fx = html_fixture().await;
    let transport = Arc::new(ScriptedTransport::new(vec![
        tool_reply(
            "resp_1",
            vec![call("c1", FILL_HTML_TOOL, json!({"fields": {"NAME": "Ada"}}))],
        ),
        tool_reply("resp_2", vec![call("c2", PREVIEW_TOOL, json!({}))]),
        tool_reply("resp_3", vec![call("c3", PREVIEW_TOOL, json!({}))]),
        tool_reply("resp_4", vec![call("c4", EXPORT_TOOL, json!({}))]),
    ]));

    let report = run(&transport, settings(Profile::Review, 6), fx.request())
        .await
        .unwrap();

    assert_eq!(report.turns, 4);
    assert_eq!(report.state.previews, 1);
    assert!(report.state.export_succeeded);

    let requests = transport.requests().await;
    assert!(transcript(&requests[2]).contains("data:image/png;base64,"));
    assert!(transcript(&requests[3]).contains("Preview limit reached (1)"));
}

#[tokio::test]
async fn test_export_before_preview_is_rejected() {
    let fx = html_fixture().await;
    let transport = Arc::new(ScriptedTransport::new(vec![
        tool_reply(
            "resp_1",
            vec![call("c1", FILL_HTML_TOOL, json!({"fields": {"NAME": "Ada"}}))],
        ),
        tool_reply("resp_2", vec![call("c2", EXPORT_TOOL, json!({}))]),
        Step::Reply(text_reply("resp_3", "Giving up.")),
    ]));

    let err = run(&transport, settings(Profile::Review, 3), fx.request())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::OutputMissing { .. }), "{err}");
    assert!(!fx.output.exists());

    let requests = transport.requests().await;
    assert_eq!(requests.len(), 3);
    assert!(transcript(&requests[2]).contains("Call preview_snapshot and review the result before exporting."));
}

#[tokio::test]
async fn test_strict_profile_forces_tool_order() {
    let fx = html_fixture().await;
    let transport = Arc::new(ScriptedTransport::new(vec![
        tool_reply(
            "resp_1",
            vec![call("c1", FILL_HTML_TOOL, json!({"fields": {"NAME": "Ada"}}))],
        ),
        tool_reply("resp_2", vec![call("c2", PREVIEW_TOOL, json!({}))]),
        tool_reply(
            "resp_3",
            vec![call("c3", FILL_HTML_TOOL, json!({"fields": {"NAME": "Ada L."}}))],
        ),
        tool_reply("resp_4", vec![call("c4", EXPORT_TOOL, json!({}))]),
    ]));

    let report = run(&transport, settings(Profile::Strict, 6), fx.request())
        .await
        .unwrap();
    assert_eq!(report.state.corrections, 1);
    assert_eq!(report.state.previews, 1);

    let forced: Vec<Option<ToolChoice>> = transport
        .requests()
        .await
        .into_iter()
        .map(|request| request.tool_choice)
        .collect();
    assert_eq!(
        forced,
        vec![
            Some(ToolChoice::Function(FILL_HTML_TOOL.to_string())),
            Some(ToolChoice::Function(PREVIEW_TOOL.to_string())),
            Some(ToolChoice::Function(FILL_HTML_TOOL.to_string())),
            Some(ToolChoice::Function(EXPORT_TOOL.to_string())),
        ]
    );
}

#[tokio::test]
async fn test_every_call_gets_exactly_one_output() {
    let fx = html_fixture().await;
    let transport = Arc::new(ScriptedTransport::new(vec![
        tool_reply(
            "resp_1",
            vec![
                json!({
                    "type": "function_call",
                    "call_id": "c1",
                    "name": FILL_HTML_TOOL,
                    "arguments": "{\"fields\": ",
                }),
                call("c2", "shell_exec", json!({"cmd": "ls"})),
            ],
        ),
        tool_reply("resp_2", vec![call("c3", EXPORT_TOOL, json!({}))]),
    ]));

    let report = run(&transport, settings(Profile::Permissive, 4), fx.request())
        .await
        .unwrap();
    assert_eq!(report.turns, 2);

    let requests = transport.requests().await;
    let second = &requests[1];
    for call_id in ["c1", "c2"] {
        let outputs = second
            .input
            .iter()
            .filter(|item| item.is_tool_output_for(call_id))
            .count();
        assert_eq!(outputs, 1, "{call_id}");
    }
    let text = transcript(second);
    assert!(text.contains("Unknown tool: shell_exec"));
    assert!(text.contains("arguments were ignored"));
}

#[tokio::test]
async fn test_transport_failure_is_fatal_and_cleans_up_once() {
    let fx = html_fixture().await;
    let transport = Arc::new(ScriptedTransport::new(vec![Step::Fail]));

    let err = run(&transport, settings(Profile::Review, 3), fx.request())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Transport(LlmError::Api { status: 401, .. })));
    assert_eq!(transport.requests().await.len(), 1);
    assert_eq!(transport.deletes().await, vec!["file_1".to_string()]);
}

#[tokio::test]
async fn test_cancellation_interrupts_model_call() {
    let fx = html_fixture().await;
    let transport = Arc::new(ScriptedTransport::new(vec![Step::Hang]));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let agent = CvAgent::new(
        transport.clone(),
        Arc::new(FakeBrowser),
        settings(Profile::Review, 3),
    );
    let err = agent.run(fx.request(), cancel).await.unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
    assert_eq!(transport.deletes().await, vec!["file_1".to_string()]);
}

#[tokio::test]
async fn test_dropped_run_still_deletes_uploaded_source() {
    let fx = html_fixture().await;
    let transport = Arc::new(ScriptedTransport::new(vec![Step::Hang]));
    let agent = CvAgent::new(
        transport.clone(),
        Arc::new(FakeBrowser),
        settings(Profile::Review, 3),
    );

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        agent.run(fx.request(), CancellationToken::new()),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(transport.uploads.lock().await.len(), 1);

    let mut deletes = Vec::new();
    for _ in 0..50 {
        deletes = transport.deletes().await;
        if !deletes.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(deletes, vec!["file_1".to_string()]);
}

#[tokio::test]
async fn test_insight_failure_does_not_stop_the_run() {
    let fx = html_fixture().await;
    let transport = Arc::new(ScriptedTransport::new(vec![
        tool_reply(
            "resp_1",
            vec![call("c1", FILL_HTML_TOOL, json!({"fields": {"NAME": "Ada"}}))],
        ),
        tool_reply("resp_2", vec![call("c2", EXPORT_TOOL, json!({}))]),
    ]));
    let mut settings = settings(Profile::Permissive, 4);
    settings.insights_enabled = true;

    let report = run(&transport, settings, fx.request()).await.unwrap();
    assert!(report.state.export_succeeded);
    assert_eq!(*transport.insight_calls.lock().await, 1);

    let requests = transport.requests().await;
    assert!(!transcript(&requests[1]).contains("Iteration insight"));
}

#[tokio::test]
async fn test_preflight_errors_happen_before_any_upload() {
    let fx = html_fixture().await;
    let transport = Arc::new(ScriptedTransport::new(Vec::new()));

    let mut missing_cv = fx.request();
    missing_cv.cv_path = fx.dir.path().join("nope.pdf");
    let err = run(&transport, settings(Profile::Review, 1), missing_cv)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::SourceUnreadable { .. }), "{err}");

    let txt = fx.dir.path().join("template.txt");
    tokio::fs::write(&txt, "plain").await.unwrap();
    let mut unsupported = fx.request();
    unsupported.template_path = txt;
    let err = run(&transport, settings(Profile::Review, 1), unsupported)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::UnsupportedTemplate(_)), "{err}");

    assert!(transport.uploads.lock().await.is_empty());
    assert!(transport.requests().await.is_empty());
}

#[tokio::test]
async fn test_system_prefix_survives_every_turn() {
    let fx = html_fixture().await;
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::Reply(text_reply("resp_1", "Thinking.")),
        Step::Reply(text_reply("resp_2", "Still thinking.")),
    ]));
    let mut settings = settings(Profile::Review, 2);
    settings.budget = TokenBudget::new(10, 0.5);

    let _ = run(&transport, settings, fx.request()).await;

    for request in transport.requests().await {
        assert!(matches!(request.input[0], InputItem::Message { .. }));
        assert!(transcript(&request).contains("CV Builder"));
        assert!(transcript(&request).contains("file_1"));
    }
}
