//! Tool catalog (what the model is told it may call) and the typed argument
//! shapes each call is decoded into before dispatch.

use std::path::PathBuf;

use serde_json::{json, Map, Value};

use crate::llm_client::{ToolCallRequest, ToolDefinition};
use crate::render::TemplateFamily;

pub const FILL_DOCX_TOOL: &str = "fill_docx_template";
pub const FILL_HTML_TOOL: &str = "fill_template_html";
pub const PREVIEW_TOOL: &str = "preview_snapshot";
pub const EXPORT_TOOL: &str = "export_pdf";

const FILL_OUTPUT_KEYS: [&str; 3] = ["output_docx_path", "output_html_path", "output_path"];
const EXPORT_OUTPUT_KEYS: [&str; 3] = ["output_pdf_path", "output_doc_path", "output_path"];

// ────────────────────────────────────────────────────────────────────────────
// Catalog
// ────────────────────────────────────────────────────────────────────────────

fn fields_schema() -> Value {
    json!({
        "type": "object",
        "description": "Values keyed by template placeholder name. Example: {\"SUMMARY\": \"...\", \"SKILLS\": \"A, B\", \"EXPERIENCE\": [...]}",
        "properties": {
            "NAME": { "type": "string" },
            "ROLE": { "type": "string" },
            "SUMMARY": { "type": "string" },
            "SKILLS": { "type": "string" },
            "LANGUAGES_LINES": { "type": "string" },
            "INDUSTRIES_LINES": { "type": "string" },
            "EDUCATION": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "institution": { "type": "string" },
                        "degree": { "type": "string" },
                        "period": { "type": "string" }
                    },
                    "required": ["institution", "degree", "period"]
                }
            },
            "EXPERIENCE": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "role": { "type": "string" },
                        "company": { "type": "string" },
                        "period": { "type": "string" },
                        "location": { "type": "string" },
                        "summary": { "type": "string" },
                        "tech": { "type": "string" },
                        "bullets": { "type": "array", "items": { "type": "string" } },
                        "bullets_lines": { "type": "string" }
                    },
                    "required": ["role", "company", "period", "location", "summary", "tech", "bullets"]
                }
            },
            "EXPERIENCE_LINES": { "type": "string" }
        },
        "required": ["SUMMARY", "SKILLS", "LANGUAGES_LINES", "INDUSTRIES_LINES", "EDUCATION", "EXPERIENCE"]
    })
}

fn fill_docx_definition() -> ToolDefinition {
    ToolDefinition::function(
        FILL_DOCX_TOOL,
        "Fills the DOCX template with the provided fields and writes the resulting document.",
        json!({
            "type": "object",
            "properties": {
                "template_path": { "type": "string", "description": "Path to the DOCX template with placeholders." },
                "output_docx_path": { "type": "string", "description": "Destination path for the generated DOCX." },
                "fields": fields_schema()
            },
            "required": ["fields"]
        }),
    )
}

fn fill_html_definition() -> ToolDefinition {
    ToolDefinition::function(
        FILL_HTML_TOOL,
        "Fills the HTML template with the provided fields and writes the working HTML file.",
        json!({
            "type": "object",
            "properties": {
                "template_path": { "type": "string", "description": "Path to the HTML template with __KEY__ placeholders." },
                "output_html_path": { "type": "string", "description": "Destination path for the working HTML." },
                "fields": fields_schema()
            },
            "required": ["fields"]
        }),
    )
}

fn preview_definition() -> ToolDefinition {
    ToolDefinition::function(
        PREVIEW_TOOL,
        "Renders the working HTML to a PNG so you can review the layout before exporting.",
        json!({
            "type": "object",
            "properties": {
                "html_path": { "type": "string", "description": "Working HTML to capture. Defaults to the last filled HTML." },
                "image_path": { "type": "string", "description": "Where to write the PNG." },
                "width": { "type": "integer", "minimum": 1 },
                "height": { "type": "integer", "minimum": 1 }
            }
        }),
    )
}

fn export_definition() -> ToolDefinition {
    ToolDefinition::function(
        EXPORT_TOOL,
        "Exports the working HTML to the final document (A4 PDF, or an editable .doc).",
        json!({
            "type": "object",
            "properties": {
                "html_path": { "type": "string", "description": "Working HTML to export. Defaults to the last filled HTML." },
                "output_pdf_path": { "type": "string", "description": "Destination path for the final document." },
                "format": { "type": "string", "enum": ["pdf", "doc"] }
            }
        }),
    )
}

/// Tools offered for a template family.
pub fn catalog(family: TemplateFamily) -> Vec<ToolDefinition> {
    match family {
        TemplateFamily::Docx => vec![fill_docx_definition()],
        TemplateFamily::Html => vec![
            fill_html_definition(),
            preview_definition(),
            export_definition(),
        ],
    }
}

/// The fill tool of a family; what the no-tool-call reminder points at.
pub fn primary_tool(family: TemplateFamily) -> &'static str {
    match family {
        TemplateFamily::Docx => FILL_DOCX_TOOL,
        TemplateFamily::Html => FILL_HTML_TOOL,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Typed arguments
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FillArgs {
    pub template_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewArgs {
    pub html_path: Option<PathBuf>,
    pub image_path: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Pdf,
    Doc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportArgs {
    pub html_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub format: ExportFormat,
}

/// One decoded tool call, closed over the known tools.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArgs {
    FillDocx(FillArgs),
    FillHtml(FillArgs),
    Preview(PreviewArgs),
    Export(ExportArgs),
    Unknown { name: String },
}

impl ToolArgs {
    pub fn from_map(name: &str, map: Map<String, Value>) -> Self {
        match name {
            FILL_DOCX_TOOL => ToolArgs::FillDocx(FillArgs::from_map(map)),
            FILL_HTML_TOOL => ToolArgs::FillHtml(FillArgs::from_map(map)),
            PREVIEW_TOOL => ToolArgs::Preview(PreviewArgs::from_map(&map)),
            EXPORT_TOOL => ToolArgs::Export(ExportArgs::from_map(&map)),
            other => ToolArgs::Unknown {
                name: other.to_string(),
            },
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            ToolArgs::FillDocx(_) => FILL_DOCX_TOOL,
            ToolArgs::FillHtml(_) => FILL_HTML_TOOL,
            ToolArgs::Preview(_) => PREVIEW_TOOL,
            ToolArgs::Export(_) => EXPORT_TOOL,
            ToolArgs::Unknown { name } => name,
        }
    }
}

fn path_arg(map: &Map<String, Value>, keys: &[&str]) -> Option<PathBuf> {
    keys.iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

fn dimension_arg(map: &Map<String, Value>, key: &str) -> Option<u32> {
    map.get(key)
        .and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
        .filter(|value| *value > 0)
}

impl FillArgs {
    /// An explicit `fields` object wins over stray top-level keys the model
    /// put beside it; path keys are never treated as fields.
    fn from_map(mut map: Map<String, Value>) -> Self {
        let template_path = path_arg(&map, &["template_path"]);
        let output_path = path_arg(&map, &FILL_OUTPUT_KEYS);

        let explicit = match map.remove("fields") {
            Some(Value::Object(fields)) => fields,
            _ => Map::new(),
        };
        map.remove("template_path");
        for key in FILL_OUTPUT_KEYS {
            map.remove(key);
        }

        let mut fields = map;
        fields.extend(explicit);

        Self {
            template_path,
            output_path,
            fields,
        }
    }
}

impl PreviewArgs {
    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            html_path: path_arg(map, &["html_path"]),
            image_path: path_arg(map, &["image_path"]),
            width: dimension_arg(map, "width"),
            height: dimension_arg(map, "height"),
        }
    }
}

impl ExportArgs {
    fn from_map(map: &Map<String, Value>) -> Self {
        let output_path = path_arg(map, &EXPORT_OUTPUT_KEYS);
        let by_extension = output_path
            .as_ref()
            .and_then(|path| path.extension())
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("doc"));
        let format = match map.get("format").and_then(Value::as_str).map(str::trim) {
            Some(format) if format.eq_ignore_ascii_case("doc") => ExportFormat::Doc,
            Some(format) if format.eq_ignore_ascii_case("pdf") => ExportFormat::Pdf,
            _ if by_extension => ExportFormat::Doc,
            _ => ExportFormat::Pdf,
        };

        Self {
            html_path: path_arg(map, &["html_path"]),
            output_path,
            format,
        }
    }
}

/// Decodes a raw argument payload. `Null` and blank strings are an empty map;
/// anything that is not a JSON object is an error.
pub fn decode_arguments(raw: &Value) -> Result<Map<String, Value>, String> {
    match raw {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        Value::String(text) if text.trim().is_empty() => Ok(Map::new()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!("expected a JSON object, got {other}")),
            Err(e) => Err(format!("invalid JSON arguments: {e}")),
        },
        other => Err(format!("expected a JSON object, got {other}")),
    }
}

/// A tool call ready for dispatch. Malformed payloads decode to an empty map
/// with the reason kept alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub args: ToolArgs,
    pub malformed: Option<String>,
}

impl ToolInvocation {
    pub fn from_request(call: &ToolCallRequest) -> Self {
        let (map, malformed) = match decode_arguments(&call.arguments) {
            Ok(map) => (map, None),
            Err(reason) => (Map::new(), Some(reason)),
        };
        Self {
            call_id: call.call_id.clone(),
            args: ToolArgs::from_map(&call.name, map),
            malformed,
        }
    }

    pub fn tool_name(&self) -> &str {
        self.args.tool_name()
    }
}
