// Prompt text for the agent loop and the insight generator.
// Reuses cross-cutting fragments from llm_client::prompts.

use std::path::Path;

use crate::llm_client::prompts::{FIELD_CONTRACT, STYLE_INSTRUCTION};

use super::policy::UsagePolicy;

/// DOCX pipeline system prompt.
pub fn docx_system_prompt() -> String {
    format!(
        "You are \"CV Builder DOCX\". Your goal is to transform the attached résumé into a \
        finished DOCX using the provided template.\n\n\
        Rules:\n\
        - The résumé is already attached. Read it and extract the relevant details.\n\
        - {STYLE_INSTRUCTION}\n\
        - {FIELD_CONTRACT}\n\
        - The template consumes {{company}}, {{role}}, {{period}}, {{location}}, {{summary}}, \
        {{#bullets}}{{.}}{{/bullets}} and {{tech}} inside its EXPERIENCE loop, and \
        {{institution}}, {{degree}}, {{period}} inside EDUCATION.\n\n\
        Flow:\n\
        1. Call fill_docx_template(template_path, output_docx_path, fields) with all fields \
        populated. You may call it again if you need to correct data.\n\
        2. Double-check the data consistency before finishing.\n\
        3. When ready, state that the DOCX is generated, summarize its content briefly and \
        share the output path."
    )
}

/// HTML pipeline system prompt; the usage rules come from the active policy.
pub fn html_system_prompt(policy: &UsagePolicy) -> String {
    format!(
        "You are \"CV Builder\". Your goal is to transform the attached résumé into a \
        polished document using the provided HTML template.\n\n\
        Rules:\n\
        - The résumé is already attached. Read it and extract the relevant details.\n\
        - {STYLE_INSTRUCTION}\n\
        - {FIELD_CONTRACT}\n\
        - {}\n\n\
        Flow:\n\
        1. Call fill_template_html(template_path, output_html_path, fields).\n\
        2. Call preview_snapshot and review the image you receive.\n\
        3. If something is wrong, call fill_template_html again with corrected fields.\n\
        4. Call export_pdf to write the final document, then share the output path.",
        policy.describe()
    )
}

pub fn suggested_paths(template: &Path, output: &Path, working_html: Option<&Path>) -> String {
    let mut message = format!(
        "Suggested paths:\n- template_path: {}\n- output path: {}",
        template.display(),
        output.display()
    );
    if let Some(html) = working_html {
        message.push_str(&format!("\n- working html_path: {}", html.display()));
    }
    message
}

pub const ATTACHMENT_UPLOADED: &str =
    "Here is the résumé PDF. Extract the fields and call the fill tool.";

pub fn attachment_inline(text: &str) -> String {
    format!(
        "Here is the text extracted from the résumé PDF. Extract the fields and call the fill tool.\n\n{text}"
    )
}

pub fn preview_review(image_path: &Path) -> String {
    format!(
        "Preview of the current document ({}). Check layout, overflow and content. If \
        corrections are needed, call fill_template_html with the corrected fields; otherwise \
        call export_pdf.",
        image_path.display()
    )
}

pub fn insight_message(insight: &str) -> String {
    format!("Iteration insight: {insight}")
}

/// System prompt for the iteration insight generator.
pub const INSIGHT_SYSTEM: &str = "You are an analyst summarizing the status of an automation \
    agent. Output short, actionable insights without emojis.";

pub fn insight_prompt(context: &str) -> String {
    format!(
        "CV agent context:\n{context}\n\nRespond in concise English (one or two sentences). \
        Summarize the current state and recommend the next concrete action. Avoid repetition."
    )
}
