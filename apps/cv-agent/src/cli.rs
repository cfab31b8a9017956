use std::path::PathBuf;

use clap::Parser;

use crate::agent::Profile;

#[derive(Parser, Debug)]
#[command(
    name = "cv-agent",
    version,
    about = "Turns a PDF résumé into a finished document from a DOCX or HTML template"
)]
pub struct Cli {
    /// Source résumé (PDF).
    #[arg(long)]
    pub cv: PathBuf,
    /// Destination of the generated document.
    #[arg(long, default_value = "./out/output.docx")]
    pub out: PathBuf,
    /// DOCX or HTML template; the extension selects the pipeline.
    #[arg(long, default_value = "./templates/test_template.docx")]
    pub template: PathBuf,
    /// Overrides OPENAI_MODEL.
    #[arg(long)]
    pub model: Option<String>,
    /// Overrides CV_AGENT_PROFILE (strict, review or permissive).
    #[arg(long)]
    pub profile: Option<Profile>,
    /// Overrides CV_AGENT_MAX_TURNS.
    #[arg(long)]
    pub max_turns: Option<usize>,
}
