//! Usage policy for the HTML pipeline: fill → preview → corrective fill →
//! export, with per-profile caps. Rejections are returned as values so the
//! dispatcher can hand them back to the model as negative tool results.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::state::AgentState;
use super::tools::{EXPORT_TOOL, FILL_HTML_TOOL, PREVIEW_TOOL};

/// Deployment profile selecting how strictly the visual sign-off is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// One preview, one mandatory correction, forced tool order.
    Strict,
    /// One preview, optional correction.
    Review,
    /// No caps beyond the turn budget.
    Permissive,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Profile::Strict),
            "review" => Ok(Profile::Review),
            "permissive" => Ok(Profile::Permissive),
            other => Err(format!(
                "unknown profile '{other}' (expected strict, review or permissive)"
            )),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Profile::Strict => "strict",
            Profile::Review => "review",
            Profile::Permissive => "permissive",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("Preview limit reached ({limit}). Apply your corrections with fill_template_html and then call export_pdf.")]
    PreviewLimit { limit: u32 },

    #[error("Correction limit reached ({limit}). Call export_pdf to finish.")]
    CorrectionLimit { limit: u32 },

    #[error("No HTML has been generated yet. Call fill_template_html first.")]
    NothingRendered,

    #[error("Preview the document with preview_snapshot before applying more changes.")]
    RefillBeforePreview,

    #[error("Call preview_snapshot and review the result before exporting.")]
    ExportBeforePreview,

    #[error("A correction is pending after the preview. Call fill_template_html with the corrected fields before exporting.")]
    CorrectionPending,
}

/// How an allowed fill counts against the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillKind {
    Initial,
    Correction,
    Refill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsagePolicy {
    pub max_previews: Option<u32>,
    pub max_corrections: Option<u32>,
    pub require_preview_before_export: bool,
    pub require_correction_before_export: bool,
    pub force_tool_order: bool,
}

impl UsagePolicy {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Strict => Self {
                max_previews: Some(1),
                max_corrections: Some(1),
                require_preview_before_export: true,
                require_correction_before_export: true,
                force_tool_order: true,
            },
            Profile::Review => Self {
                max_previews: Some(1),
                max_corrections: Some(1),
                require_preview_before_export: true,
                require_correction_before_export: false,
                force_tool_order: false,
            },
            Profile::Permissive => Self {
                max_previews: None,
                max_corrections: None,
                require_preview_before_export: false,
                require_correction_before_export: false,
                force_tool_order: false,
            },
        }
    }

    pub fn check_fill(&self, state: &AgentState) -> Result<FillKind, PolicyViolation> {
        if !state.html_ready {
            return Ok(FillKind::Initial);
        }
        if state.awaiting_correction {
            return match self.max_corrections {
                Some(limit) if state.corrections >= limit => {
                    Err(PolicyViolation::CorrectionLimit { limit })
                }
                _ => Ok(FillKind::Correction),
            };
        }
        match self.max_corrections {
            Some(limit) if state.corrections >= limit => Err(PolicyViolation::CorrectionLimit { limit }),
            Some(_) => Err(PolicyViolation::RefillBeforePreview),
            None => Ok(FillKind::Refill),
        }
    }

    pub fn check_preview(&self, state: &AgentState) -> Result<(), PolicyViolation> {
        if !state.html_ready {
            return Err(PolicyViolation::NothingRendered);
        }
        match self.max_previews {
            Some(limit) if state.previews >= limit => Err(PolicyViolation::PreviewLimit { limit }),
            _ => Ok(()),
        }
    }

    pub fn check_export(&self, state: &AgentState) -> Result<(), PolicyViolation> {
        if !state.html_ready {
            return Err(PolicyViolation::NothingRendered);
        }
        if self.require_preview_before_export && state.previews == 0 {
            return Err(PolicyViolation::ExportBeforePreview);
        }
        if self.require_correction_before_export && state.awaiting_correction {
            return Err(PolicyViolation::CorrectionPending);
        }
        Ok(())
    }

    /// The tool the model must call next when the order is forced.
    pub fn next_tool(&self, state: &AgentState) -> Option<&'static str> {
        if !self.force_tool_order {
            return None;
        }
        let tool = if !state.html_ready {
            FILL_HTML_TOOL
        } else if state.previews == 0 {
            PREVIEW_TOOL
        } else if state.awaiting_correction {
            FILL_HTML_TOOL
        } else {
            EXPORT_TOOL
        };
        Some(tool)
    }

    /// One-line rule summary for the system prompt.
    pub fn describe(&self) -> String {
        let previews = match self.max_previews {
            Some(limit) => format!("at most {limit} preview(s)"),
            None => "as many previews as you need".to_string(),
        };
        let corrections = match self.max_corrections {
            Some(limit) => format!("at most {limit} corrective fill(s), each after a preview"),
            None => "corrective fills whenever needed".to_string(),
        };
        let export = match (
            self.require_preview_before_export,
            self.require_correction_before_export,
        ) {
            (true, true) => "export only after previewing and applying the correction",
            (true, false) => "export only after previewing",
            _ => "export once the HTML looks right",
        };
        format!("Usage rules: {previews}; {corrections}; {export}.")
    }
}
