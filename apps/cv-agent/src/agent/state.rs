use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Progress of one run. Owned by the controller and threaded through the
/// dispatcher by `&mut`; never shared across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentState {
    /// Fill calls that passed policy (successful or not).
    pub fills: u32,
    /// Successful previews.
    pub previews: u32,
    /// Successful corrective fills after a preview.
    pub corrections: u32,
    /// An initial artifact (working HTML) exists.
    pub html_ready: bool,
    /// A preview was taken and no fill has happened since.
    pub awaiting_correction: bool,
    pub export_succeeded: bool,
    pub last_error: Option<String>,
    pub working_html: Option<PathBuf>,
    /// Where the final artifact is expected; updated to the path actually written.
    pub output_path: PathBuf,
    pub final_message: String,
}

impl AgentState {
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            fills: 0,
            previews: 0,
            corrections: 0,
            html_ready: false,
            awaiting_correction: false,
            export_succeeded: false,
            last_error: None,
            working_html: None,
            output_path,
            final_message: String::new(),
        }
    }

    pub fn counters(&self) -> StateCounters {
        StateCounters {
            fills: self.fills,
            previews: self.previews,
            corrections: self.corrections,
            html_ready: self.html_ready,
            export_succeeded: self.export_succeeded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateCounters {
    pub fills: u32,
    pub previews: u32,
    pub corrections: u32,
    pub html_ready: bool,
    pub export_succeeded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallSummary {
    pub name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What happened in one turn, as fed to the insight generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationSummary {
    pub turn: usize,
    pub tool_calls: Vec<ToolCallSummary>,
    pub counters: StateCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl IterationSummary {
    pub fn new(
        turn: usize,
        tool_calls: Vec<ToolCallSummary>,
        state: &AgentState,
        note: Option<String>,
    ) -> Self {
        Self {
            turn,
            tool_calls,
            counters: state.counters(),
            last_error: state.last_error.clone(),
            note,
            recorded_at: Utc::now(),
        }
    }
}

/// Bounded trailing window of iteration summaries.
#[derive(Debug, Clone)]
pub struct History {
    window: usize,
    entries: VecDeque<IterationSummary>,
}

impl History {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            entries: VecDeque::with_capacity(window.max(1)),
        }
    }

    pub fn push(&mut self, summary: IterationSummary) {
        if self.entries.len() == self.window {
            self.entries.pop_front();
        }
        self.entries.push_back(summary);
    }

    pub fn recent(&self) -> Vec<&IterationSummary> {
        self.entries.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
