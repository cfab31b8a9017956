// CV agent: turn-loop controller, tool dispatch, usage policy and insights.
// All model calls go through llm_client::LlmTransport; all rendering through render::Renderer.

pub mod controller;
pub mod dispatch;
pub mod insight;
pub mod policy;
pub mod prompts;
pub mod state;
pub mod tools;
pub mod uploads;

#[cfg(test)]
mod tests;

// Re-export the public API consumed by main.
pub use controller::{AgentSettings, CvAgent, RunReport, RunRequest};
pub use policy::Profile;
