mod agent;
mod cli;
mod config;
mod conversation;
mod errors;
mod llm_client;
mod pdf;
mod render;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::agent::{AgentSettings, CvAgent, RunReport, RunRequest};
use crate::cli::Cli;
use crate::config::Config;
use crate::llm_client::OpenAiClient;
use crate::render::ChromiumCli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::new(config.log_filter()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cv-agent v{}", env!("CARGO_PKG_VERSION"));

    let transport = Arc::new(OpenAiClient::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
    ));
    let browser = Arc::new(ChromiumCli::new(config.chrome_bin.clone()));

    let mut settings = AgentSettings::from_config(&config);
    if let Some(model) = cli.model {
        settings.model = model;
    }
    if let Some(profile) = cli.profile {
        settings.profile = profile;
    }
    if let Some(max_turns) = cli.max_turns.filter(|turns| *turns > 0) {
        settings.max_turns = max_turns;
    }
    info!(
        "LLM client initialized (model: {}, profile: {})",
        settings.model, settings.profile
    );

    // Ctrl-C cancels the run; uploads are still released on the way out
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            trigger.cancel();
        }
    });

    let agent = CvAgent::new(transport, browser, settings);
    let report: RunReport = agent
        .run(
            RunRequest {
                cv_path: cli.cv,
                template_path: cli.template,
                output_path: cli.out,
            },
            cancel,
        )
        .await?;

    info!(
        turns = report.turns,
        fills = report.state.fills,
        previews = report.state.previews,
        corrections = report.state.corrections,
        "{}",
        report.final_message
    );
    println!("{}", report.output_path.display());
    Ok(())
}
