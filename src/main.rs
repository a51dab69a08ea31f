//! reportsmith - CLI entry point.
//!
//! Loads configuration, wires the shared services, runs the pipeline once
//! and prints the run summary.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reportsmith::agents::PipelineContext;
use reportsmith::cli::Cli;
use reportsmith::config::Config;
use reportsmith::limiter::RateLimiter;
use reportsmith::llm::OpenRouterClient;
use reportsmith::pipeline::Pipeline;
use reportsmith::progress::ProgressTracker;
use reportsmith::retrieval::HttpRetrievalClient;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reportsmith=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Configuration problems are the only fatal startup errors.
    let mut config = Config::from_env()?;
    cli.apply(&mut config);
    info!(
        model = %config.llm.model,
        rate_spacing_s = config.rate_spacing_s,
        "configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::new(Duration::from_secs_f64(
        config.rate_spacing_s,
    )));
    let tracker = Arc::new(ProgressTracker::new());
    let llm = Arc::new(OpenRouterClient::new(
        &config.llm,
        Arc::clone(&limiter),
        Arc::clone(&tracker),
    )?);
    let retrieval = Arc::new(HttpRetrievalClient::new(&config.retrieval)?);

    let ctx = PipelineContext::new(Arc::new(config), llm, retrieval, limiter, tracker);
    let artifacts = Pipeline::new(ctx).run(&cli.query).await?;

    println!("{}", artifacts.summary.render());
    println!("document: {}", artifacts.document.display());
    println!("artifacts: {}", artifacts.run_dir.display());

    Ok(())
}
