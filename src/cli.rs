//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(
    name = "reportsmith",
    about = "Generate a long structured report from a free-form request"
)]
pub struct Cli {
    /// The document request, e.g. "write an environmental impact assessment
    /// for project X"
    #[arg(long, short = 'q')]
    pub query: String,

    /// Artifact output directory (overrides OUTPUT_DIR)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Guidance-phase worker pool size
    #[arg(long)]
    pub planner_workers: Option<usize>,

    /// Retriever worker pool size
    #[arg(long)]
    pub retriever_workers: Option<usize>,

    /// Writer worker pool size
    #[arg(long)]
    pub writer_workers: Option<usize>,

    /// Minimum seconds between LLM calls
    #[arg(long)]
    pub rate_spacing: Option<f64>,
}

impl Cli {
    /// Apply command-line overrides on top of the environment config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(workers) = self.planner_workers {
            config.planner.workers = workers;
        }
        if let Some(workers) = self.retriever_workers {
            config.retriever.workers = workers;
        }
        if let Some(workers) = self.writer_workers {
            config.writer.workers = workers;
        }
        if let Some(spacing) = self.rate_spacing {
            config.rate_spacing_s = spacing;
        }
    }
}
