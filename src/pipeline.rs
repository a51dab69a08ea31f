//! Pipeline - the strictly sequential stage driver.
//!
//! Planner, retriever and writer run one after another, each handed the
//! plan the previous stage produced. The plan is persisted after every
//! stage so a run can be inspected (or re-fed) stage by stage, and the
//! assembled document plus a run summary come out at the end.

use std::path::PathBuf;

use chrono::Utc;
use tokio::time::Instant;

use crate::agents::{PipelineContext, PlannerAgent, RetrieverAgent, WriterAgent};
use crate::assemble::assemble;
use crate::plan::Plan;
use crate::progress::{RunSummary, Stage};

/// Paths and results of one pipeline run.
#[derive(Debug)]
pub struct RunArtifacts {
    pub run_dir: PathBuf,
    pub plan_after_planner: PathBuf,
    pub plan_after_retriever: PathBuf,
    pub plan_after_writer: PathBuf,
    pub document: PathBuf,
    pub plan: Plan,
    pub summary: RunSummary,
}

/// The three-stage generation pipeline.
pub struct Pipeline {
    ctx: PipelineContext,
}

impl Pipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Run the full pipeline for one request.
    ///
    /// Stages never abort on per-leaf trouble; the only errors surfacing
    /// here are filesystem problems writing artifacts.
    pub async fn run(&self, request: &str) -> anyhow::Result<RunArtifacts> {
        let run_dir = self
            .ctx
            .config
            .output_dir
            .join(format!("run_{}", Utc::now().format("%Y%m%d_%H%M%S")));
        std::fs::create_dir_all(&run_dir)?;

        tracing::info!(request, run_dir = %run_dir.display(), "starting pipeline");
        let mut stage_times = Vec::new();

        // Stage 1: structure and guidance.
        let started = Instant::now();
        let plan = PlannerAgent::new(self.ctx.clone()).plan(request).await;
        stage_times.push((Stage::Planner, started.elapsed()));
        let plan_after_planner = run_dir.join("plan_after_planner.json");
        plan.save(&plan_after_planner)?;
        tracing::info!(
            parts = plan.parts.len(),
            leaves = plan.leaf_count(),
            "planner stage complete"
        );

        // Stage 2: evidence.
        let started = Instant::now();
        let plan = RetrieverAgent::new(self.ctx.clone()).enrich(plan).await;
        stage_times.push((Stage::Retriever, started.elapsed()));
        let plan_after_retriever = run_dir.join("plan_after_retriever.json");
        plan.save(&plan_after_retriever)?;
        tracing::info!(
            snippets = self.ctx.tracker.snippets_gathered(),
            "retriever stage complete"
        );

        // Stage 3: prose.
        let started = Instant::now();
        let plan = WriterAgent::new(self.ctx.clone()).write(plan).await;
        stage_times.push((Stage::Writer, started.elapsed()));
        let plan_after_writer = run_dir.join("plan_after_writer.json");
        plan.save(&plan_after_writer)?;
        tracing::info!("writer stage complete");

        // Assembly.
        let document_text = assemble(&plan);
        let document = run_dir.join("document.md");
        std::fs::write(&document, &document_text)?;

        let summary = self.ctx.tracker.summary(&plan, stage_times);
        tracing::info!(
            leaves = summary.total_leaves,
            average_quality = summary.average_quality,
            degraded = summary.failures.len(),
            "pipeline complete"
        );

        Ok(RunArtifacts {
            run_dir,
            plan_after_planner,
            plan_after_retriever,
            plan_after_writer,
            document,
            plan,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::agents::testing::test_context_with;
    use crate::agents::WriterAgent;
    use crate::config::Config;
    use crate::limiter::RateLimiter;
    use crate::llm::testing::RoutedLlm;
    use crate::plan::{Leaf, Part};
    use crate::retrieval::testing::StaticRetrieval;
    use crate::retrieval::Snippet;

    fn structure_3x4() -> String {
        let parts: Vec<_> = (1..=3)
            .map(|p| {
                json!({
                    "title": format!("Part {p}"),
                    "goal": format!("Goal of part {p}"),
                    "leaves": (1..=4)
                        .map(|l| json!({"subtitle": format!("Section {p}.{l}")}))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        json!({"doc_kind": "technical", "parts": parts}).to_string()
    }

    fn five_snippets() -> Vec<Snippet> {
        (1..=5)
            .map(|i| Snippet::new(format!("reference fact number {i}")))
            .collect()
    }

    fn test_config(output_dir: &std::path::Path) -> Config {
        let mut config = Config::with_api_key("test");
        config.output_dir = output_dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn happy_path_produces_the_document_with_bounded_calls() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(RoutedLlm::new(structure_3x4()));
        let retrieval = Arc::new(StaticRetrieval::new(five_snippets()));
        let ctx = test_context_with(test_config(dir.path()), llm.clone(), retrieval);

        let artifacts = Pipeline::new(ctx)
            .run("Write a technical report on topic T")
            .await
            .unwrap();

        // Call budget: one structure call, one guidance call per part, at
        // most two calls per leaf and stage for retriever and writer.
        assert_eq!(llm.structure_calls.load(Ordering::Relaxed), 1);
        assert!(llm.guidance_calls.load(Ordering::Relaxed) <= 3);
        assert!(llm.reason_calls.load(Ordering::Relaxed) <= 24);
        assert!(llm.observe_calls.load(Ordering::Relaxed) <= 24);
        assert!(llm.draft_calls.load(Ordering::Relaxed) <= 24);
        assert!(llm.evaluate_calls.load(Ordering::Relaxed) <= 24);

        // Every leaf carries conforming prose and quality.
        assert_eq!(artifacts.plan.leaf_count(), 12);
        for (_, _, leaf) in artifacts.plan.leaves() {
            assert!(leaf.prose.chars().count() >= 200);
            assert!((0.0..=1.0).contains(&leaf.quality));
            assert!(!leaf.evidence.is_empty());
        }

        // Headings come out in declared order.
        let document = std::fs::read_to_string(&artifacts.document).unwrap();
        let top: Vec<&str> = document.lines().filter(|l| l.starts_with("# ")).collect();
        assert_eq!(top, vec!["# Part 1", "# Part 2", "# Part 3"]);
        let second: Vec<String> = document
            .lines()
            .filter(|l| l.starts_with("## "))
            .map(|l| l.to_string())
            .collect();
        let expected: Vec<String> = (1..=3)
            .flat_map(|p| (1..=4).map(move |l| format!("## Section {p}.{l}")))
            .collect();
        assert_eq!(second, expected);
    }

    #[tokio::test]
    async fn stage_artifacts_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(RoutedLlm::new(structure_3x4()));
        let retrieval = Arc::new(StaticRetrieval::new(five_snippets()));
        let ctx = test_context_with(test_config(dir.path()), llm, retrieval);

        let artifacts = Pipeline::new(ctx).run("request").await.unwrap();

        for path in [
            &artifacts.plan_after_planner,
            &artifacts.plan_after_retriever,
            &artifacts.plan_after_writer,
        ] {
            assert!(path.exists(), "missing artifact {}", path.display());
        }

        let reloaded = Plan::load(&artifacts.plan_after_writer).unwrap();
        assert_eq!(reloaded, artifacts.plan);
    }

    #[tokio::test]
    async fn degraded_retrieval_still_completes_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(RoutedLlm::new(structure_3x4()));
        let retrieval = Arc::new(StaticRetrieval::empty());
        let ctx = test_context_with(test_config(dir.path()), llm, retrieval);
        let tracker = Arc::clone(&ctx.tracker);

        let artifacts = Pipeline::new(ctx).run("request").await.unwrap();

        assert_eq!(tracker.snippets_gathered(), 0);
        for (_, _, leaf) in artifacts.plan.leaves() {
            assert_eq!(leaf.evidence, "");
            assert!(leaf.prose.chars().count() >= 200);
        }
        assert!(artifacts.document.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_spacing_bounds_writer_stage_duration() {
        // 6 leaves at two calls each through a 2 s limiter: the stage cannot
        // finish faster than 2 s x (calls - 1), whatever the pool size.
        let spacing = Duration::from_secs(2);
        let limiter = Arc::new(RateLimiter::new(spacing));
        let llm = Arc::new(RoutedLlm::new("{}").with_limiter(Arc::clone(&limiter)));

        let mut config = Config::with_api_key("test");
        config.writer.workers = 3;
        let ctx = test_context_with(config, llm, Arc::new(StaticRetrieval::empty()));

        let plan = Plan {
            request: "r".to_string(),
            doc_kind: Default::default(),
            parts: vec![Part {
                title: "P".to_string(),
                goal: String::new(),
                leaves: (0..6)
                    .map(|i| Leaf {
                        subtitle: format!("L{i}"),
                        how_to_write: "guide".to_string(),
                        ..Leaf::default()
                    })
                    .collect(),
            }],
        };

        let started = Instant::now();
        let plan = WriterAgent::new(ctx).write(plan).await;
        let elapsed = started.elapsed();

        let calls = 12u32; // draft + evaluate per leaf
        assert!(
            elapsed >= spacing * (calls - 1),
            "writer stage finished too fast: {elapsed:?}"
        );
        for (_, _, leaf) in plan.leaves() {
            assert!(!leaf.prose.is_empty());
        }
    }
}
