//! Thread-safe progress counters and run statistics.
//!
//! One tracker is shared by every worker in every stage. Counters are
//! lock-free atomics; the failure list sits behind a mutex. All user-facing
//! progress goes through `tracing` so it interleaves cleanly with worker
//! logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::plan::Plan;

/// Pipeline stage, used to tag progress events and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Planner,
    Retriever,
    Writer,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planner => "planner",
            Stage::Retriever => "retriever",
            Stage::Writer => "writer",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A leaf (or part) that a stage had to degrade instead of completing.
#[derive(Debug, Clone)]
pub struct LeafFailure {
    pub stage: Stage,
    /// Human-readable identifier, e.g. `part 2 leaf 1 'Noise impact'`.
    pub id: String,
    pub reason: String,
}

/// Shared, thread-safe progress state for one pipeline run.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    llm_calls: AtomicU64,
    retrieval_queries: AtomicU64,
    snippets_gathered: AtomicU64,
    leaves_retrieved: AtomicU64,
    leaves_written: AtomicU64,
    low_quality_leaves: AtomicU64,
    failures: Mutex<Vec<LeafFailure>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful outbound LLM call.
    pub fn record_llm_call(&self) {
        self.llm_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn llm_calls(&self) -> u64 {
        self.llm_calls.load(Ordering::Relaxed)
    }

    /// Record one retrieval query and the number of snippets it returned.
    pub fn record_retrieval(&self, snippets: usize) {
        self.retrieval_queries.fetch_add(1, Ordering::Relaxed);
        self.snippets_gathered
            .fetch_add(snippets as u64, Ordering::Relaxed);
    }

    pub fn retrieval_queries(&self) -> u64 {
        self.retrieval_queries.load(Ordering::Relaxed)
    }

    pub fn snippets_gathered(&self) -> u64 {
        self.snippets_gathered.load(Ordering::Relaxed)
    }

    /// Record a guidance-phase part completion.
    pub fn part_planned(&self, index: usize, total: usize) {
        tracing::info!(
            stage = %Stage::Planner,
            part = index,
            total,
            "writing guidance complete"
        );
    }

    /// Record a completed retriever leaf.
    pub fn leaf_retrieved(&self, id: &str, iterations: usize, score: f64) {
        self.leaves_retrieved.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            stage = %Stage::Retriever,
            leaf = id,
            iterations,
            score,
            "evidence attached"
        );
    }

    /// Record a completed writer leaf. Leaves that never reached the quality
    /// threshold are counted separately so the summary can call them out.
    pub fn leaf_written(&self, id: &str, attempts: usize, score: f64, below_threshold: bool) {
        self.leaves_written.fetch_add(1, Ordering::Relaxed);
        if below_threshold {
            self.low_quality_leaves.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                stage = %Stage::Writer,
                leaf = id,
                attempts,
                score,
                "accepted below quality threshold"
            );
        } else {
            tracing::info!(
                stage = %Stage::Writer,
                leaf = id,
                attempts,
                score,
                "prose accepted"
            );
        }
    }

    /// Record a degraded leaf or part. The stage keeps going; the failure is
    /// surfaced in the final summary.
    pub fn record_failure(&self, stage: Stage, id: impl Into<String>, reason: impl Into<String>) {
        let failure = LeafFailure {
            stage,
            id: id.into(),
            reason: reason.into(),
        };
        tracing::warn!(
            stage = %failure.stage,
            leaf = %failure.id,
            reason = %failure.reason,
            "degraded"
        );
        self.failures
            .lock()
            .expect("failure list poisoned")
            .push(failure);
    }

    pub fn failures(&self) -> Vec<LeafFailure> {
        self.failures
            .lock()
            .expect("failure list poisoned")
            .clone()
    }

    /// Build the end-of-run summary from the finished plan.
    pub fn summary(&self, plan: &Plan, stage_times: Vec<(Stage, Duration)>) -> RunSummary {
        let total_leaves = plan.leaf_count();
        let written: Vec<&crate::plan::Leaf> = plan
            .leaves()
            .map(|(_, _, leaf)| leaf)
            .filter(|leaf| !leaf.prose.is_empty())
            .collect();

        let average_quality = if written.is_empty() {
            0.0
        } else {
            written.iter().map(|l| l.quality).sum::<f64>() / written.len() as f64
        };
        let total_prose_chars = written.iter().map(|l| l.prose.chars().count()).sum();

        RunSummary {
            total_parts: plan.parts.len(),
            total_leaves,
            written_leaves: written.len(),
            average_quality,
            total_prose_chars,
            llm_calls: self.llm_calls(),
            retrieval_queries: self.retrieval_queries(),
            snippets_gathered: self.snippets_gathered(),
            low_quality_leaves: self.low_quality_leaves.load(Ordering::Relaxed),
            failures: self.failures(),
            stage_times,
        }
    }
}

/// End-of-run statistics, rendered by the binary after the document is
/// written.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total_parts: usize,
    pub total_leaves: usize,
    pub written_leaves: usize,
    pub average_quality: f64,
    pub total_prose_chars: usize,
    pub llm_calls: u64,
    pub retrieval_queries: u64,
    pub snippets_gathered: u64,
    pub low_quality_leaves: u64,
    pub failures: Vec<LeafFailure>,
    pub stage_times: Vec<(Stage, Duration)>,
}

impl RunSummary {
    /// Render the summary as plain text for the console.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("run summary\n");
        out.push_str(&format!(
            "  parts: {}  leaves: {}  written: {}\n",
            self.total_parts, self.total_leaves, self.written_leaves
        ));
        out.push_str(&format!(
            "  average quality: {:.3}  prose chars: {}\n",
            self.average_quality, self.total_prose_chars
        ));
        out.push_str(&format!(
            "  llm calls: {}  retrieval queries: {}  snippets gathered: {}\n",
            self.llm_calls, self.retrieval_queries, self.snippets_gathered
        ));
        for (stage, elapsed) in &self.stage_times {
            out.push_str(&format!("  {} stage: {:.1}s\n", stage, elapsed.as_secs_f64()));
        }
        if self.low_quality_leaves > 0 {
            out.push_str(&format!(
                "  leaves below quality threshold: {}\n",
                self.low_quality_leaves
            ));
        }
        if self.failures.is_empty() {
            out.push_str("  no degraded leaves\n");
        } else {
            out.push_str(&format!("  degraded leaves: {}\n", self.failures.len()));
            for failure in &self.failures {
                out.push_str(&format!(
                    "    [{}] {}: {}\n",
                    failure.stage, failure.id, failure.reason
                ));
            }
        }
        out
    }
}
