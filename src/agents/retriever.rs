//! Retriever agent - attaches evidence to every leaf via a
//! reason/act/observe/reflect loop.
//!
//! Each leaf gets its own loop with a bounded iteration budget: the model
//! plans a query (strategy + keywords), the retrieval service runs it, a
//! second model call scores what came back, and the reflect step decides
//! whether to continue. Retrieval is best-effort throughout - a leaf that
//! gathers nothing ends with an empty evidence string, never an error.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::agents::{run_pool, PipelineContext, Slot, Strategy};
use crate::llm::{complete_json, ChatMessage, ChatOptions};
use crate::plan::{Leaf, Plan};
use crate::progress::Stage;
use crate::retrieval::Snippet;

const REASON_SCHEMA: &str = r#"{"analysis": str, "strategy": str, "keywords": "kw1, kw2, kw3"}"#;

/// Query plan returned by the reason/act call.
#[derive(Debug, Deserialize)]
struct ActionPlan {
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    strategy: String,
    keywords: String,
}

/// Per-leaf loop state, discarded once evidence is synthesized.
#[derive(Debug, Default)]
struct RetrieverState {
    iteration: usize,
    attempted_queries: Vec<String>,
    attempted_strategies: Vec<Strategy>,
    /// Snippets returned per iteration, deduplicated within the batch.
    batches: Vec<Vec<Snippet>>,
    /// All snippets gathered so far, deduplicated across iterations.
    gathered: Vec<Snippet>,
    gathered_keys: HashSet<String>,
    quality_history: Vec<f64>,
}

impl RetrieverState {
    /// Merge a query's results, returning this iteration's batch. The
    /// gathered set only grows by snippets not seen before.
    fn merge(&mut self, returned: Vec<Snippet>, dedup_prefix: Option<usize>) -> Vec<Snippet> {
        let mut batch: Vec<Snippet> = Vec::new();
        let mut batch_keys: HashSet<String> = HashSet::new();

        for snippet in returned {
            let key = dedup_key(&snippet.text, dedup_prefix);
            if batch_keys.insert(key.clone()) {
                batch.push(snippet.clone());
            }
            if self.gathered_keys.insert(key) {
                self.gathered.push(snippet);
            }
        }

        self.batches.push(batch.clone());
        batch
    }
}

fn dedup_key(text: &str, prefix: Option<usize>) -> String {
    match prefix {
        Some(n) if text.len() > n => {
            let mut end = n;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            text[..end].to_string()
        }
        _ => text.to_string(),
    }
}

/// Attaches a consolidated evidence string to every leaf of the plan.
pub struct RetrieverAgent {
    ctx: PipelineContext,
}

impl RetrieverAgent {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Run the retrieval loop for all leaves, in parallel, and return the
    /// enriched plan. Per-leaf failures leave that leaf's evidence empty.
    pub async fn enrich(&self, mut plan: Plan) -> Plan {
        let jobs: Vec<_> = plan
            .leaves()
            .map(|(pi, li, leaf)| {
                let slot = Slot { part: pi, leaf: li };
                (slot, retrieve_leaf(self.ctx.clone(), slot, leaf.clone()))
            })
            .collect();

        let results = run_pool(self.ctx.config.retriever.workers, jobs).await;

        for (slot, outcome) in results {
            match outcome {
                Ok(leaf) => plan.parts[slot.part].leaves[slot.leaf] = leaf,
                Err(reason) => {
                    let leaf = &mut plan.parts[slot.part].leaves[slot.leaf];
                    leaf.evidence = String::new();
                    self.ctx.tracker.record_failure(
                        Stage::Retriever,
                        slot.id(&leaf.subtitle),
                        reason,
                    );
                }
            }
        }
        plan
    }
}

/// The reason/act/observe/reflect loop for one leaf.
async fn retrieve_leaf(ctx: PipelineContext, slot: Slot, mut leaf: Leaf) -> Leaf {
    let cfg = ctx.config.retriever.clone();
    let dedup_prefix = ctx.config.retrieval.dedup_prefix;
    let id = slot.id(&leaf.subtitle);
    let mut state = RetrieverState::default();

    loop {
        // Reason & act: plan the next query.
        let action = match reason_and_act(&ctx, &leaf, &state).await {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(leaf = %id, error = %e, "no usable query plan, stopping loop");
                break;
            }
        };

        let mut strategy = Strategy::parse(&action.strategy)
            .unwrap_or_else(|| Strategy::next_unused(&state.attempted_strategies));
        let mut keywords = action.keywords.trim().to_string();
        if keywords.is_empty() {
            tracing::warn!(leaf = %id, "empty keyword list, stopping loop");
            break;
        }

        // Never re-issue a byte-identical keyword list: rotate to the next
        // unused strategy and perturb the query with it.
        if state.attempted_queries.contains(&keywords) {
            strategy = Strategy::next_unused(&state.attempted_strategies);
            keywords = format!("{keywords}, {strategy}");
            tracing::debug!(leaf = %id, %strategy, "duplicate query perturbed");
        }

        state.attempted_queries.push(keywords.clone());
        state.attempted_strategies.push(strategy);
        tracing::debug!(
            leaf = %id,
            iteration = state.iteration,
            %strategy,
            keywords = %keywords,
            analysis = %action.analysis,
            "issuing query"
        );

        // Act: run the query and merge what came back.
        let returned = ctx.retrieval.search(&keywords).await;
        ctx.tracker.record_retrieval(returned.len());
        let batch = state.merge(returned, dedup_prefix);

        // Observe: score this query's results.
        let score = observe(&ctx, &leaf, &keywords, &batch).await;
        state.quality_history.push(score);
        tracing::debug!(
            leaf = %id,
            iteration = state.iteration,
            score,
            snippets = batch.len(),
            "observed"
        );

        // Reflect: good enough, stuck, or out of budget?
        if score >= cfg.quality_threshold {
            tracing::debug!(leaf = %id, score, "quality threshold reached");
            break;
        }
        let n = state.quality_history.len();
        if n >= 2 && state.quality_history[n - 2..].iter().all(|s| *s < cfg.low_score_guard) {
            tracing::debug!(leaf = %id, "two consecutive low scores, stopping early");
            break;
        }
        if state.iteration + 1 >= cfg.max_iterations {
            tracing::debug!(leaf = %id, "iteration budget exhausted");
            break;
        }
        state.iteration += 1;
    }

    leaf.evidence = synthesize_evidence(&state, cfg.top_k);
    let best = state.quality_history.iter().copied().fold(0.0, f64::max);
    ctx.tracker
        .leaf_retrieved(&id, state.quality_history.len(), best);
    leaf
}

async fn reason_and_act(
    ctx: &PipelineContext,
    leaf: &Leaf,
    state: &RetrieverState,
) -> Result<ActionPlan, crate::llm::LlmError> {
    let messages = [
        ChatMessage::system(
            "You are a precise information-retrieval analyst. Respond only with JSON.",
        ),
        ChatMessage::user(reason_prompt(leaf, state)),
    ];
    complete_json(
        ctx.llm.as_ref(),
        &messages,
        REASON_SCHEMA,
        ChatOptions::default(),
    )
    .await
}

fn reason_prompt(leaf: &Leaf, state: &RetrieverState) -> String {
    let unused: Vec<String> = Strategy::ALL
        .iter()
        .filter(|s| !state.attempted_strategies.contains(s))
        .map(|s| format!("{}: {}", s, s.prompt_hint()))
        .collect();
    let strategies = if unused.is_empty() {
        Strategy::ALL
            .iter()
            .map(|s| format!("{}: {}", s, s.prompt_hint()))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        unused.join("\n")
    };

    let attempted = if state.attempted_queries.is_empty() {
        "none".to_string()
    } else {
        state.attempted_queries.join("; ")
    };
    let history = if state.quality_history.is_empty() {
        "none".to_string()
    } else {
        state
            .quality_history
            .iter()
            .map(|s| format!("{s:.2}"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        r#"Prepare a retrieval plan for a report subsection.

Subsection: {subtitle}
Writing guidance: {guide}
Queries already attempted (in order): {attempted}
Quality scores so far (in order): {history}
Available strategies:
{strategies}

Analyze the situation briefly, pick exactly one strategy from the list above, and
produce 3-5 comma-separated search keywords. Do not repeat an attempted query.

Return ONE JSON object, nothing else:
{{"analysis": "short analysis", "strategy": "strategy name", "keywords": "kw1, kw2, kw3"}}"#,
        subtitle = leaf.subtitle,
        guide = leaf.how_to_write,
    )
}

/// Score this query's snippets in `[0, 1]`. An empty batch scores 0.0
/// without consulting the model; a parse failure scores 0.2; a failed call
/// scores 0.1.
async fn observe(ctx: &PipelineContext, leaf: &Leaf, query: &str, batch: &[Snippet]) -> f64 {
    if batch.is_empty() {
        return 0.0;
    }

    let preview: Vec<String> = batch
        .iter()
        .take(3)
        .map(|s| format!("- {}", truncate(&s.text, 200)))
        .collect();

    let prompt = format!(
        r#"Rate how useful these retrieval results are for writing a report subsection.

Subsection: {subtitle}
Writing guidance: {guide}
Query: {query}
Results:
{preview}

Weigh relevance, completeness and utility. Respond with a single decimal between
0.0 and 1.0 and nothing else."#,
        subtitle = leaf.subtitle,
        guide = leaf.how_to_write,
        preview = preview.join("\n"),
    );

    match ctx
        .llm
        .complete(&[ChatMessage::user(prompt)], ChatOptions::default())
        .await
    {
        Ok(response) => match extract_score(&response) {
            Some(score) => score,
            None => {
                tracing::warn!(leaf = %leaf.subtitle, response = %truncate(&response, 80), "no score in evaluation");
                0.2
            }
        },
        Err(e) => {
            tracing::warn!(leaf = %leaf.subtitle, error = %e, "evaluation call failed");
            0.1
        }
    }
}

/// Pull the first decimal out of a model response and clamp it to `[0, 1]`.
fn extract_score(response: &str) -> Option<f64> {
    static SCORE: OnceLock<Regex> = OnceLock::new();
    let re = SCORE.get_or_init(|| Regex::new(r"0?\.\d+|[01]").expect("static pattern"));
    re.find(response)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|s| s.clamp(0.0, 1.0))
}

/// Evidence = up to `top_k` snippets from the highest-scoring iteration, in
/// arrival order, blank-line separated. Falls back to the overall gathered
/// set when the best iteration returned nothing.
fn synthesize_evidence(state: &RetrieverState, top_k: usize) -> String {
    if state.gathered.is_empty() {
        return String::new();
    }

    let best_iteration = state
        .quality_history
        .iter()
        .enumerate()
        .fold((0usize, f64::MIN), |acc, (i, s)| {
            if *s > acc.1 {
                (i, *s)
            } else {
                acc
            }
        })
        .0;

    let best_batch = state
        .batches
        .get(best_iteration)
        .filter(|batch| !batch.is_empty())
        .map(|batch| batch.as_slice())
        .unwrap_or(&state.gathered);

    best_batch
        .iter()
        .take(top_k)
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agents::testing::{test_context, test_context_with};
    use crate::config::Config;
    use crate::llm::testing::ScriptedLlm;
    use crate::plan::{Part, Plan};
    use crate::retrieval::testing::StaticRetrieval;

    fn reason(keywords: &str, strategy: &str) -> String {
        format!(r#"{{"analysis": "a", "strategy": "{strategy}", "keywords": "{keywords}"}}"#)
    }

    fn one_leaf_plan() -> Plan {
        Plan {
            request: "r".to_string(),
            doc_kind: Default::default(),
            parts: vec![Part {
                title: "P".to_string(),
                goal: "g".to_string(),
                leaves: vec![Leaf {
                    subtitle: "Noise impact".to_string(),
                    how_to_write: "Describe measured noise levels.".to_string(),
                    ..Leaf::default()
                }],
            }],
        }
    }

    #[tokio::test]
    async fn high_score_exits_after_one_iteration() {
        let llm = Arc::new(ScriptedLlm::new([
            reason("noise, decibel, limit", "direct"),
            "0.9".to_string(),
        ]));
        let retrieval = Arc::new(StaticRetrieval::new(vec![
            Snippet::new("noise stays below 55 dB"),
            Snippet::new("night limit is 45 dB"),
        ]));
        let ctx = test_context(llm.clone(), retrieval);

        let plan = RetrieverAgent::new(ctx).enrich(one_leaf_plan()).await;

        let leaf = &plan.parts[0].leaves[0];
        assert!(leaf.evidence.contains("55 dB"));
        assert!(leaf.evidence.contains("45 dB"));
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn two_consecutive_low_scores_stop_the_loop() {
        // Scores 0.2 then 0.25: the no-progress guard must fire before a
        // third iteration is attempted.
        let llm = Arc::new(ScriptedLlm::new([
            reason("alpha, beta, gamma", "direct"),
            "0.2".to_string(),
            reason("delta, epsilon, zeta", "semantic"),
            "0.25".to_string(),
        ]));
        let retrieval = Arc::new(StaticRetrieval::new(vec![Snippet::new("weak match")]));
        let ctx = test_context(llm.clone(), retrieval.clone());

        RetrieverAgent::new(ctx).enrich(one_leaf_plan()).await;

        assert_eq!(llm.call_count(), 4);
        assert_eq!(retrieval.call_count(), 2);
    }

    #[tokio::test]
    async fn iteration_budget_bounds_llm_calls() {
        let llm = Arc::new(ScriptedLlm::new([
            reason("one, two, three", "direct"),
            "0.5".to_string(),
            reason("four, five, six", "contextual"),
            "0.5".to_string(),
            reason("seven, eight, nine", "semantic"),
            "0.5".to_string(),
        ]));
        let retrieval = Arc::new(StaticRetrieval::new(vec![Snippet::new("mid match")]));
        let ctx = test_context(llm.clone(), retrieval);
        let max_iterations = ctx.config.retriever.max_iterations as u64;

        RetrieverAgent::new(ctx).enrich(one_leaf_plan()).await;

        assert_eq!(llm.call_count(), 2 * max_iterations);
    }

    #[tokio::test]
    async fn duplicate_keyword_list_is_perturbed() {
        let llm = Arc::new(ScriptedLlm::new([
            reason("same, query, twice", "direct"),
            "0.5".to_string(),
            reason("same, query, twice", "direct"),
            "0.5".to_string(),
            reason("fresh, terms, now", "specific"),
            "0.5".to_string(),
        ]));
        let retrieval = Arc::new(StaticRetrieval::new(vec![Snippet::new("hit")]));
        let ctx = test_context(llm, retrieval.clone());

        RetrieverAgent::new(ctx).enrich(one_leaf_plan()).await;

        let queries = retrieval.queries.lock().unwrap().clone();
        assert_eq!(queries[0], "same, query, twice");
        assert_eq!(queries[1], "same, query, twice, contextual");
        assert_eq!(queries[2], "fresh, terms, now");
    }

    #[tokio::test]
    async fn empty_retrieval_leaves_empty_evidence() {
        // Empty batches score 0.0 without an observe call, so the
        // no-progress guard exits after two iterations.
        let llm = Arc::new(ScriptedLlm::new([
            reason("a, b, c", "direct"),
            reason("d, e, f", "semantic"),
        ]));
        let retrieval = Arc::new(StaticRetrieval::empty());
        let ctx = test_context(llm.clone(), retrieval);
        let tracker = Arc::clone(&ctx.tracker);

        let plan = RetrieverAgent::new(ctx).enrich(one_leaf_plan()).await;

        assert_eq!(plan.parts[0].leaves[0].evidence, "");
        assert_eq!(llm.call_count(), 2);
        assert_eq!(tracker.snippets_gathered(), 0);
    }

    #[tokio::test]
    async fn reason_failure_degrades_to_empty_evidence() {
        let llm = Arc::new(ScriptedLlm::failing());
        let ctx = test_context(llm, Arc::new(StaticRetrieval::empty()));

        let plan = RetrieverAgent::new(ctx).enrich(one_leaf_plan()).await;

        assert_eq!(plan.parts[0].leaves[0].evidence, "");
    }

    #[tokio::test]
    async fn prefix_dedup_collapses_near_duplicates() {
        let mut config = Config::with_api_key("test");
        config.retrieval.dedup_prefix = Some(10);

        let llm = Arc::new(ScriptedLlm::new([
            reason("q, w, e", "direct"),
            "0.9".to_string(),
        ]));
        let retrieval = Arc::new(StaticRetrieval::new(vec![
            Snippet::new("same start, version one"),
            Snippet::new("same start, version two"),
        ]));
        let ctx = test_context_with(config, llm, retrieval);

        let plan = RetrieverAgent::new(ctx).enrich(one_leaf_plan()).await;

        let evidence = &plan.parts[0].leaves[0].evidence;
        assert!(evidence.contains("version one"));
        assert!(!evidence.contains("version two"));
    }

    #[test]
    fn score_extraction_handles_prose() {
        assert_eq!(extract_score("0.75"), Some(0.75));
        assert_eq!(extract_score("I would rate this .8 overall"), Some(0.8));
        assert_eq!(extract_score("Score: 1"), Some(1.0));
        assert_eq!(extract_score("no digits here"), None);
    }

    #[test]
    fn evidence_comes_from_best_iteration() {
        let mut state = RetrieverState::default();
        state.merge(vec![Snippet::new("weak")], None);
        state.quality_history.push(0.3);
        state.merge(vec![Snippet::new("strong a"), Snippet::new("strong b")], None);
        state.quality_history.push(0.8);

        let evidence = synthesize_evidence(&state, 5);
        assert_eq!(evidence, "strong a\n\nstrong b");
    }

    #[test]
    fn evidence_respects_top_k() {
        let mut state = RetrieverState::default();
        let batch: Vec<Snippet> = (0..8).map(|i| Snippet::new(format!("s{i}"))).collect();
        state.merge(batch, None);
        state.quality_history.push(0.9);

        let evidence = synthesize_evidence(&state, 3);
        assert_eq!(evidence, "s0\n\ns1\n\ns2");
    }
}
