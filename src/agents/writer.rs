//! Writer agent - produces final prose and a quality score for every leaf.
//!
//! Feedback-driven generation: draft, score, and redraft with the reviewer
//! feedback folded into the next attempt, until the score clears the
//! threshold or the attempt budget runs out. Scoring is two-tiered - cheap
//! rule checks first, a model evaluation only for drafts that pass them.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::agents::{run_pool, PipelineContext, Slot};
use crate::llm::{complete_json, ChatMessage, ChatOptions};
use crate::plan::{Leaf, Plan};
use crate::progress::Stage;

const EVAL_SCHEMA: &str = r#"{"score": <integer 0-100>, "feedback": str}"#;

/// Prose used when generation fails beyond recovery.
pub const PLACEHOLDER_PROSE: &str = "Content unavailable for this section.";

/// Evaluation returned by the model for a draft.
#[derive(Debug, Deserialize)]
struct Evaluation {
    score: f64,
    #[serde(default)]
    feedback: String,
}

/// Writes every leaf of the plan, in parallel, with per-leaf quality
/// gating.
pub struct WriterAgent {
    ctx: PipelineContext,
}

impl WriterAgent {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Fill `prose` and `quality` for every leaf and return the plan.
    pub async fn write(&self, mut plan: Plan) -> Plan {
        let jobs: Vec<_> = plan
            .leaves()
            .map(|(pi, li, leaf)| {
                let slot = Slot { part: pi, leaf: li };
                (slot, write_leaf(self.ctx.clone(), slot, leaf.clone()))
            })
            .collect();

        let results = run_pool(self.ctx.config.writer.workers, jobs).await;

        for (slot, outcome) in results {
            match outcome {
                Ok(leaf) => plan.parts[slot.part].leaves[slot.leaf] = leaf,
                Err(reason) => {
                    let leaf = &mut plan.parts[slot.part].leaves[slot.leaf];
                    leaf.prose = PLACEHOLDER_PROSE.to_string();
                    leaf.quality = 0.0;
                    self.ctx.tracker.record_failure(
                        Stage::Writer,
                        slot.id(&leaf.subtitle),
                        reason,
                    );
                }
            }
        }
        plan
    }
}

/// Draft/score/redraft loop for one leaf.
async fn write_leaf(ctx: PipelineContext, slot: Slot, mut leaf: Leaf) -> Leaf {
    let cfg = ctx.config.writer.clone();
    let id = slot.id(&leaf.subtitle);

    let mut feedback: Option<String> = None;
    let mut draft = String::new();
    let mut quality = 0.0;
    let mut attempts = 0;

    for attempt in 0..cfg.max_attempts {
        attempts = attempt + 1;

        draft = match draft_prose(&ctx, &leaf, feedback.as_deref()).await {
            Ok(d) => d,
            Err(e) => {
                ctx.tracker
                    .record_failure(Stage::Writer, &id, format!("draft failed: {e}"));
                leaf.prose = PLACEHOLDER_PROSE.to_string();
                leaf.quality = 0.0;
                return leaf;
            }
        };

        let (score, fb) = match fast_check(&draft) {
            Some((score, reason)) => (score, reason.to_string()),
            None => evaluate(&ctx, &leaf, &draft, cfg.reject_overflow_score).await,
        };
        quality = score;

        if score >= cfg.quality_threshold {
            break;
        }
        tracing::debug!(leaf = %id, attempt, score, feedback = %fb, "draft below threshold");
        feedback = Some(fb);
    }

    let below_threshold = quality < cfg.quality_threshold;
    leaf.prose = clean(&draft, &leaf.subtitle);
    leaf.quality = quality;
    ctx.tracker
        .leaf_written(&id, attempts, quality, below_threshold);
    leaf
}

/// Cheap rule checks applied before any model evaluation. Returns
/// `Some((score, feedback))` when the draft fails one.
fn fast_check(draft: &str) -> Option<(f64, &'static str)> {
    let trimmed = draft.trim();
    let chars = trimmed.chars().count();
    if chars < 200 {
        return Some((0.1, "too short"));
    }
    if chars > 2000 {
        return Some((0.4, "too long, tighten"));
    }
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        return Some((0.0, "regeneration needed"));
    }
    None
}

async fn draft_prose(
    ctx: &PipelineContext,
    leaf: &Leaf,
    feedback: Option<&str>,
) -> Result<String, crate::llm::LlmError> {
    let evidence = if leaf.evidence.is_empty() {
        "No reference material was retrieved for this subsection."
    } else {
        leaf.evidence.as_str()
    };

    let prompt = format!(
        r#"You are a professional report author. Write the body of the subsection described
below for a formal report.

Subsection heading: {subtitle}
Writing guidance: {guide}
Reference material:
{evidence}
Reviewer feedback to address: {feedback}

Requirements:
- Plain text only: no markdown emphasis, no heading markers, no code fences.
- Do not repeat the heading; start directly with the content.
- Separate paragraphs with one blank line.
- Keep the body between 800 and 1200 characters.
- Where the reference material applies, use its facts and figures directly.

Output only the subsection body."#,
        subtitle = leaf.subtitle,
        guide = leaf.how_to_write,
        feedback = feedback.unwrap_or("none"),
    );

    let response = ctx
        .llm
        .complete(&[ChatMessage::user(prompt)], ChatOptions::default())
        .await?;
    Ok(response.trim().to_string())
}

/// Model evaluation of a draft, normalized to `[0, 1]`.
async fn evaluate(
    ctx: &PipelineContext,
    leaf: &Leaf,
    draft: &str,
    reject_overflow: bool,
) -> (f64, String) {
    let prompt = format!(
        r#"You are the senior editor reviewing a report subsection. Judge the draft against
the guidance and the reference material: professional tone, clear structure, focus
on the topic, and use of the material.

Writing guidance: {guide}
Reference material:
{evidence}
Draft:
{draft}

Return ONE JSON object, nothing else:
{{"score": <integer between 0 and 100>, "feedback": "specific, actionable improvements"}}"#,
        guide = leaf.how_to_write,
        evidence = leaf.evidence,
    );

    let messages = [ChatMessage::user(prompt)];
    match complete_json::<Evaluation>(
        ctx.llm.as_ref(),
        &messages,
        EVAL_SCHEMA,
        ChatOptions::default(),
    )
    .await
    {
        Ok(eval) => {
            if reject_overflow && eval.score > 100.0 {
                tracing::warn!(leaf = %leaf.subtitle, score = eval.score, "evaluation score out of range");
                return (0.2, "regeneration needed".to_string());
            }
            ((eval.score / 100.0).clamp(0.0, 1.0), eval.feedback)
        }
        Err(e) => {
            tracing::warn!(leaf = %leaf.subtitle, error = %e, "evaluation failed");
            (0.2, "evaluation unavailable, regenerate the section".to_string())
        }
    }
}

struct CleanPatterns {
    bold: Regex,
    italic: Regex,
    heading: Regex,
    fence: Regex,
    newline_runs: Regex,
    trailing_ws: Regex,
}

fn patterns() -> &'static CleanPatterns {
    static PATTERNS: OnceLock<CleanPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| CleanPatterns {
        bold: Regex::new(r"\*\*(.*?)\*\*").expect("static pattern"),
        italic: Regex::new(r"\*(.*?)\*").expect("static pattern"),
        heading: Regex::new(r"#{1,6}\s+").expect("static pattern"),
        fence: Regex::new(r"```[\s\S]*?```").expect("static pattern"),
        newline_runs: Regex::new(r"\n{3,}").expect("static pattern"),
        trailing_ws: Regex::new(r"[ \t]+\n").expect("static pattern"),
    })
}

/// Normalize a draft into final prose: drop a leading repeat of the
/// subtitle, strip markdown decoration, collapse newline runs, trim
/// trailing whitespace. Applying it twice equals applying it once.
pub(crate) fn clean(content: &str, subtitle: &str) -> String {
    let trimmed = content.trim();
    let text = match trimmed.strip_prefix(subtitle) {
        Some(rest) => rest.trim_start().to_string(),
        None => trimmed.to_string(),
    };

    let p = patterns();
    let text = p.bold.replace_all(&text, "$1").into_owned();
    let text = p.italic.replace_all(&text, "$1").into_owned();
    let text = p.heading.replace_all(&text, "").into_owned();
    let text = p.fence.replace_all(&text, "").into_owned();
    let text = p.newline_runs.replace_all(&text, "\n\n").into_owned();
    let text = p.trailing_ws.replace_all(&text, "\n").into_owned();
    text.trim().to_string()
}
