//! Planner agent - turns a request into a complete plan.
//!
//! Two-phase generation: one call designs the outline, then one call per
//! part produces writing guidance for that part's leaves. Before touching
//! the model at all, the planner asks the retrieval service whether a
//! ready-made outline template exists for this kind of request.
//!
//! Neither phase can abort the pipeline: a failed structure phase degrades
//! to a default skeleton, a failed guidance call degrades that part's
//! leaves to a neutral instruction.

use std::collections::HashMap;

use serde::Deserialize;

use crate::agents::{run_pool, PipelineContext, Slot};
use crate::llm::{complete_json, extract_json, ChatMessage, ChatOptions};
use crate::plan::{DocKind, Leaf, Part, Plan};
use crate::progress::Stage;

const STRUCTURE_SCHEMA: &str = r#"{"doc_kind": "technical|user_manual|research|tutorial", "parts": [{"title": str, "goal": str, "leaves": [{"subtitle": str}]}]}"#;
const GUIDES_SCHEMA: &str = r#"{"guides": [{"subtitle": str, "how_to_write": str}]}"#;

/// Outline shape returned by the structure phase (and by outline templates
/// recovered from retrieval, which may already carry guidance).
#[derive(Debug, Deserialize)]
struct StructureDraft {
    #[serde(default)]
    doc_kind: Option<DocKind>,
    parts: Vec<PartDraft>,
}

#[derive(Debug, Deserialize)]
struct PartDraft {
    title: String,
    #[serde(default)]
    goal: String,
    leaves: Vec<LeafDraft>,
}

#[derive(Debug, Deserialize)]
struct LeafDraft {
    subtitle: String,
    #[serde(default)]
    how_to_write: Option<String>,
}

impl StructureDraft {
    fn into_plan(self, request: &str) -> Plan {
        Plan {
            request: request.to_string(),
            doc_kind: self.doc_kind.unwrap_or_default(),
            parts: self
                .parts
                .into_iter()
                .map(|p| Part {
                    title: p.title,
                    goal: p.goal,
                    leaves: p
                        .leaves
                        .into_iter()
                        .map(|l| Leaf {
                            subtitle: l.subtitle,
                            how_to_write: l.how_to_write.unwrap_or_default(),
                            ..Leaf::default()
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Guidance sheet returned per part.
#[derive(Debug, Deserialize)]
struct GuideSheet {
    guides: Vec<Guide>,
}

#[derive(Debug, Deserialize)]
struct Guide {
    subtitle: String,
    how_to_write: String,
}

/// Turns the user request into a plan with every leaf's writing guidance
/// populated.
pub struct PlannerAgent {
    ctx: PipelineContext,
}

impl PlannerAgent {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Produce the full plan. Never fails; every failure mode degrades.
    pub async fn plan(&self, request: &str) -> Plan {
        let mut plan = match self.lookup_template(request).await {
            Some(template) => template,
            None => self.structure_phase(request).await,
        };

        if plan.has_complete_guidance() {
            tracing::info!(
                parts = plan.parts.len(),
                leaves = plan.leaf_count(),
                "plan already carries complete guidance"
            );
            return plan;
        }

        self.guidance_phase(&mut plan).await;
        plan
    }

    /// Ask the retrieval service for an existing outline template. A snippet
    /// that parses as a structurally valid outline short-circuits the
    /// structure phase; anything else falls through silently.
    async fn lookup_template(&self, request: &str) -> Option<Plan> {
        let query = format!("document outline template {request}");
        let snippets = self.ctx.retrieval.search(&query).await;
        self.ctx.tracker.record_retrieval(snippets.len());

        for snippet in snippets.iter().take(3) {
            let Ok(draft) = serde_json::from_str::<StructureDraft>(&extract_json(&snippet.text))
            else {
                continue;
            };
            let plan = draft.into_plan(request);
            if plan.is_structurally_valid() {
                tracing::info!(
                    parts = plan.parts.len(),
                    leaves = plan.leaf_count(),
                    complete = plan.has_complete_guidance(),
                    "reusing outline template from retrieval"
                );
                return Some(plan);
            }
        }
        None
    }

    async fn structure_phase(&self, request: &str) -> Plan {
        let messages = [
            ChatMessage::system(
                "You are a precise document planner. Respond only with JSON.",
            ),
            ChatMessage::user(structure_prompt(request)),
        ];

        match complete_json::<StructureDraft>(
            self.ctx.llm.as_ref(),
            &messages,
            STRUCTURE_SCHEMA,
            ChatOptions::default(),
        )
        .await
        {
            Ok(draft) => {
                let plan = draft.into_plan(request);
                if plan.is_structurally_valid() {
                    tracing::info!(
                        doc_kind = %plan.doc_kind,
                        parts = plan.parts.len(),
                        leaves = plan.leaf_count(),
                        "document structure generated"
                    );
                    plan
                } else {
                    self.ctx.tracker.record_failure(
                        Stage::Planner,
                        "structure",
                        "model returned an empty or invalid outline",
                    );
                    Plan::default_skeleton(request)
                }
            }
            Err(e) => {
                self.ctx
                    .tracker
                    .record_failure(Stage::Planner, "structure", e.to_string());
                Plan::default_skeleton(request)
            }
        }
    }

    /// Fill `how_to_write` for every leaf, one call per part, in parallel.
    async fn guidance_phase(&self, plan: &mut Plan) {
        let total = plan.parts.len();
        let request = plan.request.clone();

        let jobs: Vec<_> = plan
            .parts
            .iter()
            .cloned()
            .enumerate()
            .map(|(pi, part)| {
                let slot = Slot { part: pi, leaf: 0 };
                let ctx = self.ctx.clone();
                let request = request.clone();
                (slot, guide_part(ctx, request, part, pi))
            })
            .collect();

        let results = run_pool(self.ctx.config.planner.workers, jobs).await;

        for (slot, outcome) in results {
            match outcome {
                Ok(part) => {
                    plan.parts[slot.part] = part;
                    self.ctx.tracker.part_planned(slot.part, total);
                }
                Err(reason) => {
                    // FatalInternal inside a guidance worker: keep the part,
                    // fall back to default instructions.
                    let part = &mut plan.parts[slot.part];
                    self.ctx.tracker.record_failure(
                        Stage::Planner,
                        format!("part {} '{}'", slot.part, part.title),
                        reason,
                    );
                    apply_default_guides(part);
                }
            }
        }
    }
}

/// Guidance worker for one part. Always returns the part, guided or
/// defaulted.
async fn guide_part(ctx: PipelineContext, request: String, mut part: Part, pi: usize) -> Part {
    if part
        .leaves
        .iter()
        .all(|l| !l.how_to_write.trim().is_empty())
    {
        return part;
    }

    let messages = [
        ChatMessage::system("You are a professional writing coach. Respond only with JSON."),
        ChatMessage::user(guidance_prompt(&request, &part)),
    ];

    match complete_json::<GuideSheet>(
        ctx.llm.as_ref(),
        &messages,
        GUIDES_SCHEMA,
        ChatOptions::default(),
    )
    .await
    {
        Ok(sheet) => {
            let by_subtitle: HashMap<String, String> = sheet
                .guides
                .into_iter()
                .map(|g| (g.subtitle, g.how_to_write))
                .collect();

            let mut matched = 0usize;
            for leaf in &mut part.leaves {
                match by_subtitle.get(&leaf.subtitle) {
                    Some(guide) if !guide.trim().is_empty() => {
                        leaf.how_to_write = guide.clone();
                        matched += 1;
                    }
                    _ => {
                        tracing::warn!(
                            part = pi,
                            subtitle = %leaf.subtitle,
                            "no guidance returned for leaf, using default"
                        );
                        leaf.how_to_write = Leaf::default_guide(&leaf.subtitle);
                    }
                }
            }
            tracing::debug!(part = pi, matched, total = part.leaves.len(), "guides merged");
        }
        Err(e) => {
            ctx.tracker.record_failure(
                Stage::Planner,
                format!("part {} '{}'", pi, part.title),
                e.to_string(),
            );
            apply_default_guides(&mut part);
        }
    }

    part
}

fn apply_default_guides(part: &mut Part) {
    for leaf in &mut part.leaves {
        if leaf.how_to_write.trim().is_empty() {
            leaf.how_to_write = Leaf::default_guide(&leaf.subtitle);
        }
    }
}

fn structure_prompt(request: &str) -> String {
    format!(
        r#"A user needs the following document:

{request}

First classify the document as one of: technical, user_manual, research, tutorial.
Then design the complete outline: top-level parts, each with a goal explaining its
role in the document, and a set of subsections. Be thorough - every relevant aspect
of the request should have a subsection.

Return ONE JSON object, nothing else:

{{
  "doc_kind": "technical",
  "parts": [
    {{
      "title": "Part title",
      "goal": "What this part contributes to the document",
      "leaves": [
        {{"subtitle": "Subsection heading"}},
        {{"subtitle": "Another subsection heading"}}
      ]
    }}
  ]
}}"#
    )
}

fn guidance_prompt(request: &str, part: &Part) -> String {
    let subtitles: Vec<String> = part
        .leaves
        .iter()
        .map(|l| format!("- {}", l.subtitle))
        .collect();

    format!(
        r#"Overall request: {request}

Current part: {title}
Part goal: {goal}

Provide writing guidance for each of the following subsections:
{subtitles}

For each subsection tell the author the core content to cover, the key facts
required, and what to watch out for - 100 to 200 characters of plain text per
subsection.

Return ONE JSON object, nothing else:

{{"guides": [{{"subtitle": "exact subsection heading", "how_to_write": "the guidance"}}]}}

The subtitle values must match the input headings exactly."#,
        title = part.title,
        goal = part.goal,
        subtitles = subtitles.join("\n"),
    )
}
