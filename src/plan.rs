//! The document plan - the single evolving value that flows between stages.
//!
//! A [`Plan`] is created by the planner, enriched in place by the retriever
//! and the writer, and finally walked by the assembler. Its part and leaf
//! ordering is frozen once the structure phase has returned; later stages
//! only fill in per-leaf fields.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("failed to read plan from {0}: {1}")]
    Read(String, std::io::Error),

    #[error("failed to write plan to {0}: {1}")]
    Write(String, std::io::Error),

    #[error("plan serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Kind of document being produced, classified by the structure phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    #[default]
    Technical,
    UserManual,
    Research,
    Tutorial,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Technical => "technical",
            DocKind::UserManual => "user_manual",
            DocKind::Research => "research",
            DocKind::Tutorial => "tutorial",
        }
    }
}

impl std::fmt::Display for DocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The atomic unit written by the writer; one subheading of the final
/// document.
///
/// # Invariants
/// - `subtitle` is non-empty after the structure phase
/// - `how_to_write` is non-empty after the guidance phase
/// - `quality` stays in `[0.0, 1.0]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    pub subtitle: String,

    /// Writing instructions produced by the planner's guidance phase.
    #[serde(default)]
    pub how_to_write: String,

    /// Consolidated retrieval text; empty when retrieval yielded nothing.
    #[serde(default)]
    pub evidence: String,

    /// Final self-score assigned by the writer.
    #[serde(default)]
    pub quality: f64,

    /// Final content produced by the writer.
    #[serde(default)]
    pub prose: String,
}

impl Leaf {
    pub fn new(subtitle: impl Into<String>) -> Self {
        Self {
            subtitle: subtitle.into(),
            ..Self::default()
        }
    }

    /// Neutral fallback instruction used when the guidance phase could not
    /// produce one for this leaf.
    pub fn default_guide(subtitle: &str) -> String {
        format!(
            "Cover the topic '{}' thoroughly in the context of the overall request. \
             Keep the content professional, accurate and complete, and make sure it \
             serves the role of this subsection within the document.",
            subtitle
        )
    }
}

/// A top-level section of the plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub title: String,

    /// Why this part exists in the document.
    #[serde(default)]
    pub goal: String,

    pub leaves: Vec<Leaf>,
}

/// The tree-shaped document specification that evolves through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// The original user request.
    pub request: String,

    #[serde(default)]
    pub doc_kind: DocKind,

    pub parts: Vec<Part>,
}

impl Plan {
    /// Fallback skeleton used when the structure phase fails after all JSON
    /// retries: a single part with three placeholder leaves.
    pub fn default_skeleton(request: &str) -> Self {
        let leaves = ["Background", "Analysis", "Conclusions"]
            .into_iter()
            .map(Leaf::new)
            .collect();

        Self {
            request: request.to_string(),
            doc_kind: DocKind::default(),
            parts: vec![Part {
                title: "Report Body".to_string(),
                goal: "Present the requested material in a structured form.".to_string(),
                leaves,
            }],
        }
    }

    /// Total number of leaves across all parts.
    pub fn leaf_count(&self) -> usize {
        self.parts.iter().map(|p| p.leaves.len()).sum()
    }

    /// Check the structural invariants: non-empty parts, each with non-empty
    /// leaves, each leaf with a non-empty subtitle.
    pub fn is_structurally_valid(&self) -> bool {
        !self.parts.is_empty()
            && self.parts.iter().all(|p| {
                !p.title.trim().is_empty()
                    && !p.leaves.is_empty()
                    && p.leaves.iter().all(|l| !l.subtitle.trim().is_empty())
            })
    }

    /// True when every leaf already carries writing instructions, e.g. a
    /// complete template recovered from the retrieval service.
    pub fn has_complete_guidance(&self) -> bool {
        self.parts
            .iter()
            .flat_map(|p| &p.leaves)
            .all(|l| !l.how_to_write.trim().is_empty())
    }

    /// Iterate `(part index, leaf index, leaf)` in stored order.
    pub fn leaves(&self) -> impl Iterator<Item = (usize, usize, &Leaf)> {
        self.parts.iter().enumerate().flat_map(|(pi, part)| {
            part.leaves
                .iter()
                .enumerate()
                .map(move |(li, leaf)| (pi, li, leaf))
        })
    }

    /// Persist the plan as pretty-printed JSON, mirroring the in-memory
    /// structure field for field.
    pub fn save(&self, path: &Path) -> Result<(), PlanError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| PlanError::Write(path.display().to_string(), e))
    }

    /// Load a previously persisted plan.
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| PlanError::Read(path.display().to_string(), e))?;
        Ok(serde_json::from_str(&json)?)
    }
}
