//! Assembler - renders the enriched plan into the final document.

use crate::plan::Plan;

/// Marker rendered for a leaf whose prose never materialized.
const MISSING_CONTENT: &str = "*[content not generated]*";

/// Walk the plan in stored order and emit the document: a top-level heading
/// and goal paragraph per part, a second-level heading and prose per leaf.
pub fn assemble(plan: &Plan) -> String {
    let mut lines: Vec<String> = Vec::new();

    for part in &plan.parts {
        lines.push(format!("# {}", part.title));
        lines.push(String::new());

        if !part.goal.is_empty() {
            lines.push(part.goal.clone());
            lines.push(String::new());
        }

        for leaf in &part.leaves {
            lines.push(format!("## {}", leaf.subtitle));
            lines.push(String::new());
            if leaf.prose.is_empty() {
                lines.push(MISSING_CONTENT.to_string());
            } else {
                lines.push(leaf.prose.clone());
            }
            lines.push(String::new());
        }
    }

    let mut document = lines.join("\n");
    document.push('\n');
    document
}
