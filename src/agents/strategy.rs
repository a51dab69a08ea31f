//! The closed set of retrieval strategies.
//!
//! Strategies are a fixed enumeration, not a plug-in registry: the reason/act
//! prompt lists the ones not yet tried, the model picks exactly one, and
//! duplicate queries rotate deterministically through the set.

use serde::{Deserialize, Serialize};

/// One of the five prescribed retrieval approaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Core keyword lookup
    Direct,
    /// Keywords expanded with instruction context
    Contextual,
    /// Related concepts rather than literal terms
    Semantic,
    /// Specific cases, data, standards
    Specific,
    /// Synonyms and lateral terms
    Alternative,
}

impl Strategy {
    /// All strategies in their canonical rotation order.
    pub const ALL: [Strategy; 5] = [
        Strategy::Direct,
        Strategy::Contextual,
        Strategy::Semantic,
        Strategy::Specific,
        Strategy::Alternative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Contextual => "contextual",
            Strategy::Semantic => "semantic",
            Strategy::Specific => "specific",
            Strategy::Alternative => "alternative",
        }
    }

    /// Prompt fragment describing the strategy to the model.
    pub fn prompt_hint(&self) -> &'static str {
        match self {
            Strategy::Direct => "search with the core keywords directly",
            Strategy::Contextual => "expand the keywords with context from the writing guidance",
            Strategy::Semantic => "search related concepts instead of the literal terms",
            Strategy::Specific => "search for concrete cases, data and technical standards",
            Strategy::Alternative => "search with synonyms and lateral terms",
        }
    }

    /// Parse a model-provided strategy name, case-insensitively.
    pub fn parse(name: &str) -> Option<Strategy> {
        match name.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(Strategy::Direct),
            "contextual" => Some(Strategy::Contextual),
            "semantic" => Some(Strategy::Semantic),
            "specific" => Some(Strategy::Specific),
            "alternative" => Some(Strategy::Alternative),
            _ => None,
        }
    }

    /// The first strategy in rotation order not yet used; once all five have
    /// been used, cycle from the most recent one.
    pub fn next_unused(used: &[Strategy]) -> Strategy {
        if let Some(fresh) = Self::ALL.iter().find(|s| !used.contains(s)) {
            return *fresh;
        }
        let last = used.last().copied().unwrap_or(Strategy::Direct);
        let pos = Self::ALL.iter().position(|s| *s == last).unwrap_or(0);
        Self::ALL[(pos + 1) % Self::ALL.len()]
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_any_case() {
        assert_eq!(Strategy::parse("direct"), Some(Strategy::Direct));
        assert_eq!(Strategy::parse("  Semantic "), Some(Strategy::Semantic));
        assert_eq!(Strategy::parse("ALTERNATIVE"), Some(Strategy::Alternative));
        assert_eq!(Strategy::parse("clever"), None);
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Strategy::Specific).unwrap();
        assert_eq!(json, r#""specific""#);
        let s: Strategy = serde_json::from_str(r#""contextual""#).unwrap();
        assert_eq!(s, Strategy::Contextual);
    }

    #[test]
    fn next_unused_prefers_fresh_strategies() {
        assert_eq!(Strategy::next_unused(&[]), Strategy::Direct);
        assert_eq!(
            Strategy::next_unused(&[Strategy::Direct]),
            Strategy::Contextual
        );
        assert_eq!(
            Strategy::next_unused(&[Strategy::Direct, Strategy::Semantic]),
            Strategy::Contextual
        );
    }

    #[test]
    fn next_unused_cycles_when_exhausted() {
        let all = Strategy::ALL.to_vec();
        assert_eq!(Strategy::next_unused(&all), Strategy::Direct);

        let mut reordered = all;
        reordered.rotate_left(2); // ends with Contextual
        assert_eq!(Strategy::next_unused(&reordered), Strategy::Semantic);
    }
}
