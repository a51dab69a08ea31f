//! Retrieval client - best-effort keyword search against an external
//! service.
//!
//! Retrieval is advisory: the pipeline must make progress even when the
//! service is down or degraded, so `search` never fails - every error path
//! logs and returns an empty result.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;

/// A text fragment returned by the retrieval service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Snippet {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
            score: None,
        }
    }
}

/// Trait for retrieval backends.
///
/// # Contract
/// - `search` never fails; degraded service yields an empty vector.
/// - Snippets come back verbatim, unranked and untruncated.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    async fn search(&self, keywords: &str) -> Vec<Snippet>;
}

/// HTTP retrieval client: GET with a `query` parameter, JSON response with
/// snippets at `results[].content`.
pub struct HttpRetrievalClient {
    client: Client,
    url: String,
}

impl HttpRetrievalClient {
    pub fn new(config: &RetrievalConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl RetrievalClient for HttpRetrievalClient {
    async fn search(&self, keywords: &str) -> Vec<Snippet> {
        let response = match self
            .client
            .get(&self.url)
            .query(&[("query", keywords)])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval request failed");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "retrieval returned non-success");
            return Vec::new();
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read retrieval body");
                return Vec::new();
            }
        };

        parse_results(&body)
    }
}

/// Extract snippets from a response body. Any shape other than
/// `{"results": [{"content": ...}]}` yields no snippets.
fn parse_results(body: &str) -> Vec<Snippet> {
    let parsed: SearchResponse = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "retrieval response was not the expected shape");
            return Vec::new();
        }
    };

    parsed
        .results
        .into_iter()
        .filter(|r| !r.content.is_empty())
        .map(|r| Snippet {
            text: r.content,
            source: r.source,
            score: r.score,
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    content: String,

    #[serde(default)]
    source: Option<String>,

    #[serde(default)]
    score: Option<f64>,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned retrieval backends for stage tests.

    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Returns the same snippets for every query.
    pub struct StaticRetrieval {
        snippets: Vec<Snippet>,
        pub queries: Mutex<Vec<String>>,
        pub calls: AtomicU64,
    }

    impl StaticRetrieval {
        pub fn new(snippets: Vec<Snippet>) -> Self {
            Self {
                snippets,
                queries: Mutex::new(Vec::new()),
                calls: AtomicU64::new(0),
            }
        }

        pub fn empty() -> Self {
            Self::new(Vec::new())
        }

        pub fn call_count(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl RetrievalClient for StaticRetrieval {
        async fn search(&self, keywords: &str) -> Vec<Snippet> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.queries.lock().unwrap().push(keywords.to_string());
            self.snippets.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_expected_shape() {
        let body = r#"{
            "results": [
                {"content": "first", "source": "doc-1", "score": 0.9},
                {"content": "second"}
            ]
        }"#;
        let snippets = parse_results(body);
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].text, "first");
        assert_eq!(snippets[0].source.as_deref(), Some("doc-1"));
        assert_eq!(snippets[1].score, None);
    }

    #[test]
    fn empty_content_is_dropped() {
        let body = r#"{"results": [{"content": ""}, {"content": "keep"}]}"#;
        let snippets = parse_results(body);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].text, "keep");
    }

    #[test]
    fn unexpected_shapes_yield_nothing() {
        assert!(parse_results("[1, 2, 3]").is_empty());
        assert!(parse_results(r#"{"items": []}"#).is_empty());
        assert!(parse_results("not json").is_empty());
    }
}
