//! Configuration management for the pipeline.
//!
//! Configuration is read from environment variables, all optional except the
//! API key:
//! - `OPENROUTER_API_KEY` - Required. API key for the chat-completions endpoint.
//! - `LLM_BASE_URL` - Endpoint base. Defaults to `https://openrouter.ai/api/v1`.
//! - `LLM_MODEL` - Model identifier. Defaults to `google/gemini-2.5-flash`.
//! - `LLM_MAX_TOKENS` / `LLM_TEMPERATURE` / `LLM_TIMEOUT_S` / `LLM_MAX_RETRIES`
//! - `RATE_LIMIT_SPACING_S` - Minimum seconds between LLM calls. Defaults to `4`.
//! - `RETRIEVAL_URL` / `RETRIEVAL_TIMEOUT_S` / `RETRIEVAL_DEDUP_PREFIX`
//! - `PLANNER_WORKERS`
//! - `RETRIEVER_WORKERS` / `RETRIEVER_MAX_ITERATIONS` /
//!   `RETRIEVER_QUALITY_THRESHOLD` / `RETRIEVER_LOW_SCORE_GUARD` /
//!   `RETRIEVER_TOP_K`
//! - `WRITER_WORKERS` / `WRITER_MAX_ATTEMPTS` / `WRITER_QUALITY_THRESHOLD` /
//!   `WRITER_REJECT_OVERFLOW_SCORE`
//! - `OUTPUT_DIR` - Artifact root. Defaults to `outputs`.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// LLM endpoint configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API key for the chat-completions endpoint
    pub api_key: String,

    /// Endpoint base URL (OpenRouter-compatible)
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Per-call output token cap
    pub max_tokens: u64,

    /// Sampling temperature
    pub temperature: f64,

    /// Per-call timeout in seconds
    pub timeout_s: u64,

    /// Retry attempts on transient failures
    pub max_retries: u32,
}

/// Retrieval endpoint configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub url: String,

    /// Per-call timeout in seconds
    pub timeout_s: u64,

    /// Snippet dedup key length in bytes; `None` dedups on the full text
    pub dedup_prefix: Option<usize>,
}

/// Planner stage configuration.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Guidance-phase worker pool size
    pub workers: usize,
}

/// Retriever stage configuration.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Per-leaf worker pool size
    pub workers: usize,

    /// Iteration budget per leaf
    pub max_iterations: usize,

    /// Early-exit score for the reflect step
    pub quality_threshold: f64,

    /// Two consecutive scores below this abort the leaf's loop
    pub low_score_guard: f64,

    /// Snippets taken from the best iteration when synthesizing evidence
    pub top_k: usize,
}

/// Writer stage configuration.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Per-leaf worker pool size
    pub workers: usize,

    /// Draft attempt budget per leaf
    pub max_attempts: usize,

    /// Accept score for a draft
    pub quality_threshold: f64,

    /// Treat evaluation scores above 100 as malformed instead of clamping
    pub reject_overflow_score: bool,
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub planner: PlannerConfig,
    pub retriever: RetrieverConfig,
    pub writer: WriterConfig,

    /// Minimum seconds between outbound LLM calls, process-wide
    pub rate_spacing_s: f64,

    /// Root directory for run artifacts
    pub output_dir: PathBuf,
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not
    /// set, or `ConfigError::InvalidValue` for unparseable overrides. Either
    /// is fatal before the pipeline starts.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let llm = LlmConfig {
            api_key,
            base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
            model: std::env::var("LLM_MODEL")
                .unwrap_or_else(|_| "google/gemini-2.5-flash".to_string()),
            max_tokens: env_or("LLM_MAX_TOKENS", 10_000)?,
            temperature: env_or("LLM_TEMPERATURE", 0.3)?,
            timeout_s: env_or("LLM_TIMEOUT_S", 60)?,
            max_retries: env_or("LLM_MAX_RETRIES", 3)?,
        };

        let retrieval = RetrievalConfig {
            url: std::env::var("RETRIEVAL_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000/search".to_string()),
            timeout_s: env_or("RETRIEVAL_TIMEOUT_S", 30)?,
            dedup_prefix: match std::env::var("RETRIEVAL_DEDUP_PREFIX") {
                Ok(raw) => Some(raw.parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::InvalidValue("RETRIEVAL_DEDUP_PREFIX".to_string(), e.to_string())
                })?),
                Err(_) => None,
            },
        };

        Ok(Self {
            llm,
            retrieval,
            planner: PlannerConfig {
                workers: env_or("PLANNER_WORKERS", 1)?,
            },
            retriever: RetrieverConfig {
                workers: env_or("RETRIEVER_WORKERS", 5)?,
                max_iterations: env_or("RETRIEVER_MAX_ITERATIONS", 3)?,
                quality_threshold: env_or("RETRIEVER_QUALITY_THRESHOLD", 0.7)?,
                low_score_guard: env_or("RETRIEVER_LOW_SCORE_GUARD", 0.3)?,
                top_k: env_or("RETRIEVER_TOP_K", 5)?,
            },
            writer: WriterConfig {
                workers: env_or("WRITER_WORKERS", 3)?,
                max_attempts: env_or("WRITER_MAX_ATTEMPTS", 3)?,
                quality_threshold: env_or("WRITER_QUALITY_THRESHOLD", 0.7)?,
                reject_overflow_score: env_or("WRITER_REJECT_OVERFLOW_SCORE", false)?,
            },
            rate_spacing_s: env_or("RATE_LIMIT_SPACING_S", 4.0)?,
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("outputs")),
        })
    }

    /// Create a config with defaults and a given API key (useful for
    /// testing).
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            llm: LlmConfig {
                api_key: api_key.into(),
                base_url: "https://openrouter.ai/api/v1".to_string(),
                model: "google/gemini-2.5-flash".to_string(),
                max_tokens: 10_000,
                temperature: 0.3,
                timeout_s: 60,
                max_retries: 3,
            },
            retrieval: RetrievalConfig {
                url: "http://127.0.0.1:8000/search".to_string(),
                timeout_s: 30,
                dedup_prefix: None,
            },
            planner: PlannerConfig { workers: 1 },
            retriever: RetrieverConfig {
                workers: 5,
                max_iterations: 3,
                quality_threshold: 0.7,
                low_score_guard: 0.3,
                top_k: 5,
            },
            writer: WriterConfig {
                workers: 3,
                max_attempts: 3,
                quality_threshold: 0.7,
                reject_overflow_score: false,
            },
            rate_spacing_s: 4.0,
            output_dir: PathBuf::from("outputs"),
        }
    }
}
