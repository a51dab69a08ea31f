//! # reportsmith
//!
//! A multi-agent pipeline that turns a free-form request into a long,
//! structured technical report.
//!
//! ## Architecture
//!
//! ```text
//!  request
//!     │
//!     ▼
//!  ┌─────────┐    ┌───────────┐    ┌─────────┐    ┌───────────┐
//!  │ Planner │ ─▶ │ Retriever │ ─▶ │ Writer  │ ─▶ │ Assembler │ ─▶ document
//!  └─────────┘    └───────────┘    └─────────┘    └───────────┘
//!       structure +    per-leaf         per-leaf
//!       guidance       reason/act/      draft/score/
//!                      observe/reflect  redraft
//! ```
//!
//! Stages run strictly in sequence and each one enriches the same evolving
//! [`plan::Plan`]; parallelism lives inside a stage as a bounded per-leaf
//! worker pool. One process-wide [`limiter::RateLimiter`] spaces every
//! outbound LLM call and one [`progress::ProgressTracker`] collects
//! counters, per-leaf events and the end-of-run summary.
//!
//! ## Modules
//! - `agents`: the planner, retriever and writer stages
//! - `llm`: chat-completion client trait, OpenRouter implementation, JSON
//!   parsing policy
//! - `retrieval`: best-effort snippet search client
//! - `pipeline`: sequential stage driver and artifact persistence

pub mod agents;
pub mod assemble;
pub mod cli;
pub mod config;
pub mod limiter;
pub mod llm;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod retrieval;

pub use config::Config;
pub use pipeline::{Pipeline, RunArtifacts};
pub use plan::{DocKind, Leaf, Part, Plan};
