//! Pipeline agents - planner, retriever, and writer.
//!
//! Each agent is a `Plan -> Plan` transformation. Parallelism lives inside a
//! stage: per-leaf (or per-part) jobs fan out through a bounded pool and the
//! results merge back deterministically by `(part index, leaf index)`, so
//! concurrent completion order never reorders the plan.

mod planner;
mod retriever;
mod strategy;
mod writer;

pub use planner::PlannerAgent;
pub use retriever::RetrieverAgent;
pub use strategy::Strategy;
pub use writer::WriterAgent;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::limiter::RateLimiter;
use crate::llm::LlmClient;
use crate::progress::ProgressTracker;
use crate::retrieval::RetrievalClient;

/// Shared services handed to every agent and cloned into each worker.
///
/// # Thread Safety
/// Everything inside is behind `Arc`; the context itself is cheap to clone.
/// Clients are stateless per call, the limiter and tracker are internally
/// synchronized.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub llm: Arc<dyn LlmClient>,
    pub retrieval: Arc<dyn RetrievalClient>,
    pub limiter: Arc<RateLimiter>,
    pub tracker: Arc<ProgressTracker>,
}

impl PipelineContext {
    pub fn new(
        config: Arc<Config>,
        llm: Arc<dyn LlmClient>,
        retrieval: Arc<dyn RetrievalClient>,
        limiter: Arc<RateLimiter>,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            config,
            llm,
            retrieval,
            limiter,
            tracker,
        }
    }
}

/// Position of a job's result in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub part: usize,
    pub leaf: usize,
}

impl Slot {
    /// Human-readable leaf identifier for logs and failure records.
    pub fn id(&self, subtitle: &str) -> String {
        format!("part {} leaf {} '{}'", self.part, self.leaf, subtitle)
    }
}

/// Fan a set of slot-tagged jobs out through a semaphore-bounded pool and
/// collect `(slot, result)` pairs. A job that panics comes back as `Err`
/// with the panic message; the pool keeps draining.
pub(crate) async fn run_pool<T, F>(
    workers: usize,
    jobs: Vec<(Slot, F)>,
) -> Vec<(Slot, Result<T, String>)>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut slots: HashMap<tokio::task::Id, Slot> = HashMap::new();
    let mut set = JoinSet::new();

    for (slot, job) in jobs {
        let semaphore = Arc::clone(&semaphore);
        let handle = set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("pool semaphore closed");
            (slot, job.await)
        });
        slots.insert(handle.id(), slot);
    }

    let mut results = Vec::with_capacity(slots.len());
    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((_, (slot, value))) => results.push((slot, Ok(value))),
            Err(err) => {
                let slot = *slots.get(&err.id()).expect("slot registered at spawn");
                results.push((slot, Err(err.to_string())));
            }
        }
    }
    results
}

#[cfg(test)]
pub(crate) mod testing {
    //! Context wiring shared by the stage tests.

    use std::sync::Arc;
    use std::time::Duration;

    use super::PipelineContext;
    use crate::config::Config;
    use crate::limiter::RateLimiter;
    use crate::llm::LlmClient;
    use crate::progress::ProgressTracker;
    use crate::retrieval::RetrievalClient;

    pub fn test_context(
        llm: Arc<dyn LlmClient>,
        retrieval: Arc<dyn RetrievalClient>,
    ) -> PipelineContext {
        test_context_with(Config::with_api_key("test"), llm, retrieval)
    }

    pub fn test_context_with(
        config: Config,
        llm: Arc<dyn LlmClient>,
        retrieval: Arc<dyn RetrievalClient>,
    ) -> PipelineContext {
        PipelineContext::new(
            Arc::new(config),
            llm,
            retrieval,
            Arc::new(RateLimiter::new(Duration::ZERO)),
            Arc::new(ProgressTracker::new()),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn pool_returns_every_job_result() {
        let jobs: Vec<_> = (0..7)
            .map(|i| {
                let slot = Slot { part: 0, leaf: i };
                (slot, async move { i * 2 })
            })
            .collect();

        let mut results = run_pool(3, jobs).await;
        results.sort_by_key(|(slot, _)| slot.leaf);

        assert_eq!(results.len(), 7);
        for (slot, value) in results {
            assert_eq!(value.unwrap(), slot.leaf * 2);
        }
    }

    #[tokio::test]
    async fn pool_bounds_concurrency() {
        static RUNNING: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        let jobs: Vec<_> = (0..10)
            .map(|i| {
                let slot = Slot { part: 0, leaf: i };
                (slot, async move {
                    let now = RUNNING.fetch_add(1, Ordering::SeqCst) + 1;
                    PEAK.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    RUNNING.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        run_pool(2, jobs).await;
        assert!(PEAK.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panicking_job_is_reported_not_fatal() {
        async fn job(i: usize) -> usize {
            if i == 1 {
                panic!("worker blew up");
            }
            i
        }

        let jobs = vec![
            (Slot { part: 0, leaf: 0 }, job(0)),
            (Slot { part: 0, leaf: 1 }, job(1)),
        ];

        let mut results = run_pool(2, jobs).await;
        results.sort_by_key(|(slot, _)| slot.leaf);

        assert!(results[0].1.is_ok());
        let err = results[1].1.as_ref().unwrap_err();
        assert!(err.contains("panic"), "unexpected error: {err}");
        assert_eq!(results[1].0, Slot { part: 0, leaf: 1 });
    }
}
