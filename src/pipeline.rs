use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::config::{AppConfig, ExtractionConfig, RetryPolicy};
use crate::coordinator::StoreHandle;
use crate::error::PipelineError;
use crate::extractor::FieldExtractor;
use crate::fetch::ContentFetcher;
use crate::limiter::{SlotGuard, TaskLimiter};

/// Shared context for every entry point that creates pipeline work.
///
/// Clones share one limiter, one shutdown token and one task tracker, so
/// intake, recovery and the extraction API all count against the same
/// slots.
pub struct Pipeline<F, X> {
    inner: Arc<Inner<F, X>>,
}

struct Inner<F, X> {
    store: StoreHandle,
    limiter: TaskLimiter,
    fetcher: F,
    extractor: X,
    retry: RetryPolicy,
    extraction: ExtractionConfig,
    startup_delay: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl<F, X> Clone for Pipeline<F, X> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F, X> Pipeline<F, X>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    pub fn new(store: StoreHandle, fetcher: F, extractor: X, config: &AppConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                limiter: TaskLimiter::new(config.pipeline.max_concurrent.max(1) as usize),
                fetcher,
                extractor,
                retry: config.fetch.retry_policy(),
                extraction: config.extraction.clone(),
                startup_delay: Duration::from_secs(config.pipeline.startup_resume_delay_secs),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    pub fn limiter(&self) -> &TaskLimiter {
        &self.inner.limiter
    }

    pub fn fetcher(&self) -> &F {
        &self.inner.fetcher
    }

    pub fn extractor(&self) -> &X {
        &self.inner.extractor
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    pub fn extraction_config(&self) -> &ExtractionConfig {
        &self.inner.extraction
    }

    pub fn startup_delay(&self) -> Duration {
        self.inner.startup_delay
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Wait for a limiter slot. Returns `None` once shutdown has begun, so
    /// no new unit of work is admitted after that point.
    pub async fn admit(&self) -> Option<SlotGuard> {
        if self.is_shutting_down() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => None,
            slot = self.inner.limiter.acquire() => Some(slot),
        }
    }

    /// Run a background unit of work. Errors are logged here and never reach
    /// the caller that started the task.
    pub fn spawn_supervised<Fut>(&self, task: &'static str, work: Fut)
    where
        Fut: Future<Output = Result<(), PipelineError>> + Send + 'static,
    {
        self.inner.tracker.spawn(async move {
            match work.await {
                Ok(()) => debug!(task, "Background task finished"),
                Err(e) => error!(task, error = %e, "Background task failed"),
            }
        });
    }

    /// Wait until every background task spawned so far, and everything
    /// those tasks spawn in turn, has finished.
    pub async fn wait_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Stop admitting work and wait for running units to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}
