use tracing::{info, warn};

use crate::error::PipelineError;
use crate::extractor::FieldExtractor;
use crate::fetch::ContentFetcher;
use crate::lifecycle;
use crate::pipeline::Pipeline;
use crate::types::ArticleStatus;

/// Submit every queued article to the limiter, oldest first.
///
/// Slots are taken in creation order and each article is spawned holding
/// its slot, so submission follows the queue. An article that another scan
/// already claimed is skipped at the claim step. Returns how many articles
/// were submitted.
pub async fn resume<F, X>(pipeline: &Pipeline<F, X>) -> Result<usize, PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    let queued = pipeline
        .store()
        .articles_by_status(ArticleStatus::Queued)
        .await?;

    if queued.is_empty() {
        info!("No queued articles to resume");
        return Ok(0);
    }
    info!(count = queued.len(), "Resuming queued articles");

    let mut submitted = 0;
    for article in queued {
        let Some(slot) = pipeline.admit().await else {
            warn!(submitted, "Shutting down; resume stopped early");
            break;
        };

        let task = pipeline.clone();
        pipeline.spawn_supervised("article", async move {
            let _slot = slot;
            lifecycle::process_article(&task, &article.id)
                .await
                .map(|_| ())
        });
        submitted += 1;
    }

    Ok(submitted)
}

/// Startup recovery: requeue work a previous process left in flight, wait
/// for collaborators to settle, then resume.
pub async fn startup<F, X>(pipeline: &Pipeline<F, X>) -> Result<usize, PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    let (requeued, interrupted) = pipeline.store().requeue_orphans().await?;
    if requeued > 0 || interrupted > 0 {
        warn!(
            requeued,
            interrupted, "Recovered work left in flight by a previous run"
        );
    }

    let delay = pipeline.startup_delay();
    tokio::select! {
        _ = pipeline.cancel_token().cancelled() => return Ok(0),
        _ = tokio::time::sleep(delay) => {}
    }

    resume(pipeline).await
}
