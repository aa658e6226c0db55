use tracing::{debug, info};

use crate::content_id;
use crate::error::PipelineError;
use crate::extractor::FieldExtractor;
use crate::fetch::ContentFetcher;
use crate::lifecycle;
use crate::pipeline::Pipeline;
use crate::recovery;
use crate::types::{Article, BatchSummary, IntakeOutcome};

/// Validate a URL and write it as a queued article.
async fn enqueue<F, X>(
    pipeline: &Pipeline<F, X>,
    account_id: &str,
    url: &str,
) -> Result<Article, PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    let url = url.trim();
    let content_id = content_id::derive(url)?;
    pipeline
        .store()
        .insert_article(Article::queued(account_id, url, &content_id))
        .await
}

/// Accept one URL and start processing it right away.
///
/// The article is written as `Queued` and submitted to the limiter by id;
/// the claim step decides who processes it, exactly as for recovery.
pub async fn submit_article<F, X>(
    pipeline: &Pipeline<F, X>,
    account_id: &str,
    url: &str,
) -> Result<Article, PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    pipeline.store().get_account(account_id).await?;
    let article = enqueue(pipeline, account_id, url).await?;
    info!(article_id = %article.id, url = %article.url, "Article accepted");

    let task = pipeline.clone();
    let article_id = article.id.clone();
    pipeline.spawn_supervised("article", async move {
        lifecycle::run_article(&task, &article_id).await
    });

    Ok(article)
}

/// Accept a batch of URLs. Each URL succeeds or fails on its own; the call
/// returns once every accepted row is written, then starts a recovery scan
/// in the background to process them.
pub async fn submit_batch<F, X>(
    pipeline: &Pipeline<F, X>,
    account_id: &str,
    urls: &[String],
) -> Result<BatchSummary, PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    pipeline.store().get_account(account_id).await?;

    let mut outcomes = Vec::with_capacity(urls.len());
    for url in urls {
        let outcome = match enqueue(pipeline, account_id, url).await {
            Ok(article) => IntakeOutcome::Accepted {
                url: article.url,
                article_id: article.id,
            },
            Err(e) => {
                debug!(url = %url, reason = %e, "URL rejected");
                IntakeOutcome::Rejected {
                    url: url.clone(),
                    reason: e.to_string(),
                }
            }
        };
        outcomes.push(outcome);
    }

    let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
    let summary = BatchSummary {
        total: urls.len(),
        accepted,
        rejected: urls.len() - accepted,
        outcomes,
    };
    info!(
        total = summary.total,
        accepted = summary.accepted,
        rejected = summary.rejected,
        "Batch accepted"
    );

    if accepted > 0 {
        let task = pipeline.clone();
        pipeline.spawn_supervised("resume", async move {
            recovery::resume(&task).await.map(|_| ())
        });
    }

    Ok(summary)
}
