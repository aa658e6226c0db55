use tracing::{debug, error, info, warn};

use crate::coordinator::StoreHandle;
use crate::error::PipelineError;
use crate::extractor::FieldExtractor;
use crate::fetch::{fetch_with_retry, ContentFetcher};
use crate::orchestrator;
use crate::pipeline::Pipeline;
use crate::types::{Article, ExtractionOutcome};

/// Wait for a slot, then drive the article through its lifecycle.
pub async fn run_article<F, X>(pipeline: &Pipeline<F, X>, article_id: &str) -> Result<(), PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    let Some(_slot) = pipeline.admit().await else {
        debug!(article_id, "Shutting down; article left queued");
        return Ok(());
    };
    process_article(pipeline, article_id).await.map(|_| ())
}

/// Drive one queued article to a terminal state. The caller holds the slot.
///
/// 1. Claim `Queued -> Downloading`; a lost claim means someone else owns it.
/// 2. Fetch with retries. Failure ends the article in `Error`.
/// 3. Store the content and move to `Extracting`.
/// 4. Run every locked template in order; a template's failure is logged
///    and does not affect the others or the article.
/// 5. Recount results and move to `Completed`.
///
/// Once claimed, any failure of steps 2 to 5 ends the article in `Error`.
/// Returns the final article, or `None` if the claim was lost.
pub async fn process_article<F, X>(
    pipeline: &Pipeline<F, X>,
    article_id: &str,
) -> Result<Option<Article>, PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    let store = pipeline.store();

    if pipeline.is_shutting_down() {
        debug!(article_id, "Shutting down; article left queued");
        return Ok(None);
    }

    if !store.claim_article(article_id).await? {
        debug!(article_id, "Article already claimed; skipping");
        return Ok(None);
    }

    let outcome = drive_claimed(pipeline, article_id).await;
    settle(store, article_id, outcome).await.map(Some)
}

/// Turn a failed run of a claimed article into a persisted `Error` status.
/// If even that write fails, the original error is returned and the next
/// startup requeues the article.
async fn settle(
    store: &StoreHandle,
    article_id: &str,
    outcome: Result<Article, PipelineError>,
) -> Result<Article, PipelineError> {
    let e = match outcome {
        Ok(article) => return Ok(article),
        Err(e) => e,
    };
    match store.fail_article(article_id, &e.to_string()).await {
        Ok(article) => Ok(article),
        Err(fail_err) => {
            error!(article_id, error = %e, fail_error = %fail_err, "Could not mark article as error");
            Err(e)
        }
    }
}

/// Steps 2 to 5 for an article this process has claimed.
async fn drive_claimed<F, X>(
    pipeline: &Pipeline<F, X>,
    article_id: &str,
) -> Result<Article, PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    let store = pipeline.store();

    let article = store.get_article(article_id).await?;
    info!(article_id, url = %article.url, "Downloading article");

    let fetched = fetch_with_retry(pipeline.fetcher(), &article.url, pipeline.retry_policy())
        .await
        .inspect_err(|e| warn!(article_id, error = %e, "Download failed; marking article as error"))?;

    let article = store
        .record_download(article_id, fetched)
        .await
        .inspect_err(|e| error!(article_id, error = %e, "Failed to record download"))?;
    info!(article_id, title = ?article.title, "Article downloaded; extracting");

    let templates = store
        .locked_templates(&article.account_id)
        .await
        .inspect_err(|e| error!(article_id, error = %e, "Failed to load templates"))?;
    if templates.is_empty() {
        debug!(article_id, "No locked templates for account");
    }

    for template in &templates {
        match orchestrator::extract_inline(pipeline, &article, template).await {
            Ok(ExtractionOutcome::Extracted { batch_id, records }) => {
                info!(article_id, template_id = %template.id, %batch_id, records, "Extraction stored");
            }
            Ok(ExtractionOutcome::Empty) => {
                info!(article_id, template_id = %template.id, "Extraction returned no records");
            }
            Ok(ExtractionOutcome::Skipped) => {
                debug!(article_id, template_id = %template.id, "Already extracted; skipping");
            }
            Ok(ExtractionOutcome::Failed(message)) => {
                warn!(article_id, template_id = %template.id, error = %message, "Extraction failed");
            }
            Err(e) => {
                warn!(article_id, template_id = %template.id, error = %e, "Extraction failed");
            }
        }
    }

    let article = store
        .finish_article(article_id)
        .await
        .inspect_err(|e| error!(article_id, error = %e, "Failed to complete article"))?;
    info!(
        article_id,
        extraction_count = article.extraction_count,
        "Article completed"
    );
    Ok(article)
}
