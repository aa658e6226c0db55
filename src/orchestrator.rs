use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::extractor::FieldExtractor;
use crate::fetch::ContentFetcher;
use crate::pipeline::Pipeline;
use crate::store::PlaceholderClaim;
use crate::types::{
    Article, DimensionTemplate, DispatchStatus, ExtractAllSummary, ExtractionOutcome,
    ExtractionRequest, ExtractionResult, ExtractionStatus, TemplateDispatch,
};

fn build_request(
    article: &Article,
    template: &DimensionTemplate,
) -> Result<ExtractionRequest, PipelineError> {
    let content = article
        .extraction_content()
        .ok_or_else(|| PipelineError::ArticleNotReady {
            article_id: article.id.clone(),
            status: article.status,
        })?;
    Ok(ExtractionRequest {
        content,
        fields: template.fields.clone(),
        model_preference: template.model_preference,
        custom_prompt: template.custom_prompt.clone(),
    })
}

/// Extract one (article, template) pair inside the caller's slot, without a
/// placeholder. Used by the lifecycle driver.
///
/// Skips pairs that already have a completed or running extraction. A
/// collaborator failure leaves nothing behind and comes back as
/// `ExtractionOutcome::Failed`.
pub async fn extract_inline<F, X>(
    pipeline: &Pipeline<F, X>,
    article: &Article,
    template: &DimensionTemplate,
) -> Result<ExtractionOutcome, PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    let store = pipeline.store();

    if let Some(ExtractionStatus::Completed | ExtractionStatus::Extracting) =
        store.pair_status(&article.id, &template.id).await?
    {
        return Ok(ExtractionOutcome::Skipped);
    }

    let request = build_request(article, template)?;
    let response = match pipeline.extractor().extract(&request).await {
        Ok(response) => response,
        Err(e) => return Ok(ExtractionOutcome::Failed(e.to_string())),
    };

    if response.records.is_empty() {
        return Ok(ExtractionOutcome::Empty);
    }

    match store
        .commit_batch(&article.id, &template.id, None, response)
        .await
    {
        Ok(rows) => Ok(ExtractionOutcome::Extracted {
            batch_id: rows
                .first()
                .map(|r| r.batch_id.clone())
                .unwrap_or_default(),
            records: rows.len(),
        }),
        Err(PipelineError::AlreadyExtracted { .. }) => Ok(ExtractionOutcome::Skipped),
        Err(e) => Err(e),
    }
}

/// Check that `template` may be used on `article` from the extraction API.
fn check_api_preconditions(
    article: &Article,
    template: &DimensionTemplate,
) -> Result<(), PipelineError> {
    if template.account_id != article.account_id {
        return Err(PipelineError::AccountMismatch {
            article_id: article.id.clone(),
            template_id: template.id.clone(),
        });
    }
    if !template.is_active {
        return Err(PipelineError::TemplateNotFound(template.id.clone()));
    }
    if !template.is_locked {
        return Err(PipelineError::TemplateNotLocked(template.id.clone()));
    }
    Ok(())
}

/// Open a placeholder for the pair and start the extraction in the
/// background. Returns immediately with the placeholder, or the status of
/// the row that blocked it.
async fn start_placeholder<F, X>(
    pipeline: &Pipeline<F, X>,
    article: &Article,
    template: &DimensionTemplate,
) -> Result<PlaceholderClaim, PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    let request = build_request(article, template)?;
    let model = pipeline
        .extraction_config()
        .model_id(template.model_preference)
        .to_string();

    let claim = pipeline
        .store()
        .begin_placeholder(&article.id, &template.id, &model)
        .await?;

    match &claim {
        PlaceholderClaim::Created(placeholder) => {
            let task = pipeline.clone();
            let article_id = article.id.clone();
            let template_id = template.id.clone();
            let placeholder_id = placeholder.id.clone();
            pipeline.spawn_supervised("extraction", async move {
                run_placeholder(&task, &article_id, &template_id, &placeholder_id, request).await
            });
        }
        PlaceholderClaim::Blocked(existing) => {
            debug!(article_id = %article.id, template_id = %template.id, %existing, "Extraction skipped");
        }
    }

    Ok(claim)
}

/// Background half of a placeholder-based extraction.
///
/// Failure marks the placeholder `failed`; zero records delete it; records
/// replace it with one completed row per record under a fresh batch id.
async fn run_placeholder<F, X>(
    pipeline: &Pipeline<F, X>,
    article_id: &str,
    template_id: &str,
    placeholder_id: &str,
    request: ExtractionRequest,
) -> Result<(), PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    let store = pipeline.store();

    let Some(_slot) = pipeline.admit().await else {
        return mark_failed(pipeline, placeholder_id, "cancelled before extraction started").await;
    };

    let response = match pipeline.extractor().extract(&request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(article_id, template_id, error = %e, "Extraction failed");
            return mark_failed(pipeline, placeholder_id, &e.to_string()).await;
        }
    };

    if response.records.is_empty() {
        info!(article_id, template_id, "Extraction returned no records");
        store.discard_placeholder(placeholder_id).await?;
        return Ok(());
    }

    match store
        .commit_batch(article_id, template_id, Some(placeholder_id), response)
        .await
    {
        Ok(rows) => {
            info!(article_id, template_id, records = rows.len(), "Extraction stored");
            Ok(())
        }
        Err(PipelineError::AlreadyExtracted { .. }) => {
            debug!(article_id, template_id, "Pair completed elsewhere; discarding placeholder");
            store.discard_placeholder(placeholder_id).await?;
            Ok(())
        }
        Err(e) => {
            mark_failed(pipeline, placeholder_id, &e.to_string()).await?;
            Err(e)
        }
    }
}

/// Mark a placeholder `failed`. A placeholder that is already gone was
/// replaced by a completed batch from another path, which wins.
async fn mark_failed<F, X>(
    pipeline: &Pipeline<F, X>,
    placeholder_id: &str,
    message: &str,
) -> Result<(), PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    match pipeline.store().fail_placeholder(placeholder_id, message).await {
        Ok(_) => Ok(()),
        Err(PipelineError::ResultNotFound(_)) => {
            debug!(placeholder_id, "Placeholder already replaced; nothing to mark");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Single-template extraction from the API.
///
/// Validates synchronously and returns the `extracting` placeholder; the
/// extraction itself runs in the background under the shared limiter.
pub async fn begin_extraction<F, X>(
    pipeline: &Pipeline<F, X>,
    article_id: &str,
    template_id: &str,
) -> Result<ExtractionResult, PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    let store = pipeline.store();
    let article = store.get_article(article_id).await?;
    let template = store.get_template(template_id).await?;
    check_api_preconditions(&article, &template)?;

    match start_placeholder(pipeline, &article, &template).await? {
        PlaceholderClaim::Created(placeholder) => Ok(placeholder),
        PlaceholderClaim::Blocked(_) => Err(PipelineError::AlreadyExtracted {
            article_id: article_id.to_string(),
            template_id: template_id.to_string(),
        }),
    }
}

/// Extraction with every locked template of the article's account. Each
/// template runs as its own background unit; the summary reports what was
/// started and what was skipped without waiting for any of them.
pub async fn extract_all<F, X>(
    pipeline: &Pipeline<F, X>,
    article_id: &str,
) -> Result<ExtractAllSummary, PipelineError>
where
    F: ContentFetcher + 'static,
    X: FieldExtractor + 'static,
{
    let store = pipeline.store();
    let article = store.get_article(article_id).await?;
    let templates = store.locked_templates(&article.account_id).await?;

    if templates.is_empty() {
        return Err(PipelineError::NoLockedTemplates(article.account_id));
    }
    if article.extraction_content().is_none() {
        return Err(PipelineError::ArticleNotReady {
            article_id: article.id,
            status: article.status,
        });
    }

    let mut results = Vec::with_capacity(templates.len());
    for template in &templates {
        let status = match start_placeholder(pipeline, &article, template).await {
            Ok(PlaceholderClaim::Created(placeholder)) => DispatchStatus::Accepted {
                placeholder_id: placeholder.id,
            },
            Ok(PlaceholderClaim::Blocked(existing)) => DispatchStatus::Skipped { existing },
            Err(e) => DispatchStatus::Failed {
                error: e.to_string(),
            },
        };
        results.push(TemplateDispatch {
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            status,
        });
    }

    let started = results
        .iter()
        .filter(|r| matches!(r.status, DispatchStatus::Accepted { .. }))
        .count();
    let skipped = results
        .iter()
        .filter(|r| matches!(r.status, DispatchStatus::Skipped { .. }))
        .count();

    info!(article_id, total = templates.len(), started, skipped, "Extraction dispatched for all templates");

    Ok(ExtractAllSummary {
        article_id: article_id.to_string(),
        total: templates.len(),
        started,
        skipped,
        results,
    })
}
