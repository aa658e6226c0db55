use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::PipelineError;
use crate::types::{
    new_id, Account, Article, ArticleStatus, DimensionTemplate, ExtractionField,
    ExtractionResponse, ExtractionResult, ExtractionStatus, FetchedArticle, NewTemplate,
    ResultStats, ResultsPage, ResultsQuery, TemplateUpdate,
};

pub const SCHEMA_VERSION: u32 = 1;

/// The durable store document.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoreFile {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub articles: Vec<Article>,
    #[serde(default)]
    pub templates: Vec<DimensionTemplate>,
    #[serde(default)]
    pub results: Vec<ExtractionResult>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            accounts: Vec::new(),
            articles: Vec::new(),
            templates: Vec::new(),
            results: Vec::new(),
        }
    }
}

/// Result of trying to open a placeholder row for an (article, template) pair.
#[derive(Clone, Debug, PartialEq)]
pub enum PlaceholderClaim {
    Created(ExtractionResult),
    /// A completed or in-progress row already exists for the pair.
    Blocked(ExtractionStatus),
}

// --- Load / save ---

/// Load the store document, or an empty store if the file does not exist yet.
pub fn load(path: &Path) -> Result<StoreFile, PipelineError> {
    if !path.exists() {
        return Ok(StoreFile::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| PipelineError::Persist(format!("Failed to read {}: {}", path.display(), e)))?;

    let store: StoreFile = serde_json::from_str(&contents)
        .map_err(|e| PipelineError::Persist(format!("Failed to parse {}: {}", path.display(), e)))?;

    if store.schema_version != SCHEMA_VERSION {
        return Err(PipelineError::Persist(format!(
            "Unsupported store schema version {} in {} (expected {})",
            store.schema_version,
            path.display(),
            SCHEMA_VERSION
        )));
    }

    Ok(store)
}

/// Save the store document atomically.
///
/// Writes a temp file in the target directory, syncs it, then renames it over
/// the target, so readers see either the old or the new document.
pub fn save(path: &Path, store: &StoreFile) -> Result<(), PipelineError> {
    let parent = path.parent().ok_or_else(|| {
        PipelineError::Persist(format!(
            "Cannot determine parent directory of {}",
            path.display()
        ))
    })?;

    fs::create_dir_all(parent).map_err(|e| {
        PipelineError::Persist(format!("Failed to create directory {}: {}", parent.display(), e))
    })?;

    let json = serde_json::to_string_pretty(store)
        .map_err(|e| PipelineError::Persist(format!("Failed to serialize store: {}", e)))?;

    let temp_file = NamedTempFile::new_in(parent).map_err(|e| {
        PipelineError::Persist(format!("Failed to create temp file in {}: {}", parent.display(), e))
    })?;

    fs::write(temp_file.path(), &json)
        .map_err(|e| PipelineError::Persist(format!("Failed to write temp file: {}", e)))?;

    let file = fs::File::open(temp_file.path())
        .map_err(|e| PipelineError::Persist(format!("Failed to open temp file for sync: {}", e)))?;
    file.sync_all()
        .map_err(|e| PipelineError::Persist(format!("Failed to sync temp file: {}", e)))?;

    temp_file.persist(path).map_err(|e| {
        PipelineError::Persist(format!("Failed to rename temp file to {}: {}", path.display(), e))
    })?;

    Ok(())
}

// --- Lookups ---

pub fn find_account<'a>(store: &'a StoreFile, id: &str) -> Result<&'a Account, PipelineError> {
    store
        .accounts
        .iter()
        .find(|a| a.id == id)
        .ok_or_else(|| PipelineError::AccountNotFound(id.to_string()))
}

pub fn find_article<'a>(store: &'a StoreFile, id: &str) -> Result<&'a Article, PipelineError> {
    store
        .articles
        .iter()
        .find(|a| a.id == id)
        .ok_or_else(|| PipelineError::ArticleNotFound(id.to_string()))
}

fn find_article_mut<'a>(
    store: &'a mut StoreFile,
    id: &str,
) -> Result<&'a mut Article, PipelineError> {
    store
        .articles
        .iter_mut()
        .find(|a| a.id == id)
        .ok_or_else(|| PipelineError::ArticleNotFound(id.to_string()))
}

pub fn find_template<'a>(
    store: &'a StoreFile,
    id: &str,
) -> Result<&'a DimensionTemplate, PipelineError> {
    store
        .templates
        .iter()
        .find(|t| t.id == id)
        .ok_or_else(|| PipelineError::TemplateNotFound(id.to_string()))
}

fn find_template_mut<'a>(
    store: &'a mut StoreFile,
    id: &str,
) -> Result<&'a mut DimensionTemplate, PipelineError> {
    store
        .templates
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| PipelineError::TemplateNotFound(id.to_string()))
}

// --- Accounts ---

pub fn create_account(store: &mut StoreFile, name: &str, description: Option<String>) -> Account {
    let account = Account {
        id: new_id(),
        name: name.to_string(),
        description,
        created_at: Utc::now(),
    };
    store.accounts.push(account.clone());
    account
}

// --- Articles ---

/// Insert a new article after checking both uniqueness rules.
///
/// The content identifier must be unique within the account and the URL
/// unique across the whole store.
pub fn insert_article(store: &mut StoreFile, article: Article) -> Result<Article, PipelineError> {
    find_account(store, &article.account_id)?;

    if store
        .articles
        .iter()
        .any(|a| a.account_id == article.account_id && a.content_id == article.content_id)
    {
        return Err(PipelineError::DuplicateContentId(article.content_id));
    }

    if store.articles.iter().any(|a| a.url == article.url) {
        return Err(PipelineError::DuplicateUrl(article.url));
    }

    store.articles.push(article.clone());
    Ok(article)
}

fn transition(article: &mut Article, to: ArticleStatus) -> Result<(), PipelineError> {
    if !article.status.is_valid_transition(&to) {
        return Err(PipelineError::InvalidTransition {
            article_id: article.id.clone(),
            from: article.status,
            to,
        });
    }
    article.status = to;
    article.updated_at = Utc::now();
    Ok(())
}

/// Conditional `Queued -> Downloading`. Returns false when the article has
/// already been claimed or is in any other state.
pub fn claim_article(store: &mut StoreFile, id: &str) -> Result<bool, PipelineError> {
    let article = find_article_mut(store, id)?;
    if article.status != ArticleStatus::Queued {
        return Ok(false);
    }
    transition(article, ArticleStatus::Downloading)?;
    Ok(true)
}

/// Store the fetched fields and move `Downloading -> Extracting`.
pub fn record_download(
    store: &mut StoreFile,
    id: &str,
    fetched: FetchedArticle,
) -> Result<Article, PipelineError> {
    let (account_id, current_content_id) = {
        let article = find_article(store, id)?;
        (article.account_id.clone(), article.content_id.clone())
    };

    let content_id = match fetched.content_id {
        Some(fetched_id) if fetched_id != current_content_id => {
            let taken = store
                .articles
                .iter()
                .any(|a| a.id != id && a.account_id == account_id && a.content_id == fetched_id);
            if taken {
                warn!(
                    article_id = id,
                    content_id = %fetched_id,
                    "Fetched content id is used by another article; keeping the URL-derived id"
                );
                current_content_id
            } else {
                fetched_id
            }
        }
        _ => current_content_id,
    };

    let article = find_article_mut(store, id)?;
    transition(article, ArticleStatus::Extracting)?;
    article.content_id = content_id;
    article.title = Some(fetched.title);
    article.author = fetched.author;
    article.publish_time = fetched.publish_time;
    article.raw_content = fetched.raw;
    article.content = Some(fetched.content);
    article.error_message = None;
    Ok(article.clone())
}

fn completed_count(store: &StoreFile, article_id: &str) -> u32 {
    store
        .results
        .iter()
        .filter(|r| r.article_id == article_id && r.status == ExtractionStatus::Completed)
        .count() as u32
}

fn recount(store: &mut StoreFile, article_id: &str) {
    let count = completed_count(store, article_id);
    if let Some(article) = store.articles.iter_mut().find(|a| a.id == article_id) {
        article.extraction_count = count;
        article.updated_at = Utc::now();
    }
}

/// Recount extraction results and move `Extracting -> Completed`.
pub fn finish_article(store: &mut StoreFile, id: &str) -> Result<Article, PipelineError> {
    let count = completed_count(store, id);
    let article = find_article_mut(store, id)?;
    transition(article, ArticleStatus::Completed)?;
    article.extraction_count = count;
    Ok(article.clone())
}

/// Move an in-flight article to `Error` with a message.
pub fn fail_article(
    store: &mut StoreFile,
    id: &str,
    message: &str,
) -> Result<Article, PipelineError> {
    let article = find_article_mut(store, id)?;
    transition(article, ArticleStatus::Error)?;
    article.error_message = Some(message.to_string());
    Ok(article.clone())
}

/// Delete an article and every extraction result that belongs to it.
pub fn delete_article(store: &mut StoreFile, id: &str) -> Result<Article, PipelineError> {
    let index = store
        .articles
        .iter()
        .position(|a| a.id == id)
        .ok_or_else(|| PipelineError::ArticleNotFound(id.to_string()))?;
    let article = store.articles.remove(index);
    store.results.retain(|r| r.article_id != id);
    Ok(article)
}

/// Delete every listed article that exists. Returns how many were deleted.
pub fn delete_articles(store: &mut StoreFile, ids: &[String]) -> usize {
    let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let before = store.articles.len();
    store.articles.retain(|a| !ids.contains(a.id.as_str()));
    store.results.retain(|r| !ids.contains(r.article_id.as_str()));
    before - store.articles.len()
}

/// Articles of an account, newest first.
pub fn list_articles(store: &StoreFile, account_id: &str) -> Vec<Article> {
    let mut articles: Vec<Article> = store
        .articles
        .iter()
        .filter(|a| a.account_id == account_id)
        .cloned()
        .collect();
    articles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    articles
}

/// Articles in `status`, oldest first.
pub fn articles_by_status(store: &StoreFile, status: ArticleStatus) -> Vec<Article> {
    let mut articles: Vec<Article> = store
        .articles
        .iter()
        .filter(|a| a.status == status)
        .cloned()
        .collect();
    articles.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    articles
}

/// Per-status article counts for one account, in lifecycle order.
pub fn status_counts(store: &StoreFile, account_id: &str) -> Vec<(ArticleStatus, usize)> {
    [
        ArticleStatus::Queued,
        ArticleStatus::Downloading,
        ArticleStatus::Extracting,
        ArticleStatus::Completed,
        ArticleStatus::Error,
    ]
    .into_iter()
    .map(|status| {
        let count = store
            .articles
            .iter()
            .filter(|a| a.account_id == account_id && a.status == status)
            .count();
        (status, count)
    })
    .collect()
}

/// Put articles left in flight by a previous process back in the queue and
/// fail their dangling placeholders. Returns (articles requeued, placeholders failed).
pub fn requeue_orphans(store: &mut StoreFile) -> (usize, usize) {
    let mut requeued = 0;
    for article in store.articles.iter_mut().filter(|a| a.status.is_in_flight()) {
        if transition(article, ArticleStatus::Queued).is_ok() {
            requeued += 1;
        }
    }

    let mut failed = 0;
    for result in store
        .results
        .iter_mut()
        .filter(|r| r.status == ExtractionStatus::Extracting)
    {
        result.status = ExtractionStatus::Failed;
        result.error_message = Some("interrupted".to_string());
        failed += 1;
    }

    (requeued, failed)
}

// --- Dimension templates ---

/// Field names must be present and unique.
pub fn validate_fields(fields: &[ExtractionField]) -> Result<(), PipelineError> {
    if fields.is_empty() {
        return Err(PipelineError::InvalidFields(
            "a template needs at least one field".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for field in fields {
        let name = field.name.trim();
        if name.is_empty() {
            return Err(PipelineError::InvalidFields(
                "field name must not be empty".to_string(),
            ));
        }
        if !seen.insert(name) {
            return Err(PipelineError::InvalidFields(format!(
                "duplicate field name '{}'",
                name
            )));
        }
    }
    Ok(())
}

pub fn create_template(
    store: &mut StoreFile,
    new: NewTemplate,
) -> Result<DimensionTemplate, PipelineError> {
    find_account(store, &new.account_id)?;
    validate_fields(&new.fields)?;

    let sort_order = store
        .templates
        .iter()
        .filter(|t| t.account_id == new.account_id)
        .map(|t| t.sort_order + 1)
        .max()
        .unwrap_or(0);

    let now = Utc::now();
    let template = DimensionTemplate {
        id: new_id(),
        account_id: new.account_id,
        name: new.name,
        description: new.description,
        fields: new.fields,
        is_locked: false,
        is_active: true,
        model_preference: new.model_preference,
        custom_prompt: new.custom_prompt,
        sort_order,
        created_at: now,
        updated_at: now,
    };
    store.templates.push(template.clone());
    Ok(template)
}

pub fn update_template(
    store: &mut StoreFile,
    id: &str,
    update: TemplateUpdate,
) -> Result<DimensionTemplate, PipelineError> {
    let template = find_template_mut(store, id)?;

    match update {
        TemplateUpdate::Rename(name) => {
            if name.trim().is_empty() {
                return Err(PipelineError::InvalidFields(
                    "template name must not be empty".to_string(),
                ));
            }
            template.name = name;
        }
        TemplateUpdate::SetDescription(description) => template.description = description,
        TemplateUpdate::SetModel(model) => template.model_preference = model,
        TemplateUpdate::SetCustomPrompt(prompt) => template.custom_prompt = prompt,
        TemplateUpdate::ReplaceFields(fields) => {
            if template.is_locked {
                return Err(PipelineError::TemplateLocked(id.to_string()));
            }
            validate_fields(&fields)?;
            template.fields = fields;
        }
        TemplateUpdate::AddFields(fields) => {
            if !template.is_locked {
                return Err(PipelineError::TemplateNotLocked(id.to_string()));
            }
            let mut combined = template.fields.clone();
            combined.extend(fields);
            validate_fields(&combined)?;
            template.fields = combined;
        }
        TemplateUpdate::Lock => {
            if template.is_locked {
                return Err(PipelineError::TemplateAlreadyLocked(id.to_string()));
            }
            template.is_locked = true;
        }
        TemplateUpdate::Unlock => {
            if !template.is_locked {
                return Err(PipelineError::TemplateAlreadyUnlocked(id.to_string()));
            }
            template.is_locked = false;
        }
        TemplateUpdate::Deactivate => template.is_active = false,
        TemplateUpdate::SetSortOrder(order) => template.sort_order = order,
    }

    template.updated_at = Utc::now();
    Ok(template.clone())
}

/// Templates used for automatic extraction: locked and active, in sort order.
pub fn locked_templates(store: &StoreFile, account_id: &str) -> Vec<DimensionTemplate> {
    let mut templates: Vec<DimensionTemplate> = store
        .templates
        .iter()
        .filter(|t| t.account_id == account_id && t.is_locked && t.is_active)
        .cloned()
        .collect();
    templates.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then(a.created_at.cmp(&b.created_at))
    });
    templates
}

pub fn list_templates(store: &StoreFile, account_id: &str) -> Vec<DimensionTemplate> {
    let mut templates: Vec<DimensionTemplate> = store
        .templates
        .iter()
        .filter(|t| t.account_id == account_id)
        .cloned()
        .collect();
    templates.sort_by_key(|t| t.sort_order);
    templates
}

/// Give each listed template its position in `template_ids` as sort order.
///
/// Every id must name a template of the account; otherwise nothing changes.
/// Templates left out of the list keep their current order.
pub fn reorder_templates(
    store: &mut StoreFile,
    account_id: &str,
    template_ids: &[String],
) -> Result<Vec<DimensionTemplate>, PipelineError> {
    find_account(store, account_id)?;
    for id in template_ids {
        let template = find_template(store, id)?;
        if template.account_id != account_id {
            return Err(PipelineError::TemplateNotFound(id.clone()));
        }
    }

    let now = Utc::now();
    for (index, id) in template_ids.iter().enumerate() {
        let template = find_template_mut(store, id)?;
        template.sort_order = index as u32;
        template.updated_at = now;
    }
    Ok(list_templates(store, account_id))
}

// --- Extraction results ---

/// Strongest existing status for a pair: completed, then extracting, then failed.
pub fn pair_status(
    store: &StoreFile,
    article_id: &str,
    template_id: &str,
) -> Option<ExtractionStatus> {
    let statuses: Vec<ExtractionStatus> = store
        .results
        .iter()
        .filter(|r| r.article_id == article_id && r.template_id == template_id)
        .map(|r| r.status)
        .collect();

    [
        ExtractionStatus::Completed,
        ExtractionStatus::Extracting,
        ExtractionStatus::Failed,
    ]
    .into_iter()
    .find(|s| statuses.contains(s))
}

/// Open an `extracting` placeholder for the pair unless a completed or
/// in-progress row exists. Earlier failed rows for the pair are replaced.
pub fn begin_placeholder(
    store: &mut StoreFile,
    article_id: &str,
    template_id: &str,
    model_used: &str,
) -> Result<PlaceholderClaim, PipelineError> {
    find_article(store, article_id)?;
    find_template(store, template_id)?;

    match pair_status(store, article_id, template_id) {
        Some(status @ (ExtractionStatus::Completed | ExtractionStatus::Extracting)) => {
            return Ok(PlaceholderClaim::Blocked(status));
        }
        _ => {}
    }

    store
        .results
        .retain(|r| !(r.article_id == article_id && r.template_id == template_id));

    let placeholder = ExtractionResult {
        id: new_id(),
        article_id: article_id.to_string(),
        template_id: template_id.to_string(),
        batch_id: new_id(),
        extracted_data: Default::default(),
        status: ExtractionStatus::Extracting,
        model_used: model_used.to_string(),
        tokens_used: 0,
        duration_ms: 0,
        error_message: None,
        created_at: Utc::now(),
    };
    store.results.push(placeholder.clone());
    Ok(PlaceholderClaim::Created(placeholder))
}

/// Persist one completed row per record under a fresh batch id.
///
/// Tokens and duration are split evenly across the records with integer
/// division. Rejected with `AlreadyExtracted` if the pair already has a
/// completed batch; nothing is changed in that case. On success the batch
/// replaces every earlier row for the pair, which at that point can only be
/// placeholders or failed attempts, and the article's count is refreshed.
pub fn commit_batch(
    store: &mut StoreFile,
    article_id: &str,
    template_id: &str,
    placeholder_id: Option<&str>,
    response: &ExtractionResponse,
) -> Result<Vec<ExtractionResult>, PipelineError> {
    find_article(store, article_id)?;

    if pair_status(store, article_id, template_id) == Some(ExtractionStatus::Completed) {
        return Err(PipelineError::AlreadyExtracted {
            article_id: article_id.to_string(),
            template_id: template_id.to_string(),
        });
    }

    store.results.retain(|r| {
        let same_pair = r.article_id == article_id && r.template_id == template_id;
        !(same_pair || placeholder_id == Some(r.id.as_str()))
    });

    let count = response.records.len() as u64;
    let (tokens_each, duration_each) = if count == 0 {
        (0, 0)
    } else {
        (response.tokens_used / count, response.duration_ms / count)
    };

    let batch_id = new_id();
    let now = Utc::now();
    let rows: Vec<ExtractionResult> = response
        .records
        .iter()
        .map(|record| ExtractionResult {
            id: new_id(),
            article_id: article_id.to_string(),
            template_id: template_id.to_string(),
            batch_id: batch_id.clone(),
            extracted_data: record.clone(),
            status: ExtractionStatus::Completed,
            model_used: response.model_used.clone(),
            tokens_used: tokens_each,
            duration_ms: duration_each,
            error_message: None,
            created_at: now,
        })
        .collect();

    store.results.extend(rows.iter().cloned());
    recount(store, article_id);
    Ok(rows)
}

/// Remove a placeholder row. Returns false if it was already gone.
pub fn discard_placeholder(store: &mut StoreFile, id: &str) -> bool {
    let before = store.results.len();
    store.results.retain(|r| r.id != id);
    store.results.len() != before
}

pub fn fail_placeholder(
    store: &mut StoreFile,
    id: &str,
    message: &str,
) -> Result<ExtractionResult, PipelineError> {
    let result = store
        .results
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| PipelineError::ResultNotFound(id.to_string()))?;
    result.status = ExtractionStatus::Failed;
    result.error_message = Some(message.to_string());
    Ok(result.clone())
}

/// Results of one article, ordered by template sort order then creation time.
pub fn results_by_article(store: &StoreFile, article_id: &str) -> Vec<ExtractionResult> {
    let sort_key = |template_id: &str| {
        store
            .templates
            .iter()
            .find(|t| t.id == template_id)
            .map(|t| t.sort_order)
            .unwrap_or(u32::MAX)
    };

    let mut results: Vec<ExtractionResult> = store
        .results
        .iter()
        .filter(|r| r.article_id == article_id)
        .cloned()
        .collect();
    results.sort_by(|a, b| {
        sort_key(&a.template_id)
            .cmp(&sort_key(&b.template_id))
            .then(a.created_at.cmp(&b.created_at))
    });
    results
}

fn value_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Number(n) => n.to_string().contains(needle),
        Value::Bool(b) => b.to_string().contains(needle),
        Value::Array(items) => items.iter().any(|v| value_contains(v, needle)),
        Value::Object(map) => map.values().any(|v| value_contains(v, needle)),
        Value::Null => false,
    }
}

pub fn stats_for(results: &[&ExtractionResult]) -> ResultStats {
    ResultStats {
        total: results.len(),
        completed: results
            .iter()
            .filter(|r| r.status == ExtractionStatus::Completed)
            .count(),
        failed: results
            .iter()
            .filter(|r| r.status == ExtractionStatus::Failed)
            .count(),
        total_tokens: results.iter().map(|r| r.tokens_used).sum(),
    }
}

/// One page of a template's results, newest first.
///
/// With a keyword, only completed rows whose extracted values contain it
/// (case-insensitive) are returned. Stats always cover every row of the
/// template. Pages are 1-based.
pub fn results_by_template(
    store: &StoreFile,
    query: &ResultsQuery,
) -> Result<ResultsPage, PipelineError> {
    find_template(store, &query.template_id)?;

    let all: Vec<&ExtractionResult> = store
        .results
        .iter()
        .filter(|r| r.template_id == query.template_id)
        .collect();
    let stats = stats_for(&all);

    let keyword = query
        .keyword
        .as_deref()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty());

    let mut matching: Vec<&ExtractionResult> = all
        .into_iter()
        .filter(|r| match &keyword {
            Some(k) => {
                r.status == ExtractionStatus::Completed
                    && r.extracted_data.values().any(|v| value_contains(v, k))
            }
            None => true,
        })
        .collect();
    matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let page = query.page.max(1);
    let page_size = query.page_size.max(1);
    let items = matching
        .iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .map(|r| (*r).clone())
        .collect();

    Ok(ResultsPage {
        items,
        total: matching.len(),
        page,
        page_size,
        stats,
    })
}

/// Completed results of a template as flat records with a `_meta` object.
pub fn export_template(store: &StoreFile, template_id: &str) -> Result<Vec<Value>, PipelineError> {
    find_template(store, template_id)?;

    let mut rows: Vec<&ExtractionResult> = store
        .results
        .iter()
        .filter(|r| r.template_id == template_id && r.status == ExtractionStatus::Completed)
        .collect();
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    Ok(rows
        .into_iter()
        .map(|result| {
            let article = store.articles.iter().find(|a| a.id == result.article_id);
            let mut record = result.extracted_data.clone();
            record.insert(
                "_meta".to_string(),
                serde_json::json!({
                    "article_title": article.and_then(|a| a.title.clone()),
                    "article_url": article.map(|a| a.url.clone()),
                    "publish_time": article.and_then(|a| a.publish_time).map(|t| t.to_rfc3339()),
                    "extracted_at": result.created_at.to_rfc3339(),
                }),
            );
            Value::Object(record)
        })
        .collect())
}

/// Delete one result row and refresh its article's count.
pub fn delete_result(store: &mut StoreFile, id: &str) -> Result<ExtractionResult, PipelineError> {
    let index = store
        .results
        .iter()
        .position(|r| r.id == id)
        .ok_or_else(|| PipelineError::ResultNotFound(id.to_string()))?;
    let removed = store.results.remove(index);
    recount(store, &removed.article_id);
    Ok(removed)
}
