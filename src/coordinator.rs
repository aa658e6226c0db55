use std::path::PathBuf;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::PipelineError;
use crate::store::{self, PlaceholderClaim, StoreFile};
use crate::types::{
    Account, Article, ArticleStatus, DimensionTemplate, ExtractionResponse, ExtractionResult,
    ExtractionStatus, FetchedArticle, NewTemplate, ResultsPage, ResultsQuery, TemplateUpdate,
};

const CHANNEL_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, PipelineError>>;

// --- Command enum ---

pub enum StoreCommand {
    Snapshot {
        reply: oneshot::Sender<StoreFile>,
    },
    CreateAccount {
        name: String,
        description: Option<String>,
        reply: Reply<Account>,
    },
    GetAccount {
        id: String,
        reply: Reply<Account>,
    },
    InsertArticle {
        article: Box<Article>,
        reply: Reply<Article>,
    },
    GetArticle {
        id: String,
        reply: Reply<Article>,
    },
    ListArticles {
        account_id: String,
        reply: oneshot::Sender<Vec<Article>>,
    },
    ArticlesByStatus {
        status: ArticleStatus,
        reply: oneshot::Sender<Vec<Article>>,
    },
    StatusCounts {
        account_id: String,
        reply: oneshot::Sender<Vec<(ArticleStatus, usize)>>,
    },
    ClaimArticle {
        id: String,
        reply: Reply<bool>,
    },
    RecordDownload {
        id: String,
        fetched: Box<FetchedArticle>,
        reply: Reply<Article>,
    },
    FinishArticle {
        id: String,
        reply: Reply<Article>,
    },
    FailArticle {
        id: String,
        message: String,
        reply: Reply<Article>,
    },
    DeleteArticle {
        id: String,
        reply: Reply<Article>,
    },
    DeleteArticles {
        ids: Vec<String>,
        reply: Reply<usize>,
    },
    CreateTemplate {
        new: Box<NewTemplate>,
        reply: Reply<DimensionTemplate>,
    },
    GetTemplate {
        id: String,
        reply: Reply<DimensionTemplate>,
    },
    UpdateTemplate {
        id: String,
        update: TemplateUpdate,
        reply: Reply<DimensionTemplate>,
    },
    ReorderTemplates {
        account_id: String,
        template_ids: Vec<String>,
        reply: Reply<Vec<DimensionTemplate>>,
    },
    ListTemplates {
        account_id: String,
        reply: oneshot::Sender<Vec<DimensionTemplate>>,
    },
    LockedTemplates {
        account_id: String,
        reply: oneshot::Sender<Vec<DimensionTemplate>>,
    },
    PairStatus {
        article_id: String,
        template_id: String,
        reply: oneshot::Sender<Option<ExtractionStatus>>,
    },
    BeginPlaceholder {
        article_id: String,
        template_id: String,
        model_used: String,
        reply: Reply<PlaceholderClaim>,
    },
    CommitBatch {
        article_id: String,
        template_id: String,
        placeholder_id: Option<String>,
        response: Box<ExtractionResponse>,
        reply: Reply<Vec<ExtractionResult>>,
    },
    DiscardPlaceholder {
        id: String,
        reply: Reply<bool>,
    },
    FailPlaceholder {
        id: String,
        message: String,
        reply: Reply<ExtractionResult>,
    },
    ResultsByArticle {
        article_id: String,
        reply: oneshot::Sender<Vec<ExtractionResult>>,
    },
    ResultsByTemplate {
        query: ResultsQuery,
        reply: Reply<ResultsPage>,
    },
    ExportTemplate {
        template_id: String,
        reply: Reply<Vec<Value>>,
    },
    DeleteResult {
        id: String,
        reply: Reply<ExtractionResult>,
    },
    RequeueOrphans {
        reply: Reply<(usize, usize)>,
    },
}

// --- StoreHandle ---

/// Cloneable handle to the store actor. Every command is applied and
/// persisted by the actor before its reply is sent.
#[derive(Clone)]
pub struct StoreHandle {
    sender: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    async fn send_command<T>(
        &self,
        command: StoreCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, PipelineError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| PipelineError::StoreUnavailable("store actor shut down".to_string()))?;
        rx.await
            .map_err(|_| PipelineError::StoreUnavailable("store actor dropped reply".to_string()))
    }

    pub async fn snapshot(&self) -> Result<StoreFile, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(StoreCommand::Snapshot { reply }, rx).await
    }

    pub async fn create_account(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<Account, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::CreateAccount {
                name: name.to_string(),
                description,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn get_account(&self, id: &str) -> Result<Account, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::GetAccount {
                id: id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn insert_article(&self, article: Article) -> Result<Article, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::InsertArticle {
                article: Box::new(article),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn get_article(&self, id: &str) -> Result<Article, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::GetArticle {
                id: id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    /// Normalized text content of an article, if it has been downloaded.
    pub async fn article_content(&self, id: &str) -> Result<Option<String>, PipelineError> {
        Ok(self.get_article(id).await?.content)
    }

    pub async fn list_articles(&self, account_id: &str) -> Result<Vec<Article>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::ListArticles {
                account_id: account_id.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Articles in `status`, oldest first.
    pub async fn articles_by_status(
        &self,
        status: ArticleStatus,
    ) -> Result<Vec<Article>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(StoreCommand::ArticlesByStatus { status, reply }, rx)
            .await
    }

    pub async fn status_counts(
        &self,
        account_id: &str,
    ) -> Result<Vec<(ArticleStatus, usize)>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::StatusCounts {
                account_id: account_id.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Atomic `Queued -> Downloading`. Only the caller that gets `true` may
    /// process the article.
    pub async fn claim_article(&self, id: &str) -> Result<bool, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::ClaimArticle {
                id: id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn record_download(
        &self,
        id: &str,
        fetched: FetchedArticle,
    ) -> Result<Article, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::RecordDownload {
                id: id.to_string(),
                fetched: Box::new(fetched),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn finish_article(&self, id: &str) -> Result<Article, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::FinishArticle {
                id: id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn fail_article(&self, id: &str, message: &str) -> Result<Article, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::FailArticle {
                id: id.to_string(),
                message: message.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn delete_article(&self, id: &str) -> Result<Article, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::DeleteArticle {
                id: id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn delete_articles(&self, ids: Vec<String>) -> Result<usize, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(StoreCommand::DeleteArticles { ids, reply }, rx)
            .await?
    }

    pub async fn create_template(
        &self,
        new: NewTemplate,
    ) -> Result<DimensionTemplate, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::CreateTemplate {
                new: Box::new(new),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn get_template(&self, id: &str) -> Result<DimensionTemplate, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::GetTemplate {
                id: id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn update_template(
        &self,
        id: &str,
        update: TemplateUpdate,
    ) -> Result<DimensionTemplate, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::UpdateTemplate {
                id: id.to_string(),
                update,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn reorder_templates(
        &self,
        account_id: &str,
        template_ids: Vec<String>,
    ) -> Result<Vec<DimensionTemplate>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::ReorderTemplates {
                account_id: account_id.to_string(),
                template_ids,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn list_templates(
        &self,
        account_id: &str,
    ) -> Result<Vec<DimensionTemplate>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::ListTemplates {
                account_id: account_id.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Locked, active templates of an account in sort order.
    pub async fn locked_templates(
        &self,
        account_id: &str,
    ) -> Result<Vec<DimensionTemplate>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::LockedTemplates {
                account_id: account_id.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn pair_status(
        &self,
        article_id: &str,
        template_id: &str,
    ) -> Result<Option<ExtractionStatus>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::PairStatus {
                article_id: article_id.to_string(),
                template_id: template_id.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn begin_placeholder(
        &self,
        article_id: &str,
        template_id: &str,
        model_used: &str,
    ) -> Result<PlaceholderClaim, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::BeginPlaceholder {
                article_id: article_id.to_string(),
                template_id: template_id.to_string(),
                model_used: model_used.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn commit_batch(
        &self,
        article_id: &str,
        template_id: &str,
        placeholder_id: Option<&str>,
        response: ExtractionResponse,
    ) -> Result<Vec<ExtractionResult>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::CommitBatch {
                article_id: article_id.to_string(),
                template_id: template_id.to_string(),
                placeholder_id: placeholder_id.map(str::to_string),
                response: Box::new(response),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn discard_placeholder(&self, id: &str) -> Result<bool, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::DiscardPlaceholder {
                id: id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn fail_placeholder(
        &self,
        id: &str,
        message: &str,
    ) -> Result<ExtractionResult, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::FailPlaceholder {
                id: id.to_string(),
                message: message.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn results_by_article(
        &self,
        article_id: &str,
    ) -> Result<Vec<ExtractionResult>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::ResultsByArticle {
                article_id: article_id.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn results_by_template(
        &self,
        query: ResultsQuery,
    ) -> Result<ResultsPage, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(StoreCommand::ResultsByTemplate { query, reply }, rx)
            .await?
    }

    pub async fn export_template(&self, template_id: &str) -> Result<Vec<Value>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::ExportTemplate {
                template_id: template_id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn delete_result(&self, id: &str) -> Result<ExtractionResult, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            StoreCommand::DeleteResult {
                id: id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    /// Returns (articles requeued, placeholders failed).
    pub async fn requeue_orphans(&self) -> Result<(usize, usize), PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(StoreCommand::RequeueOrphans { reply }, rx)
            .await?
    }
}

// --- Actor state ---

struct StoreState {
    store: StoreFile,
    /// `None` keeps the store in memory only.
    path: Option<PathBuf>,
}

impl StoreState {
    /// Apply `op` to a copy of the store and persist it; the copy replaces
    /// the live state only once it is durable. A failed op or save leaves
    /// the state untouched.
    fn apply<T>(
        &mut self,
        op: impl FnOnce(&mut StoreFile) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut next = self.store.clone();
        let value = op(&mut next)?;
        if let Some(path) = &self.path {
            store::save(path, &next)?;
        }
        self.store = next;
        Ok(value)
    }
}

// --- Actor loop ---

async fn run_store(mut rx: mpsc::Receiver<StoreCommand>, store: StoreFile, path: Option<PathBuf>) {
    let mut state = StoreState { store, path };

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::Snapshot { reply } => {
                let _ = reply.send(state.store.clone());
            }
            StoreCommand::CreateAccount {
                name,
                description,
                reply,
            } => {
                let result = state.apply(|s| Ok(store::create_account(s, &name, description)));
                let _ = reply.send(result);
            }
            StoreCommand::GetAccount { id, reply } => {
                let _ = reply.send(store::find_account(&state.store, &id).cloned());
            }
            StoreCommand::InsertArticle { article, reply } => {
                let result = state.apply(|s| store::insert_article(s, *article));
                let _ = reply.send(result);
            }
            StoreCommand::GetArticle { id, reply } => {
                let _ = reply.send(store::find_article(&state.store, &id).cloned());
            }
            StoreCommand::ListArticles { account_id, reply } => {
                let _ = reply.send(store::list_articles(&state.store, &account_id));
            }
            StoreCommand::ArticlesByStatus { status, reply } => {
                let _ = reply.send(store::articles_by_status(&state.store, status));
            }
            StoreCommand::StatusCounts { account_id, reply } => {
                let _ = reply.send(store::status_counts(&state.store, &account_id));
            }
            StoreCommand::ClaimArticle { id, reply } => {
                // A lost claim changes nothing, so skip the write.
                let lost = matches!(
                    store::find_article(&state.store, &id),
                    Ok(article) if article.status != ArticleStatus::Queued
                );
                let result = if lost {
                    Ok(false)
                } else {
                    state.apply(|s| store::claim_article(s, &id))
                };
                let _ = reply.send(result);
            }
            StoreCommand::RecordDownload { id, fetched, reply } => {
                let result = state.apply(|s| store::record_download(s, &id, *fetched));
                let _ = reply.send(result);
            }
            StoreCommand::FinishArticle { id, reply } => {
                let result = state.apply(|s| store::finish_article(s, &id));
                let _ = reply.send(result);
            }
            StoreCommand::FailArticle { id, message, reply } => {
                let result = state.apply(|s| store::fail_article(s, &id, &message));
                let _ = reply.send(result);
            }
            StoreCommand::DeleteArticle { id, reply } => {
                let result = state.apply(|s| store::delete_article(s, &id));
                let _ = reply.send(result);
            }
            StoreCommand::DeleteArticles { ids, reply } => {
                let result = state.apply(|s| Ok(store::delete_articles(s, &ids)));
                let _ = reply.send(result);
            }
            StoreCommand::CreateTemplate { new, reply } => {
                let result = state.apply(|s| store::create_template(s, *new));
                let _ = reply.send(result);
            }
            StoreCommand::GetTemplate { id, reply } => {
                let _ = reply.send(store::find_template(&state.store, &id).cloned());
            }
            StoreCommand::UpdateTemplate { id, update, reply } => {
                let result = state.apply(|s| store::update_template(s, &id, update));
                let _ = reply.send(result);
            }
            StoreCommand::ReorderTemplates {
                account_id,
                template_ids,
                reply,
            } => {
                let result =
                    state.apply(|s| store::reorder_templates(s, &account_id, &template_ids));
                let _ = reply.send(result);
            }
            StoreCommand::ListTemplates { account_id, reply } => {
                let _ = reply.send(store::list_templates(&state.store, &account_id));
            }
            StoreCommand::LockedTemplates { account_id, reply } => {
                let _ = reply.send(store::locked_templates(&state.store, &account_id));
            }
            StoreCommand::PairStatus {
                article_id,
                template_id,
                reply,
            } => {
                let _ = reply.send(store::pair_status(&state.store, &article_id, &template_id));
            }
            StoreCommand::BeginPlaceholder {
                article_id,
                template_id,
                model_used,
                reply,
            } => {
                let result = state.apply(|s| {
                    store::begin_placeholder(s, &article_id, &template_id, &model_used)
                });
                let _ = reply.send(result);
            }
            StoreCommand::CommitBatch {
                article_id,
                template_id,
                placeholder_id,
                response,
                reply,
            } => {
                let result = state.apply(|s| {
                    store::commit_batch(
                        s,
                        &article_id,
                        &template_id,
                        placeholder_id.as_deref(),
                        &response,
                    )
                });
                let _ = reply.send(result);
            }
            StoreCommand::DiscardPlaceholder { id, reply } => {
                let result = state.apply(|s| Ok(store::discard_placeholder(s, &id)));
                let _ = reply.send(result);
            }
            StoreCommand::FailPlaceholder { id, message, reply } => {
                let result = state.apply(|s| store::fail_placeholder(s, &id, &message));
                let _ = reply.send(result);
            }
            StoreCommand::ResultsByArticle { article_id, reply } => {
                let _ = reply.send(store::results_by_article(&state.store, &article_id));
            }
            StoreCommand::ResultsByTemplate { query, reply } => {
                let _ = reply.send(store::results_by_template(&state.store, &query));
            }
            StoreCommand::ExportTemplate { template_id, reply } => {
                let _ = reply.send(store::export_template(&state.store, &template_id));
            }
            StoreCommand::DeleteResult { id, reply } => {
                let result = state.apply(|s| store::delete_result(s, &id));
                let _ = reply.send(result);
            }
            StoreCommand::RequeueOrphans { reply } => {
                let result = state.apply(|s| Ok(store::requeue_orphans(s)));
                let _ = reply.send(result);
            }
        }
    }

    // Shutdown: every sender dropped. State is already durable after each
    // command, so a final save only matters if the last one failed.
    if let Some(path) = &state.path {
        match store::save(path, &state.store) {
            Ok(()) => debug!("Store saved on shutdown"),
            Err(e) => error!("Failed to save store on shutdown: {}", e),
        }
    }
}

// --- Spawn ---

/// Start the store actor. Pass `None` for `path` to keep state in memory.
pub fn spawn_store(
    store: StoreFile,
    path: Option<PathBuf>,
) -> (StoreHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task_handle = tokio::spawn(run_store(rx, store, path));
    (StoreHandle { sender: tx }, task_handle)
}
