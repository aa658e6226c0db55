use crate::types::ArticleStatus;

/// Error enum for the article pipeline.
///
/// Categories:
/// - Validation: rejected synchronously at the call site, no side effects
/// - Not found: the referenced record does not exist
/// - Collaborator: fetch or AI call failed; recorded as article/extraction state
/// - Store: persistence failed or the store actor is gone
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    // Validation
    #[error("Invalid article URL: {0}")]
    InvalidUrl(String),

    #[error("Article already exists (content id {0} is already used by this account)")]
    DuplicateContentId(String),

    #[error("Article URL already exists: {0}")]
    DuplicateUrl(String),

    #[error("Dimension template {0} is not locked")]
    TemplateNotLocked(String),

    #[error("Dimension template {0} is locked; its fields cannot be modified")]
    TemplateLocked(String),

    #[error("Dimension template {0} is already locked")]
    TemplateAlreadyLocked(String),

    #[error("Dimension template {0} is already unlocked")]
    TemplateAlreadyUnlocked(String),

    #[error("Article {article_id} was already extracted with template {template_id}")]
    AlreadyExtracted {
        article_id: String,
        template_id: String,
    },

    #[error("Article {article_id} is not ready for extraction (status: {status})")]
    ArticleNotReady {
        article_id: String,
        status: ArticleStatus,
    },

    #[error("Article {article_id} cannot move from {from} to {to}")]
    InvalidTransition {
        article_id: String,
        from: ArticleStatus,
        to: ArticleStatus,
    },

    #[error("Account {0} has no locked dimension templates")]
    NoLockedTemplates(String),

    #[error("Invalid fields: {0}")]
    InvalidFields(String),

    #[error("Template {template_id} does not belong to the account of article {article_id}")]
    AccountMismatch {
        article_id: String,
        template_id: String,
    },

    // Not found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Article not found: {0}")]
    ArticleNotFound(String),

    #[error("Dimension template not found: {0}")]
    TemplateNotFound(String),

    #[error("Extraction result not found: {0}")]
    ResultNotFound(String),

    // Collaborators
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Extraction call failed: {0}")]
    Extraction(String),

    #[error("Failed to parse extraction response: {0}")]
    ResponseParse(String),

    // Store
    #[error("Failed to persist store: {0}")]
    Persist(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Returns true for errors surfaced to the caller at intake / request time.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidUrl(_)
                | PipelineError::DuplicateContentId(_)
                | PipelineError::DuplicateUrl(_)
                | PipelineError::TemplateNotLocked(_)
                | PipelineError::TemplateLocked(_)
                | PipelineError::TemplateAlreadyLocked(_)
                | PipelineError::TemplateAlreadyUnlocked(_)
                | PipelineError::AlreadyExtracted { .. }
                | PipelineError::ArticleNotReady { .. }
                | PipelineError::InvalidTransition { .. }
                | PipelineError::NoLockedTemplates(_)
                | PipelineError::InvalidFields(_)
                | PipelineError::AccountMismatch { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PipelineError::AccountNotFound(_)
                | PipelineError::ArticleNotFound(_)
                | PipelineError::TemplateNotFound(_)
                | PipelineError::ResultNotFound(_)
        )
    }

    /// Returns true for failures of the fetch or AI collaborators.
    pub fn is_collaborator(&self) -> bool {
        matches!(
            self,
            PipelineError::Fetch(_) | PipelineError::Extraction(_) | PipelineError::ResponseParse(_)
        )
    }
}
