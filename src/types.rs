use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One extracted record: field name -> value.
pub type Record = Map<String, Value>;

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// --- Enums ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    #[default]
    Queued,
    Downloading,
    Extracting,
    Completed,
    Error,
}

impl ArticleStatus {
    /// Validates whether a transition from this status to `to` is allowed.
    ///
    /// Rules:
    /// - Forward progression: Queued -> Downloading -> Extracting -> Completed
    /// - Downloading and Extracting can fail into Error
    /// - Downloading and Extracting can be requeued (startup orphan recovery)
    /// - Completed and Error are terminal
    pub fn is_valid_transition(&self, to: &ArticleStatus) -> bool {
        use ArticleStatus::*;

        matches!(
            (self, to),
            (Queued, Downloading)
                | (Downloading, Extracting)
                | (Extracting, Completed)
                | (Downloading, Error)
                | (Extracting, Error)
                | (Downloading, Queued)
                | (Extracting, Queued)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ArticleStatus::Completed | ArticleStatus::Error)
    }

    /// Statuses that mean a worker owns the article right now.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ArticleStatus::Downloading | ArticleStatus::Extracting)
    }
}

impl std::fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ArticleStatus::Queued => "queued",
            ArticleStatus::Downloading => "downloading",
            ArticleStatus::Extracting => "extracting",
            ArticleStatus::Completed => "completed",
            ArticleStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

pub fn parse_article_status(s: &str) -> Result<ArticleStatus, String> {
    match s.to_lowercase().as_str() {
        "queued" => Ok(ArticleStatus::Queued),
        "downloading" => Ok(ArticleStatus::Downloading),
        "extracting" => Ok(ArticleStatus::Extracting),
        "completed" => Ok(ArticleStatus::Completed),
        "error" => Ok(ArticleStatus::Error),
        _ => Err(format!(
            "Invalid status '{}': expected queued, downloading, extracting, completed, or error",
            s
        )),
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Extracting,
    Completed,
    Failed,
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionStatus::Extracting => write!(f, "extracting"),
            ExtractionStatus::Completed => write!(f, "completed"),
            ExtractionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelPreference {
    #[default]
    Haiku,
    Sonnet,
}

impl std::fmt::Display for ModelPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelPreference::Haiku => write!(f, "haiku"),
            ModelPreference::Sonnet => write!(f, "sonnet"),
        }
    }
}

pub fn parse_model_preference(s: &str) -> Result<ModelPreference, String> {
    match s.to_lowercase().as_str() {
        "haiku" => Ok(ModelPreference::Haiku),
        "sonnet" => Ok(ModelPreference::Sonnet),
        _ => Err(format!("Invalid model '{}': expected haiku or sonnet", s)),
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Number,
    Date,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Text => write!(f, "text"),
            FieldType::Number => write!(f, "number"),
            FieldType::Date => write!(f, "date"),
        }
    }
}

pub fn parse_field_type(s: &str) -> Result<FieldType, String> {
    match s.to_lowercase().as_str() {
        "text" => Ok(FieldType::Text),
        "number" => Ok(FieldType::Number),
        "date" => Ok(FieldType::Date),
        _ => Err(format!(
            "Invalid field type '{}': expected text, number, or date",
            s
        )),
    }
}

/// Parse a command-line field spec: `name[:label[:type[:required]]]`.
///
/// The label defaults to the name and the type to text.
pub fn parse_field_spec(spec: &str) -> Result<ExtractionField, String> {
    let parts: Vec<&str> = spec.split(':').map(str::trim).collect();
    let name = parts[0];
    if name.is_empty() {
        return Err(format!("Invalid field '{}': name must not be empty", spec));
    }
    if parts.len() > 4 {
        return Err(format!(
            "Invalid field '{}': expected name[:label[:type[:required]]]",
            spec
        ));
    }

    let label = parts.get(1).filter(|l| !l.is_empty()).unwrap_or(&name);
    let field_type = match parts.get(2).filter(|t| !t.is_empty()) {
        Some(t) => parse_field_type(t)?,
        None => FieldType::Text,
    };
    let required = match parts.get(3) {
        None | Some(&"") | Some(&"optional") => false,
        Some(&"required") => true,
        Some(other) => {
            return Err(format!(
                "Invalid field '{}': expected 'required' or 'optional', got '{}'",
                spec, other
            ))
        }
    };

    Ok(ExtractionField {
        name: name.to_string(),
        label: label.to_string(),
        field_type,
        description: String::new(),
        required,
        example: None,
    })
}

// --- Records ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Article {
    pub id: String,
    pub account_id: String,
    pub url: String,
    pub content_id: String,
    pub status: ArticleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub raw_content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub extraction_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Article {
    /// A fresh article waiting for a worker slot.
    pub fn queued(account_id: &str, url: &str, content_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            account_id: account_id.to_string(),
            url: url.to_string(),
            content_id: content_id.to_string(),
            status: ArticleStatus::Queued,
            title: None,
            author: None,
            publish_time: None,
            raw_content: Value::Null,
            content: None,
            error_message: None,
            extraction_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Text handed to the extraction collaborator: normalized content when
    /// present, otherwise the serialized raw payload.
    pub fn extraction_content(&self) -> Option<String> {
        match self.content.as_deref() {
            Some(text) if !text.trim().is_empty() => Some(text.to_string()),
            _ if !self.raw_content.is_null() => Some(self.raw_content.to_string()),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ExtractionField {
    pub name: String,
    pub label: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DimensionTemplate {
    pub id: String,
    pub account_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<ExtractionField>,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub model_preference: ModelPreference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    #[serde(default)]
    pub sort_order: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// Input for creating a dimension template.
#[derive(Deserialize, Clone, Debug, PartialEq, Default)]
pub struct NewTemplate {
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub fields: Vec<ExtractionField>,
    #[serde(default)]
    pub model_preference: ModelPreference,
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ExtractionResult {
    pub id: String,
    pub article_id: String,
    pub template_id: String,
    pub batch_id: String,
    #[serde(default)]
    pub extracted_data: Record,
    pub status: ExtractionStatus,
    pub model_used: String,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// --- Collaborator payloads ---

/// Normalized output of the content-fetch collaborator.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct FetchedArticle {
    #[serde(default)]
    pub content_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub raw: Value,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExtractionRequest {
    pub content: String,
    pub fields: Vec<ExtractionField>,
    pub model_preference: ModelPreference,
    pub custom_prompt: Option<String>,
}

/// Records plus whole-call metrics returned by the AI collaborator.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ExtractionResponse {
    pub records: Vec<Record>,
    pub model_used: String,
    pub tokens_used: u64,
    pub duration_ms: u64,
}

// --- Updates ---

#[derive(Clone, Debug, PartialEq)]
pub enum TemplateUpdate {
    Rename(String),
    SetDescription(Option<String>),
    SetModel(ModelPreference),
    SetCustomPrompt(Option<String>),
    ReplaceFields(Vec<ExtractionField>),
    AddFields(Vec<ExtractionField>),
    Lock,
    Unlock,
    Deactivate,
    SetSortOrder(u32),
}

// --- Outcomes ---

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IntakeOutcome {
    Accepted { url: String, article_id: String },
    Rejected { url: String, reason: String },
}

impl IntakeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IntakeOutcome::Accepted { .. })
    }

    pub fn url(&self) -> &str {
        match self {
            IntakeOutcome::Accepted { url, .. } | IntakeOutcome::Rejected { url, .. } => url,
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub outcomes: Vec<IntakeOutcome>,
}

/// What one orchestrator run left behind for an (article, template) pair.
#[derive(Clone, Debug, PartialEq)]
pub enum ExtractionOutcome {
    Extracted { batch_id: String, records: usize },
    Empty,
    Skipped,
    Failed(String),
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    Accepted { placeholder_id: String },
    Skipped { existing: ExtractionStatus },
    Failed { error: String },
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct TemplateDispatch {
    pub template_id: String,
    pub template_name: String,
    #[serde(flatten)]
    pub status: DispatchStatus,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ExtractAllSummary {
    pub article_id: String,
    pub total: usize,
    pub started: usize,
    pub skipped: usize,
    pub results: Vec<TemplateDispatch>,
}

#[derive(Serialize, Clone, Debug, PartialEq, Default)]
pub struct ResultStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_tokens: u64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ResultsPage {
    pub items: Vec<ExtractionResult>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub stats: ResultStats,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ResultsQuery {
    pub template_id: String,
    pub page: usize,
    pub page_size: usize,
    pub keyword: Option<String>,
}
