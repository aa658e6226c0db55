use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{FetchConfig, RetryPolicy};
use crate::error::PipelineError;
use crate::types::FetchedArticle;

/// Trait for the content-fetch collaborator. Enables mocking in pipeline tests.
pub trait ContentFetcher: Send + Sync {
    fn fetch(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<FetchedArticle, PipelineError>> + Send;
}

/// Call `fetcher` with bounded retries and linear backoff.
///
/// Makes `policy.max_attempts()` attempts; after failed attempt `n` it waits
/// `n * backoff_base` (2s, 4s with the defaults). The last error is returned.
pub async fn fetch_with_retry<F: ContentFetcher>(
    fetcher: &F,
    url: &str,
    policy: &RetryPolicy,
) -> Result<FetchedArticle, PipelineError> {
    let max_attempts = policy.max_attempts();
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        debug!(url, attempt, max_attempts, "Fetching article");

        match fetcher.fetch(url).await {
            Ok(article) => {
                if attempt > 1 {
                    info!(url, attempt, "Fetch succeeded after retry");
                }
                return Ok(article);
            }
            Err(e) => {
                warn!(url, attempt, max_attempts, error = %e, "Fetch attempt failed");
                last_error = Some(e);
                if attempt < max_attempts {
                    tokio::time::sleep(policy.backoff_after(attempt)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| PipelineError::Fetch(format!("no attempt made for {}", url))))
}

// --- HTTP implementation ---

#[derive(Deserialize, Debug)]
struct SpiderResponse {
    status: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Fetch collaborator backed by the spider service's `POST /api/extract`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedArticle, PipelineError> {
        let response = self
            .client
            .post(format!("{}/api/extract", self.base_url))
            .json(&serde_json::json!({ "url": url, "output_format": "markdown" }))
            .send()
            .await
            .map_err(|e| PipelineError::Fetch(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Fetch(format!(
                "spider service returned {}: {}",
                status, body
            )));
        }

        let body: SpiderResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Fetch(format!("invalid response body: {}", e)))?;

        normalize_response(body)
    }
}

fn normalize_response(body: SpiderResponse) -> Result<FetchedArticle, PipelineError> {
    if body.status != "success" {
        return Err(PipelineError::Fetch(
            body.error
                .unwrap_or_else(|| format!("spider status '{}'", body.status)),
        ));
    }

    let data = body.data.unwrap_or(Value::Null);
    let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
    let meta = data.get("meta_info");

    Ok(FetchedArticle {
        content_id: text(data.get("news_id")).filter(|s| !s.is_empty()),
        title: text(data.get("title")).unwrap_or_default(),
        author: text(meta.and_then(|m| m.get("author_name"))).filter(|s| !s.is_empty()),
        publish_time: text(meta.and_then(|m| m.get("publish_time")))
            .as_deref()
            .and_then(parse_publish_time),
        content: body.markdown.unwrap_or_default(),
        raw: data,
    })
}

/// Parse a publish timestamp: RFC 3339, or `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_publish_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

// --- Mock ---

/// Mock fetcher for pipeline tests.
///
/// URLs with a scripted sequence get the next scripted result; every other
/// URL gets the default behaviour (success with generated content, or a
/// fixed failure). Calls are recorded in order.
pub struct MockFetcher {
    scripted: std::sync::Mutex<HashMap<String, VecDeque<Result<FetchedArticle, String>>>>,
    fail_with: Option<String>,
    delay: Duration,
    calls: std::sync::Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn succeeding() -> Self {
        Self {
            scripted: std::sync::Mutex::new(HashMap::new()),
            fail_with: None,
            delay: Duration::ZERO,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::succeeding()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Results returned for `url`, first call gets the first result.
    pub fn script(self, url: &str, results: Vec<Result<FetchedArticle, String>>) -> Self {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.insert(url.to_string(), results.into());
        }
        self
    }

    /// URLs fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn article_for(url: &str) -> FetchedArticle {
        FetchedArticle {
            content_id: None,
            title: format!("Article at {}", url),
            author: Some("Mock Author".to_string()),
            publish_time: None,
            raw: serde_json::json!({ "news_url": url }),
            content: format!("# Article\n\nBody of {}", url),
        }
    }
}

impl ContentFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedArticle, PipelineError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(url.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self
            .scripted
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(url).and_then(VecDeque::pop_front));

        match (scripted, &self.fail_with) {
            (Some(result), _) => result.map_err(PipelineError::Fetch),
            (None, Some(message)) => Err(PipelineError::Fetch(message.clone())),
            (None, None) => Ok(Self::article_for(url)),
        }
    }
}
