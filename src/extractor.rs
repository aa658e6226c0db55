use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::ExtractionConfig;
use crate::error::PipelineError;
use crate::prompt;
use crate::types::{ExtractionRequest, ExtractionResponse, Record};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Trait for the AI extraction collaborator. Enables mocking in pipeline tests.
pub trait FieldExtractor: Send + Sync {
    fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> impl std::future::Future<Output = Result<ExtractionResponse, PipelineError>> + Send;
}

// --- Response parsing ---

/// Pull the JSON payload out of a model's text reply.
///
/// The reply may wrap the JSON in prose or code fences; the span from the
/// first `{`/`[` to the last matching closer is parsed first, then the whole
/// text. Anything that still fails to parse is a hard failure.
pub fn parse_json_response(text: &str) -> Result<Value, PipelineError> {
    if let Some(span) = json_span(text) {
        if let Ok(value) = serde_json::from_str(span) {
            return Ok(value);
        }
    }
    serde_json::from_str(text.trim()).map_err(|_| PipelineError::ResponseParse(text.to_string()))
}

fn json_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}

/// Normalize a parsed reply into records: an array of objects is taken as-is,
/// a single object becomes one record, `null` or `[]` means no records.
pub fn records_from_value(value: Value) -> Result<Vec<Record>, PipelineError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(PipelineError::ResponseParse(format!(
                    "expected an object per record, got {}",
                    other
                ))),
            })
            .collect(),
        Value::Object(map) => Ok(vec![map]),
        Value::Null => Ok(Vec::new()),
        other => Err(PipelineError::ResponseParse(format!(
            "expected a JSON array or object, got {}",
            other
        ))),
    }
}

// --- HTTP implementation ---

#[derive(Deserialize, Debug)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize, Debug)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Extraction collaborator backed by the Anthropic Messages API.
#[derive(Clone)]
pub struct HttpExtractor {
    client: reqwest::Client,
    config: ExtractionConfig,
    api_key: String,
}

impl HttpExtractor {
    /// Reads the API key from the environment variable named in the config.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, PipelineError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            PipelineError::Config(format!("{} not set", config.api_key_env))
        })?;
        Self::new(config, api_key)
    }

    pub fn new(config: &ExtractionConfig, api_key: String) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }
}

impl FieldExtractor for HttpExtractor {
    async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResponse, PipelineError> {
        let start = Instant::now();
        let model = self.config.model_id(request.model_preference).to_string();
        let prompt = prompt::build_extraction_prompt(request);

        let response = self
            .client
            .post(format!(
                "{}/v1/messages",
                self.config.base_url.trim_end_matches('/')
            ))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&serde_json::json!({
                "model": model,
                "max_tokens": self.config.max_tokens,
                "temperature": 0,
                "messages": [{ "role": "user", "content": prompt }],
            }))
            .send()
            .await
            .map_err(|e| PipelineError::Extraction(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Extraction(format!(
                "API returned {}: {}",
                status, body
            )));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Extraction(format!("invalid response body: {}", e)))?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let tokens_used = body.usage.input_tokens + body.usage.output_tokens;

        let records = match body.content.into_iter().next() {
            Some(ContentBlock {
                kind,
                text: Some(text),
            }) if kind == "text" => records_from_value(parse_json_response(&text)?)?,
            _ => Vec::new(),
        };

        debug!(
            model = %model,
            records = records.len(),
            tokens_used,
            duration_ms,
            "Extraction call finished"
        );

        Ok(ExtractionResponse {
            records,
            model_used: model,
            tokens_used,
            duration_ms,
        })
    }
}

// --- Mock ---

/// Mock extractor for pipeline tests.
///
/// Returns results from a configurable sequence (first call gets the first
/// result); once the sequence is empty every call gets the fallback.
pub struct MockExtractor {
    results: tokio::sync::Mutex<Vec<Result<ExtractionResponse, String>>>,
    fallback: Result<ExtractionResponse, String>,
    delay: Duration,
    requests: tokio::sync::Mutex<Vec<ExtractionRequest>>,
}

impl MockExtractor {
    pub fn new(results: Vec<Result<ExtractionResponse, String>>) -> Self {
        let mut reversed = results;
        reversed.reverse();
        Self {
            results: tokio::sync::Mutex::new(reversed),
            fallback: Err("MockExtractor: no more results in sequence".to_string()),
            delay: Duration::ZERO,
            requests: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Every call returns `records` with the given whole-call metrics.
    pub fn always(records: Vec<Record>, tokens_used: u64, duration_ms: u64) -> Self {
        Self {
            fallback: Ok(ExtractionResponse {
                records,
                model_used: "mock-model".to_string(),
                tokens_used,
                duration_ms,
            }),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests received so far, in call order.
    pub async fn requests(&self) -> Vec<ExtractionRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

impl FieldExtractor for MockExtractor {
    async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResponse, PipelineError> {
        self.requests.lock().await.push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.results.lock().await.pop();
        next.unwrap_or_else(|| self.fallback.clone())
            .map_err(PipelineError::Extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_array() {
        let text = "Here you go:\n```json\n[{\"a\": 1}, {\"a\": 2}]\n```";
        let value = parse_json_response(text).unwrap();
        assert_eq!(records_from_value(value).unwrap().len(), 2);
    }

    #[test]
    fn single_object_becomes_one_record() {
        let value = parse_json_response("{\"name\": \"x\"}").unwrap();
        let records = records_from_value(value).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "x");
    }

    #[test]
    fn unparseable_reply_is_hard_failure() {
        let err = parse_json_response("I could not find anything.").unwrap_err();
        assert!(matches!(err, PipelineError::ResponseParse(_)));
    }

    #[test]
    fn scalar_array_rejected() {
        let err = records_from_value(serde_json::json!([1, 2])).unwrap_err();
        assert!(matches!(err, PipelineError::ResponseParse(_)));
    }

    #[test]
    fn empty_array_is_no_records() {
        assert!(records_from_value(serde_json::json!([])).unwrap().is_empty());
    }
}
