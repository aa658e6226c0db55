#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;

use article_pipeline::config::AppConfig;
use article_pipeline::coordinator::{spawn_store, StoreHandle};
use article_pipeline::extractor::MockExtractor;
use article_pipeline::fetch::MockFetcher;
use article_pipeline::pipeline::Pipeline;
use article_pipeline::store::StoreFile;
use article_pipeline::types::{
    Article, DimensionTemplate, ExtractionField, ExtractionResponse, FieldType, ModelPreference,
    NewTemplate, Record, TemplateUpdate,
};

pub type TestPipeline = Pipeline<MockFetcher, MockExtractor>;

/// A pipeline over an in-memory store with one account already created.
pub struct Fixture {
    pub pipeline: TestPipeline,
    pub store: StoreHandle,
    pub account_id: String,
}

/// Config tuned for tests: `max_concurrent` slots, 1ms fetch backoff and
/// no startup delay.
pub fn test_config(max_concurrent: u32) -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.max_concurrent = max_concurrent;
    config.pipeline.startup_resume_delay_secs = 0;
    config.fetch.backoff_base_ms = 1;
    config
}

pub async fn setup(fetcher: MockFetcher, extractor: MockExtractor, max_concurrent: u32) -> Fixture {
    setup_with_config(fetcher, extractor, test_config(max_concurrent)).await
}

pub async fn setup_with_config(
    fetcher: MockFetcher,
    extractor: MockExtractor,
    config: AppConfig,
) -> Fixture {
    let (store, _task) = spawn_store(StoreFile::default(), None);
    let account = store
        .create_account("Test account", None)
        .await
        .expect("create account");
    let pipeline = Pipeline::new(store.clone(), fetcher, extractor, &config);
    Fixture {
        pipeline,
        store,
        account_id: account.id,
    }
}

/// Short-form article URL whose content id is `article{n}`.
pub fn article_url(n: usize) -> String {
    format!("https://mp.weixin.qq.com/s/article{}", n)
}

pub fn field(name: &str) -> ExtractionField {
    ExtractionField {
        name: name.to_string(),
        label: name.to_string(),
        field_type: FieldType::Text,
        description: format!("The {}", name),
        required: false,
        example: None,
    }
}

pub fn record(values: serde_json::Value) -> Record {
    match values {
        serde_json::Value::Object(map) => map,
        other => panic!("record() needs a JSON object, got {}", other),
    }
}

/// `n` records with an `amount` and a `year` field.
pub fn records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| record(json!({ "amount": 100 + i, "year": "2025" })))
        .collect()
}

pub fn response(records: Vec<Record>, tokens_used: u64, duration_ms: u64) -> ExtractionResponse {
    ExtractionResponse {
        records,
        model_used: "mock-model".to_string(),
        tokens_used,
        duration_ms,
    }
}

/// Create a template with the given field names, unlocked.
pub async fn make_template(store: &StoreHandle, account_id: &str, name: &str) -> DimensionTemplate {
    store
        .create_template(NewTemplate {
            account_id: account_id.to_string(),
            name: name.to_string(),
            description: None,
            fields: vec![field("amount"), field("year")],
            model_preference: ModelPreference::Haiku,
            custom_prompt: None,
        })
        .await
        .expect("create template")
}

/// Create and lock a template.
pub async fn make_locked_template(
    store: &StoreHandle,
    account_id: &str,
    name: &str,
) -> DimensionTemplate {
    let template = make_template(store, account_id, name).await;
    store
        .update_template(&template.id, TemplateUpdate::Lock)
        .await
        .expect("lock template")
}

/// Insert a queued article directly, bypassing intake.
pub async fn seed_queued(store: &StoreHandle, account_id: &str, n: usize) -> Article {
    seed_queued_at(store, account_id, n, Utc::now()).await
}

pub async fn seed_queued_at(
    store: &StoreHandle,
    account_id: &str,
    n: usize,
    created_at: DateTime<Utc>,
) -> Article {
    let mut article = Article::queued(account_id, &article_url(n), &format!("article{}", n));
    article.created_at = created_at;
    article.updated_at = created_at;
    store.insert_article(article).await.expect("insert article")
}

/// Timestamp `secs` seconds after a fixed base.
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
        + ChronoDuration::seconds(secs)
}

/// An article that has been downloaded and is ready for the extraction API.
pub async fn seed_downloaded(store: &StoreHandle, account_id: &str, n: usize) -> Article {
    let article = seed_queued(store, account_id, n).await;
    assert!(store.claim_article(&article.id).await.expect("claim"));
    store
        .record_download(&article.id, MockFetcher::article_for(&article.url))
        .await
        .expect("record download");
    store.finish_article(&article.id).await.expect("finish")
}
