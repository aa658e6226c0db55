mod common;

use serde_json::json;

use article_pipeline::error::PipelineError;
use article_pipeline::fetch::MockFetcher;
use article_pipeline::store::{self, PlaceholderClaim, StoreFile};
use article_pipeline::types::{
    Article, ArticleStatus, ExtractionStatus, FetchedArticle, ModelPreference, NewTemplate,
    ResultsQuery, TemplateUpdate,
};

// --- Test helpers ---

fn seeded() -> (StoreFile, String) {
    let mut data = StoreFile::default();
    let account = store::create_account(&mut data, "acme", None);
    (data, account.id)
}

fn new_template(account_id: &str, name: &str) -> NewTemplate {
    NewTemplate {
        account_id: account_id.to_string(),
        name: name.to_string(),
        description: None,
        fields: vec![common::field("amount"), common::field("year")],
        model_preference: ModelPreference::Haiku,
        custom_prompt: None,
    }
}

fn queued(data: &mut StoreFile, account_id: &str, n: usize) -> Article {
    store::insert_article(
        data,
        Article::queued(account_id, &common::article_url(n), &format!("article{}", n)),
    )
    .unwrap()
}

/// Queued -> Downloading -> Extracting with mock content.
fn downloaded(data: &mut StoreFile, account_id: &str, n: usize) -> Article {
    let article = queued(data, account_id, n);
    assert!(store::claim_article(data, &article.id).unwrap());
    store::record_download(data, &article.id, MockFetcher::article_for(&article.url)).unwrap()
}

// =============================================================================
// Load / save
// =============================================================================

#[test]
fn load_missing_file_returns_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let data = store::load(&dir.path().join("store.json")).unwrap();
    assert_eq!(data, StoreFile::default());
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.json");

    let (mut data, account_id) = seeded();
    downloaded(&mut data, &account_id, 1);
    store::create_template(&mut data, new_template(&account_id, "deals")).unwrap();

    store::save(&path, &data).unwrap();
    let loaded = store::load(&path).unwrap();
    assert_eq!(loaded, data);

    // No temp files left next to the store
    let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn load_rejects_unknown_schema_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, r#"{"schema_version": 99}"#).unwrap();
    let err = store::load(&path).unwrap_err();
    assert!(matches!(err, PipelineError::Persist(_)));
}

#[test]
fn load_rejects_corrupt_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(store::load(&path).is_err());
}

// =============================================================================
// Articles
// =============================================================================

#[test]
fn insert_rejects_duplicate_content_id_in_account() {
    let (mut data, account_id) = seeded();
    queued(&mut data, &account_id, 1);

    let long_form = Article::queued(
        &account_id,
        "https://mp.weixin.qq.com/s?__biz=x&sn=article1",
        "article1",
    );
    let err = store::insert_article(&mut data, long_form).unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateContentId(_)));
    assert_eq!(data.articles.len(), 1);
}

#[test]
fn same_content_id_allowed_in_another_account() {
    let (mut data, account_id) = seeded();
    let other = store::create_account(&mut data, "other", None);
    queued(&mut data, &account_id, 1);

    let article = Article::queued(
        &other.id,
        "https://mp.weixin.qq.com/s?__biz=x&sn=article1",
        "article1",
    );
    assert!(store::insert_article(&mut data, article).is_ok());
}

#[test]
fn insert_rejects_duplicate_url_globally() {
    let (mut data, account_id) = seeded();
    let other = store::create_account(&mut data, "other", None);
    queued(&mut data, &account_id, 1);

    let article = Article::queued(&other.id, &common::article_url(1), "different");
    let err = store::insert_article(&mut data, article).unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateUrl(_)));
}

#[test]
fn insert_rejects_unknown_account() {
    let mut data = StoreFile::default();
    let err = store::insert_article(&mut data, Article::queued("nope", "https://h/s/a", "a"))
        .unwrap_err();
    assert!(matches!(err, PipelineError::AccountNotFound(_)));
}

#[test]
fn claim_is_conditional_on_queued() {
    let (mut data, account_id) = seeded();
    let article = queued(&mut data, &account_id, 1);

    assert!(store::claim_article(&mut data, &article.id).unwrap());
    assert!(!store::claim_article(&mut data, &article.id).unwrap());
    assert_eq!(
        store::find_article(&data, &article.id).unwrap().status,
        ArticleStatus::Downloading
    );
}

#[test]
fn record_download_stores_fields_and_moves_to_extracting() {
    let (mut data, account_id) = seeded();
    let article = queued(&mut data, &account_id, 1);
    store::claim_article(&mut data, &article.id).unwrap();

    let fetched = FetchedArticle {
        content_id: Some("fresh-id".to_string()),
        title: "Title".to_string(),
        author: Some("Ann".to_string()),
        publish_time: None,
        raw: json!({"k": "v"}),
        content: "Body".to_string(),
    };
    let updated = store::record_download(&mut data, &article.id, fetched).unwrap();

    assert_eq!(updated.status, ArticleStatus::Extracting);
    assert_eq!(updated.title.as_deref(), Some("Title"));
    assert_eq!(updated.content.as_deref(), Some("Body"));
    assert_eq!(updated.content_id, "fresh-id");
}

#[test]
fn record_download_keeps_url_id_when_fetched_id_is_taken() {
    let (mut data, account_id) = seeded();
    queued(&mut data, &account_id, 1);
    let second = queued(&mut data, &account_id, 2);
    store::claim_article(&mut data, &second.id).unwrap();

    let mut fetched = MockFetcher::article_for(&second.url);
    fetched.content_id = Some("article1".to_string());
    let updated = store::record_download(&mut data, &second.id, fetched).unwrap();

    assert_eq!(updated.content_id, "article2");
}

#[test]
fn record_download_requires_downloading() {
    let (mut data, account_id) = seeded();
    let article = queued(&mut data, &account_id, 1);
    let err = store::record_download(&mut data, &article.id, MockFetcher::article_for("x"))
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
}

#[test]
fn fail_article_records_message() {
    let (mut data, account_id) = seeded();
    let article = queued(&mut data, &account_id, 1);
    store::claim_article(&mut data, &article.id).unwrap();

    let failed = store::fail_article(&mut data, &article.id, "fetch failed").unwrap();
    assert_eq!(failed.status, ArticleStatus::Error);
    assert_eq!(failed.error_message.as_deref(), Some("fetch failed"));
}

#[test]
fn delete_article_cascades_to_results() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();
    let article = downloaded(&mut data, &account_id, 1);
    let keep = downloaded(&mut data, &account_id, 2);

    for a in [&article, &keep] {
        store::commit_batch(
            &mut data,
            &a.id,
            &template.id,
            None,
            &common::response(common::records(2), 10, 10),
        )
        .unwrap();
    }

    store::delete_article(&mut data, &article.id).unwrap();
    assert!(data.results.iter().all(|r| r.article_id == keep.id));
    assert_eq!(data.results.len(), 2);
    assert!(store::delete_article(&mut data, &article.id).unwrap_err().is_not_found());
}

#[test]
fn delete_articles_counts_only_existing() {
    let (mut data, account_id) = seeded();
    let a = queued(&mut data, &account_id, 1);
    let b = queued(&mut data, &account_id, 2);
    queued(&mut data, &account_id, 3);

    let deleted = store::delete_articles(&mut data, &[a.id, b.id, "missing".to_string()]);
    assert_eq!(deleted, 2);
    assert_eq!(data.articles.len(), 1);
}

#[test]
fn articles_by_status_is_oldest_first() {
    let (mut data, account_id) = seeded();
    for (n, secs) in [(1, 30), (2, 10), (3, 20)] {
        let mut article =
            Article::queued(&account_id, &common::article_url(n), &format!("article{}", n));
        article.created_at = common::at(secs);
        store::insert_article(&mut data, article).unwrap();
    }

    let urls: Vec<String> = store::articles_by_status(&data, ArticleStatus::Queued)
        .into_iter()
        .map(|a| a.url)
        .collect();
    assert_eq!(
        urls,
        vec![
            common::article_url(2),
            common::article_url(3),
            common::article_url(1)
        ]
    );
}

#[test]
fn requeue_orphans_resets_in_flight_work() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();
    let downloading = queued(&mut data, &account_id, 1);
    store::claim_article(&mut data, &downloading.id).unwrap();
    let extracting = downloaded(&mut data, &account_id, 2);
    let untouched = queued(&mut data, &account_id, 3);

    let claim = store::begin_placeholder(&mut data, &extracting.id, &template.id, "m").unwrap();
    let PlaceholderClaim::Created(placeholder) = claim else {
        panic!("expected placeholder");
    };

    let (requeued, interrupted) = store::requeue_orphans(&mut data);
    assert_eq!((requeued, interrupted), (2, 1));

    for id in [&downloading.id, &extracting.id, &untouched.id] {
        assert_eq!(
            store::find_article(&data, id).unwrap().status,
            ArticleStatus::Queued
        );
    }
    let row = data.results.iter().find(|r| r.id == placeholder.id).unwrap();
    assert_eq!(row.status, ExtractionStatus::Failed);
    assert_eq!(row.error_message.as_deref(), Some("interrupted"));
}

// =============================================================================
// Templates
// =============================================================================

#[test]
fn templates_start_unlocked_and_active() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();
    assert!(!template.is_locked);
    assert!(template.is_active);
}

#[test]
fn create_template_rejects_unknown_account_and_bad_fields() {
    let mut data = StoreFile::default();
    assert!(store::create_template(&mut data, new_template("nope", "t"))
        .unwrap_err()
        .is_not_found());

    let (mut data, account_id) = seeded();
    let mut bad = new_template(&account_id, "t");
    bad.fields.push(common::field("amount"));
    assert!(matches!(
        store::create_template(&mut data, bad),
        Err(PipelineError::InvalidFields(_))
    ));
}

#[test]
fn locked_fields_are_append_only() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();

    // Unlocked: fields can be replaced, not appended
    assert!(matches!(
        store::update_template(
            &mut data,
            &template.id,
            TemplateUpdate::AddFields(vec![common::field("extra")])
        ),
        Err(PipelineError::TemplateNotLocked(_))
    ));
    store::update_template(
        &mut data,
        &template.id,
        TemplateUpdate::ReplaceFields(vec![common::field("amount")]),
    )
    .unwrap();

    store::update_template(&mut data, &template.id, TemplateUpdate::Lock).unwrap();

    assert!(matches!(
        store::update_template(
            &mut data,
            &template.id,
            TemplateUpdate::ReplaceFields(vec![common::field("other")])
        ),
        Err(PipelineError::TemplateLocked(_))
    ));
    assert!(matches!(
        store::update_template(
            &mut data,
            &template.id,
            TemplateUpdate::AddFields(vec![common::field("amount")])
        ),
        Err(PipelineError::InvalidFields(_))
    ));

    let updated = store::update_template(
        &mut data,
        &template.id,
        TemplateUpdate::AddFields(vec![common::field("year")]),
    )
    .unwrap();
    let names: Vec<&str> = updated.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["amount", "year"]);
}

#[test]
fn lock_and_unlock_reject_repeats() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();

    assert!(matches!(
        store::update_template(&mut data, &template.id, TemplateUpdate::Unlock),
        Err(PipelineError::TemplateAlreadyUnlocked(_))
    ));
    store::update_template(&mut data, &template.id, TemplateUpdate::Lock).unwrap();
    assert!(matches!(
        store::update_template(&mut data, &template.id, TemplateUpdate::Lock),
        Err(PipelineError::TemplateAlreadyLocked(_))
    ));

    // Metadata stays editable while locked
    let renamed = store::update_template(
        &mut data,
        &template.id,
        TemplateUpdate::Rename("renamed".to_string()),
    )
    .unwrap();
    assert_eq!(renamed.name, "renamed");
    assert!(renamed.is_locked);
}

#[test]
fn locked_templates_excludes_unlocked_and_inactive() {
    let (mut data, account_id) = seeded();
    let a = store::create_template(&mut data, new_template(&account_id, "a")).unwrap();
    let b = store::create_template(&mut data, new_template(&account_id, "b")).unwrap();
    let c = store::create_template(&mut data, new_template(&account_id, "c")).unwrap();
    store::create_template(&mut data, new_template(&account_id, "unlocked")).unwrap();

    for t in [&a, &b, &c] {
        store::update_template(&mut data, &t.id, TemplateUpdate::Lock).unwrap();
    }
    store::update_template(&mut data, &b.id, TemplateUpdate::Deactivate).unwrap();
    store::update_template(&mut data, &a.id, TemplateUpdate::SetSortOrder(10)).unwrap();

    let ids: Vec<String> = store::locked_templates(&data, &account_id)
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec![c.id, a.id]);
}

#[test]
fn metadata_edits_allowed_while_locked() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();
    store::update_template(&mut data, &template.id, TemplateUpdate::Lock).unwrap();

    let updated = store::update_template(
        &mut data,
        &template.id,
        TemplateUpdate::SetModel(ModelPreference::Sonnet),
    )
    .unwrap();
    assert_eq!(updated.model_preference, ModelPreference::Sonnet);
    assert!(updated.is_locked);

    let updated = store::update_template(
        &mut data,
        &template.id,
        TemplateUpdate::SetDescription(Some("funding rounds".to_string())),
    )
    .unwrap();
    assert_eq!(updated.description.as_deref(), Some("funding rounds"));
    assert_eq!(updated.model_preference, ModelPreference::Sonnet);
    assert!(updated.is_locked);
    assert_eq!(updated.fields, template.fields);

    let cleared =
        store::update_template(&mut data, &template.id, TemplateUpdate::SetDescription(None))
            .unwrap();
    assert_eq!(cleared.description, None);

    // Locked templates are extracted with the new model
    let locked = store::locked_templates(&data, &account_id);
    assert_eq!(locked.len(), 1);
    assert_eq!(locked[0].model_preference, ModelPreference::Sonnet);
}

#[test]
fn reorder_assigns_list_positions() {
    let (mut data, account_id) = seeded();
    let a = store::create_template(&mut data, new_template(&account_id, "a")).unwrap();
    let b = store::create_template(&mut data, new_template(&account_id, "b")).unwrap();
    let c = store::create_template(&mut data, new_template(&account_id, "c")).unwrap();
    for t in [&a, &b, &c] {
        store::update_template(&mut data, &t.id, TemplateUpdate::Lock).unwrap();
    }

    let listed = store::reorder_templates(
        &mut data,
        &account_id,
        &[c.id.clone(), a.id.clone(), b.id.clone()],
    )
    .unwrap();

    let order: Vec<(&str, u32)> = listed
        .iter()
        .map(|t| (t.name.as_str(), t.sort_order))
        .collect();
    assert_eq!(order, vec![("c", 0), ("a", 1), ("b", 2)]);

    let ids: Vec<String> = store::locked_templates(&data, &account_id)
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec![c.id, a.id, b.id]);
}

#[test]
fn reorder_rejects_foreign_or_unknown_templates() {
    let (mut data, account_id) = seeded();
    let other_account = store::create_account(&mut data, "other", None);
    let mine = store::create_template(&mut data, new_template(&account_id, "mine")).unwrap();
    let theirs =
        store::create_template(&mut data, new_template(&other_account.id, "theirs")).unwrap();
    let before = data.clone();

    let err = store::reorder_templates(
        &mut data,
        &account_id,
        &[theirs.id.clone(), mine.id.clone()],
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::TemplateNotFound(ref id) if *id == theirs.id));

    assert!(store::reorder_templates(&mut data, &account_id, &["missing".to_string()])
        .unwrap_err()
        .is_not_found());
    assert!(matches!(
        store::reorder_templates(&mut data, "nope", &[mine.id.clone()]),
        Err(PipelineError::AccountNotFound(_))
    ));

    assert_eq!(data, before);
}

// =============================================================================
// Extraction results
// =============================================================================

#[test]
fn commit_batch_splits_metrics_and_shares_batch_id() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();
    let article = downloaded(&mut data, &account_id, 1);

    // Integer division: 100 / 3 = 33, 10 / 3 = 3
    let rows = store::commit_batch(
        &mut data,
        &article.id,
        &template.id,
        None,
        &common::response(common::records(3), 100, 10),
    )
    .unwrap();

    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.batch_id == rows[0].batch_id));
    assert!(rows.iter().all(|r| r.tokens_used == 33 && r.duration_ms == 3));
    assert!(rows.iter().all(|r| r.status == ExtractionStatus::Completed));
    assert_eq!(
        store::find_article(&data, &article.id)
            .unwrap()
            .extraction_count,
        3
    );
}

#[test]
fn second_completed_batch_is_rejected() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();
    let article = downloaded(&mut data, &account_id, 1);
    let response = common::response(common::records(1), 1, 1);

    store::commit_batch(&mut data, &article.id, &template.id, None, &response).unwrap();
    let before = data.clone();

    let err = store::commit_batch(&mut data, &article.id, &template.id, None, &response)
        .unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyExtracted { .. }));
    assert_eq!(data, before, "rejected commit must not change the store");
}

#[test]
fn placeholder_blocked_by_completed_or_running_rows() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();
    let article = downloaded(&mut data, &account_id, 1);

    let first = store::begin_placeholder(&mut data, &article.id, &template.id, "m").unwrap();
    assert!(matches!(first, PlaceholderClaim::Created(_)));

    let second = store::begin_placeholder(&mut data, &article.id, &template.id, "m").unwrap();
    assert_eq!(
        second,
        PlaceholderClaim::Blocked(ExtractionStatus::Extracting)
    );
}

#[test]
fn placeholder_replaces_failed_row() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();
    let article = downloaded(&mut data, &account_id, 1);

    let PlaceholderClaim::Created(first) =
        store::begin_placeholder(&mut data, &article.id, &template.id, "m").unwrap()
    else {
        panic!("expected placeholder");
    };
    store::fail_placeholder(&mut data, &first.id, "api down").unwrap();

    let PlaceholderClaim::Created(second) =
        store::begin_placeholder(&mut data, &article.id, &template.id, "m").unwrap()
    else {
        panic!("failed rows must not block a retry");
    };

    assert_ne!(first.id, second.id);
    assert_eq!(data.results.len(), 1);
    assert_eq!(data.results[0].status, ExtractionStatus::Extracting);
}

#[test]
fn commit_with_placeholder_replaces_it() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();
    let article = downloaded(&mut data, &account_id, 1);

    let PlaceholderClaim::Created(placeholder) =
        store::begin_placeholder(&mut data, &article.id, &template.id, "m").unwrap()
    else {
        panic!("expected placeholder");
    };

    store::commit_batch(
        &mut data,
        &article.id,
        &template.id,
        Some(&placeholder.id),
        &common::response(common::records(2), 10, 10),
    )
    .unwrap();

    assert!(data.results.iter().all(|r| r.id != placeholder.id));
    assert_eq!(data.results.len(), 2);
    assert!(!store::discard_placeholder(&mut data, &placeholder.id));
}

#[test]
fn inline_commit_clears_failed_rows_for_the_pair() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();
    let other = store::create_template(&mut data, new_template(&account_id, "other")).unwrap();
    let article = downloaded(&mut data, &account_id, 1);

    for t in [&template, &other] {
        let PlaceholderClaim::Created(p) =
            store::begin_placeholder(&mut data, &article.id, &t.id, "m").unwrap()
        else {
            panic!("expected placeholder");
        };
        store::fail_placeholder(&mut data, &p.id, "interrupted").unwrap();
    }

    let rows = store::commit_batch(
        &mut data,
        &article.id,
        &template.id,
        None,
        &common::response(common::records(2), 10, 10),
    )
    .unwrap();

    let pair: Vec<_> = data
        .results
        .iter()
        .filter(|r| r.template_id == template.id)
        .collect();
    assert_eq!(pair.len(), 2);
    assert!(pair.iter().all(|r| r.status == ExtractionStatus::Completed));
    assert!(pair.iter().all(|r| r.batch_id == rows[0].batch_id));

    // Other templates keep their own history
    let untouched: Vec<_> = data
        .results
        .iter()
        .filter(|r| r.template_id == other.id)
        .collect();
    assert_eq!(untouched.len(), 1);
    assert_eq!(untouched[0].status, ExtractionStatus::Failed);

    let page = store::results_by_template(
        &data,
        &ResultsQuery {
            template_id: template.id.clone(),
            page: 1,
            page_size: 10,
            keyword: None,
        },
    )
    .unwrap();
    assert_eq!(page.stats.total, 2);
    assert_eq!(page.stats.failed, 0);
}

#[test]
fn results_by_template_searches_pages_and_counts() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();

    for n in 1..=3 {
        let article = downloaded(&mut data, &account_id, n);
        let city = if n == 2 { "Shenzhen" } else { "Beijing" };
        store::commit_batch(
            &mut data,
            &article.id,
            &template.id,
            None,
            &common::response(vec![common::record(json!({ "city": city }))], 10, 5),
        )
        .unwrap();
    }
    let failing = downloaded(&mut data, &account_id, 4);
    let PlaceholderClaim::Created(p) =
        store::begin_placeholder(&mut data, &failing.id, &template.id, "m").unwrap()
    else {
        panic!("expected placeholder");
    };
    store::fail_placeholder(&mut data, &p.id, "boom").unwrap();

    let query = |keyword: Option<&str>, page: usize, page_size: usize| ResultsQuery {
        template_id: template.id.clone(),
        page,
        page_size,
        keyword: keyword.map(str::to_string),
    };

    let all = store::results_by_template(&data, &query(None, 1, 10)).unwrap();
    assert_eq!(all.total, 4);
    assert_eq!(all.stats.total, 4);
    assert_eq!(all.stats.completed, 3);
    assert_eq!(all.stats.failed, 1);
    assert_eq!(all.stats.total_tokens, 30);

    let found = store::results_by_template(&data, &query(Some("shenZHEN"), 1, 10)).unwrap();
    assert_eq!(found.total, 1);
    assert_eq!(found.items[0].extracted_data["city"], "Shenzhen");
    assert_eq!(found.stats.total, 4, "stats cover the whole template");

    let page2 = store::results_by_template(&data, &query(None, 2, 3)).unwrap();
    assert_eq!(page2.items.len(), 1);
    assert_eq!(page2.page, 2);

    let missing = ResultsQuery {
        template_id: "missing".to_string(),
        page: 1,
        page_size: 10,
        keyword: None,
    };
    assert!(store::results_by_template(&data, &missing)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn export_adds_meta_to_completed_rows() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();
    let article = downloaded(&mut data, &account_id, 1);
    store::commit_batch(
        &mut data,
        &article.id,
        &template.id,
        None,
        &common::response(vec![common::record(json!({ "amount": 5 }))], 1, 1),
    )
    .unwrap();

    let rows = store::export_template(&data, &template.id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["amount"], 5);
    assert_eq!(rows[0]["_meta"]["article_url"], common::article_url(1));
    assert_eq!(
        rows[0]["_meta"]["article_title"],
        MockFetcher::article_for(&common::article_url(1)).title
    );
    assert!(rows[0]["_meta"]["extracted_at"].is_string());
}

#[test]
fn delete_result_recounts_article() {
    let (mut data, account_id) = seeded();
    let template = store::create_template(&mut data, new_template(&account_id, "t")).unwrap();
    let article = downloaded(&mut data, &account_id, 1);
    let rows = store::commit_batch(
        &mut data,
        &article.id,
        &template.id,
        None,
        &common::response(common::records(2), 2, 2),
    )
    .unwrap();

    store::delete_result(&mut data, &rows[0].id).unwrap();
    assert_eq!(
        store::find_article(&data, &article.id)
            .unwrap()
            .extraction_count,
        1
    );
    assert!(matches!(
        store::delete_result(&mut data, &rows[0].id),
        Err(PipelineError::ResultNotFound(_))
    ));
}

#[test]
fn results_by_article_follow_template_order() {
    let (mut data, account_id) = seeded();
    let first = store::create_template(&mut data, new_template(&account_id, "first")).unwrap();
    let second = store::create_template(&mut data, new_template(&account_id, "second")).unwrap();
    let article = downloaded(&mut data, &account_id, 1);

    for t in [&second, &first] {
        store::commit_batch(
            &mut data,
            &article.id,
            &t.id,
            None,
            &common::response(common::records(1), 1, 1),
        )
        .unwrap();
    }

    let order: Vec<String> = store::results_by_article(&data, &article.id)
        .into_iter()
        .map(|r| r.template_id)
        .collect();
    assert_eq!(order, vec![first.id, second.id]);
}
