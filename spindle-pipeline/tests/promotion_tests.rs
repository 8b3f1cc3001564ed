//! Dedup & queue-promotion integration tests

mod helpers;

use std::sync::Arc;

use helpers::TestPipeline;
use spindle_pipeline::db::{candidates, content, execution_log, generation_queue};
use spindle_pipeline::models::{CandidateStatus, NewCandidate};
use spindle_pipeline::services::promotion::STAGE_NAME;
use spindle_pipeline::services::{DedupIndex, PromotionStage, TableDedupSource};

const SUBJECT: &str = "Nina Simone";

fn candidate(external_id: u32, title: &str, with_artwork: bool) -> NewCandidate {
    NewCandidate {
        external_id: external_id.to_string(),
        subject: SUBJECT.to_string(),
        title: title.to_string(),
        year: Some(1965),
        format: Some("LP".to_string()),
        label: Some("Philips".to_string()),
        artwork_url: with_artwork.then(|| format!("https://img.example/{}.jpg", external_id)),
    }
}

async fn seed(pipeline: &TestPipeline, rows: &[NewCandidate]) {
    for c in rows {
        assert!(candidates::insert_if_absent(&pipeline.db, c).await.unwrap());
    }
}

async fn count(pipeline: &TestPipeline, status: CandidateStatus) -> i64 {
    candidates::count_by_status(&pipeline.db, status).await.unwrap()
}

async fn status_and_error(pipeline: &TestPipeline, external_id: u32) -> (String, Option<String>) {
    sqlx::query_as("SELECT status, error_message FROM source_candidates WHERE external_id = ?")
        .bind(external_id.to_string())
        .fetch_one(&pipeline.db)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_promotion_caps_batch_and_skips_known_titles() {
    let pipeline = TestPipeline::new().await;

    let seeded: Vec<_> = (1..=15)
        .map(|i| candidate(i, &format!("Session {}", i), true))
        .collect();
    seed(&pipeline, &seeded).await;

    // Three titles already generated downstream, in different casing
    for i in [2, 7, 11] {
        content::record_content_item(&pipeline.db, SUBJECT, &format!("SESSION {}", i), None)
            .await
            .unwrap();
    }

    let report = pipeline.services.promotion.run(10).await.unwrap();

    assert_eq!(report.fetched, 15);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.inserted, 10);
    assert_eq!(report.failed, 0);
    assert_eq!(report.left_pending, 2);

    assert_eq!(count(&pipeline, CandidateStatus::Skipped).await, 3);
    assert_eq!(count(&pipeline, CandidateStatus::Queued).await, 10);
    assert_eq!(count(&pipeline, CandidateStatus::Pending).await, 2);
    assert_eq!(generation_queue::count_entries(&pipeline.db).await.unwrap(), 10);

    // The two left behind go on the next run
    let second = pipeline.services.promotion.run(10).await.unwrap();
    assert_eq!(second.fetched, 2);
    assert_eq!(second.inserted, 2);
    assert_eq!(count(&pipeline, CandidateStatus::Pending).await, 0);
}

#[tokio::test]
async fn test_promotion_ignores_candidates_without_artwork() {
    let pipeline = TestPipeline::new().await;
    seed(
        &pipeline,
        &[
            candidate(1, "Pastel Blues", true),
            candidate(2, "Wild Is the Wind", false),
        ],
    )
    .await;

    let report = pipeline.services.promotion.run(10).await.unwrap();

    assert_eq!(report.fetched, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(count(&pipeline, CandidateStatus::Pending).await, 1);
}

#[tokio::test]
async fn test_promotion_dedups_within_a_run() {
    let pipeline = TestPipeline::new().await;
    // Same title under two catalog ids (reissue)
    seed(
        &pipeline,
        &[
            candidate(1, "I Put a Spell on You", true),
            candidate(2, "I Put A Spell On You ", true),
        ],
    )
    .await;

    let report = pipeline.services.promotion.run(10).await.unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(generation_queue::count_entries(&pipeline.db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_promotion_skips_titles_queued_by_earlier_runs() {
    let pipeline = TestPipeline::new().await;
    seed(&pipeline, &[candidate(1, "Baltimore", true)]).await;
    pipeline.services.promotion.run(10).await.unwrap();

    // A later discovery finds another pressing of the same album
    seed(&pipeline, &[candidate(2, "baltimore", true)]).await;
    let report = pipeline.services.promotion.run(10).await.unwrap();

    assert_eq!(report.fetched, 1);
    assert_eq!(report.inserted, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(generation_queue::count_entries(&pipeline.db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_every_promotion_run_is_logged() {
    let pipeline = TestPipeline::new().await;

    // Empty run still leaves a row
    pipeline.services.promotion.run(5).await.unwrap();

    seed(
        &pipeline,
        &[candidate(1, "Little Girl Blue", true), candidate(2, "Forbidden Fruit", true)],
    )
    .await;
    pipeline.services.promotion.run(5).await.unwrap();

    let entries = execution_log::recent(&pipeline.db, STAGE_NAME, 10).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.success && e.stage == STAGE_NAME));
    assert!(entries.iter().any(|e| e.processed == 0 && e.inserted == 0));
    assert!(entries.iter().any(|e| e.processed == 2 && e.inserted == 2));
}

#[tokio::test]
async fn test_insert_conflict_marks_candidate_skipped() {
    let pipeline = TestPipeline::new().await;
    seed(&pipeline, &[candidate(1, "Broadway-Blues-Ballads", true)]).await;
    pipeline.services.promotion.run(10).await.unwrap();

    // An index that cannot see the generation queue, as if another run
    // promoted the key after this run's snapshot
    let blind = PromotionStage::new(
        pipeline.db.clone(),
        DedupIndex::new().with_source(Arc::new(TableDedupSource::content_items(pipeline.db.clone()))),
        pipeline.event_bus.clone(),
    );
    seed(&pipeline, &[candidate(2, "broadway-blues-ballads", true)]).await;

    let report = blind.run(10).await.unwrap();

    assert_eq!(report.fetched, 1);
    assert_eq!(report.inserted, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);

    let (status, error) = status_and_error(&pipeline, 2).await;
    assert_eq!(status, "skipped");
    assert!(error.is_none());
    assert_eq!(generation_queue::count_entries(&pipeline.db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_insert_failure_marks_candidate_failed_and_run_continues() {
    let pipeline = TestPipeline::new().await;
    sqlx::query(
        r#"
        CREATE TRIGGER reject_forbidden_fruit BEFORE INSERT ON generation_queue
        WHEN NEW.normalized_title = 'forbidden fruit'
        BEGIN
            SELECT RAISE(ABORT, 'generation queue rejected entry');
        END
        "#,
    )
    .execute(&pipeline.db)
    .await
    .unwrap();

    seed(
        &pipeline,
        &[
            candidate(1, "Forbidden Fruit", true),
            candidate(2, "High Priestess of Soul", true),
        ],
    )
    .await;

    let report = pipeline.services.promotion.run(10).await.unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 0);

    let (status, error) = status_and_error(&pipeline, 1).await;
    assert_eq!(status, "failed");
    assert!(error
        .as_deref()
        .is_some_and(|e| e.contains("generation queue rejected entry")));

    let (status, _) = status_and_error(&pipeline, 2).await;
    assert_eq!(status, "queued");

    // The run itself still counts as successful
    let entries = execution_log::recent(&pipeline.db, STAGE_NAME, 1).await.unwrap();
    assert!(entries[0].success);
    assert_eq!(entries[0].failed, 1);
}
