//! Sequential queue processor integration tests

mod helpers;

use std::time::{Duration, Instant};

use helpers::{test_timings, FakeCatalog, TestPipeline};
use spindle_pipeline::db::{candidates, content, import_queue};
use spindle_pipeline::models::{ImportStatus, NewCandidate};
use spindle_pipeline::services::{GenerationOutcome, GeneratorError, SequentialOutcome};
use uuid::Uuid;

async fn enqueue(pipeline: &TestPipeline, external_id: &str, title: &str, max_retries: u32) -> Uuid {
    import_queue::enqueue(&pipeline.db, external_id, "Sun Ra", title, max_retries)
        .await
        .unwrap()
        .id
}

async fn status_of(pipeline: &TestPipeline, id: Uuid) -> ImportStatus {
    import_queue::load_record(&pipeline.db, id)
        .await
        .unwrap()
        .expect("record exists")
        .status
}

#[tokio::test]
async fn test_idle_when_queue_is_empty() {
    let pipeline = TestPipeline::new().await;

    let outcome = pipeline.services.sequential.process_next().await.unwrap();

    assert_eq!(outcome, SequentialOutcome::Idle);
    assert_eq!(pipeline.generator.calls(), 0);
}

#[tokio::test]
async fn test_success_completes_record_and_feeds_content_store() {
    let pipeline = TestPipeline::new().await;
    let id = enqueue(&pipeline, "1001", "Space Is the Place", 3).await;

    let outcome = pipeline.services.sequential.process_next().await.unwrap();

    assert_eq!(outcome, SequentialOutcome::Completed { record_id: id });
    assert_eq!(status_of(&pipeline, id).await, ImportStatus::Completed);
    assert_eq!(pipeline.generator.calls(), 1);
    assert_eq!(content::count_items(&pipeline.db).await.unwrap(), 1);

    let record = import_queue::load_record(&pipeline.db, id).await.unwrap().unwrap();
    assert!(record.processed_at.is_some());
}

#[tokio::test]
async fn test_existing_target_is_skipped_not_failed() {
    let pipeline = TestPipeline::new().await;
    pipeline.generator.push(Ok(GenerationOutcome::AlreadyExists));
    let id = enqueue(&pipeline, "1002", "Lanquidity", 3).await;

    let outcome = pipeline.services.sequential.process_next().await.unwrap();

    assert_eq!(outcome, SequentialOutcome::Skipped { record_id: id });
    assert_eq!(status_of(&pipeline, id).await, ImportStatus::Skipped);
}

#[tokio::test]
async fn test_invalid_record_fails_without_calling_generator() {
    let pipeline = TestPipeline::new().await;
    let id = enqueue(&pipeline, "not-a-number", "Jazz in Silhouette", 3).await;

    let outcome = pipeline.services.sequential.process_next().await.unwrap();

    assert!(matches!(outcome, SequentialOutcome::Failed { record_id, .. } if record_id == id));
    assert_eq!(pipeline.generator.calls(), 0);

    let record = import_queue::load_record(&pipeline.db, id).await.unwrap().unwrap();
    assert_eq!(record.status, ImportStatus::Failed);
    assert_eq!(record.retry_count, 0);
    assert!(record.error_message.is_some());

    // Permanent: never picked up again
    let next = pipeline.services.sequential.process_next().await.unwrap();
    assert_eq!(next, SequentialOutcome::Idle);
}

#[tokio::test]
async fn test_failures_return_to_pending_until_budget_exhausted() {
    let pipeline = TestPipeline::new().await;
    for _ in 0..3 {
        pipeline
            .generator
            .push(Err(GeneratorError::Network("connection refused".to_string())));
    }
    let id = enqueue(&pipeline, "1003", "Atlantis", 3).await;

    let first = pipeline.services.sequential.process_next().await.unwrap();
    assert!(matches!(first, SequentialOutcome::Retrying { retry_count: 1, .. }));
    assert_eq!(status_of(&pipeline, id).await, ImportStatus::Pending);

    let second = pipeline.services.sequential.process_next().await.unwrap();
    assert!(matches!(second, SequentialOutcome::Retrying { retry_count: 2, .. }));
    assert_eq!(status_of(&pipeline, id).await, ImportStatus::Pending);

    let third = pipeline.services.sequential.process_next().await.unwrap();
    assert!(matches!(third, SequentialOutcome::Failed { record_id, .. } if record_id == id));

    // One generator call per invocation, no in-call retry
    assert_eq!(pipeline.generator.calls(), 3);

    let record = import_queue::load_record(&pipeline.db, id).await.unwrap().unwrap();
    assert_eq!(record.status, ImportStatus::Failed);
    assert_eq!(record.retry_count, 3);
    assert!(record
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("connection refused")));

    assert_eq!(
        pipeline.services.sequential.process_next().await.unwrap(),
        SequentialOutcome::Idle
    );
}

#[tokio::test]
async fn test_generator_receives_canonical_external_id() {
    let pipeline = TestPipeline::new().await;
    let padded = enqueue(&pipeline, " 0042 ", "Sound Sun Pleasure", 3).await;
    let signed = enqueue(&pipeline, "+5", "Monorails and Satellites", 3).await;

    let first = pipeline.services.sequential.process_next().await.unwrap();
    assert_eq!(first, SequentialOutcome::Completed { record_id: padded });

    let second = pipeline.services.sequential.process_next().await.unwrap();
    assert!(matches!(second, SequentialOutcome::Failed { record_id, .. } if record_id == signed));

    assert_eq!(pipeline.generator.external_ids(), vec!["42".to_string()]);
}

#[tokio::test]
async fn test_record_finishes_after_caller_stops_waiting() {
    let pipeline = TestPipeline::new().await;
    pipeline.generator.set_delay(Duration::from_millis(300));
    let id = enqueue(&pipeline, "7001", "Magic City", 3).await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        pipeline.services.sequential.process_next(),
    )
    .await;
    assert!(abandoned.is_err(), "generation should still be running");
    assert_eq!(status_of(&pipeline, id).await, ImportStatus::Processing);

    let db = &pipeline.db;
    assert!(
        helpers::wait_for(Duration::from_secs(5), || async move {
            import_queue::load_record(db, id)
                .await
                .unwrap()
                .is_some_and(|r| r.status == ImportStatus::Completed)
        })
        .await
    );
    assert_eq!(pipeline.generator.calls(), 1);
}

#[tokio::test]
async fn test_expired_claim_returns_to_queue() {
    let mut timings = test_timings();
    timings.import_claim_lease = Duration::from_millis(50);
    let pipeline = TestPipeline::with(FakeCatalog::new(), timings).await;

    // Claimed by an invocation that never reported back
    let id = enqueue(&pipeline, "8001", "Heliocentric Worlds", 3).await;
    assert!(import_queue::claim(&pipeline.db, id).await.unwrap());

    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = pipeline.services.sequential.process_next().await.unwrap();
    assert_eq!(outcome, SequentialOutcome::Completed { record_id: id });

    // The lost attempt is not counted against the retry budget
    let record = import_queue::load_record(&pipeline.db, id).await.unwrap().unwrap();
    assert_eq!(record.retry_count, 0);
}

#[tokio::test]
async fn test_fresh_claim_is_left_alone() {
    let pipeline = TestPipeline::new().await;
    let id = enqueue(&pipeline, "8002", "The Magic City", 3).await;
    assert!(import_queue::claim(&pipeline.db, id).await.unwrap());

    let outcome = pipeline.services.sequential.process_next().await.unwrap();

    assert_eq!(outcome, SequentialOutcome::Idle);
    assert_eq!(status_of(&pipeline, id).await, ImportStatus::Processing);
    assert_eq!(pipeline.generator.calls(), 0);
}

#[tokio::test]
async fn test_startup_releases_every_claim() {
    let pipeline = TestPipeline::new().await;
    let claimed = enqueue(&pipeline, "8003", "Other Planes of There", 3).await;
    let done = enqueue(&pipeline, "8004", "Art Forms of Dimensions Tomorrow", 3).await;
    assert!(import_queue::claim(&pipeline.db, claimed).await.unwrap());
    import_queue::mark_terminal(&pipeline.db, done, ImportStatus::Completed, None)
        .await
        .unwrap();

    let released = pipeline.services.sequential.release_all_claims().await.unwrap();

    assert_eq!(released, 1);
    assert_eq!(status_of(&pipeline, claimed).await, ImportStatus::Pending);
    assert_eq!(status_of(&pipeline, done).await, ImportStatus::Completed);
}

#[tokio::test]
async fn test_oldest_record_first_one_per_call() {
    let pipeline = TestPipeline::new().await;
    let older = enqueue(&pipeline, "2001", "Nuclear War", 3).await;
    let newer = enqueue(&pipeline, "2002", "Strange Strings", 3).await;

    let outcome = pipeline.services.sequential.process_next().await.unwrap();
    assert_eq!(outcome.record_id(), Some(older));
    assert_eq!(status_of(&pipeline, newer).await, ImportStatus::Pending);

    let outcome = pipeline.services.sequential.process_next().await.unwrap();
    assert_eq!(outcome.record_id(), Some(newer));
}

#[tokio::test]
async fn test_hold_applies_only_when_a_record_was_handled() {
    let mut timings = test_timings();
    timings.import_hold = Duration::from_millis(150);
    let pipeline = TestPipeline::with(FakeCatalog::new(), timings).await;

    let started = Instant::now();
    pipeline.services.sequential.process_next().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(150));

    enqueue(&pipeline, "3001", "Cosmic Tones", 3).await;
    let started = Instant::now();
    pipeline.services.sequential.process_next().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_generated_content_blocks_later_promotion() {
    let pipeline = TestPipeline::new().await;
    enqueue(&pipeline, "4001", "Angels and Demons at Play", 3).await;
    pipeline.services.sequential.process_next().await.unwrap();

    // Discovery later finds the same album
    candidates::insert_if_absent(
        &pipeline.db,
        &NewCandidate {
            external_id: "4001".to_string(),
            subject: "sun ra".to_string(),
            title: "Angels And Demons At Play".to_string(),
            year: None,
            format: None,
            label: None,
            artwork_url: Some("https://img.example/4001.jpg".to_string()),
        },
    )
    .await
    .unwrap();

    let report = pipeline.services.promotion.run(10).await.unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn test_scheduler_drains_queue_and_stops_on_shutdown() {
    use spindle_common::config::SchedulerConfig;
    use spindle_pipeline::services::PipelineScheduler;

    let pipeline = TestPipeline::new().await;
    let id = enqueue(&pipeline, "6001", "Lanquidity", 3).await;

    // Intervals fire immediately on the first tick
    let handles = PipelineScheduler::new(
        pipeline.services.promotion.clone(),
        pipeline.services.sequential.clone(),
        SchedulerConfig {
            enabled: true,
            promotion_interval_secs: 3600,
            promotion_batch_size: 10,
            import_interval_secs: 3600,
        },
        pipeline.shutdown.clone(),
    )
    .spawn();
    assert_eq!(handles.len(), 2);

    let db = &pipeline.db;
    assert!(
        helpers::wait_for(Duration::from_secs(5), || async move {
            import_queue::load_record(db, id)
                .await
                .unwrap()
                .is_some_and(|r| r.status == ImportStatus::Completed)
        })
        .await
    );

    pipeline.shutdown.cancel();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("timer stops on shutdown")
            .unwrap();
    }
}
