//! Discovery stage integration tests
//!
//! Pagination across format filters, title dedup, idempotent re-runs and
//! 429 cool-down handling.

mod helpers;

use helpers::{release, test_timings, FakeCatalog, TestPipeline};
use spindle_pipeline::db::{candidates, subjects};
use spindle_pipeline::models::CandidateStatus;
use spindle_pipeline::services::DiscoveryError;
use spindle_pipeline::services::discovery::Subject;

fn subject() -> Subject {
    Subject {
        name: "Art Blakey".to_string(),
        catalog_id: "29735".to_string(),
    }
}

/// 60 vinyl + 60 CD releases; ten CD titles repeat vinyl titles
fn catalog_with_duplicates() -> FakeCatalog {
    let vinyl: Vec<_> = (1..=60)
        .map(|i| release(i, &format!("Album {}", i)))
        .collect();

    let cd: Vec<_> = (61..=120)
        .map(|i| {
            if i <= 70 {
                // Same title as vinyl release i - 60, different catalog id
                release(i, &format!("Album {}", i - 60))
            } else {
                release(i, &format!("Album {}", i - 10))
            }
        })
        .collect();

    FakeCatalog::new()
        .with_listing("Vinyl", vinyl, 25)
        .with_listing("CD", cd, 25)
}

#[tokio::test]
async fn test_discovery_dedups_titles_across_formats() {
    let pipeline = TestPipeline::with_catalog(catalog_with_duplicates()).await;

    let report = pipeline.services.discovery.run(&subject()).await.unwrap();

    assert_eq!(report.discovered, 120);
    assert_eq!(report.filtered, 0);
    assert_eq!(report.inserted, 110);
    assert_eq!(report.skipped, 10);
    assert_eq!(report.known_items, 110);

    // 3 pages per format
    assert_eq!(pipeline.catalog.calls(), 6);

    let pending = candidates::count_by_status(&pipeline.db, CandidateStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending, 110);
}

#[tokio::test]
async fn test_discovery_rerun_inserts_nothing() {
    let pipeline = TestPipeline::with_catalog(catalog_with_duplicates()).await;

    pipeline.services.discovery.run(&subject()).await.unwrap();
    let second = pipeline.services.discovery.run(&subject()).await.unwrap();

    assert_eq!(second.discovered, 120);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 120);
    assert_eq!(second.known_items, 110);

    let total = candidates::count_for_subject(&pipeline.db, "Art Blakey")
        .await
        .unwrap();
    assert_eq!(total, 110);
}

#[tokio::test]
async fn test_discovery_filters_non_primary_roles() {
    let mut appearance = release(2, "Guest Spot");
    appearance.role = Some("Appearance".to_string());
    let mut main_lowercase = release(3, "Moanin'");
    main_lowercase.role = Some("main".to_string());

    let catalog = FakeCatalog::new().with_listing(
        "Vinyl",
        vec![release(1, "Free For All"), appearance, main_lowercase],
        50,
    );
    let pipeline = TestPipeline::with_catalog(catalog).await;

    let report = pipeline.services.discovery.run(&subject()).await.unwrap();

    assert_eq!(report.discovered, 3);
    assert_eq!(report.filtered, 1);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.skipped, 0);
}

#[tokio::test]
async fn test_discovery_reissues_same_page_after_rate_limit() {
    let catalog = FakeCatalog::new().with_listing(
        "Vinyl",
        (1..=30).map(|i| release(i, &format!("Take {}", i))).collect(),
        10,
    );
    catalog.rate_limit_next(2);
    let pipeline = TestPipeline::with_catalog(catalog).await;

    let report = pipeline.services.discovery.run(&subject()).await.unwrap();

    assert_eq!(report.inserted, 30);
    // 3 vinyl pages + 1 empty CD page + 2 rate-limited re-requests
    assert_eq!(pipeline.catalog.calls(), 6);
}

#[tokio::test]
async fn test_discovery_gives_up_after_cooldown_budget() {
    let catalog = FakeCatalog::new().with_listing("Vinyl", vec![release(1, "Buhaina")], 10);
    catalog.rate_limit_next(100);

    let mut timings = test_timings();
    timings.catalog_max_cooldowns = 2;
    let pipeline = TestPipeline::with(catalog, timings).await;

    let err = pipeline.services.discovery.run(&subject()).await.unwrap_err();

    match err {
        DiscoveryError::CooldownExhausted { page, cooldowns, .. } => {
            assert_eq!(page, 1);
            assert_eq!(cooldowns, 2);
        }
        other => panic!("expected CooldownExhausted, got {:?}", other),
    }
    assert_eq!(pipeline.catalog.calls(), 3);

    // Nothing written when the listing could not be completed
    let total = candidates::count_for_subject(&pipeline.db, "Art Blakey")
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_discovery_propagates_non_retryable_catalog_error() {
    let catalog = FakeCatalog::new();
    catalog.fail_format("CD");
    let pipeline = TestPipeline::with_catalog(catalog).await;

    let err = pipeline.services.discovery.run(&subject()).await.unwrap_err();

    assert!(matches!(err, DiscoveryError::Catalog { ref format, .. } if format == "CD"));
    // Vinyl page, then a single CD attempt: API errors are not retried
    assert_eq!(pipeline.catalog.calls(), 2);
}

#[tokio::test]
async fn test_discovery_stops_at_page_limit() {
    let listing: Vec<_> = (1..=30)
        .map(|i| release(i, &format!("Session {}", i)))
        .collect();
    let mut timings = test_timings();
    timings.catalog_max_pages = 2;
    let pipeline = TestPipeline::with(FakeCatalog::new().with_listing("Vinyl", listing, 10), timings).await;

    let err = pipeline.services.discovery.run(&subject()).await.unwrap_err();

    match err {
        DiscoveryError::PageLimitExceeded { format, max_pages } => {
            assert_eq!(format, "Vinyl");
            assert_eq!(max_pages, 2);
        }
        other => panic!("expected PageLimitExceeded, got {:?}", other),
    }
    // The third page is never requested
    assert_eq!(pipeline.catalog.calls(), 2);
    assert_eq!(
        candidates::count_for_subject(&pipeline.db, "Art Blakey")
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_discovery_rejects_blank_subject() {
    let pipeline = TestPipeline::new().await;

    let err = pipeline
        .services
        .discovery
        .run(&Subject {
            name: "  ".to_string(),
            catalog_id: "1".to_string(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DiscoveryError::InvalidSubject(_)));
    assert_eq!(pipeline.catalog.calls(), 0);
}

#[tokio::test]
async fn test_subject_stats_are_recomputed_from_candidates() {
    let catalog = FakeCatalog::new().with_listing(
        "Vinyl",
        vec![release(1, "Mosaic"), release(2, "Caravan")],
        10,
    );
    let pipeline = TestPipeline::with_catalog(catalog).await;

    pipeline.services.discovery.run(&subject()).await.unwrap();

    let stats = subjects::load_stats(&pipeline.db, "Art Blakey")
        .await
        .unwrap()
        .expect("subject registered by discovery");
    assert_eq!(stats.catalog_id, "29735");
    assert_eq!(stats.known_items, 2);
    assert!(stats.last_discovered_at.is_some());

    assert!(subjects::load_stats(&pipeline.db, "Nobody")
        .await
        .unwrap()
        .is_none());
}
