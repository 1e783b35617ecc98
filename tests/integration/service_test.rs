// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::mock_engines::{FlakyStorage, MockRenderEngine, RenderStep};
use super::helpers::{png_bytes, service, test_policy, ARTICLE_HTML};
use scrapevision::domain::models::scrape_record::ScrapeStatus;
use scrapevision::domain::models::scrape_request::{ScrapeRequest, StageKind};
use scrapevision::domain::models::stage_result::SKIP_CANCELLED;
use scrapevision::engines::factory::Providers;
use scrapevision::infrastructure::storage::InMemoryStorage;
use scrapevision::pipeline::service::Persistence;
use scrapevision::utils::errors::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn slow_page(delay: Duration) -> RenderStep {
    RenderStep::Slow(delay, ARTICLE_HTML.to_string())
}

#[tokio::test(start_paused = true)]
async fn test_batch_respects_concurrency_limit() {
    let render = Arc::new(MockRenderEngine::always(slow_page(Duration::from_secs(1))));
    let storage = InMemoryStorage::new();
    let policy = test_policy().max_concurrent_requests(2).build().unwrap();
    let service = service(
        Providers::new(render.clone()),
        Arc::new(storage.clone()),
        policy,
    );

    let start = Instant::now();
    let urls = ["https://a.example.com", "https://b.example.com", "https://c.example.com"];
    let outcomes = service
        .submit_batch(urls.iter().map(|u| ScrapeRequest::new(*u)).collect())
        .await;

    assert_eq!(outcomes.len(), 3);
    for (outcome, url) in outcomes.iter().zip(urls) {
        assert_eq!(outcome.record.url(), url);
        assert_eq!(outcome.status(), ScrapeStatus::Completed);
        assert!(outcome.location().is_some());
    }
    assert_eq!(render.max_active(), 2);
    assert_eq!(render.urls(), urls.to_vec());
    // Two rounds of one second each
    assert_eq!(start.elapsed(), Duration::from_secs(2));
    assert_eq!(storage.keys().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_third_request_runs_after_a_release() {
    let render = Arc::new(MockRenderEngine::always(slow_page(Duration::from_secs(1))));
    let policy = test_policy().max_concurrent_requests(2).build().unwrap();
    let service = service(
        Providers::new(render.clone()),
        Arc::new(InMemoryStorage::new()),
        policy,
    );

    let handles: Vec<_> = ["https://a.example.com", "https://b.example.com", "https://c.example.com"]
        .into_iter()
        .map(|url| service.spawn(ScrapeRequest::new(url)))
        .collect();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(render.calls(), 2);
    assert_eq!(service.governor().in_flight(), 2);
    assert_eq!(service.governor().queued(), 1);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(render.calls(), 3);

    for handle in handles {
        assert_eq!(handle.outcome().await.unwrap().status(), ScrapeStatus::Completed);
    }
    assert_eq!(render.max_active(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_pacing_spaces_pipeline_starts() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::Page(
        ARTICLE_HTML.to_string(),
    )));
    let policy = test_policy()
        .max_concurrent_requests(10)
        .request_delay(Duration::from_millis(500))
        .build()
        .unwrap();
    let service = service(
        Providers::new(render.clone()),
        Arc::new(InMemoryStorage::new()),
        policy,
    );

    let start = Instant::now();
    service
        .submit_batch(vec![
            ScrapeRequest::new("https://example.com/1"),
            ScrapeRequest::new("https://example.com/2"),
            ScrapeRequest::new("https://example.com/3"),
        ])
        .await;

    let offsets: Vec<_> = render.call_times().into_iter().map(|t| t - start).collect();
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_millis(500),
            Duration::from_millis(1000)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_queued_produces_cancelled_record() {
    let render = Arc::new(MockRenderEngine::always(slow_page(Duration::from_secs(10))));
    let storage = InMemoryStorage::new();
    let policy = test_policy().max_concurrent_requests(1).build().unwrap();
    let service = service(
        Providers::new(render.clone()),
        Arc::new(storage.clone()),
        policy,
    );

    let running = service.spawn(ScrapeRequest::new("https://first.example.com"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let queued = service.spawn(ScrapeRequest::new("https://second.example.com"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.governor().queued(), 1);

    queued.cancel();
    let outcome = queued.outcome().await.unwrap();

    let rendered = outcome.record.stage(StageKind::Render).unwrap();
    assert_eq!(rendered.result.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(rendered.attempts, 0);
    for stage in [StageKind::Vision, StageKind::Nlp] {
        assert_eq!(
            outcome.record.result(stage).unwrap().skip_reason(),
            Some(SKIP_CANCELLED)
        );
    }
    assert_eq!(outcome.status(), ScrapeStatus::Failed);
    assert!(outcome.location().is_some());
    assert_eq!(render.calls(), 1);
    assert_eq!(service.governor().in_flight(), 1);

    let first = running.outcome().await.unwrap();
    assert_eq!(first.status(), ScrapeStatus::Completed);
    assert_eq!(service.governor().in_flight(), 0);
    assert_eq!(storage.keys().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_running_request_releases_permit() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::Hang));
    let policy = test_policy().max_concurrent_requests(1).build().unwrap();
    let service = service(
        Providers::new(render.clone()),
        Arc::new(InMemoryStorage::new()),
        policy,
    );

    let handle = service.spawn(ScrapeRequest::new("https://example.com"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(service.governor().in_flight(), 1);

    handle.cancel();
    let outcome = handle.outcome().await.unwrap();

    assert_eq!(
        outcome.record.result(StageKind::Render).unwrap().error_kind(),
        Some(ErrorKind::Cancelled)
    );
    assert_eq!(outcome.status(), ScrapeStatus::Failed);
    assert_eq!(service.governor().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_keeps_record() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::Page(
        ARTICLE_HTML.to_string(),
    )));
    let storage = Arc::new(FlakyStorage::always_failing());
    let service = service(
        Providers::new(render),
        storage.clone(),
        test_policy().build().unwrap(),
    );

    let outcome = service.submit(ScrapeRequest::new("https://example.com")).await;

    assert_eq!(outcome.status(), ScrapeStatus::Completed);
    assert!(outcome.record.result(StageKind::Render).unwrap().is_success());
    match &outcome.persistence {
        Persistence::Failed { kind, message } => {
            assert_eq!(*kind, ErrorKind::StorageError);
            assert!(message.contains("after 3 attempts"));
        }
        other => panic!("expected storage failure, got {:?}", other),
    }
    assert!(outcome.storage_error().is_some());
    // One write plus two retries
    assert_eq!(storage.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_storage_recovers_after_transient_failure() {
    let render = Arc::new(MockRenderEngine::always(RenderStep::PageWithScreenshot(
        ARTICLE_HTML.to_string(),
        png_bytes(4, 4),
    )));
    let storage = Arc::new(FlakyStorage::failing_times(1));
    let service = service(
        Providers::new(render),
        storage.clone(),
        test_policy().build().unwrap(),
    );

    let outcome = service.submit(ScrapeRequest::new("https://example.com/x")).await;

    let location = outcome.location().expect("record stored");
    assert!(location.screenshot.is_some());
    assert_eq!(storage.attempts(), 3);

    let key = format!("example.com/{}.json", outcome.record.id());
    let stored = storage.get(&key).await.expect("record written");
    let value: serde_json::Value = serde_json::from_slice(&stored).unwrap();
    assert_eq!(value["status"], "completed");
    assert_eq!(
        value["screenshot_location"],
        format!("memory://example.com/{}.png", outcome.record.id())
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_turns_queued_requests_into_cancelled_records() {
    let render = Arc::new(MockRenderEngine::always(slow_page(Duration::from_secs(1))));
    let storage = InMemoryStorage::new();
    let policy = test_policy().max_concurrent_requests(1).build().unwrap();
    let service = service(
        Providers::new(render.clone()),
        Arc::new(storage.clone()),
        policy,
    );

    let running = service.spawn(ScrapeRequest::new("https://first.example.com"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let queued = service.spawn(ScrapeRequest::new("https://second.example.com"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    service.shutdown();

    let rejected = queued.outcome().await.unwrap();
    assert_eq!(
        rejected.record.result(StageKind::Render).unwrap().error_kind(),
        Some(ErrorKind::Cancelled)
    );
    assert_eq!(rejected.status(), ScrapeStatus::Failed);

    let first = running.outcome().await.unwrap();
    assert_eq!(first.status(), ScrapeStatus::Completed);
    assert_eq!(render.calls(), 1);
    assert_eq!(storage.keys().await.len(), 2);
}
