// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::helpers::mock_engines::{MockRenderEngine, RenderStep, SuffixRejectingStorage};
use super::helpers::{png_bytes, service, test_policy, ARTICLE_HTML};
use scrapevision::domain::models::scrape_record::{ScrapeRecord, ScrapeStatus};
use scrapevision::domain::models::scrape_request::ScrapeRequest;
use scrapevision::engines::factory::Providers;
use scrapevision::engines::traits::{Screenshot, ScreenshotFormat};
use scrapevision::infrastructure::storage::LocalStorage;
use scrapevision::pipeline::cancel::CancelToken;
use scrapevision::pipeline::orchestrator::PipelineOrchestrator;
use scrapevision::pipeline::sink::{ResultSink, SinkError};
use scrapevision::utils::retry_policy::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_outcome_is_written_to_local_storage() {
    let dir = TempDir::new().unwrap();
    let render = Arc::new(MockRenderEngine::always(RenderStep::PageWithScreenshot(
        ARTICLE_HTML.to_string(),
        png_bytes(10, 6),
    )));
    let service = service(
        Providers::new(render),
        Arc::new(LocalStorage::new(dir.path())),
        test_policy().build().unwrap(),
    );

    let outcome = service
        .submit(ScrapeRequest::new("https://News.Example.com/article/1"))
        .await;
    let location = outcome.location().expect("stored");

    let id = outcome.record.id().as_str().to_string();
    let record_path = dir.path().join("news.example.com").join(format!("{}.json", id));
    let shot_path = dir.path().join("news.example.com").join(format!("{}.png", id));
    assert_eq!(location.record, record_path.to_string_lossy());
    assert_eq!(
        location.screenshot.as_deref(),
        Some(shot_path.to_string_lossy().as_ref())
    );

    let stored: ScrapeRecord =
        serde_json::from_slice(&std::fs::read(&record_path).unwrap()).unwrap();
    assert_eq!(stored, outcome.record);
    assert_eq!(stored.status(), ScrapeStatus::Completed);
    assert_eq!(std::fs::read(&shot_path).unwrap(), png_bytes(10, 6));
}

#[tokio::test]
async fn test_existing_record_is_never_overwritten() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(LocalStorage::new(dir.path()));
    let sink = ResultSink::new(storage, RetryPolicy::fast().with_max_retries(3));
    let orchestrator = PipelineOrchestrator::new(Providers::new(Arc::new(
        MockRenderEngine::always(RenderStep::Page(ARTICLE_HTML.to_string())),
    )));
    let record = orchestrator
        .run(
            &ScrapeRequest::new("https://example.com"),
            &test_policy().build().unwrap(),
        )
        .await;

    sink.persist(&record, None).await.unwrap();
    let original = std::fs::read(dir.path().join(ResultSink::record_key(&record))).unwrap();

    let err = sink.persist(&record, None).await.unwrap_err();
    assert!(matches!(err, SinkError::Write { attempts: 1, .. }));
    assert_eq!(
        std::fs::read(dir.path().join(ResultSink::record_key(&record))).unwrap(),
        original
    );
}

#[tokio::test]
async fn test_screenshot_key_follows_format() {
    let orchestrator = PipelineOrchestrator::new(Providers::new(Arc::new(
        MockRenderEngine::always(RenderStep::Page(ARTICLE_HTML.to_string())),
    )));
    let record = orchestrator
        .run(
            &ScrapeRequest::new("https://shop.example.com/item"),
            &test_policy().build().unwrap(),
        )
        .await;
    let shot = Screenshot {
        format: ScreenshotFormat::Jpeg,
        bytes: vec![0xFF, 0xD8],
    };

    assert_eq!(
        ResultSink::screenshot_key(&record, &shot),
        format!("shop.example.com/{}.jpeg", record.id())
    );
    assert_eq!(
        ResultSink::record_key(&record),
        format!("shop.example.com/{}.json", record.id())
    );
}

#[tokio::test(start_paused = true)]
async fn test_screenshot_write_failure_still_stores_record() {
    let storage = Arc::new(SuffixRejectingStorage::rejecting(".png"));
    let sink = ResultSink::new(
        storage.clone(),
        RetryPolicy::fast()
            .with_max_retries(2)
            .with_backoff(Duration::from_millis(10), Duration::from_millis(50)),
    );
    let orchestrator = PipelineOrchestrator::new(Providers::new(Arc::new(
        MockRenderEngine::always(RenderStep::PageWithScreenshot(
            ARTICLE_HTML.to_string(),
            png_bytes(4, 4),
        )),
    )));
    let run = orchestrator
        .execute(
            &ScrapeRequest::new("https://example.com/gallery"),
            &test_policy().build().unwrap(),
            &CancelToken::never(),
        )
        .await;
    let screenshot = run.screenshot.as_ref().expect("screenshot captured");

    let location = sink.persist(&run.record, Some(screenshot)).await.unwrap();

    let record_key = ResultSink::record_key(&run.record);
    assert_eq!(location.record, format!("memory://{}", record_key));
    assert!(location.screenshot.is_none());
    assert_eq!(storage.inner().keys().await, vec![record_key.clone()]);

    let stored = storage.inner().get(&record_key).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&stored).unwrap();
    assert!(value.get("screenshot_location").is_none());
    assert_eq!(value["id"], run.record.id().as_str());
}
